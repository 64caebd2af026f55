//! Default [`Transport`] over a blocking `reqwest` client.

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::provider::{Method, Response, Transport};
use crate::Result;

/// Blocking HTTP transport honouring the configured timeout and TLS
/// verification setting.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http_client: Client,
}

impl HttpTransport {
    /// Create a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Network`] if the HTTP client cannot be
    /// created.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http_client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;
        Ok(Self { http_client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Response> {
        let mut request = match method {
            Method::Get => self.http_client.get(url),
            Method::Post => self.http_client.post(url),
        };
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send()?;
        let status = response.status().as_u16();
        let text = response.text()?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(Response { status, body })
    }
}
