//! Requests relayed through the ProxLock proxy using a partial key.
//!
//! The caller never holds the full upstream API key. It sends its partial key and the key's
//! association id to `POST /proxy`; the backend recombines the key and forwards the request to
//! the destination. Inside request bodies or headers the partial key can also be referenced
//! with the [`partial_key_placeholder`] syntax.

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;
use url::Url;

use super::client::ReqwestProxyApi;
use crate::errors::{Error, Result};

pub const ASSOCIATION_ID_HEADER: &str = "APIProxy_ASSOCIATION_ID";
pub const DESTINATION_HEADER: &str = "APIProxy_DESTINATION";
pub const HTTP_METHOD_HEADER: &str = "APIProxy_HTTP_METHOD";

/// How a partial key is referenced inside a proxied request.
pub fn partial_key_placeholder(partial_key: &str) -> String {
    format!("%APIProxy_PARTIAL_KEY:{partial_key}%")
}

#[derive(Debug)]
pub struct ProxiedRequest {
    pub partial_key: SecretString,
    pub association_id: String,
    pub destination: Url,
    pub method: Method,
    /// Extra headers forwarded to the destination
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxiedResponse {
    pub status: u16,
    pub body: String,
}

impl ReqwestProxyApi {
    /// Send a request through the proxy. Non-2xx answers are errors, like every other call.
    #[instrument(skip(self, request), fields(destination = %request.destination, method = %request.method))]
    pub async fn proxy(&self, request: &ProxiedRequest) -> Result<ProxiedResponse> {
        let url = self.url("proxy")?;
        let mut builder = self
            .http()
            .post(url)
            .bearer_auth(request.partial_key.expose_secret())
            .header(ASSOCIATION_ID_HEADER, &request.association_id)
            .header(DESTINATION_HEADER, request.destination.as_str())
            .header(HTTP_METHOD_HEADER, request.method.as_str());

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::api("send proxied request", status));
        }

        let body = response.text().await?;
        tracing::info!(status = status.as_u16(), response_len = body.len(), "Proxied request completed");
        Ok(ProxiedResponse {
            status: status.as_u16(),
            body,
        })
    }
}
