use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use url::Url;

use crate::core::error::TransportError;
use crate::core::model::Response;
use crate::core::naming::ResourceName;
use crate::plugins::registry::{Transport, TransportContext};

pub const TRACING_TARGET: &str = "segfetch::http";

/// Header a gateway may use to report the name it actually answered with.
pub const RESPONSE_NAME_HEADER: &str = "x-ndn-name";

#[derive(thiserror::Error, Debug)]
pub enum HttpTransportError {
    #[error("endpoint {0} cannot carry names (no path base)")]
    CannotBeABase(String),

    #[error("http status error: {0}")]
    Status(StatusCode),
}

/// Fetches names from an HTTP gateway: `<endpoint>/<escaped name>`.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    ctx: TransportContext,
}

impl HttpTransport {
    pub fn new(endpoint: Url, ctx: TransportContext) -> anyhow::Result<Self> {
        if endpoint.cannot_be_a_base() {
            return Err(HttpTransportError::CannotBeABase(endpoint.to_string()).into());
        }
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .default_headers(Self::build_headers(&ctx)?)
            .timeout(ctx.timeout)
            .build()?;
        Ok(Self { client, endpoint, ctx })
    }

    fn build_headers(ctx: &TransportContext) -> anyhow::Result<HeaderMap> {
        let mut h = HeaderMap::new();
        h.insert(USER_AGENT, HeaderValue::from_str(&ctx.user_agent)?);
        for (k, v) in &ctx.headers {
            let name = HeaderName::from_bytes(k.as_bytes())?;
            let value = HeaderValue::from_str(v)?;
            h.insert(name, value);
        }
        Ok(h)
    }

    pub fn url_for(&self, name: &ResourceName) -> Url {
        let mut url = self.endpoint.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", base, name.to_uri()));
        url
    }

    fn response_name(resp: &reqwest::Response, requested: &ResourceName) -> ResourceName {
        resp.headers()
            .get(RESPONSE_NAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<ResourceName>().ok())
            .unwrap_or_else(|| requested.clone())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str { "http-transport" }

    async fn express(&self, name: &ResourceName) -> Result<Response, TransportError> {
        let url = self.url_for(name);
        tracing::trace!(target: TRACING_TARGET, %url, "GET");

        let resp = match tokio::time::timeout(self.ctx.timeout, self.client.get(url.clone()).send()).await {
            Err(_) => return Err(TransportError::Timeout),
            Ok(Err(e)) if e.is_timeout() => return Err(TransportError::Timeout),
            Ok(Err(e)) => return Err(TransportError::Failed(e.to_string())),
            Ok(Ok(r)) => r,
        };

        let status = resp.status();
        if !status.is_success() {
            tracing::debug!(target: TRACING_TARGET, %url, %status, "request rejected");
            return Err(TransportError::Failed(HttpTransportError::Status(status).to_string()));
        }

        let responded = Self::response_name(&resp, name);
        match resp.bytes().await {
            Ok(payload) => Ok(Response::new(responded, payload)),
            Err(e) if e.is_timeout() => Err(TransportError::Timeout),
            Err(e) => Err(TransportError::Failed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(endpoint: &str) -> HttpTransport {
        HttpTransport::new(Url::parse(endpoint).unwrap(), TransportContext::default()).unwrap()
    }

    #[test]
    fn maps_names_under_the_endpoint_path() {
        let name: ResourceName = "/ndn/file/a b".parse::<ResourceName>().unwrap().add_segment(1);
        assert_eq!(transport("http://127.0.0.1:9000").url_for(&name).as_str(), "http://127.0.0.1:9000/ndn/file/a%20b/%00%01");
        assert_eq!(transport("http://gw/base/").url_for(&name).path(), "/base/ndn/file/a%20b/%00%01");
        let wide = name.without_last_component().add_segment(256);
        assert_eq!(transport("http://gw").url_for(&wide).path(), "/ndn/file/a%20b/%00%00%01");
    }

    #[test]
    fn rejects_bad_headers_and_opaque_endpoints() {
        let ctx = TransportContext { headers: vec![("bad header".to_string(), "x".to_string())], ..Default::default() };
        assert!(HttpTransport::new(Url::parse("http://gw").unwrap(), ctx).is_err());
        assert!(HttpTransport::new(Url::parse("mailto:a@b").unwrap(), TransportContext::default()).is_err());
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_transport_failure() {
        // port 9 (discard) on localhost is closed in test environments
        let t = transport("http://127.0.0.1:9");
        let err = t.express(&"/a".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, TransportError::Failed(_) | TransportError::Timeout));
    }
}
