use crate::plugins::http::driver::HttpTransport;
use crate::plugins::registry::{EndpointResolver, Transport, TransportContext};
use std::sync::Arc;
use url::Url;

pub struct HttpResolver;

impl HttpResolver {
    pub fn new() -> Self { Self }
}

impl EndpointResolver for HttpResolver {
    fn name(&self) -> &'static str { "http-resolver" }

    fn can_handle(&self, endpoint: &str) -> u8 {
        if let Ok(u) = Url::parse(endpoint) {
            if u.scheme() == "http" || u.scheme() == "https" { return 60; }
        }
        0
    }

    fn open(&self, endpoint: &str, ctx: &TransportContext) -> anyhow::Result<Arc<dyn Transport>> {
        let url = Url::parse(endpoint)?;
        Ok(Arc::new(HttpTransport::new(url, ctx.clone())?))
    }
}
