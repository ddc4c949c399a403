use crate::plugins::fs::driver::FsTransport;
use crate::plugins::registry::{EndpointResolver, Transport, TransportContext};
use std::sync::Arc;
use url::Url;

pub struct FsResolver;

impl FsResolver {
    pub fn new() -> Self { Self }
}

impl EndpointResolver for FsResolver {
    fn name(&self) -> &'static str { "fs-resolver" }

    fn can_handle(&self, endpoint: &str) -> u8 {
        match Url::parse(endpoint) {
            Ok(u) if u.scheme() == "file" => 60,
            _ => 0,
        }
    }

    fn open(&self, endpoint: &str, ctx: &TransportContext) -> anyhow::Result<Arc<dyn Transport>> {
        let url = Url::parse(endpoint)?;
        let root = url
            .to_file_path()
            .map_err(|_| anyhow::anyhow!("not a local directory: {}", endpoint))?;
        Ok(Arc::new(FsTransport::new(root, ctx.timeout)))
    }
}
