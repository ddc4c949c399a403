use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::TransportError;
use crate::core::model::Response;
use crate::core::naming::ResourceName;
use crate::plugins::registry::Transport;

pub const TRACING_TARGET: &str = "segfetch::fs";

/// Serves names from a directory mirror. Each name component is one path
/// level, spelled in its escaped form, so `/a/b/%00%01` lives at
/// `<root>/a/b/%00%01`.
pub struct FsTransport {
    root: PathBuf,
    timeout: Duration,
}

impl FsTransport {
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { root: root.into(), timeout }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &ResourceName) -> PathBuf {
        let uri = name.to_uri();
        uri.split('/')
            .filter(|c| !c.is_empty() && *c != "." && *c != "..")
            .fold(self.root.clone(), |p, c| p.join(c))
    }

    /// Stores `payload` where [`FsTransport::path_for`] will look for `name`.
    pub async fn publish(&self, name: &ResourceName, payload: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, payload).await?;
        Ok(path)
    }
}

#[async_trait]
impl Transport for FsTransport {
    fn name(&self) -> &'static str { "fs-transport" }

    async fn express(&self, name: &ResourceName) -> Result<Response, TransportError> {
        let path = self.path_for(name);
        tracing::trace!(target: TRACING_TARGET, path = %path.display(), "read");

        match tokio::time::timeout(self.timeout, tokio::fs::read(&path)).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(Ok(payload)) => Ok(Response::new(name.clone(), payload)),
            // nobody published it, which on a real network means nothing answers
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => Err(TransportError::Timeout),
            Ok(Err(e)) => Err(TransportError::Failed(format!("{}: {}", path.display(), e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::segment_fetcher::SegmentFetcher;
    use std::sync::Arc;

    #[tokio::test]
    async fn serves_published_segments() {
        let dir = tempfile::tempdir().unwrap();
        let t = Arc::new(FsTransport::new(dir.path(), Duration::from_secs(1)));
        let base: ResourceName = "/dev/chronoshare/file/%BA%0C".parse().unwrap();
        t.publish(&base.add_segment(0), b"he").await.unwrap();
        t.publish(&base.add_segment(1), b"llo").await.unwrap();

        assert!(dir.path().join("dev/chronoshare/file/%BA%0C/%00%01").exists());
        let data = SegmentFetcher::new(t.clone(), base.clone(), 2).run().await.unwrap();
        assert_eq!(&data[..], b"hello");

        let missing = t.express(&base.add_segment(2)).await.unwrap_err();
        assert_eq!(missing, TransportError::Timeout);
    }

    #[test]
    fn dot_components_stay_inside_the_root() {
        let t = FsTransport::new("/srv/mirror", Duration::from_secs(1));
        let name = ResourceName::from_components(["..", "etc", "."]);
        assert_eq!(t.path_for(&name), PathBuf::from("/srv/mirror/...../etc/...."));
    }
}
