use anyhow::Context;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Writes an assembled object next to its destination as `<name>.partial`
/// and moves it into place only once everything is on disk.
pub struct Assembler {
    target_path: PathBuf,
    partial_path: PathBuf,
    file: tokio::sync::Mutex<File>,
    written: tokio::sync::Mutex<u64>,
}

impl Assembler {
    pub async fn create(target_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = target_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial_path = partial_path_for(target_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&partial_path)
            .await
            .with_context(|| format!("open {:?}", partial_path))?;

        Ok(Self {
            target_path: target_path.to_path_buf(),
            partial_path,
            file: tokio::sync::Mutex::new(file),
            written: tokio::sync::Mutex::new(0),
        })
    }

    pub async fn append(&self, data: &[u8]) -> anyhow::Result<()> {
        let mut f = self.file.lock().await;
        f.write_all(data).await?;
        *self.written.lock().await += data.len() as u64;
        Ok(())
    }

    pub async fn written(&self) -> u64 {
        *self.written.lock().await
    }

    /// Flushes and renames the partial file over the target.
    pub async fn finish(self) -> anyhow::Result<PathBuf> {
        let mut f = self.file.into_inner();
        f.flush().await?;
        f.sync_all().await.ok();
        drop(f);

        if tokio::fs::metadata(&self.target_path).await.is_ok() {
            let _ = tokio::fs::remove_file(&self.target_path).await;
        }
        tokio::fs::rename(&self.partial_path, &self.target_path)
            .await
            .with_context(|| format!("rename {:?} -> {:?}", self.partial_path, self.target_path))?;
        Ok(self.target_path)
    }
}

fn partial_path_for(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}
