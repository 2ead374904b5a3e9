//! DirectoryUploader - outbox ディレクトリへコピーする Uploader
//!
//! 本物のネットワーク転送の代わり。画像をコピーし、メタデータを
//! `<fname>.json` として横に書く。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use porter_core::{UploadError, UploadRequest, Uploader};

pub struct DirectoryUploader {
    outbox: PathBuf,
}

impl DirectoryUploader {
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
        }
    }
}

/// Local path behind an image uri (`file:///a/b.jpg` or a bare path).
pub fn source_path(image_uri: &str) -> PathBuf {
    PathBuf::from(image_uri.strip_prefix("file://").unwrap_or(image_uri))
}

#[async_trait]
impl Uploader for DirectoryUploader {
    async fn upload(&self, request: &UploadRequest) -> Result<(), UploadError> {
        // the name must not escape the outbox
        let name = Path::new(&request.file_name);
        if request.file_name.is_empty() || name.file_name() != Some(name.as_os_str()) {
            return Err(UploadError::new(format!(
                "invalid file name {:?}",
                request.file_name
            )));
        }

        let source = source_path(&request.image_uri);
        let target = self.outbox.join(name);

        tokio::fs::create_dir_all(&self.outbox)
            .await
            .map_err(|e| UploadError::new(format!("create {}: {e}", self.outbox.display())))?;
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| UploadError::new(format!("copy {}: {e}", source.display())))?;

        let sidecar = serde_json::to_vec_pretty(request)
            .map_err(|e| UploadError::new(format!("encode metadata: {e}")))?;
        let sidecar_path = self.outbox.join(format!("{}.json", request.file_name));
        tokio::fs::write(&sidecar_path, sidecar)
            .await
            .map_err(|e| UploadError::new(format!("write {}: {e}", sidecar_path.display())))?;

        tracing::debug!(target = %target.display(), "copied to outbox");
        Ok(())
    }
}
