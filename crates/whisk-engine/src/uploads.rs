use std::collections::HashMap;
use std::path::{Path, PathBuf};

use whisk_contracts::folders::ReferenceCategory;

use crate::error::{EngineError, Result};
use crate::service::{mime_for_path, ImageService, ImageUpload};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedReference {
    pub media_id: String,
    pub caption: String,
}

/// Remote media ids of the local files uploaded so far, keyed by path.
/// Entries are added on success only and live as long as the cache.
#[derive(Debug, Default)]
pub struct UploadCache {
    entries: HashMap<PathBuf, UploadedReference>,
}

impl UploadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&UploadedReference> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ensure_uploaded(
        &mut self,
        service: &dyn ImageService,
        path: &Path,
        category: ReferenceCategory,
    ) -> Result<UploadedReference> {
        if let Some(cached) = self.entries.get(path) {
            return Ok(cached.clone());
        }

        let bytes = std::fs::read(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => EngineError::NotFound(path.to_path_buf()),
            _ => EngineError::Io(err),
        })?;
        let upload = ImageUpload {
            source: path,
            bytes: &bytes,
            mime: mime_for_path(path),
            category,
        };

        let caption = match service.caption(&upload) {
            Ok(caption) => caption,
            Err(err) => {
                tracing::debug!(file = %path.display(), error = %err, "caption unavailable");
                String::new()
            }
        };
        let uploaded = service.upload(&upload)?;
        tracing::info!(
            file = %path.display(),
            category = %category,
            media_id = %uploaded.media_id,
            "reference uploaded"
        );

        let entry = UploadedReference {
            media_id: uploaded.media_id,
            caption,
        };
        self.entries.insert(path.to_path_buf(), entry.clone());
        Ok(entry)
    }
}
