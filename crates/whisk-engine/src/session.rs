use std::sync::Arc;

use whisk_contracts::folders::{FolderIndex, ReferenceCategory};
use whisk_contracts::references::{plan_references, ResolvedReferenceSet};

use crate::error::Result;
use crate::service::ImageService;
use crate::uploads::UploadCache;

/// Everything one run needs: the service, the uploads made so far, the scanned
/// reference folders and the style media id. Owned by the worker while a run
/// is active and handed back when it stops.
pub struct Session {
    service: Arc<dyn ImageService>,
    uploads: UploadCache,
    index: FolderIndex,
    style_media_id: Option<String>,
}

/// References attached to one prompt plus the scenes left out by the cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub references: ResolvedReferenceSet,
    pub dropped_scenes: Vec<String>,
}

impl Session {
    pub fn new(service: Arc<dyn ImageService>, index: FolderIndex) -> Self {
        Self {
            service,
            uploads: UploadCache::new(),
            index,
            style_media_id: None,
        }
    }

    pub fn service(&self) -> &dyn ImageService {
        self.service.as_ref()
    }

    pub fn index(&self) -> &FolderIndex {
        &self.index
    }

    pub fn uploads(&self) -> &UploadCache {
        &self.uploads
    }

    pub fn style_media_id(&self) -> Option<&str> {
        self.style_media_id.as_deref()
    }

    /// Uploads the run's style file, if there is one. On failure the run goes
    /// on without a style.
    pub fn prepare_style(&mut self) -> Result<Option<String>> {
        let Some(style) = self.index.style() else {
            self.style_media_id = None;
            return Ok(None);
        };
        match self
            .uploads
            .ensure_uploaded(self.service.as_ref(), &style.path, ReferenceCategory::Style)
        {
            Ok(uploaded) => {
                self.style_media_id = Some(uploaded.media_id.clone());
                Ok(Some(uploaded.media_id))
            }
            Err(err) => {
                self.style_media_id = None;
                tracing::warn!(file = %style.path.display(), error = %err, "style upload failed, continuing without style");
                Err(err)
            }
        }
    }

    /// Rescans the reference folders. The style id survives only if the
    /// style file chosen now was already uploaded.
    pub fn rescan(&mut self) {
        self.index.rescan();
        self.style_media_id = self
            .index
            .style()
            .and_then(|style| self.uploads.get(&style.path))
            .map(|uploaded| uploaded.media_id.clone());
        tracing::debug!(
            characters = self.index.characters().len(),
            scenes = self.index.scenes().len(),
            style = self.style_media_id.is_some(),
            "reference folders rescanned"
        );
    }

    /// Matches `prompt` against the scanned folders and uploads whatever is
    /// not cached yet. The first failing upload fails the whole resolution.
    pub fn resolve(&mut self, prompt: &str) -> Result<Resolution> {
        let plan = plan_references(
            prompt,
            self.index.characters(),
            self.index.scenes(),
            self.index.style(),
        );
        let dropped_scenes = plan
            .dropped_scenes
            .iter()
            .map(|entry| entry.filename.clone())
            .collect();
        let service = self.service.as_ref();
        let uploads = &mut self.uploads;
        let references = plan.resolve(self.style_media_id.as_deref(), |entry| {
            uploads
                .ensure_uploaded(service, &entry.path, entry.category)
                .map(|uploaded| uploaded.media_id)
        })?;
        Ok(Resolution {
            references,
            dropped_scenes,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use whisk_contracts::folders::{FolderIndex, FolderLayout, ReferenceCategory};

    use super::Session;
    use crate::service::DryrunService;

    fn write_refs(base: &std::path::Path, files: &[(&str, &str)]) -> anyhow::Result<()> {
        for (dir, name) in files {
            fs::create_dir_all(base.join(dir))?;
            fs::write(base.join(dir).join(name), name.as_bytes())?;
        }
        Ok(())
    }

    #[test]
    fn end_to_end_resolution_with_style() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_refs(
            temp.path(),
            &[
                ("KARAKTER", "Ahmet.jpg"),
                ("MEKAN", "Park.jpg"),
                ("MEKAN", "Plaj.jpg"),
                ("STIL", "Vintage.jpg"),
            ],
        )?;
        let index = FolderIndex::scan(&FolderLayout::under(temp.path()));
        let mut session = Session::new(Arc::new(DryrunService), index);
        let style_id = session.prepare_style()?;
        assert!(style_id.is_some());

        let resolution = session.resolve("Ahmetin parkta koştuğu an.")?;
        let summary = resolution
            .references
            .iter()
            .map(|reference| (reference.caption.as_str(), reference.category))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                ("ahmet", ReferenceCategory::Character),
                ("park", ReferenceCategory::Scene),
                ("vintage", ReferenceCategory::Style),
            ]
        );
        assert!(resolution.dropped_scenes.is_empty());
        assert_eq!(session.uploads().len(), 3);
        Ok(())
    }

    #[test]
    fn rescan_keeps_style_only_if_uploaded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_refs(temp.path(), &[("STIL", "B_style.png")])?;
        let index = FolderIndex::scan(&FolderLayout::under(temp.path()));
        let mut session = Session::new(Arc::new(DryrunService), index);
        session.prepare_style()?;
        session.rescan();
        assert!(session.style_media_id().is_some());

        write_refs(temp.path(), &[("STIL", "A_style.png")])?;
        session.rescan();
        assert!(session.style_media_id().is_none());
        Ok(())
    }

    #[test]
    fn no_style_folder_means_no_style() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let index = FolderIndex::scan(&FolderLayout::under(temp.path()));
        let mut session = Session::new(Arc::new(DryrunService), index);
        assert_eq!(session.prepare_style()?, None);
        assert!(session.resolve("anything")?.references.is_empty());
        Ok(())
    }
}
