use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use whisk_contracts::folders::ReferenceCategory;
use whisk_contracts::references::ResolvedReferenceSet;
use whisk_contracts::settings::ImageModelSettings;

use crate::error::Result;

mod dryrun;
mod whisk;

pub use dryrun::DryrunService;
pub(crate) use whisk::BROWSER_USER_AGENT;
pub use whisk::{ApiEndpoints, WhiskService, DEFAULT_LABS_API_BASE, DEFAULT_SANDBOX_API_BASE};

/// One local reference image on its way to the service.
#[derive(Debug, Clone, Copy)]
pub struct ImageUpload<'a> {
    pub source: &'a Path,
    pub bytes: &'a [u8],
    pub mime: &'static str,
    pub category: ReferenceCategory,
}

impl ImageUpload<'_> {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(self.bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub media_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub seed: u32,
    pub settings: ImageModelSettings,
    /// Empty means a bare-prompt generation; otherwise a recipe call.
    pub references: ResolvedReferenceSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
}

/// The remote image service: caption and upload references, generate images.
/// Every call blocks until the service answers or times out.
pub trait ImageService: Send + Sync {
    fn name(&self) -> &str;
    fn caption(&self, upload: &ImageUpload<'_>) -> Result<String>;
    fn upload(&self, upload: &ImageUpload<'_>) -> Result<UploadedMedia>;
    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage>;
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}
