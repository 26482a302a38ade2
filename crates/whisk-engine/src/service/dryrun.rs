use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use whisk_contracts::names::canonical_name;

use super::{GenerateRequest, GeneratedImage, ImageService, ImageUpload, UploadedMedia};
use crate::error::{EngineError, Result};

const DRYRUN_PIXELS_PER_UNIT: u32 = 16;

/// Offline stand-in for the remote service. Captions are canonical names,
/// media ids hash the uploaded bytes and every image is a solid-colour JPEG.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryrunService;

impl ImageService for DryrunService {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn caption(&self, upload: &ImageUpload<'_>) -> Result<String> {
        let filename = upload
            .source
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or_default();
        Ok(canonical_name(filename))
    }

    fn upload(&self, upload: &ImageUpload<'_>) -> Result<UploadedMedia> {
        let mut hasher = Sha256::new();
        hasher.update(upload.category.media_category().as_bytes());
        hasher.update(upload.bytes);
        let digest = hasher.finalize();
        Ok(UploadedMedia {
            media_id: format!("dryrun-{}", hex::encode(&digest[..6])),
        })
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage> {
        let (w, h) = request.settings.image_aspect_ratio.ratio();
        let (width, height) = (w * DRYRUN_PIXELS_PER_UNIT, h * DRYRUN_PIXELS_PER_UNIT);
        let (r, g, b) = color_from_prompt(&request.prompt, request.seed);
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }

        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .map_err(|err| EngineError::Io(std::io::Error::other(err)))?;
        Ok(GeneratedImage { bytes })
    }
}

fn color_from_prompt(prompt: &str, seed: u32) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}
