use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const MIN_IMAGE_COUNT: usize = 1;
pub const MAX_IMAGE_COUNT: usize = 20;
pub const DEFAULT_IMAGE_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectRatio {
    Landscape,
    Portrait,
    Square,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 3] = [Self::Landscape, Self::Portrait, Self::Square];

    pub fn api_name(self) -> &'static str {
        match self {
            Self::Landscape => "IMAGE_ASPECT_RATIO_LANDSCAPE",
            Self::Portrait => "IMAGE_ASPECT_RATIO_PORTRAIT",
            Self::Square => "IMAGE_ASPECT_RATIO_SQUARE",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Landscape => "Landscape 16:9",
            Self::Portrait => "Portrait 9:16",
            Self::Square => "Square 1:1",
        }
    }

    /// Width over height as a reduced pair.
    pub fn ratio(self) -> (u32, u32) {
        match self {
            Self::Landscape => (16, 9),
            Self::Portrait => (9, 16),
            Self::Square => (1, 1),
        }
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::Landscape
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Landscape => "landscape",
            Self::Portrait => "portrait",
            Self::Square => "square",
        };
        f.write_str(name)
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "landscape" | "wide" | "16:9" => Ok(Self::Landscape),
            "portrait" | "tall" | "9:16" => Ok(Self::Portrait),
            "square" | "1:1" => Ok(Self::Square),
            other => Err(format!(
                "Unknown aspect ratio '{other}' (expected landscape, portrait or square)."
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageModel {
    #[serde(rename = "R2I")]
    R2i,
    #[serde(rename = "GEM_PIX")]
    GemPix,
}

impl ImageModel {
    pub fn api_name(self) -> &'static str {
        match self {
            Self::R2i => "R2I",
            Self::GemPix => "GEM_PIX",
        }
    }

    /// A single reference goes to `GEM_PIX`; several references, or none,
    /// stay on `R2I`.
    pub fn for_reference_count(count: usize) -> Self {
        if count == 1 {
            Self::GemPix
        } else {
            Self::R2i
        }
    }
}

impl Default for ImageModel {
    fn default() -> Self {
        Self::R2i
    }
}

/// `imageModelSettings` as the generation endpoints expect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImageModelSettings {
    #[serde(with = "aspect_ratio_api")]
    pub image_aspect_ratio: AspectRatio,
    pub image_model: ImageModel,
}

impl ImageModelSettings {
    pub fn new(aspect_ratio: AspectRatio) -> Self {
        Self {
            image_aspect_ratio: aspect_ratio,
            image_model: ImageModel::default(),
        }
    }

    /// Settings for one request carrying `reference_count` references.
    pub fn for_references(self, reference_count: usize) -> Self {
        if reference_count == 0 {
            return self;
        }
        Self {
            image_model: ImageModel::for_reference_count(reference_count),
            ..self
        }
    }
}

mod aspect_ratio_api {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::AspectRatio;

    pub fn serialize<S: Serializer>(value: &AspectRatio, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.api_name())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AspectRatio, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AspectRatio::ALL
            .into_iter()
            .find(|ratio| ratio.api_name() == raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown aspect ratio {raw}")))
    }
}
