use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::names::canonical_name;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

pub const DEFAULT_CHARACTERS_DIR: &str = "KARAKTER";
pub const DEFAULT_SCENES_DIR: &str = "MEKAN";
pub const DEFAULT_STYLE_DIR: &str = "STIL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceCategory {
    Character,
    Scene,
    Style,
}

impl ReferenceCategory {
    pub fn media_category(self) -> &'static str {
        match self {
            Self::Character => "MEDIA_CATEGORY_SUBJECT",
            Self::Scene => "MEDIA_CATEGORY_SCENE",
            Self::Style => "MEDIA_CATEGORY_STYLE",
        }
    }
}

impl fmt::Display for ReferenceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Character => "character",
            Self::Scene => "scene",
            Self::Style => "style",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub filename: String,
    pub path: PathBuf,
    pub canonical_name: String,
    pub category: ReferenceCategory,
}

/// The three reference directories of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderLayout {
    pub characters: PathBuf,
    pub scenes: PathBuf,
    pub style: PathBuf,
}

impl FolderLayout {
    pub fn under(base_dir: &Path) -> Self {
        Self {
            characters: base_dir.join(DEFAULT_CHARACTERS_DIR),
            scenes: base_dir.join(DEFAULT_SCENES_DIR),
            style: base_dir.join(DEFAULT_STYLE_DIR),
        }
    }

    pub fn dir_for(&self, category: ReferenceCategory) -> &Path {
        match category {
            ReferenceCategory::Character => &self.characters,
            ReferenceCategory::Scene => &self.scenes,
            ReferenceCategory::Style => &self.style,
        }
    }

    pub fn create_missing(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut created = Vec::new();
        for dir in [&self.characters, &self.scenes, &self.style] {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
                created.push(dir.clone());
            }
        }
        Ok(created)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderStatus {
    pub category: ReferenceCategory,
    pub dir: PathBuf,
    pub exists: bool,
    pub files: usize,
}

/// Scans one reference directory. A missing directory is an empty result.
/// Entries are sorted by filename so runs are reproducible across platforms.
pub fn scan_folder(dir: &Path, category: ReferenceCategory) -> Vec<ReferenceEntry> {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut entries = read_dir
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|filename| has_image_extension(filename))
        .map(|filename| ReferenceEntry {
            path: dir.join(&filename),
            canonical_name: canonical_name(&filename),
            filename,
            category,
        })
        .collect::<Vec<ReferenceEntry>>();
    entries.sort_by(|left, right| left.filename.cmp(&right.filename));
    entries
}

fn has_image_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|value| value.to_str())
        .map(|ext| {
            let lowered = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&lowered.as_str())
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct FolderIndex {
    layout: FolderLayout,
    characters: Vec<ReferenceEntry>,
    scenes: Vec<ReferenceEntry>,
    styles: Vec<ReferenceEntry>,
}

impl FolderIndex {
    pub fn scan(layout: &FolderLayout) -> Self {
        Self {
            layout: layout.clone(),
            characters: scan_folder(&layout.characters, ReferenceCategory::Character),
            scenes: scan_folder(&layout.scenes, ReferenceCategory::Scene),
            styles: scan_folder(&layout.style, ReferenceCategory::Style),
        }
    }

    pub fn rescan(&mut self) {
        *self = Self::scan(&self.layout);
    }

    pub fn characters(&self) -> &[ReferenceEntry] {
        &self.characters
    }

    pub fn scenes(&self) -> &[ReferenceEntry] {
        &self.scenes
    }

    /// One style per run: the first scanned style file.
    pub fn style(&self) -> Option<&ReferenceEntry> {
        self.styles.first()
    }

    pub fn status(&self) -> Vec<FolderStatus> {
        [
            (ReferenceCategory::Character, self.characters.len()),
            (ReferenceCategory::Scene, self.scenes.len()),
            (ReferenceCategory::Style, self.styles.len()),
        ]
        .into_iter()
        .map(|(category, files)| {
            let dir = self.layout.dir_for(category).to_path_buf();
            FolderStatus {
                category,
                exists: dir.is_dir(),
                dir,
                files,
            }
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{scan_folder, FolderIndex, FolderLayout, ReferenceCategory};

    #[test]
    fn missing_directory_scans_empty() {
        let entries = scan_folder(
            std::path::Path::new("/definitely/not/here"),
            ReferenceCategory::Scene,
        );
        assert!(entries.is_empty());
    }

    #[test]
    fn scan_keeps_images_sorted_with_canonical_names() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path().join("KARAKTER");
        fs::create_dir_all(dir.join("nested.png"))?;
        for name in ["Zeynep.webp", "Ahmet.JPG", "notes.txt", "Kırmızı_Kedi.png", "raw"] {
            fs::write(dir.join(name), b"x")?;
        }

        let entries = scan_folder(&dir, ReferenceCategory::Character);
        let names: Vec<&str> = entries
            .iter()
            .map(|entry| entry.filename.as_str())
            .collect();
        assert_eq!(names, vec!["Ahmet.JPG", "Kırmızı_Kedi.png", "Zeynep.webp"]);
        assert_eq!(entries[1].canonical_name, "kirmizi kedi");
        assert_eq!(entries[0].path, dir.join("Ahmet.JPG"));
        assert!(entries
            .iter()
            .all(|entry| entry.category == ReferenceCategory::Character));
        Ok(())
    }

    #[test]
    fn first_style_file_is_the_style_reference() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let layout = FolderLayout::under(temp.path());
        fs::create_dir_all(&layout.style)?;
        fs::write(layout.style.join("b_noir.png"), b"x")?;
        fs::write(layout.style.join("a_vintage.jpg"), b"x")?;

        let index = FolderIndex::scan(&layout);
        let style = index.style().map(|entry| entry.filename.as_str());
        assert_eq!(style, Some("a_vintage.jpg"));
        assert!(index.characters().is_empty());
        Ok(())
    }

    #[test]
    fn status_reports_missing_and_present_dirs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let layout = FolderLayout::under(temp.path());
        fs::create_dir_all(&layout.scenes)?;
        fs::write(layout.scenes.join("Park.jpg"), b"x")?;

        let status = FolderIndex::scan(&layout).status();
        assert_eq!(status.len(), 3);
        assert!(!status[0].exists);
        assert!(status[1].exists);
        assert_eq!(status[1].files, 1);
        assert_eq!(status[2].category, ReferenceCategory::Style);
        Ok(())
    }

    #[test]
    fn rescan_picks_up_new_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let layout = FolderLayout::under(temp.path());
        let created = layout.create_missing()?;
        assert_eq!(created.len(), 3);

        let mut index = FolderIndex::scan(&layout);
        assert!(index.scenes().is_empty());
        fs::write(layout.scenes.join("Plaj.png"), b"x")?;
        index.rescan();
        assert_eq!(index.scenes().len(), 1);
        assert!(layout.create_missing()?.is_empty());
        Ok(())
    }
}
