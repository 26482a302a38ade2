use serde::{Deserialize, Serialize};

use crate::folders::{ReferenceCategory, ReferenceEntry};
use crate::matching::ReferenceMatcher;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReference {
    pub caption: String,
    pub category: ReferenceCategory,
    pub media_id: String,
}

pub type ResolvedReferenceSet = Vec<ResolvedReference>;

/// Which local files one prompt should carry, before any upload happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePlan<'a> {
    pub characters: Vec<&'a ReferenceEntry>,
    pub scene: Option<&'a ReferenceEntry>,
    pub dropped_scenes: Vec<&'a ReferenceEntry>,
    pub style: Option<&'a ReferenceEntry>,
}

pub fn plan_references<'a>(
    prompt: &str,
    characters: &'a [ReferenceEntry],
    scenes: &'a [ReferenceEntry],
    style: Option<&'a ReferenceEntry>,
) -> ReferencePlan<'a> {
    let matched_characters = matching_entries(prompt, characters);
    let mut matched_scenes = matching_entries(prompt, scenes).into_iter();
    let scene = matched_scenes.next();
    let dropped_scenes = matched_scenes.collect::<Vec<&ReferenceEntry>>();
    if let Some(kept) = scene {
        if !dropped_scenes.is_empty() {
            tracing::info!(
                kept = %kept.filename,
                dropped = dropped_scenes.len(),
                "multiple scenes matched, using the first"
            );
        }
    }
    ReferencePlan {
        characters: matched_characters,
        scene,
        dropped_scenes,
        style,
    }
}

fn matching_entries<'a>(prompt: &str, entries: &'a [ReferenceEntry]) -> Vec<&'a ReferenceEntry> {
    entries
        .iter()
        .filter(|entry| {
            let hit = ReferenceMatcher::new(&entry.canonical_name).is_match(prompt);
            if hit {
                tracing::debug!(name = %entry.canonical_name, file = %entry.filename, "reference matched");
            }
            hit
        })
        .collect()
}

impl<'a> ReferencePlan<'a> {
    /// Character and scene files that need a remote media id.
    pub fn uploads(&self) -> impl Iterator<Item = &'a ReferenceEntry> + '_ {
        self.characters.iter().copied().chain(self.scene)
    }

    /// Turns the plan into the attached reference set. `ensure` supplies a
    /// media id for each character and scene entry; the style is attached
    /// only when its media id is already known.
    pub fn resolve<E, F>(
        &self,
        style_media_id: Option<&str>,
        mut ensure: F,
    ) -> Result<ResolvedReferenceSet, E>
    where
        F: FnMut(&ReferenceEntry) -> Result<String, E>,
    {
        let mut resolved = ResolvedReferenceSet::new();
        for entry in self.uploads() {
            let media_id = ensure(entry)?;
            resolved.push(ResolvedReference {
                caption: entry.canonical_name.clone(),
                category: entry.category,
                media_id,
            });
        }
        let style_media_id = style_media_id
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let (Some(style), Some(media_id)) = (self.style, style_media_id) {
            resolved.push(ResolvedReference {
                caption: style.canonical_name.clone(),
                category: ReferenceCategory::Style,
                media_id: media_id.to_string(),
            });
        }
        Ok(resolved)
    }
}

pub fn resolve_references<E, F>(
    prompt: &str,
    characters: &[ReferenceEntry],
    scenes: &[ReferenceEntry],
    style: Option<&ReferenceEntry>,
    style_media_id: Option<&str>,
    ensure: F,
) -> Result<ResolvedReferenceSet, E>
where
    F: FnMut(&ReferenceEntry) -> Result<String, E>,
{
    plan_references(prompt, characters, scenes, style).resolve(style_media_id, ensure)
}
