use regex::Regex;

use crate::names::fold_text;

/// Turkish case and possessive endings a bare name stem can take inside a
/// prompt. Folded with the same table as prompts before use.
pub const INFLECTION_SUFFIXES: &[&str] = &[
    // possessive
    "in", "nin", "un", "nun", "ın", "nın", "ün", "nün",
    // locative
    "da", "de", "ta", "te", "nda", "nde",
    // dative
    "a", "e", "na", "ne", "ya", "ye",
    // accusative
    "i", "ı", "u", "ü", "ni", "nı", "nu", "nü",
    // ablative
    "dan", "den", "tan", "ten", "ndan", "nden",
];

/// Word-boundary matcher for one canonical name.
#[derive(Debug, Clone)]
pub struct ReferenceMatcher {
    name: String,
    pattern: Option<Regex>,
}

impl ReferenceMatcher {
    pub fn new(canonical_name: &str) -> Self {
        let name = canonical_name.trim().to_string();
        let pattern = if name.is_empty() {
            None
        } else {
            Regex::new(&name_pattern(&name)).ok()
        };
        Self { name, pattern }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_match(&self, prompt: &str) -> bool {
        let Some(pattern) = self.pattern.as_ref() else {
            return false;
        };
        pattern.is_match(&fold_text(prompt))
    }
}

pub fn is_match(canonical_name: &str, prompt: &str) -> bool {
    ReferenceMatcher::new(canonical_name).is_match(prompt)
}

fn name_pattern(name: &str) -> String {
    let mut suffixes: Vec<String> = Vec::new();
    for suffix in INFLECTION_SUFFIXES {
        let folded = fold_text(suffix);
        if !suffixes.contains(&folded) {
            suffixes.push(folded);
        }
    }
    let alternatives = suffixes
        .iter()
        .map(|suffix| regex::escape(suffix))
        .collect::<Vec<String>>()
        .join("|");
    format!(r"\b{}(?:{})?\b", regex::escape(name), alternatives)
}
