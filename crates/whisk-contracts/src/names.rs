use std::path::Path;

/// Turkish letters folded to their base Latin form. Applied before
/// lowercasing so `İ` never turns into `i` + combining dot.
const FOLD_TABLE: &[(char, char)] = &[
    ('ı', 'i'),
    ('İ', 'i'),
    ('I', 'i'),
    ('ş', 's'),
    ('Ş', 's'),
    ('ğ', 'g'),
    ('Ğ', 'g'),
    ('ü', 'u'),
    ('Ü', 'u'),
    ('ö', 'o'),
    ('Ö', 'o'),
    ('ç', 'c'),
    ('Ç', 'c'),
];

pub fn fold_text(text: &str) -> String {
    let folded = text
        .chars()
        .map(|ch| {
            FOLD_TABLE
                .iter()
                .find(|(from, _)| *from == ch)
                .map(|(_, to)| *to)
                .unwrap_or(ch)
        })
        .collect::<String>();
    folded.to_lowercase()
}

/// `Kırmızı_Şapkalı_Kedi.jpg` → `kirmizi sapkali kedi`.
pub fn canonical_name(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or(filename);
    fold_text(&stem.replace('_', " ")).trim().to_string()
}
