use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

const PROMPT_PREFIX_CHARS: usize = 40;

/// Filename-safe prefix of a prompt: word characters, whitespace and `-`
/// survive, spaces become `_`, at most 40 characters.
pub fn sanitize_prompt(prompt: &str) -> String {
    let kept = prompt
        .chars()
        .filter(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '-' || ch.is_whitespace())
        .collect::<String>();
    kept.trim()
        .replace(' ', "_")
        .chars()
        .take(PROMPT_PREFIX_CHARS)
        .collect()
}

/// `{row+1}_{prompt prefix}_{YYYYmmdd_HHMMSS}_{index+1}.jpg`
pub fn output_filename(row: usize, prompt: &str, at: &DateTime<Local>, image_index: usize) -> String {
    format!(
        "{}_{}_{}_{}.jpg",
        row + 1,
        sanitize_prompt(prompt),
        at.format("%Y%m%d_%H%M%S"),
        image_index + 1
    )
}

/// Writes a generated image without ever replacing an existing file. On a
/// name clash `-2`, `-3`, ... is appended to the stem.
pub fn persist_image(
    output_dir: &Path,
    row: usize,
    prompt: &str,
    image_index: usize,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let filename = output_filename(row, prompt, &Local::now(), image_index);
    let stem = filename.trim_end_matches(".jpg").to_string();

    let mut attempt = 1usize;
    loop {
        let candidate = if attempt == 1 {
            output_dir.join(&filename)
        } else {
            output_dir.join(format!("{stem}-{attempt}.jpg"))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => {
                write_or_discard(&candidate, file, bytes)?;
                return Ok(candidate);
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => return Err(err),
        }
    }
}

/// Writes `bytes` into the freshly created `path`; a failed write removes the
/// partial file.
fn write_or_discard<W: Write>(path: &Path, mut writer: W, bytes: &[u8]) -> std::io::Result<()> {
    let written = writer.write_all(bytes).and_then(|()| writer.flush());
    if let Err(err) = written {
        drop(writer);
        if let Err(remove_err) = std::fs::remove_file(path) {
            tracing::warn!(file = %path.display(), error = %remove_err, "failed to remove partial image");
        }
        return Err(err);
    }
    Ok(())
}
