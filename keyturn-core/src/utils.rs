//! Small shared helpers

use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// First `max` characters of `s`, with `...` appended when truncated.
///
/// Used to keep tokens and error bodies short in logs.
pub fn preview(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

/// Replace `path` with `contents`.
///
/// Writes a temp file in the same directory and renames it into place, so readers
/// see either the old file or the complete new one, never a truncated write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
