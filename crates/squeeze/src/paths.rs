use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Marker inserted before the extension of the temporary fast-start copy
pub const STREAMABLE_SUFFIX: &str = "streamable";
/// Suffix appended to the file stem of the default output
pub const COMPRESSED_SUFFIX: &str = " (compressed)";

/// Build `<dir>/<stem><suffix>.<ext>` for a given path
fn with_stem_suffix(file_path: &Path, suffix: &str) -> PathBuf {
    let mut name = file_path.file_stem().map(|s| s.to_os_string()).unwrap_or_default();
    name.push(suffix);
    if let Some(ext) = file_path.extension() {
        name.push(".");
        name.push(ext);
    }
    file_path.with_file_name(name)
}

/// Default output path: `<stem> (compressed).<ext>`, then `<stem> (compressed) (1).<ext>`,
/// `(2)`, ... until a path that does not exist yet is found
pub fn default_output_path(input: &Path) -> PathBuf {
    let candidate = with_stem_suffix(input, COMPRESSED_SUFFIX);
    if !candidate.exists() {
        return candidate;
    }

    (1u32..)
        .map(|n| with_stem_suffix(input, &format!("{} ({})", COMPRESSED_SUFFIX, n)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Create a uniquely named fast-start copy next to the input, e.g.
/// `clip.mp4` -> `clip.a1B2c3.streamable.mp4`. The file is removed when the
/// returned path is dropped.
pub fn streamable_copy(input: &Path) -> io::Result<TempPath> {
    let dir = input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut prefix = input.file_stem().map(|s| s.to_os_string()).unwrap_or_default();
    prefix.push(".");
    let suffix = match input.extension() {
        Some(ext) => format!(".{}.{}", STREAMABLE_SUFFIX, ext.to_string_lossy()),
        None => format!(".{}", STREAMABLE_SUFFIX),
    };

    Ok(tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(&suffix)
        .tempfile_in(dir)?
        .into_temp_path())
}
