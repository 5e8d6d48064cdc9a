//! Names and scratch paths derived from an object key.
//!
//! Object keys are always `/`-separated regardless of the host platform, so
//! the key-side computations work on strings rather than `Path`.

use std::path::{Path, PathBuf};

/// Extension of the synthesized "converted" image name.
pub const JPEG_EXTENSION: &str = ".jpg";

const CONVERTED_SUFFIX: &str = "_converted";

/// Everything an invocation derives from the triggering key up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedNaming {
    /// File name without directory or extension (`dog` for `photos/dog.png`).
    pub base_name: String,

    /// Directory part of the key, `.` for top-level keys.
    pub directory: String,

    /// Synthesized `<dir>/<base>_converted.jpg`. Used as the record id and
    /// its `imagePath`; nothing is ever written to this object name.
    pub converted_name: String,

    /// Where the original object is downloaded to.
    pub scratch_path: PathBuf,

    /// Scratch location reserved for the converted image.
    pub scratch_converted_path: PathBuf,
}

impl DerivedNaming {
    pub fn derive(key: &str, scratch_root: &Path) -> Self {
        let file_name = basename(key);
        let base_name = strip_extension(file_name).to_string();
        let directory = dirname(key);
        let converted_name = normalize(&format!(
            "{}/{}{}{}",
            directory, base_name, CONVERTED_SUFFIX, JPEG_EXTENSION
        ));

        Self {
            scratch_path: scratch_root.join(relative(key)),
            scratch_converted_path: scratch_root.join(relative(&converted_name)),
            base_name,
            directory,
            converted_name,
        }
    }
}

fn relative(key: &str) -> &str {
    key.trim_start_matches('/')
}

fn basename(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Drop the last extension. A dot in first position (`.bashrc`) does not
/// start one, and neither does the second dot of `..`; `..foo` becomes `.`.
fn strip_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(_) if file_name == ".." => file_name,
        Some(idx) => &file_name[..idx],
    }
}

fn dirname(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].trim_end_matches('/').to_string(),
        None => ".".to_string(),
    }
}

/// Collapse duplicate separators and resolve `.`/`..` segments.
fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
