//! Remote and local path helpers
//!
//! Remote paths are always `/`-separated regardless of the local platform.

use std::path::Path;

use crate::error::Result;

/// Normalise a probed home directory: leading `/`, no trailing `/`, and
/// `/` when the probe returned nothing.
#[must_use]
pub fn normalize_home(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return "/".to_string();
    }
    let mut home = if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{raw}")
    };
    if home.len() > 1 && home.ends_with('/') {
        home.pop();
    }
    home
}

/// Resolve a user-supplied remote path.
///
/// An empty path is the home directory; anything else is made absolute.
#[must_use]
pub fn process_path(path: &str, home: &str) -> String {
    if path.is_empty() {
        return if home.is_empty() {
            "/".to_string()
        } else {
            home.to_string()
        };
    }
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Join `relative` onto `base`.
///
/// An absolute `relative` wins, an empty one yields `base`, and exactly one
/// `/` separates the two.
#[must_use]
pub fn join_remote_paths(base: &str, relative: &str, home: &str) -> String {
    let mut base = process_path(base, home);
    if relative.is_empty() {
        return base;
    }
    if relative.starts_with('/') {
        return relative.to_string();
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base.push_str(relative);
    base
}

/// Directory part of a remote path, or `None` for the root and bare names.
#[must_use]
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let (parent, _) = trimmed.rsplit_once('/')?;
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}

/// Last component of a local path.
#[must_use]
pub fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map_or_else(|| path.to_string(), |name| name.to_string_lossy().into_owned())
}

/// Join a file name onto a directory, keeping remote-style absolute bases
/// `/`-separated.
#[must_use]
pub fn join_path(base: &str, file: &str) -> String {
    if base.starts_with('/') {
        format!("{}/{file}", base.trim_end_matches('/'))
    } else {
        Path::new(base).join(file).to_string_lossy().into_owned()
    }
}

/// Size in bytes of a local file.
///
/// # Errors
///
/// Returns `Io` if the file cannot be inspected.
pub fn local_file_size(path: impl AsRef<Path>) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}
