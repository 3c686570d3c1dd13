//! Directory listing entries

use chrono::{DateTime, SecondsFormat};
use russh_sftp::protocol::FileAttributes;
use serde::Serialize;

use super::permissions::PermissionCache;

const S_IFMT: u32 = 0o170_000;
const S_IFSOCK: u32 = 0o140_000;
const S_IFLNK: u32 = 0o120_000;
const S_IFBLK: u32 = 0o060_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFCHR: u32 = 0o020_000;
const S_IFIFO: u32 = 0o010_000;

/// One entry of a remote directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    /// RFC 3339, UTC; empty when the server sent no time
    pub mod_time: String,
    /// `ls`-style, e.g. `drwxr-xr-x`
    pub permissions: String,
    pub owner: String,
    pub group: String,
}

impl RemoteFile {
    /// Build an entry, resolving ids through `cache`.
    #[must_use]
    pub fn from_attributes(name: String, attrs: &FileAttributes, cache: &PermissionCache) -> Self {
        let mode = attrs.permissions.unwrap_or(0);
        Self {
            name,
            size: attrs.size.unwrap_or(0),
            is_dir: mode & S_IFMT == S_IFDIR,
            mod_time: attrs.mtime.map(format_mod_time).unwrap_or_default(),
            permissions: mode_string(mode),
            owner: attrs
                .uid
                .map_or_else(|| "unknown".to_string(), |uid| cache.username(uid)),
            group: attrs
                .gid
                .map_or_else(|| "unknown".to_string(), |gid| cache.group_name(gid)),
        }
    }
}

/// Seconds since the epoch as RFC 3339.
#[must_use]
pub fn format_mod_time(seconds: u32) -> String {
    DateTime::from_timestamp(i64::from(seconds), 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Render a Unix mode the way `ls -l` does.
#[must_use]
pub fn mode_string(mode: u32) -> String {
    let kind = match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        S_IFCHR => 'c',
        S_IFBLK => 'b',
        S_IFIFO => 'p',
        S_IFSOCK => 's',
        _ => '-',
    };

    let mut out = String::with_capacity(10);
    out.push(kind);
    for (shift, special, set, unset) in [
        (6, 0o4000, 's', 'S'),
        (3, 0o2000, 's', 'S'),
        (0, 0o1000, 't', 'T'),
    ] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(match (bits & 0o1 != 0, mode & special != 0) {
            (true, true) => set,
            (false, true) => unset,
            (true, false) => 'x',
            (false, false) => '-',
        });
    }
    out
}
