//! File transfer over SFTP
//!
//! The handler, the owner/group name cache, listing entries, path helpers
//! and chunked copies with progress.

mod entry;
mod handler;
pub mod path;
mod permissions;
mod progress;

pub use entry::{RemoteFile, format_mod_time, mode_string};
pub use handler::{SftpHandler, probe_home_directory};
pub use path::{file_name, join_path, join_remote_paths, local_file_size, process_path};
pub use permissions::{PermissionCache, parse_batch, parse_database};
pub use progress::{CHUNK_SIZE, TransferProgress, copy_with_progress};
