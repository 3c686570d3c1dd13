//! SFTP Handler
//!
//! One SFTP sub-session on an SSH transport, plus the permission cache and
//! home directory resolved when it connects. Hosts reaching this handler
//! have normally been approved by an interactive session already, so the
//! connector always trusts unknown host keys.

use std::path::Path;

use russh_sftp::client::SftpSession;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use super::entry::RemoteFile;
use super::path::{join_remote_paths, normalize_home, process_path, remote_parent};
use super::permissions::PermissionCache;
use super::progress::copy_with_progress;
use crate::error::{BridgeError, Result};
use crate::ports::{CommandRunner, Connection};
use crate::ssh::{SshClient, SshConnector};

struct ActiveSession {
    client: SshClient,
    sftp: SftpSession,
    home: String,
}

/// File operations against one remote host
pub struct SftpHandler {
    connector: SshConnector,
    permissions: PermissionCache,
    active: Option<ActiveSession>,
}

impl std::fmt::Debug for SftpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpHandler")
            .field("host", &self.connector.params().address())
            .field("connected", &self.active.is_some())
            .finish_non_exhaustive()
    }
}

impl SftpHandler {
    #[must_use]
    pub fn new(connector: SshConnector) -> Self {
        Self {
            connector: connector.trusting_unknown_host(),
            permissions: PermissionCache::new(),
            active: None,
        }
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    /// Home directory resolved at connect time.
    #[must_use]
    pub fn remote_home(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.home.as_str())
    }

    #[must_use]
    pub const fn permissions(&self) -> &PermissionCache {
        &self.permissions
    }

    /// Connect, start SFTP, load owner names and resolve the home directory.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyConnected` on a second call, the connector's error if
    /// the transport cannot be established, or `Sftp` if the subsystem
    /// cannot be started.
    pub async fn connect(&mut self) -> Result<()> {
        let address = self.connector.params().address();
        if self.active.is_some() {
            return Err(BridgeError::AlreadyConnected { host: address });
        }

        let client = match self.connector.connect().await? {
            Connection::Established(client) => client,
            Connection::FingerprintRequired(fingerprint) => {
                return Err(BridgeError::KnownHosts {
                    reason: format!("{} requires fingerprint confirmation", fingerprint.host),
                });
            }
        };

        self.permissions.preload(&client).await;

        let sftp = match client.sftp_session().await {
            Ok(sftp) => sftp,
            Err(e) => {
                error!(host = %address, error = %e, "Failed to start SFTP");
                self.connector.close(&client).await;
                return Err(e);
            }
        };

        let home = probe_home_directory(&client).await;
        info!(host = %address, home = %home, "SFTP connected");
        self.active = Some(ActiveSession { client, sftp, home });
        Ok(())
    }

    fn session(&self) -> Result<&ActiveSession> {
        self.active.as_ref().ok_or(BridgeError::NotConnected)
    }

    /// Resolve `path` against the home directory.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` before `connect`.
    pub fn process_path(&self, path: &str) -> Result<String> {
        Ok(process_path(path, &self.session()?.home))
    }

    /// Join `relative` onto `base`, resolving an empty base to home.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` before `connect`.
    pub fn join_remote_paths(&self, base: &str, relative: &str) -> Result<String> {
        Ok(join_remote_paths(base, relative, &self.session()?.home))
    }

    /// List a remote directory; an empty path lists the home directory.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` before `connect` or `Sftp` if the directory
    /// cannot be read.
    pub async fn list_remote_files(&self, path: &str) -> Result<Vec<RemoteFile>> {
        let active = self.session()?;
        let path = process_path(path, &active.home);
        let entries = active.sftp.read_dir(path.as_str()).await.map_err(sftp_error)?;

        let files: Vec<RemoteFile> = entries
            .map(|entry| {
                RemoteFile::from_attributes(entry.file_name(), &entry.metadata(), &self.permissions)
            })
            .collect();
        debug!(path = %path, entries = files.len(), "Listed remote directory");
        Ok(files)
    }

    /// Upload one local file, creating missing remote parent directories.
    ///
    /// `on_progress(sent, total)` is called after every chunk.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected`, `IsDirectory` for a directory source, `Io`
    /// if the local file cannot be read, or `Sftp`/`FileTransfer` on remote
    /// failures.
    pub async fn upload_file<F>(&self, local: &Path, remote: &str, on_progress: F) -> Result<u64>
    where
        F: FnMut(u64, u64),
    {
        let active = self.session()?;
        let metadata = tokio::fs::metadata(local).await?;
        if metadata.is_dir() {
            return Err(BridgeError::IsDirectory {
                path: local.display().to_string(),
            });
        }

        if let Some(parent) = remote_parent(remote) {
            mkdir_recursive(&active.sftp, parent).await?;
        }

        let mut source = File::open(local).await?;
        let mut target = active.sftp.create(remote).await.map_err(sftp_error)?;
        let sent = copy_with_progress(&mut source, &mut target, metadata.len(), on_progress).await?;
        target
            .shutdown()
            .await
            .map_err(|e| BridgeError::FileTransfer {
                reason: format!("Close error: {e}"),
            })?;

        info!(local = %local.display(), remote = %remote, bytes = sent, "Upload finished");
        Ok(sent)
    }

    /// Download one remote file, creating missing local parent directories.
    ///
    /// `on_progress(received, total)` is called after every chunk.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected`, `IsDirectory` for a directory source, `Io`
    /// if the local file cannot be written, or `Sftp`/`FileTransfer` on
    /// remote failures.
    pub async fn download_file<F>(&self, remote: &str, local: &Path, on_progress: F) -> Result<u64>
    where
        F: FnMut(u64, u64),
    {
        let active = self.session()?;
        let metadata = active.sftp.metadata(remote).await.map_err(sftp_error)?;
        if metadata.is_dir() {
            return Err(BridgeError::IsDirectory {
                path: remote.to_string(),
            });
        }

        let mut source = active.sftp.open(remote).await.map_err(sftp_error)?;

        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut target = File::create(local).await?;
        let received =
            copy_with_progress(&mut source, &mut target, metadata.size.unwrap_or(0), on_progress)
                .await?;

        info!(remote = %remote, local = %local.display(), bytes = received, "Download finished");
        Ok(received)
    }

    /// Create a remote directory and its missing parents.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` or `FileTransfer` if a component cannot be
    /// created.
    pub async fn create_remote_folder(&self, path: &str) -> Result<()> {
        mkdir_recursive(&self.session()?.sftp, path).await
    }

    /// Size in bytes of a remote file.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` or `Sftp` if the file cannot be inspected.
    pub async fn get_remote_file_size(&self, path: &str) -> Result<u64> {
        let metadata = self
            .session()?
            .sftp
            .metadata(path)
            .await
            .map_err(sftp_error)?;
        Ok(metadata.size.unwrap_or(0))
    }

    /// Close SFTP, then the transport. Safe to call more than once.
    pub async fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.permissions.clear();
        if let Err(e) = active.sftp.close().await {
            debug!(error = %e, "SFTP session close failed");
        }
        self.connector.close(&active.client).await;
        info!(host = %active.client.address(), "SFTP disconnected");
    }
}

/// `pwd`, then `$HOME`, then `/`.
pub async fn probe_home_directory(runner: &dyn CommandRunner) -> String {
    let pwd = runner.run("pwd").await;
    if !pwd.success() {
        warn!(error = pwd.error.as_deref().unwrap_or(""), "pwd failed");
    }
    let mut home = pwd.unwrap_stdout();

    if home.is_empty() {
        let env = runner.run("echo $HOME").await;
        if !env.success() {
            warn!(error = env.error.as_deref().unwrap_or(""), "Reading $HOME failed");
        }
        home = env.unwrap_stdout();
    }

    normalize_home(&home)
}

/// Create every missing component of `path`.
async fn mkdir_recursive(sftp: &SftpSession, path: &str) -> Result<()> {
    let mut current = String::new();
    if path.starts_with('/') {
        current.push('/');
    }

    for component in path.split('/').filter(|c| !c.is_empty()) {
        if !current.is_empty() && !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(component);

        if sftp.create_dir(current.as_str()).await.is_err()
            && !sftp.try_exists(current.as_str()).await.map_err(sftp_error)?
        {
            return Err(BridgeError::FileTransfer {
                reason: format!("Cannot create remote directory: {current}"),
            });
        }
    }

    Ok(())
}

#[expect(clippy::needless_pass_by_value)]
fn sftp_error(e: russh_sftp::client::error::Error) -> BridgeError {
    BridgeError::Sftp {
        reason: e.to_string(),
    }
}
