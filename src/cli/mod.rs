//! CLI module for direct command-line usage
//!
//! Interactive sessions speak the duplex protocol as JSON lines on
//! stdin/stdout; file and trust commands print human-readable results.

mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use runner::{
    frame_to_json, run_download, run_encrypt, run_info, run_ls, run_mkdir, run_ports,
    run_serial_session, run_session, run_stat, run_trust, run_upload,
};

/// termbridge - SSH and serial terminals over a JSON message channel
#[derive(Parser)]
#[command(name = "termbridge")]
#[command(about = "Remote terminal sessions over SSH and serial, with host trust and SFTP")]
#[command(version)]
#[command(after_help = "EXAMPLES:
    # Interactive shell, JSON lines on stdin/stdout
    termbridge session web

    # Serial console
    termbridge serial console

    # List a remote directory (home when no path is given)
    termbridge ls web /var/log

    # Upload with progress on stderr
    termbridge upload web ./app.tar.gz /opt/releases/app.tar.gz --progress

    # Seal a password for the config file
    echo -n 'hunter2' | termbridge encrypt")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Interactive SSH shell over JSON lines on stdin/stdout
    Session {
        /// SSH host alias from configuration
        host: String,
    },

    /// Interactive serial console over JSON lines on stdin/stdout
    Serial {
        /// Serial port alias from configuration
        name: String,
    },

    /// List serial ports present on this machine
    Ports,

    /// List a remote directory via SFTP
    Ls {
        /// SSH host alias
        host: String,

        /// Remote directory, home when omitted
        #[arg(default_value = "")]
        path: String,
    },

    /// Upload a file to remote host via SFTP
    Upload {
        /// SSH host alias
        host: String,

        /// Local file path
        local_path: PathBuf,

        /// Remote destination path
        remote_path: String,

        /// Show transfer progress on stderr
        #[arg(long, short)]
        progress: bool,
    },

    /// Download a file from remote host via SFTP
    Download {
        /// SSH host alias
        host: String,

        /// Remote file path
        remote_path: String,

        /// Local destination path
        local_path: PathBuf,

        /// Show transfer progress on stderr
        #[arg(long, short)]
        progress: bool,
    },

    /// Create a remote directory and its parents
    Mkdir {
        /// SSH host alias
        host: String,

        /// Remote directory
        path: String,
    },

    /// Print the size of a remote file
    Stat {
        /// SSH host alias
        host: String,

        /// Remote file path
        path: String,
    },

    /// Print kernel, CPU, memory and OS details of a host
    Info {
        /// SSH host alias
        host: String,
    },

    /// Add a host key to the trust file after re-checking its fingerprint
    Trust {
        /// SSH host alias
        host: String,

        /// Expected fingerprint, e.g. SHA256:...
        fingerprint: String,
    },

    /// Encrypt a secret read from stdin for use in the config file
    Encrypt,
}

impl Commands {
    /// Whether the command reads the configuration file.
    #[must_use]
    pub const fn needs_config(&self) -> bool {
        !matches!(self, Self::Ports | Self::Encrypt)
    }

    /// Whether stdout carries the JSON-lines protocol.
    #[must_use]
    pub const fn is_interactive(&self) -> bool {
        matches!(self, Self::Session { .. } | Self::Serial { .. })
    }
}
