//! Chunked copy with progress reporting

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{BridgeError, Result};

/// Bytes moved per read
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Progress information during transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes transferred so far
    pub bytes_transferred: u64,
    /// Total bytes to transfer
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Progress percentage (0.0 - 100.0); an empty transfer is complete.
    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            100.0
        } else {
            (self.bytes_transferred as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

/// Copy `reader` into `writer`, calling `on_progress(copied, total)` after
/// every chunk. Returns the number of bytes copied.
///
/// # Errors
///
/// Returns `FileTransfer` on any read, write or flush failure.
pub async fn copy_with_progress<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    total: u64,
    mut on_progress: F,
) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(u64, u64),
{
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;

    loop {
        let n = reader
            .read(&mut buffer)
            .await
            .map_err(|e| BridgeError::FileTransfer {
                reason: format!("Read error: {e}"),
            })?;
        if n == 0 {
            break;
        }

        writer
            .write_all(&buffer[..n])
            .await
            .map_err(|e| BridgeError::FileTransfer {
                reason: format!("Write error: {e}"),
            })?;

        copied += n as u64;
        on_progress(copied, total);
    }

    writer.flush().await.map_err(|e| BridgeError::FileTransfer {
        reason: format!("Flush error: {e}"),
    })?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reports_after_every_chunk() {
        let data = vec![7u8; CHUNK_SIZE * 2 + 10];
        let mut reader = &data[..];
        let mut out = Vec::new();
        let mut reports = Vec::new();

        let copied = copy_with_progress(&mut reader, &mut out, data.len() as u64, |done, total| {
            reports.push((done, total));
        })
        .await
        .unwrap();

        assert_eq!(copied, data.len() as u64);
        assert_eq!(out, data);
        let total = data.len() as u64;
        assert_eq!(
            reports,
            vec![
                (CHUNK_SIZE as u64, total),
                (CHUNK_SIZE as u64 * 2, total),
                (total, total),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_source_reports_nothing() {
        let mut reader: &[u8] = &[];
        let mut out = Vec::new();
        let mut calls = 0;
        let copied = copy_with_progress(&mut reader, &mut out, 0, |_, _| calls += 1)
            .await
            .unwrap();
        assert_eq!(copied, 0);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_percentage() {
        let half = TransferProgress {
            bytes_transferred: 50,
            total_bytes: 200,
        };
        assert!((half.percentage() - 25.0).abs() < f64::EPSILON);
        assert!((TransferProgress { bytes_transferred: 0, total_bytes: 0 }.percentage() - 100.0).abs() < f64::EPSILON);
    }
}
