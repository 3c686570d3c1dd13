//! Output coalescing buffer
//!
//! Transport reads append bytes; the flush tick drains them as one message.
//! A flush never splits a multi-byte UTF-8 sequence: an incomplete tail stays
//! buffered until the rest of it arrives.

use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct OutputBuffer {
    bytes: Mutex<Vec<u8>>,
}

impl OutputBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, data: &[u8]) {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Drain everything that forms complete UTF-8, keeping an incomplete
    /// trailing sequence. Invalid bytes in the middle are replaced.
    #[must_use]
    pub fn take_valid(&self) -> Option<String> {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        if bytes.is_empty() {
            return None;
        }

        let split = complete_prefix_len(&bytes);
        if split == 0 {
            return None;
        }

        let rest = bytes.split_off(split);
        let head = std::mem::replace(&mut *bytes, rest);
        Some(String::from_utf8_lossy(&head).into_owned())
    }

    /// Drain everything, replacing any incomplete sequence.
    #[must_use]
    pub fn take_all(&self) -> Option<String> {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        if bytes.is_empty() {
            return None;
        }
        let all = std::mem::take(&mut *bytes);
        Some(String::from_utf8_lossy(&all).into_owned())
    }
}

/// Length of `bytes` without an incomplete UTF-8 sequence at the very end.
///
/// Invalid sequences earlier in the buffer are stepped over so they cannot
/// hide a truncated tail.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let mut offset = 0;
    loop {
        match std::str::from_utf8(&bytes[offset..]) {
            Ok(_) => return bytes.len(),
            Err(e) => match e.error_len() {
                None => return offset + e.valid_up_to(),
                Some(invalid) => offset += e.valid_up_to() + invalid,
            },
        }
    }
}
