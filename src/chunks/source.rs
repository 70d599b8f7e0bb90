//! Streaming text sources.
//!
//! Lengths and offsets are counted in characters (Unicode scalar values).
//! File sources never hold more than one read block plus one partial
//! character in memory while counting.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result, UnreadableReason};

/// Read block size for file sources.
const BLOCK_SIZE: usize = 64 * 1024;

/// Content that can be measured and sliced by character offset.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Total length in characters.
    async fn length(&self) -> Result<u64>;

    /// Characters in `[start, end)`. `end` is clamped to the length.
    async fn read_chars(&self, start: u64, end: u64) -> Result<String>;
}

/// Incremental UTF-8 decoder that tolerates characters split across blocks.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    carry: Vec<u8>,
}

impl Utf8Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next block, passing each complete run of text to `sink`.
    ///
    /// Returns `false` on an invalid byte sequence.
    pub fn feed(&mut self, block: &[u8], mut sink: impl FnMut(&str)) -> bool {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(block);

        match std::str::from_utf8(&bytes) {
            Ok(text) => {
                sink(text);
                true
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if e.error_len().is_some() {
                    return false;
                }
                // Incomplete trailing character: keep it for the next block.
                if let Ok(text) = std::str::from_utf8(&bytes[..valid]) {
                    sink(text);
                }
                self.carry = bytes[valid..].to_vec();
                true
            }
        }
    }

    /// Whether the stream ended on a character boundary.
    pub fn finish(&self) -> bool {
        self.carry.is_empty()
    }
}

/// A file read from disk on every call.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    uri: String,
}

impl FileSource {
    /// `uri` labels errors.
    pub fn new(path: impl Into<PathBuf>, uri: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            uri: uri.into(),
        }
    }

    fn unreadable(&self, reason: UnreadableReason) -> Error {
        Error::unreadable(self.uri.clone(), reason)
    }

    fn io(&self, e: std::io::Error) -> Error {
        self.unreadable(UnreadableReason::Io {
            detail: e.to_string(),
        })
    }

    /// Stream the file through the decoder. `visit` returns `false` to stop early.
    async fn scan(&self, mut visit: impl FnMut(&str) -> bool + Send) -> Result<()> {
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| self.io(e))?;
        let mut decoder = Utf8Stream::new();
        let mut buf = vec![0u8; BLOCK_SIZE];
        let mut keep_going = true;

        loop {
            let n = file.read(&mut buf).await.map_err(|e| self.io(e))?;
            if n == 0 {
                break;
            }
            let decoded = decoder.feed(&buf[..n], |text| {
                if keep_going {
                    keep_going = visit(text);
                }
            });
            if !decoded {
                return Err(self.unreadable(UnreadableReason::Undecodable));
            }
            if !keep_going {
                return Ok(());
            }
        }

        if decoder.finish() {
            Ok(())
        } else {
            Err(self.unreadable(UnreadableReason::Undecodable))
        }
    }
}

#[async_trait]
impl ChunkSource for FileSource {
    async fn length(&self) -> Result<u64> {
        let mut count = 0u64;
        self.scan(|text| {
            count += text.chars().count() as u64;
            true
        })
        .await?;
        Ok(count)
    }

    async fn read_chars(&self, start: u64, end: u64) -> Result<String> {
        let mut out = String::new();
        let mut pos = 0u64;
        self.scan(|text| {
            for c in text.chars() {
                if pos >= end {
                    return false;
                }
                if pos >= start {
                    out.push(c);
                }
                pos += 1;
            }
            pos < end
        })
        .await?;
        Ok(out)
    }
}

/// In-memory text.
#[derive(Debug, Clone)]
pub struct MemorySource {
    text: String,
}

impl MemorySource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl ChunkSource for MemorySource {
    async fn length(&self) -> Result<u64> {
        Ok(self.text.chars().count() as u64)
    }

    async fn read_chars(&self, start: u64, end: u64) -> Result<String> {
        Ok(self
            .text
            .chars()
            .skip(start as usize)
            .take(end.saturating_sub(start) as usize)
            .collect())
    }
}
