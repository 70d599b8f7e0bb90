//! Chunked resource engine.
//!
//! Content is split into fixed-size character chunks. Nothing is cached:
//! `describe` streams the file once to learn its length, and every
//! `read_chunk` re-reads the slice it needs.
//!
//! Resource keys are paths relative to the served root. In URIs they are
//! percent-encoded into a single segment, so `docs/a.md` becomes
//! `fs://chunk/docs%2Fa.md/0`.

pub mod source;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result, UnreadableReason};
use crate::mcp::registry::EntryKind;

pub use source::{ChunkSource, FileSource, MemorySource, Utf8Stream};

/// URI prefix of single-chunk resources.
pub const CHUNK_URI_PREFIX: &str = "fs://chunk/";
/// URI prefix of chunk manifests.
pub const MANIFEST_URI_PREFIX: &str = "fs://chunks/";

/// Characters left unescaped in resource keys.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encode a resource key as one URI segment.
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

pub fn manifest_uri(key: &str) -> String {
    format!("{}{}", MANIFEST_URI_PREFIX, encode_key(key))
}

pub fn chunk_uri(key: &str, index: u64) -> String {
    format!("{}{}/{}", CHUNK_URI_PREFIX, encode_key(key), index)
}

/// Chunk arithmetic for one piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub length: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
}

impl ChunkLayout {
    /// `total_chunks = ceil(length / chunk_size)`, at least 1.
    pub fn new(length: u64, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk size must be positive".to_string()));
        }
        let total_chunks = length.div_ceil(chunk_size).max(1);
        Ok(Self {
            length,
            chunk_size,
            total_chunks,
        })
    }

    /// Character range of chunk `index`.
    pub fn range(&self, index: u64) -> Result<(u64, u64)> {
        if index >= self.total_chunks {
            return Err(Error::ChunkOutOfRange {
                index,
                total_chunks: self.total_chunks,
            });
        }
        let start = index * self.chunk_size;
        let end = self.length.min(start + self.chunk_size);
        Ok((start, end))
    }

    /// Length of chunk `index`.
    pub fn chunk_len(&self, index: u64) -> Result<u64> {
        let (start, end) = self.range(index)?;
        Ok(end - start)
    }
}

/// Slice one chunk out of any source.
///
/// # Examples
///
/// ```
/// use fs_explorer_mcp::chunks::{read_source_chunk, MemorySource};
///
/// # tokio_test::block_on(async {
/// let source = MemorySource::new("abcdefghij");
/// assert_eq!(read_source_chunk(&source, 4, 2).await.unwrap(), "ij");
/// assert!(read_source_chunk(&source, 4, 3).await.is_err());
/// # });
/// ```
pub async fn read_source_chunk(
    source: &dyn ChunkSource,
    chunk_size: u64,
    index: u64,
) -> Result<String> {
    let layout = ChunkLayout::new(source.length().await?, chunk_size)?;
    let (start, end) = layout.range(index)?;
    source.read_chars(start, end).await
}

/// Description of a chunked resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkManifest {
    pub file: String,
    pub length: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub chunk_uris: Vec<String>,
}

/// Serves files under one root as chunked text.
#[derive(Debug, Clone)]
pub struct ChunkEngine {
    root: PathBuf,
    chunk_size: u64,
    max_size: u64,
    denied_extensions: Vec<String>,
}

impl ChunkEngine {
    pub fn new(root: impl AsRef<Path>, chunk_size: u64, max_size: u64) -> Result<Self> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| {
            Error::Config(format!("cannot resolve root {}: {}", root.display(), e))
        })?;
        if chunk_size == 0 {
            return Err(Error::Config("chunk size must be positive".to_string()));
        }
        Ok(Self {
            root,
            chunk_size,
            max_size,
            denied_extensions: Vec::new(),
        })
    }

    /// Extensions (without the dot, case-insensitive) that are never served.
    pub fn with_denied_extensions(mut self, extensions: Vec<String>) -> Self {
        self.denied_extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Largest file, in bytes, the engine will serve.
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Key of a path under the root, `/`-separated.
    pub fn key_for_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// Resolve a key to a servable file, or say why it is not servable.
    async fn resolve(&self, key: &str, uri: &str) -> Result<PathBuf> {
        let candidate = self.root.join(key);
        let path = match tokio::fs::canonicalize(&candidate).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(EntryKind::Resource, uri));
            }
            Err(e) => {
                return Err(Error::unreadable(
                    uri,
                    UnreadableReason::Io {
                        detail: e.to_string(),
                    },
                ))
            }
        };

        if !path.starts_with(&self.root) {
            return Err(Error::unreadable(uri, UnreadableReason::OutsideRoot));
        }

        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            Error::unreadable(
                uri,
                UnreadableReason::Io {
                    detail: e.to_string(),
                },
            )
        })?;
        if !metadata.is_file() {
            return Err(Error::unreadable(
                uri,
                UnreadableReason::DisallowedType {
                    detail: "not a regular file".to_string(),
                },
            ));
        }

        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            let ext = ext.to_ascii_lowercase();
            if self.denied_extensions.contains(&ext) {
                return Err(Error::unreadable(
                    uri,
                    UnreadableReason::DisallowedType {
                        detail: format!(".{} files are not served", ext),
                    },
                ));
            }
        }

        if metadata.len() > self.max_size {
            return Err(Error::unreadable(
                uri,
                UnreadableReason::TooLarge {
                    size: metadata.len(),
                    max: self.max_size,
                },
            ));
        }

        Ok(path)
    }

    async fn layout(&self, key: &str, uri: &str) -> Result<(FileSource, ChunkLayout)> {
        let path = self.resolve(key, uri).await?;
        let source = FileSource::new(path, uri);
        let layout = ChunkLayout::new(source.length().await?, self.chunk_size)?;
        Ok((source, layout))
    }

    /// Length, chunk count and chunk URIs of a file.
    pub async fn describe(&self, key: &str) -> Result<ChunkManifest> {
        let uri = manifest_uri(key);
        let (_, layout) = self.layout(key, &uri).await?;
        debug!(
            "Described {}: {} chars in {} chunk(s)",
            key, layout.length, layout.total_chunks
        );

        Ok(ChunkManifest {
            file: key.to_string(),
            length: layout.length,
            chunk_size: layout.chunk_size,
            total_chunks: layout.total_chunks,
            chunk_uris: (0..layout.total_chunks)
                .map(|i| chunk_uri(key, i))
                .collect(),
        })
    }

    /// Text of chunk `index`.
    pub async fn read_chunk(&self, key: &str, index: u64) -> Result<String> {
        let uri = chunk_uri(key, index);
        let (source, layout) = self.layout(key, &uri).await?;
        let (start, end) = layout.range(index)?;
        source.read_chars(start, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;

    #[test]
    fn test_layout_scenario_2500_by_1024() {
        let layout = ChunkLayout::new(2500, 1024).unwrap();
        assert_eq!(layout.total_chunks, 3);
        assert_eq!(layout.chunk_len(0).unwrap(), 1024);
        assert_eq!(layout.chunk_len(2).unwrap(), 452);

        let err = layout.range(3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChunkOutOfRange);
        assert!(matches!(err, Error::ChunkOutOfRange { total_chunks: 3, .. }));
    }

    #[test]
    fn test_layout_empty_content_has_one_chunk() {
        let layout = ChunkLayout::new(0, 1024).unwrap();
        assert_eq!(layout.total_chunks, 1);
        assert_eq!(layout.chunk_len(0).unwrap(), 0);
        assert!(layout.range(1).is_err());
    }

    #[test]
    fn test_layout_total_chunks_formula() {
        for chunk_size in [1u64, 2, 3, 7, 1024] {
            for length in [0u64, 1, 2, 6, 7, 8, 1023, 1024, 1025, 5000] {
                let layout = ChunkLayout::new(length, chunk_size).unwrap();
                let expected = ((length + chunk_size - 1) / chunk_size).max(1);
                assert_eq!(layout.total_chunks, expected);

                let last = layout.chunk_len(layout.total_chunks - 1).unwrap();
                assert_eq!(last, length - chunk_size * (layout.total_chunks - 1));
                assert!(layout.range(layout.total_chunks).is_err());
            }
        }
        assert!(ChunkLayout::new(10, 0).is_err());
    }

    #[tokio::test]
    async fn test_chunks_concatenate_to_original() {
        let text = "Δelta ✓ line\nsecond line ünïcödé\n".repeat(17);
        let source = MemorySource::new(text.clone());

        for chunk_size in [1u64, 5, 64, 1024] {
            let total = ChunkLayout::new(source.length().await.unwrap(), chunk_size)
                .unwrap()
                .total_chunks;
            let mut rebuilt = String::new();
            for i in 0..total {
                rebuilt.push_str(&read_source_chunk(&source, chunk_size, i).await.unwrap());
            }
            assert_eq!(rebuilt, text, "chunk size {}", chunk_size);

            let err = read_source_chunk(&source, chunk_size, total).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ChunkOutOfRange);
        }
    }

    #[test]
    fn test_uri_encoding() {
        assert_eq!(manifest_uri("docs/a b.md"), "fs://chunks/docs%2Fa%20b.md");
        assert_eq!(chunk_uri("x_y-z.txt", 4), "fs://chunk/x_y-z.txt/4");
    }

    fn engine_with(files: &[(&str, &[u8])]) -> (tempfile::TempDir, ChunkEngine) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        let engine = ChunkEngine::new(dir.path(), 1024, 1024 * 1024)
            .unwrap()
            .with_denied_extensions(vec![".bin".to_string()]);
        (dir, engine)
    }

    #[tokio::test]
    async fn test_describe_and_read_file() {
        let body = "x".repeat(2500);
        let (_dir, engine) = engine_with(&[("notes/big.txt", body.as_bytes())]);

        let manifest = engine.describe("notes/big.txt").await.unwrap();
        assert_eq!(manifest.length, 2500);
        assert_eq!(manifest.total_chunks, 3);
        assert_eq!(manifest.chunk_size, 1024);
        assert_eq!(
            manifest.chunk_uris,
            vec![
                "fs://chunk/notes%2Fbig.txt/0",
                "fs://chunk/notes%2Fbig.txt/1",
                "fs://chunk/notes%2Fbig.txt/2",
            ]
        );

        assert_eq!(
            engine.read_chunk("notes/big.txt", 2).await.unwrap().len(),
            452
        );
        let err = engine.read_chunk("notes/big.txt", 3).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChunkOutOfRange);
        assert_eq!(err.to_rpc_error().data.unwrap()["totalChunks"], 3);
    }

    #[tokio::test]
    async fn test_empty_file_has_one_empty_chunk() {
        let (_dir, engine) = engine_with(&[("empty.txt", b"")]);
        let manifest = engine.describe("empty.txt").await.unwrap();
        assert_eq!(manifest.total_chunks, 1);
        assert_eq!(engine.read_chunk("empty.txt", 0).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_unreadable_reasons() {
        let (dir, engine) = engine_with(&[
            ("bad.txt", &[0xff, 0xfe, 0x00]),
            ("data.bin", b"ok"),
            ("sub/inner.txt", b"ok"),
        ]);

        let reason = |err: Error| match err {
            Error::ResourceUnreadable { reason, .. } => reason,
            other => panic!("expected unreadable, got {:?}", other),
        };

        assert_eq!(
            reason(engine.describe("bad.txt").await.unwrap_err()),
            UnreadableReason::Undecodable
        );
        assert!(matches!(
            reason(engine.describe("data.bin").await.unwrap_err()),
            UnreadableReason::DisallowedType { .. }
        ));
        assert!(matches!(
            reason(engine.describe("sub").await.unwrap_err()),
            UnreadableReason::DisallowedType { .. }
        ));
        assert_eq!(
            reason(engine.describe("../").await.unwrap_err()),
            UnreadableReason::OutsideRoot
        );

        let small = ChunkEngine::new(dir.path(), 1024, 1).unwrap();
        assert!(matches!(
            reason(small.describe("sub/inner.txt").await.unwrap_err()),
            UnreadableReason::TooLarge { size: 2, max: 1 }
        ));

        assert_eq!(
            engine.describe("missing.txt").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_key_for_path() {
        let (_dir, engine) = engine_with(&[("a/b.txt", b"hi")]);
        let path = engine.root().join("a").join("b.txt");
        assert_eq!(engine.key_for_path(&path).as_deref(), Some("a/b.txt"));
        assert_eq!(engine.key_for_path(engine.root()), None);
        assert_eq!(engine.key_for_path(Path::new("/elsewhere/x")), None);
    }
}
