//! Degraded-mode lookup over a monolithic snapshot document.
//!
//! Used only when no partition index exists. The snapshot is consumed in
//! fixed-size blocks while the scanner follows the document structure from
//! its first byte. A record starts only where the wanted name is a direct
//! key of the top-level `"horses"` object and its value opens with `{`;
//! bytes are then accumulated while tracking nesting depth until the record
//! closes. Only that span is parsed.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::record::HorseProfile;
use super::source::TieredSource;
use crate::error::{KnowledgeError, KnowledgeResult};

const HORSES_KEY: &[u8] = b"horses";

/// Position in the document's outer structure while searching
#[derive(Debug, Default)]
struct Outline {
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Raw bytes of the string being read, kept only for key candidates
    token: Option<Vec<u8>>,
    /// Last string closed at a key level, until something else follows
    key: Option<Vec<u8>>,
    /// `key` was followed by `:`; the next token is its value
    after_colon: bool,
    /// Inside the top-level `"horses"` object
    in_horses: bool,
}

/// Depth tracking state for a record being captured
#[derive(Debug, Default)]
struct Capture {
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Next buffer offset to examine
    cursor: usize,
}

/// Push-based scanner extracting one record's serialized span.
#[derive(Debug)]
pub struct RecordScanner {
    /// The key as it appears between quotes in serialized JSON
    key: Vec<u8>,
    outline: Outline,
    buffer: Vec<u8>,
    capture: Option<Capture>,
}

impl RecordScanner {
    pub fn new(key: &str) -> KnowledgeResult<Self> {
        let quoted = serde_json::to_vec(key)
            .map_err(|e| KnowledgeError::InvalidInput(format!("unencodable key {:?}: {}", key, e)))?;
        Ok(Self {
            key: quoted[1..quoted.len() - 1].to_vec(),
            outline: Outline::default(),
            buffer: Vec::new(),
            capture: None,
        })
    }

    /// Bytes currently retained.
    pub fn buffered(&self) -> usize {
        self.buffer.len() + self.outline.token.as_ref().map_or(0, Vec::len)
    }

    /// Whether the record was found and is still open.
    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    /// Feed the next block. Returns the complete record span once it closes.
    pub fn push(&mut self, block: &[u8]) -> Option<Vec<u8>> {
        if self.capture.is_none() {
            let start = self.find_record_start(block)?;
            self.buffer.extend_from_slice(&block[start..]);
            self.capture = Some(Capture::default());
        } else {
            self.buffer.extend_from_slice(block);
        }

        self.advance_capture()
    }

    /// Walk the outer structure; offset of the record's `{` within `block`.
    fn find_record_start(&mut self, block: &[u8]) -> Option<usize> {
        let longest = self.key.len().max(HORSES_KEY.len());
        let outline = &mut self.outline;

        for (i, &b) in block.iter().enumerate() {
            if outline.in_string {
                if outline.escaped {
                    outline.escaped = false;
                } else if b == b'\\' {
                    outline.escaped = true;
                } else if b == b'"' {
                    outline.in_string = false;
                    outline.key = outline.token.take();
                    outline.after_colon = false;
                    continue;
                }
                if let Some(token) = outline.token.as_mut() {
                    if token.len() < longest {
                        token.push(b);
                    } else {
                        outline.token = None;
                    }
                }
                continue;
            }

            match b {
                b' ' | b'\t' | b'\n' | b'\r' => {}
                b'"' => {
                    outline.in_string = true;
                    let key_level = outline.depth == 1 || (outline.depth == 2 && outline.in_horses);
                    outline.token = key_level.then(Vec::new);
                    outline.key = None;
                    outline.after_colon = false;
                }
                b':' if outline.key.is_some() && !outline.after_colon => outline.after_colon = true,
                b'{' => {
                    let key = outline.key.take();
                    let is_value = std::mem::take(&mut outline.after_colon);
                    let named = |name: &[u8]| is_value && key.as_deref() == Some(name);

                    if outline.depth == 2 && outline.in_horses && named(&self.key) {
                        return Some(i);
                    }
                    if outline.depth == 1 && named(HORSES_KEY) {
                        outline.in_horses = true;
                    }
                    outline.depth += 1;
                }
                b'[' => {
                    outline.key = None;
                    outline.after_colon = false;
                    outline.depth += 1;
                }
                b'}' | b']' => {
                    outline.key = None;
                    outline.after_colon = false;
                    outline.depth = outline.depth.saturating_sub(1);
                    if outline.depth < 2 {
                        outline.in_horses = false;
                    }
                }
                _ => {
                    outline.key = None;
                    outline.after_colon = false;
                }
            }
        }
        None
    }

    fn advance_capture(&mut self) -> Option<Vec<u8>> {
        let capture = self.capture.as_mut()?;

        for i in capture.cursor..self.buffer.len() {
            let b = self.buffer[i];
            if capture.in_string {
                if capture.escaped {
                    capture.escaped = false;
                } else if b == b'\\' {
                    capture.escaped = true;
                } else if b == b'"' {
                    capture.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => capture.in_string = true,
                b'{' | b'[' => capture.depth += 1,
                b'}' | b']' => {
                    capture.depth = capture.depth.saturating_sub(1);
                    if capture.depth == 0 {
                        let span = self.buffer[..=i].to_vec();
                        self.capture = None;
                        self.buffer.clear();
                        return Some(span);
                    }
                }
                _ => {}
            }
        }

        capture.cursor = self.buffer.len();
        None
    }
}

/// A profile found by scanning, and whether it came from the memo
#[derive(Debug, Clone)]
pub struct FallbackLookup {
    pub profile: Arc<HorseProfile>,
    pub memoized: bool,
}

/// Scans the monolithic snapshot, memoizing hits and confirmed misses.
pub struct StreamingFallbackReader {
    source: Arc<TieredSource>,
    snapshot_file: String,
    block_size: usize,
    memo: Mutex<LruCache<String, Option<Arc<HorseProfile>>>>,
    scans: AtomicU64,
}

impl StreamingFallbackReader {
    pub fn new(
        source: Arc<TieredSource>,
        snapshot_file: impl Into<String>,
        block_size: usize,
        memo_capacity: usize,
    ) -> Self {
        let snapshot_file = snapshot_file.into();
        info!(
            "Streaming fallback over {} ({} byte blocks, memo of {})",
            snapshot_file, block_size, memo_capacity
        );
        let capacity = NonZeroUsize::new(memo_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            snapshot_file,
            block_size: block_size.max(1),
            memo: Mutex::new(LruCache::new(capacity)),
            scans: AtomicU64::new(0),
        }
    }

    /// Full scans performed so far.
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    pub async fn get_entity(&self, key: &str) -> KnowledgeResult<FallbackLookup> {
        if let Some(entry) = self.memo.lock().get(key).cloned() {
            debug!("Fallback memo hit for {}", key);
            return entry
                .map(|profile| FallbackLookup {
                    profile,
                    memoized: true,
                })
                .ok_or_else(|| KnowledgeError::not_found(key));
        }

        let scanned = self.scan(key).await;
        match &scanned {
            Ok(profile) => {
                self.memo.lock().put(key.to_string(), Some(profile.clone()));
            }
            Err(e) if e.is_not_found() => {
                self.memo.lock().put(key.to_string(), None);
            }
            Err(_) => {}
        }

        scanned.map(|profile| FallbackLookup {
            profile,
            memoized: false,
        })
    }

    async fn scan(&self, key: &str) -> KnowledgeResult<Arc<HorseProfile>> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        let mut scanner = RecordScanner::new(key)?;
        let mut stream = self.source.open_stream(&self.snapshot_file).await?;
        let mut consumed = 0usize;

        while let Some(block) = stream.next_block(self.block_size).await? {
            consumed += block.len();
            let Some(span) = scanner.push(&block) else {
                continue;
            };
            debug!("Found {} after scanning {} bytes", key, consumed);

            let profile: HorseProfile = serde_json::from_slice(&span)
                .map_err(|e| KnowledgeError::corrupt(format!("snapshot record {}", key), e))?;
            // Horses without history never make it into a snapshot
            if !profile.has_history() {
                return Err(KnowledgeError::not_found(key));
            }
            return Ok(Arc::new(profile));
        }

        if scanner.is_capturing() {
            Err(KnowledgeError::corrupt(
                format!("snapshot record {}", key),
                "stream ended inside the record",
            ))
        } else {
            Err(KnowledgeError::not_found(key))
        }
    }
}
