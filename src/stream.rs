//! Chunked, lazily-discovered input stream with O(1) branching
//!
//! Input is pulled from its source on demand into fixed-size chunks of
//! Unicode characters. A `Stream` value is just a cursor over a shared,
//! append-only chunk store, so branching a stream for a speculative parse
//! never copies data: every branch advances independently while observing
//! the same content for the same offset.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;

/// Characters per chunk in the backing store.
const CHUNK_LEN: usize = 1024;

/// Bytes requested from the source per fill.
const READ_LEN: usize = 4096;

/// Fatal input fault. Unlike match-level errors, a stream fault aborts the
/// whole parse.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("read failure near input offset {offset}: {source}")]
    Io {
        offset: usize,
        #[source]
        source: io::Error,
    },

    #[error("invalid UTF-8 in input near byte offset {offset}")]
    InvalidUtf8 { offset: usize },
}

/// Shared backing storage: chunks are append-only and immutable once filled.
struct ChunkStore {
    chunks: Vec<Vec<char>>,
    /// Characters discovered so far.
    len: usize,
    /// Remaining source, `None` once exhausted.
    source: Option<Box<dyn Read>>,
    /// Bytes of an incomplete trailing UTF-8 sequence, kept until the next fill.
    pending: Vec<u8>,
    /// Total bytes consumed from the source, for error offsets.
    bytes_read: usize,
}

impl ChunkStore {
    fn push_char(&mut self, ch: char) {
        if self
            .chunks
            .last()
            .map_or(true, |chunk| chunk.len() == CHUNK_LEN)
        {
            self.chunks.push(Vec::with_capacity(CHUNK_LEN));
        }
        self.chunks.last_mut().unwrap().push(ch);
        self.len += 1;
    }

    fn char_at_abs(&self, abs: usize) -> Option<char> {
        if abs >= self.len {
            return None;
        }
        Some(self.chunks[abs / CHUNK_LEN][abs % CHUNK_LEN])
    }

    /// Pull one batch of bytes from the source and decode it.
    fn fill(&mut self) -> Result<(), StreamError> {
        let Some(source) = self.source.as_mut() else {
            return Ok(());
        };

        let mut buf = [0u8; READ_LEN];
        let n = source.read(&mut buf).map_err(|e| StreamError::Io {
            offset: self.bytes_read,
            source: e,
        })?;

        if n == 0 {
            self.source = None;
            if !self.pending.is_empty() {
                return Err(StreamError::InvalidUtf8 {
                    offset: self.bytes_read - self.pending.len(),
                });
            }
            return Ok(());
        }

        self.bytes_read += n;
        self.pending.extend_from_slice(&buf[..n]);
        self.decode_pending()
    }

    fn decode_pending(&mut self) -> Result<(), StreamError> {
        let (valid, rest_is_partial) = match std::str::from_utf8(&self.pending) {
            Ok(_) => (self.pending.len(), true),
            Err(e) => (e.valid_up_to(), e.error_len().is_none()),
        };

        if !rest_is_partial {
            return Err(StreamError::InvalidUtf8 {
                offset: self.bytes_read - (self.pending.len() - valid),
            });
        }

        // Safe: the prefix was just validated.
        let text = std::str::from_utf8(&self.pending[..valid]).unwrap();
        let decoded: Vec<char> = text.chars().collect();
        for ch in decoded {
            self.push_char(ch);
        }
        self.pending.drain(..valid);
        Ok(())
    }
}

/// A branchable cursor over lazily-discovered input.
///
/// Cloning (or [`branch`](Stream::branch)) is O(1): the chunk store is
/// shared, only the cursor is copied.
#[derive(Clone)]
pub struct Stream {
    store: Rc<RefCell<ChunkStore>>,
    offset: usize,
}

impl Stream {
    /// Stream over an in-memory string; fully discovered up front.
    pub fn from_str(input: &str) -> Self {
        let mut store = ChunkStore {
            chunks: Vec::new(),
            len: 0,
            source: None,
            pending: Vec::new(),
            bytes_read: input.len(),
        };
        for ch in input.chars() {
            store.push_char(ch);
        }
        Stream {
            store: Rc::new(RefCell::new(store)),
            offset: 0,
        }
    }

    /// Stream over an arbitrary reader; content is discovered on demand and
    /// decoded as UTF-8 incrementally.
    pub fn from_reader(reader: impl Read + 'static) -> Self {
        Stream {
            store: Rc::new(RefCell::new(ChunkStore {
                chunks: Vec::new(),
                len: 0,
                source: Some(Box::new(reader)),
                pending: Vec::new(),
                bytes_read: 0,
            })),
            offset: 0,
        }
    }

    /// Stream over a file, read through a `BufReader`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let file = File::open(path).map_err(|e| StreamError::Io {
            offset: 0,
            source: e,
        })?;
        Ok(Self::from_reader(BufReader::new(file)))
    }

    /// New stream at the same position sharing the chunk store.
    pub fn branch(&self) -> Self {
        self.clone()
    }

    /// New stream `n` characters further along the same store.
    pub fn advance(&self, n: usize) -> Self {
        Stream {
            store: Rc::clone(&self.store),
            offset: self.offset + n,
        }
    }

    /// New stream at an absolute position over the same store.
    pub fn at(&self, abs: usize) -> Self {
        Stream {
            store: Rc::clone(&self.store),
            offset: abs,
        }
    }

    /// Absolute position of this cursor.
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Character at `i` relative to the current position, discovering input
    /// as needed. `Ok(None)` past the end of the source.
    pub fn char_at(&self, i: usize) -> Result<Option<char>, StreamError> {
        let abs = self.offset + i;
        self.discover_to(abs + 1)?;
        Ok(self.store.borrow().char_at_abs(abs))
    }

    /// Ensure at least `abs` characters have been discovered, or the source
    /// is exhausted. Discovery is monotone: data is only ever appended.
    pub fn discover_to(&self, abs: usize) -> Result<(), StreamError> {
        let mut store = self.store.borrow_mut();
        while store.len < abs && store.source.is_some() {
            store.fill()?;
        }
        Ok(())
    }

    /// Characters discovered so far.
    pub fn discovered_len(&self) -> usize {
        self.store.borrow().len
    }

    /// True once the source is exhausted.
    pub fn is_fully_discovered(&self) -> bool {
        self.store.borrow().source.is_none()
    }

    /// Already-discovered content between absolute positions, clamped to the
    /// discovered length. Never touches the source.
    pub fn substring(&self, start: usize, end: usize) -> String {
        let store = self.store.borrow();
        let end = end.min(store.len);
        let start = start.min(end);
        (start..end)
            .map(|i| store.char_at_abs(i).unwrap())
            .collect()
    }

    /// Line and column (1-based) of an absolute position, for error messages.
    pub fn line_col(&self, pos: usize) -> (usize, usize) {
        let store = self.store.borrow();
        let mut line = 1;
        let mut col = 1;
        for i in 0..pos.min(store.len) {
            if store.char_at_abs(i) == Some('\n') {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ahead = self.substring(self.offset, self.offset + 20);
        write!(
            f,
            "Stream(pos={}, discovered={}, ahead={:?})",
            self.offset,
            self.discovered_len(),
            ahead
        )
    }
}
