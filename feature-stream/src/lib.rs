//! Stream individual records out of very large JSON array documents.
//!
//! GeoJSON feature collections exported from GIS portals routinely run to
//! hundreds of megabytes. This crate scans such a document byte by byte,
//! discards everything before the target array, and hands back one record at
//! a time so peak memory tracks the largest record instead of the file.

use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

mod scanner;
mod stream;

pub use stream::FeatureStream;

/// Member of the root object holding the record array in GeoJSON.
pub const DEFAULT_ARRAY_KEY: &str = "features";

/// Read buffer size used by [`FeatureStream::open`].
pub const DEFAULT_READ_CAPACITY: usize = 64 * 1024;

/// Emit a progress line every this many records.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 5_000;

/// Knobs for locating and bounding the streamed array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    /// Root member holding the array; `None` when the document itself is the array.
    pub array_key: Option<String>,
    /// Stop after this many successfully parsed records.
    pub limit: Option<usize>,
    /// Records between progress log lines (0 disables them).
    pub progress_interval: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            array_key: Some(DEFAULT_ARRAY_KEY.to_string()),
            limit: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Counters reported by a [`FeatureStream`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    /// Records parsed and yielded.
    pub emitted: usize,
    /// Records that failed to parse and were skipped.
    pub skipped: usize,
    /// Bytes consumed from the reader.
    pub bytes_read: u64,
    /// Largest raw record buffer held at once.
    pub peak_record_bytes: usize,
}

impl StreamStats {
    /// Every element seen inside the array, parsed or not.
    pub fn seen(&self) -> usize {
        self.emitted + self.skipped
    }
}

/// Fatal errors that end a stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The input file could not be opened.
    #[error("failed to open {path:?}: {source}")]
    Open {
        /// Input path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Reading from the input failed.
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
    /// The input ended before the target array was found.
    #[error("no array found under key {key:?}")]
    TargetNotFound {
        /// Key that was searched for (`None` for a root array).
        key: Option<String>,
    },
    /// The input ended inside the target array.
    #[error("input ended inside the record array after {bytes_read} bytes")]
    Truncated {
        /// Bytes consumed before end of input.
        bytes_read: u64,
    },
}
