//! Lazy record iterator built on top of the byte scanner.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::marker::PhantomData;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::scanner::{trim_record, Scanner, Step};
use crate::{StreamError, StreamOptions, StreamStats, DEFAULT_READ_CAPACITY};

/// Lazily yields one deserialized record at a time from a large array document.
///
/// The stream is finite and not restartable. Records that fail to deserialize
/// are counted in [`StreamStats::skipped`] and never end the iteration; I/O
/// failures, a missing target array, or a truncated document are yielded once
/// as an error and end it.
pub struct FeatureStream<R, T = serde_json::Value> {
    reader: R,
    scanner: Scanner,
    options: StreamOptions,
    stats: StreamStats,
    finished: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T> FeatureStream<BufReader<File>, T> {
    /// Opens `path` with a bounded read buffer.
    pub fn open(path: impl AsRef<Path>, options: StreamOptions) -> Result<Self, StreamError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| StreamError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = BufReader::with_capacity(DEFAULT_READ_CAPACITY, file);
        Ok(Self::new(reader, options))
    }
}

impl<R, T> FeatureStream<R, T> {
    /// Wraps an already-buffered reader.
    pub fn new(reader: R, options: StreamOptions) -> Self {
        let scanner = Scanner::new(options.array_key.as_deref());
        Self {
            reader,
            scanner,
            options,
            stats: StreamStats::default(),
            finished: false,
            _record: PhantomData,
        }
    }

    /// Counters observed so far; final once the iterator returned `None`.
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            bytes_read: self.scanner.bytes_read(),
            peak_record_bytes: self.scanner.peak_record_bytes(),
            ..self.stats
        }
    }

    /// Whether the iterator reached its end (array terminator, limit or fatal error).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self) {
        self.finished = true;
        let stats = self.stats();
        info!(
            emitted = stats.emitted,
            skipped = stats.skipped,
            bytes_read = stats.bytes_read,
            "feature stream finished"
        );
    }
}

impl<R, T> Iterator for FeatureStream<R, T>
where
    R: BufRead,
    T: DeserializeOwned,
{
    type Item = Result<T, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self
            .options
            .limit
            .is_some_and(|limit| self.stats.emitted >= limit)
        {
            debug!(limit = ?self.options.limit, "record limit reached");
            self.finish();
            return None;
        }

        loop {
            match self.scanner.advance(&mut self.reader) {
                Ok(Step::Record) => {
                    let position = self.stats.emitted + self.stats.skipped;
                    let raw = trim_record(self.scanner.record());
                    match serde_json::from_slice::<T>(raw) {
                        Ok(record) => {
                            self.stats.emitted += 1;
                            if self.options.progress_interval > 0
                                && self.stats.emitted % self.options.progress_interval == 0
                            {
                                info!(emitted = self.stats.emitted, "streamed records");
                            }
                            return Some(Ok(record));
                        }
                        Err(err) => {
                            self.stats.skipped += 1;
                            warn!(
                                position,
                                bytes = raw.len(),
                                error = %err,
                                "skipping malformed record"
                            );
                        }
                    }
                }
                Ok(Step::End) => {
                    self.finish();
                    return None;
                }
                Err(err) => {
                    self.finish();
                    return Some(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FeatureStream;
    use crate::{StreamError, StreamOptions};
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use std::io::Cursor;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
    }

    fn stream(input: &str) -> FeatureStream<Cursor<Vec<u8>>, Item> {
        FeatureStream::new(
            Cursor::new(input.as_bytes().to_vec()),
            StreamOptions::default(),
        )
    }

    #[test]
    fn yields_records_in_document_order() {
        let mut records = stream(r#"{"features":[{"id":1},{"id":2},{"id":3}]}"#);
        let ids: Vec<u32> = records
            .by_ref()
            .map(|item| item.expect("record").id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        let stats = records.stats();
        assert_eq!(stats.emitted, 3);
        assert_eq!(stats.skipped, 0);
        assert!(records.is_finished());
    }

    #[test]
    fn malformed_record_is_skipped_and_counted() {
        let mut records = stream(r#"{"features":[{"id":1},{"id":},{"id":"x"},{"id":4}]}"#);
        let ids: Vec<u32> = records
            .by_ref()
            .map(|item| item.expect("record").id)
            .collect();
        assert_eq!(ids, vec![1, 4]);
        assert_eq!(records.stats().skipped, 2);
    }

    #[test]
    fn limit_stops_early() {
        let options = StreamOptions {
            limit: Some(2),
            ..StreamOptions::default()
        };
        let records: FeatureStream<_, Item> = FeatureStream::new(
            Cursor::new(br#"{"features":[{"id":1},{"id":2},{"id":3}]}"#.to_vec()),
            options,
        );
        assert_eq!(records.count(), 2);
    }

    #[test]
    fn missing_key_is_reported_once() {
        let mut records = stream(r#"{"type":"FeatureCollection","items":[{"id":1}]}"#);
        match records.next() {
            Some(Err(StreamError::TargetNotFound { key })) => {
                assert_eq!(key.as_deref(), Some("features"));
            }
            other => panic!("expected missing target, got {other:?}"),
        }
        assert!(records.next().is_none());
    }

    #[test]
    fn truncated_document_is_an_error() {
        let mut records = stream(r#"{"features":[{"id":1},{"id":2"#);
        assert_eq!(records.next().expect("first").expect("ok"), Item { id: 1 });
        assert!(matches!(
            records.next(),
            Some(Err(StreamError::Truncated { .. }))
        ));
        assert!(records.next().is_none());
    }
}
