use std::io::{self, BufReader, Cursor, Read};

use feature_stream::{FeatureStream, StreamOptions};
use pretty_assertions::assert_eq;
use serde_json::Value;

fn feature(id: usize) -> String {
    format!(
        r#"{{"type":"Feature","properties":{{"OBJECTID":{id},"ID":"L{id}","VOLTAGE":345,"OWNER":"UTILITY {id}"}},"geometry":{{"type":"MultiLineString","coordinates":[[[-90.{id:04},35.1],[-90.2,35.2]]]}}}}"#
    )
}

#[test]
fn one_malformed_record_among_a_hundred() {
    let mut doc = String::from(r#"{"type":"FeatureCollection","features":["#);
    for id in 0..100 {
        doc.push_str(&feature(id));
        doc.push(',');
        if id == 41 {
            doc.push_str(r#"{"type":"Feature","properties":{"ID":"broken","VOLTAGE":},"geometry":null},"#);
        }
    }
    doc.pop();
    doc.push_str("]}");

    let mut records: FeatureStream<_, Value> =
        FeatureStream::new(Cursor::new(doc.into_bytes()), StreamOptions::default());
    let emitted: Vec<Value> = records
        .by_ref()
        .collect::<Result<_, _>>()
        .expect("stream completes");

    assert_eq!(emitted.len(), 100);
    let stats = records.stats();
    assert_eq!(stats.emitted, 100);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.seen(), 101);
    assert_eq!(emitted[42]["properties"]["ID"], "L42");
}

#[test]
fn fixture_file_streams_from_disk() {
    let mut records: FeatureStream<_, Value> = FeatureStream::open(
        "tests/fixtures/transmission-lines.geojson",
        StreamOptions::default(),
    )
    .expect("open fixture");
    let ids: Vec<String> = records
        .by_ref()
        .map(|record| {
            let record = record.expect("record");
            record["properties"]["OBJECTID"].to_string()
        })
        .collect();

    assert_eq!(ids, vec!["1", "2", "3", "5"]);
    assert_eq!(records.stats().skipped, 1);
}

/// Generates a feature collection on the fly without ever materializing it.
struct SyntheticCollection {
    total: usize,
    next: usize,
    pending: Vec<u8>,
    offset: usize,
    closed: bool,
}

impl SyntheticCollection {
    fn new(total: usize) -> Self {
        Self {
            total,
            next: 0,
            pending: br#"{"type":"FeatureCollection","features":["#.to_vec(),
            offset: 0,
            closed: false,
        }
    }

    fn refill(&mut self) {
        self.pending.clear();
        self.offset = 0;
        if self.next < self.total {
            if self.next > 0 {
                self.pending.push(b',');
            }
            self.pending.extend_from_slice(feature(self.next).as_bytes());
            self.next += 1;
        } else if !self.closed {
            self.pending.extend_from_slice(b"]}");
            self.closed = true;
        }
    }
}

impl Read for SyntheticCollection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.offset >= self.pending.len() {
            self.refill();
        }
        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

#[test]
fn record_buffer_does_not_grow_with_record_count() {
    let largest_record = feature(9_999).len().max(feature(199_999).len());

    let mut small: FeatureStream<_, Value> = FeatureStream::new(
        BufReader::new(SyntheticCollection::new(10_000)),
        StreamOptions::default(),
    );
    assert_eq!(small.by_ref().filter(|r| r.is_ok()).count(), 10_000);

    let mut large: FeatureStream<_, Value> = FeatureStream::new(
        BufReader::new(SyntheticCollection::new(200_000)),
        StreamOptions::default(),
    );
    assert_eq!(large.by_ref().filter(|r| r.is_ok()).count(), 200_000);

    let small_stats = small.stats();
    let large_stats = large.stats();
    assert!(large_stats.bytes_read > 15 * small_stats.bytes_read);
    assert!(large_stats.peak_record_bytes <= largest_record);
    assert!(large_stats.peak_record_bytes <= small_stats.peak_record_bytes + 8);
}
