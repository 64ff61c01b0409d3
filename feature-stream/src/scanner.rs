//! Byte-level scanner that locates the target array and cuts it into records.

use std::io::{BufRead, ErrorKind};

use crate::StreamError;

/// Outcome of advancing the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// A complete element is available through [`Scanner::record`].
    Record,
    /// The array terminator was reached.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Seeking,
    AwaitColon,
    AwaitArray,
    InArray,
    Done,
}

pub(crate) struct Scanner {
    key: Option<Vec<u8>>,
    phase: Phase,
    // Shared string tracking (both while seeking and inside elements).
    in_string: bool,
    escaped: bool,
    // Seeking state.
    seek_depth: usize,
    capture: Vec<u8>,
    capture_overflow: bool,
    // Element state.
    in_element: bool,
    depth: usize,
    buffer: Vec<u8>,
    peak_record_bytes: usize,
    bytes_read: u64,
}

impl Scanner {
    pub(crate) fn new(key: Option<&str>) -> Self {
        Self {
            key: key.map(|key| key.as_bytes().to_vec()),
            phase: Phase::Seeking,
            in_string: false,
            escaped: false,
            seek_depth: 0,
            capture: Vec::new(),
            capture_overflow: false,
            in_element: false,
            depth: 0,
            buffer: Vec::new(),
            peak_record_bytes: 0,
            bytes_read: 0,
        }
    }

    /// Raw bytes of the most recently completed element.
    pub(crate) fn record(&self) -> &[u8] {
        &self.buffer
    }

    pub(crate) fn peak_record_bytes(&self) -> usize {
        self.peak_record_bytes
    }

    pub(crate) fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Reads from `reader` until the next element completes or the array ends.
    pub(crate) fn advance<R: BufRead>(&mut self, reader: &mut R) -> Result<Step, StreamError> {
        if self.phase == Phase::Done {
            return Ok(Step::End);
        }
        loop {
            let chunk = match reader.fill_buf() {
                Ok(chunk) => chunk,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(StreamError::Io(err)),
            };
            if chunk.is_empty() {
                return Err(self.eof_error());
            }

            let mut consumed = 0usize;
            let mut step = None;
            for &byte in chunk {
                consumed += 1;
                if let Some(found) = self.feed(byte) {
                    step = Some(found);
                    break;
                }
            }
            reader.consume(consumed);
            self.bytes_read += consumed as u64;
            if let Some(step) = step {
                return Ok(step);
            }
        }
    }

    fn eof_error(&self) -> StreamError {
        match self.phase {
            Phase::InArray => StreamError::Truncated {
                bytes_read: self.bytes_read,
            },
            _ => StreamError::TargetNotFound {
                key: self
                    .key
                    .as_deref()
                    .map(|key| String::from_utf8_lossy(key).into_owned()),
            },
        }
    }

    fn feed(&mut self, byte: u8) -> Option<Step> {
        match self.phase {
            Phase::Seeking => {
                self.seek(byte);
                None
            }
            Phase::AwaitColon => {
                if byte.is_ascii_whitespace() {
                    return None;
                }
                if byte == b':' {
                    self.phase = Phase::AwaitArray;
                } else {
                    self.phase = Phase::Seeking;
                    self.seek(byte);
                }
                None
            }
            Phase::AwaitArray => {
                if byte.is_ascii_whitespace() {
                    return None;
                }
                if byte == b'[' {
                    self.enter_array();
                } else {
                    // Key present but holding something other than an array.
                    self.phase = Phase::Seeking;
                    self.seek(byte);
                }
                None
            }
            Phase::InArray => self.element(byte),
            Phase::Done => Some(Step::End),
        }
    }

    fn enter_array(&mut self) {
        self.phase = Phase::InArray;
        self.in_string = false;
        self.escaped = false;
        self.in_element = false;
        self.depth = 0;
    }

    fn seek(&mut self, byte: u8) {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
                self.capture_byte(byte);
            } else if byte == b'\\' {
                self.escaped = true;
                self.capture_byte(byte);
            } else if byte == b'"' {
                self.in_string = false;
                self.finish_capture();
            } else {
                self.capture_byte(byte);
            }
            return;
        }

        match byte {
            b'"' => {
                self.in_string = true;
                self.capture.clear();
                self.capture_overflow = false;
            }
            b'[' if self.key.is_none() && self.seek_depth == 0 => self.enter_array(),
            b'{' | b'[' => self.seek_depth += 1,
            b'}' | b']' => self.seek_depth = self.seek_depth.saturating_sub(1),
            _ => {}
        }
    }

    fn capture_byte(&mut self, byte: u8) {
        let limit = self.key.as_ref().map_or(0, Vec::len);
        if self.capture.len() < limit {
            self.capture.push(byte);
        } else {
            self.capture_overflow = true;
        }
    }

    fn finish_capture(&mut self) {
        let Some(key) = self.key.as_deref() else {
            return;
        };
        if self.seek_depth == 1 && !self.capture_overflow && self.capture == key {
            self.phase = Phase::AwaitColon;
        }
    }

    fn element(&mut self, byte: u8) -> Option<Step> {
        if !self.in_element {
            match byte {
                b',' => return None,
                b']' => {
                    self.phase = Phase::Done;
                    return Some(Step::End);
                }
                _ if byte.is_ascii_whitespace() => return None,
                _ => {
                    self.in_element = true;
                    self.buffer.clear();
                    self.depth = 0;
                }
            }
        }

        if self.in_string {
            self.push(byte);
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return None;
        }

        match byte {
            b'"' => {
                self.in_string = true;
                self.push(byte);
                None
            }
            b'{' | b'[' => {
                self.depth += 1;
                self.push(byte);
                None
            }
            b']' if self.depth == 0 => {
                // A scalar element directly followed by the array terminator.
                self.in_element = false;
                self.phase = Phase::Done;
                Some(Step::Record)
            }
            b'}' | b']' if self.depth > 0 => {
                self.depth -= 1;
                self.push(byte);
                if self.depth == 0 {
                    self.in_element = false;
                    Some(Step::Record)
                } else {
                    None
                }
            }
            b',' if self.depth == 0 => {
                self.in_element = false;
                Some(Step::Record)
            }
            _ => {
                self.push(byte);
                None
            }
        }
    }

    fn push(&mut self, byte: u8) {
        self.buffer.push(byte);
        if self.buffer.len() > self.peak_record_bytes {
            self.peak_record_bytes = self.buffer.len();
        }
    }
}

/// Strips surrounding whitespace and trailing separators from a raw element.
pub(crate) fn trim_record(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace() && *byte != b',')
        .map_or(start, |idx| idx + 1);
    &raw[start..end.max(start)]
}

#[cfg(test)]
mod tests {
    use super::{trim_record, Scanner, Step};
    use std::io::Cursor;

    fn collect(input: &str, key: Option<&str>) -> Vec<String> {
        let mut scanner = Scanner::new(key);
        let mut reader = Cursor::new(input.as_bytes().to_vec());
        let mut out = Vec::new();
        while let Step::Record = scanner.advance(&mut reader).expect("scan") {
            out.push(String::from_utf8_lossy(trim_record(scanner.record())).into_owned());
        }
        out
    }

    #[test]
    fn nested_arrays_do_not_end_the_record() {
        let input = r#"{"type":"FeatureCollection","features":[
            {"geometry":{"coordinates":[[[1,2],[3,4]]]}},
            {"geometry":{"coordinates":[[5,6]]}}
        ]}"#;
        assert_eq!(
            collect(input, Some("features")),
            vec![
                r#"{"geometry":{"coordinates":[[[1,2],[3,4]]]}}"#,
                r#"{"geometry":{"coordinates":[[5,6]]}}"#,
            ]
        );
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let input = r#"{"features":[{"name":"a } \" { ]"},{"name":"b"}]}"#;
        assert_eq!(
            collect(input, Some("features")),
            vec![r#"{"name":"a } \" { ]"}"#, r#"{"name":"b"}"#]
        );
    }

    #[test]
    fn key_must_be_a_top_level_member() {
        let input = r#"{"meta":{"features":[{"x":1}]},"name":"features","features":[{"y":2}]}"#;
        assert_eq!(collect(input, Some("features")), vec![r#"{"y":2}"#]);
    }

    #[test]
    fn root_array_without_key() {
        let input = r#" [ {"a":1} , {"b":[2]} ] "#;
        assert_eq!(collect(input, None), vec![r#"{"a":1}"#, r#"{"b":[2]}"#]);
    }

    #[test]
    fn scalar_elements_surface_as_records() {
        let input = r#"{"features":[{"a":1}, null, 7]}"#;
        assert_eq!(
            collect(input, Some("features")),
            vec![r#"{"a":1}"#, "null", "7"]
        );
    }

    #[test]
    fn trims_trailing_separators() {
        assert_eq!(trim_record(b"  {\"a\":1}, \n"), b"{\"a\":1}");
        assert_eq!(trim_record(b" , "), b"");
    }
}
