//! Exact (exhaustive) L2 vector index.
//!
//! Vectors live in one row-major `f32` matrix; position `i` is the `i`-th
//! vector added. Search scans every row and keeps the best `k` in a bounded
//! max-heap, so results are exact.
//!
//! On-disk layout, all integers little-endian:
//!
//! ```text
//! magic "GRIDFLAT" | version u32 | dimension u32 | count u64 | count*dimension f32 | crc32 u32
//! ```
//!
//! The trailing CRC covers every preceding byte.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::error::{GridError, Result};

const MAGIC: &[u8; 8] = b"GRIDFLAT";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 4 + 8;
const READ_CHUNK: usize = 64 * 1024;

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    /// Euclidean distance to the query.
    pub distance: f32,
}

/// Why an index file could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("not a flat index file")]
    BadMagic,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("header declares dimension 0 with {0} vectors")]
    ZeroDimension(u64),
    #[error("file ends before {expected} vectors were read")]
    Truncated { expected: u64 },
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Checksum { stored: u32, computed: u32 },
    #[error("unexpected bytes after checksum")]
    TrailingBytes,
}

/// Exact nearest-neighbor index over fixed-width vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Empty index for `dimension`-wide vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends one vector and returns its position.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        self.check_dimension(vector)?;
        let position = self.len();
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    /// Stored vector at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        if position >= self.len() {
            return None;
        }
        let start = position * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }

    /// The `k` nearest vectors, nearest first; ties go to the lower position.
    ///
    /// `k` larger than the index returns every vector.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_dimension(query)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k.min(self.len()) + 1);
        for (position, row) in self.data.chunks_exact(self.dimension).enumerate() {
            let candidate = Candidate {
                squared: squared_l2(query, row),
                position,
            };
            if heap.len() < k {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        }
        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| Neighbor {
                position: c.position,
                distance: c.squared.sqrt(),
            })
            .collect())
    }

    /// Serializes the index in its binary format.
    pub fn write_to<W: Write>(&self, writer: W) -> io::Result<()> {
        let mut writer = ChecksumWriter {
            inner: writer,
            hasher: crc32fast::Hasher::new(),
        };
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        let dimension = u32::try_from(self.dimension)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "dimension exceeds u32"))?;
        writer.write_all(&dimension.to_le_bytes())?;
        writer.write_all(&(self.len() as u64).to_le_bytes())?;
        for value in &self.data {
            writer.write_all(&value.to_le_bytes())?;
        }
        let crc = writer.hasher.clone().finalize();
        writer.inner.write_all(&crc.to_le_bytes())?;
        writer.inner.flush()
    }

    /// Decodes an index previously produced by [`FlatIndex::write_to`].
    pub fn read_from<R: Read>(mut reader: R) -> std::result::Result<Self, DecodeError> {
        let mut hasher = crc32fast::Hasher::new();
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => DecodeError::BadMagic,
            _ => DecodeError::Io(err),
        })?;
        hasher.update(&header);
        if &header[..8] != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let version = u32::from_le_bytes(le_array(&header[8..12]));
        if version != FORMAT_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let dimension = u32::from_le_bytes(le_array(&header[12..16])) as usize;
        let count = u64::from_le_bytes(le_array(&header[16..24]));
        if dimension == 0 && count > 0 {
            return Err(DecodeError::ZeroDimension(count));
        }

        let truncated = DecodeError::Truncated { expected: count };
        let total_bytes = (count as u128) * (dimension as u128) * 4;
        let mut remaining = u64::try_from(total_bytes).map_err(|_| DecodeError::Truncated {
            expected: count,
        })?;
        let mut data = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        while remaining > 0 {
            let take = remaining.min(READ_CHUNK as u64) as usize;
            let buf = &mut chunk[..take];
            reader.read_exact(buf).map_err(|err| match err.kind() {
                io::ErrorKind::UnexpectedEof => DecodeError::Truncated { expected: count },
                _ => DecodeError::Io(err),
            })?;
            hasher.update(buf);
            data.extend(
                buf.chunks_exact(4)
                    .map(|bytes| f32::from_le_bytes(le_array(bytes))),
            );
            remaining -= take as u64;
        }

        let mut stored = [0u8; 4];
        reader.read_exact(&mut stored).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => truncated,
            _ => DecodeError::Io(err),
        })?;
        let stored = u32::from_le_bytes(stored);
        let computed = hasher.finalize();
        if stored != computed {
            return Err(DecodeError::Checksum { stored, computed });
        }
        let mut probe = [0u8; 1];
        if reader.read(&mut probe)? != 0 {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { dimension, data })
    }

    /// Writes the index to `path` (no rename; callers stage the file).
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(GridError::storage(path, "create index"))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)
            .map_err(GridError::storage(path, "write index"))?;
        let file = writer
            .into_inner()
            .map_err(|err| GridError::storage(path, "flush index")(err.into_error()))?;
        file.sync_all().map_err(GridError::storage(path, "sync index"))
    }

    /// Reads an index file, naming the artifact in any error.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(GridError::storage(path, "open index"))?;
        Self::read_from(BufReader::new(file)).map_err(|err| match err {
            DecodeError::Io(source) => GridError::Storage {
                artifact: path.to_path_buf(),
                operation: "read index",
                source,
            },
            other => GridError::IndexFormat {
                artifact: path.to_path_buf(),
                reason: other.to_string(),
            },
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(GridError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    squared: f32,
    position: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.squared
            .total_cmp(&other.squared)
            .then_with(|| self.position.cmp(&other.position))
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

struct ChecksumWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
