//! Container shared by the staged embeddings file and the index file.
//!
//! ```text
//! Header   { magic "ARXRAGVX", version, kind, dimension, count }
//! Payload  { chunk_ids: [i64; count], vectors: [f32; count * dimension] }
//! sha256 of both encoded sections (32 bytes)
//! ```
//!
//! Header and payload are bincode (standard config); the checksum trailer is raw.

use atomic_write_file::AtomicWriteFile;
use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;

use super::IndexError;

pub const MAGIC: [u8; 8] = *b"ARXRAGVX";
pub const FORMAT_VERSION: u32 = 2;
const CHECKSUM_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArtifactKind {
    /// Raw vectors as returned by the embedding model
    Embeddings = 1,
    /// Unit vectors ready for inner-product search
    Index = 2,
}

impl ArtifactKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Embeddings),
            2 => Some(Self::Index),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ArtifactKind::Embeddings => write!(f, "embeddings"),
            ArtifactKind::Index => write!(f, "index"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub magic: [u8; 8],
    pub version: u32,
    pub kind: u8,
    pub dimension: u32,
    pub count: u64,
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    chunk_ids: &'a [i64],
    vectors: &'a [f32],
}

#[derive(Deserialize)]
struct Payload {
    chunk_ids: Vec<i64>,
    vectors: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub dimension: usize,
    pub chunk_ids: Vec<i64>,
    pub vectors: Vec<f32>,
}

/// Concatenate `sections` and append their SHA-256
pub fn seal(sections: &[&[u8]]) -> Vec<u8> {
    let total: usize = sections.iter().map(|section| section.len()).sum();
    let mut bytes = Vec::with_capacity(total + CHECKSUM_LEN);
    for section in sections {
        bytes.extend_from_slice(section);
    }
    let checksum = Sha256::digest(&bytes);
    bytes.extend_from_slice(&checksum);
    bytes
}

pub fn encode(
    kind: ArtifactKind,
    dimension: usize,
    chunk_ids: &[i64],
    vectors: &[f32],
) -> Result<Vec<u8>, IndexError> {
    let expected_values = chunk_ids.len().checked_mul(dimension);
    if expected_values != Some(vectors.len()) {
        return Err(IndexError::LengthMismatch {
            vectors: vectors.len() / dimension.max(1),
            chunk_ids: chunk_ids.len(),
        });
    }

    let header = Header {
        magic: MAGIC,
        version: FORMAT_VERSION,
        kind: kind as u8,
        dimension: u32::try_from(dimension)
            .map_err(|_| IndexError::TooLarge(format!("dimension {dimension}")))?,
        count: u64::try_from(chunk_ids.len())
            .map_err(|_| IndexError::TooLarge(format!("{} vectors", chunk_ids.len())))?,
    };

    let header_bytes = encode_to_vec(header, bincode::config::standard())?;
    let payload_bytes = encode_to_vec(
        PayloadRef { chunk_ids, vectors },
        bincode::config::standard(),
    )?;
    Ok(seal(&[&header_bytes, &payload_bytes]))
}

pub fn decode(bytes: &[u8], expected: ArtifactKind) -> Result<Decoded, IndexError> {
    let Some(payload_end) = bytes.len().checked_sub(CHECKSUM_LEN) else {
        return Err(IndexError::Corrupt(format!(
            "file is {} bytes, shorter than the checksum",
            bytes.len()
        )));
    };

    let (sections, trailer) = bytes.split_at(payload_end);
    let actual = Sha256::digest(sections);
    if actual.as_slice() != trailer {
        return Err(IndexError::ChecksumMismatch {
            expected: hex::encode(trailer),
            actual: hex::encode(actual),
        });
    }

    let (header, header_len): (Header, usize) =
        decode_from_slice(sections, bincode::config::standard())
            .map_err(|e| IndexError::Corrupt(format!("unreadable header: {e}")))?;

    if header.magic != MAGIC {
        return Err(IndexError::Corrupt("bad magic bytes".to_string()));
    }
    if header.version != FORMAT_VERSION {
        return Err(IndexError::UnsupportedVersion(header.version));
    }
    match ArtifactKind::from_byte(header.kind) {
        Some(kind) if kind == expected => {}
        _ => {
            return Err(IndexError::WrongKind {
                expected,
                found: header.kind,
            });
        }
    }
    if header.dimension == 0 {
        return Err(IndexError::ZeroDimension);
    }

    let dimension = usize::try_from(header.dimension)
        .map_err(|_| IndexError::Corrupt("dimension does not fit in memory".to_string()))?;
    let count = usize::try_from(header.count)
        .map_err(|_| IndexError::Corrupt("vector count does not fit in memory".to_string()))?;
    let value_count = count.checked_mul(dimension).ok_or_else(|| {
        IndexError::Corrupt(format!(
            "{count} vectors of dimension {dimension} overflow the address space"
        ))
    })?;

    let body = sections.get(header_len..).unwrap_or_default();
    let (payload, payload_len): (Payload, usize) =
        decode_from_slice(body, bincode::config::standard())
            .map_err(|e| IndexError::Corrupt(format!("unreadable payload: {e}")))?;

    if payload_len != body.len() {
        return Err(IndexError::Corrupt(format!(
            "{} trailing bytes after payload",
            body.len() - payload_len
        )));
    }
    if payload.chunk_ids.len() != count {
        return Err(IndexError::Corrupt(format!(
            "header records {count} vectors, chunk id table has {}",
            payload.chunk_ids.len()
        )));
    }
    if payload.vectors.len() != value_count {
        return Err(IndexError::Corrupt(format!(
            "expected {value_count} values for {count} vectors of dimension {dimension}, found {}",
            payload.vectors.len()
        )));
    }
    if let Some(i) = payload.vectors.iter().position(|v| !v.is_finite()) {
        return Err(IndexError::NonFinite {
            position: i / dimension,
        });
    }

    Ok(Decoded {
        dimension,
        chunk_ids: payload.chunk_ids,
        vectors: payload.vectors,
    })
}

/// Readers never observe a partially written artifact
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| IndexError::io(parent, source))?;
    }

    let mut file = AtomicWriteFile::open(path).map_err(|source| IndexError::io(path, source))?;
    file.write_all(bytes)
        .map_err(|source| IndexError::io(path, source))?;
    file.commit().map_err(|source| IndexError::io(path, source))
}

pub fn read_file(path: &Path) -> Result<Vec<u8>, IndexError> {
    fs::read(path).map_err(|source| IndexError::io(path, source))
}
