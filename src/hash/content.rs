//! Content checksums for files and objects
//!
//! CRC32 backs the content-comparing sync strategies. MD5 names breakpoint
//! records and fingerprints the tail of a multipart source.

use crate::error::{IoResultExt, Result};
use crate::storage::ObjectStore;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Bytes read per chunk when hashing
const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// Size of the trailing sample hashed into a source fingerprint
pub const TAIL_SAMPLE_SIZE: u64 = 1024 * 1024;

/// Streaming hasher over the supported checksum kinds
pub enum ContentHasher {
    /// CRC32 (IEEE)
    Crc32(crc32fast::Hasher),
    /// MD5
    Md5(Md5),
}

impl ContentHasher {
    /// A new CRC32 hasher
    pub fn crc32() -> Self {
        Self::Crc32(crc32fast::Hasher::new())
    }

    /// A new MD5 hasher
    pub fn md5() -> Self {
        Self::Md5(Md5::new())
    }

    /// Feed more data
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Crc32(h) => h.update(data),
            Self::Md5(h) => h.update(data),
        }
    }

    /// Finish and render as lowercase hex
    pub fn finalize(self) -> String {
        match self {
            Self::Crc32(h) => format!("{:08x}", h.finalize()),
            Self::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

/// MD5 of a byte slice as lowercase hex
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Name of the breakpoint record for a source/destination pair
pub fn content_id(src_descriptor: &str, dst_descriptor: &str) -> String {
    md5_hex(format!("{}_{}", src_descriptor, dst_descriptor).as_bytes())
}

/// CRC32 of a whole local file
pub fn crc32_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_path(path)?;
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = ContentHasher::crc32();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer).with_path(path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// CRC32 of a whole object, read in ranged chunks
pub fn crc32_object(store: &dyn ObjectStore, bucket: &str, key: &str, size: u64) -> Result<String> {
    let mut hasher = ContentHasher::crc32();
    let mut offset = 0;
    while offset < size {
        let end = (offset + HASH_BUFFER_SIZE as u64).min(size);
        let chunk = store.get_object(bucket, key, Some(offset..end))?;
        hasher.update(&chunk);
        offset = end;
    }
    Ok(hasher.finalize())
}

/// MD5 of the last [`TAIL_SAMPLE_SIZE`] bytes of a local file
pub fn tail_md5_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_path(path)?;
    let size = file.metadata().with_path(path)?.len();
    let start = size.saturating_sub(TAIL_SAMPLE_SIZE);
    file.seek(SeekFrom::Start(start)).with_path(path)?;

    let mut sample = Vec::with_capacity((size - start) as usize);
    file.read_to_end(&mut sample).with_path(path)?;
    Ok(md5_hex(&sample))
}

/// MD5 of the last [`TAIL_SAMPLE_SIZE`] bytes of an object
pub fn tail_md5_object(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    size: u64,
) -> Result<String> {
    let start = size.saturating_sub(TAIL_SAMPLE_SIZE);
    let sample = if size == 0 {
        Vec::new()
    } else {
        store.get_object(bucket, key, Some(start..size))?
    };
    Ok(md5_hex(&sample))
}
