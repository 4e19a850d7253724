//! The "movie hash" OpenSubtitles uses to identify a video file.
//!
//! `size + Σ u64_le` over the first and the last 64 KiB of the file, wrapping,
//! printed big-endian as 16 lower-case hex digits. For files under 64 KiB both
//! windows cover the whole file.
//!
//! Words are read into one 8-byte buffer shared by both windows. A short final
//! read only overwrites its own bytes, so the rest of that word keeps the bytes
//! of the previous read. Published hashes depend on this.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const CHUNK_SIZE: u64 = 64 * 1024;

pub fn compute_hash<R: Read + Seek>(input: &mut R) -> io::Result<String> {
    let size = input.seek(SeekFrom::End(0))?;
    let mut hash = size;
    let mut word = [0u8; 8];

    input.seek(SeekFrom::Start(0))?;
    hash = hash.wrapping_add(sum_words(input, CHUNK_SIZE.min(size), &mut word)?);

    input.seek(SeekFrom::Start(size.saturating_sub(CHUNK_SIZE)))?;
    hash = hash.wrapping_add(sum_words(input, CHUNK_SIZE.min(size), &mut word)?);

    Ok(format!("{:016x}", hash))
}

pub fn compute_file_hash(path: impl AsRef<Path>) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    compute_hash(&mut reader)
}

/// Sum `len` bytes as little-endian u64 words, overlaying each read onto `word`.
fn sum_words<R: Read>(input: &mut R, len: u64, word: &mut [u8; 8]) -> io::Result<u64> {
    let mut chunk = Vec::with_capacity(len as usize);
    input.by_ref().take(len).read_to_end(&mut chunk)?;
    let sum = chunk.chunks(8).fold(0u64, |acc, bytes| {
        word[..bytes.len()].copy_from_slice(bytes);
        acc.wrapping_add(u64::from_le_bytes(*word))
    });
    Ok(sum)
}
