// src/archive_format.rs
//! Archive file format: zstd skippable metadata frame + one compressed entry frame
//!
//! Layout:
//! - Skippable frame with metadata (magic 0x184D2A50): JSON document describing
//!   the format version, entry count and content hash
//! - One zstd frame holding length-prefixed key/blob entries in insertion order
//!
//! The file is self-describing: a reader reconstructs the full key→blob
//! mapping from the file alone, and the content hash catches truncated or
//! corrupted data frames before any entry is handed out.

use crate::constants;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Skippable frame magic number for metadata
pub const SKIPPABLE_MAGIC_METADATA: u32 = 0x184D2A50;

/// Archive metadata stored in the skippable frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    /// Format version
    pub format: String,

    /// Number of entries in the data frame
    pub entry_count: usize,

    /// SHA256 of the uncompressed entry stream
    pub content_hash: String,

    /// Creation timestamp
    pub created_at: String,

    /// Creator version (e.g., "cfarchive/0.1.0")
    pub created_by: String,
}

/// Write a zstd skippable frame
pub fn write_skippable_frame<W: Write>(writer: &mut W, magic: u32, data: &[u8]) -> Result<usize> {
    let frame_size = data.len() as u32;

    // Magic number and frame size are little-endian per the zstd framing spec
    writer.write_all(&magic.to_le_bytes())?;
    writer.write_all(&frame_size.to_le_bytes())?;
    writer.write_all(data)?;

    Ok(8 + data.len()) // magic(4) + size(4) + data
}

/// Read a zstd skippable frame
pub fn read_skippable_frame<R: Read>(reader: &mut R) -> Result<(u32, Vec<u8>)> {
    let mut magic_buf = [0u8; 4];
    reader.read_exact(&mut magic_buf)?;
    let magic = u32::from_le_bytes(magic_buf);

    // Verify it's a skippable frame (0x184D2A50 - 0x184D2A5F)
    if !(0x184D2A50..=0x184D2A5F).contains(&magic) {
        anyhow::bail!("not a skippable frame: magic=0x{:08X}", magic);
    }

    let mut size_buf = [0u8; 4];
    reader.read_exact(&mut size_buf)?;
    let frame_size = u32::from_le_bytes(size_buf);

    let mut data = vec![0u8; frame_size as usize];
    reader.read_exact(&mut data)?;

    Ok((magic, data))
}

/// Write metadata as skippable frame
pub fn write_metadata_frame<W: Write>(writer: &mut W, metadata: &ArchiveMetadata) -> Result<usize> {
    let json_data = serde_json::to_vec(metadata)?;
    write_skippable_frame(writer, SKIPPABLE_MAGIC_METADATA, &json_data)
}

/// Read metadata from skippable frame
pub fn read_metadata_frame<R: Read>(reader: &mut R) -> Result<ArchiveMetadata> {
    let (magic, data) = read_skippable_frame(reader)?;

    if magic != SKIPPABLE_MAGIC_METADATA {
        anyhow::bail!(
            "unexpected magic: 0x{:08X} (expected 0x{:08X})",
            magic,
            SKIPPABLE_MAGIC_METADATA
        );
    }

    let metadata: ArchiveMetadata = serde_json::from_slice(&data)?;
    Ok(metadata)
}

/// SHA256 of the uncompressed entry stream, hex-encoded
pub fn content_hash(stream: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stream);
    format!("{:x}", hasher.finalize())
}

/// Entry framing uses u32 length prefixes; anything larger cannot be encoded
fn framed_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| anyhow::anyhow!("length {} exceeds u32 framing limit", len))
}

/// Encode entries into the uncompressed entry stream:
/// `[key_len u32 LE][key utf-8][blob_len u32 LE][blob]` per entry
pub fn encode_entries(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let total: usize = entries.iter().map(|(k, b)| 8 + k.len() + b.len()).sum();
    let mut stream = Vec::with_capacity(total);

    for (key, blob) in entries {
        let key_len = framed_len(key.len())?;
        let blob_len =
            framed_len(blob.len()).map_err(|e| anyhow::anyhow!("entry '{}': {}", key, e))?;
        stream.extend_from_slice(&key_len.to_le_bytes());
        stream.extend_from_slice(key.as_bytes());
        stream.extend_from_slice(&blob_len.to_le_bytes());
        stream.extend_from_slice(blob);
    }

    Ok(stream)
}

/// Decode the uncompressed entry stream back into (key, blob) pairs
pub fn decode_entries(stream: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos < stream.len() {
        let key = read_chunk(stream, &mut pos, "key")?;
        let key = String::from_utf8(key)
            .map_err(|_| anyhow::anyhow!("entry key at offset {} is not valid UTF-8", pos))?;
        let blob = read_chunk(stream, &mut pos, "blob")?;
        entries.push((key, blob));
    }

    Ok(entries)
}

fn read_chunk(stream: &[u8], pos: &mut usize, what: &str) -> Result<Vec<u8>> {
    if *pos + 4 > stream.len() {
        anyhow::bail!("truncated entry stream: {} length at offset {}", what, pos);
    }
    let len = u32::from_le_bytes([
        stream[*pos],
        stream[*pos + 1],
        stream[*pos + 2],
        stream[*pos + 3],
    ]) as usize;
    *pos += 4;

    if *pos + len > stream.len() {
        anyhow::bail!(
            "truncated entry stream: {} of {} bytes at offset {} exceeds stream",
            what,
            len,
            pos
        );
    }
    let chunk = stream[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(chunk)
}

/// Serialize, compress and write a full archive (metadata frame + data frame)
pub fn write_archive<W: Write>(writer: &mut W, entries: &[(&str, &[u8])]) -> Result<ArchiveMetadata> {
    let stream = encode_entries(entries)?;

    let metadata = ArchiveMetadata {
        format: constants::ARCHIVE_FORMAT.to_string(),
        entry_count: entries.len(),
        content_hash: content_hash(&stream),
        created_at: chrono::Utc::now().to_rfc3339(),
        created_by: constants::created_by(),
    };

    write_metadata_frame(writer, &metadata)?;
    let compressed = zstd::encode_all(&stream[..], constants::ZSTD_COMPRESSION_LEVEL)?;
    writer.write_all(&compressed)?;

    Ok(metadata)
}

/// Read and verify a full archive, returning metadata and entries
pub fn read_archive<R: Read>(reader: &mut R) -> Result<(ArchiveMetadata, Vec<(String, Vec<u8>)>)> {
    let metadata = read_metadata_frame(reader)?;

    if metadata.format != constants::ARCHIVE_FORMAT {
        anyhow::bail!(
            "unsupported archive format '{}' (expected '{}')",
            metadata.format,
            constants::ARCHIVE_FORMAT
        );
    }

    let mut compressed = Vec::new();
    reader.read_to_end(&mut compressed)?;
    let stream = zstd::decode_all(&compressed[..])?;

    let hash = content_hash(&stream);
    if hash != metadata.content_hash {
        anyhow::bail!(
            "content hash mismatch: expected {}, got {}",
            metadata.content_hash,
            hash
        );
    }

    let entries = decode_entries(&stream)?;
    if entries.len() != metadata.entry_count {
        anyhow::bail!(
            "entry count mismatch: metadata says {}, stream holds {}",
            metadata.entry_count,
            entries.len()
        );
    }

    Ok((metadata, entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skippable_frame_roundtrip() {
        let data = b"test data";
        let mut buffer = Vec::new();

        write_skippable_frame(&mut buffer, SKIPPABLE_MAGIC_METADATA, data).unwrap();

        let mut cursor = std::io::Cursor::new(&buffer);
        let (magic, read_data) = read_skippable_frame(&mut cursor).unwrap();

        assert_eq!(magic, SKIPPABLE_MAGIC_METADATA);
        assert_eq!(read_data, data);
    }

    #[test]
    fn test_entry_stream_roundtrip() {
        let entries: Vec<(&str, &[u8])> = vec![
            ("params=INFY&seq_id=1", b"{\"x\": 1}".as_slice()),
            ("params=TCS&seq_id=2", b"".as_slice()),
            ("binary", &[0u8, 1, 2, 255]),
        ];

        let stream = encode_entries(&entries).unwrap();
        let decoded = decode_entries(&stream).unwrap();

        assert_eq!(decoded.len(), 3);
        for (i, (key, blob)) in decoded.iter().enumerate() {
            assert_eq!(key, entries[i].0);
            assert_eq!(blob.as_slice(), entries[i].1);
        }
    }

    #[test]
    fn test_framed_len_limit() {
        assert_eq!(framed_len(0).unwrap(), 0);
        assert_eq!(framed_len(u32::MAX as usize).unwrap(), u32::MAX);
        let err = framed_len(u32::MAX as usize + 1).unwrap_err();
        assert!(err.to_string().contains("framing limit"));
    }

    #[test]
    fn test_decode_truncated_stream() {
        let entries: Vec<(&str, &[u8])> = vec![("key", b"some blob data".as_slice())];
        let stream = encode_entries(&entries).unwrap();

        let err = decode_entries(&stream[..stream.len() - 3]).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_archive_roundtrip() {
        let entries: Vec<(&str, &[u8])> = vec![
            ("a", b"alpha".as_slice()),
            ("b", b"beta".as_slice()),
        ];

        let mut buffer = Vec::new();
        let metadata = write_archive(&mut buffer, &entries).unwrap();
        assert_eq!(metadata.entry_count, 2);
        assert_eq!(metadata.format, "cfarchive-v1");

        let mut cursor = std::io::Cursor::new(&buffer);
        let (read_metadata, read_entries) = read_archive(&mut cursor).unwrap();

        assert_eq!(read_metadata.content_hash, metadata.content_hash);
        assert_eq!(read_entries.len(), 2);
        assert_eq!(read_entries[0], ("a".to_string(), b"alpha".to_vec()));
        assert_eq!(read_entries[1], ("b".to_string(), b"beta".to_vec()));
    }

    #[test]
    fn test_content_hash_mismatch_detected() {
        let entries: Vec<(&str, &[u8])> = vec![("a", b"alpha".as_slice())];

        let mut buffer = Vec::new();
        write_archive(&mut buffer, &entries).unwrap();

        // Re-compress a different stream behind the original metadata frame
        let mut cursor = std::io::Cursor::new(&buffer);
        let metadata = read_metadata_frame(&mut cursor).unwrap();
        let mut tampered = Vec::new();
        write_metadata_frame(&mut tampered, &metadata).unwrap();
        let other = encode_entries(&[("a", b"tampered".as_slice())]).unwrap();
        tampered.extend_from_slice(&zstd::encode_all(&other[..], 1).unwrap());

        let mut cursor = std::io::Cursor::new(&tampered);
        let err = read_archive(&mut cursor).unwrap_err();
        assert!(err.to_string().contains("content hash mismatch"));
    }
}
