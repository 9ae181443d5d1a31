//! Checksum utilities for object content verification
//!
//! File content is fingerprinted with MD5 and CRC32. Hex strings are
//! lowercase; the CRC32 hex form carries no leading zeros, matching what
//! cloud object stores report.

use std::io::Read;

use crate::error::{DepotError, Result};

/// MD5 and CRC32 fingerprints of one object's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChecksums {
    pub md5: String,
    pub crc32c: String,
}

/// Compute both checksums in a single pass over a reader.
pub fn compute_checksums<R: Read>(reader: &mut R) -> Result<ContentChecksums> {
    let mut md5_ctx = md5::Context::new();
    let mut crc = crc32fast::Hasher::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        md5_ctx.consume(&buffer[..bytes_read]);
        crc.update(&buffer[..bytes_read]);
    }

    Ok(ContentChecksums {
        md5: format!("{:x}", md5_ctx.compute()),
        crc32c: format!("{:x}", crc.finalize()),
    })
}

/// Compute the MD5 of an in-memory buffer.
pub fn compute_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Compute the CRC32 of an in-memory buffer.
pub fn compute_crc32(data: &[u8]) -> String {
    format!("{:x}", crc32fast::hash(data))
}

/// Verify that a buffer matches an expected MD5, returning a
/// [`DepotError::ChecksumMismatch`] when it does not.
pub fn verify_md5(data: &[u8], expected: &str) -> Result<()> {
    let actual = compute_md5(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(DepotError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_compute_md5() {
        assert_eq!(
            compute_md5(b"hello world"),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn test_compute_checksums_single_pass() {
        let data = b"hello world";
        let mut cursor = Cursor::new(&data[..]);
        let sums = compute_checksums(&mut cursor).unwrap();
        assert_eq!(sums.md5, compute_md5(data));
        assert_eq!(sums.crc32c, compute_crc32(data));
    }

    #[test]
    fn test_crc32_no_leading_zeros() {
        // A crc whose top nibble is zero must format without the leading zero,
        // matching u32 lower-hex semantics.
        let value = 0x0D4A_1185u32;
        assert_eq!(format!("{:x}", value), "d4a1185");
        assert_eq!(
            compute_crc32(b"hello"),
            format!("{:x}", crc32fast::hash(b"hello"))
        );
    }

    #[test]
    fn test_verify_md5_mismatch() {
        let err = verify_md5(b"hello", "deadbeef").unwrap_err();
        match err {
            DepotError::ChecksumMismatch { expected, .. } => assert_eq!(expected, "deadbeef"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_verify_md5_case_insensitive() {
        verify_md5(b"hello world", "5EB63BBBE01EEED093CB22BB8F5ACDC3").unwrap();
    }

    proptest::proptest! {
        #[test]
        fn streaming_matches_one_shot(data in proptest::collection::vec(
            proptest::prelude::any::<u8>(), 0..4096,
        )) {
            let mut cursor = Cursor::new(&data[..]);
            let sums = compute_checksums(&mut cursor).unwrap();
            proptest::prop_assert_eq!(&sums.md5, &compute_md5(&data));
            proptest::prop_assert_eq!(&sums.crc32c, &compute_crc32(&data));
        }
    }
}
