//! Gzip wrapping of device-tree blobs.

use crate::error::FormatError;
use crate::priv_util::SliceRead;
use crate::spec::GZIP_MAGIC;

/// Compression applied to a DTB before it is stored on the device.
pub trait Codec {
    fn decompress(&self, input: &[u8], limit: usize) -> Result<Vec<u8>, FormatError>;
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, FormatError>;
}

/// Whether `buf` starts with the gzip member magic.
pub fn is_gzip(buf: &[u8]) -> bool {
    buf.read_le_u16(0).map_or(false, |magic| magic == GZIP_MAGIC)
}

/// Gzip backed by `flate2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Gzip;

#[cfg(feature = "gzip")]
impl Codec for Gzip {
    /// Inflates the first member of `input`; anything after it (slot padding) is ignored.
    fn decompress(&self, input: &[u8], limit: usize) -> Result<Vec<u8>, FormatError> {
        use std::io::Read;

        let decoder = flate2::read::GzDecoder::new(input);
        let mut out = Vec::new();
        decoder
            .take(limit as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| FormatError::Compression(e.to_string()))?;
        if out.len() > limit {
            return Err(FormatError::PayloadTooLarge {
                size: out.len(),
                limit,
            });
        }
        log::debug!("inflated {} gzip bytes into {}", input.len(), out.len());
        Ok(out)
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, FormatError> {
        use std::io::Write;

        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::best());
        encoder
            .write_all(input)
            .map_err(|e| FormatError::Compression(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| FormatError::Compression(e.to_string()))
    }
}

#[cfg(not(feature = "gzip"))]
impl Codec for Gzip {
    fn decompress(&self, _input: &[u8], _limit: usize) -> Result<Vec<u8>, FormatError> {
        Err(FormatError::CodecUnavailable)
    }

    fn compress(&self, _input: &[u8]) -> Result<Vec<u8>, FormatError> {
        Err(FormatError::CodecUnavailable)
    }
}

#[cfg(all(test, feature = "gzip"))]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_trailing_padding() {
        let payload = vec![0xd0u8; 4096];
        let mut packed = Gzip.compress(&payload).unwrap();
        assert!(is_gzip(&packed));
        packed.resize(packed.len() + 64, 0);
        assert_eq!(Gzip.decompress(&packed, 4096).unwrap(), payload);
    }

    #[test]
    fn inflating_past_the_limit_fails() {
        let packed = Gzip.compress(&[0u8; 1024]).unwrap();
        assert!(matches!(
            Gzip.decompress(&packed, 512),
            Err(FormatError::PayloadTooLarge { limit: 512, .. })
        ));
    }

    #[test]
    fn corrupt_stream() {
        assert!(matches!(
            Gzip.decompress(&[0x1f, 0x8b, 0, 0], 16),
            Err(FormatError::Compression(_))
        ));
        assert!(!is_gzip(&[0x1f]));
    }
}
