//! The DTB area of the reserved partition: two copies of the same payload, each closed by a
//! checksummed trailer.

use log::{debug, warn};

use crate::config::DtbSlotLayout;
use crate::error::FormatError;
use crate::priv_util::SliceRead;
use crate::spec::DTB_TRAILER_SIZE;

type Result<T> = core::result::Result<T, FormatError>;

/// `{magic, version, timestamp, checksum}` at the end of each copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotTrailer {
    pub magic: u32,
    pub version: u32,
    pub timestamp: u32,
    pub checksum: u32,
}

impl SlotTrailer {
    fn read(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            magic: buf.read_le_u32(0)?,
            version: buf.read_le_u32(4)?,
            timestamp: buf.read_le_u32(8)?,
            checksum: buf.read_le_u32(12)?,
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; DTB_TRAILER_SIZE] {
        let mut buf = [0u8; DTB_TRAILER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }
}

/// Sum of the little-endian words of `copy` preceding its checksum word.
#[must_use]
pub fn copy_checksum(copy: &[u8]) -> u32 {
    let covered = copy.len().saturating_sub(4);
    copy[..covered]
        .chunks_exact(4)
        .fold(0u32, |sum, word| {
            sum.wrapping_add(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        })
}

/// One of the two copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCopy<'a> {
    pub index: usize,
    /// The copy without its trailer: the DTB followed by padding.
    pub payload: &'a [u8],
    pub trailer: SlotTrailer,
    pub checksum_valid: bool,
}

fn read_copy<'a>(area: &'a [u8], index: usize, layout: &DtbSlotLayout) -> Result<SlotCopy<'a>> {
    let copy = area.read_bytes(index * layout.copy_size, layout.copy_size)?;
    let payload_len = layout.copy_size - DTB_TRAILER_SIZE;
    let trailer = SlotTrailer::read(&copy[payload_len..])?;
    let checksum_valid = trailer.checksum == copy_checksum(copy);
    debug!(
        "DTB copy {}: magic {:#x} version {} timestamp {} checksum {:#x} ({})",
        index,
        trailer.magic,
        trailer.version,
        trailer.timestamp,
        trailer.checksum,
        if checksum_valid { "valid" } else { "invalid" }
    );
    Ok(SlotCopy {
        index,
        payload: &copy[..payload_len],
        trailer,
        checksum_valid,
    })
}

/// Picks the copy to read from.
///
/// The only copy with a valid checksum wins; with two valid copies the first does. When neither
/// is valid the first is used anyway, with a warning.
pub fn select_copy<'a>(area: &'a [u8], layout: &DtbSlotLayout) -> Result<SlotCopy<'a>> {
    if layout.copy_size < DTB_TRAILER_SIZE {
        return Err(FormatError::InvalidHeader("DTB copy smaller than its trailer"));
    }
    let first = read_copy(area, 0, layout)?;
    let second = read_copy(area, 1, layout)?;
    match (first.checksum_valid, second.checksum_valid) {
        (true, _) => Ok(first),
        (false, true) => Ok(second),
        (false, false) => {
            warn!("neither DTB copy has a valid checksum, using the first");
            Ok(first)
        }
    }
}

/// Builds the whole area holding `payload` twice.
///
/// Magic and version come from `template`, normally the trailer of the copy that was read.
pub fn write_slot(
    payload: &[u8],
    template: &SlotTrailer,
    timestamp: u32,
    layout: &DtbSlotLayout,
) -> Result<Vec<u8>> {
    let limit = layout.copy_size.saturating_sub(DTB_TRAILER_SIZE);
    if payload.len() > limit {
        return Err(FormatError::PayloadTooLarge {
            size: payload.len(),
            limit,
        });
    }
    let mut copy = vec![0u8; layout.copy_size];
    copy[..payload.len()].copy_from_slice(payload);
    let mut trailer = SlotTrailer {
        magic: template.magic,
        version: template.version,
        timestamp,
        checksum: 0,
    };
    copy[limit..].copy_from_slice(&trailer.to_bytes());
    trailer.checksum = copy_checksum(&copy);
    copy[limit..].copy_from_slice(&trailer.to_bytes());

    let mut area = Vec::with_capacity(layout.area_size());
    area.extend_from_slice(&copy);
    area.extend_from_slice(&copy);
    Ok(area)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: DtbSlotLayout = DtbSlotLayout { copy_size: 64 };

    fn template() -> SlotTrailer {
        SlotTrailer {
            magic: 0x5f4c_4d41,
            version: 1,
            ..SlotTrailer::default()
        }
    }

    #[test]
    fn written_copies_validate() {
        let area = write_slot(b"payload", &template(), 1234, &SMALL).unwrap();
        assert_eq!(area.len(), 128);
        let copy = select_copy(&area, &SMALL).unwrap();
        assert_eq!(copy.index, 0);
        assert!(copy.checksum_valid);
        assert_eq!(&copy.payload[..7], b"payload");
        assert_eq!(copy.trailer.timestamp, 1234);
        assert_eq!(copy.trailer.magic, template().magic);
    }

    #[test]
    fn falls_back_to_second_copy() {
        let mut area = write_slot(b"payload", &template(), 1, &SMALL).unwrap();
        area[0] ^= 0xff;
        let copy = select_copy(&area, &SMALL).unwrap();
        assert_eq!(copy.index, 1);
        assert!(copy.checksum_valid);
    }

    #[test]
    fn both_corrupt_uses_first() {
        let mut area = write_slot(b"payload", &template(), 1, &SMALL).unwrap();
        area[0] ^= 0xff;
        area[64] ^= 0xff;
        let copy = select_copy(&area, &SMALL).unwrap();
        assert_eq!(copy.index, 0);
        assert!(!copy.checksum_valid);
    }

    #[test]
    fn oversized_payload() {
        let err = write_slot(&[0u8; 49], &template(), 0, &SMALL).unwrap_err();
        assert_eq!(err, FormatError::PayloadTooLarge { size: 49, limit: 48 });
    }

    #[test]
    fn short_area() {
        assert!(select_copy(&[0u8; 100], &SMALL).is_err());
    }
}
