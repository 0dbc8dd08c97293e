use std::borrow::Cow;

use crate::error::{FormatError, NameError};
use crate::priv_util::{until_nul, SliceRead};
use crate::spec::{ept_slot, EPT_PARTITION_SIZE, PARTITION_NAME_LEN};

/// One 40-byte slot of an EPT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Partition {
    name: [u8; PARTITION_NAME_LEN],
    pub size: u64,
    pub offset: u64,
    pub mask: u32,
    /// Carried through unchanged so that re-serialising a slot reproduces it.
    pub padding: u32,
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Checks a raw partition name field.
///
/// The name ends at the first NUL within 16 bytes and may only use `[0-9A-Za-z_-]`. Fields
/// shorter than 16 bytes count as terminated at their end. An empty name passes.
pub fn validate_partition_name(raw: &[u8]) -> Result<(), NameError> {
    let window = &raw[..raw.len().min(PARTITION_NAME_LEN)];
    let name = match window.iter().position(|&b| b == 0) {
        Some(nul) => &window[..nul],
        None if raw.len() >= PARTITION_NAME_LEN => return Err(NameError::Unterminated),
        None => window,
    };
    match name.iter().filter(|&&b| !is_name_byte(b)).count() {
        0 => Ok(()),
        illegal => Err(NameError::IllegalCharacters(illegal)),
    }
}

/// Checks a name given as text, which must leave room for the terminator.
pub fn validate_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() >= PARTITION_NAME_LEN {
        return Err(NameError::TooLong(name.len()));
    }
    if name.as_bytes().contains(&0) {
        return Err(NameError::IllegalCharacters(
            name.bytes().filter(|&b| !is_name_byte(b)).count(),
        ));
    }
    validate_partition_name(name.as_bytes())
}

impl Partition {
    /// A partition named `name`, which must pass [`validate_name`].
    pub fn new(name: &str, offset: u64, size: u64, mask: u32) -> Result<Self, NameError> {
        let mut part = Self {
            offset,
            size,
            mask,
            ..Self::default()
        };
        part.set_name(name)?;
        Ok(part)
    }

    pub fn from_bytes(slot: &[u8]) -> Result<Self, FormatError> {
        let mut name = [0u8; PARTITION_NAME_LEN];
        name.copy_from_slice(slot.read_bytes(ept_slot::NAME, PARTITION_NAME_LEN)?);
        Ok(Self {
            name,
            size: slot.read_le_u64(ept_slot::SIZE)?,
            offset: slot.read_le_u64(ept_slot::OFFSET)?,
            mask: slot.read_le_u32(ept_slot::MASK)?,
            padding: slot.read_le_u32(ept_slot::PADDING)?,
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; EPT_PARTITION_SIZE] {
        let mut slot = [0u8; EPT_PARTITION_SIZE];
        slot[ept_slot::NAME..ept_slot::SIZE].copy_from_slice(&self.name);
        slot[ept_slot::SIZE..ept_slot::OFFSET].copy_from_slice(&self.size.to_le_bytes());
        slot[ept_slot::OFFSET..ept_slot::MASK].copy_from_slice(&self.offset.to_le_bytes());
        slot[ept_slot::MASK..ept_slot::PADDING].copy_from_slice(&self.mask.to_le_bytes());
        slot[ept_slot::PADDING..].copy_from_slice(&self.padding.to_le_bytes());
        slot
    }

    /// Name bytes before the terminator.
    #[inline]
    #[must_use]
    pub fn name_bytes(&self) -> &[u8] {
        until_nul(&self.name)
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name_bytes())
    }

    #[inline]
    #[must_use]
    pub fn raw_name(&self) -> &[u8; PARTITION_NAME_LEN] {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), NameError> {
        validate_name(name)?;
        self.name = [0u8; PARTITION_NAME_LEN];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
        Ok(())
    }

    /// First byte past the partition, `None` if that overflows.
    #[inline]
    #[must_use]
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_rules() {
        assert_eq!(validate_partition_name(b"env\0garbage\0\0\0\0\0"), Ok(()));
        assert_eq!(validate_partition_name(b"ab cd\0"), Err(NameError::IllegalCharacters(1)));
        assert_eq!(validate_partition_name(b"0123456789abcdef"), Err(NameError::Unterminated));
        assert_eq!(validate_partition_name(b"\0"), Ok(()));
        assert_eq!(validate_name(""), Err(NameError::Empty));
        assert_eq!(validate_name("0123456789abcdef"), Err(NameError::TooLong(16)));
        assert_eq!(validate_name("system_a"), Ok(()));
        assert_eq!(validate_name("a.b"), Err(NameError::IllegalCharacters(1)));
    }

    #[test]
    fn slot_layout() {
        let part = Partition::new("boot", 0x1000, 0x2000, 1).unwrap();
        let slot = part.to_bytes();
        assert_eq!(&slot[..5], b"boot\0");
        assert_eq!(slot[16], 0x00);
        assert_eq!(slot[17], 0x20);
        assert_eq!(slot[25], 0x10);
        assert_eq!(slot[32], 1);
        assert_eq!(Partition::from_bytes(&slot).unwrap(), part);
        assert_eq!(part.end(), Some(0x3000));
    }
}
