//! The strings block of an FDT: NUL-terminated property names addressed by byte offset.

use std::borrow::Cow;

use crate::priv_util::SliceRead;

/// A strings block, borrowed from a device tree until something is appended to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringBlock<'dt> {
    data: Cow<'dt, [u8]>,
}

impl<'dt> StringBlock<'dt> {
    #[must_use]
    pub fn new(data: &'dt [u8]) -> Self {
        Self {
            data: Cow::Borrowed(data),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Offset of `name` in the block.
    ///
    /// Any NUL-terminated tail matches, so `"phandle"` is found inside `"linux,phandle"` when no
    /// standalone copy precedes it. The empty string maps to the first NUL.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<u32> {
        let needle = name.as_bytes();
        let found = self
            .data
            .windows(needle.len() + 1)
            .position(|w| w[needle.len()] == 0 && &w[..needle.len()] == needle)?;
        u32::try_from(found).ok()
    }

    /// The name stored at `offset`, without its terminator.
    #[must_use]
    pub fn get(&self, offset: u32) -> Option<&[u8]> {
        let data: &[u8] = &self.data;
        data.read_bstring0(offset as usize).ok()
    }

    /// Appends `name` even if it is already present and returns its offset.
    pub fn append_force(&mut self, name: &str) -> u32 {
        let offset = self.data.len() as u32;
        let data = self.data.to_mut();
        data.extend_from_slice(name.as_bytes());
        data.push(0);
        offset
    }

    /// Returns the offset of `name`, appending it only when it cannot be found.
    pub fn append_safely(&mut self, name: &str) -> u32 {
        match self.find(name) {
            Some(offset) => offset,
            None => self.append_force(name),
        }
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data.into_owned()
    }
}

impl From<Vec<u8>> for StringBlock<'static> {
    fn from(data: Vec<u8>) -> Self {
        Self {
            data: Cow::Owned(data),
        }
    }
}
