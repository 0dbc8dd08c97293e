use core::mem::size_of;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SliceReadError {
    /// `(offset, length)` of a read that fell outside the slice.
    InvalidOffset(usize, usize),
    UnexpectedEndOfInput,
}

pub(crate) type SliceReadResult<T> = Result<T, SliceReadError>;

/// Bounds-checked reads of fixed-width integers and NUL-terminated strings.
pub(crate) trait SliceRead<'a> {
    fn read_be_u32(&self, pos: usize) -> SliceReadResult<u32>;
    fn read_be_u64(&self, pos: usize) -> SliceReadResult<u64>;
    fn read_le_u16(&self, pos: usize) -> SliceReadResult<u16>;
    fn read_le_u32(&self, pos: usize) -> SliceReadResult<u32>;
    fn read_le_u64(&self, pos: usize) -> SliceReadResult<u64>;
    fn read_le_i32(&self, pos: usize) -> SliceReadResult<i32>;
    fn read_bytes(&self, pos: usize, len: usize) -> SliceReadResult<&'a [u8]>;
    fn read_bstring0(&self, pos: usize) -> SliceReadResult<&'a [u8]>;
    fn nread_bstring0(&self, pos: usize, len: usize) -> SliceReadResult<&'a [u8]>;
}

macro_rules! checked_read {
    ( $buf:ident, $type:ident, $off:expr, $conv:ident ) => {
        match $off
            .checked_add(size_of::<$type>())
            .and_then(|end| $buf.get($off..end))
        {
            Some(bytes) => {
                let mut raw = [0u8; size_of::<$type>()];
                raw.copy_from_slice(bytes);
                Ok($type::$conv(raw))
            }
            None => Err(SliceReadError::InvalidOffset($off, size_of::<$type>())),
        }
    };
}

impl<'a> SliceRead<'a> for &'a [u8] {
    fn read_be_u32(&self, pos: usize) -> SliceReadResult<u32> {
        checked_read!(self, u32, pos, from_be_bytes)
    }

    fn read_be_u64(&self, pos: usize) -> SliceReadResult<u64> {
        checked_read!(self, u64, pos, from_be_bytes)
    }

    fn read_le_u16(&self, pos: usize) -> SliceReadResult<u16> {
        checked_read!(self, u16, pos, from_le_bytes)
    }

    fn read_le_u32(&self, pos: usize) -> SliceReadResult<u32> {
        checked_read!(self, u32, pos, from_le_bytes)
    }

    fn read_le_u64(&self, pos: usize) -> SliceReadResult<u64> {
        checked_read!(self, u64, pos, from_le_bytes)
    }

    fn read_le_i32(&self, pos: usize) -> SliceReadResult<i32> {
        checked_read!(self, i32, pos, from_le_bytes)
    }

    fn read_bytes(&self, pos: usize, len: usize) -> SliceReadResult<&'a [u8]> {
        let buf: &'a [u8] = *self;
        pos.checked_add(len)
            .and_then(|end| buf.get(pos..end))
            .ok_or(SliceReadError::InvalidOffset(pos, len))
    }

    fn read_bstring0(&self, pos: usize) -> SliceReadResult<&'a [u8]> {
        let buf: &'a [u8] = *self;
        let tail = buf.get(pos..).ok_or(SliceReadError::UnexpectedEndOfInput)?;
        match tail.iter().position(|&b| b == 0) {
            Some(nul) => Ok(&tail[..nul]),
            None => Err(SliceReadError::UnexpectedEndOfInput),
        }
    }

    fn nread_bstring0(&self, pos: usize, len: usize) -> SliceReadResult<&'a [u8]> {
        let buf: &'a [u8] = *self;
        let tail = buf.get(pos..).ok_or(SliceReadError::UnexpectedEndOfInput)?;
        let window = &tail[..core::cmp::min(len, tail.len())];
        match window.iter().position(|&b| b == 0) {
            Some(nul) => Ok(&tail[..nul]),
            None => Err(SliceReadError::UnexpectedEndOfInput),
        }
    }
}

/// Bytes of `buf` before the first NUL, or all of it when unterminated.
pub(crate) fn until_nul(buf: &[u8]) -> &[u8] {
    match buf.iter().position(|&b| b == 0) {
        Some(nul) => &buf[..nul],
        None => buf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_bounds_checked() {
        let buf: &[u8] = &[0xd0, 0x0d, 0xfe, 0xed, 0x01];
        assert_eq!(buf.read_be_u32(0), Ok(0xd00d_feed));
        assert_eq!(buf.read_le_u32(0), Ok(0xedfe_0dd0));
        assert_eq!(buf.read_be_u32(2), Err(SliceReadError::InvalidOffset(2, 4)));
        assert_eq!(
            buf.read_be_u64(usize::MAX - 2),
            Err(SliceReadError::InvalidOffset(usize::MAX - 2, 8))
        );
    }

    #[test]
    fn strings_stop_at_nul() {
        let buf: &[u8] = b"abc\0def";
        assert_eq!(buf.read_bstring0(0), Ok(&b"abc"[..]));
        assert_eq!(buf.read_bstring0(4), Err(SliceReadError::UnexpectedEndOfInput));
        assert_eq!(buf.nread_bstring0(0, 3), Err(SliceReadError::UnexpectedEndOfInput));
        assert_eq!(buf.nread_bstring0(0, 4), Ok(&b"abc"[..]));
        assert_eq!(until_nul(b"env\0\0junk"), b"env");
        assert_eq!(until_nul(b"full"), b"full");
    }
}
