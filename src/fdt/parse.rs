//! Low level flattened device tree parsing functions.
//!

use memoffset::offset_of;
use num_traits::FromPrimitive;

use fallible_iterator::FallibleIterator;

use crate::error::FormatError;
use crate::priv_util::SliceRead;
use crate::spec::{fdt_prop_header, FdtTok, FDT_PROP_HEADER_SIZE, MAX_NODE_NAME_LEN};

const fn align_token(offset: usize) -> usize {
    (offset + 3) & !3
}

/// This function implements the logic to tokenize the device tree's main structure block.
///
/// `buf` must be the structure block itself, so that token offsets are relative to its start and
/// the 4-byte token alignment holds. On success `off` is moved to the start of the next token.
pub fn next_devtree_token<'dt>(buf: &'dt [u8], off: &mut usize) -> Result<Token<'dt>, FormatError> {
    let at = *off;
    let fdt_tok_val = buf.read_be_u32(at)?;
    *off = at + 4;

    match FromPrimitive::from_u32(fdt_tok_val) {
        Some(FdtTok::BeginNode) => {
            // Read the name (or return an error if the device tree is incorrectly formatted).
            let name = buf.nread_bstring0(*off, MAX_NODE_NAME_LEN)?;
            *off = align_token(*off + name.len() + 1);
            Ok(Token::BeginNode(name))
        }
        Some(FdtTok::Prop) => {
            let len = buf.read_be_u32(*off + offset_of!(fdt_prop_header, len))? as usize;
            let name_offset = buf.read_be_u32(*off + offset_of!(fdt_prop_header, nameoff))?;
            *off += FDT_PROP_HEADER_SIZE;
            let value = buf.read_bytes(*off, len)?;
            *off = align_token(*off + len);
            Ok(Token::Prop(ParsedProp {
                offset: at,
                name_offset,
                value,
            }))
        }
        Some(FdtTok::EndNode) => Ok(Token::EndNode),
        Some(FdtTok::Nop) => Ok(Token::Nop),
        Some(FdtTok::End) => Ok(Token::End),
        None => Err(FormatError::InvalidToken {
            offset: at,
            token: fdt_tok_val,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedProp<'dt> {
    /// Offset of the PROP token within the structure block.
    pub offset: usize,
    pub name_offset: u32,
    pub value: &'dt [u8],
}

/// Enumeration of all tokens within a device tree's structure block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'dt> {
    BeginNode(&'dt [u8]),
    EndNode,
    Prop(ParsedProp<'dt>),
    Nop,
    End,
}

/// A position in the structure block from which tokens are read one at a time.
#[derive(Debug, Clone)]
pub struct Cursor<'dt> {
    buf: &'dt [u8],
    position: usize,
    finished: bool,
}

impl<'dt> Cursor<'dt> {
    #[must_use]
    pub fn new(buf: &'dt [u8]) -> Self {
        Self::at(buf, 0)
    }

    #[must_use]
    pub fn at(buf: &'dt [u8], position: usize) -> Self {
        Self {
            buf,
            position,
            finished: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    #[must_use]
    pub fn limit(&self) -> usize {
        self.buf.len()
    }

    pub fn next_token(&mut self) -> Result<Token<'dt>, FormatError> {
        next_devtree_token(self.buf, &mut self.position)
    }

    /// Skips the rest of a node whose BEGIN_NODE was just read, children included.
    ///
    /// Returns the offset of the matching END_NODE token; the cursor is left just past it.
    pub fn skip_node(&mut self) -> Result<usize, FormatError> {
        let start = self.position;
        let mut depth = 0usize;
        loop {
            let at = self.position;
            match self.next_token()? {
                Token::BeginNode(_) => depth += 1,
                Token::EndNode if depth == 0 => return Ok(at),
                Token::EndNode => depth -= 1,
                Token::End => return Err(FormatError::UnterminatedNode(start)),
                Token::Prop(_) | Token::Nop => (),
            }
        }
    }
}

impl<'dt> FallibleIterator for Cursor<'dt> {
    type Error = FormatError;
    type Item = Token<'dt>;

    fn next(&mut self) -> Result<Option<Self::Item>, Self::Error> {
        if self.finished {
            return Ok(None);
        }
        match self.next_token()? {
            Token::End => {
                self.finished = true;
                Ok(None)
            }
            tok => Ok(Some(tok)),
        }
    }
}
