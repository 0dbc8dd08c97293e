use core::mem::size_of;

use fallible_iterator::FallibleIterator;
use memoffset::offset_of;

use crate::error::FormatError;
use crate::priv_util::SliceRead;
use crate::spec::{fdt_header, FDT_HEADER_SIZE, FDT_MAGIC};

use super::parse::{Cursor, ParsedProp, Token};
use super::stringblock::StringBlock;

type Result<T> = core::result::Result<T, FormatError>;

const fn is_aligned<T>(offset: usize) -> bool {
    offset % size_of::<T>() == 0
}

macro_rules! get_be32_field {
    ( $f:ident, $s:ident , $buf:expr ) => {
        $buf.read_be_u32(offset_of!($s, $f))
    };
}

macro_rules! put_be32_field {
    ( $f:ident, $s:ident , $buf:expr, $val:expr ) => {
        $buf[offset_of!($s, $f)..offset_of!($s, $f) + 4].copy_from_slice(&$val.to_be_bytes())
    };
}

/// The header fields of an FDT in native byte order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FdtHeader {
    pub magic: u32,
    pub totalsize: u32,
    pub off_dt_struct: u32,
    pub off_dt_strings: u32,
    pub off_mem_rsvmap: u32,
    pub version: u32,
    pub last_comp_version: u32,
    pub boot_cpuid_phys: u32,
    pub size_dt_strings: u32,
    pub size_dt_struct: u32,
}

impl FdtHeader {
    pub fn read(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            magic: get_be32_field!(magic, fdt_header, buf)?,
            totalsize: get_be32_field!(totalsize, fdt_header, buf)?,
            off_dt_struct: get_be32_field!(off_dt_struct, fdt_header, buf)?,
            off_dt_strings: get_be32_field!(off_dt_strings, fdt_header, buf)?,
            off_mem_rsvmap: get_be32_field!(off_mem_rsvmap, fdt_header, buf)?,
            version: get_be32_field!(version, fdt_header, buf)?,
            last_comp_version: get_be32_field!(last_comp_version, fdt_header, buf)?,
            boot_cpuid_phys: get_be32_field!(boot_cpuid_phys, fdt_header, buf)?,
            size_dt_strings: get_be32_field!(size_dt_strings, fdt_header, buf)?,
            size_dt_struct: get_be32_field!(size_dt_struct, fdt_header, buf)?,
        })
    }

    /// Encodes the header big-endian.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; FDT_HEADER_SIZE] {
        let mut buf = [0u8; FDT_HEADER_SIZE];
        put_be32_field!(magic, fdt_header, buf, self.magic);
        put_be32_field!(totalsize, fdt_header, buf, self.totalsize);
        put_be32_field!(off_dt_struct, fdt_header, buf, self.off_dt_struct);
        put_be32_field!(off_dt_strings, fdt_header, buf, self.off_dt_strings);
        put_be32_field!(off_mem_rsvmap, fdt_header, buf, self.off_mem_rsvmap);
        put_be32_field!(version, fdt_header, buf, self.version);
        put_be32_field!(last_comp_version, fdt_header, buf, self.last_comp_version);
        put_be32_field!(boot_cpuid_phys, fdt_header, buf, self.boot_cpuid_phys);
        put_be32_field!(size_dt_strings, fdt_header, buf, self.size_dt_strings);
        put_be32_field!(size_dt_struct, fdt_header, buf, self.size_dt_struct);
        buf
    }
}

/// A node located in the structure block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef<'dt> {
    pub name: &'dt [u8],
    /// Offset of the node's BEGIN_NODE token.
    pub begin: usize,
    /// Offset of the first token after the node name.
    pub body: usize,
}

/// A parseable Flattened Device Tree.
///
/// Offsets handed out by this type and by [`Cursor`] are relative to the start of the structure
/// block.
#[derive(Copy, Clone, Debug)]
pub struct DevTree<'dt> {
    buf: &'dt [u8],
    header: FdtHeader,
}

impl<'dt> DevTree<'dt> {
    pub const MIN_HEADER_SIZE: usize = FDT_HEADER_SIZE;

    /// Verify the magic header of a Device Tree buffer
    #[inline]
    pub fn verify_magic(buf: &[u8]) -> Result<()> {
        let magic = get_be32_field!(magic, fdt_header, buf)?;
        if magic != FDT_MAGIC {
            Err(FormatError::InvalidMagicNumber(magic))
        } else {
            Ok(())
        }
    }

    /// Using the provided byte slice this method will:
    ///
    /// 1. Verify that the slice begins with the magic Device Tree header
    /// 2. Return the reported `totalsize` field of the Device Tree header
    #[inline]
    pub fn read_totalsize(buf: &[u8]) -> Result<usize> {
        Self::verify_magic(buf)?;
        Ok(get_be32_field!(totalsize, fdt_header, buf)? as usize)
    }

    /// Construct the parseable DevTree object from the provided byte slice.
    ///
    /// The slice may be longer than the tree; everything past `totalsize` is ignored.
    pub fn new(buf: &'dt [u8]) -> Result<Self> {
        let totalsize = Self::read_totalsize(buf)?;
        if totalsize > buf.len() {
            return Err(FormatError::Truncated {
                offset: buf.len(),
                len: totalsize - buf.len(),
            });
        }
        let buf = &buf[..totalsize];
        let header = FdtHeader::read(buf)?;

        let within = |offset: u32, size: u32| {
            (offset as usize)
                .checked_add(size as usize)
                .map_or(false, |end| end <= totalsize && offset as usize >= FDT_HEADER_SIZE)
        };
        if !is_aligned::<u32>(header.off_dt_struct as usize)
            || !within(header.off_dt_struct, header.size_dt_struct)
        {
            return Err(FormatError::InvalidHeader("structure block out of bounds"));
        }
        if !within(header.off_dt_strings, header.size_dt_strings) {
            return Err(FormatError::InvalidHeader("strings block out of bounds"));
        }
        if !is_aligned::<u64>(header.off_mem_rsvmap as usize) || !within(header.off_mem_rsvmap, 0) {
            return Err(FormatError::InvalidHeader("memory reservation block out of bounds"));
        }

        Ok(Self { buf, header })
    }

    #[inline]
    #[must_use]
    pub fn buf(&self) -> &'dt [u8] {
        self.buf
    }

    #[inline]
    #[must_use]
    pub fn header(&self) -> &FdtHeader {
        &self.header
    }

    #[inline]
    #[must_use]
    pub fn totalsize(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    #[must_use]
    pub fn off_dt_struct(&self) -> usize {
        self.header.off_dt_struct as usize
    }

    #[inline]
    #[must_use]
    pub fn off_dt_strings(&self) -> usize {
        self.header.off_dt_strings as usize
    }

    #[must_use]
    pub fn struct_block(&self) -> &'dt [u8] {
        let start = self.off_dt_struct();
        &self.buf[start..start + self.header.size_dt_struct as usize]
    }

    #[must_use]
    pub fn strings_block(&self) -> &'dt [u8] {
        let start = self.off_dt_strings();
        &self.buf[start..start + self.header.size_dt_strings as usize]
    }

    #[must_use]
    pub fn string_block(&self) -> StringBlock<'dt> {
        StringBlock::new(self.strings_block())
    }

    /// A cursor positioned at the first token of the structure block.
    #[must_use]
    pub fn cursor(&self) -> Cursor<'dt> {
        Cursor::new(self.struct_block())
    }

    #[must_use]
    pub fn cursor_at(&self, position: usize) -> Cursor<'dt> {
        Cursor::at(self.struct_block(), position)
    }

    /// The root node: the first BEGIN_NODE, with only NOPs allowed before it.
    pub fn root(&self) -> Result<NodeRef<'dt>> {
        let mut cursor = self.cursor();
        loop {
            let begin = cursor.position();
            match cursor.next_token()? {
                Token::Nop => continue,
                Token::BeginNode(name) => {
                    return Ok(NodeRef {
                        name,
                        begin,
                        body: cursor.position(),
                    })
                }
                _ => return Err(FormatError::MissingRoot),
            }
        }
    }

    /// The direct child of `parent` called `name`.
    pub fn find_child(&self, parent: &NodeRef<'dt>, name: &[u8]) -> Result<Option<NodeRef<'dt>>> {
        let mut cursor = self.cursor_at(parent.body);
        loop {
            let begin = cursor.position();
            match cursor.next_token()? {
                Token::BeginNode(child) if child == name => {
                    return Ok(Some(NodeRef {
                        name: child,
                        begin,
                        body: cursor.position(),
                    }))
                }
                Token::BeginNode(_) => {
                    cursor.skip_node()?;
                }
                Token::EndNode => return Ok(None),
                Token::End => return Err(FormatError::UnterminatedNode(parent.begin)),
                Token::Prop(_) | Token::Nop => (),
            }
        }
    }

    /// Looks a node up by absolute path, e.g. `/partitions`.
    pub fn find_node(&self, path: &str) -> Result<Option<NodeRef<'dt>>> {
        if !path.starts_with('/') {
            return Err(FormatError::InvalidPath(path.to_owned()));
        }
        let mut node = self.root()?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            match self.find_child(&node, segment.as_bytes())? {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    /// Offset just past the END_NODE closing `node`.
    pub fn node_end(&self, node: &NodeRef<'dt>) -> Result<usize> {
        let mut cursor = self.cursor_at(node.body);
        let end = cursor.skip_node()?;
        Ok(end + 4)
    }

    /// The properties of `node` itself, children excluded.
    #[must_use]
    pub fn props(&self, node: &NodeRef<'dt>) -> NodeProps<'dt> {
        NodeProps {
            cursor: self.cursor_at(node.body),
            done: false,
        }
    }

    /// Value of the property of `node` whose name sits at `name_offset` in the strings block.
    pub fn prop_value(&self, node: &NodeRef<'dt>, name_offset: u32) -> Result<Option<&'dt [u8]>> {
        Ok(self
            .props(node)
            .find(|prop| Ok(prop.name_offset == name_offset))?
            .map(|prop| prop.value))
    }

    /// The memory reservation block, up to and including its empty terminating entry.
    pub fn reservation_block(&self) -> Result<&'dt [u8]> {
        let start = self.header.off_mem_rsvmap as usize;
        let mut pos = start;
        loop {
            let address = self.buf.read_be_u64(pos)?;
            let size = self.buf.read_be_u64(pos + 8)?;
            pos += 16;
            if address == 0 && size == 0 {
                return Ok(&self.buf[start..pos]);
            }
        }
    }
}

/// Iterator over the properties that precede the first child of a node.
#[derive(Debug, Clone)]
pub struct NodeProps<'dt> {
    cursor: Cursor<'dt>,
    done: bool,
}

impl<'dt> FallibleIterator for NodeProps<'dt> {
    type Error = FormatError;
    type Item = ParsedProp<'dt>;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        while !self.done {
            match self.cursor.next_token()? {
                Token::Prop(prop) => return Ok(Some(prop)),
                Token::Nop => (),
                _ => self.done = true,
            }
        }
        Ok(None)
    }
}
