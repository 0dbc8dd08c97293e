//! Emitting structure-block tokens and whole FDT blobs.

use crate::spec::{FdtTok, FDT_HEADER_SIZE, FDT_MAGIC};

use super::stringblock::StringBlock;
use super::tree::FdtHeader;

const LAST_VERSION: u32 = 17;
const LAST_COMP_VERSION: u32 = 16;

fn align(vec: &mut Vec<u8>) {
    let new_len = (vec.len() + 3) & !3;
    vec.resize(new_len, 0);
}

/// Appends tokens to a structure block, naming properties through a [`StringBlock`].
#[derive(Debug)]
pub struct StructWriter<'s, 'dt> {
    buf: Vec<u8>,
    strings: &'s mut StringBlock<'dt>,
}

impl<'s, 'dt> StructWriter<'s, 'dt> {
    pub fn new(strings: &'s mut StringBlock<'dt>) -> Self {
        Self {
            buf: Vec::new(),
            strings,
        }
    }

    pub fn begin_node(&mut self, name: &str) -> &mut Self {
        self.buf.extend_from_slice(&(FdtTok::BeginNode as u32).to_be_bytes());
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
        align(&mut self.buf);
        self
    }

    pub fn end_node(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&(FdtTok::EndNode as u32).to_be_bytes());
        self
    }

    pub fn end(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&(FdtTok::End as u32).to_be_bytes());
        self
    }

    pub fn prop(&mut self, name: &str, value: &[u8]) -> &mut Self {
        let name_offset = self.strings.append_safely(name);
        self.buf.extend_from_slice(&(FdtTok::Prop as u32).to_be_bytes());
        self.buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(&name_offset.to_be_bytes());
        self.buf.extend_from_slice(value);
        align(&mut self.buf);
        self
    }

    pub fn prop_u32(&mut self, name: &str, value: u32) -> &mut Self {
        self.prop(name, &value.to_be_bytes())
    }

    pub fn prop_u64(&mut self, name: &str, value: u64) -> &mut Self {
        self.prop(name, &value.to_be_bytes())
    }

    /// A string property, stored NUL-terminated.
    pub fn prop_str(&mut self, name: &str, value: &str) -> &mut Self {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        self.prop(name, &bytes)
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Lays out a complete FDT: header, memory reservation block, structure block and strings.
///
/// `rsvmap` must already contain the terminating empty entry.
#[must_use]
pub fn assemble(base: &FdtHeader, rsvmap: &[u8], structure: &[u8], strings: &[u8]) -> Vec<u8> {
    let mut dtb = vec![0u8; FDT_HEADER_SIZE];
    // the reservation block is 8-byte aligned
    dtb.resize((dtb.len() + 7) & !7, 0);
    let off_mem_rsvmap = dtb.len();
    dtb.extend_from_slice(rsvmap);
    align(&mut dtb);
    let off_dt_struct = dtb.len();
    dtb.extend_from_slice(structure);
    let off_dt_strings = dtb.len();
    dtb.extend_from_slice(strings);

    let header = FdtHeader {
        magic: FDT_MAGIC,
        totalsize: dtb.len() as u32,
        off_dt_struct: off_dt_struct as u32,
        off_dt_strings: off_dt_strings as u32,
        off_mem_rsvmap: off_mem_rsvmap as u32,
        version: if base.version == 0 { LAST_VERSION } else { base.version },
        last_comp_version: if base.last_comp_version == 0 {
            LAST_COMP_VERSION
        } else {
            base.last_comp_version
        },
        boot_cpuid_phys: base.boot_cpuid_phys,
        size_dt_strings: strings.len() as u32,
        size_dt_struct: structure.len() as u32,
    };
    dtb[..FDT_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    dtb
}

/// The memory reservation block with no reservations, only its terminator.
pub const EMPTY_RSVMAP: [u8; 16] = [0u8; 16];
