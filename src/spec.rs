//! On-media layouts: FDT tokens and headers, the EPT table and the vendor wrappers around device
//! trees.

use core::mem::size_of;

use endian_type_rs::types::u32_be;
use num_derive::FromPrimitive;
use static_assertions::const_assert_eq;

pub const FDT_MAGIC: u32 = 0xd00d_feed;

#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdtTok {
    BeginNode = 0x1,
    EndNode = 0x2,
    Prop = 0x3,
    Nop = 0x4,
    End = 0x9,
}

// As defined by the Devicetree Specification. Only field positions are taken from these; values
// go through the checked readers in `priv_util`.
#[repr(C)]
pub struct fdt_header {
    pub magic: u32_be,
    pub totalsize: u32_be,
    pub off_dt_struct: u32_be,
    pub off_dt_strings: u32_be,
    pub off_mem_rsvmap: u32_be,
    pub version: u32_be,
    pub last_comp_version: u32_be,
    pub boot_cpuid_phys: u32_be,
    pub size_dt_strings: u32_be,
    pub size_dt_struct: u32_be,
}

#[repr(C)]
pub struct fdt_prop_header {
    pub len: u32_be,
    pub nameoff: u32_be,
}

pub const FDT_HEADER_SIZE: usize = size_of::<fdt_header>();
pub const FDT_PROP_HEADER_SIZE: usize = size_of::<fdt_prop_header>();

const_assert_eq!(FDT_HEADER_SIZE, 40);
const_assert_eq!(FDT_PROP_HEADER_SIZE, 8);

/// Longest node name (including the terminator) the walker will accept.
pub const MAX_NODE_NAME_LEN: usize = 256;

/// Size of the NUL-padded name field of a partition, terminator included.
pub const PARTITION_NAME_LEN: usize = 16;
/// Slots in an EPT, and the most partitions any table or `/partitions` node may hold.
pub const MAX_PARTITIONS: usize = 32;

pub const EPT_MAGIC: [u8; 4] = *b"MPT\0";
pub const EPT_VERSION: [u8; 12] = *b"01.00.00\0\0\0\0";
pub const EPT_HEADER_SIZE: usize = 24;
pub const EPT_PARTITION_SIZE: usize = 40;
pub const EPT_TABLE_SIZE: usize = EPT_HEADER_SIZE + EPT_PARTITION_SIZE * MAX_PARTITIONS;

const_assert_eq!(EPT_TABLE_SIZE, 1304);
const_assert_eq!(EPT_PARTITION_SIZE, PARTITION_NAME_LEN + 8 + 8 + 4 + 4);

/// Byte positions of the fields of one 40-byte EPT partition slot.
pub(crate) mod ept_slot {
    pub const NAME: usize = 0;
    pub const SIZE: usize = 16;
    pub const OFFSET: usize = 24;
    pub const MASK: usize = 32;
    pub const PADDING: usize = 36;
}

/// Byte positions of the fields of the 24-byte EPT header.
pub(crate) mod ept_header {
    pub const MAGIC: usize = 0;
    pub const VERSION: usize = 4;
    pub const COUNT: usize = 16;
    pub const CHECKSUM: usize = 20;
}

pub const MASK_BOOT: u32 = 1;
pub const MASK_SYSTEM: u32 = 2;
pub const MASK_DATA: u32 = 4;

/// Size value of a device-tree partition that takes whatever space is left on the device.
pub const AUTOFILL_SIZE: u64 = u64::MAX;

/// Erase-block alignment every offset and size is rounded to.
pub const PARTITION_ALIGNMENT: u64 = 0x1000;

/// First four bytes of a plain FDT read as a little-endian word.
pub const DTB_MAGIC_PLAIN: u32 = 0xEDFE_0DD0;
/// `"AML_"`, first four bytes of a vendor multi-DTB container read as a little-endian word.
pub const DTB_MAGIC_MULTI: u32 = 0x5F4C_4D41;
/// First two bytes of a gzip member read as a little-endian half-word.
pub const GZIP_MAGIC: u16 = 0x8b1f;

pub const MULTI_DTB_HEADER_SIZE: usize = 12;
/// Each embedded DTB of a rebuilt multi-DTB container starts on this boundary.
pub const MULTI_DTB_ALIGNMENT: usize = 4;

/// Upper bound on what a gzip-wrapped DTB may inflate to.
pub const MAX_INFLATED_DTB_SIZE: usize = 0x100_0000;

/// One copy of the DTB inside the reserved partition, trailer included.
pub const DTB_COPY_SIZE: usize = 0x40000;
/// `{magic, version, timestamp, checksum}` closing each DTB copy.
pub const DTB_TRAILER_SIZE: usize = 16;
/// Offset of the DTB area inside the reserved partition.
pub const DTB_AREA_OFFSET: u64 = 0x40_0000;

pub const PARTITION_BOOTLOADER_NAME: &str = "bootloader";
pub const PARTITION_BOOTLOADER_SIZE: u64 = 0x40_0000;
pub const PARTITION_RESERVED_NAME: &str = "reserved";
pub const PARTITION_RESERVED_SIZE: u64 = 0x400_0000;
pub const PARTITION_CACHE_NAME: &str = "cache";
pub const PARTITION_CACHE_SIZE: u64 = 0;
pub const PARTITION_ENV_NAME: &str = "env";
pub const PARTITION_ENV_SIZE: u64 = 0x80_0000;

pub const GAP_RESERVED: u64 = 0x200_0000;
pub const GAP_PARTITION: u64 = 0x80_0000;
