use std::borrow::Cow;
use std::collections::HashSet;

use log::{debug, info};

use crate::config::LayoutOptions;
use crate::dtb::DtbPartition;
use crate::error::{FormatError, LayoutError, ValidationError};
use crate::priv_util::{until_nul, SliceRead};
use crate::spec::{
    ept_header, AUTOFILL_SIZE, EPT_HEADER_SIZE, EPT_MAGIC, EPT_PARTITION_SIZE, EPT_TABLE_SIZE,
    EPT_VERSION, MAX_PARTITIONS, PARTITION_BOOTLOADER_NAME, PARTITION_BOOTLOADER_SIZE,
    PARTITION_CACHE_NAME, PARTITION_CACHE_SIZE, PARTITION_ENV_NAME, PARTITION_ENV_SIZE,
    PARTITION_RESERVED_NAME, PARTITION_RESERVED_SIZE,
};

use super::partition::{validate_partition_name, Partition};

/// Names of the partitions every vendor layout starts with, in order.
pub const PEDANTIC_NAMES: [&str; 4] = [
    PARTITION_BOOTLOADER_NAME,
    PARTITION_RESERVED_NAME,
    PARTITION_CACHE_NAME,
    PARTITION_ENV_NAME,
];

/// Names that only exist in the EPT and never appear as DTB partitions.
const EPT_ONLY_NAMES: [&str; 3] = [
    PARTITION_BOOTLOADER_NAME,
    PARTITION_RESERVED_NAME,
    PARTITION_ENV_NAME,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: [u8; 12],
    pub partitions_count: i32,
    pub checksum: u32,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            magic: EPT_MAGIC,
            version: EPT_VERSION,
            partitions_count: 0,
            checksum: 0,
        }
    }
}

impl Header {
    pub fn from_bytes(buf: &[u8]) -> Result<Self, FormatError> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(buf.read_bytes(ept_header::MAGIC, 4)?);
        let mut version = [0u8; 12];
        version.copy_from_slice(buf.read_bytes(ept_header::VERSION, 12)?);
        Ok(Self {
            magic,
            version,
            partitions_count: buf.read_le_i32(ept_header::COUNT)?,
            checksum: buf.read_le_u32(ept_header::CHECKSUM)?,
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; EPT_HEADER_SIZE] {
        let mut buf = [0u8; EPT_HEADER_SIZE];
        buf[ept_header::MAGIC..ept_header::VERSION].copy_from_slice(&self.magic);
        buf[ept_header::VERSION..ept_header::COUNT].copy_from_slice(&self.version);
        buf[ept_header::COUNT..ept_header::CHECKSUM]
            .copy_from_slice(&self.partitions_count.to_le_bytes());
        buf[ept_header::CHECKSUM..].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// The magic read as one little-endian word, `0x0054504D` when valid.
    #[inline]
    #[must_use]
    pub fn magic_u32(&self) -> u32 {
        u32::from_le_bytes(self.magic)
    }

    #[must_use]
    pub fn magic_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(until_nul(&self.magic))
    }

    /// The version read as three little-endian words.
    #[must_use]
    pub fn version_u32(&self) -> [u32; 3] {
        let mut words = [0u32; 3];
        for (word, chunk) in words.iter_mut().zip(self.version.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        words
    }

    #[must_use]
    pub fn version_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(until_nul(&self.version))
    }
}

/// The EPT checksum as the vendor bootloader computes it.
///
/// Only the first partition is summed, once per counted partition: its ten little-endian words
/// are added `count` times with wrapping arithmetic.
#[must_use]
pub fn checksum(partitions: &[Partition], count: u32) -> u32 {
    let first = match partitions.first() {
        Some(first) => first.to_bytes(),
        None => return 0,
    };
    let once = first.chunks_exact(4).fold(0u32, |sum, word| {
        sum.wrapping_add(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
    });
    once.wrapping_mul(count)
}

/// An EPT: header plus the partitions it counts.
///
/// Slots past the count are not kept and serialise as zeros.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub header: Header,
    pub partitions: Vec<Partition>,
}

impl Table {
    /// The vendor's default table: bootloader, reserved, cache and env, offsets still unset.
    #[must_use]
    pub fn vendor_default() -> Self {
        let defaults = [
            (PARTITION_BOOTLOADER_NAME, PARTITION_BOOTLOADER_SIZE),
            (PARTITION_RESERVED_NAME, PARTITION_RESERVED_SIZE),
            (PARTITION_CACHE_NAME, PARTITION_CACHE_SIZE),
            (PARTITION_ENV_NAME, PARTITION_ENV_SIZE),
        ];
        let mut table = Self::default();
        for (name, size) in defaults.iter() {
            let mut part = Partition::default();
            // the vendor names are known to be valid
            if part.set_name(name).is_ok() {
                part.size = *size;
                table.partitions.push(part);
            }
        }
        table.update_header();
        table
    }

    /// The vendor default table with its offsets filled in for a device of `capacity` bytes.
    pub fn vendor_layout(capacity: u64, options: &LayoutOptions) -> Result<Self, LayoutError> {
        let mut table = Self::vendor_default();
        table.pedantic_fill_offsets(capacity, options.gap_reserved, options.gap_partition)?;
        table.update_header();
        Ok(table)
    }

    /// Parses a 1304-byte table. Only the structure is checked, see [`Table::validate`].
    pub fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < EPT_TABLE_SIZE {
            return Err(FormatError::Truncated {
                offset: buf.len(),
                len: EPT_TABLE_SIZE - buf.len(),
            });
        }
        let header = Header::from_bytes(buf)?;
        let slots = header.partitions_count.clamp(0, MAX_PARTITIONS as i32) as usize;
        let mut partitions = Vec::with_capacity(slots);
        for i in 0..slots {
            let start = EPT_HEADER_SIZE + i * EPT_PARTITION_SIZE;
            partitions.push(Partition::from_bytes(&buf[start..start + EPT_PARTITION_SIZE])?);
        }
        Ok(Self { header, partitions })
    }

    /// Serialises the table to its 1304-byte on-disk form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; EPT_TABLE_SIZE];
        buf[..EPT_HEADER_SIZE].copy_from_slice(&self.header.to_bytes());
        for (i, part) in self.partitions.iter().take(MAX_PARTITIONS).enumerate() {
            let start = EPT_HEADER_SIZE + i * EPT_PARTITION_SIZE;
            buf[start..start + EPT_PARTITION_SIZE].copy_from_slice(&part.to_bytes());
        }
        buf
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Slot index of the partition called `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.partitions
            .iter()
            .position(|part| part.name_bytes() == name.as_bytes())
    }

    /// Resets magic and version, and sets count and checksum from the partitions.
    pub fn update_header(&mut self) {
        let count = self.partitions.len() as u32;
        self.header.magic = EPT_MAGIC;
        self.header.version = EPT_VERSION;
        self.header.partitions_count = count as i32;
        self.header.checksum = checksum(&self.partitions, count);
    }

    /// Checks count, magic, version and checksum of the header as recorded.
    ///
    /// The checksum is only verified for counts below 32, like the bootloader does.
    pub fn validate_header(&self) -> Result<(), ValidationError> {
        let count = self.header.partitions_count;
        if !(0..=MAX_PARTITIONS as i32).contains(&count) {
            return Err(ValidationError::BadPartitionCount(count));
        }
        if self.header.magic != EPT_MAGIC {
            return Err(ValidationError::BadMagic {
                found: self.header.magic,
            });
        }
        if self.header.version != EPT_VERSION {
            return Err(ValidationError::BadVersion {
                found: self.header.version,
            });
        }
        if (count as usize) < MAX_PARTITIONS {
            let computed = checksum(&self.partitions, count as u32);
            if computed != self.header.checksum {
                return Err(ValidationError::ChecksumMismatch {
                    recorded: self.header.checksum,
                    computed,
                });
            }
        }
        Ok(())
    }

    /// Header checks plus name legality and uniqueness of every counted partition.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_header()?;
        let mut seen = HashSet::new();
        for (index, part) in self.partitions.iter().enumerate() {
            validate_partition_name(part.raw_name()).map_err(|reason| {
                ValidationError::InvalidName {
                    index,
                    name: part.name().into_owned(),
                    reason,
                }
            })?;
            if !seen.insert(part.name_bytes()) {
                return Err(ValidationError::DuplicateName(part.name().into_owned()));
            }
        }
        Ok(())
    }

    /// The end of the furthest partition, the smallest device that can hold the table.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.partitions
            .iter()
            .map(|part| part.offset.saturating_add(part.size))
            .max()
            .unwrap_or(0)
    }

    /// Whether the table starts with bootloader, reserved, cache and env.
    #[must_use]
    pub fn has_pedantic_names(&self) -> bool {
        self.partitions.len() >= PEDANTIC_NAMES.len()
            && self
                .partitions
                .iter()
                .zip(PEDANTIC_NAMES.iter())
                .all(|(part, name)| part.name_bytes() == name.as_bytes())
    }

    /// Recomputes every offset the way the vendor bootloader lays partitions out.
    ///
    /// bootloader sits at 0 and reserved `gap_reserved` after it; each later partition follows
    /// its predecessor after `gap_partition`. Auto-fill sizes, and sizes running past `capacity`,
    /// are clamped to end at `capacity`.
    pub fn pedantic_fill_offsets(
        &mut self,
        capacity: u64,
        gap_reserved: u64,
        gap_partition: u64,
    ) -> Result<(), LayoutError> {
        if !self.has_pedantic_names() {
            return Err(LayoutError::UnsupportedLayout {
                found: self
                    .partitions
                    .iter()
                    .take(PEDANTIC_NAMES.len())
                    .map(|part| part.name().into_owned())
                    .collect(),
            });
        }
        self.partitions[0].offset = 0;
        for i in 1..self.partitions.len() {
            let (before, rest) = self.partitions.split_at_mut(i);
            let last = &before[i - 1];
            let current = &mut rest[0];
            let gap = if i == 1 { gap_reserved } else { gap_partition };
            let base = if i == 1 { 0 } else { last.offset };
            current.offset = base
                .checked_add(last.size)
                .and_then(|end| end.checked_add(gap))
                .ok_or_else(|| LayoutError::ArithmeticOverflow(current.name().into_owned()))?;
            if current.offset > capacity {
                return Err(LayoutError::Overflow {
                    name: current.name().into_owned(),
                    offset: current.offset,
                    capacity,
                });
            }
            if i > 1
                && (current.size == AUTOFILL_SIZE
                    || current.end().map_or(true, |end| end > capacity))
            {
                current.size = capacity - current.offset;
            }
        }
        info!("layout now compatible with the vendor bootloader");
        Ok(())
    }

    /// Whether the offsets already are what [`Table::pedantic_fill_offsets`] would compute.
    #[must_use]
    pub fn is_pedantic(&self, options: &LayoutOptions) -> bool {
        let mut filled = self.clone();
        filled
            .pedantic_fill_offsets(self.capacity(), options.gap_reserved, options.gap_partition)
            .is_ok()
            && filled.partitions == self.partitions
    }

    /// Byte-for-byte equality of the serialised tables.
    #[must_use]
    pub fn compare(&self, other: &Table) -> bool {
        self.to_bytes() == other.to_bytes()
    }

    /// Builds a table from DTB partitions (dtoe).
    ///
    /// Records named like a vendor default partition replace its size and mask, the others are
    /// appended in order; offsets are then filled in pedantically.
    pub fn from_dtb(
        records: &[DtbPartition],
        capacity: u64,
        options: &LayoutOptions,
    ) -> crate::error::Result<Self> {
        let mut table = Self::vendor_default();
        for record in records {
            match table.find(&record.name) {
                Some(index) => {
                    let part = &mut table.partitions[index];
                    part.size = record.size;
                    part.mask = record.mask;
                }
                None => {
                    if table.partitions.len() >= MAX_PARTITIONS {
                        return Err(FormatError::TooManyPartitions.into());
                    }
                    let part = Partition::new(&record.name, 0, record.size, record.mask).map_err(
                        |reason| ValidationError::InvalidName {
                            index: table.partitions.len(),
                            name: record.name.clone(),
                            reason,
                        },
                    )?;
                    table.partitions.push(part);
                }
            }
        }
        table.pedantic_fill_offsets(capacity, options.gap_reserved, options.gap_partition)?;
        table.update_header();
        debug!("converted {} DTB partitions into {} EPT slots", records.len(), table.len());
        Ok(table)
    }

    /// The DTB partitions describing this table (etod).
    ///
    /// bootloader, reserved and env are left out. The last record becomes auto-fill when its
    /// partition ends where the table does.
    #[must_use]
    pub fn to_dtb(&self) -> Vec<DtbPartition> {
        let capacity = self.capacity();
        let mut records: Vec<DtbPartition> = self
            .partitions
            .iter()
            .filter(|part| {
                !EPT_ONLY_NAMES
                    .iter()
                    .any(|name| part.name_bytes() == name.as_bytes())
            })
            .map(|part| DtbPartition {
                name: part.name().into_owned(),
                size: part.size,
                mask: part.mask,
                ..DtbPartition::default()
            })
            .collect();
        let last_ends_table = self
            .partitions
            .iter()
            .rev()
            .find(|part| {
                !EPT_ONLY_NAMES
                    .iter()
                    .any(|name| part.name_bytes() == name.as_bytes())
            })
            .map_or(false, |part| part.end() == Some(capacity));
        if let (true, Some(last)) = (last_ends_table, records.last_mut()) {
            last.size = AUTOFILL_SIZE;
        }
        records
    }
}

/// Byte-for-byte equality of two tables.
#[must_use]
pub fn compare(a: &Table, b: &Table) -> bool {
    a.compare(b)
}
