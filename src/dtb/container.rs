//! The outer containers a DTB is stored in: plain FDT, the vendor multi-DTB bundle, and gzip
//! around either.

use log::{debug, warn};

use crate::error::FormatError;
use crate::fdt::DevTree;
use crate::gzip::{is_gzip, Codec};
use crate::priv_util::SliceRead;
use crate::spec::{
    DTB_MAGIC_MULTI, DTB_MAGIC_PLAIN, MAX_INFLATED_DTB_SIZE, MULTI_DTB_ALIGNMENT,
    MULTI_DTB_HEADER_SIZE,
};

use super::compose::replace_partitions_node;
use super::partitions::{compare_partitions, dtb_partitions, DtbPartition, PartitionsHelper};

type Result<T> = core::result::Result<T, FormatError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtbKind {
    Plain,
    Multi,
    Gzipped,
}

/// Tells the container kind apart by its leading magic.
pub fn identify_type(buf: &[u8]) -> Result<DtbKind> {
    let magic = buf.read_le_u32(0)?;
    match magic {
        DTB_MAGIC_PLAIN => Ok(DtbKind::Plain),
        DTB_MAGIC_MULTI => Ok(DtbKind::Multi),
        _ if is_gzip(buf) => Ok(DtbKind::Gzipped),
        _ => Err(FormatError::UnrecognizedFormat(magic.to_le_bytes())),
    }
}

/// Width in bytes of each identifier field of a multi-DTB entry.
fn field_width(version: u32) -> Result<usize> {
    match version {
        1 => Ok(4),
        2 => Ok(16),
        other => Err(FormatError::UnsupportedMultiVersion(other)),
    }
}

/// Decodes an identifier stored as byte-swapped 4-byte ASCII chunks, space padded.
fn decode_identifier(field: &[u8]) -> String {
    let mut text = Vec::with_capacity(field.len());
    for chunk in field.chunks_exact(4) {
        if chunk.iter().all(|&b| b == 0) {
            continue;
        }
        text.extend(chunk.iter().rev());
    }
    while let Some(&(b' ' | 0)) = text.last() {
        text.pop();
    }
    String::from_utf8_lossy(&text).into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiDtbEntry {
    pub soc: String,
    pub platform: String,
    pub variant: String,
    /// The identifier fields exactly as stored, reused when the container is rebuilt.
    raw_id: Vec<u8>,
    pub offset: u32,
    pub size: u32,
}

impl MultiDtbEntry {
    /// `soc_platform_variant`, the name the entry is shown under.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}_{}_{}", self.soc, self.platform, self.variant)
    }

    #[must_use]
    pub fn raw_id(&self) -> &[u8] {
        &self.raw_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiDtb {
    pub version: u32,
    pub entries: Vec<MultiDtbEntry>,
}

/// Parses the header and entry table of a multi-DTB container.
pub fn parse_multi_entries(buf: &[u8]) -> Result<Vec<MultiDtbEntry>> {
    MultiDtb::parse(buf).map(|multi| multi.entries)
}

impl MultiDtb {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let magic = buf.read_le_u32(0)?;
        if magic != DTB_MAGIC_MULTI {
            return Err(FormatError::UnrecognizedFormat(magic.to_le_bytes()));
        }
        let version = buf.read_le_u32(4)?;
        let count = buf.read_le_u32(8)? as usize;
        let width = field_width(version)?;
        let stride = 3 * width + 8;

        let mut entries = Vec::new();
        for index in 0..count {
            let base = MULTI_DTB_HEADER_SIZE + index * stride;
            let raw_id = buf.read_bytes(base, 3 * width)?;
            let offset = buf.read_le_u32(base + 3 * width)?;
            let size = buf.read_le_u32(base + 3 * width + 4)?;
            let fits = (offset as usize)
                .checked_add(size as usize)
                .map_or(false, |end| end <= buf.len());
            if !fits {
                return Err(FormatError::EntryOutOfRange { index });
            }
            let entry = MultiDtbEntry {
                soc: decode_identifier(&raw_id[..width]),
                platform: decode_identifier(&raw_id[width..2 * width]),
                variant: decode_identifier(&raw_id[2 * width..]),
                raw_id: raw_id.to_vec(),
                offset,
                size,
            };
            debug!(
                "multi-DTB entry {}: {} at {:#x}, {} bytes",
                index,
                entry.target(),
                offset,
                size
            );
            entries.push(entry);
        }
        Ok(Self { version, entries })
    }

    /// The embedded FDT of entry `index` within `buf`, the container it was parsed from.
    pub fn entry_dtb<'a>(&self, buf: &'a [u8], index: usize) -> Result<&'a [u8]> {
        let entry = self
            .entries
            .get(index)
            .ok_or(FormatError::EntryOutOfRange { index })?;
        Ok(buf.read_bytes(entry.offset as usize, entry.size as usize)?)
    }

    /// Reassembles a container holding `dtbs`, one per entry and in entry order.
    ///
    /// Identifiers are written back byte for byte; every FDT starts 4-byte aligned.
    pub fn rebuild(&self, dtbs: &[Vec<u8>]) -> Result<Vec<u8>> {
        if dtbs.len() != self.entries.len() {
            return Err(FormatError::EntryOutOfRange {
                index: dtbs.len().min(self.entries.len()),
            });
        }
        let width = field_width(self.version)?;
        let stride = 3 * width + 8;
        let mut out = vec![0u8; MULTI_DTB_HEADER_SIZE + stride * self.entries.len()];
        out[0..4].copy_from_slice(&DTB_MAGIC_MULTI.to_le_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&(self.entries.len() as u32).to_le_bytes());

        for (index, (entry, dtb)) in self.entries.iter().zip(dtbs.iter()).enumerate() {
            let aligned = (out.len() + MULTI_DTB_ALIGNMENT - 1) & !(MULTI_DTB_ALIGNMENT - 1);
            out.resize(aligned, 0);
            let offset = out.len() as u32;
            out.extend_from_slice(dtb);

            let base = MULTI_DTB_HEADER_SIZE + index * stride;
            let mut raw_id = entry.raw_id.clone();
            raw_id.resize(3 * width, 0);
            out[base..base + 3 * width].copy_from_slice(&raw_id);
            out[base + 3 * width..base + 3 * width + 4].copy_from_slice(&offset.to_le_bytes());
            out[base + 3 * width + 4..base + stride]
                .copy_from_slice(&(dtb.len() as u32).to_le_bytes());
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DtbBody {
    Plain(Vec<u8>),
    Multi { container: MultiDtb, dtbs: Vec<Vec<u8>> },
}

/// A DTB as stored on the device, unwrapped into the FDTs it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtbImage {
    /// Whether the stored form is gzip-wrapped; kept so it is written back the same way.
    pub gzipped: bool,
    pub body: DtbBody,
}

impl DtbImage {
    /// Unwraps `buf`. Bytes past the end of the container, such as slot padding, are ignored.
    pub fn load(buf: &[u8], codec: &dyn Codec) -> Result<Self> {
        match identify_type(buf)? {
            DtbKind::Gzipped => {
                let inflated = codec.decompress(buf, MAX_INFLATED_DTB_SIZE)?;
                match identify_type(&inflated)? {
                    DtbKind::Gzipped => Err(FormatError::UnrecognizedFormat([0x1f, 0x8b, 0, 0])),
                    _ => Ok(Self {
                        gzipped: true,
                        body: Self::load_body(&inflated)?,
                    }),
                }
            }
            _ => Ok(Self {
                gzipped: false,
                body: Self::load_body(buf)?,
            }),
        }
    }

    fn load_body(buf: &[u8]) -> Result<DtbBody> {
        if identify_type(buf)? == DtbKind::Multi {
            let container = MultiDtb::parse(buf)?;
            let dtbs = (0..container.entries.len())
                .map(|index| container.entry_dtb(buf, index).map(<[u8]>::to_vec))
                .collect::<Result<Vec<_>>>()?;
            Ok(DtbBody::Multi { container, dtbs })
        } else {
            let tree = DevTree::new(buf)?;
            Ok(DtbBody::Plain(buf[..tree.totalsize()].to_vec()))
        }
    }

    #[must_use]
    pub fn kind(&self) -> DtbKind {
        match (self.gzipped, &self.body) {
            (true, _) => DtbKind::Gzipped,
            (false, DtbBody::Plain(_)) => DtbKind::Plain,
            (false, DtbBody::Multi { .. }) => DtbKind::Multi,
        }
    }

    /// The plain FDTs in container order.
    #[must_use]
    pub fn fdts(&self) -> Vec<&[u8]> {
        match &self.body {
            DtbBody::Plain(dtb) => vec![dtb.as_slice()],
            DtbBody::Multi { dtbs, .. } => dtbs.iter().map(Vec::as_slice).collect(),
        }
    }

    /// The sorted partitions of every FDT, in container order.
    pub fn all_partitions(&self) -> Result<Vec<PartitionsHelper>> {
        self.fdts()
            .into_iter()
            .map(|dtb| dtb_partitions(&DevTree::new(dtb)?))
            .collect()
    }

    /// The partitions of the first FDT. Entries that disagree with it are reported, not rejected.
    pub fn partitions(&self) -> Result<PartitionsHelper> {
        let mut all = self.all_partitions()?.into_iter();
        let first = all.next().ok_or(FormatError::EntryOutOfRange { index: 0 })?;
        for (i, other) in all.enumerate() {
            let diff = compare_partitions(&first.partitions, &other.partitions);
            if diff != 0 {
                warn!(
                    "partitions of DTB entry {} differ from entry 0 (code {:#x})",
                    i + 1,
                    diff
                );
            }
        }
        Ok(first)
    }

    /// Replaces `/partitions` in every FDT. Returns the records as written to the first one.
    pub fn replace_partitions(&mut self, records: &[DtbPartition]) -> Result<Vec<DtbPartition>> {
        match &mut self.body {
            DtbBody::Plain(dtb) => {
                let (rebuilt, assigned) = replace_partitions_node(dtb, records)?;
                *dtb = rebuilt;
                Ok(assigned)
            }
            DtbBody::Multi { dtbs, .. } => {
                let mut first = None;
                for dtb in dtbs.iter_mut() {
                    let (rebuilt, assigned) = replace_partitions_node(dtb, records)?;
                    *dtb = rebuilt;
                    first.get_or_insert(assigned);
                }
                Ok(first.unwrap_or_default())
            }
        }
    }

    /// Serialises back to the stored form, re-compressing when the input was gzipped.
    pub fn to_bytes(&self, codec: &dyn Codec) -> Result<Vec<u8>> {
        let body = match &self.body {
            DtbBody::Plain(dtb) => dtb.clone(),
            DtbBody::Multi { container, dtbs } => container.rebuild(dtbs)?,
        };
        if self.gzipped {
            codec.compress(&body)
        } else {
            Ok(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifies_by_magic() {
        assert_eq!(identify_type(&[0xd0, 0x0d, 0xfe, 0xed]).unwrap(), DtbKind::Plain);
        assert_eq!(identify_type(b"AML_").unwrap(), DtbKind::Multi);
        assert_eq!(identify_type(&[0x1f, 0x8b, 8, 0]).unwrap(), DtbKind::Gzipped);
        assert_eq!(
            identify_type(b"MPT\0").unwrap_err(),
            FormatError::UnrecognizedFormat(*b"MPT\0")
        );
        assert!(identify_type(&[0x1f]).is_err());
    }

    #[test]
    fn identifiers_are_byte_swapped() {
        assert_eq!(decode_identifier(b" lxg"), "gxl");
        assert_eq!(decode_identifier(b"212p"), "p212");
        assert_eq!(decode_identifier(b"  g2\0\0\0\0\0\0\0\0\0\0\0\0"), "2g");
        assert_eq!(decode_identifier(b"mpla    "), "alpm");
    }

    #[test]
    fn unsupported_version() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"AML_");
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(
            MultiDtb::parse(&buf).unwrap_err(),
            FormatError::UnsupportedMultiVersion(3)
        );
    }

    #[test]
    fn entry_past_end_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"AML_");
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(b" lxg212p  g2");
        buf.extend_from_slice(&32u32.to_le_bytes());
        buf.extend_from_slice(&64u32.to_le_bytes());
        assert_eq!(
            MultiDtb::parse(&buf).unwrap_err(),
            FormatError::EntryOutOfRange { index: 0 }
        );
    }
}
