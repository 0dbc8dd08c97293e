//! Synthetic images shared by the integration tests.
#![allow(dead_code)]

use amlpart::fdt::writer::{assemble, StructWriter, EMPTY_RSVMAP};
use amlpart::fdt::{FdtHeader, StringBlock};

pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;

/// Phandle of the `/partitions` node itself.
pub const ROOT_PHANDLE: u32 = 0x40;
/// Phandle of `/soc/emmc`, outside the partitions.
pub const EMMC_PHANDLE: u32 = 0x02;

/// `(name, size, mask)` of each child of `/partitions`, in structure order.
pub type Part<'a> = (&'a str, u64, u32);

pub const PARTS: [Part<'static>; 4] = [
    ("logo", 8 * MIB, 1),
    ("recovery", 24 * MIB, 1),
    ("system", 2 * GIB, 2),
    ("data", u64::MAX, 4),
];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Options for [`build_dtb`].
#[derive(Debug, Clone)]
pub struct DtbSpec<'a> {
    pub parts: &'a [Part<'a>],
    /// Value of the `parts` property; the number of children when `None`.
    pub declared: Option<u32>,
    /// `part-N` references, in this order; phandles `0x10 + i` in structure order when `None`.
    pub order: Option<Vec<usize>>,
    /// Declare every phandle twice, as `phandle` and `linux,phandle`.
    pub paired: bool,
}

impl<'a> DtbSpec<'a> {
    pub fn new(parts: &'a [Part<'a>]) -> Self {
        Self {
            parts,
            declared: None,
            order: None,
            paired: false,
        }
    }
}

pub fn phandle(writer: &mut StructWriter, value: u32, paired: bool) {
    writer.prop_u32("phandle", value);
    if paired {
        writer.prop_u32("linux,phandle", value);
    }
}

/// A complete FDT with a `/soc/emmc` node and a `/partitions` node whose contents `body` writes.
pub fn build_with<F>(paired: bool, body: F) -> Vec<u8>
where
    F: FnOnce(&mut StructWriter<'_, '_>),
{
    let mut strings = StringBlock::from(Vec::new());
    let mut writer = StructWriter::new(&mut strings);
    writer
        .begin_node("")
        .prop_str("model", "Amlogic test board")
        .prop_u32("#address-cells", 2)
        .begin_node("soc")
        .begin_node("emmc");
    phandle(&mut writer, EMMC_PHANDLE, paired);
    writer.end_node().end_node();

    writer.begin_node("partitions");
    body(&mut writer);
    writer.end_node();

    writer.begin_node("chosen").prop_str("bootargs", "console=ttyS0").end_node();
    writer.end_node().end();
    let structure = writer.into_bytes();
    assemble(
        &FdtHeader::default(),
        &EMPTY_RSVMAP,
        &structure,
        strings.as_bytes(),
    )
}

/// A well-formed `/partitions` described by `spec`.
pub fn build_dtb(spec: &DtbSpec) -> Vec<u8> {
    build_with(spec.paired, |writer| {
        writer.prop_u32(
            "parts",
            spec.declared.unwrap_or(spec.parts.len() as u32),
        );
        let order: Vec<usize> = spec
            .order
            .clone()
            .unwrap_or_else(|| (0..spec.parts.len()).collect());
        for (slot, &index) in order.iter().enumerate() {
            writer.prop_u32(&format!("part-{}", slot), 0x10 + index as u32);
        }
        phandle(writer, ROOT_PHANDLE, spec.paired);
        for (index, (name, size, mask)) in spec.parts.iter().enumerate() {
            writer
                .begin_node(name)
                .prop_str("pname", name)
                .prop_u64("size", *size)
                .prop_u32("mask", *mask);
            phandle(writer, 0x10 + index as u32, spec.paired);
            writer.end_node();
        }
    })
}

/// The `/partitions` layout most tests start from.
pub fn sample_dtb() -> Vec<u8> {
    build_dtb(&DtbSpec::new(&PARTS))
}

/// Writes `id` the way multi-DTB containers store it: 4-byte chunks, each byte-reversed,
/// space padded to `width`.
pub fn encode_identifier(id: &str, width: usize) -> Vec<u8> {
    let mut text = id.as_bytes().to_vec();
    text.resize(width, b' ');
    text.chunks(4)
        .flat_map(|chunk| chunk.iter().rev().copied().collect::<Vec<_>>())
        .collect()
}

/// A version 2 multi-DTB holding `dtbs`, each identified as `(soc, platform, variant)`.
pub fn build_multi(entries: &[(&str, &str, &str)], dtbs: &[Vec<u8>]) -> Vec<u8> {
    const WIDTH: usize = 16;
    let stride = 3 * WIDTH + 8;
    let header = 12 + stride * entries.len();
    let mut out = Vec::new();
    out.extend_from_slice(b"AML_");
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());

    let mut offset = header;
    for ((soc, platform, variant), dtb) in entries.iter().zip(dtbs) {
        out.extend(encode_identifier(soc, WIDTH));
        out.extend(encode_identifier(platform, WIDTH));
        out.extend(encode_identifier(variant, WIDTH));
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        out.extend_from_slice(&(dtb.len() as u32).to_le_bytes());
        offset += (dtb.len() + 3) & !3;
    }
    for dtb in dtbs {
        out.extend_from_slice(dtb);
        out.resize((out.len() + 3) & !3, 0);
    }
    out
}
