use core::fmt;

use log::{debug, info};

use crate::ept::Snapshot;
use crate::error::FormatError;
use crate::fdt::{Cursor, DevTree, NodeRef, ParsedProp, StringBlock, Token};
use crate::priv_util::until_nul;
use crate::size::{size_literal, HumanSize};
use crate::spec::{AUTOFILL_SIZE, MAX_PARTITIONS, PARTITION_NAME_LEN};

type Result<T> = core::result::Result<T, FormatError>;

/// Bit set in [`compare_partitions`] when a name differs.
pub const DIFF_NAME: u32 = 0b001;
/// Bit set in [`compare_partitions`] when a mask differs.
pub const DIFF_MASK: u32 = 0b010;
/// Bit set in [`compare_partitions`] when a size differs.
pub const DIFF_SIZE: u32 = 0b100;
/// Added to [`compare_partitions`] once per partition one list has over the other.
pub const DIFF_COUNT_UNIT: u32 = 8;

/// One child of the `/partitions` node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DtbPartition {
    pub name: String,
    /// [`AUTOFILL_SIZE`] takes the rest of the device.
    pub size: u64,
    pub mask: u32,
    pub phandle: u32,
    pub linux_phandle: u32,
}

impl DtbPartition {
    #[must_use]
    pub fn new(name: &str, size: u64, mask: u32) -> Self {
        Self {
            name: name.to_owned(),
            size,
            mask,
            ..Self::default()
        }
    }

    /// `phandle`, or `linux,phandle` when only that one is declared.
    #[inline]
    #[must_use]
    pub fn effective_phandle(&self) -> u32 {
        if self.phandle != 0 {
            self.phandle
        } else {
            self.linux_phandle
        }
    }

    #[inline]
    #[must_use]
    pub fn is_autofill(&self) -> bool {
        self.size == AUTOFILL_SIZE
    }
}

/// Everything read out of a `/partitions` node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionsHelper {
    /// Children in structure-block order until [`sort_by_phandle`] reorders them.
    pub partitions: Vec<DtbPartition>,
    /// Target of each `part-N` reference.
    pub phandles: [u32; MAX_PARTITIONS],
    pub phandle_root: u32,
    pub linux_phandle_root: u32,
    /// Value of the `parts` property.
    pub record_count: u32,
}

/// Strings-block offsets of the property names a `/partitions` node uses.
#[derive(Debug, Clone, Copy)]
struct PropNames {
    parts: u32,
    pname: u32,
    size: u32,
    mask: u32,
    phandle: u32,
    linux_phandle: Option<u32>,
}

impl PropNames {
    fn resolve(strings: &StringBlock) -> Result<Self> {
        let essential = |name: &'static str| {
            strings
                .find(name)
                .ok_or(FormatError::MissingPropertyName(name))
        };
        Ok(Self {
            parts: essential("parts")?,
            pname: essential("pname")?,
            size: essential("size")?,
            mask: essential("mask")?,
            phandle: essential("phandle")?,
            linux_phandle: strings.find("linux,phandle"),
        })
    }

    fn is_linux_phandle(&self, name_offset: u32) -> bool {
        Some(name_offset) == self.linux_phandle
    }
}

fn prop_name(strings: &StringBlock, prop: &ParsedProp) -> String {
    strings
        .get(prop.name_offset)
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .unwrap_or_else(|| format!("<{:#x}>", prop.name_offset))
}

fn prop_u32(strings: &StringBlock, prop: &ParsedProp) -> Result<u32> {
    let value: [u8; 4] = prop.value.try_into().map_err(|_| FormatError::PropertyLength {
        name: prop_name(strings, prop),
        expected: 4,
        found: prop.value.len(),
    })?;
    Ok(u32::from_be_bytes(value))
}

fn prop_u64(strings: &StringBlock, prop: &ParsedProp) -> Result<u64> {
    let value: [u8; 8] = prop.value.try_into().map_err(|_| FormatError::PropertyLength {
        name: prop_name(strings, prop),
        expected: 8,
        found: prop.value.len(),
    })?;
    Ok(u64::from_be_bytes(value))
}

/// Locates `/partitions`.
pub fn get_partitions_node<'dt>(tree: &DevTree<'dt>) -> Result<NodeRef<'dt>> {
    tree.find_node("/partitions")?
        .ok_or(FormatError::NoPartitionsNode)
}

/// Parses the `/partitions` node located by [`get_partitions_node`].
///
/// Fails unless the number of children equals the `parts` property; nothing is returned for a
/// node that does not fully parse.
pub fn parse_partitions_node(tree: &DevTree, node: &NodeRef) -> Result<PartitionsHelper> {
    if node.name != b"partitions" {
        return Err(FormatError::NoPartitionsNode);
    }
    let strings = tree.string_block();
    let names = PropNames::resolve(&strings)?;
    let mut helper = PartitionsHelper::default();
    let mut cursor = tree.cursor_at(node.body);
    loop {
        match cursor.next_token()? {
            Token::Prop(prop) => parse_root_prop(&mut helper, &names, &strings, &prop)?,
            Token::BeginNode(name) => {
                if helper.partitions.len() >= MAX_PARTITIONS {
                    return Err(FormatError::TooManyPartitions);
                }
                let part = parse_partition(&mut cursor, name, &names, &strings)?;
                helper.partitions.push(part);
            }
            Token::EndNode => break,
            Token::End => return Err(FormatError::UnterminatedNode(node.begin)),
            Token::Nop => (),
        }
    }
    let parsed = helper.partitions.len() as u32;
    if parsed != helper.record_count {
        return Err(FormatError::CountMismatch {
            declared: helper.record_count,
            parsed,
        });
    }
    debug!("parsed {} partitions from /partitions", parsed);
    Ok(helper)
}

fn parse_root_prop(
    helper: &mut PartitionsHelper,
    names: &PropNames,
    strings: &StringBlock,
    prop: &ParsedProp,
) -> Result<()> {
    let value = prop_u32(strings, prop)?;
    if prop.name_offset == names.parts {
        helper.record_count = value;
    } else if prop.name_offset == names.phandle {
        helper.phandle_root = value;
    } else if names.is_linux_phandle(prop.name_offset) {
        helper.linux_phandle_root = value;
    } else {
        let name = prop_name(strings, prop);
        let index = match name.strip_prefix("part-") {
            Some(index) => index
                .parse::<usize>()
                .ok()
                .filter(|&i| i < MAX_PARTITIONS)
                .ok_or_else(|| FormatError::InvalidPartReference(name.clone()))?,
            None => {
                return Err(FormatError::UnexpectedProperty {
                    node: "partitions".to_owned(),
                    name,
                })
            }
        };
        helper.phandles[index] = value;
    }
    Ok(())
}

fn parse_partition(
    cursor: &mut Cursor,
    node_name: &[u8],
    names: &PropNames,
    strings: &StringBlock,
) -> Result<DtbPartition> {
    let name = String::from_utf8_lossy(node_name).into_owned();
    if node_name.len() >= PARTITION_NAME_LEN {
        return Err(FormatError::NodeNameTooLong(name));
    }
    let begin = cursor.position();
    let mut part = DtbPartition {
        name,
        ..DtbPartition::default()
    };
    loop {
        match cursor.next_token()? {
            Token::Prop(prop) => {
                if prop.name_offset == names.pname {
                    if prop.value.len() > PARTITION_NAME_LEN {
                        return Err(FormatError::PropertyLength {
                            name: "pname".to_owned(),
                            expected: PARTITION_NAME_LEN,
                            found: prop.value.len(),
                        });
                    }
                    let pname = until_nul(prop.value);
                    if pname != node_name {
                        return Err(FormatError::PnameMismatch {
                            node: part.name,
                            pname: String::from_utf8_lossy(pname).into_owned(),
                        });
                    }
                } else if prop.name_offset == names.size {
                    part.size = prop_u64(strings, &prop)?;
                } else if prop.name_offset == names.mask {
                    part.mask = prop_u32(strings, &prop)?;
                } else if prop.name_offset == names.phandle {
                    part.phandle = prop_u32(strings, &prop)?;
                } else if names.is_linux_phandle(prop.name_offset) {
                    part.linux_phandle = prop_u32(strings, &prop)?;
                } else {
                    return Err(FormatError::UnexpectedProperty {
                        node: part.name,
                        name: prop_name(strings, &prop),
                    });
                }
            }
            Token::BeginNode(_) => return Err(FormatError::NestedNode(part.name)),
            Token::EndNode => break,
            Token::End => return Err(FormatError::UnterminatedNode(begin)),
            Token::Nop => (),
        }
    }
    if part.phandle != 0 && part.linux_phandle != 0 && part.phandle != part.linux_phandle {
        return Err(FormatError::PhandleConflict {
            name: part.name,
            phandle: part.phandle,
            linux_phandle: part.linux_phandle,
        });
    }
    Ok(part)
}

/// Puts the partitions in `part-N` order.
///
/// For each slot whose phandle is not the one `part-N` names, the first later partition that has
/// it is swapped in. Partitions no reference names keep their relative place.
pub fn sort_by_phandle(helper: &mut PartitionsHelper) {
    let count = helper.partitions.len().min(MAX_PARTITIONS);
    let mut swaps = 0;
    for i in 0..count {
        let wanted = helper.phandles[i];
        if helper.partitions[i].effective_phandle() == wanted {
            continue;
        }
        let found = (i + 1..count).find(|&j| helper.partitions[j].effective_phandle() == wanted);
        if let Some(j) = found {
            helper.partitions.swap(i, j);
            swaps += 1;
        }
    }
    info!("partitions sorted by phandle ({} swaps)", swaps);
}

/// Locates, parses and sorts the partitions of `tree`.
pub fn dtb_partitions(tree: &DevTree) -> Result<PartitionsHelper> {
    let node = get_partitions_node(tree)?;
    let mut helper = parse_partitions_node(tree, &node)?;
    sort_by_phandle(&mut helper);
    Ok(helper)
}

/// Compares two partition lists up to the shorter one.
///
/// Returns 0 when they agree, otherwise [`DIFF_NAME`], [`DIFF_MASK`] and [`DIFF_SIZE`] for the
/// kinds of differences found plus [`DIFF_COUNT_UNIT`] per partition of length difference.
#[must_use]
pub fn compare_partitions(a: &[DtbPartition], b: &[DtbPartition]) -> u32 {
    let mut diff = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        if x.name != y.name {
            diff |= DIFF_NAME;
        }
        if x.mask != y.mask {
            diff |= DIFF_MASK;
        }
        if x.size != y.size {
            diff |= DIFF_SIZE;
        }
    }
    let extra = (a.len() as i64 - b.len() as i64).unsigned_abs() as u32;
    diff + DIFF_COUNT_UNIT * extra
}

/// The partitions as `name::size:mask` arguments, parseable in dclone mode.
#[must_use]
pub fn snapshot(partitions: &[DtbPartition]) -> Snapshot {
    let join = |render: &dyn Fn(u64) -> String| {
        partitions
            .iter()
            .map(|part| format!("{}::{}:{}", part.name, render(part.size), part.mask))
            .collect::<Vec<_>>()
            .join(" ")
    };
    Snapshot {
        decimal: join(&|v: u64| v.to_string()),
        hex: join(&|v: u64| format!("{:#x}", v)),
        human: join(&size_literal),
    }
}

impl PartitionsHelper {
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        snapshot(&self.partitions)
    }
}

impl fmt::Display for PartitionsHelper {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{} partitions in the DTB:", self.partitions.len())?;
        writeln!(f, "===================================================")?;
        writeln!(f, "ID| name            |            size|(   human)| masks")?;
        writeln!(f, "---------------------------------------------------")?;
        for (i, part) in self.partitions.iter().enumerate() {
            if part.is_autofill() {
                writeln!(f, "{:2}: {:<16} {:>28} {:6}", i, part.name, "(AUTOFILL)", part.mask)?;
            } else {
                writeln!(
                    f,
                    "{:2}: {:<16} {:16x} ({}) {:6}",
                    i,
                    part.name,
                    part.size,
                    HumanSize(part.size),
                    part.mask
                )?;
            }
        }
        write!(f, "===================================================")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(name: &str, size: u64, mask: u32) -> DtbPartition {
        DtbPartition::new(name, size, mask)
    }

    #[test]
    fn compare_flags() {
        let a = [part("logo", 8 << 20, 1), part("data", AUTOFILL_SIZE, 4)];
        let mut b = a.clone();
        assert_eq!(compare_partitions(&a, &b), 0);
        b[0].size = 16 << 20;
        assert_eq!(compare_partitions(&a, &b), DIFF_SIZE);
        b[1].name = "userdata".to_owned();
        b[1].mask = 2;
        assert_eq!(compare_partitions(&a, &b), DIFF_SIZE | DIFF_NAME | DIFF_MASK);
        assert_eq!(compare_partitions(&a, &a[..1]), DIFF_COUNT_UNIT);
        assert_eq!(compare_partitions(&a[..0], &a), 2 * DIFF_COUNT_UNIT);
    }

    #[test]
    fn sort_follows_references() {
        let mut helper = PartitionsHelper::default();
        for (i, name) in ["c", "a", "b"].iter().enumerate() {
            let mut p = part(name, 0, 1);
            p.phandle = 10 + i as u32;
            helper.partitions.push(p);
        }
        // part-0 = a, part-1 = b, part-2 = c
        helper.phandles[..3].copy_from_slice(&[11, 12, 10]);
        sort_by_phandle(&mut helper);
        let order: Vec<&str> = helper.partitions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn linux_phandle_alone_counts() {
        let mut p = part("x", 0, 1);
        p.linux_phandle = 7;
        assert_eq!(p.effective_phandle(), 7);
    }

    #[test]
    fn snapshot_writes_autofill_literally() {
        let parts = [part("logo", 8 << 20, 1), part("data", AUTOFILL_SIZE, 4)];
        let snap = snapshot(&parts);
        assert_eq!(snap.hex, "logo::0x800000:1 data::0xffffffffffffffff:4");
        assert_eq!(snap.human, "logo::8M:1 data::18446744073709551615:4");
    }
}
