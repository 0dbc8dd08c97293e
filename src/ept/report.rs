use core::fmt;

use crate::size::{size_literal, HumanSize};

use super::table::Table;

const RULE: &str =
    "===================================================================================";

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{} partitions in the table:", self.header.partitions_count)?;
        writeln!(f, "{}", RULE)?;
        writeln!(
            f,
            "ID| name            |          offset|(   human)|            size|(   human)| masks"
        )?;
        writeln!(f, "{}", "-".repeat(RULE.len()))?;
        let mut last_end = 0u64;
        for (i, part) in self.partitions.iter().enumerate() {
            if part.offset > last_end {
                let gap = part.offset - last_end;
                writeln!(f, "    (GAP){:>40x} ({})", gap, HumanSize(gap))?;
            } else if part.offset < last_end {
                let overlap = last_end - part.offset;
                writeln!(f, "    (OVERLAP){:>36x} ({})", overlap, HumanSize(overlap))?;
            }
            writeln!(
                f,
                "{:2}: {:<16} {:16x} ({}) {:16x} ({}) {:6}",
                i,
                part.name(),
                part.offset,
                HumanSize(part.offset),
                part.size,
                HumanSize(part.size),
                part.mask
            )?;
            last_end = part.offset.saturating_add(part.size);
        }
        write!(f, "{}", RULE)
    }
}

/// A table written as `name:offset:size:mask` arguments, in three number styles.
///
/// Each form parses back into the same table in eclone mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub decimal: String,
    pub hex: String,
    pub human: String,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.decimal)?;
        writeln!(f, "{}", self.hex)?;
        write!(f, "{}", self.human)
    }
}

impl Table {
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let join = |render: &dyn Fn(u64) -> String| {
            self.partitions
                .iter()
                .map(|part| {
                    format!(
                        "{}:{}:{}:{}",
                        part.name(),
                        render(part.offset),
                        render(part.size),
                        part.mask
                    )
                })
                .collect::<Vec<_>>()
                .join(" ")
        };
        Snapshot {
            decimal: join(&|v: u64| v.to_string()),
            hex: join(&|v: u64| format!("{:#x}", v)),
            human: join(&size_literal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutOptions;

    #[test]
    fn snapshot_forms() {
        let table = Table::vendor_layout(8 << 30, &LayoutOptions::default()).unwrap();
        let snapshot = table.snapshot();
        assert_eq!(
            snapshot.decimal,
            "bootloader:0:4194304:0 reserved:37748736:67108864:0 cache:113246208:0:0 env:121634816:8388608:0"
        );
        assert!(snapshot.hex.starts_with("bootloader:0x0:0x400000:0 reserved:0x2400000:"));
        assert_eq!(
            snapshot.human,
            "bootloader:0:4M:0 reserved:36M:64M:0 cache:108M:0:0 env:116M:8M:0"
        );
    }

    #[test]
    fn report_marks_gaps() {
        let table = Table::vendor_layout(8 << 30, &LayoutOptions::default()).unwrap();
        let report = table.to_string();
        assert!(report.starts_with("4 partitions in the table:"));
        assert_eq!(report.matches("(GAP)").count(), 3);
        assert!(!report.contains("(OVERLAP)"));
        assert!(report.contains("reserved"));
    }
}
