//! Tunables of the layout engine and the PARG allowance matrix.

use bitflags::bitflags;

use crate::spec::{DTB_COPY_SIZE, GAP_PARTITION, GAP_RESERVED, MASK_DATA, PARTITION_ALIGNMENT};

/// Gaps and alignment used when offsets are computed rather than given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutOptions {
    /// Space left between `bootloader` and `reserved`.
    pub gap_reserved: u64,
    /// Space left between any two later partitions.
    pub gap_partition: u64,
    pub alignment: u64,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            gap_reserved: GAP_RESERVED,
            gap_partition: GAP_PARTITION,
            alignment: PARTITION_ALIGNMENT,
        }
    }
}

bitflags! {
    /// What a PARG field may or must contain.
    pub struct Allowance: u8 {
        const REQUIRED = 0b0000_0001;
        const ALLOW_ABSOLUTE = 0b0000_0010;
        const ALLOW_RELATIVE = 0b0000_0100;
        const DISALLOW = 0b1000_0000;
    }
}

impl Allowance {
    /// No constraint at all.
    pub const ANY: Allowance = Allowance::empty();
}

/// The allowance of each field of a definer, plus the mask to use when none is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefinerRules {
    pub name: Allowance,
    pub offset: Allowance,
    pub size: Allowance,
    pub mask: Allowance,
    pub default_mask: Option<u32>,
    /// Whether a mask of 0 is accepted next to 1, 2 and 4.
    pub allow_zero_mask: bool,
}

impl DefinerRules {
    pub const ECREATE: DefinerRules = DefinerRules {
        name: Allowance::REQUIRED,
        offset: Allowance::from_bits_truncate(
            Allowance::ALLOW_ABSOLUTE.bits() | Allowance::ALLOW_RELATIVE.bits(),
        ),
        size: Allowance::ALLOW_ABSOLUTE,
        mask: Allowance::ANY,
        default_mask: Some(MASK_DATA),
        allow_zero_mask: false,
    };

    pub const ECLONE: DefinerRules = DefinerRules {
        name: Allowance::REQUIRED,
        offset: Allowance::from_bits_truncate(
            Allowance::REQUIRED.bits() | Allowance::ALLOW_ABSOLUTE.bits(),
        ),
        size: Allowance::from_bits_truncate(
            Allowance::REQUIRED.bits() | Allowance::ALLOW_ABSOLUTE.bits(),
        ),
        mask: Allowance::REQUIRED,
        default_mask: None,
        allow_zero_mask: true,
    };

    pub const DCLONE: DefinerRules = DefinerRules {
        name: Allowance::REQUIRED,
        offset: Allowance::DISALLOW,
        size: Allowance::from_bits_truncate(
            Allowance::REQUIRED.bits() | Allowance::ALLOW_ABSOLUTE.bits(),
        ),
        mask: Allowance::REQUIRED,
        default_mask: None,
        allow_zero_mask: true,
    };
}

/// The operation a list of PARG arguments is interpreted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Build an EPT from the vendor default plus new partitions.
    ECreate,
    /// Replace the EPT with a fully specified list.
    EClone,
    /// Replace the DTB partitions with a fully specified list.
    DClone,
    /// Edit an existing EPT.
    EEdit,
    /// Edit existing DTB partitions.
    DEdit,
}

impl Mode {
    /// Rules for definers in this mode.
    #[must_use]
    pub fn definer_rules(self) -> DefinerRules {
        match self {
            Mode::ECreate | Mode::EEdit => DefinerRules::ECREATE,
            Mode::EClone => DefinerRules::ECLONE,
            Mode::DClone | Mode::DEdit => DefinerRules::DCLONE,
        }
    }

    #[must_use]
    pub fn allows_modifiers(self) -> bool {
        matches!(self, Mode::EEdit | Mode::DEdit)
    }

    /// Whether modifiers may touch offsets; DTB records have none.
    #[must_use]
    pub fn allows_offset_adjust(self) -> bool {
        self == Mode::EEdit
    }
}

/// Geometry of the DTB area inside the `reserved` partition: two identical copies, each closed by
/// a 16-byte trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtbSlotLayout {
    pub copy_size: usize,
}

impl DtbSlotLayout {
    #[must_use]
    pub fn area_size(&self) -> usize {
        self.copy_size * 2
    }
}

impl Default for DtbSlotLayout {
    fn default() -> Self {
        Self {
            copy_size: DTB_COPY_SIZE,
        }
    }
}
