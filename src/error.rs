//! Errors reported by this library
//!
//! Failures are grouped by what went wrong: bytes that do not follow the expected on-media format
//! ([`FormatError`]), a table whose content breaks a rule ([`ValidationError`]), a requested layout
//! that cannot be realised ([`LayoutError`]) and a malformed PARG argument ([`GrammarError`]).
//! [`Error`] unifies them together with I/O failures.

use std::io;

use thiserror::Error;

use crate::priv_util::SliceReadError;

/// The input bytes are not a well-formed FDT, DTB container or EPT.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The FDT magic number was not found at the start of the structure.
    #[error("device tree contains invalid magic number {0:#010x}")]
    InvalidMagicNumber(u32),

    /// A read of `len` bytes at `offset` fell outside the buffer.
    #[error("truncated input: {len} bytes at offset {offset:#x} are out of range")]
    Truncated { offset: usize, len: usize },

    #[error("unexpected end of input while reading a string")]
    UnexpectedEndOfInput,

    /// The header describes blocks that do not fit the buffer or overlap in an unsupported way.
    #[error("invalid device tree header: {0}")]
    InvalidHeader(&'static str),

    #[error("invalid token {token:#x} at structure offset {offset:#x}")]
    InvalidToken { offset: usize, token: u32 },

    #[error("structure block ended before the node opened at {0:#x} was closed")]
    UnterminatedNode(usize),

    #[error("structure block does not start with the root node")]
    MissingRoot,

    #[error("path must be absolute: {0}")]
    InvalidPath(String),

    #[error("device tree has no /partitions node")]
    NoPartitionsNode,

    #[error("essential property name '{0}' is not in the string block")]
    MissingPropertyName(&'static str),

    #[error("property '{name}' has length {found}, expected {expected}")]
    PropertyLength {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("unexpected property '{name}' in node '{node}'")]
    UnexpectedProperty { node: String, name: String },

    #[error("partition node '{0}' contains a sub-node")]
    NestedNode(String),

    #[error("partition node name '{0}' is too long")]
    NodeNameTooLong(String),

    #[error("more than {} partitions in /partitions", crate::spec::MAX_PARTITIONS)]
    TooManyPartitions,

    #[error("invalid partition reference property '{0}'")]
    InvalidPartReference(String),

    #[error("pname '{pname}' does not match node name '{node}'")]
    PnameMismatch { node: String, pname: String },

    #[error("/partitions declares {declared} partitions but {parsed} were parsed")]
    CountMismatch { declared: u32, parsed: u32 },

    #[error("partition '{name}' has phandle {phandle:#x} and linux,phandle {linux_phandle:#x}")]
    PhandleConflict {
        name: String,
        phandle: u32,
        linux_phandle: u32,
    },

    #[error("phandle {phandle:#x} appears {count} times")]
    PhandleCount { phandle: u32, count: u32 },

    #[error("phandles are mixed between single and paired (linux,phandle) declarations")]
    MixedPhandleSchemes,

    #[error("device tree declares no phandles")]
    NoPhandles,

    #[error("no free phandle value left")]
    PhandlesExhausted,

    #[error("unrecognized DTB format, leading bytes {0:02x?}")]
    UnrecognizedFormat([u8; 4]),

    #[error("unsupported multi-DTB version {0}")]
    UnsupportedMultiVersion(u32),

    #[error("multi-DTB entry {index} points outside the container")]
    EntryOutOfRange { index: usize },

    #[error("payload of {size} bytes does not fit {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("gzip stream is corrupt: {0}")]
    Compression(String),

    #[error("gzip support was not compiled in")]
    CodecUnavailable,
}

impl From<SliceReadError> for FormatError {
    fn from(err: SliceReadError) -> FormatError {
        match err {
            SliceReadError::InvalidOffset(offset, len) => FormatError::Truncated { offset, len },
            SliceReadError::UnexpectedEndOfInput => FormatError::UnexpectedEndOfInput,
        }
    }
}

/// Why a partition name was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name is empty")]
    Empty,

    #[error("name is not NUL-terminated within 16 bytes")]
    Unterminated,

    #[error("name is {0} bytes long, at most 15 are allowed")]
    TooLong(usize),

    /// Count of bytes outside `[0-9A-Za-z_-]`.
    #[error("name contains {0} illegal characters")]
    IllegalCharacters(usize),
}

/// A table that parsed fine but breaks one of the EPT rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("partition count {0} is out of range")]
    BadPartitionCount(i32),

    #[error("bad EPT magic {found:02x?}")]
    BadMagic { found: [u8; 4] },

    #[error("bad EPT version {found:02x?}")]
    BadVersion { found: [u8; 12] },

    #[error("EPT checksum {recorded:#010x} does not match computed {computed:#010x}")]
    ChecksumMismatch { recorded: u32, computed: u32 },

    #[error("partition {index} has an invalid name '{name}': {reason}")]
    InvalidName {
        index: usize,
        name: String,
        #[source]
        reason: NameError,
    },

    #[error("partition name '{0}' is used more than once")]
    DuplicateName(String),

    #[error("invalid mask {mask} for partition '{name}'")]
    InvalidMask { name: String, mask: u32 },
}

/// A requested layout cannot be placed on the device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// The table does not start with the vendor's fixed partitions.
    #[error("layout is not pedantic, leading partitions are [{}]", .found.join(", "))]
    UnsupportedLayout { found: Vec<String> },

    #[error("partition '{name}' at {offset:#x} is beyond the capacity {capacity:#x}")]
    Overflow {
        name: String,
        offset: u64,
        capacity: u64,
    },

    #[error("partition '{name}' ends at {end:#x}, past the capacity {capacity:#x}")]
    EndsPastCapacity {
        name: String,
        end: u64,
        capacity: u64,
    },

    #[error("absolute offset {offset:#x} of '{name}' is below the used space ending at {cursor:#x}")]
    OffsetBelowCursor { name: String, offset: u64, cursor: u64 },

    #[error("arithmetic overflow while placing '{0}'")]
    ArithmeticOverflow(String),

    #[error("subtracting {amount:#x} from {value:#x} for '{name}' would go below zero")]
    Underflow { name: String, value: u64, amount: u64 },

    #[error("'{first}' already takes the remaining space, '{second}' cannot as well")]
    MultipleAutofill { first: String, second: String },

    #[error("'{name}' uses an absolute offset after the auto-filled partition '{autofill}'")]
    AbsoluteAfterAutofill { name: String, autofill: String },

    #[error("no space left for '{name}': {needed:#x} bytes needed, {free:#x} free")]
    NoSpace { name: String, needed: u64, free: u64 },
}

/// Which of the four colon-separated fields of a PARG argument an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Offset,
    Size,
    Mask,
}

impl core::fmt::Display for Field {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let name = match self {
            Field::Name => "name",
            Field::Offset => "offset",
            Field::Size => "size",
            Field::Mask => "mask",
        };
        f.write_str(name)
    }
}

/// A PARG argument, or the edit it requests, is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error("'{0}' needs three ':' separators (name:offset:size:mask)")]
    TooFewSeparators(String),

    #[error("{field} is required in '{arg}'")]
    Required { field: Field, arg: String },

    #[error("{field} is not allowed in '{arg}'")]
    Disallowed { field: Field, arg: String },

    #[error("relative {field} is not allowed in '{arg}'")]
    RelativeNotAllowed { field: Field, arg: String },

    #[error("absolute {field} is not allowed in '{arg}'")]
    AbsoluteNotAllowed { field: Field, arg: String },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("number '{0}' overflows")]
    NumberOverflow(String),

    #[error("invalid mask {mask} in '{arg}'")]
    InvalidMask { mask: u32, arg: String },

    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        name: String,
        #[source]
        reason: NameError,
    },

    #[error("modifier '{0}' has no selector")]
    MissingSelector(String),

    #[error("modifier '{0}' has no operator")]
    MissingOperator(String),

    #[error("operator '{operator}' of '{arg}' needs an operand")]
    MissingOperand { operator: char, arg: String },

    #[error("unexpected trailing input in '{0}'")]
    TrailingInput(String),

    #[error("no partition matches selector '{0}'")]
    SelectorNotFound(String),

    #[error("placing partition at {target} is out of range for {count} partitions")]
    PlaceOutOfRange { target: i64, count: usize },

    #[error("partition name '{0}' is already taken")]
    NameTaken(String),

    #[error("too many partitions: {0}")]
    TooManyPartitions(usize),

    #[error("modifiers are not allowed in this mode: '{0}'")]
    ModifierNotAllowed(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<SliceReadError> for Error {
    fn from(err: SliceReadError) -> Error {
        Error::Format(err.into())
    }
}

/// The result of any operation of this crate.
pub type Result<T> = core::result::Result<T, Error>;
