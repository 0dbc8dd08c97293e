//! Module exporting the traits and entry points most callers need.

pub use crate::config::{DtbSlotLayout, LayoutOptions, Mode};
pub use crate::dtb::{DtbImage, DtbPartition};
pub use crate::ept::{Partition, Table};
pub use crate::gzip::{Codec, Gzip};
pub use crate::layout::{clone_dtb, clone_table, create_table, edit_dtb, edit_table};
pub use crate::parg::{parse_definers, parse_editors};

pub use fallible_iterator::FallibleIterator;
