//! Reading, checking and rewriting the partition layout of Amlogic eMMC devices.
//!
//! # Overview
//!
//! An Amlogic eMMC carries its partition layout twice:
//!
//! * the EPT, a fixed 1304-byte table at the start of the `reserved` partition, see [`ept`];
//! * the `/partitions` node of the device tree stored a little further into `reserved`, see
//!   [`dtb`]. That device tree may be a plain FDT, a multi-DTB container or a gzip stream of
//!   either, kept in two checksummed copies ([`dtb::slot`]).
//!
//! New layouts are described with PARG arguments ([`parg`]) and realised by the layout engine
//! ([`layout`]), which turns definers and modifiers into a validated table.
//!
//! # Examples
//!
//! ```ignore
//! use amlpart::prelude::*;
//!
//! let definers = parse_definers(&["data:::4", "system::2G:2"], Mode::ECreate)?;
//! let table = create_table(&definers, 32 << 30, &LayoutOptions::default())?;
//! assert_eq!(table.len(), 6);
//! # Ok::<(), amlpart::Error>(())
//! ```

pub mod config;
pub mod dtb;
pub mod ept;
pub mod error;
pub mod fdt;
pub mod gzip;
pub mod io;
pub mod layout;
pub mod parg;
pub mod prelude;
pub mod size;
pub mod spec;

mod priv_util;

pub use error::{Error, Result};
