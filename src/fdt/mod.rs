//! A minimal flattened device tree (FDT) toolkit: token walking, node lookup, the strings block,
//! phandle accounting and writing.

pub mod parse;
pub mod phandle;
pub mod stringblock;
mod tree;
pub mod writer;

pub use parse::{Cursor, ParsedProp, Token};
pub use phandle::{PhandleList, PhandleNames};
pub use stringblock::StringBlock;
pub use tree::{DevTree, FdtHeader, NodeProps, NodeRef};
