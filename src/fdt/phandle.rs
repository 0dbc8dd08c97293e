//! Bookkeeping of every phandle declared in a device tree.
//!
//! A tree either declares each phandle once (`phandle`) or twice (`phandle` plus the legacy
//! `linux,phandle`); the list remembers which, so that newly allocated handles are declared the
//! same way.

use std::collections::BTreeMap;

use log::debug;

use crate::error::FormatError;

use super::parse::{Cursor, Token};
use super::tree::DevTree;

type Result<T> = core::result::Result<T, FormatError>;

/// Property names whose values are phandles, as offsets into the strings block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhandleNames {
    pub phandle: u32,
    pub linux_phandle: Option<u32>,
}

impl PhandleNames {
    fn matches(&self, name_offset: u32) -> bool {
        name_offset == self.phandle || Some(name_offset) == self.linux_phandle
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhandleList {
    counts: BTreeMap<u32, u32>,
    min: u32,
    max: u32,
    have_linux_phandle: bool,
}

impl PhandleList {
    /// Visits every node of `tree` and checks the resulting histogram.
    pub fn collect(tree: &DevTree) -> Result<Self> {
        let strings = tree.string_block();
        let names = PhandleNames {
            phandle: strings
                .find("phandle")
                .ok_or(FormatError::MissingPropertyName("phandle"))?,
            linux_phandle: strings.find("linux,phandle"),
        };
        let root = tree.root()?;
        let mut list = Self::default();
        let mut cursor = tree.cursor_at(root.body);
        list.visit(&mut cursor, &names, root.begin)?;
        list.finish()?;
        debug!(
            "collected {} phandles in [{:#x}, {:#x}], linux,phandle: {}",
            list.counts.len(),
            list.min,
            list.max,
            list.have_linux_phandle
        );
        Ok(list)
    }

    fn visit(&mut self, cursor: &mut Cursor, names: &PhandleNames, begin: usize) -> Result<()> {
        loop {
            match cursor.next_token()? {
                Token::Prop(prop) if names.matches(prop.name_offset) => {
                    let value: [u8; 4] = prop.value.try_into().map_err(|_| FormatError::PropertyLength {
                        name: "phandle".to_owned(),
                        expected: 4,
                        found: prop.value.len(),
                    })?;
                    self.add(u32::from_be_bytes(value));
                }
                Token::BeginNode(_) => {
                    let child = cursor.position();
                    self.visit(cursor, names, child)?;
                }
                Token::EndNode => return Ok(()),
                Token::End => return Err(FormatError::UnterminatedNode(begin)),
                Token::Prop(_) | Token::Nop => (),
            }
        }
    }

    /// Counts one more declaration of `phandle`.
    pub fn add(&mut self, phandle: u32) {
        *self.counts.entry(phandle).or_insert(0) += 1;
    }

    /// Checks the histogram and settles the declaration scheme and bounds.
    ///
    /// Every phandle must be declared exactly once, or every phandle exactly twice.
    pub fn finish(&mut self) -> Result<()> {
        let mut seen_single = false;
        let mut seen_paired = false;
        for (&phandle, &count) in &self.counts {
            match count {
                1 => seen_single = true,
                2 => seen_paired = true,
                _ => return Err(FormatError::PhandleCount { phandle, count }),
            }
        }
        if seen_single && seen_paired {
            return Err(FormatError::MixedPhandleSchemes);
        }
        let (min, max) = match (self.counts.keys().next(), self.counts.keys().next_back()) {
            (Some(&min), Some(&max)) => (min, max),
            _ => return Err(FormatError::NoPhandles),
        };
        self.min = min;
        self.max = max;
        self.have_linux_phandle = seen_paired;
        Ok(())
    }

    fn multiplicity(&self) -> u32 {
        if self.have_linux_phandle {
            2
        } else {
            1
        }
    }

    /// Forgets every declaration of `phandle`.
    pub fn release(&mut self, phandle: u32) {
        if self.counts.remove(&phandle).is_some() {
            self.refresh_bounds();
        }
    }

    /// Reserves the lowest unused phandle, declared the way the rest of the tree is.
    pub fn allocate(&mut self) -> Result<u32> {
        let mut candidate = 1u32;
        for &used in self.counts.keys() {
            if used > candidate {
                break;
            }
            if used == candidate {
                candidate = candidate.checked_add(1).ok_or(FormatError::PhandlesExhausted)?;
            }
        }
        // 0 and 0xffffffff are reserved
        if candidate == u32::MAX {
            return Err(FormatError::PhandlesExhausted);
        }
        let multiplicity = self.multiplicity();
        self.counts.insert(candidate, multiplicity);
        self.refresh_bounds();
        Ok(candidate)
    }

    fn refresh_bounds(&mut self) {
        self.min = self.counts.keys().next().copied().unwrap_or(0);
        self.max = self.counts.keys().next_back().copied().unwrap_or(0);
    }

    #[inline]
    #[must_use]
    pub fn min(&self) -> u32 {
        self.min
    }

    #[inline]
    #[must_use]
    pub fn max(&self) -> u32 {
        self.max
    }

    #[inline]
    #[must_use]
    pub fn have_linux_phandle(&self) -> bool {
        self.have_linux_phandle
    }

    /// How many times `phandle` is declared.
    #[must_use]
    pub fn count(&self, phandle: u32) -> u32 {
        self.counts.get(&phandle).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(declarations: &[u32]) -> PhandleList {
        let mut list = PhandleList::default();
        for &phandle in declarations {
            list.add(phandle);
        }
        list
    }

    #[test]
    fn single_declarations() {
        let mut list = list_of(&[3, 1, 7]);
        list.finish().unwrap();
        assert_eq!((list.min(), list.max()), (1, 7));
        assert!(!list.have_linux_phandle());
        assert_eq!(list.allocate().unwrap(), 2);
        assert_eq!(list.count(2), 1);
        assert_eq!(list.allocate().unwrap(), 4);
    }

    #[test]
    fn paired_declarations() {
        let mut list = list_of(&[1, 1, 2, 2]);
        list.finish().unwrap();
        assert!(list.have_linux_phandle());
        let fresh = list.allocate().unwrap();
        assert_eq!(fresh, 3);
        assert_eq!(list.count(fresh), 2);
        assert_eq!(list.max(), 3);
        list.release(1);
        assert_eq!(list.min(), 2);
    }

    #[test]
    fn broken_histograms() {
        assert_eq!(list_of(&[]).finish(), Err(FormatError::NoPhandles));
        assert_eq!(list_of(&[1, 2, 2]).finish(), Err(FormatError::MixedPhandleSchemes));
        assert_eq!(
            list_of(&[5, 5, 5]).finish(),
            Err(FormatError::PhandleCount { phandle: 5, count: 3 })
        );
    }
}
