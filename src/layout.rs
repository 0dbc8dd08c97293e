//! Turns parsed PARG arguments into concrete partition layouts.
//!
//! New partitions are placed behind a running cursor that starts at the end of the used space.
//! One partition per run may leave its size out; it then takes whatever the partitions placed
//! after it leave free, and those are shifted behind it once every definer is known.

use std::borrow::Cow;

use log::{debug, info, warn};

use crate::config::LayoutOptions;
use crate::dtb::DtbPartition;
use crate::ept::{validate_name, Partition, Table};
use crate::error::{Field, GrammarError, LayoutError, NameError, Result};
use crate::parg::{Adjust, Adjustor, Definer, Editor, Modifier, Operation, Value};
use crate::size::{align_down, align_up};
use crate::spec::{AUTOFILL_SIZE, MASK_DATA, MAX_PARTITIONS};

/// Where the next partition goes by default, and how much room is left behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskCursor {
    pub next_free: u64,
    pub free: u64,
    pub capacity: u64,
}

impl DiskCursor {
    #[must_use]
    pub fn new(capacity: u64, used: u64) -> Self {
        Self {
            next_free: used,
            free: capacity.saturating_sub(used),
            capacity,
        }
    }

    fn advance_to(&mut self, end: u64) {
        self.next_free = end;
        self.free = self.capacity.saturating_sub(end);
    }
}

/// An entry of a partition list the modifiers can act on.
trait Slot: Clone {
    fn slot_name(&self) -> Cow<'_, str>;
    fn rename(&mut self, name: &str) -> core::result::Result<(), NameError>;
}

impl Slot for Partition {
    fn slot_name(&self) -> Cow<'_, str> {
        self.name()
    }

    fn rename(&mut self, name: &str) -> core::result::Result<(), NameError> {
        self.set_name(name)
    }
}

impl Slot for DtbPartition {
    fn slot_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }

    fn rename(&mut self, name: &str) -> core::result::Result<(), NameError> {
        validate_name(name)?;
        self.name = name.to_owned();
        Ok(())
    }
}

fn names_of<S: Slot>(slots: &[S]) -> Vec<String> {
    slots.iter().map(|s| s.slot_name().into_owned()).collect()
}

fn invalid_name(name: &str, reason: NameError) -> GrammarError {
    GrammarError::InvalidName {
        name: name.to_owned(),
        reason,
    }
}

fn ensure_room(count: usize) -> Result<()> {
    if count >= MAX_PARTITIONS {
        return Err(GrammarError::TooManyPartitions(count + 1).into());
    }
    Ok(())
}

/// Applies the parts of a modifier that only move slots around; adjustments are handed to
/// `adjust` once the selected slot is known to be renamable.
fn apply_modifier<S: Slot>(
    slots: &mut Vec<S>,
    modifier: &Modifier,
    adjust: &mut dyn FnMut(&mut S, &Adjustor) -> Result<()>,
) -> Result<()> {
    let names = names_of(slots);
    let index = modifier.selector.resolve(&names)?;
    match &modifier.operation {
        Operation::Delete => {
            slots.remove(index);
            info!("deleted partition {} ({})", index, names[index]);
        }
        Operation::Clone(name) => {
            ensure_room(slots.len())?;
            if names.contains(name) {
                return Err(GrammarError::NameTaken(name.clone()).into());
            }
            let mut copy = slots[index].clone();
            copy.rename(name).map_err(|reason| invalid_name(name, reason))?;
            slots.push(copy);
            info!("cloned {} into {}", names[index], name);
        }
        Operation::Place(placement) => {
            let target = placement.target(index, slots.len())?;
            if target != index {
                let slot = slots.remove(index);
                slots.insert(target, slot);
                info!("moved {} from slot {} to {}", names[index], index, target);
            }
        }
        Operation::Adjust(adjustor) => {
            let slot = &mut slots[index];
            if let Some(name) = &adjustor.name {
                if *name != names[index] && names.contains(name) {
                    return Err(GrammarError::NameTaken(name.clone()).into());
                }
                slot.rename(name).map_err(|reason| invalid_name(name, reason))?;
            }
            adjust(slot, adjustor)?;
        }
    }
    Ok(())
}

/// Applies `adjust` to `value` and rounds the result up to `alignment`.
fn adjust_field(
    name: &str,
    field: &str,
    value: u64,
    adjust: Adjust,
    alignment: u64,
) -> core::result::Result<u64, LayoutError> {
    let adjusted = adjust.apply(value).ok_or_else(|| match adjust {
        Adjust::Subtract(amount) => LayoutError::Underflow {
            name: name.to_owned(),
            value,
            amount,
        },
        _ => LayoutError::ArithmeticOverflow(name.to_owned()),
    })?;
    if adjust.is_preserve() {
        return Ok(adjusted);
    }
    align_field(name, field, adjusted, alignment)
}

fn align_field(
    name: &str,
    field: &str,
    value: u64,
    alignment: u64,
) -> core::result::Result<u64, LayoutError> {
    let aligned =
        align_up(value, alignment).ok_or_else(|| LayoutError::ArithmeticOverflow(name.to_owned()))?;
    if aligned != value {
        warn!(
            "{} of {} rounded up from {:#x} to {:#x} for {:#x} alignment",
            field, name, value, aligned, alignment
        );
    }
    Ok(aligned)
}

fn adjust_partition(part: &mut Partition, adjustor: &Adjustor, alignment: u64) -> Result<()> {
    let name = part.name().into_owned();
    part.offset = adjust_field(&name, "offset", part.offset, adjustor.offset, alignment)?;
    part.size = adjust_field(&name, "size", part.size, adjustor.size, alignment)?;
    if let Some(mask) = adjustor.mask {
        part.mask = mask;
    }
    Ok(())
}

fn adjust_record(record: &mut DtbPartition, adjustor: &Adjustor, alignment: u64) -> Result<()> {
    if !adjustor.offset.is_preserve() {
        return Err(GrammarError::Disallowed {
            field: Field::Offset,
            arg: record.name.clone(),
        }
        .into());
    }
    record.size = adjust_field(&record.name, "size", record.size, adjustor.size, alignment)?;
    if let Some(mask) = adjustor.mask {
        record.mask = mask;
    }
    Ok(())
}

/// Places definers one after another on a device of fixed capacity.
#[derive(Debug)]
struct Placer<'o> {
    cursor: DiskCursor,
    options: &'o LayoutOptions,
    /// Slot of the partition waiting to take the remaining space.
    autofill: Option<usize>,
}

impl<'o> Placer<'o> {
    fn new(table: &Table, capacity: u64, options: &'o LayoutOptions) -> Self {
        let cursor = DiskCursor::new(capacity, table.capacity());
        debug!(
            "placing from {:#x}, {:#x} of {:#x} bytes free",
            cursor.next_free, cursor.free, cursor.capacity
        );
        Self {
            cursor,
            options,
            autofill: None,
        }
    }

    fn append(&mut self, table: &mut Table, definer: &Definer) -> Result<()> {
        let name = definer.name.as_str();
        ensure_room(table.len())?;
        if table.find(name).is_some() {
            return Err(GrammarError::NameTaken(name.to_owned()).into());
        }
        let capacity = self.cursor.capacity;
        let offset = match definer.offset {
            None => self.cursor.next_free,
            Some(Value::Relative(delta)) => self
                .cursor
                .next_free
                .checked_add(delta)
                .ok_or_else(|| LayoutError::ArithmeticOverflow(name.to_owned()))?,
            Some(Value::Absolute(offset)) => {
                if let Some(index) = self.autofill {
                    return Err(LayoutError::AbsoluteAfterAutofill {
                        name: name.to_owned(),
                        autofill: table.partitions[index].name().into_owned(),
                    }
                    .into());
                }
                if offset < self.cursor.next_free {
                    return Err(LayoutError::OffsetBelowCursor {
                        name: name.to_owned(),
                        offset,
                        cursor: self.cursor.next_free,
                    }
                    .into());
                }
                offset
            }
        };
        let offset = align_field(name, "offset", offset, self.options.alignment)?;
        if self.autofill.is_none() && offset > capacity {
            return Err(LayoutError::Overflow {
                name: name.to_owned(),
                offset,
                capacity,
            }
            .into());
        }

        let size = match definer.size {
            None => {
                if let Some(index) = self.autofill {
                    return Err(LayoutError::MultipleAutofill {
                        first: table.partitions[index].name().into_owned(),
                        second: name.to_owned(),
                    }
                    .into());
                }
                self.autofill = Some(table.len());
                0
            }
            Some(Value::Absolute(size)) | Some(Value::Relative(size)) => {
                align_field(name, "size", size, self.options.alignment)?
            }
        };
        let end = offset
            .checked_add(size)
            .ok_or_else(|| LayoutError::ArithmeticOverflow(name.to_owned()))?;
        if self.autofill.is_none() && end > capacity {
            return Err(LayoutError::NoSpace {
                name: name.to_owned(),
                needed: size,
                free: capacity - offset,
            }
            .into());
        }

        let part = Partition::new(name, offset, size, definer.mask.unwrap_or(MASK_DATA))
            .map_err(|reason| invalid_name(name, reason))?;
        table.partitions.push(part);
        self.cursor.advance_to(end);
        debug!("placed {} at {:#x}, {:#x} bytes", name, offset, size);
        Ok(())
    }

    /// Gives the pending auto-fill partition the space left free, shifting the partitions
    /// placed after it.
    fn settle(&mut self, table: &mut Table) -> Result<()> {
        let index = match self.autofill.take() {
            Some(index) => index,
            None => return Ok(()),
        };
        let name = table.partitions[index].name().into_owned();
        if self.cursor.next_free > self.cursor.capacity {
            return Err(LayoutError::NoSpace {
                name,
                needed: self.cursor.next_free - table.partitions[index].offset,
                free: self.cursor.capacity.saturating_sub(table.partitions[index].offset),
            }
            .into());
        }
        let fill = align_down(self.cursor.capacity - self.cursor.next_free, self.options.alignment);
        table.partitions[index].size = fill;
        for part in &mut table.partitions[index + 1..] {
            part.offset += fill;
        }
        self.cursor.advance_to(self.cursor.next_free + fill);
        info!("{} takes the remaining {:#x} bytes", name, fill);
        Ok(())
    }

    fn resync(&mut self, table: &Table) {
        self.cursor.advance_to(table.capacity());
    }
}

/// Recomputes the header, validates the table and checks it against `capacity`.
fn finish(mut table: Table, capacity: u64) -> Result<Table> {
    table.update_header();
    table.validate()?;
    for part in &table.partitions {
        let end = part
            .end()
            .ok_or_else(|| LayoutError::ArithmeticOverflow(part.name().into_owned()))?;
        if end > capacity {
            return Err(LayoutError::EndsPastCapacity {
                name: part.name().into_owned(),
                end,
                capacity,
            }
            .into());
        }
    }
    warn_overlaps(&table);
    Ok(table)
}

/// ecreate: the vendor default layout for `capacity` followed by `definers`.
pub fn create_table(definers: &[Definer], capacity: u64, options: &LayoutOptions) -> Result<Table> {
    let mut table = Table::vendor_layout(capacity, options)?;
    let mut placer = Placer::new(&table, capacity, options);
    for definer in definers {
        placer.append(&mut table, definer)?;
    }
    placer.settle(&mut table)?;
    finish(table, capacity)
}

/// eclone: a table made of exactly the partitions given, geometry as written.
pub fn clone_table(definers: &[Definer]) -> Result<Table> {
    if definers.len() > MAX_PARTITIONS {
        return Err(GrammarError::TooManyPartitions(definers.len()).into());
    }
    let mut table = Table::default();
    for definer in definers {
        if table.find(&definer.name).is_some() {
            return Err(GrammarError::NameTaken(definer.name.clone()).into());
        }
        let value = |v: Option<Value>| match v {
            Some(Value::Absolute(v)) | Some(Value::Relative(v)) => v,
            None => 0,
        };
        let part = Partition::new(
            &definer.name,
            value(definer.offset),
            value(definer.size),
            definer.mask.unwrap_or(0),
        )
        .map_err(|reason| invalid_name(&definer.name, reason))?;
        table.partitions.push(part);
    }
    table.update_header();
    table.validate()?;
    warn_overlaps(&table);
    Ok(table)
}

/// eedit: applies `editors` in order to a copy of `base`.
///
/// Definers are placed like in [`create_table`]. A pending auto-fill partition is settled before
/// the next modifier runs.
pub fn edit_table(
    base: &Table,
    editors: &[Editor],
    capacity: u64,
    options: &LayoutOptions,
) -> Result<Table> {
    let mut table = base.clone();
    let mut placer = Placer::new(&table, capacity, options);
    for editor in editors {
        match editor {
            Editor::Definer(definer) => placer.append(&mut table, definer)?,
            Editor::Modifier(modifier) => {
                placer.settle(&mut table)?;
                let alignment = options.alignment;
                apply_modifier(
                    &mut table.partitions,
                    modifier,
                    &mut |part: &mut Partition, adjustor: &Adjustor| {
                        adjust_partition(part, adjustor, alignment)
                    },
                )?;
                placer.resync(&table);
            }
        }
    }
    placer.settle(&mut table)?;
    finish(table, capacity)
}

fn check_autofill(records: &[DtbPartition]) -> Result<()> {
    let mut autofill = records.iter().filter(|r| r.is_autofill());
    if let (Some(first), Some(second)) = (autofill.next(), autofill.next()) {
        return Err(LayoutError::MultipleAutofill {
            first: first.name.clone(),
            second: second.name.clone(),
        }
        .into());
    }
    Ok(())
}

/// dclone: DTB partitions made of exactly the records given.
pub fn clone_dtb(definers: &[Definer]) -> Result<Vec<DtbPartition>> {
    if definers.len() > MAX_PARTITIONS {
        return Err(GrammarError::TooManyPartitions(definers.len()).into());
    }
    let mut records: Vec<DtbPartition> = Vec::with_capacity(definers.len());
    for definer in definers {
        if records.iter().any(|r| r.name == definer.name) {
            return Err(GrammarError::NameTaken(definer.name.clone()).into());
        }
        validate_name(&definer.name)
            .map_err(|reason| invalid_name(&definer.name, reason))?;
        let size = match definer.size {
            Some(Value::Absolute(size)) | Some(Value::Relative(size)) => size,
            None => AUTOFILL_SIZE,
        };
        records.push(DtbPartition::new(
            &definer.name,
            size,
            definer.mask.unwrap_or(0),
        ));
    }
    check_autofill(&records)?;
    Ok(records)
}

/// dedit: applies `editors` in order to a copy of `base`. Definers append records.
pub fn edit_dtb(
    base: &[DtbPartition],
    editors: &[Editor],
    options: &LayoutOptions,
) -> Result<Vec<DtbPartition>> {
    let mut records = base.to_vec();
    for editor in editors {
        match editor {
            Editor::Definer(definer) => {
                ensure_room(records.len())?;
                let mut appended = clone_dtb(std::slice::from_ref(definer))?;
                if records.iter().any(|r| r.name == definer.name) {
                    return Err(GrammarError::NameTaken(definer.name.clone()).into());
                }
                records.append(&mut appended);
            }
            Editor::Modifier(modifier) => {
                let alignment = options.alignment;
                apply_modifier(
                    &mut records,
                    modifier,
                    &mut |record: &mut DtbPartition, adjustor: &Adjustor| {
                        adjust_record(record, adjustor, alignment)
                    },
                )?;
            }
        }
    }
    check_autofill(&records)?;
    Ok(records)
}

/// One row of [`layout_report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Partition {
        index: usize,
        name: String,
        offset: u64,
        size: u64,
    },
    Gap { offset: u64, size: u64 },
    /// The previous partition runs `size` bytes into the next one, which starts at `offset`.
    Overlap { offset: u64, size: u64 },
}

/// The partitions sorted by offset, with the gaps and overlaps between neighbours.
#[must_use]
pub fn layout_report(table: &Table) -> Vec<Span> {
    let mut order: Vec<usize> = (0..table.len()).collect();
    order.sort_by_key(|&i| table.partitions[i].offset);
    let mut spans = Vec::with_capacity(order.len() * 2);
    let mut last_end = 0u64;
    for index in order {
        let part = &table.partitions[index];
        if part.offset > last_end {
            spans.push(Span::Gap {
                offset: last_end,
                size: part.offset - last_end,
            });
        } else if part.offset < last_end {
            spans.push(Span::Overlap {
                offset: part.offset,
                size: last_end - part.offset,
            });
        }
        spans.push(Span::Partition {
            index,
            name: part.name().into_owned(),
            offset: part.offset,
            size: part.size,
        });
        last_end = last_end.max(part.offset.saturating_add(part.size));
    }
    spans
}

/// Logs a warning for each overlap in `table` and returns how many there are.
pub fn warn_overlaps(table: &Table) -> usize {
    let spans = layout_report(table);
    let mut overlaps = 0;
    for (i, span) in spans.iter().enumerate() {
        if let (Span::Overlap { offset, size }, Some(Span::Partition { name, .. })) =
            (span, spans.get(i + 1))
        {
            warn!(
                "{} at {:#x} overlaps the previous partition by {:#x} bytes",
                name, offset, size
            );
            overlaps += 1;
        }
    }
    overlaps
}

/// A copy needed to keep a partition's data when its offset moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub name: String,
    pub from: u64,
    pub to: u64,
    pub length: u64,
}

/// The copies that carry each partition's data from its place in `source` to its place in
/// `target`. Partitions are matched by name; only moved ones are listed.
#[must_use]
pub fn migrate_plan(source: &Table, target: &Table) -> Vec<Migration> {
    target
        .partitions
        .iter()
        .filter_map(|to| {
            let name = to.name();
            let from = &source.partitions[source.find(&name)?];
            if from.offset == to.offset {
                return None;
            }
            Some(Migration {
                name: name.into_owned(),
                from: from.offset,
                to: to.offset,
                length: from.size.min(to.size),
            })
        })
        .collect()
}
