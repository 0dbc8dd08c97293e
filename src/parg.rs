//! PARG, the partition argument grammar.
//!
//! A *definer* describes a new partition as `name:offset:size:mask`. A *modifier* starts with `^`,
//! selects an existing partition by name or index, and applies one operator to it:
//!
//! - `^sel:name:offset:size:mask` adjusts fields; empty fields are kept, `+v`/`-v` add or subtract
//! - `^sel?` deletes
//! - `^sel%new` clones under a new name
//! - `^sel@pos` moves, `pos` being `=N`/`N` (absolute, negative from the end) or `+N`/`-N`

use log::warn;

use crate::config::{Allowance, DefinerRules, Mode};
use crate::ept::validate_name;
use crate::error::{Field, GrammarError, NameError};
use crate::size::{parse_i64, parse_size, parse_u32};
use crate::spec::{MASK_BOOT, MASK_DATA, MASK_SYSTEM, MAX_PARTITIONS, PARTITION_NAME_LEN};

type Result<T> = core::result::Result<T, GrammarError>;

/// A number given in a definer, either as is or relative to the disk cursor (`+`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Absolute(u64),
    Relative(u64),
}

/// A new partition. Absent fields are `None` and resolved by the layout engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definer {
    pub name: String,
    pub offset: Option<Value>,
    /// `None` takes all remaining space.
    pub size: Option<Value>,
    pub mask: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Name(String),
    /// Position in the table; negative counts from the end.
    Index(i64),
}

impl Selector {
    /// Index of the partition this selector picks among `names`.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<usize> {
        let found = match self {
            Selector::Name(name) => names.iter().position(|n| n.as_ref() == name),
            Selector::Index(index) => {
                let count = names.len() as i64;
                let index = if *index < 0 { count.checked_add(*index) } else { Some(*index) };
                index
                    .filter(|index| (0..count).contains(index))
                    .map(|index| index as usize)
            }
        };
        found.ok_or_else(|| GrammarError::SelectorNotFound(self.to_string()))
    }
}

impl core::fmt::Display for Selector {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Selector::Name(name) => f.write_str(name),
            Selector::Index(index) => write!(f, "{}", index),
        }
    }
}

/// How one numeric field of an existing partition changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjust {
    Preserve,
    Set(u64),
    Add(u64),
    Subtract(u64),
}

impl Default for Adjust {
    fn default() -> Self {
        Adjust::Preserve
    }
}

impl Adjust {
    /// The adjusted value, `None` when it would leave the `u64` range.
    #[must_use]
    pub fn apply(self, target: u64) -> Option<u64> {
        match self {
            Adjust::Preserve => Some(target),
            Adjust::Set(value) => Some(value),
            Adjust::Add(value) => target.checked_add(value),
            Adjust::Subtract(value) => target.checked_sub(value),
        }
    }

    #[must_use]
    pub fn is_preserve(self) -> bool {
        self == Adjust::Preserve
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adjustor {
    pub name: Option<String>,
    pub offset: Adjust,
    pub size: Adjust,
    pub mask: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Preserve,
    Absolute(i64),
    Relative(i64),
}

impl Placement {
    /// Slot the partition currently at `current` moves to, in a table of `count`.
    pub fn target(self, current: usize, count: usize) -> Result<usize> {
        let (base, delta) = match self {
            Placement::Preserve => (current as i64, 0),
            Placement::Absolute(place) if place < 0 => (count as i64, place),
            Placement::Absolute(place) => (0, place),
            Placement::Relative(delta) => (current as i64, delta),
        };
        match base.checked_add(delta) {
            Some(target) if (0..count as i64).contains(&target) => Ok(target as usize),
            target => Err(GrammarError::PlaceOutOfRange {
                target: target.unwrap_or_else(|| base.saturating_add(delta)),
                count,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Adjust(Adjustor),
    Delete,
    Clone(String),
    Place(Placement),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modifier {
    pub selector: Selector,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Editor {
    Definer(Definer),
    Modifier(Modifier),
}

/// Splits `arg` at its first three colons.
fn split_fields(arg: &str) -> Result<[&str; 4]> {
    let mut fields = arg.splitn(4, ':');
    match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(name), Some(offset), Some(size), Some(mask)) => Ok([name, offset, size, mask]),
        _ => Err(GrammarError::TooFewSeparators(arg.to_owned())),
    }
}

fn check_presence(field: Field, present: bool, allowance: Allowance, arg: &str) -> Result<()> {
    if present && allowance.contains(Allowance::DISALLOW) {
        return Err(GrammarError::Disallowed {
            field,
            arg: arg.to_owned(),
        });
    }
    if !present && allowance.contains(Allowance::REQUIRED) {
        return Err(GrammarError::Required {
            field,
            arg: arg.to_owned(),
        });
    }
    Ok(())
}

fn parse_value(field: Field, text: &str, allowance: Allowance, arg: &str) -> Result<Value> {
    let relative = text.starts_with('+');
    let digits = if relative {
        if !allowance.contains(Allowance::ALLOW_RELATIVE) {
            return Err(GrammarError::RelativeNotAllowed {
                field,
                arg: arg.to_owned(),
            });
        }
        &text[1..]
    } else {
        if !allowance.contains(Allowance::ALLOW_ABSOLUTE) {
            return Err(GrammarError::AbsoluteNotAllowed {
                field,
                arg: arg.to_owned(),
            });
        }
        text
    };
    let value = if digits.is_empty() {
        if allowance.contains(Allowance::REQUIRED) {
            return Err(GrammarError::Required {
                field,
                arg: arg.to_owned(),
            });
        }
        0
    } else {
        parse_size(digits)?
    };
    Ok(if relative {
        Value::Relative(value)
    } else {
        Value::Absolute(value)
    })
}

fn check_name(name: &str) -> Result<()> {
    validate_name(name).map_err(|reason| GrammarError::InvalidName {
        name: name.to_owned(),
        reason,
    })
}

fn parse_mask(text: &str, allow_zero: bool, arg: &str) -> Result<u32> {
    let mask = parse_u32(text)?;
    match mask {
        MASK_BOOT | MASK_SYSTEM | MASK_DATA => Ok(mask),
        0 if allow_zero => Ok(mask),
        _ => Err(GrammarError::InvalidMask {
            mask,
            arg: arg.to_owned(),
        }),
    }
}

/// Parses `name:offset:size:mask` under `rules`.
///
/// ```text
/// data:::4          data, after the last partition, all remaining space
/// system:+8M:2G:2   system, 8M after the last partition, 2G
/// ```
pub fn parse_definer(arg: &str, rules: &DefinerRules) -> Result<Definer> {
    let [name, offset, size, mask] = split_fields(arg)?;
    check_presence(Field::Name, !name.is_empty(), rules.name, arg)?;
    check_presence(Field::Offset, !offset.is_empty(), rules.offset, arg)?;
    check_presence(Field::Size, !size.is_empty(), rules.size, arg)?;
    check_presence(Field::Mask, !mask.is_empty(), rules.mask, arg)?;

    if !name.is_empty() {
        check_name(name)?;
    }
    let offset = match offset {
        "" => None,
        text => Some(parse_value(Field::Offset, text, rules.offset, arg)?),
    };
    let size = match size {
        "" => None,
        text => Some(parse_value(Field::Size, text, rules.size, arg)?),
    };
    let mask = match mask {
        "" => rules.default_mask,
        text => Some(parse_mask(text, rules.allow_zero_mask, arg)?),
    };
    Ok(Definer {
        name: name.to_owned(),
        offset,
        size,
        mask,
    })
}

fn parse_adjust(field: Field, text: &str) -> Result<Adjust> {
    let (make, digits): (fn(u64) -> Adjust, &str) = match text.as_bytes().first() {
        None => return Ok(Adjust::Preserve),
        Some(b'+') => (Adjust::Add, &text[1..]),
        Some(b'-') => (Adjust::Subtract, &text[1..]),
        Some(_) => (Adjust::Set, text),
    };
    if digits.is_empty() {
        return Err(GrammarError::InvalidNumber(format!("{} '{}'", field, text)));
    }
    Ok(make(parse_size(digits)?))
}

fn parse_adjustor(text: &str, allow_offset: bool, arg: &str) -> Result<Adjustor> {
    let [name, offset, size, mask] = split_fields(text)?;
    if !offset.is_empty() && !allow_offset {
        return Err(GrammarError::Disallowed {
            field: Field::Offset,
            arg: arg.to_owned(),
        });
    }
    let name = match name {
        "" => None,
        name => {
            check_name(name)?;
            Some(name.to_owned())
        }
    };
    let mask = match mask {
        "" => None,
        text => Some(parse_mask(text, true, arg)?),
    };
    Ok(Adjustor {
        name,
        offset: parse_adjust(Field::Offset, offset)?,
        size: parse_adjust(Field::Size, size)?,
        mask,
    })
}

fn parse_placement(text: &str) -> Result<Placement> {
    let placement = match text.as_bytes().first() {
        Some(b'=') => Placement::Absolute(parse_i64(&text[1..])?),
        Some(b'+') | Some(b'-') => match parse_i64(text)? {
            0 => Placement::Preserve,
            delta => Placement::Relative(delta),
        },
        _ => Placement::Absolute(parse_i64(text)?),
    };
    Ok(placement)
}

fn parse_selector(text: &str, arg: &str) -> Result<Selector> {
    match text.as_bytes().first() {
        None => Err(GrammarError::MissingSelector(arg.to_owned())),
        Some(b'-') | Some(b'0'..=b'9') => Ok(Selector::Index(parse_i64(text)?)),
        Some(_) => {
            match validate_name(text) {
                Err(NameError::TooLong(_)) => {
                    return Err(GrammarError::InvalidName {
                        name: text.to_owned(),
                        reason: NameError::TooLong(text.len()),
                    })
                }
                Err(reason) => warn!(
                    "name selector '{}' is not a legal partition name ({}), using it anyway",
                    text, reason
                ),
                Ok(()) => (),
            }
            Ok(Selector::Name(text.to_owned()))
        }
    }
}

fn is_operator(c: char) -> bool {
    matches!(c, ':' | '?' | '%' | '@')
}

/// Parses a `^`-prefixed modifier. Offsets may only be adjusted when `allow_offset` is set.
pub fn parse_modifier(arg: &str, allow_offset: bool) -> Result<Modifier> {
    let body = arg
        .strip_prefix('^')
        .ok_or_else(|| GrammarError::MissingSelector(arg.to_owned()))?;
    if body.is_empty() || body.starts_with(is_operator) {
        return Err(GrammarError::MissingSelector(arg.to_owned()));
    }
    // the selector is at least one character, so an index may start with '-'
    let (split, operator) = body
        .char_indices()
        .skip(1)
        .find(|&(_, c)| is_operator(c))
        .ok_or_else(|| GrammarError::MissingOperator(arg.to_owned()))?;
    let selector = parse_selector(&body[..split], arg)?;
    let operand = &body[split + 1..];
    let missing = || GrammarError::MissingOperand {
        operator,
        arg: arg.to_owned(),
    };

    let operation = match operator {
        '?' if operand.is_empty() => Operation::Delete,
        '?' => return Err(GrammarError::TrailingInput(arg.to_owned())),
        '%' if operand.is_empty() => return Err(missing()),
        '%' => {
            if operand.len() >= PARTITION_NAME_LEN {
                return Err(GrammarError::InvalidName {
                    name: operand.to_owned(),
                    reason: NameError::TooLong(operand.len()),
                });
            }
            check_name(operand)?;
            Operation::Clone(operand.to_owned())
        }
        '@' if operand.is_empty() => return Err(missing()),
        '@' => Operation::Place(parse_placement(operand)?),
        _ if operand.is_empty() => return Err(missing()),
        _ => Operation::Adjust(parse_adjustor(operand, allow_offset, arg)?),
    };
    Ok(Modifier {
        selector,
        operation,
    })
}

/// Parses one argument of an edit mode: a modifier when it starts with `^`, a definer otherwise.
pub fn parse_editor(arg: &str, mode: Mode) -> Result<Editor> {
    if arg.starts_with('^') {
        if !mode.allows_modifiers() {
            return Err(GrammarError::ModifierNotAllowed(arg.to_owned()));
        }
        Ok(Editor::Modifier(parse_modifier(
            arg,
            mode.allows_offset_adjust(),
        )?))
    } else {
        Ok(Editor::Definer(parse_definer(arg, &mode.definer_rules())?))
    }
}

/// Parses the arguments of a create or clone mode; at most 32 are accepted.
pub fn parse_definers<S: AsRef<str>>(args: &[S], mode: Mode) -> Result<Vec<Definer>> {
    if args.len() > MAX_PARTITIONS {
        return Err(GrammarError::TooManyPartitions(args.len()));
    }
    let rules = mode.definer_rules();
    args.iter()
        .map(|arg| parse_definer(arg.as_ref(), &rules))
        .collect()
}

/// Parses the arguments of an edit mode.
pub fn parse_editors<S: AsRef<str>>(args: &[S], mode: Mode) -> Result<Vec<Editor>> {
    args.iter()
        .map(|arg| parse_editor(arg.as_ref(), mode))
        .collect()
}
