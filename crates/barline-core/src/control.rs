//! Control change commands.
//!
//! A command is a comma-separated list of `CONTROLLER VALUE(TIME_MS)` items,
//! for example `43 0(0), 43 127(2000)`. Consecutive items on the same
//! controller with different values are joined by a sweep.

use crate::error::{Error, Result};
use crate::sweep::sweep;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

static CC_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<controller>\d{1,3})\s+(?P<value>\d{1,3})\s*(?:\((?P<time>\d+)\))?$")
        .expect("valid control change regex")
});

/// One parsed control change item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlChange {
    pub controller: u8,
    pub value: u8,
    /// Milliseconds from the start of the command.
    pub time_ms: u64,
}

/// A control change ready for the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledControlChange {
    pub controller: u8,
    pub value: u8,
    pub at_offset: Duration,
}

fn midi_byte(raw: &str, what: &str, item: &str) -> Result<u8> {
    match raw.parse::<u8>() {
        Ok(v) if v <= 127 => Ok(v),
        _ => Err(Error::InvalidControlChange(format!("{what} out of range in '{item}'"))),
    }
}

/// Parse a control change command.
pub fn parse_control_changes(command: &str) -> Result<Vec<ControlChange>> {
    let items = command
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let caps = CC_ITEM
                .captures(item)
                .ok_or_else(|| Error::InvalidControlChange(item.to_string()))?;
            let time_ms = match caps.name("time") {
                Some(t) => t
                    .as_str()
                    .parse::<u64>()
                    .map_err(|_| Error::InvalidControlChange(item.to_string()))?,
                None => 0,
            };
            Ok(ControlChange {
                controller: midi_byte(&caps["controller"], "controller", item)?,
                value: midi_byte(&caps["value"], "value", item)?,
                time_ms,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if items.is_empty() {
        return Err(Error::InvalidControlChange("empty command".to_string()));
    }
    Ok(items)
}

/// Expand a command into individual messages ordered by offset.
///
/// An item whose controller already had an earlier item with a different
/// value is replaced by a `precision`-step sweep from that earlier item.
pub fn expand_sweeps(
    changes: &[ControlChange],
    precision: usize,
) -> Result<Vec<ScheduledControlChange>> {
    let mut last: HashMap<u8, ControlChange> = HashMap::new();
    let mut scheduled = Vec::new();

    for change in changes {
        match last.get(&change.controller) {
            Some(prev) if prev.value != change.value => {
                let steps = sweep(
                    prev.value as i64,
                    change.value as i64,
                    prev.time_ms as i64,
                    change.time_ms as i64,
                    precision,
                )?;
                scheduled.extend(steps.into_iter().map(|step| ScheduledControlChange {
                    controller: change.controller,
                    value: step.value.clamp(0, 127) as u8,
                    at_offset: Duration::from_millis(step.time.max(0) as u64),
                }));
            }
            _ => scheduled.push(ScheduledControlChange {
                controller: change.controller,
                value: change.value,
                at_offset: Duration::from_millis(change.time_ms),
            }),
        }
        last.insert(change.controller, *change);
    }

    // Stable, so same-offset messages keep command order
    scheduled.sort_by_key(|cc| cc.at_offset);
    Ok(scheduled)
}
