//! Linear controller sweeps.
//!
//! Two control change events that target the same controller with different
//! values are turned into a ramp of small steps so the receiving device hears a
//! smooth change instead of a jump.

use crate::error::{Error, Result};

/// Default number of steps per sweep.
pub const DEFAULT_PRECISION: usize = 128;

/// One intermediate point of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepStep {
    pub value: i64,
    pub time: i64,
}

/// Interpolate value and time from a start point to an end point.
///
/// Returns exactly `precision` steps. The start point itself is not part of
/// the output; the last step is always `(end_value, end_time)`. Values move
/// monotonically in the direction implied by the endpoints.
pub fn sweep(
    start_value: i64,
    end_value: i64,
    start_time: i64,
    end_time: i64,
    precision: usize,
) -> Result<Vec<SweepStep>> {
    if precision == 0 {
        return Err(Error::InvalidSweepRange(
            "precision must be at least 1".to_string(),
        ));
    }
    if end_time < start_time {
        return Err(Error::InvalidSweepRange(format!(
            "end time {end_time} is before start time {start_time}"
        )));
    }

    let value_delta = end_value.checked_sub(start_value).ok_or_else(|| {
        Error::InvalidSweepRange(format!("value span {start_value}..{end_value} is too wide"))
    })?;
    let time_delta = end_time.checked_sub(start_time).ok_or_else(|| {
        Error::InvalidSweepRange(format!("time span {start_time}..{end_time} is too wide"))
    })?;

    let direction = value_delta.signum() as f64;
    let value_span = value_delta.unsigned_abs() as f64;
    let time_span = time_delta as f64;
    let steps = precision as f64;

    let ramp = (1..=precision)
        .map(|i| {
            let fraction = i as f64 / steps;
            SweepStep {
                value: (start_value as f64 + direction * value_span * fraction).round() as i64,
                time: (start_time as f64 + time_span * fraction).round() as i64,
            }
        })
        .collect();
    Ok(ramp)
}
