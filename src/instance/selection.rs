//! Instance selection: regex filter on ids, then a slice over the result.

use std::str::FromStr;

use regex::Regex;

use super::ProblemInstance;
use crate::error::InstanceError;

/// Matches instance ids against a pattern anchored at the start of the id.
#[derive(Debug, Clone)]
pub struct InstanceFilter {
    regex: Regex,
}

impl InstanceFilter {
    pub fn new(pattern: &str) -> Result<Self, InstanceError> {
        let regex = Regex::new(&format!("^(?:{})", pattern))?;
        Ok(Self { regex })
    }

    pub fn matches(&self, instance_id: &str) -> bool {
        self.regex.is_match(instance_id)
    }
}

/// A `start:stop[:step]` slice with negative indices counted from the end.
///
/// A single number `n` means `:n`. Empty parts take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceSpec {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl FromStr for SliceSpec {
    type Err = InstanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InstanceError::InvalidSlice(s.to_string());

        let parts = s
            .split(':')
            .map(|part| {
                let part = part.trim();
                if part.is_empty() {
                    Ok(None)
                } else {
                    part.parse::<i64>().map(Some).map_err(|_| invalid())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let spec = match parts.as_slice() {
            [stop] => SliceSpec {
                stop: *stop,
                ..Default::default()
            },
            [start, stop] => SliceSpec {
                start: *start,
                stop: *stop,
                step: None,
            },
            [start, stop, step] => SliceSpec {
                start: *start,
                stop: *stop,
                step: *step,
            },
            _ => return Err(invalid()),
        };

        if spec.step == Some(0) {
            return Err(invalid());
        }
        Ok(spec)
    }
}

impl SliceSpec {
    /// Indices selected from a sequence of `len` items, in selection order.
    pub fn indices(&self, len: usize) -> Vec<usize> {
        let len = len as i64;
        let step = self.step.unwrap_or(1);
        let resolve = |index: i64, low: i64, high: i64| {
            let index = if index < 0 { index + len } else { index };
            index.clamp(low, high)
        };

        let mut selected = Vec::new();
        if step > 0 {
            let start = self.start.map_or(0, |i| resolve(i, 0, len));
            let stop = self.stop.map_or(len, |i| resolve(i, 0, len));
            let mut i = start;
            while i < stop {
                selected.push(i as usize);
                match i.checked_add(step) {
                    Some(next) => i = next,
                    None => break,
                }
            }
        } else {
            let start = self.start.map_or(len - 1, |i| resolve(i, -1, len - 1));
            let stop = self.stop.map_or(-1, |i| resolve(i, -1, len - 1));
            let mut i = start;
            while i > stop {
                selected.push(i as usize);
                match i.checked_add(step) {
                    Some(next) => i = next,
                    None => break,
                }
            }
        }
        selected
    }

    pub fn apply<T: Clone>(&self, items: &[T]) -> Vec<T> {
        self.indices(items.len())
            .into_iter()
            .map(|i| items[i].clone())
            .collect()
    }
}

/// Applies the optional filter, then the optional slice.
///
/// Empty strings mean "no filter" and "no slice".
pub fn select_instances(
    instances: Vec<ProblemInstance>,
    filter: Option<&str>,
    slice: Option<&str>,
) -> Result<Vec<ProblemInstance>, InstanceError> {
    let mut selected = match filter.filter(|f| !f.is_empty()) {
        Some(pattern) => {
            let filter = InstanceFilter::new(pattern)?;
            instances
                .into_iter()
                .filter(|instance| filter.matches(&instance.instance_id))
                .collect()
        }
        None => instances,
    };

    if let Some(spec) = slice.filter(|s| !s.is_empty()) {
        selected = spec.parse::<SliceSpec>()?.apply(&selected);
    }

    Ok(selected)
}
