//! Filter parameters sent with every poll, and the `key=value&...` update
//! strings operators use to change them.

use std::fmt;
use tracing::warn;

use crate::error::FilterError;

/// Area the endpoint is asked about, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterParameters {
    /// Minimum IV percentage, 0-100
    pub min_iv: u8,
    /// Value `min_iv` held before the last `iv=` update
    pub prev_min_iv: u8,
    /// Comma separated integer pair, passed through verbatim
    pub ex_min_iv: String,
    pub bbox: BoundingBox,
}

impl Default for FilterParameters {
    fn default() -> Self {
        Self {
            min_iv: 97,
            prev_min_iv: 97,
            ex_min_iv: "113,149".to_string(),
            bbox: BoundingBox {
                south: 52.623190318134554,
                west: 13.151621818542482,
                north: 52.65587329539442,
                east: 13.261485099792482,
            },
        }
    }
}

impl FilterParameters {
    /// Apply an update string such as `iv=95&exiv=110,145` on top of `self`.
    ///
    /// Returns the new parameters; `self` is untouched, so a rejected update
    /// leaves the current filters as they were. Unknown keys are logged and
    /// skipped.
    pub fn apply_update(&self, update: &str) -> Result<FilterParameters, FilterError> {
        let mut next = self.clone();

        for pair in update.split('&').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| FilterError::MalformedPair(pair.to_string()))?;
            let (key, value) = (key.trim(), value.trim());

            match key {
                "iv" => {
                    let min_iv = parse_iv(value)?;
                    next.prev_min_iv = next.min_iv;
                    next.min_iv = min_iv;
                }
                "exiv" => next.ex_min_iv = parse_ex_iv(value)?,
                "bbox" => next.bbox = parse_bbox(value)?,
                _ => warn!(key, value, "Ignoring unknown filter key"),
            }
        }

        Ok(next)
    }
}

impl fmt::Display for FilterParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iv={}&exiv={}&bbox={},{},{},{}",
            self.min_iv,
            self.ex_min_iv,
            self.bbox.south,
            self.bbox.west,
            self.bbox.north,
            self.bbox.east
        )
    }
}

fn invalid(key: &str, value: &str) -> FilterError {
    FilterError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_iv(value: &str) -> Result<u8, FilterError> {
    value
        .parse::<u8>()
        .ok()
        .filter(|iv| *iv <= 100)
        .ok_or_else(|| invalid("iv", value))
}

fn parse_ex_iv(value: &str) -> Result<String, FilterError> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let valid = parts.len() == 2 && parts.iter().all(|p| p.parse::<u32>().is_ok());
    if valid {
        Ok(parts.join(","))
    } else {
        Err(invalid("exiv", value))
    }
}

fn parse_bbox(value: &str) -> Result<BoundingBox, FilterError> {
    let coords = value
        .split(',')
        .map(|c| c.trim().parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|_| invalid("bbox", value))?;

    match coords.as_slice() {
        [south, west, north, east] if south <= north => Ok(BoundingBox {
            south: *south,
            west: *west,
            north: *north,
            east: *east,
        }),
        _ => Err(invalid("bbox", value)),
    }
}
