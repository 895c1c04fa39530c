//! Parameter-count parsing and size-based estimation
//!
//! Catalog entries carry a human parameter count such as "7B" or "350M".
//! Locally discovered files often carry nothing, in which case a label is
//! estimated from the payload size through a configurable lookup table.

use serde::{Deserialize, Serialize};

const BYTES_PER_GB: f64 = 1_000_000_000.0;

/// Parse a human parameter count into billions of parameters
///
/// Suffixes are case-insensitive: `B` = billions, `M` = millions (÷1000),
/// `K` = thousands (÷1,000,000). Anything without one of these suffixes,
/// bare numbers included, resolves to `0.0`.
pub fn parse_parameter_count(text: &str) -> f64 {
    let text = text.trim();
    let Some(last) = text.chars().last() else {
        return 0.0;
    };

    let (number, divisor) = match last.to_ascii_uppercase() {
        'B' => (&text[..text.len() - 1], 1.0),
        'M' => (&text[..text.len() - 1], 1_000.0),
        'K' => (&text[..text.len() - 1], 1_000_000.0),
        _ => return 0.0,
    };

    match number.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => value / divisor,
        _ => 0.0,
    }
}

/// One row of the size → parameter label table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBreakpoint {
    /// Inclusive upper bound of the payload size, in decimal gigabytes
    pub max_gb: f64,
    pub label: String,
}

impl ParameterBreakpoint {
    fn new(max_gb: f64, label: &str) -> Self {
        Self {
            max_gb,
            label: label.to_string(),
        }
    }
}

/// Ordered lookup table estimating a parameter label from a payload size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSizeTable {
    /// Breakpoints in ascending `max_gb` order
    pub breakpoints: Vec<ParameterBreakpoint>,
    /// Label for anything above the last breakpoint
    pub largest: String,
}

impl Default for ParameterSizeTable {
    fn default() -> Self {
        Self {
            breakpoints: vec![
                ParameterBreakpoint::new(1.5, "1B"),
                ParameterBreakpoint::new(2.5, "3B"),
                ParameterBreakpoint::new(4.5, "7B"),
                ParameterBreakpoint::new(8.0, "13B"),
                ParameterBreakpoint::new(20.0, "34B"),
            ],
            largest: "70B".to_string(),
        }
    }
}

impl ParameterSizeTable {
    /// Estimated parameter label for a payload of `size` bytes
    pub fn label_for_size(&self, size: u64) -> &str {
        let gb = size as f64 / BYTES_PER_GB;
        self.breakpoints
            .iter()
            .find(|bp| gb <= bp.max_gb)
            .map_or(self.largest.as_str(), |bp| bp.label.as_str())
    }

    /// Check that breakpoints are positive, strictly ascending and labelled
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut previous = 0.0;
        for bp in &self.breakpoints {
            if !bp.max_gb.is_finite() || bp.max_gb <= previous {
                anyhow::bail!(
                    "Parameter table breakpoints must be positive and strictly ascending (got {} after {})",
                    bp.max_gb,
                    previous
                );
            }
            if bp.label.trim().is_empty() {
                anyhow::bail!("Parameter table breakpoint at {} GB has an empty label", bp.max_gb);
            }
            previous = bp.max_gb;
        }
        if self.largest.trim().is_empty() {
            anyhow::bail!("Parameter table 'largest' label cannot be empty");
        }
        Ok(())
    }
}
