//! Vendor/product filters
//!
//! Patterns have the form `VID:PID`, each side either `0x`-prefixed hex
//! (1-4 digits) or `*`. An empty filter set allows every device.

use records::hex::parse_code;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error(
        "Invalid filter format '{0}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')"
    )]
    Format(String),

    #[error("Invalid {kind} '{value}' in filter '{filter}', must be '*' or 0x followed by 1-4 hex digits")]
    Code {
        filter: String,
        kind: &'static str,
        value: String,
    },
}

/// One side of a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeMatch {
    Any,
    Exact(u16),
}

impl CodeMatch {
    fn matches(self, code: u16) -> bool {
        match self {
            CodeMatch::Any => true,
            CodeMatch::Exact(expected) => expected == code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pattern {
    vendor: CodeMatch,
    product: CodeMatch,
}

/// Parsed set of device filters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    patterns: Vec<Pattern>,
}

impl DeviceFilter {
    /// Filter that allows everything
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse a list of patterns, failing on the first invalid one
    pub fn parse(patterns: &[String]) -> Result<Self, FilterError> {
        let patterns = patterns
            .iter()
            .map(|p| parse_pattern(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Check if a vendor/product pair is allowed
    pub fn allows(&self, vendor_code: u16, product_code: u16) -> bool {
        self.patterns.is_empty()
            || self
                .patterns
                .iter()
                .any(|p| p.vendor.matches(vendor_code) && p.product.matches(product_code))
    }
}

/// Validate a single pattern without keeping the result
pub fn validate_pattern(pattern: &str) -> Result<(), FilterError> {
    parse_pattern(pattern).map(|_| ())
}

fn parse_pattern(pattern: &str) -> Result<Pattern, FilterError> {
    let Some((vendor, product)) = pattern.split_once(':') else {
        return Err(FilterError::Format(pattern.to_string()));
    };
    if product.contains(':') {
        return Err(FilterError::Format(pattern.to_string()));
    }

    Ok(Pattern {
        vendor: parse_side(pattern, vendor, "VID")?,
        product: parse_side(pattern, product, "PID")?,
    })
}

fn parse_side(filter: &str, value: &str, kind: &'static str) -> Result<CodeMatch, FilterError> {
    if value == "*" {
        return Ok(CodeMatch::Any);
    }
    parse_code(value)
        .map(CodeMatch::Exact)
        .ok_or_else(|| FilterError::Code {
            filter: filter.to_string(),
            kind,
            value: value.to_string(),
        })
}
