//! Hex formatting for USB vendor and product codes
//!
//! Codes are rendered with a `0x` prefix, in lowercase, with
//! at least two digits (`0x0a`, `0x12`, `0x1d6b`).

/// Format a vendor or product code as `0x`-prefixed lowercase hex
pub fn format_code(code: u16) -> String {
    format!("{:#04x}", code)
}

/// Parse a `0x`-prefixed hex code (1-4 digits)
pub fn parse_code(s: &str) -> Option<u16> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

/// Serde adapter storing a `u16` as its hex string form
pub mod serde_code {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(code: &u16, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_code(*code))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u16, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_code(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid hex code: {}", s)))
    }
}
