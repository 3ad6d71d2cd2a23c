// SPDX-License-Identifier: GPL-3.0-only

//! Byte counts and size units shared across the workspace

use std::fmt;

use num_format::{Locale, ToFormattedString};
use thiserror::Error;

/// Canonical byte count.
///
/// Sizes are kept as `u128` because the unit table reaches yottabytes
/// (`1 YB = 10^24 B`), which does not fit into a `u64`.
pub type Bytes = u128;

pub const KIB: Bytes = 1024;
pub const MIB: Bytes = 1024 * KIB;
pub const GIB: Bytes = 1024 * MIB;

/// Fractional digits beyond this are ignored when converting quantities.
const MAX_FRACTION_DIGITS: usize = 18;

/// Size unit, decimal (`KB` = 1000 B) and binary (`KiB` = 1024 B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeUnit {
    B,
    KB,
    MB,
    GB,
    TB,
    PB,
    EB,
    ZB,
    YB,
    KiB,
    MiB,
    GiB,
    TiB,
    PiB,
    EiB,
    ZiB,
    YiB,
}

impl SizeUnit {
    pub const ALL: [SizeUnit; 17] = [
        Self::B,
        Self::KB,
        Self::MB,
        Self::GB,
        Self::TB,
        Self::PB,
        Self::EB,
        Self::ZB,
        Self::YB,
        Self::KiB,
        Self::MiB,
        Self::GiB,
        Self::TiB,
        Self::PiB,
        Self::EiB,
        Self::ZiB,
        Self::YiB,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Self::B => "B",
            Self::KB => "KB",
            Self::MB => "MB",
            Self::GB => "GB",
            Self::TB => "TB",
            Self::PB => "PB",
            Self::EB => "EB",
            Self::ZB => "ZB",
            Self::YB => "YB",
            Self::KiB => "KiB",
            Self::MiB => "MiB",
            Self::GiB => "GiB",
            Self::TiB => "TiB",
            Self::PiB => "PiB",
            Self::EiB => "EiB",
            Self::ZiB => "ZiB",
            Self::YiB => "YiB",
        }
    }

    /// Number of bytes in one unit.
    pub fn multiplier(self) -> Bytes {
        let (base, exponent): (Bytes, u32) = match self {
            Self::B => (1, 0),
            Self::KB => (1000, 1),
            Self::MB => (1000, 2),
            Self::GB => (1000, 3),
            Self::TB => (1000, 4),
            Self::PB => (1000, 5),
            Self::EB => (1000, 6),
            Self::ZB => (1000, 7),
            Self::YB => (1000, 8),
            Self::KiB => (1024, 1),
            Self::MiB => (1024, 2),
            Self::GiB => (1024, 3),
            Self::TiB => (1024, 4),
            Self::PiB => (1024, 5),
            Self::EiB => (1024, 6),
            Self::ZiB => (1024, 7),
            Self::YiB => (1024, 8),
        };
        base.pow(exponent)
    }

    /// Case-insensitive lookup (`"gib"`, `"GiB"` and `"GIB"` are the same unit).
    pub fn parse(unit: &str) -> Option<Self> {
        let unit = unit.trim();
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.symbol().eq_ignore_ascii_case(unit))
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Failure converting a textual quantity into bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error("'{0}' is negative")]
    Negative(String),
    #[error("'{0}' overflows the byte counter")]
    Overflow(String),
}

/// Convert a decimal quantity (e.g. `"1.5"`) of `unit` into bytes.
///
/// The integer part is exact; the fractional part is truncated toward zero.
pub fn quantity_to_bytes(quantity: &str, unit: SizeUnit) -> Result<Bytes, QuantityError> {
    let text = quantity.trim();
    if text.starts_with('-') {
        return Err(QuantityError::Negative(text.to_string()));
    }
    let digits = text.strip_prefix('+').unwrap_or(text);

    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let is_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !is_digits(int_part) || !is_digits(frac_part)
    {
        return Err(QuantityError::NotANumber(text.to_string()));
    }

    let overflow = || QuantityError::Overflow(text.to_string());
    let multiplier = unit.multiplier();

    let int_value: Bytes = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| overflow())?
    };
    let mut bytes = int_value.checked_mul(multiplier).ok_or_else(overflow)?;

    let frac_part = &frac_part[..frac_part.len().min(MAX_FRACTION_DIGITS)];
    if !frac_part.is_empty() {
        let scale: Bytes = 10u128.pow(frac_part.len() as u32);
        let frac_value: Bytes = frac_part.parse().map_err(|_| overflow())?;
        // multiplier * frac / scale, split so the intermediate stays in range
        let whole = (multiplier / scale) * frac_value;
        let rest = (multiplier % scale) * frac_value / scale;
        bytes = bytes
            .checked_add(whole + rest)
            .ok_or_else(overflow)?;
    }

    Ok(bytes)
}

/// Convert bytes to a human-readable string (e.g. `"1.50 GiB"`)
pub fn bytes_to_pretty(bytes: Bytes, add_bytes: bool) -> String {
    const UNITS: [&str; 9] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];

    let mut steps = 0;
    let mut val = bytes as f64;
    while val >= 1024. && steps < UNITS.len() - 1 {
        val /= 1024.;
        steps += 1;
    }

    if add_bytes {
        format!(
            "{:.2} {} ({} bytes)",
            val,
            UNITS[steps],
            bytes.to_formatted_string(&Locale::en)
        )
    } else {
        format!("{:.2} {}", val, UNITS[steps])
    }
}
