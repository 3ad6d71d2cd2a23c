// SPDX-License-Identifier: GPL-3.0-only

//! Size expressions to byte counts

use storage_types::{Bytes, Evaluated, GIB, MIB, SizeError, SizeExpression, SizeUnit};

use crate::error::{ResolveError, Result, SpecLocation, Violation};

/// Bare numbers in declarative configurations are megabytes.
pub const CONFIG_UNIT: SizeUnit = SizeUnit::MB;
/// Bare numbers in imperative commands are mebibytes.
pub const COMMAND_UNIT: SizeUnit = SizeUnit::MiB;

/// Bare volume group extent sizes are KiB.
pub const EXTENT_UNIT: SizeUnit = SizeUnit::KiB;
pub const DEFAULT_EXTENT_SIZE: Bytes = 4 * MIB;
const MAX_EXTENT_SIZE: Bytes = 16 * GIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedSize {
    Fixed(Bytes),
    /// Grow into the remaining space.
    Grow,
}

impl ResolvedSize {
    /// Request size and grow flag as handed to the engine.
    pub fn request(self) -> (Option<Bytes>, bool) {
        match self {
            Self::Fixed(bytes) => (Some(bytes), false),
            Self::Grow => (None, true),
        }
    }
}

pub fn resolve(
    expr: &SizeExpression,
    default_unit: SizeUnit,
    location: &SpecLocation,
) -> Result<ResolvedSize> {
    match expr.evaluate(default_unit) {
        Ok(Evaluated::Fill) => Ok(ResolvedSize::Grow),
        Ok(Evaluated::Bytes(bytes)) => Ok(ResolvedSize::Fixed(bytes)),
        Err(SizeError::UnknownUnit(unit)) => Err(ResolveError::InvalidSizeUnit {
            location: location.clone(),
            unit,
        }),
        Err(SizeError::Quantity(error)) => Err(ResolveError::InvalidSizeSpec {
            location: location.clone(),
            reason: error.to_string(),
        }),
    }
}

/// Resolve a size that must be concrete ("fill" is rejected).
pub fn resolve_fixed(
    expr: &SizeExpression,
    default_unit: SizeUnit,
    location: &SpecLocation,
) -> Result<Bytes> {
    match resolve(expr, default_unit, location)? {
        ResolvedSize::Fixed(bytes) => Ok(bytes),
        ResolvedSize::Grow => Err(ResolveError::InvalidSizeSpec {
            location: location.clone(),
            reason: format!("\"{expr}\" is not allowed here"),
        }),
    }
}

/// Logical volume percentage, valid in (0, 100].
pub fn percent(value: i64, location: &SpecLocation) -> Result<u8> {
    match u8::try_from(value) {
        Ok(percent @ 1..=100) => Ok(percent),
        _ => Err(ResolveError::InvalidSizeSpec {
            location: location.clone(),
            reason: format!("percentage {value} must be between 0 (exclusive) and 100"),
        }),
    }
}

/// Physical extent size, a power of two between 1 MiB and 16 GiB.
pub fn extent_size(bytes: Bytes, location: &SpecLocation) -> Result<Bytes> {
    if bytes.is_power_of_two() && (MIB..=MAX_EXTENT_SIZE).contains(&bytes) {
        Ok(bytes)
    } else {
        Err(ResolveError::spec(
            location.clone(),
            Violation::InvalidExtentSize(bytes),
        ))
    }
}
