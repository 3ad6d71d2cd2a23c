// SPDX-License-Identifier: GPL-3.0-only

//! Size expressions as they appear in storage configurations
//!
//! Three shapes are accepted:
//! - the sentinel `"fill"` (grow into the remaining space),
//! - a scalar: a bare number (`42`) or a number with a unit (`"1.5 GiB"`),
//! - a mapping of unit to quantity whose contributions are summed
//!   (`{ gib = 1, mib = 512 }`).
//!
//! Units are validated when the expression is resolved, not when it is parsed,
//! so that the resolver can attach the offending configuration location.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Bytes, QuantityError, SizeUnit, quantity_to_bytes};

/// Sentinel meaning "grow to fill the remaining space".
pub const FILL: &str = "fill";

/// A single numeric quantity, kept textual so decimal values stay exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Integer(u64),
    Float(f64),
    Text(String),
}

impl Quantity {
    /// Decimal representation used for exact conversion.
    pub fn as_decimal(&self) -> String {
        match self {
            Self::Integer(value) => value.to_string(),
            // `Display` for f64 never uses exponent notation
            Self::Float(value) => value.to_string(),
            Self::Text(value) => value.trim().to_string(),
        }
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Self::Integer(value)
    }
}

impl From<String> for Quantity {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_decimal())
    }
}

/// Failure evaluating a size expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizeError {
    #[error("unknown size unit '{0}'")]
    UnknownUnit(String),
    #[error(transparent)]
    Quantity(#[from] QuantityError),
}

/// An evaluated size expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluated {
    Fill,
    Bytes(Bytes),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizeExpression {
    /// Grow to fill the remaining space.
    Fill,
    /// A quantity with an optional unit; without a unit the caller's default applies.
    Scalar {
        quantity: Quantity,
        unit: Option<String>,
    },
    /// Unit → quantity, summed.
    Units(BTreeMap<String, Quantity>),
}

impl SizeExpression {
    pub fn scalar(quantity: impl Into<Quantity>, unit: &str) -> Self {
        Self::Scalar {
            quantity: quantity.into(),
            unit: Some(unit.to_string()),
        }
    }

    pub fn is_fill(&self) -> bool {
        matches!(self, Self::Fill)
    }

    /// Evaluate to a byte count; quantities without a unit use `default_unit`.
    pub fn evaluate(&self, default_unit: SizeUnit) -> Result<Evaluated, SizeError> {
        let convert = |quantity: &Quantity, unit: &str| -> Result<Bytes, SizeError> {
            let unit = SizeUnit::parse(unit).ok_or_else(|| SizeError::UnknownUnit(unit.to_string()))?;
            Ok(quantity_to_bytes(&quantity.as_decimal(), unit)?)
        };

        match self {
            Self::Fill => Ok(Evaluated::Fill),
            Self::Scalar { quantity, unit } => {
                let bytes = match unit {
                    Some(unit) => convert(quantity, unit)?,
                    None => quantity_to_bytes(&quantity.as_decimal(), default_unit)?,
                };
                Ok(Evaluated::Bytes(bytes))
            }
            Self::Units(units) => {
                let mut total: Bytes = 0;
                for (unit, quantity) in units {
                    let bytes = convert(quantity, unit)?;
                    total = total
                        .checked_add(bytes)
                        .ok_or_else(|| QuantityError::Overflow(self.to_string()))?;
                }
                Ok(Evaluated::Bytes(total))
            }
        }
    }

    fn from_text(text: &str) -> Self {
        let text = text.trim();
        if text.eq_ignore_ascii_case(FILL) {
            return Self::Fill;
        }

        let split = text
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let unit = unit.trim();

        Self::Scalar {
            quantity: Quantity::Text(number.trim().to_string()),
            unit: (!unit.is_empty()).then(|| unit.to_string()),
        }
    }
}

impl fmt::Display for SizeExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fill => f.write_str(FILL),
            Self::Scalar {
                quantity,
                unit: Some(unit),
            } => write!(f, "{quantity} {unit}"),
            Self::Scalar {
                quantity,
                unit: None,
            } => write!(f, "{quantity}"),
            Self::Units(units) => {
                let parts: Vec<String> = units
                    .iter()
                    .map(|(unit, quantity)| format!("{quantity} {unit}"))
                    .collect();
                f.write_str(&parts.join(" + "))
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeRepr {
    Integer(u64),
    Float(f64),
    Text(String),
    Units(BTreeMap<String, Quantity>),
}

impl<'de> Deserialize<'de> for SizeExpression {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match SizeRepr::deserialize(deserializer)? {
            SizeRepr::Integer(value) => Self::Scalar {
                quantity: Quantity::Integer(value),
                unit: None,
            },
            SizeRepr::Float(value) => Self::Scalar {
                quantity: Quantity::Float(value),
                unit: None,
            },
            SizeRepr::Text(text) => Self::from_text(&text),
            SizeRepr::Units(units) => Self::Units(units),
        })
    }
}

impl Serialize for SizeExpression {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Units(units) => {
                let mut map = serializer.serialize_map(Some(units.len()))?;
                for (unit, quantity) in units {
                    map.serialize_entry(unit, quantity)?;
                }
                map.end()
            }
            Self::Scalar {
                quantity,
                unit: None,
            } => quantity.serialize(serializer),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fill_sentinel() {
        let expr: SizeExpression = serde_json::from_str("\"fill\"").unwrap();
        assert!(expr.is_fill());
    }

    #[test]
    fn parses_scalar_with_unit() {
        let expr: SizeExpression = serde_json::from_str("\"1.5 GiB\"").unwrap();
        assert_eq!(
            expr,
            SizeExpression::Scalar {
                quantity: Quantity::Text("1.5".to_string()),
                unit: Some("GiB".to_string()),
            }
        );
    }

    #[test]
    fn parses_bare_number_without_unit() {
        let expr: SizeExpression = serde_json::from_str("512").unwrap();
        assert_eq!(
            expr,
            SizeExpression::Scalar {
                quantity: Quantity::Integer(512),
                unit: None,
            }
        );
    }

    #[test]
    fn evaluates_with_default_unit() {
        let expr: SizeExpression = serde_json::from_str("512").unwrap();
        assert_eq!(
            expr.evaluate(SizeUnit::MiB),
            Ok(Evaluated::Bytes(512 * 1024 * 1024))
        );
        assert_eq!(SizeExpression::Fill.evaluate(SizeUnit::MB), Ok(Evaluated::Fill));
    }

    #[test]
    fn unknown_units_are_reported() {
        let expr = SizeExpression::scalar(1u64, "furlong");
        assert_eq!(
            expr.evaluate(SizeUnit::MB),
            Err(SizeError::UnknownUnit("furlong".to_string()))
        );
    }

    #[test]
    fn parses_unit_mapping_from_toml() {
        #[derive(Deserialize)]
        struct Holder {
            size: SizeExpression,
        }

        let holder: Holder = toml::from_str("size = { mb = 10, yb = 4 }").unwrap();
        let SizeExpression::Units(units) = holder.size else {
            panic!("expected a unit mapping");
        };
        assert_eq!(units.get("mb"), Some(&Quantity::Integer(10)));
        assert_eq!(units.get("yb"), Some(&Quantity::Integer(4)));
    }
}
