//! Canonical numeric representations used at the store boundary.
//!
//! Raw on-chain values (exchange rates, reserves, traded amounts) arrive from
//! the snapshot store as JSON strings, integers or floats depending on how the
//! indexer wrote them. They are converted exactly once, here, into
//! [`RawAmount`]; timestamps and block numbers are converted into `i64`/`u64`.
//! Nothing downstream compares across representations.

use bigdecimal::BigDecimal;
use num_bigint::BigUint;
use num_traits::{FromPrimitive, Zero};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Largest magnitude below which every whole `f64` is an exact integer.
const MAX_EXACT_FLOAT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// An undivided on-chain quantity kept in its decimal string form.
///
/// The string form is preserved so that 256-bit magnitudes never pass
/// through `f64` before the caller decides how to scale them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RawAmount(String);

impl RawAmount {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    pub fn zero() -> Self {
        Self("0".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse as an arbitrary-precision unsigned integer.
    ///
    /// Returns `None` for anything that is not a plain base-10 integer
    /// (fractions, exponents, signs, garbage).
    pub fn to_integer(&self) -> Option<BigUint> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        BigUint::from_str(&self.0).ok()
    }

    /// Parse as an exact decimal, accepting fractional and exponent forms.
    pub fn to_decimal(&self) -> Option<BigDecimal> {
        BigDecimal::from_str(&self.0).ok()
    }

    /// Lossy parse used only by degraded-precision paths.
    pub fn to_f64_lossy(&self) -> Option<f64> {
        self.0.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    /// Integer magnitude used for ordering (e.g. reserve depth).
    ///
    /// Unparseable or negative values order as zero.
    pub fn magnitude(&self) -> BigUint {
        if let Some(value) = self.to_integer() {
            return value;
        }
        self.to_f64_lossy()
            .filter(|v| *v > 0.0)
            .and_then(BigUint::from_f64)
            .unwrap_or_else(BigUint::zero)
    }

    pub fn is_zero(&self) -> bool {
        match self.to_decimal() {
            Some(value) => value.is_zero(),
            None => false,
        }
    }
}

impl From<BigUint> for RawAmount {
    fn from(value: BigUint) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for RawAmount {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for RawAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct RawAmountVisitor;

impl<'de> Visitor<'de> for RawAmountVisitor {
    type Value = RawAmount;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a numeric string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<RawAmount, E> {
        Ok(RawAmount::new(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<RawAmount, E> {
        Ok(RawAmount(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<RawAmount, E> {
        Ok(RawAmount(v.to_string()))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<RawAmount, E> {
        Ok(RawAmount(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<RawAmount, E> {
        if !v.is_finite() {
            return Err(E::custom("non-finite raw amount"));
        }
        if v.fract() != 0.0 {
            return Ok(RawAmount(v.to_string()));
        }
        if v.abs() <= MAX_EXACT_FLOAT_INTEGER {
            return Ok(RawAmount(format!("{:.0}", v)));
        }
        // Past 2^53 the float no longer holds the digits that were written.
        // Exponent form keeps it off the exact integer path.
        warn!("Raw amount {:e} exceeds exact float range; store it as a string", v);
        Ok(RawAmount(format!("{:e}", v)))
    }
}

impl<'de> Deserialize<'de> for RawAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RawAmountVisitor)
    }
}

struct EpochVisitor;

impl<'de> Visitor<'de> for EpochVisitor {
    type Value = i64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an integer, or a string holding an integer")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
        Ok(v)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
        i64::try_from(v).map_err(|_| E::custom(format!("integer {} out of range", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
        if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
            Ok(v as i64)
        } else {
            Err(E::custom(format!("expected whole number, got {}", v)))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
        let trimmed = v.trim();
        if let Ok(parsed) = trimmed.parse::<i64>() {
            return Ok(parsed);
        }
        match trimmed.parse::<f64>() {
            Ok(parsed) => self.visit_f64(parsed),
            Err(_) => Err(E::custom(format!("invalid integer string '{}'", v))),
        }
    }
}

/// Deserialize an epoch-seconds value stored as number or string.
pub fn epoch_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    deserializer.deserialize_any(EpochVisitor)
}

/// Deserialize a block number stored as number or string.
pub fn block_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = deserializer.deserialize_any(EpochVisitor)?;
    u64::try_from(value).map_err(|_| de::Error::custom(format!("negative block number {}", value)))
}
