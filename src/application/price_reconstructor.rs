//! Raw exchange-rate interpretation and USD conversion.
//!
//! Raw rates are undivided integers whose decimal scaling depends on which
//! side of the pair the token sits on:
//!
//! - token is `token0`: the rate is `price0` and is divided by
//!   `10^counterpart_decimals`
//! - token is `token1`: the rate is `price1` and is divided by
//!   `10^token_decimals`
//!
//! Reserve-derived rates follow `price_of_X = reserveY * 10^18 / reserveX`.

use crate::domain::RawAmount;
use bigdecimal::BigDecimal;
use num_bigint::{BigInt, BigUint};
use num_traits::{ToPrimitive, Zero};
use serde::Serialize;
use tracing::{error, warn};

/// Fixed-point scale of reserve-derived rates.
pub const RESERVE_PRICE_SCALE: u32 = 18;

/// Result of a USD conversion.
///
/// `Unknown` stays distinct from a real price internally; it only becomes
/// `0.0` when written out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UsdPrice {
    Known(f64),
    Unknown,
}

impl UsdPrice {
    pub fn known(&self) -> Option<f64> {
        match self {
            UsdPrice::Known(v) => Some(*v),
            UsdPrice::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, UsdPrice::Known(_))
    }

    /// Known and strictly positive, the only values worth charting.
    pub fn chartable(&self) -> Option<f64> {
        self.known().filter(|v| *v > 0.0)
    }

    /// Wire value: unknown prices serialize as `0`.
    pub fn to_wire(&self) -> f64 {
        self.known().unwrap_or(0.0)
    }
}

/// Number of decimal places to remove from a raw rate.
pub fn decimal_places(is_token0: bool, token_decimals: u32, counterpart_decimals: u32) -> u32 {
    if is_token0 {
        counterpart_decimals
    } else {
        token_decimals
    }
}

/// Divide a raw amount by `10^places`.
///
/// Plain integers are divided exactly; anything else goes through `f64` with
/// a warning.
pub fn scale_raw_amount(raw: &RawAmount, places: u32) -> Option<f64> {
    if let Some(integer) = raw.to_integer() {
        let scaled = BigDecimal::new(BigInt::from(integer), i64::from(places));
        return scaled.to_f64().filter(|v| v.is_finite());
    }

    let value = raw.to_f64_lossy()?;
    warn!(
        "Raw amount '{}' is not an integer, scaling with floating point",
        raw
    );
    metrics::counter!("price_precision_fallback_total").increment(1);
    let scaled = value / 10f64.powi(places as i32);
    Some(scaled).filter(|v| v.is_finite())
}

/// Convert a raw rate into a USD price.
///
/// `counterpart_usd` is the USD price of the other token in the pair (`1.0`
/// to chart in counterpart units). Missing inputs, non-finite results and
/// negative results are `Unknown`; a rate that scales to zero stays
/// `Known(0.0)`.
pub fn to_usd_price(
    raw: &RawAmount,
    is_token0: bool,
    token_decimals: u32,
    counterpart_decimals: u32,
    counterpart_usd: Option<f64>,
) -> UsdPrice {
    let Some(counterpart_usd) = counterpart_usd.filter(|p| p.is_finite() && *p > 0.0) else {
        error!("No usable counterpart USD price for raw rate {}", raw);
        return UsdPrice::Unknown;
    };

    let places = decimal_places(is_token0, token_decimals, counterpart_decimals);
    let Some(rate) = scale_raw_amount(raw, places) else {
        error!("Unparseable raw rate '{}'", raw);
        return UsdPrice::Unknown;
    };

    let usd = rate * counterpart_usd;
    if !usd.is_finite() || usd < 0.0 {
        error!("Unusable USD price {} from raw rate {}", usd, raw);
        return UsdPrice::Unknown;
    }
    UsdPrice::Known(usd)
}

/// `reserve_y * 10^18 / reserve_x`, truncated; `"0"` when either reserve is
/// zero, negative or unparseable.
pub fn reserve_price(reserve_x: &RawAmount, reserve_y: &RawAmount) -> RawAmount {
    let scale = BigUint::from(10u32).pow(RESERVE_PRICE_SCALE);

    if let (Some(x), Some(y)) = (reserve_x.to_integer(), reserve_y.to_integer()) {
        if x.is_zero() || y.is_zero() {
            return RawAmount::zero();
        }
        return RawAmount::from(y * scale / x);
    }

    let (Some(x), Some(y)) = (reserve_x.to_decimal(), reserve_y.to_decimal()) else {
        return RawAmount::zero();
    };
    if x <= BigDecimal::zero() || y <= BigDecimal::zero() {
        return RawAmount::zero();
    }
    let scale = BigDecimal::new(BigInt::from(1u8), -i64::from(RESERVE_PRICE_SCALE));
    let (digits, _) = (y * scale / x).with_scale(0).into_bigint_and_exponent();
    RawAmount::new(digits.to_string())
}

/// `(price0, price1)` for a reserve snapshot: token1 per token0 and token0
/// per token1.
pub fn reserve_prices(reserve0: &RawAmount, reserve1: &RawAmount) -> (RawAmount, RawAmount) {
    (
        reserve_price(reserve0, reserve1),
        reserve_price(reserve1, reserve0),
    )
}
