//! IEEE 754 decimal128 numbers, a thin wrapper around [`dec::Decimal128`].
//!
//! Every arithmetic result is rounded half-to-even to [`DECIMAL_DIGITS`]
//! significant digits within the decimal128 exponent range. Results beyond
//! that range overflow to infinity, and parsing saturates the same way.
//!
//! Trailing zeros are significant for display (`"10.100"` stays `"10.100"`)
//! but not for comparison or equality.

use crate::error::IronAggError;
use dec::{Context, Decimal128};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Significant digits kept after every operation
pub const DECIMAL_DIGITS: usize = 34;

/// Decimal number (see module docs)
#[derive(Debug, Clone, Copy)]
pub struct Decimal(Decimal128);

// Default decimal128 context: 34 digits, half-even, emax 6144
fn context() -> Context<Decimal128> {
    Context::<Decimal128>::default()
}

impl Decimal {
    pub fn zero() -> Self {
        Decimal(Decimal128::from(0i32))
    }

    pub fn nan() -> Self {
        let zero = Decimal128::from(0i32);
        Decimal(context().div(zero, zero))
    }

    pub fn infinity(negative: bool) -> Self {
        let one = Decimal128::from(if negative { -1i32 } else { 1i32 });
        Decimal(context().div(one, Decimal128::from(0i32)))
    }

    /// Exact conversion; every i64 fits in 34 digits.
    pub fn from_i64(value: i64) -> Self {
        Decimal(Decimal128::from(value))
    }

    /// Double to decimal, rounded to 34 significant digits.
    ///
    /// Trailing zeros of the expansion are dropped down to exponent 0, so
    /// `30.5` becomes `30.5` and `1e22` prints without an exponent.
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() {
            return Decimal::nan();
        }
        if value.is_infinite() {
            return Decimal::infinity(value < 0.0);
        }
        if value == 0.0 {
            return Decimal::zero();
        }

        // Exact to 34 significant digits: "d.ddd...e<k>"
        let formatted = format!("{:.*e}", DECIMAL_DIGITS - 1, value);
        let Some((mantissa, exponent)) = formatted.split_once('e') else {
            return Decimal::nan();
        };
        let Ok(exponent) = exponent.parse::<i32>() else {
            return Decimal::nan();
        };
        let (sign, mantissa) = match mantissa.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", mantissa),
        };

        let mut coefficient: String = mantissa.chars().filter(|c| *c != '.').collect();
        let mut quantum = exponent - (coefficient.len() as i32 - 1);
        while quantum < 0 && coefficient.len() > 1 && coefficient.ends_with('0') {
            coefficient.pop();
            quantum += 1;
        }

        context()
            .parse(format!("{}{}E{}", sign, coefficient, quantum).as_str())
            .map(Decimal)
            .unwrap_or_else(|_| Decimal::nan())
    }

    pub fn is_nan(&self) -> bool {
        self.0.is_nan()
    }

    pub fn is_infinite(&self) -> bool {
        self.0.is_infinite()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn add(&self, other: &Decimal) -> Decimal {
        Decimal(context().add(self.0, other.0))
    }

    /// Division rounded to 34 digits; exact quotients are reduced towards the
    /// ideal exponent `e(self) - e(divisor)`.
    pub fn div(&self, divisor: &Decimal) -> Decimal {
        Decimal(context().div(self.0, divisor.0))
    }

    /// Nearest double
    pub fn to_f64(&self) -> f64 {
        if self.is_nan() {
            return f64::NAN;
        }
        if self.is_infinite() {
            return if self.0.is_negative() {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            };
        }
        self.0.to_string().parse::<f64>().unwrap_or(f64::NAN)
    }

    /// The value as an i64 when it is integral and in range
    pub fn to_i64(&self) -> Option<i64> {
        if !self.0.is_finite() {
            return None;
        }
        let reduced = context().reduce(self.0).to_string();
        if let Ok(value) = reduced.parse::<i64>() {
            return Some(value);
        }

        // Reduced integers with trailing zeros print as "d.dddE+k"
        let (mantissa, exponent) = reduced.split_once("E+")?;
        let exponent = exponent.parse::<usize>().ok()?;
        let (sign, mantissa) = match mantissa.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", mantissa),
        };
        let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
        let zeros = (exponent + 1).checked_sub(digits.len())?;
        if digits.len() + zeros > 19 {
            return None;
        }
        format!("{}{}{}", sign, digits, "0".repeat(zeros))
            .parse::<i64>()
            .ok()
    }

    /// Stable textual key: numerically equal values produce the same string
    pub fn canonical_string(&self) -> String {
        if self.is_nan() {
            return "NaN".to_string();
        }
        if self.is_zero() {
            return "0".to_string();
        }
        context().reduce(self.0).to_string()
    }

    /// Total order: NaN < -Infinity < finite values < +Infinity
    pub fn total_cmp(&self, other: &Decimal) -> Ordering {
        match (self.is_nan(), other.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal),
        }
    }

    /// Heap footprint, for memory accounting
    pub fn approx_size(&self) -> usize {
        std::mem::size_of::<Decimal128>()
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.total_cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Sign of a NaN is not meaningful here
        if self.is_nan() {
            return write!(f, "NaN");
        }
        write!(f, "{}", self.0)
    }
}

impl FromStr for Decimal {
    type Err = IronAggError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        context()
            .parse(s.trim())
            .map(Decimal)
            .map_err(|_| IronAggError::InvalidArgument(format!("Invalid decimal string: {:?}", s)))
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Decimal::from_str(&s).map_err(serde::de::Error::custom)
    }
}
