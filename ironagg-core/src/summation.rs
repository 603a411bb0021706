// ironagg-core/src/summation.rs
// Numerically careful running totals for $sum and $avg
//
// Non-decimal inputs go to a double-double total; decimal inputs go to an
// arbitrary-precision decimal total. Both are combined only at finalization.

use crate::decimal::Decimal;
use crate::error::{IronAggError, Result};
use crate::value::{Document, Value};
use serde::{Deserialize, Serialize};

/// Widest numeric type seen so far: Int < Long < Double < Decimal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NumericWidth {
    Int,
    Long,
    Double,
    Decimal,
}

impl NumericWidth {
    /// BSON type code carried as the first element of a sum partial
    pub fn tag(self) -> i32 {
        match self {
            NumericWidth::Double => 1,
            NumericWidth::Int => 16,
            NumericWidth::Long => 18,
            NumericWidth::Decimal => 19,
        }
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            1 => Some(NumericWidth::Double),
            16 => Some(NumericWidth::Int),
            18 => Some(NumericWidth::Long),
            19 => Some(NumericWidth::Decimal),
            _ => None,
        }
    }

    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Int32(_) => Some(NumericWidth::Int),
            Value::Int64(_) => Some(NumericWidth::Long),
            Value::Double(_) => Some(NumericWidth::Double),
            Value::Decimal(_) => Some(NumericWidth::Decimal),
            _ => None,
        }
    }
}

/// Error-free transformation: `a + b == s + e` exactly
fn two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let a_virtual = s - b;
    let b_virtual = s - a_virtual;
    (s, (a - a_virtual) + (b - b_virtual))
}

/// Same as [`two_sum`], requires `|a| >= |b|`
fn fast_two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    (s, b - (s - a))
}

/// Double-double running sum
///
/// The total is `sum + addend`, with `addend` holding the rounding error of
/// `sum`. Integers are split so that sums of 64-bit integers stay exact up
/// to 2^106. Non-finite values collect in `special`, which then dominates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DoubleDoubleSum {
    sum: f64,
    addend: f64,
    special: f64,
}

impl DoubleDoubleSum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_double(&mut self, x: f64) {
        if !x.is_finite() {
            self.special += x;
            return;
        }

        let (hi, lo) = two_sum(self.sum, x);
        if !hi.is_finite() {
            self.overflow(hi);
            return;
        }
        let (sum, addend) = fast_two_sum(hi, lo + self.addend);
        if sum.is_finite() {
            self.sum = sum;
            self.addend = addend;
        } else {
            self.overflow(sum);
        }
    }

    fn overflow(&mut self, infinity: f64) {
        self.special += infinity;
        self.sum = 0.0;
        self.addend = 0.0;
    }

    pub fn add_long(&mut self, x: i64) {
        // Both halves are exactly representable as doubles
        let high = x / (1i64 << 32) * (1i64 << 32);
        let low = x - high;
        self.add_double(low as f64);
        self.add_double(high as f64);
    }

    pub fn merge(&mut self, other: &DoubleDoubleSum) {
        self.add_double(other.sum);
        self.add_double(other.addend);
        self.special += other.special;
    }

    fn has_special(&self) -> bool {
        self.special != 0.0 || self.special.is_nan()
    }

    pub fn get_double(&self) -> f64 {
        if self.has_special() {
            self.special
        } else {
            self.sum + self.addend
        }
    }

    /// The total as an `i64`, if it is integral and in range
    pub fn get_long(&self) -> Option<i64> {
        const LIMIT: f64 = 1.0e30;
        if self.has_special()
            || self.sum.trunc() != self.sum
            || self.addend.trunc() != self.addend
            || self.sum.abs() >= LIMIT
        {
            return None;
        }
        let total = self.sum as i128 + self.addend as i128;
        i64::try_from(total).ok()
    }

    pub fn to_decimal(&self) -> Decimal {
        if self.special.is_nan() {
            return Decimal::nan();
        }
        if self.special != 0.0 {
            return Decimal::infinity(self.special < 0.0);
        }
        match self.get_long() {
            Some(total) => Decimal::from_i64(total),
            None => Decimal::from_f64(self.sum).add(&Decimal::from_f64(self.addend)),
        }
    }

    /// (sum, addend) as sent over the wire
    fn wire_parts(&self) -> (f64, f64) {
        if self.has_special() {
            (self.special, 0.0)
        } else {
            (self.sum, self.addend)
        }
    }
}

/// Running state of one `$sum`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SumCell {
    width: Option<NumericWidth>,
    non_decimal: DoubleDoubleSum,
    decimal: Option<Decimal>,
}

impl SumCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn width(&self) -> Option<NumericWidth> {
        self.width
    }

    fn widen(&mut self, width: NumericWidth) {
        self.width = Some(self.width.map_or(width, |w| w.max(width)));
    }

    /// Accumulate one input; returns false for non-numeric input, which is ignored
    pub fn add(&mut self, value: &Value) -> bool {
        let Some(width) = NumericWidth::of(value) else {
            return false;
        };
        self.widen(width);
        match value {
            Value::Int32(i) => self.non_decimal.add_long(*i as i64),
            Value::Int64(i) => self.non_decimal.add_long(*i),
            Value::Double(d) => self.non_decimal.add_double(*d),
            Value::Decimal(d) => self.add_decimal(d),
            _ => {}
        }
        true
    }

    fn add_decimal(&mut self, d: &Decimal) {
        self.decimal = Some(match self.decimal.take() {
            Some(total) => total.add(d),
            None => *d,
        });
    }

    /// Combine with another cell of the same accumulator
    pub fn merge(&mut self, other: &SumCell) {
        if let Some(width) = other.width {
            self.widen(width);
        }
        self.non_decimal.merge(&other.non_decimal);
        if let Some(d) = &other.decimal {
            self.add_decimal(d);
        }
    }

    /// Merge a `[tag, sum, addend, decimal?]` partial
    pub fn merge_partial(&mut self, partial: &Value) -> Result<()> {
        let items = partial
            .as_array()
            .filter(|items| items.len() == 3 || items.len() == 4)
            .ok_or_else(|| {
                IronAggError::InvalidPartial(format!(
                    "sum partial must be a 3 or 4 element array, got {}",
                    partial.type_name()
                ))
            })?;

        let width = match &items[0] {
            Value::Int32(tag) => NumericWidth::from_tag(*tag),
            _ => None,
        }
        .ok_or_else(|| {
            IronAggError::InvalidPartial(format!("unknown numeric type tag {:?}", items[0]))
        })?;

        let double_at = |i: usize| match &items[i] {
            Value::Double(d) => Ok(*d),
            other => Err(IronAggError::InvalidPartial(format!(
                "sum partial element {} must be a double, got {}",
                i,
                other.type_name()
            ))),
        };
        let (sum, addend) = (double_at(1)?, double_at(2)?);

        let decimal = match items.get(3) {
            Some(Value::Decimal(d)) => Some(d),
            Some(other) => {
                return Err(IronAggError::InvalidPartial(format!(
                    "sum partial element 3 must be a decimal, got {}",
                    other.type_name()
                )))
            }
            None => None,
        };

        self.widen(width);
        self.non_decimal.add_double(sum);
        self.non_decimal.add_double(addend);
        if let Some(d) = decimal {
            self.add_decimal(d);
        }
        Ok(())
    }

    /// Serialize as `[tag, sum, addend]`, plus the decimal total if one exists
    pub fn to_partial(&self) -> Value {
        let (sum, addend) = self.non_decimal.wire_parts();
        let width = self.width.unwrap_or(NumericWidth::Int);
        let mut items = vec![Value::Int32(width.tag()), Value::Double(sum), Value::Double(addend)];
        if let Some(d) = &self.decimal {
            items.push(Value::Decimal(*d));
        }
        Value::Array(items)
    }

    /// Decimal total plus the non-decimal total, exact as far as 34 digits allow
    fn decimal_total(&self) -> Decimal {
        let non_decimal = self.non_decimal.to_decimal();
        match &self.decimal {
            Some(d) => d.add(&non_decimal),
            None => non_decimal,
        }
    }

    /// Typed `$sum` result; an empty sum is `Int32(0)`
    pub fn finalize(&self) -> Value {
        match self.width {
            None => Value::Int32(0),
            Some(NumericWidth::Int) => match self.non_decimal.get_long() {
                Some(total) => match i32::try_from(total) {
                    Ok(small) => Value::Int32(small),
                    Err(_) => Value::Int64(total),
                },
                None => Value::Double(self.non_decimal.get_double()),
            },
            Some(NumericWidth::Long) => match self.non_decimal.get_long() {
                Some(total) => Value::Int64(total),
                None => Value::Double(self.non_decimal.get_double()),
            },
            Some(NumericWidth::Double) => Value::Double(self.non_decimal.get_double()),
            Some(NumericWidth::Decimal) => Value::Decimal(self.decimal_total()),
        }
    }

    pub fn approx_size(&self) -> usize {
        32 + self.decimal.as_ref().map_or(0, Decimal::approx_size)
    }
}

/// Running state of one `$avg`: a sum plus the number of numeric inputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvgCell {
    total: SumCell,
    count: i64,
}

impl AvgCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    /// Non-numeric input (including null and missing) does not count
    pub fn add(&mut self, value: &Value) {
        if self.total.add(value) {
            self.count += 1;
        }
    }

    pub fn merge(&mut self, other: &AvgCell) {
        self.total.merge(&other.total);
        self.count += other.count;
    }

    /// Merge a `{count, ps}` partial
    pub fn merge_partial(&mut self, partial: &Value) -> Result<()> {
        let doc = partial.as_document().ok_or_else(|| {
            IronAggError::InvalidPartial(format!(
                "avg partial must be a document, got {}",
                partial.type_name()
            ))
        })?;

        let count = match doc.get("count") {
            Some(Value::Int64(c)) => *c,
            Some(Value::Int32(c)) => *c as i64,
            _ => {
                return Err(IronAggError::InvalidPartial(
                    "avg partial needs an integer 'count'".to_string(),
                ))
            }
        };
        let ps = doc.get("ps").ok_or_else(|| {
            IronAggError::InvalidPartial("avg partial needs a 'ps' array".to_string())
        })?;

        self.total.merge_partial(ps)?;
        self.count += count;
        Ok(())
    }

    pub fn to_partial(&self) -> Value {
        Value::Document(
            Document::new()
                .with("count", Value::Int64(self.count))
                .with("ps", self.total.to_partial()),
        )
    }

    /// Average as a double, or as a decimal once a decimal was seen;
    /// null when nothing numeric was accumulated
    pub fn finalize(&self) -> Value {
        if self.count == 0 {
            return Value::Null;
        }
        if self.total.width == Some(NumericWidth::Decimal) {
            return Value::Decimal(
                self.total
                    .decimal_total()
                    .div(&Decimal::from_i64(self.count)),
            );
        }
        Value::Double(self.total.non_decimal.get_double() / self.count as f64)
    }

    pub fn approx_size(&self) -> usize {
        self.total.approx_size() + 8
    }
}
