// ironagg-core/src/group/spec.rs
// Parsed $group stage: _id expression plus named accumulators

use crate::error::{IronAggError, Result};
use crate::expression::Expression;
use crate::selector::Sense;
use crate::sort_key::SortSpec;
use crate::value::Value;
use serde_json::Value as JsonValue;

/// `{_id: <expr>, <name>: {<op>: <args>}, ...}`
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    id: Expression,
    accumulators: Vec<AccumulatorSpec>,
}

/// One named accumulator, in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorSpec {
    pub name: String,
    pub op: AccumulatorOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccumulatorOp {
    Sum(Expression),
    Avg(Expression),
    /// `$top`, `$bottom`, `$topN`, `$bottomN`
    Select(SelectSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectSpec {
    pub sense: Sense,
    /// `$top`/`$bottom`: report one value instead of an array
    pub single: bool,
    pub n: Expression,
    pub output: Expression,
    pub sort_by: SortSpec,
}

impl SelectSpec {
    /// Operator name as written in the stage
    pub fn op_name(&self) -> &'static str {
        match (self.sense, self.single) {
            (Sense::Top, true) => "$top",
            (Sense::Top, false) => "$topN",
            (Sense::Bottom, true) => "$bottom",
            (Sense::Bottom, false) => "$bottomN",
        }
    }
}

impl AccumulatorOp {
    pub fn op_name(&self) -> &'static str {
        match self {
            AccumulatorOp::Sum(_) => "$sum",
            AccumulatorOp::Avg(_) => "$avg",
            AccumulatorOp::Select(select) => select.op_name(),
        }
    }

    fn from_json(spec: &JsonValue) -> Result<Self> {
        let JsonValue::Object(obj) = spec else {
            return Err(IronAggError::AggregationError(
                "Accumulator must be an object".to_string(),
            ));
        };
        if obj.len() != 1 {
            return Err(IronAggError::AggregationError(
                "Accumulator must have exactly one operator".to_string(),
            ));
        }
        let Some((op, args)) = obj.iter().next() else {
            return Err(IronAggError::AggregationError(
                "Accumulator must have exactly one operator".to_string(),
            ));
        };

        match op.as_str() {
            "$sum" => Ok(AccumulatorOp::Sum(Expression::from_json(args)?)),
            "$avg" => Ok(AccumulatorOp::Avg(Expression::from_json(args)?)),
            "$top" => parse_select(op, args, Sense::Top, true),
            "$bottom" => parse_select(op, args, Sense::Bottom, true),
            "$topN" => parse_select(op, args, Sense::Top, false),
            "$bottomN" => parse_select(op, args, Sense::Bottom, false),
            _ => Err(IronAggError::AggregationError(format!(
                "Unknown accumulator: {}",
                op
            ))),
        }
    }
}

fn parse_select(op: &str, args: &JsonValue, sense: Sense, single: bool) -> Result<AccumulatorOp> {
    let JsonValue::Object(obj) = args else {
        return Err(IronAggError::AggregationError(format!(
            "{} requires an object argument",
            op
        )));
    };

    for key in obj.keys() {
        let known = match key.as_str() {
            "output" | "sortBy" => true,
            "n" => !single,
            _ => false,
        };
        if !known {
            return Err(IronAggError::AggregationError(format!(
                "Unknown argument to {}: '{}'",
                op, key
            )));
        }
    }

    let output = obj.get("output").ok_or_else(|| {
        IronAggError::AggregationError(format!("{} requires an 'output' field", op))
    })?;
    let sort_by = obj.get("sortBy").ok_or_else(|| {
        IronAggError::AggregationError(format!("{} requires a 'sortBy' field", op))
    })?;

    let n = if single {
        Expression::Literal(Value::Int32(1))
    } else {
        let n = obj.get("n").ok_or_else(|| {
            IronAggError::AggregationError(format!("{} requires an 'n' field", op))
        })?;
        Expression::from_json(n)?
    };

    if n.is_constant() {
        validate_n(n.evaluate(&Default::default()))?;
    } else if !n.depends_only_on_group_key() {
        return Err(IronAggError::InvalidArgument(format!(
            "'n' for {} must be a constant or depend only on the group key",
            op
        )));
    }

    Ok(AccumulatorOp::Select(SelectSpec {
        sense,
        single,
        n,
        output: Expression::from_json(output)?,
        sort_by: SortSpec::from_json(sort_by)?,
    }))
}

/// Check an evaluated `n`: it must be a positive integral number
pub fn validate_n(value: Option<Value>) -> Result<usize> {
    let value = value.ok_or_else(|| {
        IronAggError::InvalidArgument("'n' evaluated to a missing value".to_string())
    })?;
    if !value.is_numeric() {
        return Err(IronAggError::InvalidArgument(format!(
            "'n' must be numeric, found type {}",
            value.type_name()
        )));
    }
    let n = value.as_exact_i64().ok_or_else(|| {
        IronAggError::InvalidArgument(format!("'n' must be an integer, found {:?}", value))
    })?;
    if n <= 0 {
        return Err(IronAggError::InvalidArgument(format!(
            "'n' must be greater than 0, found {}",
            n
        )));
    }
    usize::try_from(n)
        .map_err(|_| IronAggError::InvalidArgument(format!("'n' is too large: {}", n)))
}

impl GroupSpec {
    /// Parse the body of a `$group` stage
    ///
    /// # Examples
    ///
    /// ```
    /// use ironagg_core::group::GroupSpec;
    /// use serde_json::json;
    ///
    /// let spec = GroupSpec::from_json(&json!({
    ///     "_id": "$st",
    ///     "top": {"$top": {"output": "$s", "sortBy": {"y": -1}}},
    ///     "total": {"$sum": "$y"}
    /// }))
    /// .unwrap();
    /// assert_eq!(spec.accumulators().len(), 2);
    /// ```
    pub fn from_json(spec: &JsonValue) -> Result<Self> {
        let JsonValue::Object(obj) = spec else {
            return Err(IronAggError::AggregationError(
                "$group must be an object".to_string(),
            ));
        };

        let id = obj.get("_id").ok_or_else(|| {
            IronAggError::AggregationError("Group stage must have _id field".to_string())
        })?;
        let id = Expression::from_json(id)?;

        let mut accumulators = Vec::with_capacity(obj.len().saturating_sub(1));
        for (name, value) in obj {
            if name == "_id" {
                continue;
            }
            if name.starts_with('$') || name.contains('.') || name.is_empty() {
                return Err(IronAggError::AggregationError(format!(
                    "Invalid accumulator field name: '{}'",
                    name
                )));
            }
            accumulators.push(AccumulatorSpec {
                name: name.clone(),
                op: AccumulatorOp::from_json(value)?,
            });
        }

        Ok(GroupSpec { id, accumulators })
    }

    pub fn new(id: Expression, accumulators: Vec<AccumulatorSpec>) -> Self {
        GroupSpec { id, accumulators }
    }

    pub fn id(&self) -> &Expression {
        &self.id
    }

    pub fn accumulators(&self) -> &[AccumulatorSpec] {
        &self.accumulators
    }
}
