// ironagg-core/src/expression.rs
// Aggregation expressions used by $group: _id, accumulator arguments, n

use crate::error::{IronAggError, Result};
use crate::value::{Document, Value};
use crate::value_utils::{compare_values, evaluate_path};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

/// Extended-JSON wrappers that denote a literal rather than an operator
const LITERAL_WRAPPERS: [&str; 4] = ["$numberInt", "$numberLong", "$numberDouble", "$numberDecimal"];

/// Parsed aggregation expression
///
/// Equality is structural: two expressions are equal iff they were parsed
/// from the same expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Constant value
    Literal(Value),
    /// "$a.b" - path without the leading '$'
    FieldPath(String),
    /// "$$ROOT" - the whole input document
    Root,
    Object(Vec<(String, Expression)>),
    Array(Vec<Expression>),
    Cond {
        condition: Box<Expression>,
        then: Box<Expression>,
        otherwise: Box<Expression>,
    },
    Eq(Box<Expression>, Box<Expression>),
}

impl Expression {
    /// Parse an expression from its JSON form
    ///
    /// # Examples
    ///
    /// ```
    /// use ironagg_core::expression::Expression;
    /// use serde_json::json;
    ///
    /// let expr = Expression::from_json(&json!("$a.b")).unwrap();
    /// assert_eq!(expr, Expression::FieldPath("a.b".to_string()));
    /// ```
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        match json {
            JsonValue::String(s) => Self::parse_string(s),
            JsonValue::Array(items) => Ok(Expression::Array(
                items.iter().map(Self::from_json).collect::<Result<_>>()?,
            )),
            JsonValue::Object(obj) => {
                let Some((first, arg)) = obj.iter().next() else {
                    return Ok(Expression::Object(Vec::new()));
                };

                if !first.starts_with('$') {
                    let mut fields = Vec::with_capacity(obj.len());
                    for (name, value) in obj {
                        if name.starts_with('$') {
                            return Err(IronAggError::AggregationError(format!(
                                "Field name '{}' in an object expression cannot start with $",
                                name
                            )));
                        }
                        fields.push((name.clone(), Self::from_json(value)?));
                    }
                    return Ok(Expression::Object(fields));
                }

                if obj.len() != 1 {
                    return Err(IronAggError::AggregationError(
                        "An expression object with an operator must have exactly one field"
                            .to_string(),
                    ));
                }

                match first.as_str() {
                    op if LITERAL_WRAPPERS.contains(&op) => {
                        Ok(Expression::Literal(Value::from_json(json)?))
                    }
                    "$literal" => Ok(Expression::Literal(Value::from_json(arg)?)),
                    "$cond" => Self::parse_cond(arg),
                    "$eq" => {
                        let [a, b] = Self::parse_operands::<2>(arg, "$eq")?;
                        Ok(Expression::Eq(Box::new(a), Box::new(b)))
                    }
                    _ => Err(IronAggError::AggregationError(format!(
                        "Unrecognized expression operator: {}",
                        first
                    ))),
                }
            }
            other => Ok(Expression::Literal(Value::from_json(other)?)),
        }
    }

    fn parse_string(s: &str) -> Result<Self> {
        if let Some(variable) = s.strip_prefix("$$") {
            return match variable.split_once('.') {
                None if variable == "ROOT" => Ok(Expression::Root),
                Some(("ROOT", path)) if !path.is_empty() => {
                    Ok(Expression::FieldPath(path.to_string()))
                }
                _ => Err(IronAggError::AggregationError(format!(
                    "Unknown variable: $${}",
                    variable
                ))),
            };
        }

        match s.strip_prefix('$') {
            Some("") => Err(IronAggError::AggregationError(
                "'$' by itself is not a valid field path".to_string(),
            )),
            Some(path) => Ok(Expression::FieldPath(path.to_string())),
            None => Ok(Expression::Literal(Value::String(s.to_string()))),
        }
    }

    fn parse_cond(arg: &JsonValue) -> Result<Self> {
        let (condition, then, otherwise) = match arg {
            JsonValue::Object(obj) => {
                for key in obj.keys() {
                    if !matches!(key.as_str(), "if" | "then" | "else") {
                        return Err(IronAggError::AggregationError(format!(
                            "Unrecognized parameter to $cond: {}",
                            key
                        )));
                    }
                }
                let part = |name: &str| {
                    obj.get(name).ok_or_else(|| {
                        IronAggError::AggregationError(format!("Missing '{}' parameter to $cond", name))
                    })
                };
                (
                    Self::from_json(part("if")?)?,
                    Self::from_json(part("then")?)?,
                    Self::from_json(part("else")?)?,
                )
            }
            _ => {
                let [c, t, e] = Self::parse_operands::<3>(arg, "$cond")?;
                (c, t, e)
            }
        };

        Ok(Expression::Cond {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_operands<const N: usize>(arg: &JsonValue, op: &str) -> Result<[Expression; N]> {
        let items = arg.as_array().filter(|items| items.len() == N).ok_or_else(|| {
            IronAggError::AggregationError(format!("Expression {} takes exactly {} arguments", op, N))
        })?;
        let parsed: Vec<Expression> = items.iter().map(Self::from_json).collect::<Result<_>>()?;
        parsed.try_into().map_err(|_| {
            IronAggError::AggregationError(format!("Expression {} takes exactly {} arguments", op, N))
        })
    }

    /// Evaluate against a document; `None` means the result is missing
    pub fn evaluate(&self, doc: &Document) -> Option<Value> {
        match self {
            Expression::Literal(value) => Some(value.clone()),
            Expression::FieldPath(path) => evaluate_path(doc, path),
            Expression::Root => Some(Value::Document(doc.clone())),
            Expression::Object(fields) => Some(Value::Document(
                fields
                    .iter()
                    .filter_map(|(name, expr)| Some((name.clone(), expr.evaluate(doc)?)))
                    .collect(),
            )),
            // Missing array elements become null
            Expression::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|expr| expr.evaluate(doc).unwrap_or(Value::Null))
                    .collect(),
            )),
            Expression::Cond {
                condition,
                then,
                otherwise,
            } => {
                if condition.evaluate(doc).as_ref().is_some_and(is_truthy) {
                    then.evaluate(doc)
                } else {
                    otherwise.evaluate(doc)
                }
            }
            Expression::Eq(a, b) => {
                let equal = match (a.evaluate(doc), b.evaluate(doc)) {
                    (None, None) => true,
                    (Some(x), Some(y)) => compare_values(&x, &y) == Ordering::Equal,
                    _ => false,
                };
                Some(Value::Bool(equal))
            }
        }
    }

    /// True if the expression never reads the input document
    pub fn is_constant(&self) -> bool {
        match self {
            Expression::Literal(_) => true,
            Expression::FieldPath(_) | Expression::Root => false,
            Expression::Object(fields) => fields.iter().all(|(_, expr)| expr.is_constant()),
            Expression::Array(items) => items.iter().all(Expression::is_constant),
            Expression::Cond {
                condition,
                then,
                otherwise,
            } => condition.is_constant() && then.is_constant() && otherwise.is_constant(),
            Expression::Eq(a, b) => a.is_constant() && b.is_constant(),
        }
    }

    /// True if every field path the expression reads lies under `_id`
    pub fn depends_only_on_group_key(&self) -> bool {
        match self {
            Expression::Literal(_) => true,
            Expression::FieldPath(path) => path == "_id" || path.starts_with("_id."),
            Expression::Root => false,
            Expression::Object(fields) => fields
                .iter()
                .all(|(_, expr)| expr.depends_only_on_group_key()),
            Expression::Array(items) => items.iter().all(Expression::depends_only_on_group_key),
            Expression::Cond {
                condition,
                then,
                otherwise,
            } => {
                condition.depends_only_on_group_key()
                    && then.depends_only_on_group_key()
                    && otherwise.depends_only_on_group_key()
            }
            Expression::Eq(a, b) => a.depends_only_on_group_key() && b.depends_only_on_group_key(),
        }
    }
}

/// Boolean coercion used by `$cond`
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int32(i) => *i != 0,
        Value::Int64(i) => *i != 0,
        Value::Double(d) => *d != 0.0,
        Value::Decimal(d) => !d.is_zero(),
        _ => true,
    }
}
