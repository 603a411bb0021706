// ironagg-core/src/sort_key.rs
// Sort specifications and direction-aware sort keys

use crate::error::{IronAggError, Result};
use crate::value::{Document, Value};
use crate::value_utils::{collect_sort_leaves, compare_values};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Compound sort specification, e.g. `{y: -1, s: 1}`
///
/// Two specifications are equivalent iff their ordered (path, direction)
/// sequences are identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortSpec {
    fields: Vec<(String, SortDirection)>,
}

impl SortSpec {
    pub fn new(fields: Vec<(String, SortDirection)>) -> Result<Self> {
        if fields.is_empty() {
            return Err(IronAggError::AggregationError(
                "sortBy must not be empty".to_string(),
            ));
        }
        Ok(SortSpec { fields })
    }

    /// Parse `{path: 1 | -1, ...}`
    pub fn from_json(spec: &JsonValue) -> Result<Self> {
        let JsonValue::Object(obj) = spec else {
            return Err(IronAggError::AggregationError(
                "sortBy must be an object".to_string(),
            ));
        };

        let mut fields = Vec::with_capacity(obj.len());
        for (path, direction) in obj {
            let direction = match direction.as_f64() {
                Some(d) if d == 1.0 => SortDirection::Ascending,
                Some(d) if d == -1.0 => SortDirection::Descending,
                _ => {
                    return Err(IronAggError::AggregationError(format!(
                        "Sort direction for '{}' must be 1 or -1",
                        path
                    )))
                }
            };
            if path.is_empty() || path.starts_with('$') {
                return Err(IronAggError::AggregationError(format!(
                    "Invalid sort path: '{}'",
                    path
                )));
            }
            fields.push((path.clone(), direction));
        }

        SortSpec::new(fields)
    }

    pub fn fields(&self) -> &[(String, SortDirection)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Compute the sort key of a document
    ///
    /// Each component is the minimum reachable leaf for an ascending field
    /// and the maximum for a descending one; an unresolvable path yields
    /// null. Never fails.
    pub fn extract(&self, doc: &Document) -> SortKey {
        let mut leaves = Vec::new();
        let parts = self
            .fields
            .iter()
            .map(|(path, direction)| {
                leaves.clear();
                collect_sort_leaves(doc, path, &mut leaves);
                let extreme = match direction {
                    SortDirection::Ascending => leaves.iter().min_by(|a, b| compare_values(a, b)),
                    SortDirection::Descending => leaves.iter().max_by(|a, b| compare_values(a, b)),
                };
                KeyPart {
                    value: extreme.map(|v| (*v).clone()).unwrap_or(Value::Null),
                    descending: *direction == SortDirection::Descending,
                }
            })
            .collect();
        SortKey(parts)
    }

    /// Rebuild a key from its component values (as carried in partials)
    pub fn key_from_values(&self, values: Vec<Value>) -> Result<SortKey> {
        if values.len() != self.fields.len() {
            return Err(IronAggError::InvalidPartial(format!(
                "sort key has {} components, expected {}",
                values.len(),
                self.fields.len()
            )));
        }
        Ok(SortKey(
            values
                .into_iter()
                .zip(&self.fields)
                .map(|(value, (_, direction))| KeyPart {
                    value,
                    descending: *direction == SortDirection::Descending,
                })
                .collect(),
        ))
    }
}

/// One component of a sort key, ordered according to its direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPart {
    value: Value,
    descending: bool,
}

impl KeyPart {
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        let order = compare_values(&self.value, &other.value);
        if self.descending {
            order.reverse()
        } else {
            order
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

/// Direction-aware key: `a < b` means `a` comes first in sortBy order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SortKey(Vec<KeyPart>);

impl SortKey {
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn values(&self) -> Vec<Value> {
        self.0.iter().map(|part| part.value.clone()).collect()
    }

    pub fn approx_size(&self) -> usize {
        self.0.iter().map(|part| part.value.approx_size() + 1).sum()
    }
}
