// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Output addressing for marshalled results.
//!
//! Selectors name what a marshalling command pulls out of a context or
//! graph: vertex ids, vertex data, or result columns. Labeled variants
//! address one vertex label of a property graph.

use crate::error::EngineError;
use crate::value::DynValue;

/// Selector over an unlabeled context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// `v.id`: vertex ids of the bound fragment.
    VertexId,
    /// `v.data`: vertex values of the bound fragment.
    VertexData,
    /// `r`: the whole result.
    Result,
    /// `r.<col>`: one named result column.
    ResultColumn(String),
}

impl Selector {
    /// Parse the textual form.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] naming the selector.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "v.id" => Ok(Self::VertexId),
            "v.data" => Ok(Self::VertexData),
            "r" => Ok(Self::Result),
            _ => s
                .strip_prefix("r.")
                .filter(|col| !col.is_empty())
                .map(|col| Self::ResultColumn(col.to_owned()))
                .ok_or_else(|| {
                    EngineError::InvalidValue(format!("invalid selector: {s}"))
                }),
        }
    }
}

/// Selector over a labeled (property) context or graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabeledSelector {
    /// `v:<label>.id`: oids of one vertex label.
    VertexId {
        /// The vertex label.
        label: String,
    },
    /// `v:<label>.<prop>`: one property column of one vertex label.
    VertexProperty {
        /// The vertex label.
        label: String,
        /// The property name.
        prop: String,
    },
    /// `r:<label>`: the whole result of one vertex label.
    Result {
        /// The vertex label.
        label: String,
    },
    /// `r:<label>.<col>`: one result column of one vertex label.
    ResultColumn {
        /// The vertex label.
        label: String,
        /// The column name.
        column: String,
    },
}

impl LabeledSelector {
    /// Parse the textual form.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] naming the selector.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        let invalid = || EngineError::InvalidValue(format!("invalid selector: {s}"));
        if let Some(rest) = s.strip_prefix("v:") {
            let (label, field) = rest.split_once('.').ok_or_else(invalid)?;
            if label.is_empty() || field.is_empty() {
                return Err(invalid());
            }
            return Ok(if field == "id" {
                Self::VertexId {
                    label: label.to_owned(),
                }
            } else {
                Self::VertexProperty {
                    label: label.to_owned(),
                    prop: field.to_owned(),
                }
            });
        }
        if let Some(rest) = s.strip_prefix("r:") {
            let Some((label, column)) = rest.split_once('.') else {
                if rest.is_empty() {
                    return Err(invalid());
                }
                return Ok(Self::Result {
                    label: rest.to_owned(),
                });
            };
            if label.is_empty() || column.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::ResultColumn {
                label: label.to_owned(),
                column: column.to_owned(),
            });
        }
        Err(invalid())
    }

    /// The label this selector addresses.
    pub fn label(&self) -> &str {
        match self {
            Self::VertexId { label }
            | Self::VertexProperty { label, .. }
            | Self::Result { label }
            | Self::ResultColumn { label, .. } => label,
        }
    }
}

/// Parse a dataframe selector map: a JSON object of output column name
/// to selector text. Entries come back in name order so every rank
/// builds the same column layout.
///
/// # Errors
/// [`EngineError::InvalidValue`] on malformed JSON or selectors.
pub fn parse_selector_map(raw: &str) -> Result<Vec<(String, Selector)>, EngineError> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| EngineError::InvalidValue(format!("malformed selector map: {e}")))?;
    object
        .into_iter()
        .map(|(name, sel)| {
            let text = sel.as_str().ok_or_else(|| {
                EngineError::InvalidValue(format!("selector for {name} is not a string"))
            })?;
            Ok((name, Selector::parse(text)?))
        })
        .collect()
}

/// Labeled flavor of [`parse_selector_map`].
///
/// # Errors
/// [`EngineError::InvalidValue`] on malformed JSON or selectors.
pub fn parse_labeled_selector_map(
    raw: &str,
) -> Result<Vec<(String, LabeledSelector)>, EngineError> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| EngineError::InvalidValue(format!("malformed selector map: {e}")))?;
    object
        .into_iter()
        .map(|(name, sel)| {
            let text = sel.as_str().ok_or_else(|| {
                EngineError::InvalidValue(format!("selector for {name} is not a string"))
            })?;
            Ok((name, LabeledSelector::parse(text)?))
        })
        .collect()
}

/// Half-open vertex bound `[lower, upper)` in oid natural order. Either
/// side may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexRange {
    lower: Option<DynValue>,
    upper: Option<DynValue>,
}

impl VertexRange {
    /// Unbounded range.
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse the JSON payload form: an object with optional `begin` and
    /// `end` members. `null`, the empty string, and `{}` all mean
    /// unbounded.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on malformed JSON.
    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        if raw.is_empty() {
            return Ok(Self::all());
        }
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| EngineError::InvalidValue(format!("malformed vertex range: {e}")))?;
        match value {
            serde_json::Value::Null => Ok(Self::all()),
            serde_json::Value::Object(members) => Ok(Self {
                lower: members.get("begin").map(DynValue::from_json),
                upper: members.get("end").map(DynValue::from_json),
            }),
            other => Err(EngineError::InvalidValue(format!(
                "malformed vertex range: {other}"
            ))),
        }
    }

    /// Whether `oid` falls inside the range.
    pub fn contains(&self, oid: &DynValue) -> bool {
        if let Some(lower) = &self.lower {
            if oid < lower {
                return false;
            }
        }
        if let Some(upper) = &self.upper {
            if oid >= upper {
                return false;
            }
        }
        true
    }
}
