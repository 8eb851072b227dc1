// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Property-graph schemas.
//!
//! Label ids are positions in the label vectors; property ids are
//! positions inside their label. The JSON rendering is what travels in
//! `GraphDef::schema_json`.

use serde::{Deserialize, Serialize};

use crate::column::DataType;

/// Placeholder label used when a dynamic graph takes columnar form.
pub const DEFAULT_LABEL: &str = "_";

/// One named, typed property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Property name.
    pub name: String,
    /// Element type.
    pub data_type: DataType,
}

/// One vertex or edge label with its property list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSchema {
    /// Label name.
    pub label: String,
    /// Properties in column order.
    pub properties: Vec<PropertyDef>,
}

impl LabelSchema {
    /// Position of `name` inside this label.
    pub fn property_id(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }
}

/// Schema of one property graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Vertex labels in label-id order.
    pub vertex_labels: Vec<LabelSchema>,
    /// Edge labels in label-id order.
    pub edge_labels: Vec<LabelSchema>,
}

impl PropertySchema {
    /// Schema with no labels.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Vertex label id by name.
    pub fn vertex_label_id(&self, label: &str) -> Option<usize> {
        self.vertex_labels.iter().position(|l| l.label == label)
    }

    /// Edge label id by name.
    pub fn edge_label_id(&self, label: &str) -> Option<usize> {
        self.edge_labels.iter().position(|l| l.label == label)
    }

    /// Vertex label schema by id.
    pub fn vertex_label(&self, label_id: usize) -> Option<&LabelSchema> {
        self.vertex_labels.get(label_id)
    }

    /// Edge label schema by id.
    pub fn edge_label(&self, label_id: usize) -> Option<&LabelSchema> {
        self.edge_labels.get(label_id)
    }

    /// JSON rendering for graph descriptors.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_owned())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn person_knows_schema() -> PropertySchema {
        PropertySchema {
            vertex_labels: vec![LabelSchema {
                label: "person".into(),
                properties: vec![
                    PropertyDef {
                        name: "name".into(),
                        data_type: DataType::Utf8,
                    },
                    PropertyDef {
                        name: "age".into(),
                        data_type: DataType::Int64,
                    },
                ],
            }],
            edge_labels: vec![LabelSchema {
                label: "knows".into(),
                properties: vec![PropertyDef {
                    name: "weight".into(),
                    data_type: DataType::Float64,
                }],
            }],
        }
    }

    #[test]
    fn ids_are_positions() {
        let schema = person_knows_schema();
        assert_eq!(schema.vertex_label_id("person"), Some(0));
        assert_eq!(schema.vertex_label_id("post"), None);
        assert_eq!(schema.edge_label_id("knows"), Some(0));
        assert_eq!(schema.vertex_labels[0].property_id("age"), Some(1));
        assert_eq!(schema.vertex_labels[0].property_id("height"), None);
    }

    #[test]
    fn json_rendering_round_trips() {
        let schema = person_knows_schema();
        let text = schema.to_json_string();
        let parsed: PropertySchema = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, schema);
    }
}
