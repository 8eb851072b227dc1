// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Rank-local keyed store of everything a worker holds between commands.
//!
//! Graphs, apps, contexts, and registered backends all live here under
//! the keys the dispatcher derives from its counter. Lookups distinguish
//! a missing key from a key bound to the wrong payload type, and
//! iteration order is the key order, so walking the registry is
//! deterministic across ranks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::app::AppEntry;
use crate::backend::UtilityObject;
use crate::context::ContextObject;
use crate::error::EngineError;
use crate::wrapper::FragmentWrapper;

/// One object held by the registry.
#[derive(Clone)]
pub enum EngineObject {
    /// A registered graph.
    Fragment(Arc<dyn FragmentWrapper>),
    /// A built algorithm instance.
    App(Arc<dyn AppEntry>),
    /// Results of one app run.
    Context(Arc<ContextObject>),
    /// A registered graph-type backend.
    Utility(UtilityObject),
}

impl EngineObject {
    fn describe(&self) -> &'static str {
        match self {
            Self::Fragment(_) => "a graph",
            Self::App(_) => "an app",
            Self::Context(_) => "a context",
            Self::Utility(_) => "a backend",
        }
    }
}

impl fmt::Debug for EngineObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fragment(w) => write!(f, "Fragment({})", w.key()),
            Self::App(a) => write!(f, "App({})", a.name()),
            Self::Context(c) => write!(f, "Context({})", c.kind()),
            Self::Utility(u) => write!(f, "Utility({u:?})"),
        }
    }
}

fn cast_error(key: &str, found: &EngineObject, want: &str) -> EngineError {
    EngineError::InvalidCast(format!(
        "object {key} holds {}, expected {want}",
        found.describe()
    ))
}

/// Keyed object store, one per rank.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: BTreeMap<String, EngineObject>,
}

impl ObjectRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `object` under `key`.
    ///
    /// # Errors
    /// [`EngineError::IllegalState`] when the key is already bound.
    pub fn put(&mut self, key: impl Into<String>, object: EngineObject) -> Result<(), EngineError> {
        let key = key.into();
        if self.objects.contains_key(&key) {
            return Err(EngineError::IllegalState(format!(
                "key {key} is already bound"
            )));
        }
        self.objects.insert(key, object);
        Ok(())
    }

    /// Look up `key`.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] for unbound keys.
    pub fn get(&self, key: &str) -> Result<&EngineObject, EngineError> {
        self.objects
            .get(key)
            .ok_or_else(|| EngineError::NotFound(format!("object {key}")))
    }

    /// Look up the graph bound under `key`.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] for unbound keys,
    /// [`EngineError::InvalidCast`] when the key holds something else.
    pub fn get_fragment(&self, key: &str) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        match self.get(key)? {
            EngineObject::Fragment(wrapper) => Ok(Arc::clone(wrapper)),
            other => Err(cast_error(key, other, "a graph")),
        }
    }

    /// Look up the app bound under `key`.
    ///
    /// # Errors
    /// See [`ObjectRegistry::get_fragment`].
    pub fn get_app(&self, key: &str) -> Result<Arc<dyn AppEntry>, EngineError> {
        match self.get(key)? {
            EngineObject::App(app) => Ok(Arc::clone(app)),
            other => Err(cast_error(key, other, "an app")),
        }
    }

    /// Look up the context bound under `key`.
    ///
    /// # Errors
    /// See [`ObjectRegistry::get_fragment`].
    pub fn get_context(&self, key: &str) -> Result<Arc<ContextObject>, EngineError> {
        match self.get(key)? {
            EngineObject::Context(ctx) => Ok(Arc::clone(ctx)),
            other => Err(cast_error(key, other, "a context")),
        }
    }

    /// Look up the backend bound under `key`.
    ///
    /// # Errors
    /// See [`ObjectRegistry::get_fragment`].
    pub fn get_utility(&self, key: &str) -> Result<UtilityObject, EngineError> {
        match self.get(key)? {
            EngineObject::Utility(backend) => Ok(backend.clone()),
            other => Err(cast_error(key, other, "a backend")),
        }
    }

    /// Unbind `key`, returning what it held.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] for unbound keys, so a second removal
    /// of the same key fails.
    pub fn remove(&mut self, key: &str) -> Result<EngineObject, EngineError> {
        self.objects
            .remove(key)
            .ok_or_else(|| EngineError::NotFound(format!("object {key}")))
    }

    /// Whether `key` is bound.
    pub fn has(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    /// Bound objects in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EngineObject)> {
        self.objects.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of bound objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::app::AppCatalog;
    use crate::backend::ColumnarBackend;
    use crate::column::Column;
    use crate::columnar::{ColumnarFragment, FragmentData, FragmentDataSet, VertexTable};
    use crate::context::ContextObject;
    use crate::wrapper::{ColumnarWrapper, FragmentHandle};

    fn tiny_fragment() -> Arc<ColumnarFragment> {
        let set = FragmentDataSet {
            directed: false,
            fragments: vec![FragmentData {
                vertices: vec![VertexTable {
                    label: "person".into(),
                    oids: Column::Int64(vec![1, 2]),
                    properties: Vec::new(),
                }],
                edges: Vec::new(),
            }],
        };
        Arc::new(ColumnarFragment::from_data_set(0, 1, false, &set).unwrap())
    }

    fn graph_object(key: &str) -> EngineObject {
        EngineObject::Fragment(Arc::new(ColumnarWrapper::new(key, tiny_fragment(), None)))
    }

    #[test]
    fn registry_binds_each_key_once() {
        let mut registry = ObjectRegistry::new();
        registry.put("graph_1", graph_object("graph_1")).unwrap();
        assert!(registry.has("graph_1"));
        assert_eq!(
            registry.put("graph_1", graph_object("graph_1")).unwrap_err(),
            EngineError::IllegalState("key graph_1 is already bound".into())
        );

        registry.remove("graph_1").unwrap();
        assert!(!registry.has("graph_1"));
        assert!(matches!(
            registry.remove("graph_1"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn typed_getters_distinguish_miss_from_mismatch() {
        let mut registry = ObjectRegistry::new();
        assert!(matches!(
            registry.get_fragment("graph_9"),
            Err(EngineError::NotFound(_))
        ));

        registry.put("graph_1", graph_object("graph_1")).unwrap();
        let app = AppCatalog::builtin().create("degree_centrality").unwrap();
        registry.put("app_2", EngineObject::App(app)).unwrap();
        let ctx = ContextObject::tensor(
            FragmentHandle::Columnar(tiny_fragment()),
            Column::Int64(vec![7]),
        );
        registry
            .put("ctx_3", EngineObject::Context(Arc::new(ctx)))
            .unwrap();
        registry
            .put(
                "sig_4",
                EngineObject::Utility(crate::backend::UtilityObject::Property(Arc::new(
                    ColumnarBackend,
                ))),
            )
            .unwrap();

        assert_eq!(registry.get_fragment("graph_1").unwrap().key(), "graph_1");
        assert_eq!(registry.get_app("app_2").unwrap().name(), "degree_centrality");
        assert!(registry.get_context("ctx_3").is_ok());
        assert!(registry.get_utility("sig_4").is_ok());

        assert_eq!(
            registry.get_app("graph_1").unwrap_err(),
            EngineError::InvalidCast("object graph_1 holds a graph, expected an app".into())
        );
        assert!(matches!(
            registry.get_fragment("ctx_3"),
            Err(EngineError::InvalidCast(_))
        ));
        assert!(matches!(
            registry.get_context("sig_4"),
            Err(EngineError::InvalidCast(_))
        ));
    }

    #[test]
    fn iteration_is_key_ordered() {
        let mut registry = ObjectRegistry::new();
        for key in ["graph_3", "graph_1", "graph_2"] {
            registry.put(key, graph_object(key)).unwrap();
        }
        assert_eq!(registry.len(), 3);
        let keys: Vec<_> = registry.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["graph_1", "graph_2", "graph_3"]);
    }
}
