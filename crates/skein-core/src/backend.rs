// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph-type backends, resolved per fragment kind.
//!
//! A backend knows how to build graphs of one kind: property backends
//! create and extend them, projection backends flatten them into simple
//! graphs. The host catalog maps each kind to its builtin backend;
//! type registration binds a backend instance into the registry under a
//! signature so later commands can address it by name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use skein_comm::Collective;
use skein_proto::{GraphKind, ProjectedExt};
use skein_store::{group_member_key, ObjectId, ObjectStore};

use crate::columnar::{
    ColumnarFragment, FragmentDataSet, ProjectedFragment, StoreHandles, FRAGMENT_GROUP_TYPE_NAME,
};
#[cfg(feature = "dynamic")]
use crate::dynamic::{DynamicFragment, DynamicProjectedFragment};
use crate::error::EngineError;
#[cfg(feature = "dynamic")]
use crate::value::DynValue;
#[cfg(feature = "dynamic")]
use crate::wrapper::{DynamicProjectedWrapper, DynamicWrapper};
use crate::wrapper::{ColumnarWrapper, FragmentHandle, FragmentWrapper, ProjectedWrapper};

/// Where a new property graph's rows come from.
#[derive(Debug, Clone, Copy)]
pub enum PropertySource<'a> {
    /// Attach a fragment group already persisted in the store.
    Store(ObjectId),
    /// Build from inline tables; the flag asks for generated edge ids.
    Inline(&'a FragmentDataSet, bool),
    /// Start empty; only mutable kinds can.
    Empty {
        /// Whether the new graph is directed.
        directed: bool,
    },
}

/// Builds and extends property graphs of one kind.
pub trait PropertyBackend: Send + Sync {
    /// Build a graph under `key` from `source`.
    ///
    /// Collective when the source is: every rank passes the same source
    /// and gets its own fragment back.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] for sources the kind cannot build
    /// from, [`EngineError::NotFound`] for unknown store ids; load and
    /// routing faults propagate typed.
    fn create(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        key: &str,
        source: PropertySource<'_>,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError>;

    /// Merge `data`'s labels into `base` as a new graph under `dst_key`.
    ///
    /// # Errors
    /// [`EngineError::InvalidOperation`] for kinds without label
    /// schemas; merge faults propagate typed.
    fn add_labels(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        base: &FragmentHandle,
        dst_key: &str,
        data: &FragmentDataSet,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError>;
}

/// Inputs of one project-to-simple request.
#[derive(Debug, Clone, Default)]
pub struct ProjectionRequest {
    /// Vertex label to keep.
    pub v_label: String,
    /// Edge label to keep.
    pub e_label: String,
    /// Vertex property to carry as data, when any.
    pub v_prop: Option<String>,
    /// Edge property to carry as data, when any.
    pub e_prop: Option<String>,
}

/// Flattens property graphs into simple ones.
pub trait ProjectionBackend: Send + Sync {
    /// Project `base` (registered under `parent_key`) into a simple
    /// graph under `dst_key`.
    ///
    /// # Errors
    /// [`EngineError::InvalidOperation`] for source kinds the backend
    /// cannot project; label and property faults propagate typed.
    fn project(
        &self,
        comm: &dyn Collective,
        base: &FragmentHandle,
        parent_key: &str,
        dst_key: &str,
        req: &ProjectionRequest,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError>;
}

/// A backend instance held in the registry under a type signature.
#[derive(Clone)]
pub enum UtilityObject {
    /// Builds and extends property graphs.
    Property(Arc<dyn PropertyBackend>),
    /// Projects property graphs into simple ones.
    Projection(Arc<dyn ProjectionBackend>),
}

impl fmt::Debug for UtilityObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property(_) => f.write_str("Property(..)"),
            Self::Projection(_) => f.write_str("Projection(..)"),
        }
    }
}

/// Builds a backend instance for one registered kind.
pub type BackendFactory = Arc<dyn Fn() -> UtilityObject + Send + Sync>;

/// Host catalog of graph-type backends, keyed by fragment kind.
#[derive(Default, Clone)]
pub struct BackendCatalog {
    factories: HashMap<GraphKind, BackendFactory>,
}

impl BackendCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the builtin backend of every supported kind.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog
            .factories
            .insert(GraphKind::ArrowProperty, Arc::new(|| {
                UtilityObject::Property(Arc::new(ColumnarBackend))
            }));
        catalog
            .factories
            .insert(GraphKind::ArrowProjected, Arc::new(|| {
                UtilityObject::Projection(Arc::new(ColumnarProjector))
            }));
        #[cfg(feature = "dynamic")]
        {
            catalog
                .factories
                .insert(GraphKind::DynamicProperty, Arc::new(|| {
                    UtilityObject::Property(Arc::new(DynamicBackend))
                }));
            catalog
                .factories
                .insert(GraphKind::DynamicProjected, Arc::new(|| {
                    UtilityObject::Projection(Arc::new(DynamicProjector))
                }));
        }
        catalog
    }

    /// Register a factory for `kind`.
    ///
    /// # Errors
    /// [`EngineError::IllegalState`] when the kind already has one.
    pub fn register(&mut self, kind: GraphKind, factory: BackendFactory) -> Result<(), EngineError> {
        if self.factories.contains_key(&kind) {
            return Err(EngineError::IllegalState(format!(
                "backend for {kind} is already registered"
            )));
        }
        self.factories.insert(kind, factory);
        Ok(())
    }

    /// Whether `kind` has a backend.
    pub fn has(&self, kind: GraphKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Build a backend instance for `kind`.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] for kinds without one.
    pub fn resolve(&self, kind: GraphKind) -> Result<UtilityObject, EngineError> {
        self.factories
            .get(&kind)
            .map(|factory| factory())
            .ok_or_else(|| EngineError::InvalidValue(format!("no backend for {kind} graphs")))
    }
}

/// Builtin backend of immutable columnar property graphs.
///
/// Created graphs always go through the store: inline loads persist
/// their fragments and group them, store sources attach the group's
/// member for this rank.
#[derive(Debug, Clone, Copy)]
pub struct ColumnarBackend;

impl PropertyBackend for ColumnarBackend {
    fn create(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        key: &str,
        source: PropertySource<'_>,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        match source {
            PropertySource::Store(group_id) => {
                let spec = comm.spec();
                let meta = store
                    .get_meta(group_id)?
                    .ok_or_else(|| EngineError::NotFound(format!("store object {group_id}")))?;
                if meta.type_name != FRAGMENT_GROUP_TYPE_NAME {
                    return Err(EngineError::InvalidCast(format!(
                        "store object {group_id} holds {}, not {FRAGMENT_GROUP_TYPE_NAME}",
                        meta.type_name
                    )));
                }
                let member = meta.member(&group_member_key(spec.rank)).ok_or_else(|| {
                    EngineError::NotFound(format!(
                        "fragment member for rank {} in group {group_id}",
                        spec.rank
                    ))
                })?;
                let (frag, vmap_id) = ColumnarFragment::load(store, member)?;
                if frag.fnum() != spec.peers {
                    return Err(EngineError::IllegalState(format!(
                        "fragment group spans {} ranks, engine runs {}",
                        frag.fnum(),
                        spec.peers
                    )));
                }
                let handles = StoreHandles {
                    object_id: member,
                    vmap_id,
                    group_id,
                };
                Ok(Arc::new(ColumnarWrapper::new(key, Arc::new(frag), Some(handles))))
            }
            PropertySource::Inline(data, generate_eid) => {
                let spec = comm.spec();
                let frag = ColumnarFragment::from_data_set(spec.rank, spec.peers, generate_eid, data)?;
                let handles = frag.persist(store, comm)?;
                Ok(Arc::new(ColumnarWrapper::new(key, Arc::new(frag), Some(handles))))
            }
            PropertySource::Empty { .. } => Err(EngineError::InvalidValue(
                "a columnar graph needs inline tables or a store group".into(),
            )),
        }
    }

    fn add_labels(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        base: &FragmentHandle,
        dst_key: &str,
        data: &FragmentDataSet,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        let FragmentHandle::Columnar(frag) = base else {
            return Err(EngineError::InvalidOperation(
                "add labels requires a property graph".into(),
            ));
        };
        let next = frag.with_labels(data)?;
        // The merge rebuilt the vertex map, so the group gets a fresh one.
        let handles = next.persist(store, comm)?;
        Ok(Arc::new(ColumnarWrapper::new(dst_key, Arc::new(next), Some(handles))))
    }
}

/// Builtin projector of columnar property graphs.
#[derive(Debug, Clone, Copy)]
pub struct ColumnarProjector;

impl ProjectionBackend for ColumnarProjector {
    fn project(
        &self,
        _comm: &dyn Collective,
        base: &FragmentHandle,
        parent_key: &str,
        dst_key: &str,
        req: &ProjectionRequest,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        let FragmentHandle::Columnar(frag) = base else {
            return Err(EngineError::InvalidOperation(
                "projection source must be a property graph".into(),
            ));
        };
        let projected = ProjectedFragment::project(
            frag,
            parent_key,
            &req.v_label,
            &req.e_label,
            req.v_prop.as_deref(),
            req.e_prop.as_deref(),
        )?;
        let ext = ProjectedExt {
            parent: parent_key.to_owned(),
            v_label: req.v_label.clone(),
            e_label: req.e_label.clone(),
            v_prop: req.v_prop.clone(),
            e_prop: req.e_prop.clone(),
        };
        Ok(Arc::new(ProjectedWrapper::new(
            dst_key,
            Arc::new(projected),
            ext,
            frag.generate_eid(),
        )))
    }
}

/// Builtin backend of mutable dynamic graphs.
///
/// Dynamic graphs start empty and grow through modify commands, so the
/// only source this backend accepts is [`PropertySource::Empty`].
#[cfg(feature = "dynamic")]
#[derive(Debug, Clone, Copy)]
pub struct DynamicBackend;

#[cfg(feature = "dynamic")]
impl PropertyBackend for DynamicBackend {
    fn create(
        &self,
        comm: &dyn Collective,
        _store: &dyn ObjectStore,
        key: &str,
        source: PropertySource<'_>,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        let PropertySource::Empty { directed } = source else {
            return Err(EngineError::InvalidValue(
                "dynamic graphs start empty and load through modify commands".into(),
            ));
        };
        let spec = comm.spec();
        let frag = Arc::new(DynamicFragment::new(spec.rank, spec.peers, directed));
        Ok(Arc::new(DynamicWrapper::new(key, frag)))
    }

    fn add_labels(
        &self,
        _comm: &dyn Collective,
        _store: &dyn ObjectStore,
        _base: &FragmentHandle,
        _dst_key: &str,
        _data: &FragmentDataSet,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(EngineError::InvalidOperation(
            "dynamic graphs have no label schema to extend".into(),
        ))
    }
}

/// Builtin projector of dynamic graphs.
///
/// Dynamic graphs have no schema, so the projected property types are
/// consolidated from the data: every rank scans its owned rows and the
/// observations travel through one gather. Ints widen into float slots;
/// anything else conflicting is a data-type fault.
#[cfg(feature = "dynamic")]
#[derive(Debug, Clone, Copy)]
pub struct DynamicProjector;

#[cfg(feature = "dynamic")]
impl ProjectionBackend for DynamicProjector {
    fn project(
        &self,
        comm: &dyn Collective,
        base: &FragmentHandle,
        parent_key: &str,
        dst_key: &str,
        req: &ProjectionRequest,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        let FragmentHandle::Dynamic(frag) = base else {
            return Err(EngineError::InvalidOperation(
                "projection source must be a dynamic graph".into(),
            ));
        };
        let v_prop = match &req.v_prop {
            Some(name) => Some((
                name.clone(),
                consolidated_type(comm, frag, name, AttrSide::Vertex)?,
            )),
            None => None,
        };
        let e_prop = match &req.e_prop {
            Some(name) => Some((
                name.clone(),
                consolidated_type(comm, frag, name, AttrSide::Edge)?,
            )),
            None => None,
        };
        let projected = DynamicProjectedFragment::new(Arc::clone(frag), v_prop, e_prop);
        let ext = ProjectedExt {
            parent: parent_key.to_owned(),
            v_label: "_".to_owned(),
            e_label: "_".to_owned(),
            v_prop: req.v_prop.clone(),
            e_prop: req.e_prop.clone(),
        };
        Ok(Arc::new(DynamicProjectedWrapper::new(dst_key, projected, ext)))
    }
}

#[cfg(feature = "dynamic")]
#[derive(Debug, Clone, Copy)]
enum AttrSide {
    Vertex,
    Edge,
}

// Scan codes exchanged during type consolidation. 0 = unseen, 1-4 the
// scalar classes in [`scan_value`], 5 = conflicting, 6 = non-scalar.
// Faulty codes still travel through the gather so no rank leaves the
// collective early. The conversion engine consolidates whole attribute
// maps with the same codes.
#[cfg(feature = "dynamic")]
pub(crate) const SCAN_CONFLICT: u8 = 5;
#[cfg(feature = "dynamic")]
pub(crate) const SCAN_NON_SCALAR: u8 = 6;

#[cfg(feature = "dynamic")]
pub(crate) fn scan_value(acc: u8, value: &DynValue) -> u8 {
    if acc >= SCAN_CONFLICT {
        return acc;
    }
    let next = match value {
        DynValue::Null => return acc,
        DynValue::Bool(_) => 1,
        DynValue::Int(_) => 2,
        DynValue::Float(_) => 3,
        DynValue::Str(_) => 4,
        DynValue::List(_) | DynValue::Map(_) => return SCAN_NON_SCALAR,
    };
    merge_codes(acc, next)
}

#[cfg(feature = "dynamic")]
pub(crate) fn merge_codes(acc: u8, next: u8) -> u8 {
    match (acc, next) {
        (a, 0) => a,
        (0, b) => b,
        (a, b) if a == b || a >= SCAN_CONFLICT => a,
        (_, b) if b >= SCAN_CONFLICT => b,
        // Ints widen into float slots.
        (2, 3) | (3, 2) => 3,
        _ => SCAN_CONFLICT,
    }
}

/// Column type behind a non-zero merged scan code.
#[cfg(feature = "dynamic")]
pub(crate) fn class_type(
    name: &str,
    code: u8,
) -> Result<crate::column::DataType, EngineError> {
    match code {
        1 => Ok(crate::column::DataType::Bool),
        2 => Ok(crate::column::DataType::Int64),
        3 => Ok(crate::column::DataType::Float64),
        4 => Ok(crate::column::DataType::Utf8),
        SCAN_NON_SCALAR => Err(EngineError::DataType(format!(
            "property {name} holds a non-scalar value"
        ))),
        _ => Err(EngineError::DataType(format!(
            "property {name} has conflicting types"
        ))),
    }
}

/// Consolidate `name`'s type across all ranks: local scan, one gather,
/// then the same merge everywhere.
#[cfg(feature = "dynamic")]
fn consolidated_type(
    comm: &dyn Collective,
    frag: &DynamicFragment,
    name: &str,
    side: AttrSide,
) -> Result<crate::column::DataType, EngineError> {
    let mut local = 0_u8;
    for (gid, _) in frag.owned_vertices() {
        match side {
            AttrSide::Vertex => {
                if let Some(attrs) = frag.node_attrs(gid) {
                    if let Some(value) = attrs.get(name) {
                        local = scan_value(local, value);
                    }
                }
            }
            AttrSide::Edge => {
                for (_, attrs) in frag.out_entries(gid) {
                    if let Some(value) = attrs.get(name) {
                        local = scan_value(local, value);
                    }
                }
            }
        }
    }
    let mut merged = 0_u8;
    for peer in comm.all_gather(vec![local])? {
        merged = merge_codes(merged, peer.first().copied().unwrap_or(0));
    }
    match merged {
        0 => Err(EngineError::NotFound(format!("property {name}"))),
        code => class_type(name, code),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;
    use crate::column::Column;
    use crate::columnar::{EdgeTable, FragmentData, VertexTable};
    #[cfg(feature = "dynamic")]
    use crate::dynamic::{AttrMap, ModifyKind};
    use skein_comm::{LocalComm, LocalGroup};
    use skein_store::MemoryStore;
    use std::thread;

    fn per_rank<T: Send>(
        peers: u32,
        f: impl Fn(LocalComm) -> T + Send + Sync,
    ) -> Vec<T> {
        let handles = LocalGroup::new(peers).unwrap();
        thread::scope(|scope| {
            let joins: Vec<_> = handles
                .into_iter()
                .map(|comm| scope.spawn(|| f(comm)))
                .collect();
            joins.into_iter().map(|j| j.join().unwrap()).collect()
        })
    }

    fn person_set() -> FragmentDataSet {
        FragmentDataSet {
            directed: true,
            fragments: vec![
                FragmentData {
                    vertices: vec![VertexTable {
                        label: "person".into(),
                        oids: Column::Int64(vec![1, 3]),
                        properties: vec![("age".into(), Column::Int64(vec![31, 33]))],
                    }],
                    edges: vec![EdgeTable {
                        label: "knows".into(),
                        src_label: "person".into(),
                        dst_label: "person".into(),
                        srcs: Column::Int64(vec![1]),
                        dsts: Column::Int64(vec![2]),
                        properties: vec![("w".into(), Column::Float64(vec![0.5]))],
                    }],
                },
                FragmentData {
                    vertices: vec![VertexTable {
                        label: "person".into(),
                        oids: Column::Int64(vec![2]),
                        properties: vec![("age".into(), Column::Int64(vec![32]))],
                    }],
                    edges: vec![EdgeTable {
                        label: "knows".into(),
                        src_label: "person".into(),
                        dst_label: "person".into(),
                        srcs: Column::Int64(vec![]),
                        dsts: Column::Int64(vec![]),
                        properties: vec![("w".into(), Column::Float64(vec![]))],
                    }],
                },
            ],
        }
    }

    #[test]
    fn catalog_resolves_builtin_backends() {
        let catalog = BackendCatalog::builtin();
        assert!(catalog.has(GraphKind::ArrowProperty));
        assert!(matches!(
            catalog.resolve(GraphKind::ArrowProperty).unwrap(),
            UtilityObject::Property(_)
        ));
        assert!(matches!(
            catalog.resolve(GraphKind::ArrowProjected).unwrap(),
            UtilityObject::Projection(_)
        ));

        let mut catalog = BackendCatalog::new();
        assert!(matches!(
            catalog.resolve(GraphKind::ArrowProperty),
            Err(EngineError::InvalidValue(_))
        ));
        catalog
            .register(GraphKind::ArrowProperty, Arc::new(|| {
                UtilityObject::Property(Arc::new(ColumnarBackend))
            }))
            .unwrap();
        assert!(matches!(
            catalog.register(GraphKind::ArrowProperty, Arc::new(|| {
                UtilityObject::Property(Arc::new(ColumnarBackend))
            })),
            Err(EngineError::IllegalState(_))
        ));
    }

    #[test]
    fn columnar_backend_persists_and_reattaches() {
        let store = MemoryStore::new();
        let set = person_set();
        let keys = per_rank(2, |comm| {
            let built = ColumnarBackend
                .create(&comm, &store, "graph_1", PropertySource::Inline(&set, false))
                .unwrap();
            assert_eq!(built.kind(), GraphKind::ArrowProperty);
            let FragmentHandle::Columnar(frag) = built.handle() else {
                panic!("expected a columnar handle");
            };
            assert_eq!(frag.vmap().total_vertices(0), 3);
            let Some(skein_proto::GraphDefExt::Store(ext)) = built.graph_def().ext else {
                panic!("expected a store ext");
            };

            let attached = ColumnarBackend
                .create(
                    &comm,
                    &store,
                    "graph_2",
                    PropertySource::Store(skein_store::ObjectId(ext.group_id)),
                )
                .unwrap();
            let FragmentHandle::Columnar(frag) = attached.handle() else {
                panic!("expected a columnar handle");
            };
            assert_eq!(frag.fid(), comm.spec().rank);
            assert_eq!(frag.vmap().total_vertices(0), 3);
            (attached.key().to_owned(), ext.group_id)
        });
        assert_eq!(keys[0].0, "graph_2");
        assert_eq!(keys[0].1, keys[1].1);
    }

    #[test]
    fn columnar_backend_rejects_bad_sources() {
        let store = MemoryStore::new();
        let comms = LocalGroup::new(1).unwrap();
        let comm = &comms[0];
        assert!(matches!(
            ColumnarBackend.create(comm, &store, "g", PropertySource::Empty { directed: true }),
            Err(EngineError::InvalidValue(_))
        ));
        assert!(matches!(
            ColumnarBackend.create(
                comm,
                &store,
                "g",
                PropertySource::Store(skein_store::ObjectId(7)),
            ),
            Err(EngineError::NotFound(_))
        ));
        // A non-group object is a cast fault, not a missing one.
        let id = store
            .put(
                bytes::Bytes::from_static(b"x"),
                skein_store::ObjectMeta::new("skein::Tensor"),
            )
            .unwrap();
        assert!(matches!(
            ColumnarBackend.create(comm, &store, "g", PropertySource::Store(id)),
            Err(EngineError::InvalidCast(_))
        ));
    }

    #[test]
    fn projector_carries_the_parent_descriptor() {
        let store = MemoryStore::new();
        let set = person_set();
        per_rank(2, |comm| {
            let built = ColumnarBackend
                .create(&comm, &store, "graph_1", PropertySource::Inline(&set, false))
                .unwrap();
            let req = ProjectionRequest {
                v_label: "person".into(),
                e_label: "knows".into(),
                v_prop: Some("age".into()),
                e_prop: Some("w".into()),
            };
            let simple = ColumnarProjector
                .project(&comm, &built.handle(), "graph_1", "graph_projected_2", &req)
                .unwrap();
            assert_eq!(simple.kind(), GraphKind::ArrowProjected);
            let def = simple.graph_def();
            match def.ext {
                Some(skein_proto::GraphDefExt::Projected(ext)) => {
                    assert_eq!(ext.parent, "graph_1");
                    assert_eq!(ext.v_prop.as_deref(), Some("age"));
                }
                other => panic!("unexpected ext: {other:?}"),
            }

            let missing = ProjectionRequest {
                v_label: "person".into(),
                e_label: "knows".into(),
                v_prop: Some("height".into()),
                e_prop: None,
            };
            assert!(matches!(
                ColumnarProjector.project(&comm, &built.handle(), "graph_1", "g", &missing),
                Err(EngineError::InvalidValue(_))
            ));
            assert!(matches!(
                ColumnarProjector.project(&comm, &simple.handle(), "g", "g2", &req),
                Err(EngineError::InvalidOperation(_))
            ));
        });
    }

    #[cfg(feature = "dynamic")]
    mod dynamic {
        use super::*;
        use crate::column::DataType;

        fn items(raw: &str) -> Vec<DynValue> {
            let parsed: serde_json::Value = serde_json::from_str(raw).unwrap();
            match DynValue::from_json(&parsed) {
                DynValue::List(list) => list,
                other => vec![other],
            }
        }

        #[test]
        fn dynamic_backend_starts_empty() {
            let store = MemoryStore::new();
            per_rank(2, |comm| {
                let built = DynamicBackend
                    .create(&comm, &store, "graph_1", PropertySource::Empty { directed: true })
                    .unwrap();
                assert_eq!(built.kind(), GraphKind::DynamicProperty);
                let FragmentHandle::Dynamic(frag) = built.handle() else {
                    panic!("expected a dynamic handle");
                };
                assert_eq!(frag.node_count(), 0);
                assert!(frag.directed());

                let set = person_set();
                assert!(matches!(
                    DynamicBackend.create(
                        &comm,
                        &store,
                        "g",
                        PropertySource::Inline(&set, false),
                    ),
                    Err(EngineError::InvalidValue(_))
                ));
                assert!(matches!(
                    DynamicBackend.add_labels(&comm, &store, &built.handle(), "g", &set),
                    Err(EngineError::InvalidOperation(_))
                ));
            });
        }

        #[test]
        fn dynamic_projection_consolidates_types_across_ranks() {
            per_rank(2, |comm| {
                let rank = comm.spec().rank;
                let frag = Arc::new(DynamicFragment::new(rank, 2, false));
                // "a" carries an int weight, "b" a float one; the
                // consolidated column widens to float.
                let batch = items(r#"[["a", {"x": 1}], ["b", {"x": 2.5}], ["c", {}]]"#);
                frag.modify_vertices(ModifyKind::Add, &batch, &AttrMap::new())
                    .unwrap();
                let handle = FragmentHandle::Dynamic(Arc::clone(&frag));
                let req = ProjectionRequest {
                    v_label: "_".into(),
                    e_label: "_".into(),
                    v_prop: Some("x".into()),
                    e_prop: None,
                };
                let simple = DynamicProjector
                    .project(&comm, &handle, "graph_1", "graph_projected_2", &req)
                    .unwrap();
                assert_eq!(simple.kind(), GraphKind::DynamicProjected);
                let FragmentHandle::DynamicProjected(p) = simple.handle() else {
                    panic!("expected a projected handle");
                };
                assert_eq!(p.v_prop(), Some(("x", DataType::Float64)));

                let missing = ProjectionRequest {
                    v_prop: Some("y".into()),
                    ..ProjectionRequest::default()
                };
                assert!(matches!(
                    DynamicProjector.project(&comm, &handle, "graph_1", "g", &missing),
                    Err(EngineError::NotFound(_))
                ));
            });
        }

        #[test]
        fn conflicting_attr_types_are_data_faults() {
            per_rank(2, |comm| {
                let rank = comm.spec().rank;
                let frag = Arc::new(DynamicFragment::new(rank, 2, false));
                let batch = items(r#"[["a", {"x": 1}], ["b", {"x": "tall"}]]"#);
                frag.modify_vertices(ModifyKind::Add, &batch, &AttrMap::new())
                    .unwrap();
                let handle = FragmentHandle::Dynamic(Arc::clone(&frag));
                let req = ProjectionRequest {
                    v_prop: Some("x".into()),
                    ..ProjectionRequest::default()
                };
                let err = DynamicProjector
                    .project(&comm, &handle, "graph_1", "g", &req)
                    .unwrap_err();
                assert!(matches!(err, EngineError::DataType(_)));
            });
        }
    }
}
