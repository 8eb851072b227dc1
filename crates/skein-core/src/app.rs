// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Algorithm plug-ins and the host catalog that builds them.
//!
//! Apps run SPMD: every rank calls [`AppEntry::query`] over its own
//! fragment with the same arguments, synchronizing through the group's
//! collectives, and each rank keeps the produced context locally.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use skein_comm::Collective;
use skein_proto::GraphKind;

use crate::column::Column;
use crate::columnar::ProjectedFragment;
use crate::context::ContextObject;
#[cfg(feature = "dynamic")]
use crate::dynamic::{DegreeKind, DynamicFragment, ViewMode};
use crate::error::EngineError;
use crate::vmap::{gid_fid, gid_label, gid_offset, Gid};
use crate::wrapper::FragmentHandle;

/// One runnable algorithm.
pub trait AppEntry: std::fmt::Debug + Send + Sync {
    /// Algorithm name, echoed in reports.
    fn name(&self) -> &str;

    /// Whether the algorithm accepts graphs of `kind`.
    fn compatible(&self, kind: GraphKind) -> bool;

    /// Runs the algorithm over this rank's fragment.
    ///
    /// Collective: every rank of the group must call with the same
    /// `args`. The returned context is aligned with `frag`.
    ///
    /// # Errors
    /// Algorithm-specific argument and graph errors, plus
    /// [`EngineError::Comm`] when a collective fails.
    fn query(
        &self,
        frag: &FragmentHandle,
        args: &str,
        comm: &dyn Collective,
    ) -> Result<ContextObject, EngineError>;
}

/// Builds one app instance per create-app command.
pub type AppFactory = Arc<dyn Fn() -> Arc<dyn AppEntry> + Send + Sync>;

/// Host-registered app factories keyed by algorithm name.
#[derive(Default, Clone)]
pub struct AppCatalog {
    factories: HashMap<String, AppFactory>,
}

impl AppCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the compiled-in algorithms registered.
    #[must_use]
    pub fn builtin() -> Self {
        let mut factories: HashMap<String, AppFactory> = HashMap::new();
        factories.insert(
            "degree_centrality".to_owned(),
            Arc::new(|| Arc::new(DegreeCentrality) as Arc<dyn AppEntry>),
        );
        Self { factories }
    }

    /// Registers a factory under `name`.
    ///
    /// # Errors
    /// [`EngineError::IllegalState`] when the name is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: AppFactory,
    ) -> Result<(), EngineError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(EngineError::IllegalState(format!(
                "app {name} is already registered"
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Builds the app registered under `name`.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] for unknown names.
    pub fn create(&self, name: &str) -> Result<Arc<dyn AppEntry>, EngineError> {
        match self.factories.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(EngineError::InvalidValue(format!("unknown app: {name}"))),
        }
    }
}

/// Built-in degree centrality: `deg(v) / (|V| - 1)` per owned vertex.
#[derive(Debug, Clone, Copy)]
pub struct DegreeCentrality;

impl AppEntry for DegreeCentrality {
    fn name(&self) -> &str {
        "degree_centrality"
    }

    fn compatible(&self, kind: GraphKind) -> bool {
        match kind {
            GraphKind::ArrowProjected => true,
            #[cfg(feature = "dynamic")]
            GraphKind::DynamicProperty | GraphKind::DynamicProjected => true,
            _ => false,
        }
    }

    fn query(
        &self,
        frag: &FragmentHandle,
        _args: &str,
        comm: &dyn Collective,
    ) -> Result<ContextObject, EngineError> {
        let values = match frag {
            FragmentHandle::Projected(p) => projected_centrality(p, comm)?,
            #[cfg(feature = "dynamic")]
            FragmentHandle::Dynamic(f) => dynamic_centrality(f, ViewMode::AsIs)?,
            #[cfg(feature = "dynamic")]
            FragmentHandle::DynamicView(v) => dynamic_centrality(v.base(), v.kind().mode())?,
            #[cfg(feature = "dynamic")]
            FragmentHandle::DynamicProjected(p) => dynamic_centrality(p.base(), ViewMode::AsIs)?,
            FragmentHandle::Columnar(_) => {
                return Err(EngineError::InvalidOperation(
                    "degree centrality needs a simple or dynamic graph".into(),
                ))
            }
        };
        ContextObject::vertex_data(frag.clone(), Column::Float64(values))
    }
}

/// Out rows live with the source owner, so out-degrees count locally
/// (undirected projections carry both orientations). Directed in-edges
/// are scattered over source owners and travel through one gather.
#[allow(clippy::cast_possible_truncation)] // gid offsets fit in usize
#[allow(clippy::cast_precision_loss)] // degrees are far below 2^52
fn projected_centrality(
    frag: &ProjectedFragment,
    comm: &dyn Collective,
) -> Result<Vec<f64>, EngineError> {
    let (v_label, _) = frag.labels();
    let fid = frag.fid();
    let mut counts = vec![0_u64; frag.local_vertex_count()];
    let (srcs, dsts) = frag.edge_endpoints();
    for &src in srcs {
        if let Some(c) = counts.get_mut(gid_offset(src) as usize) {
            *c += 1;
        }
    }
    if frag.directed() {
        let mut outbound: BTreeMap<Gid, u64> = BTreeMap::new();
        for &dst in dsts {
            *outbound.entry(dst).or_insert(0) += 1;
        }
        let mut payload = Vec::new();
        ciborium::into_writer(&outbound, &mut payload).map_err(|e| {
            EngineError::IllegalState(format!("degree exchange encode failed: {e}"))
        })?;
        for raw in comm.all_gather(payload)? {
            let gathered: BTreeMap<Gid, u64> = ciborium::from_reader(raw.as_slice())
                .map_err(|_| EngineError::IllegalState("degree exchange corrupted".into()))?;
            for (gid, n) in gathered {
                if gid_fid(gid) == fid && gid_label(gid) == v_label {
                    if let Some(c) = counts.get_mut(gid_offset(gid) as usize) {
                        *c += n;
                    }
                }
            }
        }
    }
    let total = frag.vmap().total_vertices(v_label as usize);
    let scale = if total > 1 { (total - 1) as f64 } else { 1.0 };
    Ok(counts.iter().map(|&c| c as f64 / scale).collect())
}

/// Adjacency of an owned vertex is complete at its owner, so degrees
/// need no exchange here.
#[cfg(feature = "dynamic")]
#[allow(clippy::cast_precision_loss)] // degrees are far below 2^52
fn dynamic_centrality(frag: &DynamicFragment, mode: ViewMode) -> Result<Vec<f64>, EngineError> {
    let total = frag.node_count();
    let scale = if total > 1 { (total - 1) as f64 } else { 1.0 };
    frag.owned_vertices()
        .iter()
        .map(|(_, oid)| {
            let deg = frag.degree(oid, DegreeKind::Total, mode)?.unwrap_or(0);
            Ok(deg as f64 / scale)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use std::thread;

    use skein_comm::{LocalComm, LocalGroup};

    use super::*;
    use crate::columnar::{
        ColumnarFragment, EdgeTable, FragmentData, FragmentDataSet, VertexTable,
    };
    use crate::context::ContextKind;
    use crate::marshal::decode_ndarray;
    use crate::selector::VertexRange;
    use crate::value::DynValue;

    fn per_rank<T: Send>(peers: u32, f: impl Fn(LocalComm) -> T + Send + Sync) -> Vec<T> {
        let comms = LocalGroup::new(peers).unwrap();
        thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(|| f(comm)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    /// Two ranks, vertices 1/3 on rank 0 and 2 on rank 1, edges
    /// 1->2 and 1->3.
    fn linked_set(directed: bool) -> FragmentDataSet {
        FragmentDataSet {
            directed,
            fragments: vec![
                FragmentData {
                    vertices: vec![VertexTable {
                        label: "person".to_owned(),
                        oids: Column::Int64(vec![1, 3]),
                        properties: vec![],
                    }],
                    edges: vec![EdgeTable {
                        label: "knows".to_owned(),
                        src_label: "person".to_owned(),
                        dst_label: "person".to_owned(),
                        srcs: Column::Int64(vec![1, 1]),
                        dsts: Column::Int64(vec![2, 3]),
                        properties: vec![],
                    }],
                },
                FragmentData {
                    vertices: vec![VertexTable {
                        label: "person".to_owned(),
                        oids: Column::Int64(vec![2]),
                        properties: vec![],
                    }],
                    edges: vec![EdgeTable {
                        label: "knows".to_owned(),
                        src_label: "person".to_owned(),
                        dst_label: "person".to_owned(),
                        srcs: Column::Int64(vec![]),
                        dsts: Column::Int64(vec![]),
                        properties: vec![],
                    }],
                },
            ],
        }
    }

    fn projected(fid: u32, directed: bool) -> FragmentHandle {
        let frag =
            Arc::new(ColumnarFragment::from_data_set(fid, 2, false, &linked_set(directed)).unwrap());
        FragmentHandle::Projected(Arc::new(
            ProjectedFragment::project(&frag, "graph_1", "person", "knows", None, None).unwrap(),
        ))
    }

    #[test]
    fn catalog_resolves_and_rejects() {
        let mut catalog = AppCatalog::builtin();
        assert!(catalog.has("degree_centrality"));
        match catalog.create("page_rank") {
            Err(EngineError::InvalidValue(msg)) => {
                assert!(msg.contains("page_rank"), "unexpected message: {msg}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        match catalog.register(
            "degree_centrality",
            Arc::new(|| Arc::new(DegreeCentrality) as Arc<dyn AppEntry>),
        ) {
            Err(EngineError::IllegalState(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn directed_centrality_counts_remote_in_edges() {
        let archives = per_rank(2, |comm| {
            let handle = projected(comm.spec().rank, true);
            let app = AppCatalog::builtin().create("degree_centrality").unwrap();
            assert!(app.compatible(GraphKind::ArrowProjected));
            let ctx = app.query(&handle, "", &comm).unwrap();
            assert_eq!(ctx.kind(), ContextKind::VertexData);
            ctx.to_ndarray(&comm, "r", &VertexRange::all()).unwrap()
        });

        let decoded = decode_ndarray(archives[0].as_ref().unwrap()).unwrap();
        assert_eq!(
            decoded.values,
            vec![
                DynValue::Float(1.0),
                DynValue::Float(0.5),
                DynValue::Float(0.5)
            ]
        );
        assert!(archives[1].is_none());
    }

    #[test]
    fn undirected_centrality_needs_no_exchange() {
        let archives = per_rank(2, |comm| {
            let handle = projected(comm.spec().rank, false);
            let app = AppCatalog::builtin().create("degree_centrality").unwrap();
            let ctx = app.query(&handle, "", &comm).unwrap();
            ctx.to_ndarray(&comm, "r", &VertexRange::all()).unwrap()
        });

        let decoded = decode_ndarray(archives[0].as_ref().unwrap()).unwrap();
        assert_eq!(
            decoded.values,
            vec![
                DynValue::Float(1.0),
                DynValue::Float(0.5),
                DynValue::Float(0.5)
            ]
        );
    }

    #[test]
    fn centrality_rejects_property_graphs() {
        let app = AppCatalog::builtin().create("degree_centrality").unwrap();
        assert!(!app.compatible(GraphKind::ArrowProperty));
        assert_eq!(app.name(), "degree_centrality");

        let comms = LocalGroup::new(1).unwrap();
        let frag =
            Arc::new(ColumnarFragment::from_data_set(0, 2, false, &linked_set(true)).unwrap());
        match app.query(&FragmentHandle::Columnar(frag), "", &comms[0]) {
            Err(EngineError::InvalidOperation(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(feature = "dynamic")]
    mod dynamic {
        use super::*;
        use crate::dynamic::{AttrMap, ModifyKind};
        use crate::marshal::decode_dataframe;

        fn items(raw: &str) -> Vec<DynValue> {
            let parsed: serde_json::Value = serde_json::from_str(raw).unwrap();
            let serde_json::Value::Array(values) = parsed else {
                panic!("expected array");
            };
            values.iter().map(DynValue::from_json).collect()
        }

        #[test]
        fn centrality_covers_dynamic_graphs() {
            let archives = per_rank(2, |comm| {
                let frag = DynamicFragment::new(comm.spec().rank, 2, true);
                frag.modify_edges(ModifyKind::Add, &items("[[1, 2], [1, 3]]"), &AttrMap::new())
                    .unwrap();
                let handle = FragmentHandle::Dynamic(Arc::new(frag));
                let app = AppCatalog::builtin().create("degree_centrality").unwrap();
                let ctx = app.query(&handle, "", &comm).unwrap();
                ctx.to_dataframe(
                    &comm,
                    r#"{"c": "r", "id": "v.id"}"#,
                    &VertexRange::all(),
                )
                .unwrap()
            });

            let frame = decode_dataframe(archives[0].as_ref().unwrap()).unwrap();
            assert_eq!(frame.columns[0].0, "c");
            assert_eq!(frame.columns[1].0, "id");
            let mut by_id: BTreeMap<i64, DynValue> = BTreeMap::new();
            for (c, id) in frame.columns[0].2.iter().zip(&frame.columns[1].2) {
                let DynValue::Int(id) = id else {
                    panic!("unexpected id cell: {id:?}");
                };
                by_id.insert(*id, c.clone());
            }
            assert_eq!(by_id.len(), 3);
            assert_eq!(by_id[&1], DynValue::Float(1.0));
            assert_eq!(by_id[&2], DynValue::Float(0.5));
            assert_eq!(by_id[&3], DynValue::Float(0.5));
        }
    }
}
