// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Capability wrappers over registered fragments.
//!
//! Every graph in the registry travels behind the object-safe
//! [`FragmentWrapper`] trait. The four implementations expose exactly the
//! operations their fragment kind supports; everything else answers with
//! an [`EngineError::InvalidOperation`] naming the kind, never a panic.

use std::sync::Arc;

use bytes::Bytes;
use skein_comm::Collective;
use skein_proto::{GraphDef, GraphDefExt, GraphKind, ProjectedExt, StoreExt};
use skein_store::{ObjectId, ObjectStore};

use crate::column::{Column, DataType};
use crate::columnar::{
    ColumnarFragment, ProjectedFragment, StoreHandles, FRAGMENT_GROUP_TYPE_NAME,
};
use crate::context::ContextObject;
#[cfg(feature = "dynamic")]
use crate::dynamic::{
    AdjacencyDir, DegreeKind, DynamicFragment, DynamicProjectedFragment, ViewMode,
};
use crate::error::EngineError;
use crate::marshal;
#[cfg(feature = "dynamic")]
use crate::schema::DEFAULT_LABEL;
use crate::schema::{LabelSchema, PropertyDef, PropertySchema};
use crate::selector::{
    parse_labeled_selector_map, parse_selector_map, LabeledSelector, Selector, VertexRange,
};
#[cfg(feature = "dynamic")]
use crate::value::DynValue;
#[cfg(feature = "dynamic")]
use crate::view::{DynamicFragmentView, ViewKind};

/// The fragment behind a wrapper, as a cheaply clonable sum type.
///
/// Projection backends and the conversion engine match on this to reach
/// the concrete representation.
#[derive(Debug, Clone)]
pub enum FragmentHandle {
    /// Immutable columnar property fragment.
    Columnar(Arc<ColumnarFragment>),
    /// Single-label projection of a columnar fragment.
    Projected(Arc<ProjectedFragment>),
    /// Mutable dynamic property fragment.
    #[cfg(feature = "dynamic")]
    Dynamic(Arc<DynamicFragment>),
    /// Dynamic fragment read through a direction view.
    #[cfg(feature = "dynamic")]
    DynamicView(DynamicFragmentView),
    /// Projection of a dynamic fragment.
    #[cfg(feature = "dynamic")]
    DynamicProjected(DynamicProjectedFragment),
}

impl FragmentHandle {
    /// The fragment kind this handle carries.
    pub fn kind(&self) -> GraphKind {
        match self {
            Self::Columnar(_) => GraphKind::ArrowProperty,
            Self::Projected(_) => GraphKind::ArrowProjected,
            #[cfg(feature = "dynamic")]
            Self::Dynamic(_) | Self::DynamicView(_) => GraphKind::DynamicProperty,
            #[cfg(feature = "dynamic")]
            Self::DynamicProjected(_) => GraphKind::DynamicProjected,
        }
    }

    /// Fragment count of the graph this handle belongs to.
    pub fn fnum(&self) -> u32 {
        match self {
            Self::Columnar(f) => f.fnum(),
            Self::Projected(p) => p.fnum(),
            #[cfg(feature = "dynamic")]
            Self::Dynamic(f) => f.fnum(),
            #[cfg(feature = "dynamic")]
            Self::DynamicView(v) => v.base().fnum(),
            #[cfg(feature = "dynamic")]
            Self::DynamicProjected(p) => p.base().fnum(),
        }
    }

    /// The shared columnar vertex map, for kinds that have one.
    pub fn columnar_vmap(&self) -> Option<&Arc<crate::vmap::ColumnarVertexMap>> {
        match self {
            Self::Columnar(f) => Some(f.vmap()),
            Self::Projected(p) => Some(p.vmap()),
            #[cfg(feature = "dynamic")]
            _ => None,
        }
    }
}

/// One graph-statistics request decoded from a report command.
#[cfg(feature = "dynamic")]
#[derive(Debug, Clone, PartialEq)]
pub enum ReportRequest {
    /// Alive vertices across the whole graph.
    NodeNum,
    /// Edges across the whole graph (collective).
    EdgeNum,
    /// Self-loops across the whole graph (collective).
    SelfloopsNum,
    /// Whether a vertex exists.
    HasNode(DynValue),
    /// Whether an edge exists.
    HasEdge(DynValue, DynValue),
    /// Attributes of a vertex.
    NodeData(DynValue),
    /// Attributes of an edge.
    EdgeData(DynValue, DynValue),
    /// Degree of a vertex.
    Degree(DynValue, DegreeKind),
    /// Neighbor ids of a vertex.
    Neighbors(DynValue, AdjacencyDir),
    /// One batch of a fragment's vertex ids, for paged iteration.
    NodeBatch {
        /// Fragment to read from.
        fid: u32,
        /// First vertex offset of the batch.
        offset: usize,
        /// Maximum batch length.
        limit: usize,
    },
}

#[cfg(feature = "dynamic")]
impl ReportRequest {
    /// Decode a report kind string plus its JSON argument payload.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on unknown kinds, non-JSON args, or
    /// missing argument fields.
    pub fn parse(kind: &str, args: &str) -> Result<Self, EngineError> {
        let args: serde_json::Value = if args.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(args).map_err(|e| {
                EngineError::InvalidValue(format!("report args are not JSON: {e}"))
            })?
        };
        let req = match kind {
            "node_num" => Self::NodeNum,
            "edge_num" => Self::EdgeNum,
            "selfloops_num" => Self::SelfloopsNum,
            "has_node" => Self::HasNode(arg_value(&args, "node")?),
            "has_edge" => Self::HasEdge(arg_value(&args, "u")?, arg_value(&args, "v")?),
            "node_data" => Self::NodeData(arg_value(&args, "node")?),
            "edge_data" => Self::EdgeData(arg_value(&args, "u")?, arg_value(&args, "v")?),
            "deg_by_node" => Self::Degree(arg_value(&args, "node")?, DegreeKind::Total),
            "in_deg_by_node" => Self::Degree(arg_value(&args, "node")?, DegreeKind::In),
            "out_deg_by_node" => Self::Degree(arg_value(&args, "node")?, DegreeKind::Out),
            "succs_by_node" => {
                Self::Neighbors(arg_value(&args, "node")?, AdjacencyDir::Successors)
            }
            "preds_by_node" => {
                Self::Neighbors(arg_value(&args, "node")?, AdjacencyDir::Predecessors)
            }
            "nodes_by_loc" => Self::NodeBatch {
                fid: arg_index(&args, "fid")?,
                offset: arg_index(&args, "offset")?,
                limit: arg_index(&args, "limit")?,
            },
            other => {
                return Err(EngineError::InvalidValue(format!(
                    "unknown report kind: {other}"
                )))
            }
        };
        Ok(req)
    }
}

#[cfg(feature = "dynamic")]
fn arg_value(args: &serde_json::Value, field: &str) -> Result<DynValue, EngineError> {
    args.get(field).map(DynValue::from_json).ok_or_else(|| {
        EngineError::InvalidValue(format!("report args missing field: {field}"))
    })
}

#[cfg(feature = "dynamic")]
fn arg_index<T: TryFrom<u64>>(
    args: &serde_json::Value,
    field: &str,
) -> Result<T, EngineError> {
    let raw = args.get(field).and_then(serde_json::Value::as_u64).ok_or_else(|| {
        EngineError::InvalidValue(format!("report args missing field: {field}"))
    })?;
    T::try_from(raw)
        .map_err(|_| EngineError::InvalidValue(format!("report arg {field} out of range")))
}

/// Kind-aware operation surface of one registered graph.
///
/// Implementations are `Send + Sync` so the registry can hand out
/// `Arc<dyn FragmentWrapper>` across worker threads. Unsupported
/// operations return [`EngineError::InvalidOperation`] with the graph
/// kind in the message.
pub trait FragmentWrapper: std::fmt::Debug + Send + Sync {
    /// Registry key this graph lives under.
    fn key(&self) -> &str;

    /// Fragment kind.
    fn kind(&self) -> GraphKind;

    /// Descriptor reported to the coordinator.
    fn graph_def(&self) -> GraphDef;

    /// The fragment itself.
    fn handle(&self) -> FragmentHandle;

    /// Property schema as JSON text.
    fn schema_json(&self) -> String;

    /// A copy of this graph under `dst_key`.
    ///
    /// Columnar graphs share their immutable fragment and re-group it in
    /// the store; dynamic graphs deep-copy (`identical`) or flip every
    /// edge (`reverse`).
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on unknown copy kinds,
    /// [`EngineError::InvalidOperation`] for kinds that cannot copy.
    fn copy_graph(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        dst_key: &str,
        copy_kind: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError>;

    /// A directed rendition of this graph under `dst_key`.
    ///
    /// # Errors
    /// [`EngineError::InvalidOperation`] for kinds that cannot flip.
    fn to_directed(&self, dst_key: &str) -> Result<Arc<dyn FragmentWrapper>, EngineError>;

    /// An undirected rendition of this graph under `dst_key`.
    ///
    /// # Errors
    /// [`EngineError::InvalidOperation`] for kinds that cannot flip.
    fn to_undirected(&self, dst_key: &str) -> Result<Arc<dyn FragmentWrapper>, EngineError>;

    /// A direction view sharing this graph's data under `dst_key`.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on unknown view kinds,
    /// [`EngineError::InvalidOperation`] for kinds that cannot be viewed.
    fn create_view(
        &self,
        dst_key: &str,
        view_kind: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError>;

    /// A new graph under `dst_key` with result columns from `ctx`
    /// appended as vertex properties.
    ///
    /// # Errors
    /// [`EngineError::IllegalState`] when the context was computed over
    /// another vertex map, [`EngineError::InvalidOperation`] for kinds
    /// that cannot take columns.
    fn add_column(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        dst_key: &str,
        ctx: &ContextObject,
        selectors: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError>;

    /// Marshal one selected column as an ndarray archive.
    ///
    /// Collective; rank 0 gets the assembled archive, everyone else
    /// `None`.
    ///
    /// # Errors
    /// Selector and layout faults are typed per [`crate::marshal`].
    fn to_ndarray(
        &self,
        comm: &dyn Collective,
        selector: &str,
        range: &VertexRange,
    ) -> Result<Option<Bytes>, EngineError>;

    /// Marshal named selected columns as a dataframe archive.
    ///
    /// Collective; rank 0 gets the assembled archive, everyone else
    /// `None`.
    ///
    /// # Errors
    /// See [`FragmentWrapper::to_ndarray`].
    fn to_dataframe(
        &self,
        comm: &dyn Collective,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<Option<Bytes>, EngineError>;

    /// Store form of [`FragmentWrapper::to_ndarray`]: per-rank chunk
    /// objects grouped under one id, returned on every rank.
    ///
    /// # Errors
    /// See [`FragmentWrapper::to_ndarray`]; store failures propagate.
    fn store_to_tensor(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        selector: &str,
        range: &VertexRange,
    ) -> Result<ObjectId, EngineError>;

    /// Store form of [`FragmentWrapper::to_dataframe`].
    ///
    /// # Errors
    /// See [`FragmentWrapper::to_dataframe`]; store failures propagate.
    fn store_to_dataframe(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<ObjectId, EngineError>;

    /// Answer one graph-statistics request as JSON text.
    ///
    /// Ranks without the data answer with an empty string so the
    /// coordinator can keep the first non-empty payload.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] for unknown vertices (uniform across
    /// ranks), [`EngineError::InvalidOperation`] for non-dynamic kinds.
    #[cfg(feature = "dynamic")]
    fn report(
        &self,
        comm: &dyn Collective,
        req: &ReportRequest,
    ) -> Result<String, EngineError>;
}

fn unsupported(kind: GraphKind, op: &str) -> EngineError {
    EngineError::InvalidOperation(format!("{op} is not supported on {kind} graphs"))
}

#[cfg(feature = "dynamic")]
fn view_unsupported(op: &str) -> EngineError {
    EngineError::InvalidOperation(format!("{op} is not supported on graph views"))
}

/// Copy the rows listed in `rows` out of `src` into a fresh column.
pub(crate) fn column_rows(src: &Column, rows: &[usize]) -> Result<Column, EngineError> {
    let mut out = Column::new(src.data_type());
    for &i in rows {
        out.push_from(src, i)?;
    }
    Ok(out)
}

pub(crate) fn no_result_columns() -> EngineError {
    EngineError::InvalidValue("graphs have no result columns".into())
}

/// Offsets of `frag`'s `label_id` vertices whose oid falls in `range`.
pub(crate) fn columnar_label_rows(
    frag: &ColumnarFragment,
    label_id: usize,
    range: &VertexRange,
) -> Vec<usize> {
    let Some(oids) = frag.vmap().oid_column(frag.fid(), label_id) else {
        return Vec::new();
    };
    (0..oids.len())
        .filter(|&i| oids.value(i).is_some_and(|oid| range.contains(&oid)))
        .collect()
}

/// Column for a vertex-addressing labeled selector over `rows` of
/// `label_id`. Result selectors are not resolvable on a bare fragment.
pub(crate) fn columnar_vertex_column(
    frag: &ColumnarFragment,
    sel: &LabeledSelector,
    label_id: usize,
    rows: &[usize],
) -> Result<Column, EngineError> {
    match sel {
        LabeledSelector::VertexId { .. } => {
            match frag.vmap().oid_column(frag.fid(), label_id) {
                Some(src) => column_rows(src, rows),
                None => Ok(Column::new(
                    frag.vmap().oid_type(label_id).unwrap_or(DataType::Int64),
                )),
            }
        }
        LabeledSelector::VertexProperty { label, prop } => {
            let Some((_, src)) = frag
                .vertex_properties(label_id)
                .iter()
                .find(|(name, _)| name == prop)
            else {
                return Err(EngineError::NotFound(format!("property {label}.{prop}")));
            };
            column_rows(src, rows)
        }
        LabeledSelector::Result { .. } | LabeledSelector::ResultColumn { .. } => {
            Err(no_result_columns())
        }
    }
}

/// Offsets of the projected label's vertices whose oid falls in `range`.
pub(crate) fn projected_label_rows(
    frag: &ProjectedFragment,
    range: &VertexRange,
) -> Vec<usize> {
    let (v_label, _) = frag.labels();
    let Some(oids) = frag.vmap().oid_column(frag.fid(), v_label as usize) else {
        return Vec::new();
    };
    (0..oids.len())
        .filter(|&i| oids.value(i).is_some_and(|oid| range.contains(&oid)))
        .collect()
}

/// Column for a vertex-addressing selector over `rows` of a projected
/// fragment.
pub(crate) fn projected_vertex_column(
    frag: &ProjectedFragment,
    sel: &Selector,
    rows: &[usize],
) -> Result<Column, EngineError> {
    match sel {
        Selector::VertexId => {
            let (v_label, _) = frag.labels();
            match frag.vmap().oid_column(frag.fid(), v_label as usize) {
                Some(src) => column_rows(src, rows),
                None => Ok(Column::new(
                    frag.vmap()
                        .oid_type(v_label as usize)
                        .unwrap_or(DataType::Int64),
                )),
            }
        }
        Selector::VertexData => {
            let Some(src) = frag.vdata() else {
                return Err(EngineError::InvalidOperation(
                    "graph was projected without vertex data".into(),
                ));
            };
            column_rows(src, rows)
        }
        Selector::Result | Selector::ResultColumn(_) => Err(no_result_columns()),
    }
}

// ---------------------------------------------------------------------------
// ArrowProperty
// ---------------------------------------------------------------------------

/// Wrapper over an immutable columnar property graph.
#[derive(Debug)]
pub struct ColumnarWrapper {
    key: String,
    frag: Arc<ColumnarFragment>,
    handles: Option<StoreHandles>,
}

impl ColumnarWrapper {
    /// Wrap `frag` under `key`. `handles` carries the store identities
    /// when the fragment was persisted.
    pub fn new(
        key: impl Into<String>,
        frag: Arc<ColumnarFragment>,
        handles: Option<StoreHandles>,
    ) -> Self {
        Self {
            key: key.into(),
            frag,
            handles,
        }
    }

    /// The wrapped fragment.
    pub fn fragment(&self) -> &Arc<ColumnarFragment> {
        &self.frag
    }

    /// Store identities, when persisted.
    pub fn store_handles(&self) -> Option<&StoreHandles> {
        self.handles.as_ref()
    }

    fn label_id(&self, label: &str) -> Result<usize, EngineError> {
        self.frag
            .schema()
            .vertex_label_id(label)
            .ok_or_else(|| EngineError::NotFound(format!("vertex label {label}")))
    }

    fn single_column(
        &self,
        selector: &str,
        range: &VertexRange,
    ) -> Result<Column, EngineError> {
        let sel = LabeledSelector::parse(selector)?;
        let label_id = self.label_id(sel.label())?;
        let rows = columnar_label_rows(&self.frag, label_id, range);
        columnar_vertex_column(&self.frag, &sel, label_id, &rows)
    }

    /// All dataframe selectors must address one vertex label; its rows
    /// give the frame its length.
    fn named_columns(
        &self,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<Vec<(String, Column)>, EngineError> {
        let parsed = parse_labeled_selector_map(selectors)?;
        let Some((_, first)) = parsed.first() else {
            return Ok(Vec::new());
        };
        let label = first.label();
        for (_, sel) in &parsed {
            if sel.label() != label {
                return Err(EngineError::InvalidValue(format!(
                    "selectors span multiple labels: {label} and {}",
                    sel.label()
                )));
            }
        }
        let label_id = self.label_id(label)?;
        let rows = columnar_label_rows(&self.frag, label_id, range);
        parsed
            .iter()
            .map(|(name, sel)| {
                Ok((
                    name.clone(),
                    columnar_vertex_column(&self.frag, sel, label_id, &rows)?,
                ))
            })
            .collect()
    }
}

impl FragmentWrapper for ColumnarWrapper {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> GraphKind {
        GraphKind::ArrowProperty
    }

    fn graph_def(&self) -> GraphDef {
        GraphDef {
            key: self.key.clone(),
            kind: GraphKind::ArrowProperty,
            directed: self.frag.directed(),
            generate_eid: self.frag.generate_eid(),
            schema_json: self.schema_json(),
            ext: self.handles.as_ref().map(|h| {
                GraphDefExt::Store(StoreExt {
                    object_id: h.object_id.0,
                    group_id: h.group_id.0,
                    fragments: self.frag.fnum(),
                })
            }),
        }
    }

    fn handle(&self) -> FragmentHandle {
        FragmentHandle::Columnar(Arc::clone(&self.frag))
    }

    fn schema_json(&self) -> String {
        self.frag.schema().to_json_string()
    }

    fn copy_graph(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        dst_key: &str,
        _copy_kind: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        // The fragment is immutable: a copy shares it and only the
        // store group binding is rebuilt under the new identity.
        let handles = match &self.handles {
            Some(h) => Some(StoreHandles {
                object_id: h.object_id,
                vmap_id: h.vmap_id,
                group_id: marshal::group_ids_to_root(
                    comm,
                    store,
                    h.object_id,
                    FRAGMENT_GROUP_TYPE_NAME,
                    None,
                )?,
            }),
            None => None,
        };
        Ok(Arc::new(Self::new(dst_key, Arc::clone(&self.frag), handles)))
    }

    fn to_directed(&self, _dst_key: &str) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "to-directed"))
    }

    fn to_undirected(&self, _dst_key: &str) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "to-undirected"))
    }

    fn create_view(
        &self,
        _dst_key: &str,
        _view_kind: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "view creation"))
    }

    fn add_column(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        dst_key: &str,
        ctx: &ContextObject,
        selectors: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        let base = ctx.base_handle();
        if base.fnum() != self.frag.fnum() {
            return Err(EngineError::IllegalState(
                "fragment count of the context differs from the destination graph".into(),
            ));
        }
        let Some(ctx_vmap) = base.columnar_vmap() else {
            return Err(EngineError::IllegalState(
                "context was not computed over a columnar graph".into(),
            ));
        };
        if !Arc::ptr_eq(ctx_vmap, self.frag.vmap()) {
            return Err(EngineError::IllegalState(
                "context vertex map differs from the destination graph's".into(),
            ));
        }

        let mut next = self.frag.as_ref().clone();
        for (label_id, columns) in ctx.to_labeled_columns(selectors)? {
            for (name, column) in columns {
                next = next.with_vertex_column(label_id, &name, column)?;
            }
        }
        let frag = Arc::new(next);
        // Add-column keeps the base graph's vertex-map object alive in
        // the store instead of writing a second copy.
        let handles = match &self.handles {
            Some(h) => Some(frag.persist_with_vmap(store, comm, Some(h.vmap_id))?),
            None => None,
        };
        Ok(Arc::new(Self::new(dst_key, frag, handles)))
    }

    fn to_ndarray(
        &self,
        comm: &dyn Collective,
        selector: &str,
        range: &VertexRange,
    ) -> Result<Option<Bytes>, EngineError> {
        let column = self.single_column(selector, range)?;
        marshal::marshal_ndarray(comm, &column)
    }

    fn to_dataframe(
        &self,
        comm: &dyn Collective,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<Option<Bytes>, EngineError> {
        let columns = self.named_columns(selectors, range)?;
        marshal::marshal_dataframe(comm, &columns)
    }

    fn store_to_tensor(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        selector: &str,
        range: &VertexRange,
    ) -> Result<ObjectId, EngineError> {
        let column = self.single_column(selector, range)?;
        marshal::store_ndarray(comm, store, &column, None)
    }

    fn store_to_dataframe(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<ObjectId, EngineError> {
        let columns = self.named_columns(selectors, range)?;
        marshal::store_dataframe(comm, store, &columns, None)
    }

    #[cfg(feature = "dynamic")]
    fn report(
        &self,
        _comm: &dyn Collective,
        _req: &ReportRequest,
    ) -> Result<String, EngineError> {
        Err(unsupported(self.kind(), "reporting"))
    }
}

// ---------------------------------------------------------------------------
// ArrowProjected
// ---------------------------------------------------------------------------

/// Wrapper over a projection of a columnar graph. Marshalling only;
/// every lifecycle mutation is rejected.
#[derive(Debug)]
pub struct ProjectedWrapper {
    key: String,
    frag: Arc<ProjectedFragment>,
    ext: ProjectedExt,
    generate_eid: bool,
}

impl ProjectedWrapper {
    /// Wrap `frag` under `key`. `ext` names the projection inputs and
    /// `generate_eid` carries the parent's flag.
    pub fn new(
        key: impl Into<String>,
        frag: Arc<ProjectedFragment>,
        ext: ProjectedExt,
        generate_eid: bool,
    ) -> Self {
        Self {
            key: key.into(),
            frag,
            ext,
            generate_eid,
        }
    }

    /// The wrapped fragment.
    pub fn fragment(&self) -> &Arc<ProjectedFragment> {
        &self.frag
    }

    fn single_column(
        &self,
        selector: &str,
        range: &VertexRange,
    ) -> Result<Column, EngineError> {
        let sel = Selector::parse(selector)?;
        let rows = projected_label_rows(&self.frag, range);
        projected_vertex_column(&self.frag, &sel, &rows)
    }

    fn named_columns(
        &self,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<Vec<(String, Column)>, EngineError> {
        let parsed = parse_selector_map(selectors)?;
        let rows = projected_label_rows(&self.frag, range);
        parsed
            .iter()
            .map(|(name, sel)| {
                Ok((name.clone(), projected_vertex_column(&self.frag, sel, &rows)?))
            })
            .collect()
    }
}

impl FragmentWrapper for ProjectedWrapper {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> GraphKind {
        GraphKind::ArrowProjected
    }

    fn graph_def(&self) -> GraphDef {
        GraphDef {
            key: self.key.clone(),
            kind: GraphKind::ArrowProjected,
            directed: self.frag.directed(),
            generate_eid: self.generate_eid,
            schema_json: self.schema_json(),
            ext: Some(GraphDefExt::Projected(self.ext.clone())),
        }
    }

    fn handle(&self) -> FragmentHandle {
        FragmentHandle::Projected(Arc::clone(&self.frag))
    }

    fn schema_json(&self) -> String {
        projected_schema(
            &self.ext.v_label,
            &self.ext.e_label,
            self.ext
                .v_prop
                .as_deref()
                .zip(self.frag.vdata().map(Column::data_type)),
            self.ext
                .e_prop
                .as_deref()
                .zip(self.frag.edata().map(Column::data_type)),
        )
        .to_json_string()
    }

    fn copy_graph(
        &self,
        _comm: &dyn Collective,
        _store: &dyn ObjectStore,
        _dst_key: &str,
        _copy_kind: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "copy"))
    }

    fn to_directed(&self, _dst_key: &str) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "to-directed"))
    }

    fn to_undirected(&self, _dst_key: &str) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "to-undirected"))
    }

    fn create_view(
        &self,
        _dst_key: &str,
        _view_kind: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "view creation"))
    }

    fn add_column(
        &self,
        _comm: &dyn Collective,
        _store: &dyn ObjectStore,
        _dst_key: &str,
        _ctx: &ContextObject,
        _selectors: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "add-column"))
    }

    fn to_ndarray(
        &self,
        comm: &dyn Collective,
        selector: &str,
        range: &VertexRange,
    ) -> Result<Option<Bytes>, EngineError> {
        let column = self.single_column(selector, range)?;
        marshal::marshal_ndarray(comm, &column)
    }

    fn to_dataframe(
        &self,
        comm: &dyn Collective,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<Option<Bytes>, EngineError> {
        let columns = self.named_columns(selectors, range)?;
        marshal::marshal_dataframe(comm, &columns)
    }

    fn store_to_tensor(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        selector: &str,
        range: &VertexRange,
    ) -> Result<ObjectId, EngineError> {
        let column = self.single_column(selector, range)?;
        marshal::store_ndarray(comm, store, &column, None)
    }

    fn store_to_dataframe(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<ObjectId, EngineError> {
        let columns = self.named_columns(selectors, range)?;
        marshal::store_dataframe(comm, store, &columns, None)
    }

    #[cfg(feature = "dynamic")]
    fn report(
        &self,
        _comm: &dyn Collective,
        _req: &ReportRequest,
    ) -> Result<String, EngineError> {
        Err(unsupported(self.kind(), "reporting"))
    }
}

fn projected_schema(
    v_label: &str,
    e_label: &str,
    v_prop: Option<(&str, DataType)>,
    e_prop: Option<(&str, DataType)>,
) -> PropertySchema {
    let props = |prop: Option<(&str, DataType)>| {
        prop.map(|(name, data_type)| PropertyDef {
            name: name.to_owned(),
            data_type,
        })
        .into_iter()
        .collect()
    };
    PropertySchema {
        vertex_labels: vec![LabelSchema {
            label: v_label.to_owned(),
            properties: props(v_prop),
        }],
        edge_labels: vec![LabelSchema {
            label: e_label.to_owned(),
            properties: props(e_prop),
        }],
    }
}

// ---------------------------------------------------------------------------
// DynamicProperty
// ---------------------------------------------------------------------------

/// Wrapper over a mutable dynamic graph, optionally read through a
/// direction view.
#[cfg(feature = "dynamic")]
#[derive(Debug)]
pub struct DynamicWrapper {
    key: String,
    frag: Arc<DynamicFragment>,
    view: Option<DynamicFragmentView>,
}

#[cfg(feature = "dynamic")]
impl DynamicWrapper {
    /// Wrap `frag` under `key`.
    pub fn new(key: impl Into<String>, frag: Arc<DynamicFragment>) -> Self {
        Self {
            key: key.into(),
            frag,
            view: None,
        }
    }

    /// The wrapped fragment.
    pub fn fragment(&self) -> &Arc<DynamicFragment> {
        &self.frag
    }

    fn mode(&self) -> ViewMode {
        self.view
            .as_ref()
            .map_or(ViewMode::AsIs, |v| v.kind().mode())
    }

    fn single_column(
        &self,
        selector: &str,
        range: &VertexRange,
    ) -> Result<Column, EngineError> {
        let sel = Selector::parse(selector)?;
        let rows = dynamic_owned_rows(&self.frag, range);
        dynamic_vertex_column(&self.frag, &sel, &rows)
    }

    fn named_columns(
        &self,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<Vec<(String, Column)>, EngineError> {
        let parsed = parse_selector_map(selectors)?;
        let rows = dynamic_owned_rows(&self.frag, range);
        parsed
            .iter()
            .map(|(name, sel)| {
                Ok((name.clone(), dynamic_vertex_column(&self.frag, sel, &rows)?))
            })
            .collect()
    }
}

#[cfg(feature = "dynamic")]
impl FragmentWrapper for DynamicWrapper {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> GraphKind {
        GraphKind::DynamicProperty
    }

    fn graph_def(&self) -> GraphDef {
        GraphDef {
            key: self.key.clone(),
            kind: GraphKind::DynamicProperty,
            directed: self.frag.directed(),
            generate_eid: false,
            schema_json: self.schema_json(),
            ext: None,
        }
    }

    fn handle(&self) -> FragmentHandle {
        match &self.view {
            None => FragmentHandle::Dynamic(Arc::clone(&self.frag)),
            Some(view) => FragmentHandle::DynamicView(view.clone()),
        }
    }

    fn schema_json(&self) -> String {
        // Dynamic attributes are schemaless; only the default label is
        // announced.
        PropertySchema {
            vertex_labels: vec![LabelSchema {
                label: DEFAULT_LABEL.to_owned(),
                properties: Vec::new(),
            }],
            edge_labels: vec![LabelSchema {
                label: DEFAULT_LABEL.to_owned(),
                properties: Vec::new(),
            }],
        }
        .to_json_string()
    }

    fn copy_graph(
        &self,
        _comm: &dyn Collective,
        _store: &dyn ObjectStore,
        dst_key: &str,
        copy_kind: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        let frag = match (&self.view, copy_kind) {
            (None, "identical") => DynamicFragment::copy_from(&self.frag),
            (None, "reverse") => DynamicFragment::reversed_from(&self.frag)?,
            // Copying a view materializes what the view reads.
            (Some(view), "identical") => match view.kind() {
                ViewKind::Reversed => DynamicFragment::reversed_from(&self.frag)?,
                ViewKind::Both => DynamicFragment::to_undirected_from(&self.frag),
            },
            (Some(_), "reverse") => {
                return Err(EngineError::InvalidOperation(
                    "only identical copies of graph views are supported".into(),
                ))
            }
            (_, other) => {
                return Err(EngineError::InvalidValue(format!(
                    "unknown copy kind: {other}"
                )))
            }
        };
        Ok(Arc::new(Self::new(dst_key, Arc::new(frag))))
    }

    fn to_directed(&self, dst_key: &str) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        if self.view.is_some() {
            return Err(view_unsupported("to-directed"));
        }
        let frag = DynamicFragment::to_directed_from(&self.frag);
        Ok(Arc::new(Self::new(dst_key, Arc::new(frag))))
    }

    fn to_undirected(&self, dst_key: &str) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        if self.view.is_some() {
            return Err(view_unsupported("to-undirected"));
        }
        let frag = DynamicFragment::to_undirected_from(&self.frag);
        Ok(Arc::new(Self::new(dst_key, Arc::new(frag))))
    }

    fn create_view(
        &self,
        dst_key: &str,
        view_kind: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        if self.view.is_some() {
            return Err(view_unsupported("view creation"));
        }
        let view = DynamicFragmentView::new(Arc::clone(&self.frag), ViewKind::parse(view_kind)?)?;
        Ok(Arc::new(Self {
            key: dst_key.to_owned(),
            frag: Arc::clone(&self.frag),
            view: Some(view),
        }))
    }

    fn add_column(
        &self,
        _comm: &dyn Collective,
        _store: &dyn ObjectStore,
        _dst_key: &str,
        _ctx: &ContextObject,
        _selectors: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "add-column"))
    }

    fn to_ndarray(
        &self,
        comm: &dyn Collective,
        selector: &str,
        range: &VertexRange,
    ) -> Result<Option<Bytes>, EngineError> {
        let column = self.single_column(selector, range)?;
        marshal::marshal_ndarray(comm, &column)
    }

    fn to_dataframe(
        &self,
        comm: &dyn Collective,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<Option<Bytes>, EngineError> {
        let columns = self.named_columns(selectors, range)?;
        marshal::marshal_dataframe(comm, &columns)
    }

    fn store_to_tensor(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        selector: &str,
        range: &VertexRange,
    ) -> Result<ObjectId, EngineError> {
        let column = self.single_column(selector, range)?;
        marshal::store_ndarray(comm, store, &column, None)
    }

    fn store_to_dataframe(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<ObjectId, EngineError> {
        let columns = self.named_columns(selectors, range)?;
        marshal::store_dataframe(comm, store, &columns, None)
    }

    fn report(
        &self,
        comm: &dyn Collective,
        req: &ReportRequest,
    ) -> Result<String, EngineError> {
        report_dynamic(&self.frag, self.mode(), comm, req)
    }
}

// ---------------------------------------------------------------------------
// DynamicProjected
// ---------------------------------------------------------------------------

/// Wrapper over a projection of a dynamic graph. Marshalling only.
#[cfg(feature = "dynamic")]
#[derive(Debug)]
pub struct DynamicProjectedWrapper {
    key: String,
    frag: DynamicProjectedFragment,
    ext: ProjectedExt,
}

#[cfg(feature = "dynamic")]
impl DynamicProjectedWrapper {
    /// Wrap `frag` under `key`.
    pub fn new(key: impl Into<String>, frag: DynamicProjectedFragment, ext: ProjectedExt) -> Self {
        Self {
            key: key.into(),
            frag,
            ext,
        }
    }

    /// The wrapped fragment.
    pub fn fragment(&self) -> &DynamicProjectedFragment {
        &self.frag
    }

    fn single_column(
        &self,
        selector: &str,
        range: &VertexRange,
    ) -> Result<Column, EngineError> {
        let sel = Selector::parse(selector)?;
        let rows = dynamic_projected_rows(&self.frag, range);
        dynamic_projected_vertex_column(&self.frag, &sel, &rows)
    }

    fn named_columns(
        &self,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<Vec<(String, Column)>, EngineError> {
        let parsed = parse_selector_map(selectors)?;
        let rows = dynamic_projected_rows(&self.frag, range);
        parsed
            .iter()
            .map(|(name, sel)| {
                Ok((
                    name.clone(),
                    dynamic_projected_vertex_column(&self.frag, sel, &rows)?,
                ))
            })
            .collect()
    }
}

#[cfg(feature = "dynamic")]
impl FragmentWrapper for DynamicProjectedWrapper {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> GraphKind {
        GraphKind::DynamicProjected
    }

    fn graph_def(&self) -> GraphDef {
        GraphDef {
            key: self.key.clone(),
            kind: GraphKind::DynamicProjected,
            directed: self.frag.base().directed(),
            generate_eid: false,
            schema_json: self.schema_json(),
            ext: Some(GraphDefExt::Projected(self.ext.clone())),
        }
    }

    fn handle(&self) -> FragmentHandle {
        FragmentHandle::DynamicProjected(self.frag.clone())
    }

    fn schema_json(&self) -> String {
        projected_schema(
            DEFAULT_LABEL,
            DEFAULT_LABEL,
            self.frag.v_prop(),
            self.frag.e_prop(),
        )
        .to_json_string()
    }

    fn copy_graph(
        &self,
        _comm: &dyn Collective,
        _store: &dyn ObjectStore,
        _dst_key: &str,
        _copy_kind: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "copy"))
    }

    fn to_directed(&self, _dst_key: &str) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "to-directed"))
    }

    fn to_undirected(&self, _dst_key: &str) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "to-undirected"))
    }

    fn create_view(
        &self,
        _dst_key: &str,
        _view_kind: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "view creation"))
    }

    fn add_column(
        &self,
        _comm: &dyn Collective,
        _store: &dyn ObjectStore,
        _dst_key: &str,
        _ctx: &ContextObject,
        _selectors: &str,
    ) -> Result<Arc<dyn FragmentWrapper>, EngineError> {
        Err(unsupported(self.kind(), "add-column"))
    }

    fn to_ndarray(
        &self,
        comm: &dyn Collective,
        selector: &str,
        range: &VertexRange,
    ) -> Result<Option<Bytes>, EngineError> {
        let column = self.single_column(selector, range)?;
        marshal::marshal_ndarray(comm, &column)
    }

    fn to_dataframe(
        &self,
        comm: &dyn Collective,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<Option<Bytes>, EngineError> {
        let columns = self.named_columns(selectors, range)?;
        marshal::marshal_dataframe(comm, &columns)
    }

    fn store_to_tensor(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        selector: &str,
        range: &VertexRange,
    ) -> Result<ObjectId, EngineError> {
        let column = self.single_column(selector, range)?;
        marshal::store_ndarray(comm, store, &column, None)
    }

    fn store_to_dataframe(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<ObjectId, EngineError> {
        let columns = self.named_columns(selectors, range)?;
        marshal::store_dataframe(comm, store, &columns, None)
    }

    fn report(
        &self,
        _comm: &dyn Collective,
        _req: &ReportRequest,
    ) -> Result<String, EngineError> {
        Err(unsupported(self.kind(), "reporting"))
    }
}

// ---------------------------------------------------------------------------
// Dynamic helpers
// ---------------------------------------------------------------------------

/// Decide the one column type that can hold every vertex id.
///
/// Works off the replicated vertex map so empty ranks agree with full
/// ones.
#[cfg(feature = "dynamic")]
fn dynamic_oid_dtype(frag: &DynamicFragment) -> Result<DataType, EngineError> {
    let mut dtype = None;
    for oid in frag.all_vertices() {
        let t = match oid {
            DynValue::Int(_) => DataType::Int64,
            DynValue::Str(_) => DataType::Utf8,
            other => {
                return Err(EngineError::DataType(format!(
                    "vertex id is not an integer or string: {other}"
                )))
            }
        };
        match dtype {
            None => dtype = Some(t),
            Some(seen) if seen != t => {
                return Err(EngineError::DataType(
                    "vertex ids mix integers and strings".into(),
                ))
            }
            Some(_) => {}
        }
    }
    Ok(dtype.unwrap_or(DataType::Int64))
}

/// Offsets into [`DynamicProjectedFragment::vertex_ids`] order whose
/// oid falls in `range`.
#[cfg(feature = "dynamic")]
pub(crate) fn dynamic_projected_rows(
    frag: &DynamicProjectedFragment,
    range: &VertexRange,
) -> Vec<usize> {
    frag.vertex_ids()
        .iter()
        .enumerate()
        .filter(|(_, oid)| range.contains(oid))
        .map(|(i, _)| i)
        .collect()
}

/// Column for a vertex-addressing selector over `rows` of a projected
/// dynamic fragment.
#[cfg(feature = "dynamic")]
pub(crate) fn dynamic_projected_vertex_column(
    frag: &DynamicProjectedFragment,
    sel: &Selector,
    rows: &[usize],
) -> Result<Column, EngineError> {
    match sel {
        Selector::VertexId => {
            let ids = frag.vertex_ids();
            let mut col = Column::new(dynamic_oid_dtype(frag.base())?);
            for &i in rows {
                col.push_value(&ids[i])?;
            }
            Ok(col)
        }
        Selector::VertexData => {
            let Some((_, dtype)) = frag.v_prop() else {
                return Err(EngineError::InvalidOperation(
                    "graph was projected without vertex data".into(),
                ));
            };
            let data = frag.vertex_data()?;
            let mut col = Column::new(dtype);
            for &i in rows {
                col.push_value(&data[i])?;
            }
            Ok(col)
        }
        Selector::Result | Selector::ResultColumn(_) => Err(no_result_columns()),
    }
}

/// Offsets into [`DynamicFragment::owned_vertices`] order whose oid
/// falls in `range`.
#[cfg(feature = "dynamic")]
pub(crate) fn dynamic_owned_rows(frag: &DynamicFragment, range: &VertexRange) -> Vec<usize> {
    frag.owned_vertices()
        .iter()
        .enumerate()
        .filter(|(_, (_, oid))| range.contains(oid))
        .map(|(i, _)| i)
        .collect()
}

/// Column for a vertex-addressing selector over `rows` of a dynamic
/// fragment's owned vertices.
#[cfg(feature = "dynamic")]
pub(crate) fn dynamic_vertex_column(
    frag: &DynamicFragment,
    sel: &Selector,
    rows: &[usize],
) -> Result<Column, EngineError> {
    let owned = frag.owned_vertices();
    match sel {
        Selector::VertexId => {
            let mut col = Column::new(dynamic_oid_dtype(frag)?);
            for &i in rows {
                col.push_value(&owned[i].1)?;
            }
            Ok(col)
        }
        // Schemaless attribute maps travel as JSON strings.
        Selector::VertexData => {
            let mut col = Column::new(DataType::Utf8);
            for &i in rows {
                let attrs = frag.node_attrs(owned[i].0).unwrap_or_default();
                let text = DynValue::Map(attrs).to_json().to_string();
                col.push_value(&DynValue::Str(text))?;
            }
            Ok(col)
        }
        Selector::Result | Selector::ResultColumn(_) => Err(no_result_columns()),
    }
}

/// Sum one per-rank count across the group.
#[cfg(feature = "dynamic")]
#[allow(clippy::cast_possible_truncation)] // counts fit in usize
fn sum_counts(comm: &dyn Collective, local: usize) -> Result<usize, EngineError> {
    let gathered = comm.all_gather((local as u64).to_le_bytes().to_vec())?;
    let mut total: u64 = 0;
    for raw in gathered {
        let raw: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
            EngineError::IllegalState("count exchange corrupted".into())
        })?;
        total += u64::from_le_bytes(raw);
    }
    Ok(total as usize)
}

/// Answer one request against `frag` read in `mode`.
///
/// Ranks without the queried data answer with the empty string.
#[cfg(feature = "dynamic")]
fn report_dynamic(
    frag: &DynamicFragment,
    mode: ViewMode,
    comm: &dyn Collective,
    req: &ReportRequest,
) -> Result<String, EngineError> {
    let answer = match req {
        ReportRequest::NodeNum => frag.node_count().to_string(),
        ReportRequest::EdgeNum => frag.edge_count(comm, mode)?.to_string(),
        ReportRequest::SelfloopsNum => {
            sum_counts(comm, frag.local_selfloop_count())?.to_string()
        }
        ReportRequest::HasNode(node) => frag.has_node(node).to_string(),
        ReportRequest::HasEdge(u, v) => match frag.has_edge(u, v, mode) {
            Some(known) => known.to_string(),
            None => String::new(),
        },
        ReportRequest::NodeData(node) => match frag.node_data(node)? {
            Some(attrs) => DynValue::Map(attrs).to_json().to_string(),
            None => String::new(),
        },
        ReportRequest::EdgeData(u, v) => match frag.edge_data(u, v, mode) {
            Some(data) => data.to_json().to_string(),
            None => String::new(),
        },
        ReportRequest::Degree(node, kind) => match frag.degree(node, *kind, mode)? {
            Some(deg) => deg.to_string(),
            None => String::new(),
        },
        ReportRequest::Neighbors(node, dir) => match frag.adjacent(node, *dir, mode)? {
            Some(oids) => oid_array_json(&oids),
            None => String::new(),
        },
        ReportRequest::NodeBatch { fid, offset, limit } => {
            if frag.fid() == *fid {
                oid_array_json(&frag.owned_nodes_slice(*offset, *limit))
            } else {
                String::new()
            }
        }
    };
    Ok(answer)
}

#[cfg(feature = "dynamic")]
fn oid_array_json(oids: &[DynValue]) -> String {
    serde_json::Value::Array(oids.iter().map(DynValue::to_json).collect()).to_string()
}
