// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Immutable columnar property fragments.
//!
//! A columnar graph is loaded once and never mutated in place; add-column
//! builds a new fragment sharing the vertex map, add-labels rebuilds the
//! map with old labels held in place so old gids stay valid.
//! Each rank holds the rows it owns: vertex property columns for its
//! own vertices, edge rows whose source it owns, and (directed graphs
//! only) incoming rows whose destination it owns. Undirected edges are
//! stored in both orientations, one per endpoint owner, so adjacency is
//! always answerable locally; self-loops are stored once.
//!
//! Persistence goes through the store collaborator: one object per rank
//! plus a rank-0 group binding fragment id to object id, with the vertex
//! map linked as a named member so map identity can be compared without
//! reading payloads.

// Label and fragment ids fit u32 long before these casts narrow them.
#![allow(clippy::cast_possible_truncation)]

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use skein_comm::Collective;
use skein_store::{MetaValue, ObjectId, ObjectMeta, ObjectStore};

use crate::column::{Column, DataType};
use crate::error::EngineError;
use crate::schema::{LabelSchema, PropertyDef, PropertySchema};
use crate::value::DynValue;
use crate::vmap::{gid_fid, gid_label, gid_offset, pack_gid, ColumnarVertexMap, Gid};

/// Store type name of a persisted columnar fragment.
pub const FRAGMENT_TYPE_NAME: &str = "skein::ColumnarFragment";
/// Store type name of a persisted vertex map.
pub const VERTEX_MAP_TYPE_NAME: &str = "skein::ColumnarVertexMap";
/// Store type name of a fragment group.
pub const FRAGMENT_GROUP_TYPE_NAME: &str = "skein::ColumnarFragmentGroup";
/// Member key linking a fragment object to its vertex map object.
pub const VERTEX_MAP_MEMBER: &str = "vertex_map";

const EID_FID_SHIFT: u32 = 50;

/// One vertex label's rows inside one fragment of a load payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexTable {
    /// Label name.
    pub label: String,
    /// Vertex ids in offset order.
    pub oids: Column,
    /// Property columns aligned to `oids`.
    pub properties: Vec<(String, Column)>,
}

/// One edge label's rows inside one fragment of a load payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeTable {
    /// Label name.
    pub label: String,
    /// Source vertex label.
    pub src_label: String,
    /// Destination vertex label.
    pub dst_label: String,
    /// Source oids.
    pub srcs: Column,
    /// Destination oids.
    pub dsts: Column,
    /// Property columns aligned to the rows.
    pub properties: Vec<(String, Column)>,
}

/// Rows of one fragment in a load payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FragmentData {
    /// Vertex tables, one per label present in this fragment.
    pub vertices: Vec<VertexTable>,
    /// Edge tables, one per edge label present in this fragment.
    pub edges: Vec<EdgeTable>,
}

/// Host-provided load payload: the whole graph, partitioned by the host.
///
/// Every rank receives the full set and keeps only what it owns; the
/// fragment a vertex is listed under *is* its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentDataSet {
    /// Whether edges are directed.
    pub directed: bool,
    /// Per-fragment rows, indexed by fragment id.
    pub fragments: Vec<FragmentData>,
}

impl FragmentDataSet {
    /// Decode a CBOR load payload.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on undecodable bytes.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, EngineError> {
        ciborium::from_reader(bytes).map_err(|e| {
            EngineError::InvalidValue(format!("fragment data payload undecodable: {e}"))
        })
    }

    /// Encode to CBOR.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] when encoding fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, EngineError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| EngineError::InvalidValue(format!("fragment data encode failed: {e}")))?;
        Ok(buf)
    }
}

/// Aligned edge rows: endpoints, optional generated ids, property columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRows {
    /// Source gids.
    pub srcs: Vec<Gid>,
    /// Destination gids.
    pub dsts: Vec<Gid>,
    /// Generated edge ids; empty when the graph does not generate them.
    pub eids: Vec<i64>,
    /// Property columns aligned to the rows.
    pub props: Vec<(String, Column)>,
}

impl EdgeRows {
    fn with_props(defs: &[PropertyDef]) -> Self {
        Self {
            srcs: Vec::new(),
            dsts: Vec::new(),
            eids: Vec::new(),
            props: defs
                .iter()
                .map(|d| (d.name.clone(), Column::new(d.data_type)))
                .collect(),
        }
    }

    /// Row count.
    pub fn len(&self) -> usize {
        self.srcs.len()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.srcs.is_empty()
    }

    fn push_row(
        &mut self,
        src: Gid,
        dst: Gid,
        eid: Option<i64>,
        table: &EdgeTable,
        row: usize,
    ) -> Result<(), EngineError> {
        self.srcs.push(src);
        self.dsts.push(dst);
        if let Some(eid) = eid {
            self.eids.push(eid);
        }
        for (idx, (_, col)) in self.props.iter_mut().enumerate() {
            col.push_from(&table.properties[idx].1, row)?;
        }
        Ok(())
    }
}

/// Edge rows of one edge label held by one fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeStore {
    /// Source vertex label id.
    pub src_label: u32,
    /// Destination vertex label id.
    pub dst_label: u32,
    /// Rows whose source this fragment owns (undirected graphs keep both
    /// orientations here, one per endpoint owner).
    pub out: EdgeRows,
    /// Directed graphs only: rows whose destination this fragment owns
    /// and whose source lives elsewhere.
    pub incoming: EdgeRows,
}

#[derive(Serialize, Deserialize)]
struct FragmentBody {
    fid: u32,
    fnum: u32,
    directed: bool,
    generate_eid: bool,
    schema: PropertySchema,
    vertex_props: Vec<Vec<(String, Column)>>,
    edges: Vec<EdgeStore>,
}

/// Store ids of one persisted columnar fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHandles {
    /// This rank's fragment object.
    pub object_id: ObjectId,
    /// The shared vertex-map object this fragment links.
    pub vmap_id: ObjectId,
    /// The rank-0 group binding every rank's fragment object.
    pub group_id: ObjectId,
}

/// One rank's slice of an immutable columnar property graph.
#[derive(Debug, Clone)]
pub struct ColumnarFragment {
    fid: u32,
    fnum: u32,
    directed: bool,
    generate_eid: bool,
    schema: PropertySchema,
    vmap: Arc<ColumnarVertexMap>,
    /// `[label_id]` property columns aligned to this fragment's offsets.
    vertex_props: Vec<Vec<(String, Column)>>,
    /// `[edge_label_id]` rows held by this fragment.
    edges: Vec<EdgeStore>,
}

struct VertexDiscovery {
    ids: FxHashMap<String, usize>,
    labels: Vec<String>,
    defs: Vec<Vec<PropertyDef>>,
    oid_types: Vec<DataType>,
}

fn property_defs(properties: &[(String, Column)]) -> Vec<PropertyDef> {
    properties
        .iter()
        .map(|(name, col)| PropertyDef {
            name: name.clone(),
            data_type: col.data_type(),
        })
        .collect()
}

/// Property defs and columns surviving a restriction; `None` keeps all.
fn keep_properties(
    label: &str,
    schema: &LabelSchema,
    columns: &[(String, Column)],
    wanted: Option<&[String]>,
) -> Result<(Vec<PropertyDef>, Vec<(String, Column)>), EngineError> {
    let Some(wanted) = wanted else {
        return Ok((schema.properties.clone(), columns.to_vec()));
    };
    let mut defs = Vec::with_capacity(wanted.len());
    let mut kept = Vec::with_capacity(wanted.len());
    for name in wanted {
        let def = schema
            .properties
            .iter()
            .find(|p| &p.name == name)
            .ok_or_else(|| EngineError::NotFound(format!("property {label}.{name}")))?;
        let column = columns
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| EngineError::NotFound(format!("property {label}.{name}")))?;
        defs.push(def.clone());
        kept.push(column.clone());
    }
    Ok((defs, kept))
}

fn restrict_rows(
    label: &str,
    schema: &LabelSchema,
    rows: &EdgeRows,
    label_map: &FxHashMap<u32, u32>,
    wanted: Option<&[String]>,
) -> Result<EdgeRows, EngineError> {
    let (_, props) = keep_properties(label, schema, &rows.props, wanted)?;
    Ok(EdgeRows {
        srcs: retag_endpoints(&rows.srcs, label_map)?,
        dsts: retag_endpoints(&rows.dsts, label_map)?,
        eids: rows.eids.clone(),
        props,
    })
}

/// Rewrites the label component of each gid; fragment and offset stay.
fn retag_endpoints(gids: &[Gid], label_map: &FxHashMap<u32, u32>) -> Result<Vec<Gid>, EngineError> {
    gids.iter()
        .map(|&gid| {
            let new_label = label_map.get(&gid_label(gid)).copied().ok_or_else(|| {
                EngineError::IllegalState(format!(
                    "edge row endpoint carries unexpected label {}",
                    gid_label(gid)
                ))
            })?;
            pack_gid(gid_fid(gid), new_label, gid_offset(gid))
        })
        .collect()
}

fn check_table_alignment(
    what: &str,
    label: &str,
    rows: usize,
    properties: &[(String, Column)],
) -> Result<(), EngineError> {
    let mut seen = std::collections::BTreeSet::new();
    for (name, col) in properties {
        if !seen.insert(name.as_str()) {
            return Err(EngineError::InvalidValue(format!(
                "duplicate property {name} on {what} label {label}"
            )));
        }
        if col.len() != rows {
            return Err(EngineError::InvalidValue(format!(
                "property column {name} misaligned on {what} label {label}: {} rows vs {rows}",
                col.len()
            )));
        }
    }
    Ok(())
}

fn discover_vertex_labels(data: &FragmentDataSet) -> Result<VertexDiscovery, EngineError> {
    let mut disc = VertexDiscovery {
        ids: FxHashMap::default(),
        labels: Vec::new(),
        defs: Vec::new(),
        oid_types: Vec::new(),
    };
    for (fid, fragment) in data.fragments.iter().enumerate() {
        let mut in_fragment = std::collections::BTreeSet::new();
        for table in &fragment.vertices {
            if !in_fragment.insert(table.label.as_str()) {
                return Err(EngineError::InvalidValue(format!(
                    "vertex label {} appears twice in fragment {fid}",
                    table.label
                )));
            }
            check_table_alignment("vertex", &table.label, table.oids.len(), &table.properties)?;
            let defs = property_defs(&table.properties);
            match disc.ids.get(&table.label) {
                None => {
                    disc.ids.insert(table.label.clone(), disc.labels.len());
                    disc.labels.push(table.label.clone());
                    disc.defs.push(defs);
                    disc.oid_types.push(table.oids.data_type());
                }
                Some(&id) => {
                    if disc.defs[id] != defs {
                        return Err(EngineError::DataType(format!(
                            "vertex label {} schema diverges across fragments",
                            table.label
                        )));
                    }
                }
            }
        }
    }
    Ok(disc)
}

struct EdgeDiscovery {
    ids: FxHashMap<String, usize>,
    labels: Vec<String>,
    endpoints: Vec<(u32, u32)>,
    defs: Vec<Vec<PropertyDef>>,
}

fn discover_edge_labels(
    data: &FragmentDataSet,
    vertex_ids: &FxHashMap<String, usize>,
) -> Result<EdgeDiscovery, EngineError> {
    let mut disc = EdgeDiscovery {
        ids: FxHashMap::default(),
        labels: Vec::new(),
        endpoints: Vec::new(),
        defs: Vec::new(),
    };
    for (fid, fragment) in data.fragments.iter().enumerate() {
        let mut in_fragment = std::collections::BTreeSet::new();
        for table in &fragment.edges {
            if !in_fragment.insert(table.label.as_str()) {
                return Err(EngineError::InvalidValue(format!(
                    "edge label {} appears twice in fragment {fid}",
                    table.label
                )));
            }
            if table.srcs.len() != table.dsts.len() {
                return Err(EngineError::InvalidValue(format!(
                    "edge label {} endpoint columns misaligned: {} vs {}",
                    table.label,
                    table.srcs.len(),
                    table.dsts.len()
                )));
            }
            check_table_alignment("edge", &table.label, table.srcs.len(), &table.properties)?;
            let src = *vertex_ids.get(&table.src_label).ok_or_else(|| {
                EngineError::InvalidValue(format!(
                    "edge label {} references unknown vertex label {}",
                    table.label, table.src_label
                ))
            })?;
            let dst = *vertex_ids.get(&table.dst_label).ok_or_else(|| {
                EngineError::InvalidValue(format!(
                    "edge label {} references unknown vertex label {}",
                    table.label, table.dst_label
                ))
            })?;
            let defs = property_defs(&table.properties);
            match disc.ids.get(&table.label) {
                None => {
                    disc.ids.insert(table.label.clone(), disc.labels.len());
                    disc.labels.push(table.label.clone());
                    disc.endpoints.push((src as u32, dst as u32));
                    disc.defs.push(defs);
                }
                Some(&id) => {
                    if disc.defs[id] != defs || disc.endpoints[id] != (src as u32, dst as u32) {
                        return Err(EngineError::DataType(format!(
                            "edge label {} schema diverges across fragments",
                            table.label
                        )));
                    }
                }
            }
        }
    }
    Ok(disc)
}

impl ColumnarFragment {
    /// Build rank `fid`'s fragment from a host load payload.
    ///
    /// Every rank calls this with the same payload; the replicated vertex
    /// map is built from all fragments, rows are routed to their owners,
    /// and only this rank's rows are kept.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on malformed payloads (wrong fragment
    /// count, misaligned columns, unknown endpoint labels or oids),
    /// [`EngineError::DataType`] on duplicate oids or schemas diverging
    /// across fragments.
    pub fn from_data_set(
        fid: u32,
        fnum: u32,
        generate_eid: bool,
        data: &FragmentDataSet,
    ) -> Result<Self, EngineError> {
        if data.fragments.len() != fnum as usize {
            return Err(EngineError::InvalidValue(format!(
                "load payload carries {} fragments for a {fnum}-rank group",
                data.fragments.len()
            )));
        }
        let vertices = discover_vertex_labels(data)?;
        let edge_labels = discover_edge_labels(data, &vertices.ids)?;

        // Replicated vertex map over all fragments.
        let mut oid_arrays = Vec::with_capacity(fnum as usize);
        for fragment in &data.fragments {
            let mut per_label: Vec<Column> = vertices
                .oid_types
                .iter()
                .map(|&dtype| Column::new(dtype))
                .collect();
            for table in &fragment.vertices {
                let id = vertices.ids[&table.label];
                per_label[id] = table.oids.clone();
            }
            oid_arrays.push(per_label);
        }
        let vmap = Arc::new(ColumnarVertexMap::build(fnum, oid_arrays)?);

        // Own vertex property columns, label-id order.
        let mut vertex_props: Vec<Vec<(String, Column)>> = vertices
            .defs
            .iter()
            .map(|defs| {
                defs.iter()
                    .map(|d| (d.name.clone(), Column::new(d.data_type)))
                    .collect()
            })
            .collect();
        for table in &data.fragments[fid as usize].vertices {
            let id = vertices.ids[&table.label];
            vertex_props[id] = table.properties.clone();
        }

        // Route every edge row to its owning fragments; keep only ours.
        let mut edges: Vec<EdgeStore> = edge_labels
            .endpoints
            .iter()
            .zip(&edge_labels.defs)
            .map(|(&(src_label, dst_label), defs)| EdgeStore {
                src_label,
                dst_label,
                out: EdgeRows::with_props(defs),
                incoming: EdgeRows::with_props(defs),
            })
            .collect();
        let mut eid_seq = vec![0_u64; fnum as usize];
        for (origin, fragment) in data.fragments.iter().enumerate() {
            for table in &fragment.edges {
                let label_id = edge_labels.ids[&table.label];
                let (src_label, dst_label) = edge_labels.endpoints[label_id];
                for row in 0..table.srcs.len() {
                    let src_gid = resolve_endpoint(&vmap, src_label, &table.srcs, row)?;
                    let dst_gid = resolve_endpoint(&vmap, dst_label, &table.dsts, row)?;
                    let eid = if generate_eid {
                        Some(next_eid(origin as u32, &mut eid_seq[origin])?)
                    } else {
                        None
                    };
                    let store = &mut edges[label_id];
                    if gid_fid(src_gid) == fid {
                        store.out.push_row(src_gid, dst_gid, eid, table, row)?;
                    }
                    if data.directed {
                        if gid_fid(dst_gid) == fid && gid_fid(src_gid) != fid {
                            store.incoming.push_row(src_gid, dst_gid, eid, table, row)?;
                        }
                    } else if gid_fid(dst_gid) == fid && src_gid != dst_gid {
                        store.out.push_row(dst_gid, src_gid, eid, table, row)?;
                    }
                }
            }
        }

        let schema = PropertySchema {
            vertex_labels: vertices
                .labels
                .iter()
                .zip(&vertices.defs)
                .map(|(label, defs)| LabelSchema {
                    label: label.clone(),
                    properties: defs.clone(),
                })
                .collect(),
            edge_labels: edge_labels
                .labels
                .iter()
                .zip(&edge_labels.defs)
                .map(|(label, defs)| LabelSchema {
                    label: label.clone(),
                    properties: defs.clone(),
                })
                .collect(),
        };

        Self::from_parts(
            fid,
            fnum,
            data.directed,
            generate_eid,
            schema,
            vmap,
            vertex_props,
            edges,
        )
    }

    /// Assemble a fragment from already-routed parts.
    ///
    /// The conversion engine uses this after building each rank's rows
    /// locally.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] when parts disagree with the schema
    /// or the vertex map on shape.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        fid: u32,
        fnum: u32,
        directed: bool,
        generate_eid: bool,
        schema: PropertySchema,
        vmap: Arc<ColumnarVertexMap>,
        vertex_props: Vec<Vec<(String, Column)>>,
        edges: Vec<EdgeStore>,
    ) -> Result<Self, EngineError> {
        if fid >= fnum || vmap.fnum() != fnum {
            return Err(EngineError::InvalidValue(format!(
                "fragment shape mismatch: fid {fid}, fnum {fnum}, vertex map over {}",
                vmap.fnum()
            )));
        }
        if vertex_props.len() != schema.vertex_labels.len()
            || vmap.labels() != schema.vertex_labels.len()
        {
            return Err(EngineError::InvalidValue(
                "vertex label count disagrees between schema, map, and columns".into(),
            ));
        }
        for (label_id, props) in vertex_props.iter().enumerate() {
            let rows = vmap.vertex_count(fid, label_id);
            for (name, col) in props {
                if col.len() != rows {
                    return Err(EngineError::InvalidValue(format!(
                        "vertex property {name} misaligned: {} rows vs {rows}",
                        col.len()
                    )));
                }
            }
        }
        if edges.len() != schema.edge_labels.len() {
            return Err(EngineError::InvalidValue(
                "edge label count disagrees between schema and stores".into(),
            ));
        }
        for store in &edges {
            for rows in [&store.out, &store.incoming] {
                if rows.dsts.len() != rows.srcs.len()
                    || (!rows.eids.is_empty() && rows.eids.len() != rows.srcs.len())
                    || rows.props.iter().any(|(_, c)| c.len() != rows.srcs.len())
                {
                    return Err(EngineError::InvalidValue(
                        "edge rows misaligned with their property columns".into(),
                    ));
                }
            }
        }
        Ok(Self {
            fid,
            fnum,
            directed,
            generate_eid,
            schema,
            vmap,
            vertex_props,
            edges,
        })
    }

    /// This fragment's id.
    pub fn fid(&self) -> u32 {
        self.fid
    }

    /// Fragment count of the graph.
    pub fn fnum(&self) -> u32 {
        self.fnum
    }

    /// Whether edges are directed.
    pub fn directed(&self) -> bool {
        self.directed
    }

    /// Whether edge ids were generated at load.
    pub fn generate_eid(&self) -> bool {
        self.generate_eid
    }

    /// Graph schema.
    pub fn schema(&self) -> &PropertySchema {
        &self.schema
    }

    /// Shared replicated vertex map.
    pub fn vmap(&self) -> &Arc<ColumnarVertexMap> {
        &self.vmap
    }

    /// Property columns of this fragment's vertices of `label_id`.
    pub fn vertex_properties(&self, label_id: usize) -> &[(String, Column)] {
        self.vertex_props
            .get(label_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Edge rows of `label_id`.
    pub fn edge_store(&self, label_id: usize) -> Option<&EdgeStore> {
        self.edges.get(label_id)
    }

    /// All edge stores, label-id order.
    pub fn edge_stores(&self) -> &[EdgeStore] {
        &self.edges
    }

    /// Row indices of `label_id`'s out rows this fragment owns for
    /// counting and marshalling.
    ///
    /// Directed graphs own every out row. Undirected graphs store both
    /// orientations, so only the canonical one (src ≤ dst) counts.
    pub fn owned_edge_rows(&self, label_id: usize) -> Vec<usize> {
        let Some(store) = self.edges.get(label_id) else {
            return Vec::new();
        };
        (0..store.out.len())
            .filter(|&i| self.directed || store.out.srcs[i] <= store.out.dsts[i])
            .collect()
    }

    /// Edges this fragment owns, across all labels.
    pub fn local_edge_count(&self) -> usize {
        (0..self.edges.len())
            .map(|label_id| self.owned_edge_rows(label_id).len())
            .sum()
    }

    /// New fragment with one more vertex property column, sharing this
    /// fragment's vertex map.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on unknown label ids, name
    /// collisions, or misaligned columns.
    pub fn with_vertex_column(
        &self,
        label_id: usize,
        name: &str,
        column: Column,
    ) -> Result<Self, EngineError> {
        let Some(label) = self.schema.vertex_label(label_id) else {
            return Err(EngineError::InvalidValue(format!(
                "vertex label id {label_id} out of range"
            )));
        };
        if label.property_id(name).is_some() {
            return Err(EngineError::InvalidValue(format!(
                "property {name} already exists on label {}",
                label.label
            )));
        }
        let rows = self.vmap.vertex_count(self.fid, label_id);
        if column.len() != rows {
            return Err(EngineError::InvalidValue(format!(
                "column {name} has {} rows, label {} holds {rows}",
                column.len(),
                label.label
            )));
        }
        let mut next = self.clone();
        next.schema.vertex_labels[label_id].properties.push(PropertyDef {
            name: name.to_owned(),
            data_type: column.data_type(),
        });
        next.vertex_props[label_id].push((name.to_owned(), column));
        Ok(next)
    }

    /// New fragment with the payload's vertex and edge labels appended.
    ///
    /// Existing labels keep their ids and per-label offsets, so gids
    /// minted against this fragment stay valid against the result. The
    /// payload is routed exactly like a load: every rank calls this with
    /// the same payload and keeps only its own rows. New edge labels may
    /// reference old vertex labels and vice versa.
    ///
    /// # Errors
    /// [`EngineError::InvalidOperation`] when the fragment carries
    /// generated edge ids (a fresh batch cannot continue the sequence
    /// locally), [`EngineError::InvalidValue`] on malformed payloads or
    /// label collisions, [`EngineError::DataType`] on duplicate oids or
    /// schemas diverging across fragments.
    pub fn with_labels(&self, data: &FragmentDataSet) -> Result<Self, EngineError> {
        if self.generate_eid {
            return Err(EngineError::InvalidOperation(
                "cannot add labels to a graph with generated edge ids".into(),
            ));
        }
        if data.fragments.len() != self.fnum as usize {
            return Err(EngineError::InvalidValue(format!(
                "add-labels payload carries {} fragments for a {}-rank group",
                data.fragments.len(),
                self.fnum
            )));
        }
        if data.directed != self.directed {
            return Err(EngineError::InvalidValue(
                "add-labels payload directedness differs from the graph".into(),
            ));
        }
        let vertices = discover_vertex_labels(data)?;
        for label in &vertices.labels {
            if self.schema.vertex_label_id(label).is_some() {
                return Err(EngineError::InvalidValue(format!(
                    "vertex label {label} already exists"
                )));
            }
        }
        let old_vlabels = self.schema.vertex_labels.len();
        let mut vertex_ids: FxHashMap<String, usize> = FxHashMap::default();
        for (id, label) in self.schema.vertex_labels.iter().enumerate() {
            vertex_ids.insert(label.label.clone(), id);
        }
        for (id, label) in vertices.labels.iter().enumerate() {
            vertex_ids.insert(label.clone(), old_vlabels + id);
        }
        let edge_labels = discover_edge_labels(data, &vertex_ids)?;
        for label in &edge_labels.labels {
            if self.schema.edge_label_id(label).is_some() {
                return Err(EngineError::InvalidValue(format!(
                    "edge label {label} already exists"
                )));
            }
        }

        // Rebuild the replicated vertex map: old labels first, in place,
        // then the payload's labels.
        let mut oid_arrays = Vec::with_capacity(self.fnum as usize);
        for fid in 0..self.fnum {
            let mut per_label: Vec<Column> = (0..old_vlabels)
                .map(|label_id| match self.vmap.oid_column(fid, label_id) {
                    Some(col) => col.clone(),
                    None => Column::new(self.vmap.oid_type(label_id).unwrap_or(DataType::Int64)),
                })
                .collect();
            let mut added: Vec<Column> = vertices
                .oid_types
                .iter()
                .map(|&dtype| Column::new(dtype))
                .collect();
            for table in &data.fragments[fid as usize].vertices {
                added[vertices.ids[&table.label]] = table.oids.clone();
            }
            per_label.extend(added);
            oid_arrays.push(per_label);
        }
        let vmap = Arc::new(ColumnarVertexMap::build(self.fnum, oid_arrays)?);

        let mut vertex_props = self.vertex_props.clone();
        let mut added_props: Vec<Vec<(String, Column)>> = vertices
            .defs
            .iter()
            .map(|defs| {
                defs.iter()
                    .map(|d| (d.name.clone(), Column::new(d.data_type)))
                    .collect()
            })
            .collect();
        for table in &data.fragments[self.fid as usize].vertices {
            added_props[vertices.ids[&table.label]] = table.properties.clone();
        }
        vertex_props.extend(added_props);

        // Route the payload's edge rows like a load; old stores stay as
        // they are.
        let mut added_edges: Vec<EdgeStore> = edge_labels
            .endpoints
            .iter()
            .zip(&edge_labels.defs)
            .map(|(&(src_label, dst_label), defs)| EdgeStore {
                src_label,
                dst_label,
                out: EdgeRows::with_props(defs),
                incoming: EdgeRows::with_props(defs),
            })
            .collect();
        for fragment in &data.fragments {
            for table in &fragment.edges {
                let label_id = edge_labels.ids[&table.label];
                let (src_label, dst_label) = edge_labels.endpoints[label_id];
                for row in 0..table.srcs.len() {
                    let src_gid = resolve_endpoint(&vmap, src_label, &table.srcs, row)?;
                    let dst_gid = resolve_endpoint(&vmap, dst_label, &table.dsts, row)?;
                    let store = &mut added_edges[label_id];
                    if gid_fid(src_gid) == self.fid {
                        store.out.push_row(src_gid, dst_gid, None, table, row)?;
                    }
                    if data.directed {
                        if gid_fid(dst_gid) == self.fid && gid_fid(src_gid) != self.fid {
                            store.incoming.push_row(src_gid, dst_gid, None, table, row)?;
                        }
                    } else if gid_fid(dst_gid) == self.fid && src_gid != dst_gid {
                        store.out.push_row(dst_gid, src_gid, None, table, row)?;
                    }
                }
            }
        }
        let mut edges = self.edges.clone();
        edges.extend(added_edges);

        let mut schema = self.schema.clone();
        schema.vertex_labels.extend(
            vertices
                .labels
                .iter()
                .zip(&vertices.defs)
                .map(|(label, defs)| LabelSchema {
                    label: label.clone(),
                    properties: defs.clone(),
                }),
        );
        schema.edge_labels.extend(
            edge_labels
                .labels
                .iter()
                .zip(&edge_labels.defs)
                .map(|(label, defs)| LabelSchema {
                    label: label.clone(),
                    properties: defs.clone(),
                }),
        );

        Self::from_parts(
            self.fid,
            self.fnum,
            self.directed,
            self.generate_eid,
            schema,
            vmap,
            vertex_props,
            edges,
        )
    }

    /// New fragment keeping only the listed vertex and edge labels, each
    /// cut down to the named properties (`None` keeps the full column
    /// set). Label ids are reassigned by list position and the replicated
    /// vertex map is rebuilt over the survivors; surviving labels keep
    /// every vertex, so offsets are untouched and no rows move between
    /// ranks.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] for labels or properties the schema does
    /// not hold, [`EngineError::InvalidValue`] for a repeated label or a
    /// kept edge label whose endpoint label is dropped.
    pub fn restrict(
        &self,
        vertex_keep: &[(String, Option<Vec<String>>)],
        edge_keep: &[(String, Option<Vec<String>>)],
    ) -> Result<Self, EngineError> {
        let mut label_map: FxHashMap<u32, u32> = FxHashMap::default();
        let mut kept_vertex_ids = Vec::with_capacity(vertex_keep.len());
        let mut vertex_labels = Vec::with_capacity(vertex_keep.len());
        let mut vertex_props = Vec::with_capacity(vertex_keep.len());
        for (new_id, (label, props)) in vertex_keep.iter().enumerate() {
            let old_id = self
                .schema
                .vertex_label_id(label)
                .ok_or_else(|| EngineError::NotFound(format!("vertex label {label}")))?;
            if label_map.insert(old_id as u32, new_id as u32).is_some() {
                return Err(EngineError::InvalidValue(format!(
                    "vertex label {label} listed twice"
                )));
            }
            kept_vertex_ids.push(old_id);
            let (defs, columns) = keep_properties(
                label,
                &self.schema.vertex_labels[old_id],
                &self.vertex_props[old_id],
                props.as_deref(),
            )?;
            vertex_labels.push(LabelSchema {
                label: label.clone(),
                properties: defs,
            });
            vertex_props.push(columns);
        }

        let mut seen_edges: FxHashSet<usize> = FxHashSet::default();
        let mut edge_labels = Vec::with_capacity(edge_keep.len());
        let mut edges = Vec::with_capacity(edge_keep.len());
        for (label, props) in edge_keep {
            let old_id = self
                .schema
                .edge_label_id(label)
                .ok_or_else(|| EngineError::NotFound(format!("edge label {label}")))?;
            if !seen_edges.insert(old_id) {
                return Err(EngineError::InvalidValue(format!(
                    "edge label {label} listed twice"
                )));
            }
            let store = &self.edges[old_id];
            for endpoint in [store.src_label, store.dst_label] {
                if !label_map.contains_key(&endpoint) {
                    let name = self
                        .schema
                        .vertex_label(endpoint as usize)
                        .map_or_else(|| endpoint.to_string(), |l| l.label.clone());
                    return Err(EngineError::InvalidValue(format!(
                        "edge label {label} joins dropped vertex label {name}"
                    )));
                }
            }
            let label_schema = &self.schema.edge_labels[old_id];
            let (defs, _) =
                keep_properties(label, label_schema, &store.out.props, props.as_deref())?;
            edges.push(EdgeStore {
                src_label: label_map[&store.src_label],
                dst_label: label_map[&store.dst_label],
                out: restrict_rows(label, label_schema, &store.out, &label_map, props.as_deref())?,
                incoming: restrict_rows(
                    label,
                    label_schema,
                    &store.incoming,
                    &label_map,
                    props.as_deref(),
                )?,
            });
            edge_labels.push(LabelSchema {
                label: label.clone(),
                properties: defs,
            });
        }

        let mut oid_arrays = Vec::with_capacity(self.fnum as usize);
        for fid in 0..self.fnum {
            let per_label: Vec<Column> = kept_vertex_ids
                .iter()
                .map(|&label_id| match self.vmap.oid_column(fid, label_id) {
                    Some(col) => col.clone(),
                    None => Column::new(self.vmap.oid_type(label_id).unwrap_or(DataType::Int64)),
                })
                .collect();
            oid_arrays.push(per_label);
        }
        let vmap = Arc::new(ColumnarVertexMap::build(self.fnum, oid_arrays)?);

        Self::from_parts(
            self.fid,
            self.fnum,
            self.directed,
            self.generate_eid,
            PropertySchema {
                vertex_labels,
                edge_labels,
            },
            vmap,
            vertex_props,
            edges,
        )
    }

    /// Persist this rank's fragment, sharing `vmap_id` when given
    /// (add-column keeps the base graph's vertex-map object) and writing
    /// the vertex map otherwise. Collective: rank 0 constructs the group
    /// and broadcasts its id.
    ///
    /// # Errors
    /// Store and collective failures propagate;
    /// [`EngineError::IllegalState`] when the id exchange is corrupt.
    pub fn persist_with_vmap(
        &self,
        store: &dyn ObjectStore,
        comm: &dyn Collective,
        vmap_id: Option<ObjectId>,
    ) -> Result<StoreHandles, EngineError> {
        let vmap_id = match vmap_id {
            Some(id) => id,
            None => {
                let mut payload = Vec::new();
                ciborium::into_writer(self.vmap.as_ref(), &mut payload).map_err(|e| {
                    EngineError::IllegalState(format!("vertex map encode failed: {e}"))
                })?;
                let meta = ObjectMeta::new(VERTEX_MAP_TYPE_NAME)
                    .with_entry("fnum", MetaValue::U64(u64::from(self.fnum)));
                let id = store.put(Bytes::from(payload), meta)?;
                store.persist(id)?;
                id
            }
        };

        let body = FragmentBody {
            fid: self.fid,
            fnum: self.fnum,
            directed: self.directed,
            generate_eid: self.generate_eid,
            schema: self.schema.clone(),
            vertex_props: self.vertex_props.clone(),
            edges: self.edges.clone(),
        };
        let mut payload = Vec::new();
        ciborium::into_writer(&body, &mut payload)
            .map_err(|e| EngineError::IllegalState(format!("fragment encode failed: {e}")))?;
        let meta = ObjectMeta::new(FRAGMENT_TYPE_NAME)
            .with_entry("fid", MetaValue::U64(u64::from(self.fid)))
            .with_entry("fnum", MetaValue::U64(u64::from(self.fnum)))
            .with_entry("directed", MetaValue::Bool(self.directed))
            .with_member(VERTEX_MAP_MEMBER, vmap_id);
        let object_id = store.put(Bytes::from(payload), meta)?;
        store.persist(object_id)?;

        let gathered = comm.gather_to_root(object_id.0.to_le_bytes().to_vec())?;
        let group_bytes = match gathered {
            Some(per_rank) => {
                let mut members = BTreeMap::new();
                for (fid, bytes) in per_rank.iter().enumerate() {
                    let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                        EngineError::IllegalState("fragment id exchange corrupted".into())
                    })?;
                    members.insert(fid as u32, ObjectId(u64::from_le_bytes(raw)));
                }
                let group_id = store.construct_group(FRAGMENT_GROUP_TYPE_NAME, members)?;
                group_id.0.to_le_bytes().to_vec()
            }
            None => Vec::new(),
        };
        let group_bytes = comm.broadcast_from_root(group_bytes)?;
        let raw: [u8; 8] = group_bytes.as_slice().try_into().map_err(|_| {
            EngineError::IllegalState("fragment group id exchange corrupted".into())
        })?;
        Ok(StoreHandles {
            object_id,
            vmap_id,
            group_id: ObjectId(u64::from_le_bytes(raw)),
        })
    }

    /// Persist with a freshly written vertex map. See
    /// [`ColumnarFragment::persist_with_vmap`].
    ///
    /// # Errors
    /// See [`ColumnarFragment::persist_with_vmap`].
    pub fn persist(
        &self,
        store: &dyn ObjectStore,
        comm: &dyn Collective,
    ) -> Result<StoreHandles, EngineError> {
        self.persist_with_vmap(store, comm, None)
    }

    /// Load one rank's fragment back from the store.
    ///
    /// Returns the fragment and the vertex-map object id it links.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] for unknown ids or missing members,
    /// [`EngineError::IllegalState`] on undecodable payloads.
    pub fn load(
        store: &dyn ObjectStore,
        object_id: ObjectId,
    ) -> Result<(Self, ObjectId), EngineError> {
        let meta = store
            .get_meta(object_id)?
            .ok_or_else(|| EngineError::NotFound(format!("store object {object_id}")))?;
        let vmap_id = meta.member(VERTEX_MAP_MEMBER).ok_or_else(|| {
            EngineError::NotFound(format!("vertex map member of {object_id}"))
        })?;
        let vmap_bytes = store
            .get(vmap_id)?
            .ok_or_else(|| EngineError::NotFound(format!("store object {vmap_id}")))?;
        let vmap: ColumnarVertexMap = ciborium::from_reader(vmap_bytes.as_ref())
            .map_err(|e| EngineError::IllegalState(format!("stored vertex map undecodable: {e}")))?;
        let body_bytes = store
            .get(object_id)?
            .ok_or_else(|| EngineError::NotFound(format!("store object {object_id}")))?;
        let body: FragmentBody = ciborium::from_reader(body_bytes.as_ref())
            .map_err(|e| EngineError::IllegalState(format!("stored fragment undecodable: {e}")))?;
        let fragment = Self::from_parts(
            body.fid,
            body.fnum,
            body.directed,
            body.generate_eid,
            body.schema,
            Arc::new(vmap),
            body.vertex_props,
            body.edges,
        )?;
        Ok((fragment, vmap_id))
    }
}

fn resolve_endpoint(
    vmap: &ColumnarVertexMap,
    label: u32,
    oids: &Column,
    row: usize,
) -> Result<Gid, EngineError> {
    let oid = oids
        .value(row)
        .ok_or_else(|| EngineError::InvalidValue(format!("edge row {row} out of bounds")))?;
    vmap.gid(label, &oid).ok_or_else(|| {
        EngineError::InvalidValue(format!("edge endpoint not a vertex: {oid}"))
    })
}

#[allow(clippy::cast_possible_wrap)] // seq is bounded below the shift
fn next_eid(origin: u32, seq: &mut u64) -> Result<i64, EngineError> {
    if *seq >= (1 << EID_FID_SHIFT) {
        return Err(EngineError::InvalidValue("edge id overflow".into()));
    }
    let eid = (i64::from(origin) << EID_FID_SHIFT) | (*seq as i64);
    *seq += 1;
    Ok(eid)
}

/// One rank's slice of a projected (single label, single property) graph.
///
/// Shares the parent's vertex map; vdata/edata are clones of the chosen
/// property columns.
#[derive(Debug, Clone)]
pub struct ProjectedFragment {
    parent_key: String,
    fid: u32,
    fnum: u32,
    directed: bool,
    v_label: u32,
    e_label: u32,
    v_prop: Option<u32>,
    e_prop: Option<u32>,
    vmap: Arc<ColumnarVertexMap>,
    vdata: Option<Column>,
    srcs: Vec<Gid>,
    dsts: Vec<Gid>,
    edata: Option<Column>,
}

impl ProjectedFragment {
    /// Project `parent` down to one vertex label and one edge label, each
    /// with at most one data property.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on labels or properties not in the
    /// schema, or edge labels that do not connect the projected vertex
    /// label to itself.
    pub fn project(
        parent: &ColumnarFragment,
        parent_key: &str,
        v_label: &str,
        e_label: &str,
        v_prop: Option<&str>,
        e_prop: Option<&str>,
    ) -> Result<Self, EngineError> {
        let schema = parent.schema();
        let v_label_id = schema
            .vertex_label_id(v_label)
            .ok_or_else(|| {
                EngineError::InvalidValue(format!("vertex label not in schema: {v_label}"))
            })?;
        let e_label_id = schema
            .edge_label_id(e_label)
            .ok_or_else(|| {
                EngineError::InvalidValue(format!("edge label not in schema: {e_label}"))
            })?;
        let store = parent.edge_store(e_label_id).ok_or_else(|| {
            EngineError::InvalidValue(format!("edge label not in schema: {e_label}"))
        })?;
        if store.src_label as usize != v_label_id || store.dst_label as usize != v_label_id {
            return Err(EngineError::InvalidValue(format!(
                "edge label {e_label} does not connect {v_label} to {v_label}"
            )));
        }

        let v_prop_id = v_prop
            .map(|name| {
                schema.vertex_labels[v_label_id]
                    .property_id(name)
                    .ok_or_else(|| {
                        EngineError::InvalidValue(format!(
                            "property not in schema: {v_label}.{name}"
                        ))
                    })
            })
            .transpose()?;
        let e_prop_id = e_prop
            .map(|name| {
                schema.edge_labels[e_label_id]
                    .property_id(name)
                    .ok_or_else(|| {
                        EngineError::InvalidValue(format!(
                            "property not in schema: {e_label}.{name}"
                        ))
                    })
            })
            .transpose()?;

        let vdata = v_prop_id
            .map(|p| parent.vertex_properties(v_label_id)[p].1.clone());
        let edata = e_prop_id.map(|p| store.out.props[p].1.clone());
        Ok(Self {
            parent_key: parent_key.to_owned(),
            fid: parent.fid(),
            fnum: parent.fnum(),
            directed: parent.directed(),
            v_label: v_label_id as u32,
            e_label: e_label_id as u32,
            v_prop: v_prop_id.map(|p| p as u32),
            e_prop: e_prop_id.map(|p| p as u32),
            vmap: Arc::clone(parent.vmap()),
            vdata,
            srcs: store.out.srcs.clone(),
            dsts: store.out.dsts.clone(),
            edata,
        })
    }

    /// Registry key of the parent graph.
    pub fn parent_key(&self) -> &str {
        &self.parent_key
    }

    /// This fragment's id.
    pub fn fid(&self) -> u32 {
        self.fid
    }

    /// Fragment count.
    pub fn fnum(&self) -> u32 {
        self.fnum
    }

    /// Whether edges are directed.
    pub fn directed(&self) -> bool {
        self.directed
    }

    /// Projected (vertex label id, edge label id).
    pub fn labels(&self) -> (u32, u32) {
        (self.v_label, self.e_label)
    }

    /// Projected (vertex property id, edge property id).
    pub fn property_ids(&self) -> (Option<u32>, Option<u32>) {
        (self.v_prop, self.e_prop)
    }

    /// Shared vertex map.
    pub fn vmap(&self) -> &Arc<ColumnarVertexMap> {
        &self.vmap
    }

    /// Projected vertex data column, aligned to this fragment's offsets.
    pub fn vdata(&self) -> Option<&Column> {
        self.vdata.as_ref()
    }

    /// Edge endpoints held by this fragment (source-owned rows).
    pub fn edge_endpoints(&self) -> (&[Gid], &[Gid]) {
        (&self.srcs, &self.dsts)
    }

    /// Projected edge data column, aligned to the edge rows.
    pub fn edata(&self) -> Option<&Column> {
        self.edata.as_ref()
    }

    /// This fragment's vertices of the projected label.
    pub fn local_vertex_count(&self) -> usize {
        self.vmap.vertex_count(self.fid, self.v_label as usize)
    }

    /// Edges this fragment owns under the canonical-orientation rule.
    pub fn local_edge_count(&self) -> usize {
        (0..self.srcs.len())
            .filter(|&i| self.directed || self.srcs[i] <= self.dsts[i])
            .count()
    }
}

/// Oids of one label resolved to dynamic values, offset order.
pub fn label_oids(vmap: &ColumnarVertexMap, fid: u32, label_id: usize) -> Vec<DynValue> {
    let Some(col) = vmap.oid_column(fid, label_id) else {
        return Vec::new();
    };
    (0..col.len()).filter_map(|i| col.value(i)).collect()
}
