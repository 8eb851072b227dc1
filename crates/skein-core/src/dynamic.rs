// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Mutable dynamic property fragments.
//!
//! A dynamic graph is a simple graph (no parallel edges) whose vertices
//! and edges carry free-form attribute maps. Every rank receives every
//! modify batch, so the replicated parts (the vertex map and the
//! tombstone set) stay identical by construction, while vertex data and
//! adjacency live only on owning ranks: a vertex's data sits on its
//! owner, a directed edge u→v sits in the out-adjacency of u's owner and
//! the in-adjacency of v's owner, and an undirected edge sits in the
//! adjacency of both endpoint owners.
//!
//! Deletion is a tombstone: the vertex map keeps the oid, reads filter
//! dead endpoints lazily, and physical cleanup happens when a copy,
//! induce, or conversion rebuilds the fragment. Identical batches keep
//! the tombstones replicated too.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rustc_hash::{FxHashMap, FxHashSet};
use skein_comm::Collective;

use crate::column::DataType;
use crate::error::EngineError;
use crate::value::DynValue;
use crate::vmap::{gid_fid, DynamicVertexMap, Gid};

/// Attribute map of one vertex or edge.
pub type AttrMap = BTreeMap<String, DynValue>;

/// What a modify batch does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyKind {
    /// Insert (or merge attributes into) vertices or edges.
    Add,
    /// Remove vertices or edges; unknown targets are skipped.
    Del,
    /// Merge attributes into existing targets; unknown targets are
    /// skipped.
    Update,
}

impl ModifyKind {
    /// Parse the wire form.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on unknown kinds.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "add" => Ok(Self::Add),
            "del" => Ok(Self::Del),
            "update" => Ok(Self::Update),
            other => Err(EngineError::InvalidValue(format!(
                "unknown modify kind: {other}"
            ))),
        }
    }
}

/// How adjacency is read: as stored, reversed, or as the union of both
/// directions. Read-only views pick a mode; the fragment itself is
/// always [`ViewMode::AsIs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    /// The fragment's own orientation.
    #[default]
    AsIs,
    /// In- and out-adjacency swapped.
    Reversed,
    /// Union of both directions.
    Both,
}

/// Degree flavor for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegreeKind {
    /// Incoming edges only.
    In,
    /// Outgoing edges only.
    Out,
    /// Distinct incident neighbors; self-loops count once.
    Total,
}

/// Which neighbor set to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjacencyDir {
    /// Targets of outgoing edges.
    Successors,
    /// Sources of incoming edges.
    Predecessors,
}

type AdjMap = FxHashMap<Gid, BTreeMap<Gid, AttrMap>>;

#[derive(Debug, Default)]
struct DynState {
    directed: bool,
    vmap: DynamicVertexMap,
    dead: FxHashSet<Gid>,
    /// Data of owned, alive vertices.
    vertex_data: FxHashMap<Gid, AttrMap>,
    /// Directed: out-edges keyed by owned source.
    /// Undirected: every incident edge keyed by the owned endpoint.
    adj_out: AdjMap,
    /// Directed only: in-edges keyed by owned destination, entries are
    /// the sources.
    adj_in: AdjMap,
}

impl DynState {
    fn alive(&self, gid: Gid) -> bool {
        !self.dead.contains(&gid)
    }
}

/// One rank's slice of a mutable dynamic property graph.
#[derive(Debug)]
pub struct DynamicFragment {
    fid: u32,
    fnum: u32,
    state: RwLock<DynState>,
}

fn merge_into(target: &mut AttrMap, attrs: &AttrMap) {
    for (k, v) in attrs {
        target.insert(k.clone(), v.clone());
    }
}

fn valid_oid(value: &DynValue) -> Result<(), EngineError> {
    match value {
        DynValue::Int(_) | DynValue::Str(_) => Ok(()),
        other => Err(EngineError::InvalidValue(format!(
            "vertex id must be an integer or string: {other}"
        ))),
    }
}

pub(crate) fn vertex_item(
    item: &DynValue,
) -> Result<(DynValue, Option<&AttrMap>), EngineError> {
    match item {
        DynValue::List(parts) => match parts.as_slice() {
            [oid] => {
                valid_oid(oid)?;
                Ok((oid.clone(), None))
            }
            [oid, DynValue::Map(attrs)] => {
                valid_oid(oid)?;
                Ok((oid.clone(), Some(attrs)))
            }
            _ => Err(EngineError::InvalidValue(
                "malformed vertex item; expected oid or [oid, attrs]".into(),
            )),
        },
        scalar => {
            valid_oid(scalar)?;
            Ok((scalar.clone(), None))
        }
    }
}

pub(crate) fn edge_item(
    item: &DynValue,
) -> Result<(DynValue, DynValue, Option<&AttrMap>), EngineError> {
    let DynValue::List(parts) = item else {
        return Err(EngineError::InvalidValue(
            "malformed edge item; expected [u, v] or [u, v, attrs]".into(),
        ));
    };
    match parts.as_slice() {
        [u, v] => {
            valid_oid(u)?;
            valid_oid(v)?;
            Ok((u.clone(), v.clone(), None))
        }
        [u, v, DynValue::Map(attrs)] => {
            valid_oid(u)?;
            valid_oid(v)?;
            Ok((u.clone(), v.clone(), Some(attrs)))
        }
        _ => Err(EngineError::InvalidValue(
            "malformed edge item; expected [u, v] or [u, v, attrs]".into(),
        )),
    }
}

impl DynamicFragment {
    /// Empty fragment of rank `fid` in an `fnum`-rank graph.
    pub fn new(fid: u32, fnum: u32, directed: bool) -> Self {
        Self {
            fid,
            fnum,
            state: RwLock::new(DynState {
                directed,
                vmap: DynamicVertexMap::new(fnum),
                ..DynState::default()
            }),
        }
    }

    /// Assemble a fragment from a finished vertex map, this rank's vertex
    /// data, and the edges that touch this rank. Rebuild flows collect
    /// the parts first and hand them over whole; each edge lands on
    /// whichever sides this rank owns, and data for vertices owned
    /// elsewhere is dropped.
    pub fn from_parts(
        fid: u32,
        fnum: u32,
        directed: bool,
        vmap: DynamicVertexMap,
        vertices: Vec<(Gid, AttrMap)>,
        edges: Vec<(Gid, Gid, AttrMap)>,
    ) -> Self {
        let mut st = DynState {
            directed,
            vmap,
            ..DynState::default()
        };
        for (gid, data) in vertices {
            if gid_fid(gid) == fid {
                st.vertex_data.insert(gid, data);
            }
        }
        for (gu, gv, data) in &edges {
            record_edge(&mut st, fid, *gu, *gv, data);
        }
        Self {
            fid,
            fnum,
            state: RwLock::new(st),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, DynState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, DynState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn owns(&self, gid: Gid) -> bool {
        gid_fid(gid) == self.fid
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
        self.read().directed
    }

    /// Resolve an oid to its gid, dead or alive.
    pub fn gid_of(&self, oid: &DynValue) -> Option<Gid> {
        self.read().vmap.gid(oid)
    }

    /// Resolve a gid back to its oid.
    pub fn oid_of(&self, gid: Gid) -> Option<DynValue> {
        self.read().vmap.oid(gid).cloned()
    }

    /// Whether the vertex exists and is alive. Uniform across ranks.
    pub fn has_node(&self, oid: &DynValue) -> bool {
        let st = self.read();
        st.vmap.gid(oid).is_some_and(|gid| st.alive(gid))
    }

    /// Alive vertices across the whole graph. Uniform across ranks.
    pub fn node_count(&self) -> usize {
        let st = self.read();
        st.vmap.total_vertices() - st.dead.len()
    }

    /// This rank's alive vertices as `(gid, oid)`, offset order.
    pub fn owned_vertices(&self) -> Vec<(Gid, DynValue)> {
        let st = self.read();
        st.vmap
            .fragment_oids(self.fid)
            .iter()
            .filter_map(|oid| {
                let gid = st.vmap.gid(oid)?;
                st.alive(gid).then(|| (gid, oid.clone()))
            })
            .collect()
    }

    /// Alive oids of every fragment, fragment order then offset order.
    /// The vertex map is replicated, so every rank sees the same list.
    pub fn all_vertices(&self) -> Vec<DynValue> {
        let st = self.read();
        (0..self.fnum)
            .flat_map(|fid| st.vmap.fragment_oids(fid).iter())
            .filter(|oid| st.vmap.gid(oid).is_some_and(|gid| st.alive(gid)))
            .cloned()
            .collect()
    }

    /// Attributes of an owned vertex.
    pub fn node_attrs(&self, gid: Gid) -> Option<AttrMap> {
        let st = self.read();
        if !self.owns(gid) || !st.alive(gid) {
            return None;
        }
        Some(st.vertex_data.get(&gid).cloned().unwrap_or_default())
    }

    /// A slice of this rank's alive vertex ids in offset order, for
    /// batched iteration.
    pub fn owned_nodes_slice(&self, offset: usize, limit: usize) -> Vec<DynValue> {
        self.owned_vertices()
            .into_iter()
            .map(|(_, oid)| oid)
            .skip(offset)
            .take(limit)
            .collect()
    }

    /// Apply one vertex modify batch. Identical on every rank.
    ///
    /// `Add` inserts or revives vertices and merges `common` plus item
    /// attributes into the owner's copy; `Del` tombstones; `Update`
    /// merges attributes into existing alive vertices and skips unknown
    /// ones.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on malformed items.
    pub fn modify_vertices(
        &self,
        kind: ModifyKind,
        items: &[DynValue],
        common: &AttrMap,
    ) -> Result<(), EngineError> {
        let mut st = self.write();
        for item in items {
            let (oid, attrs) = vertex_item(item)?;
            match kind {
                ModifyKind::Add => {
                    let gid = ensure_vertex(&mut st, self.fid, self.fnum, &oid)?;
                    if self.owns(gid) {
                        let data = st.vertex_data.entry(gid).or_default();
                        merge_into(data, common);
                        if let Some(attrs) = attrs {
                            merge_into(data, attrs);
                        }
                    }
                }
                ModifyKind::Del => {
                    if let Some(gid) = st.vmap.gid(&oid) {
                        if st.alive(gid) {
                            st.dead.insert(gid);
                            st.vertex_data.remove(&gid);
                        }
                    }
                }
                ModifyKind::Update => {
                    if let Some(gid) = st.vmap.gid(&oid) {
                        if st.alive(gid) && self.owns(gid) {
                            let data = st.vertex_data.entry(gid).or_default();
                            merge_into(data, common);
                            if let Some(attrs) = attrs {
                                merge_into(data, attrs);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply one edge modify batch. Identical on every rank.
    ///
    /// `Add` creates missing endpoints (like adding an edge to a graph
    /// that has not seen its nodes yet) and merges attributes into both
    /// owner copies; `Del` erases; `Update` merges into existing edges
    /// and skips unknown ones. Re-adding an existing edge merges
    /// attributes; the graph stays simple.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on malformed items.
    pub fn modify_edges(
        &self,
        kind: ModifyKind,
        items: &[DynValue],
        common: &AttrMap,
    ) -> Result<(), EngineError> {
        let mut st = self.write();
        for item in items {
            let (u, v, attrs) = edge_item(item)?;
            match kind {
                ModifyKind::Add => {
                    let gu = ensure_vertex(&mut st, self.fid, self.fnum, &u)?;
                    let gv = ensure_vertex(&mut st, self.fid, self.fnum, &v)?;
                    let mut data = common.clone();
                    if let Some(attrs) = attrs {
                        merge_into(&mut data, attrs);
                    }
                    record_edge(&mut st, self.fid, gu, gv, &data);
                }
                ModifyKind::Del => {
                    let (Some(gu), Some(gv)) = (st.vmap.gid(&u), st.vmap.gid(&v)) else {
                        continue;
                    };
                    erase_edge(&mut st, self.fid, gu, gv);
                }
                ModifyKind::Update => {
                    let (Some(gu), Some(gv)) = (st.vmap.gid(&u), st.vmap.gid(&v)) else {
                        continue;
                    };
                    if !st.alive(gu) || !st.alive(gv) {
                        continue;
                    }
                    let mut data = common.clone();
                    if let Some(attrs) = attrs {
                        merge_into(&mut data, attrs);
                    }
                    update_edge(&mut st, self.fid, gu, gv, &data);
                }
            }
        }
        Ok(())
    }

    /// Drop every vertex and edge; the vertex map starts over.
    pub fn clear(&self) {
        let mut st = self.write();
        st.vmap = DynamicVertexMap::new(self.fnum);
        st.dead.clear();
        st.vertex_data.clear();
        st.adj_out.clear();
        st.adj_in.clear();
    }

    /// Drop every edge, keeping vertices and their data.
    pub fn clear_edges(&self) {
        let mut st = self.write();
        st.adj_out.clear();
        st.adj_in.clear();
    }

    /// Add a vertex this rank owns, with optional data. Used by rebuild
    /// flows (induce, conversion) where ownership is inherited rather
    /// than hashed.
    ///
    /// # Errors
    /// [`EngineError::DataType`] on duplicate oids.
    pub fn add_own_vertex(
        &self,
        oid: DynValue,
        data: Option<AttrMap>,
    ) -> Result<Gid, EngineError> {
        let mut st = self.write();
        let gid = st.vmap.add_vertex(self.fid, oid)?;
        if let Some(data) = data {
            st.vertex_data.insert(gid, data);
        }
        Ok(gid)
    }

    /// Collectively rebuild the vertex map so every rank holds every
    /// rank's additions. Call after a bulk of [`Self::add_own_vertex`]
    /// and before installing edges.
    ///
    /// # Errors
    /// See [`DynamicVertexMap::construct`].
    pub fn construct_vmap(&self, comm: &dyn Collective) -> Result<(), EngineError> {
        self.write().vmap.construct(comm)
    }

    /// Record an edge between existing vertices on whichever sides this
    /// rank owns. Attributes merge if the edge exists.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] when an endpoint is unknown or dead.
    pub fn install_edge(
        &self,
        u: &DynValue,
        v: &DynValue,
        data: AttrMap,
    ) -> Result<(), EngineError> {
        let mut st = self.write();
        let gu = st
            .vmap
            .gid(u)
            .filter(|g| st.alive(*g))
            .ok_or_else(|| EngineError::NotFound(format!("node {u}")))?;
        let gv = st
            .vmap
            .gid(v)
            .filter(|g| st.alive(*g))
            .ok_or_else(|| EngineError::NotFound(format!("node {v}")))?;
        record_edge(&mut st, self.fid, gu, gv, &data);
        Ok(())
    }

    /// Alive out-entries of an owned vertex: directed fragments list
    /// successors, undirected fragments every incident neighbor.
    pub fn out_entries(&self, gid: Gid) -> Vec<(Gid, AttrMap)> {
        let st = self.read();
        if !self.owns(gid) || !st.alive(gid) {
            return Vec::new();
        }
        st.adj_out
            .get(&gid)
            .map(|nbrs| {
                nbrs.iter()
                    .filter(|(v, _)| st.alive(**v))
                    .map(|(v, data)| (*v, data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Alive in-entries (sources) of an owned vertex; directed only.
    pub fn in_entries(&self, gid: Gid) -> Vec<(Gid, AttrMap)> {
        let st = self.read();
        if !self.owns(gid) || !st.alive(gid) || !st.directed {
            return Vec::new();
        }
        st.adj_in
            .get(&gid)
            .map(|srcs| {
                srcs.iter()
                    .filter(|(w, _)| st.alive(**w))
                    .map(|(w, data)| (*w, data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Edges this rank owns under `mode`, counted so the cross-rank sum
    /// sees each edge exactly once (canonical orientation for
    /// undirected-style modes).
    pub fn local_edge_count(&self, mode: ViewMode) -> usize {
        let st = self.read();
        if st.directed && mode != ViewMode::Both {
            return st
                .adj_out
                .iter()
                .filter(|(&u, _)| gid_fid(u) == self.fid && st.alive(u))
                .map(|(_, nbrs)| nbrs.keys().filter(|&&v| st.alive(v)).count())
                .sum();
        }
        // Undirected-style: count distinct pairs once, at the side whose
        // gid is canonical.
        let mut owned: Vec<Gid> = st
            .adj_out
            .keys()
            .chain(st.adj_in.keys())
            .copied()
            .filter(|&u| gid_fid(u) == self.fid && st.alive(u))
            .collect();
        owned.sort_unstable();
        owned.dedup();
        owned
            .into_iter()
            .map(|u| {
                let mut partners: Vec<Gid> = Vec::new();
                if let Some(nbrs) = st.adj_out.get(&u) {
                    partners.extend(nbrs.keys().copied());
                }
                if let Some(srcs) = st.adj_in.get(&u) {
                    partners.extend(srcs.keys().copied());
                }
                partners.sort_unstable();
                partners.dedup();
                partners
                    .into_iter()
                    .filter(|&v| st.alive(v) && u <= v)
                    .count()
            })
            .sum()
    }

    /// Alive edges across the whole graph under `mode`. Collective; the
    /// answer is uniform across ranks.
    ///
    /// # Errors
    /// Collective failures propagate.
    #[allow(clippy::cast_possible_truncation)] // edge counts fit in usize
    pub fn edge_count(
        &self,
        comm: &dyn Collective,
        mode: ViewMode,
    ) -> Result<usize, EngineError> {
        let local = self.local_edge_count(mode) as u64;
        let mut total = 0_u64;
        for bytes in comm.all_gather(local.to_le_bytes().to_vec())? {
            let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                EngineError::IllegalState("edge count exchange corrupted".into())
            })?;
            total += u64::from_le_bytes(raw);
        }
        Ok(total as usize)
    }

    /// Self-loops this rank owns. Mode-independent.
    pub fn local_selfloop_count(&self) -> usize {
        let st = self.read();
        st.adj_out
            .iter()
            .filter(|(&u, nbrs)| {
                gid_fid(u) == self.fid && st.alive(u) && nbrs.contains_key(&u)
            })
            .count()
    }

    /// Whether the edge exists under `mode`. `Some` on ranks that own an
    /// endpoint, `None` elsewhere; uniformly `Some(false)` when an
    /// endpoint does not exist.
    pub fn has_edge(&self, u: &DynValue, v: &DynValue, mode: ViewMode) -> Option<bool> {
        let st = self.read();
        let (Some(gu), Some(gv)) = (st.vmap.gid(u), st.vmap.gid(v)) else {
            return Some(false);
        };
        if !st.alive(gu) || !st.alive(gv) {
            return Some(false);
        }
        if !st.directed {
            if gid_fid(gu) == self.fid {
                return Some(st.adj_out.get(&gu).is_some_and(|n| n.contains_key(&gv)));
            }
            if gid_fid(gv) == self.fid {
                return Some(st.adj_out.get(&gv).is_some_and(|n| n.contains_key(&gu)));
            }
            return None;
        }
        let fwd = |st: &DynState| st.adj_out.get(&gu).is_some_and(|n| n.contains_key(&gv));
        let fwd_at_dst = |st: &DynState| st.adj_in.get(&gv).is_some_and(|n| n.contains_key(&gu));
        let rev = |st: &DynState| st.adj_out.get(&gv).is_some_and(|n| n.contains_key(&gu));
        let rev_at_dst = |st: &DynState| st.adj_in.get(&gu).is_some_and(|n| n.contains_key(&gv));
        match mode {
            ViewMode::AsIs => {
                if gid_fid(gu) == self.fid {
                    Some(fwd(&st))
                } else if gid_fid(gv) == self.fid {
                    Some(fwd_at_dst(&st))
                } else {
                    None
                }
            }
            ViewMode::Reversed => {
                if gid_fid(gv) == self.fid {
                    Some(rev(&st))
                } else if gid_fid(gu) == self.fid {
                    Some(rev_at_dst(&st))
                } else {
                    None
                }
            }
            ViewMode::Both => {
                if gid_fid(gu) == self.fid {
                    Some(fwd(&st) || rev_at_dst(&st))
                } else if gid_fid(gv) == self.fid {
                    Some(fwd_at_dst(&st) || rev(&st))
                } else {
                    None
                }
            }
        }
    }

    /// Attributes of a vertex. `Some` on the owner, `None` elsewhere.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] (uniform across ranks) when the vertex
    /// does not exist.
    pub fn node_data(&self, oid: &DynValue) -> Result<Option<AttrMap>, EngineError> {
        let st = self.read();
        let gid = st
            .vmap
            .gid(oid)
            .filter(|g| st.alive(*g))
            .ok_or_else(|| EngineError::NotFound(format!("node {oid}")))?;
        if gid_fid(gid) != self.fid {
            return Ok(None);
        }
        Ok(Some(st.vertex_data.get(&gid).cloned().unwrap_or_default()))
    }

    /// Attributes of an edge under `mode`: `Some(Map)` when the owner
    /// finds it, `Some(Null)` when the owner knows it is absent or an
    /// endpoint does not exist, `None` on non-owning ranks.
    pub fn edge_data(&self, u: &DynValue, v: &DynValue, mode: ViewMode) -> Option<DynValue> {
        let st = self.read();
        let (Some(gu), Some(gv)) = (st.vmap.gid(u), st.vmap.gid(v)) else {
            return Some(DynValue::Null);
        };
        if !st.alive(gu) || !st.alive(gv) {
            return Some(DynValue::Null);
        }
        let fetch = |map: &AdjMap, a: Gid, b: Gid| {
            map.get(&a).and_then(|n| n.get(&b)).cloned()
        };
        let found = if st.directed {
            match mode {
                ViewMode::AsIs => {
                    if gid_fid(gu) == self.fid {
                        Some(fetch(&st.adj_out, gu, gv))
                    } else if gid_fid(gv) == self.fid {
                        Some(fetch(&st.adj_in, gv, gu))
                    } else {
                        None
                    }
                }
                ViewMode::Reversed => {
                    if gid_fid(gv) == self.fid {
                        Some(fetch(&st.adj_out, gv, gu))
                    } else if gid_fid(gu) == self.fid {
                        Some(fetch(&st.adj_in, gu, gv))
                    } else {
                        None
                    }
                }
                ViewMode::Both => {
                    if gid_fid(gu) == self.fid {
                        Some(
                            fetch(&st.adj_out, gu, gv)
                                .or_else(|| fetch(&st.adj_in, gu, gv)),
                        )
                    } else if gid_fid(gv) == self.fid {
                        Some(
                            fetch(&st.adj_in, gv, gu)
                                .or_else(|| fetch(&st.adj_out, gv, gu)),
                        )
                    } else {
                        None
                    }
                }
            }
        } else if gid_fid(gu) == self.fid {
            Some(fetch(&st.adj_out, gu, gv))
        } else if gid_fid(gv) == self.fid {
            Some(fetch(&st.adj_out, gv, gu))
        } else {
            None
        };
        found.map(|data| data.map_or(DynValue::Null, DynValue::Map))
    }

    /// Degree of a vertex under `mode`. `Some` on the owner, `None`
    /// elsewhere. Self-loops count once.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] (uniform) when the vertex does not
    /// exist.
    pub fn degree(
        &self,
        oid: &DynValue,
        kind: DegreeKind,
        mode: ViewMode,
    ) -> Result<Option<usize>, EngineError> {
        let st = self.read();
        let gid = st
            .vmap
            .gid(oid)
            .filter(|g| st.alive(*g))
            .ok_or_else(|| EngineError::NotFound(format!("node {oid}")))?;
        if gid_fid(gid) != self.fid {
            return Ok(None);
        }
        let alive_keys = |map: &AdjMap| -> Vec<Gid> {
            map.get(&gid)
                .map(|n| n.keys().copied().filter(|&v| st.alive(v)).collect())
                .unwrap_or_default()
        };
        if !st.directed {
            return Ok(Some(alive_keys(&st.adj_out).len()));
        }
        let outs = alive_keys(&st.adj_out);
        let ins = alive_keys(&st.adj_in);
        let union = || {
            let mut set: BTreeMap<Gid, ()> = BTreeMap::new();
            for v in outs.iter().chain(ins.iter()) {
                set.insert(*v, ());
            }
            set.len()
        };
        let n = match (mode, kind) {
            (ViewMode::Both, _) | (_, DegreeKind::Total) => union(),
            (ViewMode::AsIs, DegreeKind::Out) | (ViewMode::Reversed, DegreeKind::In) => {
                outs.len()
            }
            (ViewMode::AsIs, DegreeKind::In) | (ViewMode::Reversed, DegreeKind::Out) => {
                ins.len()
            }
        };
        Ok(Some(n))
    }

    /// Neighbor oids of a vertex under `mode`, gid order. `Some` on the
    /// owner, `None` elsewhere.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] (uniform) when the vertex does not
    /// exist.
    pub fn adjacent(
        &self,
        oid: &DynValue,
        dir: AdjacencyDir,
        mode: ViewMode,
    ) -> Result<Option<Vec<DynValue>>, EngineError> {
        let st = self.read();
        let gid = st
            .vmap
            .gid(oid)
            .filter(|g| st.alive(*g))
            .ok_or_else(|| EngineError::NotFound(format!("node {oid}")))?;
        if gid_fid(gid) != self.fid {
            return Ok(None);
        }
        let from = |map: &AdjMap| -> Vec<Gid> {
            map.get(&gid)
                .map(|n| n.keys().copied().filter(|&v| st.alive(v)).collect())
                .unwrap_or_default()
        };
        let gids: Vec<Gid> = if !st.directed {
            from(&st.adj_out)
        } else {
            let use_out = matches!(
                (mode, dir),
                (ViewMode::AsIs, AdjacencyDir::Successors)
                    | (ViewMode::Reversed, AdjacencyDir::Predecessors)
            );
            match mode {
                ViewMode::Both => {
                    let mut set: BTreeMap<Gid, ()> = BTreeMap::new();
                    for v in from(&st.adj_out).into_iter().chain(from(&st.adj_in)) {
                        set.insert(v, ());
                    }
                    set.keys().copied().collect()
                }
                _ if use_out => from(&st.adj_out),
                _ => from(&st.adj_in),
            }
        };
        Ok(Some(
            gids.iter()
                .filter_map(|&v| st.vmap.oid(v).cloned())
                .collect(),
        ))
    }

    /// Deep copy. Vertex-map fragments clone on worker threads.
    pub fn copy_from(source: &Self) -> Self {
        let st = source.read();
        Self {
            fid: source.fid,
            fnum: source.fnum,
            state: RwLock::new(DynState {
                directed: st.directed,
                vmap: st.vmap.copy_parallel(),
                dead: st.dead.clone(),
                vertex_data: st.vertex_data.clone(),
                adj_out: st.adj_out.clone(),
                adj_in: st.adj_in.clone(),
            }),
        }
    }

    /// Reversed copy: every edge flips direction, attributes intact.
    ///
    /// # Errors
    /// [`EngineError::InvalidOperation`] for undirected sources.
    pub fn reversed_from(source: &Self) -> Result<Self, EngineError> {
        let st = source.read();
        if !st.directed {
            return Err(EngineError::InvalidOperation(
                "cannot reverse an undirected graph".into(),
            ));
        }
        Ok(Self {
            fid: source.fid,
            fnum: source.fnum,
            state: RwLock::new(DynState {
                directed: true,
                vmap: st.vmap.copy_parallel(),
                dead: st.dead.clone(),
                vertex_data: st.vertex_data.clone(),
                adj_out: st.adj_in.clone(),
                adj_in: st.adj_out.clone(),
            }),
        })
    }

    /// Directed copy: each undirected edge becomes a pair of opposed
    /// directed edges sharing its attributes.
    pub fn to_directed_from(source: &Self) -> Self {
        let st = source.read();
        if st.directed {
            drop(st);
            return Self::copy_from(source);
        }
        Self {
            fid: source.fid,
            fnum: source.fnum,
            state: RwLock::new(DynState {
                directed: true,
                vmap: st.vmap.copy_parallel(),
                dead: st.dead.clone(),
                vertex_data: st.vertex_data.clone(),
                // Symmetric adjacency serves as both directions.
                adj_out: st.adj_out.clone(),
                adj_in: st.adj_out.clone(),
            }),
        }
    }

    /// Undirected copy: opposed directed edges collapse into one edge;
    /// where both orientations define an attribute, the orientation with
    /// the smaller source gid wins the merge base.
    pub fn to_undirected_from(source: &Self) -> Self {
        let st = source.read();
        if !st.directed {
            drop(st);
            return Self::copy_from(source);
        }
        let mut keyed: Vec<Gid> = st
            .adj_out
            .keys()
            .chain(st.adj_in.keys())
            .copied()
            .filter(|&u| gid_fid(u) == source.fid)
            .collect();
        keyed.sort_unstable();
        keyed.dedup();
        let mut adj: AdjMap = FxHashMap::default();
        for u in keyed {
            let outs = st.adj_out.get(&u);
            let ins = st.adj_in.get(&u);
            let mut partners: Vec<Gid> = Vec::new();
            if let Some(outs) = outs {
                partners.extend(outs.keys().copied());
            }
            if let Some(ins) = ins {
                partners.extend(ins.keys().copied());
            }
            partners.sort_unstable();
            partners.dedup();
            let entry = adj.entry(u).or_default();
            for v in partners {
                let fwd = outs.and_then(|n| n.get(&v));
                let rev = ins.and_then(|n| n.get(&v));
                let (base, overlay) = if u <= v { (fwd, rev) } else { (rev, fwd) };
                let mut data = base.cloned().unwrap_or_default();
                if let Some(overlay) = overlay {
                    merge_into(&mut data, overlay);
                }
                entry.insert(v, data);
            }
        }
        Self {
            fid: source.fid,
            fnum: source.fnum,
            state: RwLock::new(DynState {
                directed: false,
                vmap: st.vmap.copy_parallel(),
                dead: st.dead.clone(),
                vertex_data: st.vertex_data.clone(),
                adj_out: adj,
                adj_in: FxHashMap::default(),
            }),
        }
    }
}

fn ensure_vertex(
    st: &mut DynState,
    self_fid: u32,
    fnum: u32,
    oid: &DynValue,
) -> Result<Gid, EngineError> {
    if let Some(gid) = st.vmap.gid(oid) {
        if !st.alive(gid) {
            // Revival gets a fresh vertex: the edges hidden by the
            // tombstone must not come back with it.
            scrub_vertex(st, gid);
            st.dead.remove(&gid);
            if gid_fid(gid) == self_fid {
                st.vertex_data.insert(gid, AttrMap::new());
            }
        }
        return Ok(gid);
    }
    let owner = oid.partition(fnum);
    st.vmap.add_vertex(owner, oid.clone())
}

/// Drop every adjacency entry involving `gid` held at this rank, both
/// its own rows and its appearances in other vertices' neighbor maps.
fn scrub_vertex(st: &mut DynState, gid: Gid) {
    st.adj_out.remove(&gid);
    st.adj_in.remove(&gid);
    for nbrs in st.adj_out.values_mut() {
        nbrs.remove(&gid);
    }
    for nbrs in st.adj_in.values_mut() {
        nbrs.remove(&gid);
    }
}

fn record_edge(st: &mut DynState, fid: u32, gu: Gid, gv: Gid, data: &AttrMap) {
    if st.directed {
        if gid_fid(gu) == fid {
            merge_into(st.adj_out.entry(gu).or_default().entry(gv).or_default(), data);
        }
        if gid_fid(gv) == fid {
            merge_into(st.adj_in.entry(gv).or_default().entry(gu).or_default(), data);
        }
    } else {
        if gid_fid(gu) == fid {
            merge_into(st.adj_out.entry(gu).or_default().entry(gv).or_default(), data);
        }
        if gid_fid(gv) == fid && gu != gv {
            merge_into(st.adj_out.entry(gv).or_default().entry(gu).or_default(), data);
        }
    }
}

fn erase_edge(st: &mut DynState, fid: u32, gu: Gid, gv: Gid) {
    if st.directed {
        if gid_fid(gu) == fid {
            if let Some(nbrs) = st.adj_out.get_mut(&gu) {
                nbrs.remove(&gv);
            }
        }
        if gid_fid(gv) == fid {
            if let Some(srcs) = st.adj_in.get_mut(&gv) {
                srcs.remove(&gu);
            }
        }
    } else {
        if gid_fid(gu) == fid {
            if let Some(nbrs) = st.adj_out.get_mut(&gu) {
                nbrs.remove(&gv);
            }
        }
        if gid_fid(gv) == fid {
            if let Some(nbrs) = st.adj_out.get_mut(&gv) {
                nbrs.remove(&gu);
            }
        }
    }
}

fn update_edge(st: &mut DynState, fid: u32, gu: Gid, gv: Gid, data: &AttrMap) {
    let apply = |map: &mut AdjMap, a: Gid, b: Gid, data: &AttrMap| -> bool {
        map.get_mut(&a)
            .and_then(|n| n.get_mut(&b))
            .map(|existing| merge_into(existing, data))
            .is_some()
    };
    if st.directed {
        if gid_fid(gu) == fid {
            apply(&mut st.adj_out, gu, gv, data);
        }
        if gid_fid(gv) == fid {
            apply(&mut st.adj_in, gv, gu, data);
        }
    } else {
        if gid_fid(gu) == fid {
            apply(&mut st.adj_out, gu, gv, data);
        }
        if gid_fid(gv) == fid && gu != gv {
            apply(&mut st.adj_out, gv, gu, data);
        }
    }
}

/// Typed single-property view over a dynamic fragment.
///
/// Carries the projected property names with their consolidated types;
/// values coerce lazily when marshalled, widening ints into float slots
/// and defaulting missing attributes.
#[derive(Debug, Clone)]
pub struct DynamicProjectedFragment {
    base: Arc<DynamicFragment>,
    v_prop: Option<(String, DataType)>,
    e_prop: Option<(String, DataType)>,
}

impl DynamicProjectedFragment {
    /// Wrap `base` with resolved projection properties.
    pub fn new(
        base: Arc<DynamicFragment>,
        v_prop: Option<(String, DataType)>,
        e_prop: Option<(String, DataType)>,
    ) -> Self {
        Self {
            base,
            v_prop,
            e_prop,
        }
    }

    /// The underlying fragment.
    pub fn base(&self) -> &Arc<DynamicFragment> {
        &self.base
    }

    /// Projected vertex property name and type.
    pub fn v_prop(&self) -> Option<(&str, DataType)> {
        self.v_prop.as_ref().map(|(n, t)| (n.as_str(), *t))
    }

    /// Projected edge property name and type.
    pub fn e_prop(&self) -> Option<(&str, DataType)> {
        self.e_prop.as_ref().map(|(n, t)| (n.as_str(), *t))
    }

    /// This rank's alive vertex ids, offset order.
    pub fn vertex_ids(&self) -> Vec<DynValue> {
        self.base
            .owned_vertices()
            .into_iter()
            .map(|(_, oid)| oid)
            .collect()
    }

    /// This rank's projected vertex data, aligned with
    /// [`Self::vertex_ids`].
    ///
    /// # Errors
    /// [`EngineError::InvalidOperation`] when no vertex property was
    /// projected, [`EngineError::DataType`] when a value does not fit
    /// the consolidated type.
    pub fn vertex_data(&self) -> Result<Vec<DynValue>, EngineError> {
        let Some((name, dtype)) = self.v_prop() else {
            return Err(EngineError::InvalidOperation(
                "graph was projected without vertex data".into(),
            ));
        };
        self.base
            .owned_vertices()
            .into_iter()
            .map(|(gid, _)| {
                let attrs = self.base.node_attrs(gid).unwrap_or_default();
                coerce_attr(attrs.get(name), name, dtype)
            })
            .collect()
    }
}

/// Coerce one attribute value into the consolidated column type.
///
/// Missing values take the type default; ints widen into float slots.
///
/// # Errors
/// [`EngineError::DataType`] when the value does not fit.
#[allow(clippy::cast_precision_loss)]
pub fn coerce_attr(
    value: Option<&DynValue>,
    name: &str,
    dtype: DataType,
) -> Result<DynValue, EngineError> {
    let Some(value) = value else {
        return Ok(match dtype {
            DataType::Int64 => DynValue::Int(0),
            DataType::Float64 => DynValue::Float(0.0),
            DataType::Utf8 | DataType::LargeUtf8 => DynValue::Str(String::new()),
            DataType::Bool => DynValue::Bool(false),
            other => {
                return Err(EngineError::DataType(format!(
                    "property {name} cannot default to {}",
                    other.name()
                )))
            }
        });
    };
    match (dtype, value) {
        (DataType::Int64, DynValue::Int(_))
        | (DataType::Float64, DynValue::Float(_))
        | (DataType::Utf8 | DataType::LargeUtf8, DynValue::Str(_))
        | (DataType::Bool, DynValue::Bool(_)) => Ok(value.clone()),
        (DataType::Float64, DynValue::Int(i)) => Ok(DynValue::Float(*i as f64)),
        (dtype, other) => Err(EngineError::DataType(format!(
            "property {name} expects {}, found {other}",
            dtype.name()
        ))),
    }
}
