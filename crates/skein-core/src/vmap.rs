// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Vertex maps: the oid ⇄ gid identity layer.
//!
//! A global id (gid) packs (fragment id, label id, offset) into a `u64`.
//! Vertex maps are replicated: every rank can resolve every vertex, which
//! is what lets conversion and induction preserve identity and
//! partitioning without moving data.
//!
//! The columnar map is frozen at load. The dynamic map accumulates, then
//! [`DynamicVertexMap::construct`] makes every rank's copy identical: each
//! rank's contribution for *its own* fragment id is authoritative, the
//! contributions are all-gathered and merged in fragment-id order, and the
//! merged map is frozen and digest-checked across ranks.

// Gid components are masked to their bit widths before narrowing.
#![allow(clippy::cast_possible_truncation)]

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use skein_comm::Collective;

use crate::column::{Column, DataType};
use crate::error::EngineError;
use crate::value::DynValue;

/// Global vertex id: `[fid:12][label:8][offset:44]`.
pub type Gid = u64;

const FID_BITS: u32 = 12;
const LABEL_BITS: u32 = 8;
const OFFSET_BITS: u32 = 44;

/// Pack (fragment, label, offset) into a [`Gid`].
///
/// # Errors
/// [`EngineError::InvalidValue`] when a component exceeds its bit width.
pub fn pack_gid(fid: u32, label: u32, offset: u64) -> Result<Gid, EngineError> {
    if u64::from(fid) >= (1 << FID_BITS) {
        return Err(EngineError::InvalidValue(format!(
            "fragment id {fid} out of gid range"
        )));
    }
    if u64::from(label) >= (1 << LABEL_BITS) {
        return Err(EngineError::InvalidValue(format!(
            "label id {label} out of gid range"
        )));
    }
    if offset >= (1 << OFFSET_BITS) {
        return Err(EngineError::InvalidValue(format!(
            "vertex offset {offset} out of gid range"
        )));
    }
    Ok((u64::from(fid) << (LABEL_BITS + OFFSET_BITS)) | (u64::from(label) << OFFSET_BITS) | offset)
}

/// Fragment id component of a gid.
pub fn gid_fid(gid: Gid) -> u32 {
    (gid >> (LABEL_BITS + OFFSET_BITS)) as u32
}

/// Label id component of a gid.
pub fn gid_label(gid: Gid) -> u32 {
    ((gid >> OFFSET_BITS) & ((1 << LABEL_BITS) - 1)) as u32
}

/// Offset component of a gid.
pub fn gid_offset(gid: Gid) -> u64 {
    gid & ((1 << OFFSET_BITS) - 1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ColumnarVertexMapData {
    fnum: u32,
    /// `[fid][label_id]` oid columns, rows in offset order.
    oid_arrays: Vec<Vec<Column>>,
}

/// Replicated vertex map of a columnar graph.
///
/// Oids are unique per label across the whole graph; identity of a map is
/// compared through store member ids, not through contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ColumnarVertexMapData", into = "ColumnarVertexMapData")]
pub struct ColumnarVertexMap {
    fnum: u32,
    oid_arrays: Vec<Vec<Column>>,
    #[serde(skip)]
    index: FxHashMap<(u32, DynValue), Gid>,
}

impl From<ColumnarVertexMapData> for ColumnarVertexMap {
    fn from(data: ColumnarVertexMapData) -> Self {
        let mut map = Self {
            fnum: data.fnum,
            oid_arrays: data.oid_arrays,
            index: FxHashMap::default(),
        };
        map.rebuild_index();
        map
    }
}

impl From<ColumnarVertexMap> for ColumnarVertexMapData {
    fn from(map: ColumnarVertexMap) -> Self {
        Self {
            fnum: map.fnum,
            oid_arrays: map.oid_arrays,
        }
    }
}

impl ColumnarVertexMap {
    /// Build from per-fragment, per-label oid columns.
    ///
    /// `oid_arrays[fid][label_id]` lists fragment `fid`'s vertices of that
    /// label in offset order.
    ///
    /// # Errors
    /// [`EngineError::DataType`] on duplicate oids within one label or on
    /// oid column types diverging across fragments;
    /// [`EngineError::InvalidValue`] when the shape is ragged or a gid
    /// component overflows.
    pub fn build(fnum: u32, oid_arrays: Vec<Vec<Column>>) -> Result<Self, EngineError> {
        if oid_arrays.len() != fnum as usize {
            return Err(EngineError::InvalidValue(format!(
                "vertex map expects {fnum} fragments, got {}",
                oid_arrays.len()
            )));
        }
        let labels = oid_arrays.first().map_or(0, Vec::len);
        for (fid, per_label) in oid_arrays.iter().enumerate() {
            if per_label.len() != labels {
                return Err(EngineError::InvalidValue(format!(
                    "fragment {fid} carries {} labels, expected {labels}",
                    per_label.len()
                )));
            }
        }
        for label in 0..labels {
            let dtype = oid_arrays[0][label].data_type();
            for per_label in &oid_arrays {
                if per_label[label].data_type() != dtype {
                    return Err(EngineError::DataType(format!(
                        "oid column type diverges across fragments for label {label}: {} vs {}",
                        dtype.name(),
                        per_label[label].data_type().name()
                    )));
                }
            }
        }
        let mut map = Self {
            fnum,
            oid_arrays,
            index: FxHashMap::default(),
        };
        map.check_and_index()?;
        Ok(map)
    }

    fn check_and_index(&mut self) -> Result<(), EngineError> {
        self.index.clear();
        for fid in 0..self.fnum {
            for (label, col) in self.oid_arrays[fid as usize].iter().enumerate() {
                for offset in 0..col.len() {
                    let oid = match col.value(offset) {
                        Some(v) => v,
                        None => continue,
                    };
                    let gid = pack_gid(fid, label as u32, offset as u64)?;
                    if self.index.insert((label as u32, oid.clone()), gid).is_some() {
                        return Err(EngineError::DataType(format!(
                            "duplicated oid: {oid}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn rebuild_index(&mut self) {
        // Deserialized payloads were validated when first built.
        let _ = self.check_and_index();
    }

    /// Fragment count.
    pub fn fnum(&self) -> u32 {
        self.fnum
    }

    /// Label count.
    pub fn labels(&self) -> usize {
        self.oid_arrays.first().map_or(0, Vec::len)
    }

    /// Vertices of `label_id` owned by `fid`.
    pub fn vertex_count(&self, fid: u32, label_id: usize) -> usize {
        self.oid_arrays
            .get(fid as usize)
            .and_then(|per_label| per_label.get(label_id))
            .map_or(0, Column::len)
    }

    /// Vertices of `label_id` across all fragments.
    pub fn total_vertices(&self, label_id: usize) -> usize {
        (0..self.fnum)
            .map(|fid| self.vertex_count(fid, label_id))
            .sum()
    }

    /// Oid column of `(fid, label_id)`, rows in offset order.
    pub fn oid_column(&self, fid: u32, label_id: usize) -> Option<&Column> {
        self.oid_arrays
            .get(fid as usize)
            .and_then(|per_label| per_label.get(label_id))
    }

    /// Oid element type of `label_id`.
    pub fn oid_type(&self, label_id: usize) -> Option<DataType> {
        self.oid_arrays
            .first()
            .and_then(|per_label| per_label.get(label_id))
            .map(Column::data_type)
    }

    /// Resolve a gid back to its oid.
    pub fn oid(&self, gid: Gid) -> Option<DynValue> {
        self.oid_column(gid_fid(gid), gid_label(gid) as usize)
            .and_then(|col| col.value(gid_offset(gid) as usize))
    }

    /// Resolve `(label_id, oid)` to a gid.
    pub fn gid(&self, label_id: u32, oid: &DynValue) -> Option<Gid> {
        self.index.get(&(label_id, oid.clone())).copied()
    }
}

/// Accumulating vertex map of a dynamic graph (single implicit label 0).
#[derive(Debug, Clone, Default)]
pub struct DynamicVertexMap {
    fnum: u32,
    oids: Vec<Vec<DynValue>>,
    index: FxHashMap<DynValue, Gid>,
    frozen: bool,
}

impl DynamicVertexMap {
    /// Empty map over `fnum` fragments.
    pub fn new(fnum: u32) -> Self {
        Self {
            fnum,
            oids: vec![Vec::new(); fnum as usize],
            index: FxHashMap::default(),
            frozen: false,
        }
    }

    /// Fragment count.
    pub fn fnum(&self) -> u32 {
        self.fnum
    }

    /// True once [`DynamicVertexMap::construct`] has run.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Register `oid` under fragment `fid`; returns its gid.
    ///
    /// Stays legal after [`DynamicVertexMap::construct`]: a constructed
    /// graph keeps accepting mutations, and identical batches on every
    /// rank keep the replicas identical.
    ///
    /// # Errors
    /// [`EngineError::DataType`] on duplicate oids,
    /// [`EngineError::InvalidValue`] on gid overflow.
    pub fn add_vertex(&mut self, fid: u32, oid: DynValue) -> Result<Gid, EngineError> {
        if fid >= self.fnum {
            return Err(EngineError::InvalidValue(format!(
                "fragment id {fid} out of range for {} fragments",
                self.fnum
            )));
        }
        let offset = self.oids[fid as usize].len() as u64;
        let gid = pack_gid(fid, 0, offset)?;
        if self.index.contains_key(&oid) {
            return Err(EngineError::DataType(format!("duplicated oid: {oid}")));
        }
        self.index.insert(oid.clone(), gid);
        self.oids[fid as usize].push(oid);
        Ok(gid)
    }

    /// Existing gid of `oid`.
    pub fn gid(&self, oid: &DynValue) -> Option<Gid> {
        self.index.get(oid).copied()
    }

    /// Oid behind `gid`.
    pub fn oid(&self, gid: Gid) -> Option<&DynValue> {
        self.oids
            .get(gid_fid(gid) as usize)
            .and_then(|list| list.get(gid_offset(gid) as usize))
    }

    /// Vertex count of one fragment.
    pub fn vertex_count(&self, fid: u32) -> usize {
        self.oids.get(fid as usize).map_or(0, Vec::len)
    }

    /// Vertex count across all fragments.
    pub fn total_vertices(&self) -> usize {
        self.oids.iter().map(Vec::len).sum()
    }

    /// Oids of one fragment in offset order.
    pub fn fragment_oids(&self, fid: u32) -> &[DynValue] {
        self.oids
            .get(fid as usize)
            .map_or(&[], Vec::as_slice)
    }

    fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.fnum.to_le_bytes());
        for list in &self.oids {
            hasher.update(&(list.len() as u64).to_le_bytes());
            for oid in list {
                oid.feed(&mut hasher);
            }
        }
        *hasher.finalize().as_bytes()
    }

    /// Merge every rank's contribution and freeze.
    ///
    /// Rank r's locally-added oids for fragment r are authoritative; other
    /// ranks' entries for that fragment are discarded and replaced by the
    /// owner's, gathered collectively and merged in fragment-id order. A
    /// cross-rank digest check runs afterwards; divergence fails the
    /// command but leaves the engine serviceable.
    ///
    /// # Errors
    /// [`EngineError::IllegalState`] on double construct, group shape
    /// mismatch, undecodable contributions, or digest divergence;
    /// [`EngineError::DataType`] on duplicate oids after the merge.
    pub fn construct(&mut self, comm: &dyn Collective) -> Result<(), EngineError> {
        if self.frozen {
            return Err(EngineError::IllegalState(
                "vertex map is frozen; construct already ran".into(),
            ));
        }
        let spec = comm.spec();
        if spec.peers != self.fnum {
            return Err(EngineError::IllegalState(format!(
                "vertex map spans {} fragments but the group has {} ranks",
                self.fnum, spec.peers
            )));
        }

        let mut own = Vec::new();
        ciborium::into_writer(&self.oids[spec.rank as usize], &mut own)
            .map_err(|e| EngineError::IllegalState(format!("vertex map encode failed: {e}")))?;
        let contributions = comm.all_gather(own)?;
        if contributions.len() != self.fnum as usize {
            return Err(EngineError::IllegalState(format!(
                "vertex map construct gathered {} contributions for {} fragments",
                contributions.len(),
                self.fnum
            )));
        }

        self.oids = vec![Vec::new(); self.fnum as usize];
        self.index.clear();
        for (fid, bytes) in contributions.iter().enumerate() {
            let oids: Vec<DynValue> = ciborium::from_reader(bytes.as_slice()).map_err(|e| {
                EngineError::IllegalState(format!(
                    "vertex map contribution from rank {fid} undecodable: {e}"
                ))
            })?;
            for oid in oids {
                self.add_vertex(fid as u32, oid)?;
            }
        }
        self.frozen = true;

        let digests = comm.all_gather(self.digest().to_vec())?;
        if digests.iter().any(|d| d.as_slice() != digests[0].as_slice()) {
            return Err(EngineError::IllegalState(
                "vertex map diverged across ranks after construct".into(),
            ));
        }
        Ok(())
    }

    /// Deep copy with per-fragment worker threads.
    ///
    /// Fragments clone in parallel and join before the copy is indexed;
    /// the copy keeps the frozen flag.
    pub fn copy_parallel(&self) -> Self {
        let cloned: Vec<Vec<DynValue>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .oids
                .iter()
                .map(|list| scope.spawn(|| list.clone()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_default())
                .collect()
        });
        let mut copy = Self {
            fnum: self.fnum,
            oids: cloned,
            index: FxHashMap::default(),
            frozen: self.frozen,
        };
        for fid in 0..copy.fnum {
            for (offset, oid) in copy.oids[fid as usize].iter().enumerate() {
                if let Ok(gid) = pack_gid(fid, 0, offset as u64) {
                    copy.index.insert(oid.clone(), gid);
                }
            }
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use skein_comm::LocalGroup;
    use std::thread;

    #[test]
    fn gid_components_round_trip() {
        let gid = pack_gid(3, 1, 41).unwrap();
        assert_eq!(gid_fid(gid), 3);
        assert_eq!(gid_label(gid), 1);
        assert_eq!(gid_offset(gid), 41);
    }

    #[test]
    fn gid_packing_rejects_overflow() {
        assert!(matches!(
            pack_gid(1 << 12, 0, 0),
            Err(EngineError::InvalidValue(_))
        ));
        assert!(matches!(
            pack_gid(0, 1 << 8, 0),
            Err(EngineError::InvalidValue(_))
        ));
        assert!(matches!(
            pack_gid(0, 0, 1 << 44),
            Err(EngineError::InvalidValue(_))
        ));
    }

    #[test]
    fn columnar_map_resolves_both_directions() {
        let map = ColumnarVertexMap::build(
            2,
            vec![
                vec![Column::Int64(vec![10, 30])],
                vec![Column::Int64(vec![20])],
            ],
        )
        .unwrap();
        assert_eq!(map.total_vertices(0), 3);
        assert_eq!(map.vertex_count(0, 0), 2);

        let gid = map.gid(0, &DynValue::Int(20)).unwrap();
        assert_eq!(gid_fid(gid), 1);
        assert_eq!(gid_offset(gid), 0);
        assert_eq!(map.oid(gid), Some(DynValue::Int(20)));
        assert_eq!(map.gid(0, &DynValue::Int(99)), None);
    }

    #[test]
    fn columnar_map_rejects_duplicate_oids_within_a_label() {
        let err = ColumnarVertexMap::build(
            2,
            vec![
                vec![Column::Int64(vec![10])],
                vec![Column::Int64(vec![10])],
            ],
        )
        .unwrap_err();
        assert_eq!(err, EngineError::DataType("duplicated oid: 10".into()));
    }

    #[test]
    fn columnar_map_survives_serde() {
        let map = ColumnarVertexMap::build(
            1,
            vec![vec![Column::Utf8(vec!["a".into(), "b".into()])]],
        )
        .unwrap();
        let mut bytes = Vec::new();
        ciborium::into_writer(&map, &mut bytes).unwrap();
        let decoded: ColumnarVertexMap = ciborium::from_reader(bytes.as_slice()).unwrap();
        // The index is rebuilt, not serialized.
        assert_eq!(
            decoded.gid(0, &DynValue::from("b")),
            map.gid(0, &DynValue::from("b"))
        );
    }

    #[test]
    fn dynamic_map_rejects_duplicate_oids_across_fragments() {
        let mut map = DynamicVertexMap::new(2);
        map.add_vertex(0, DynValue::from("a")).unwrap();
        let err = map.add_vertex(1, DynValue::from("a")).unwrap_err();
        assert_eq!(err, EngineError::DataType("duplicated oid: a".into()));
    }

    #[test]
    fn construct_makes_owner_contributions_authoritative() {
        let handles = LocalGroup::new(2).unwrap();
        let maps: Vec<DynamicVertexMap> = thread::scope(|scope| {
            let joins: Vec<_> = handles
                .into_iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let rank = comm.spec().rank;
                        let mut map = DynamicVertexMap::new(2);
                        // Each rank only knows its own fragment's vertices.
                        if rank == 0 {
                            map.add_vertex(0, DynValue::from("a")).unwrap();
                            map.add_vertex(0, DynValue::from("c")).unwrap();
                        } else {
                            map.add_vertex(1, DynValue::from("b")).unwrap();
                        }
                        map.construct(&comm).unwrap();
                        map
                    })
                })
                .collect();
            joins.into_iter().map(|j| j.join().unwrap()).collect()
        });

        for map in &maps {
            assert!(map.is_frozen());
            assert_eq!(map.total_vertices(), 3);
            assert_eq!(map.fragment_oids(0), &[DynValue::from("a"), DynValue::from("c")]);
            assert_eq!(map.fragment_oids(1), &[DynValue::from("b")]);
            let gid = map.gid(&DynValue::from("b")).unwrap();
            assert_eq!(gid_fid(gid), 1);
        }
        // Both ranks resolved identical gids.
        assert_eq!(
            maps[0].gid(&DynValue::from("c")),
            maps[1].gid(&DynValue::from("c"))
        );
    }

    #[test]
    fn construct_runs_once_but_additions_stay_legal() {
        let handles = LocalGroup::new(1).unwrap();
        let comm = &handles[0];
        let mut map = DynamicVertexMap::new(1);
        map.add_vertex(0, DynValue::Int(5)).unwrap();
        map.construct(comm).unwrap();
        assert!(matches!(
            map.construct(comm),
            Err(EngineError::IllegalState(_))
        ));
        // A constructed graph keeps accepting vertices.
        map.add_vertex(0, DynValue::Int(6)).unwrap();
        assert_eq!(map.total_vertices(), 2);
    }

    #[test]
    fn parallel_copy_preserves_contents_and_freeze_state() {
        let mut map = DynamicVertexMap::new(2);
        map.add_vertex(0, DynValue::from("a")).unwrap();
        map.add_vertex(1, DynValue::from("b")).unwrap();
        let copy = map.copy_parallel();
        assert_eq!(copy.total_vertices(), 2);
        assert_eq!(copy.gid(&DynValue::from("b")), map.gid(&DynValue::from("b")));
        assert!(!copy.is_frozen());
    }
}
