// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Conversion between the columnar and dynamic fragment forms.
//!
//! Both directions rebuild the destination rank-locally: ownership
//! carries over, no vertex or edge row moves to another rank, and the
//! only collectives are the dynamic vertex-map construct on the way out
//! of columnar and the schema and oid exchanges on the way back.
//! Tombstoned vertices and their edges do not survive a rebuild.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use skein_comm::Collective;
use skein_store::ObjectStore;

use crate::backend::{class_type, merge_codes, scan_value, SCAN_CONFLICT, SCAN_NON_SCALAR};
use crate::column::{Column, DataType};
use crate::columnar::{ColumnarFragment, EdgeRows, EdgeStore, StoreHandles};
use crate::dynamic::{coerce_attr, AttrMap, DynamicFragment};
use crate::error::EngineError;
use crate::schema::{LabelSchema, PropertyDef, PropertySchema, DEFAULT_LABEL};
use crate::value::DynValue;
use crate::vmap::{gid_fid, ColumnarVertexMap, DynamicVertexMap, Gid};

/// Rebuild a columnar fragment as a dynamic one.
///
/// Vertex identity flattens into a single id space in label, then
/// fragment, then offset order; per-label property columns become named
/// attributes; adjacency materializes from the local edge stores.
/// Parallel edges have no dynamic form, whatever their labels.
///
/// # Errors
/// [`EngineError::DataType`] on id collisions across labels, duplicated
/// property names, or column types with no dynamic form;
/// [`EngineError::IllegalState`] on parallel edges or vertex-map
/// divergence.
pub fn to_dynamic(
    comm: &dyn Collective,
    frag: &ColumnarFragment,
) -> Result<DynamicFragment, EngineError> {
    let schema = frag.schema();
    for label in schema.vertex_labels.iter().chain(&schema.edge_labels) {
        check_attr_defs(&label.properties)?;
    }

    let vmap = frag.vmap();
    let fid = frag.fid();
    let fnum = frag.fnum();
    let labels = vmap.labels();

    // The columnar map is replicated, so every rank rebuilds the whole
    // dynamic map the same way. Each fragment's id columns convert on
    // their own worker thread, joined before the ordered insertion.
    let converted: Vec<Vec<Vec<DynValue>>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..fnum)
            .map(|f| {
                scope.spawn(move || -> Vec<Vec<DynValue>> {
                    (0..labels)
                        .map(|label_id| {
                            vmap.oid_column(f, label_id).map_or_else(Vec::new, |col| {
                                (0..col.len()).filter_map(|row| col.value(row)).collect()
                            })
                        })
                        .collect()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_default())
            .collect()
    });

    let mut dst_vm = DynamicVertexMap::new(fnum);
    for label_id in 0..labels {
        for f in 0..fnum {
            for oid in &converted[f as usize][label_id] {
                dst_vm.add_vertex(f, oid.clone())?;
            }
        }
    }
    dst_vm.construct(comm)?;

    let mut vertices: Vec<(Gid, AttrMap)> = Vec::new();
    for label_id in 0..labels {
        let props = frag.vertex_properties(label_id);
        for (offset, oid) in converted[fid as usize][label_id].iter().enumerate() {
            let gid = dst_vm.gid(oid).ok_or_else(|| {
                EngineError::IllegalState(format!("vertex {oid} lost in conversion"))
            })?;
            let mut data = AttrMap::new();
            for (name, col) in props {
                if let Some(value) = col.value(offset) {
                    data.insert(name.clone(), value);
                }
            }
            vertices.push((gid, data));
        }
    }

    // Out rows hold an owned source's full adjacency (undirected stores
    // keep one orientation per owner) and incoming rows mirror remote
    // sources, so a repeated pair across any labels is a parallel edge
    // and every rank holding a copy sees it.
    let mut edges: Vec<(Gid, Gid, AttrMap)> = Vec::new();
    let mut seen: FxHashSet<(Gid, Gid)> = FxHashSet::default();
    for store in frag.edge_stores() {
        for rows in [&store.out, &store.incoming] {
            for row in 0..rows.len() {
                let (gu, gv) = (rows.srcs[row], rows.dsts[row]);
                if !seen.insert((gu, gv)) {
                    return Err(EngineError::IllegalState(format!(
                        "duplicated edge: {} -> {}",
                        endpoint_name(vmap, gu),
                        endpoint_name(vmap, gv)
                    )));
                }
                edges.push(translate_edge(vmap, &dst_vm, gu, gv, rows, row)?);
            }
        }
    }

    Ok(DynamicFragment::from_parts(
        fid,
        fnum,
        frag.directed(),
        dst_vm,
        vertices,
        edges,
    ))
}

fn check_attr_defs(defs: &[PropertyDef]) -> Result<(), EngineError> {
    let mut names: FxHashSet<&str> = FxHashSet::default();
    for def in defs {
        if !names.insert(def.name.as_str()) {
            return Err(EngineError::DataType(format!(
                "duplicated property name: {}",
                def.name
            )));
        }
        match def.data_type {
            DataType::Int32
            | DataType::UInt32
            | DataType::Int64
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
            | DataType::Utf8
            | DataType::LargeUtf8 => {}
            other => {
                return Err(EngineError::DataType(format!(
                    "unexpected type {} on property {}",
                    other.name(),
                    def.name
                )))
            }
        }
    }
    Ok(())
}

fn endpoint_name(vmap: &ColumnarVertexMap, gid: Gid) -> String {
    vmap.oid(gid)
        .map_or_else(|| gid.to_string(), |oid| oid.to_string())
}

fn translate_edge(
    src_vm: &ColumnarVertexMap,
    dst_vm: &DynamicVertexMap,
    gu: Gid,
    gv: Gid,
    rows: &EdgeRows,
    row: usize,
) -> Result<(Gid, Gid, AttrMap), EngineError> {
    let mut data = AttrMap::new();
    for (name, col) in &rows.props {
        if let Some(value) = col.value(row) {
            data.insert(name.clone(), value);
        }
    }
    Ok((
        dynamic_gid(src_vm, dst_vm, gu)?,
        dynamic_gid(src_vm, dst_vm, gv)?,
        data,
    ))
}

fn dynamic_gid(
    src_vm: &ColumnarVertexMap,
    dst_vm: &DynamicVertexMap,
    gid: Gid,
) -> Result<Gid, EngineError> {
    src_vm
        .oid(gid)
        .and_then(|oid| dst_vm.gid(&oid))
        .ok_or_else(|| {
            EngineError::IllegalState(format!("edge endpoint {gid} lost in conversion"))
        })
}

/// One rank's type observations, exchanged whole. Fault codes ride
/// along so every rank reaches the gather before anyone fails.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TypeObservations {
    oid: u8,
    vertices: BTreeMap<String, u8>,
    edges: BTreeMap<String, u8>,
}

/// Rebuild a dynamic fragment as a columnar one, persisted through the
/// store.
///
/// All ranks consolidate one schema first: every observed attribute
/// becomes a column under the single `_` label, typed by the same
/// scan-code exchange projections use, ints widening into float slots
/// and missing attributes taking the column default. Vertex ids must
/// agree on one type exactly; widening would change their identity.
/// The new vertex map gathers every rank's alive oids, so tombstones
/// vanish here.
///
/// # Errors
/// [`EngineError::DataType`] on conflicting or non-scalar attribute or
/// id types; store, encode, and collective faults propagate typed.
pub fn to_columnar(
    comm: &dyn Collective,
    store: &dyn ObjectStore,
    frag: &DynamicFragment,
) -> Result<(ColumnarFragment, StoreHandles), EngineError> {
    let fid = frag.fid();
    let fnum = frag.fnum();
    let directed = frag.directed();
    let owned = frag.owned_vertices();

    let mut local = TypeObservations::default();
    for (gid, oid) in &owned {
        local.oid = merge_oid(local.oid, oid_code(oid));
        if let Some(attrs) = frag.node_attrs(*gid) {
            for (name, value) in &attrs {
                let slot = local.vertices.entry(name.clone()).or_default();
                *slot = scan_value(*slot, value);
            }
        }
        for (_, attrs) in frag.out_entries(*gid) {
            for (name, value) in &attrs {
                let slot = local.edges.entry(name.clone()).or_default();
                *slot = scan_value(*slot, value);
            }
        }
    }

    let mut payload = Vec::new();
    ciborium::into_writer(&local, &mut payload)
        .map_err(|e| EngineError::IllegalState(format!("type scan encode failed: {e}")))?;
    let mut merged = TypeObservations::default();
    for peer in comm.all_gather(payload)? {
        let obs: TypeObservations = ciborium::from_reader(peer.as_slice())
            .map_err(|e| EngineError::IllegalState(format!("type scan undecodable: {e}")))?;
        merged.oid = merge_oid(merged.oid, obs.oid);
        for (name, code) in obs.vertices {
            let slot = merged.vertices.entry(name).or_default();
            *slot = merge_codes(*slot, code);
        }
        for (name, code) in obs.edges {
            let slot = merged.edges.entry(name).or_default();
            *slot = merge_codes(*slot, code);
        }
    }

    let oid_type = match merged.oid {
        // An empty graph still needs an id column type.
        0 | 2 => DataType::Int64,
        1 => DataType::Bool,
        3 => DataType::Float64,
        4 => DataType::Utf8,
        SCAN_NON_SCALAR => {
            return Err(EngineError::DataType(
                "vertex ids hold non-scalar values".into(),
            ))
        }
        _ => {
            return Err(EngineError::DataType(
                "vertex ids have conflicting types".into(),
            ))
        }
    };
    let vertex_defs = consolidated_defs(merged.vertices)?;
    let edge_defs = consolidated_defs(merged.edges)?;

    let mut oid_col = Column::new(oid_type);
    for (_, oid) in &owned {
        oid_col.push_value(oid)?;
    }
    let mut vertex_cols: Vec<(String, Column)> = vertex_defs
        .iter()
        .map(|d| (d.name.clone(), Column::new(d.data_type)))
        .collect();
    for (gid, _) in &owned {
        let attrs = frag.node_attrs(*gid).unwrap_or_default();
        for (def, (_, col)) in vertex_defs.iter().zip(vertex_cols.iter_mut()) {
            col.push_value(&coerce_attr(present(&attrs, &def.name), &def.name, def.data_type)?)?;
        }
    }

    let mut payload = Vec::new();
    ciborium::into_writer(&oid_col, &mut payload)
        .map_err(|e| EngineError::IllegalState(format!("oid column encode failed: {e}")))?;
    let mut oid_arrays: Vec<Vec<Column>> = Vec::with_capacity(fnum as usize);
    for peer in comm.all_gather(payload)? {
        let col: Column = ciborium::from_reader(peer.as_slice())
            .map_err(|e| EngineError::IllegalState(format!("oid column undecodable: {e}")))?;
        oid_arrays.push(vec![col]);
    }
    let vmap = Arc::new(ColumnarVertexMap::build(fnum, oid_arrays)?);

    let mut out = edge_rows(&edge_defs);
    let mut incoming = edge_rows(&edge_defs);
    for (gid, oid) in &owned {
        let own_gid = columnar_gid(&vmap, oid)?;
        for (nbr, attrs) in frag.out_entries(*gid) {
            let dst = translated(frag, &vmap, nbr)?;
            push_edge_row(&mut out, own_gid, dst, &attrs, &edge_defs)?;
        }
        if directed {
            for (nbr, attrs) in frag.in_entries(*gid) {
                // Rows whose source this rank owns already sit in `out`.
                if gid_fid(nbr) == fid {
                    continue;
                }
                let src = translated(frag, &vmap, nbr)?;
                push_edge_row(&mut incoming, src, own_gid, &attrs, &edge_defs)?;
            }
        }
    }

    let schema = PropertySchema {
        vertex_labels: vec![LabelSchema {
            label: DEFAULT_LABEL.to_owned(),
            properties: vertex_defs,
        }],
        edge_labels: vec![LabelSchema {
            label: DEFAULT_LABEL.to_owned(),
            properties: edge_defs,
        }],
    };
    let built = ColumnarFragment::from_parts(
        fid,
        fnum,
        directed,
        false,
        schema,
        vmap,
        vec![vertex_cols],
        vec![EdgeStore {
            src_label: 0,
            dst_label: 0,
            out,
            incoming,
        }],
    )?;
    let handles = built.persist(store, comm)?;
    Ok((built, handles))
}

// Vertex ids never widen: `1` and `1.0` are different ids, so mixed
// int and float classes conflict instead of merging.
fn merge_oid(acc: u8, next: u8) -> u8 {
    match (acc, next) {
        (a, 0) => a,
        (0, b) => b,
        (a, b) if a == b || a >= SCAN_CONFLICT => a,
        (_, b) if b >= SCAN_CONFLICT => b,
        _ => SCAN_CONFLICT,
    }
}

fn oid_code(value: &DynValue) -> u8 {
    match value {
        DynValue::Null => 0,
        DynValue::Bool(_) => 1,
        DynValue::Int(_) => 2,
        DynValue::Float(_) => 3,
        DynValue::Str(_) => 4,
        DynValue::List(_) | DynValue::Map(_) => SCAN_NON_SCALAR,
    }
}

/// Attributes only ever observed as null get no column at all.
fn consolidated_defs(codes: BTreeMap<String, u8>) -> Result<Vec<PropertyDef>, EngineError> {
    codes
        .into_iter()
        .filter(|(_, code)| *code != 0)
        .map(|(name, code)| {
            let data_type = class_type(&name, code)?;
            Ok(PropertyDef { name, data_type })
        })
        .collect()
}

fn present<'a>(attrs: &'a AttrMap, name: &str) -> Option<&'a DynValue> {
    attrs.get(name).filter(|v| !matches!(v, DynValue::Null))
}

fn edge_rows(defs: &[PropertyDef]) -> EdgeRows {
    EdgeRows {
        srcs: Vec::new(),
        dsts: Vec::new(),
        eids: Vec::new(),
        props: defs
            .iter()
            .map(|d| (d.name.clone(), Column::new(d.data_type)))
            .collect(),
    }
}

fn push_edge_row(
    rows: &mut EdgeRows,
    src: Gid,
    dst: Gid,
    attrs: &AttrMap,
    defs: &[PropertyDef],
) -> Result<(), EngineError> {
    rows.srcs.push(src);
    rows.dsts.push(dst);
    for (def, (_, col)) in defs.iter().zip(rows.props.iter_mut()) {
        col.push_value(&coerce_attr(present(attrs, &def.name), &def.name, def.data_type)?)?;
    }
    Ok(())
}

fn columnar_gid(vmap: &ColumnarVertexMap, oid: &DynValue) -> Result<Gid, EngineError> {
    vmap.gid(0, oid).ok_or_else(|| {
        EngineError::IllegalState(format!("vertex {oid} missing from the rebuilt map"))
    })
}

fn translated(
    frag: &DynamicFragment,
    vmap: &ColumnarVertexMap,
    gid: Gid,
) -> Result<Gid, EngineError> {
    let oid = frag.oid_of(gid).ok_or_else(|| {
        EngineError::IllegalState(format!("edge endpoint {gid} lost in conversion"))
    })?;
    columnar_gid(vmap, &oid)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::columnar::{EdgeTable, FragmentData, FragmentDataSet, VertexTable};
    use crate::dynamic::{ModifyKind, ViewMode};
    use crate::vmap::pack_gid;
    use skein_comm::{LocalComm, LocalGroup};
    use skein_store::MemoryStore;

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

    fn items(raw: &str) -> Vec<DynValue> {
        let parsed: serde_json::Value = serde_json::from_str(raw).unwrap();
        match DynValue::from_json(&parsed) {
            DynValue::List(list) => list,
            other => vec![other],
        }
    }

    #[test]
    fn columnar_round_trips_through_dynamic() {
        let set = person_set();
        let store = MemoryStore::new();
        let results = per_rank(2, |comm| {
            let rank = comm.spec().rank;
            let frag =
                ColumnarFragment::from_data_set(rank, 2, false, &set).unwrap();
            let dynamic = to_dynamic(&comm, &frag).unwrap();

            assert_eq!(dynamic.node_count(), 3);
            assert!(dynamic.directed());
            assert_eq!(
                dynamic.has_edge(&DynValue::Int(1), &DynValue::Int(2), ViewMode::AsIs),
                Some(true)
            );
            if rank == 0 {
                let gid = dynamic.gid_of(&DynValue::Int(1)).unwrap();
                let attrs = dynamic.node_attrs(gid).unwrap();
                assert_eq!(attrs.get("age"), Some(&DynValue::Int(31)));
            }

            let (back, handles) = to_columnar(&comm, &store, &dynamic).unwrap();
            assert!(store.exists(handles.object_id).unwrap());
            assert_eq!(back.vmap().total_vertices(0), 3);
            assert_eq!(back.schema().vertex_labels[0].label, DEFAULT_LABEL);
            assert_eq!(
                back.schema().vertex_labels[0].properties,
                vec![PropertyDef {
                    name: "age".into(),
                    data_type: DataType::Int64,
                }]
            );
            assert_eq!(
                back.schema().edge_labels[0].properties,
                vec![PropertyDef {
                    name: "w".into(),
                    data_type: DataType::Float64,
                }]
            );

            // Ownership carried over, so rank 0 keeps oids 1 and 3.
            if rank == 0 {
                assert_eq!(
                    back.vmap().oid_column(0, 0),
                    Some(&Column::Int64(vec![1, 3]))
                );
                assert_eq!(
                    back.vertex_properties(0)[0].1,
                    Column::Int64(vec![31, 33])
                );
                let store0 = back.edge_store(0).unwrap();
                assert_eq!(store0.out.srcs, vec![pack_gid(0, 0, 0).unwrap()]);
                assert_eq!(store0.out.dsts, vec![pack_gid(1, 0, 0).unwrap()]);
                assert_eq!(store0.out.props[0].1, Column::Float64(vec![0.5]));
            } else {
                let store1 = back.edge_store(0).unwrap();
                assert!(store1.out.is_empty());
                assert_eq!(store1.incoming.len(), 1);
            }

            // And back out again.
            let again = to_dynamic(&comm, &back).unwrap();
            assert_eq!(again.node_count(), 3);
            assert_eq!(
                again.has_edge(&DynValue::Int(1), &DynValue::Int(2), ViewMode::AsIs),
                Some(true)
            );
            again.node_count()
        });
        assert_eq!(results, vec![3, 3]);
    }

    #[test]
    fn parallel_edges_and_alien_columns_fail_conversion() {
        // Same endpoints under two labels: no dynamic form.
        let mut set = person_set();
        set.fragments[0].edges.push(EdgeTable {
            label: "likes".into(),
            src_label: "person".into(),
            dst_label: "person".into(),
            srcs: Column::Int64(vec![1]),
            dsts: Column::Int64(vec![2]),
            properties: vec![],
        });
        set.fragments[1].edges.push(EdgeTable {
            label: "likes".into(),
            src_label: "person".into(),
            dst_label: "person".into(),
            srcs: Column::Int64(vec![]),
            dsts: Column::Int64(vec![]),
            properties: vec![],
        });
        let errs = per_rank(2, |comm| {
            let frag = ColumnarFragment::from_data_set(comm.spec().rank, 2, false, &set)
                .unwrap();
            to_dynamic(&comm, &frag).unwrap_err()
        });
        assert_eq!(
            errs[0],
            EngineError::IllegalState("duplicated edge: 1 -> 2".into())
        );

        // Bool columns have no dynamic attribute form.
        let mut flagged = person_set();
        flagged.fragments[0].vertices[0]
            .properties
            .push(("ok".into(), Column::Bool(vec![true, false])));
        flagged.fragments[1].vertices[0]
            .properties
            .push(("ok".into(), Column::Bool(vec![true])));
        let errs = per_rank(2, |comm| {
            let frag =
                ColumnarFragment::from_data_set(comm.spec().rank, 2, false, &flagged)
                    .unwrap();
            to_dynamic(&comm, &frag).unwrap_err()
        });
        assert_eq!(
            errs[0],
            EngineError::DataType("unexpected type bool on property ok".into())
        );
    }

    #[test]
    fn cross_label_id_collisions_fail_conversion() {
        let set = FragmentDataSet {
            directed: true,
            fragments: vec![FragmentData {
                vertices: vec![
                    VertexTable {
                        label: "person".into(),
                        oids: Column::Int64(vec![7]),
                        properties: vec![],
                    },
                    VertexTable {
                        label: "city".into(),
                        oids: Column::Int64(vec![7]),
                        properties: vec![],
                    },
                ],
                edges: vec![],
            }],
        };
        let errs = per_rank(1, |comm| {
            let frag = ColumnarFragment::from_data_set(0, 1, false, &set).unwrap();
            to_dynamic(&comm, &frag).unwrap_err()
        });
        assert_eq!(errs[0], EngineError::DataType("duplicated oid: 7".into()));
    }

    #[test]
    fn dynamic_schemas_consolidate_across_ranks() {
        let store = MemoryStore::new();
        let vertices = items(r#"[["a", {"x": 1}], ["b", {"x": 2.5}], ["c", {}]]"#);
        let edges = items(r#"[["a", "b", {"w": 2}]]"#);
        let results = per_rank(2, |comm| {
            let frag = DynamicFragment::new(comm.spec().rank, 2, false);
            frag.modify_vertices(ModifyKind::Add, &vertices, &AttrMap::new())
                .unwrap();
            frag.modify_edges(ModifyKind::Add, &edges, &AttrMap::new())
                .unwrap();
            let (back, _) = to_columnar(&comm, &store, &frag).unwrap();

            // Ints widened into the float slot; "c" took the default.
            assert_eq!(
                back.schema().vertex_labels[0].properties,
                vec![PropertyDef {
                    name: "x".into(),
                    data_type: DataType::Float64,
                }]
            );
            assert_eq!(
                back.schema().edge_labels[0].properties,
                vec![PropertyDef {
                    name: "w".into(),
                    data_type: DataType::Int64,
                }]
            );
            assert_eq!(back.vmap().total_vertices(0), 3);

            let mut pairs: Vec<(DynValue, DynValue)> = Vec::new();
            let rank = comm.spec().rank;
            if let Some(oids) = back.vmap().oid_column(rank, 0) {
                let (_, xs) = &back.vertex_properties(0)[0];
                for row in 0..oids.len() {
                    pairs.push((oids.value(row).unwrap(), xs.value(row).unwrap()));
                }
            }
            let out_rows: usize = back.edge_store(0).map_or(0, |s| s.out.len());
            (pairs, out_rows)
        });

        let mut all: Vec<(DynValue, DynValue)> = results
            .iter()
            .flat_map(|(pairs, _)| pairs.clone())
            .collect();
        all.sort_by_key(|(oid, _)| oid.to_string());
        assert_eq!(
            all,
            vec![
                (DynValue::Str("a".into()), DynValue::Float(1.0)),
                (DynValue::Str("b".into()), DynValue::Float(2.5)),
                (DynValue::Str("c".into()), DynValue::Float(0.0)),
            ]
        );
        // One orientation per owner for the undirected edge.
        assert_eq!(results.iter().map(|(_, n)| n).sum::<usize>(), 2);
    }

    #[test]
    fn conflicting_attribute_types_fail_on_every_rank() {
        let store = MemoryStore::new();
        let vertices = items(r#"[["a", {"y": 1}], ["b", {"y": "s"}]]"#);
        let errs = per_rank(2, |comm| {
            let frag = DynamicFragment::new(comm.spec().rank, 2, true);
            frag.modify_vertices(ModifyKind::Add, &vertices, &AttrMap::new())
                .unwrap();
            to_columnar(&comm, &store, &frag).unwrap_err()
        });
        assert_eq!(
            errs[0],
            EngineError::DataType("property y has conflicting types".into())
        );
        assert_eq!(errs[0], errs[1]);

        let listy = items(r#"[["a", {"z": [1, 2]}]]"#);
        let errs = per_rank(2, |comm| {
            let frag = DynamicFragment::new(comm.spec().rank, 2, true);
            frag.modify_vertices(ModifyKind::Add, &listy, &AttrMap::new())
                .unwrap();
            to_columnar(&comm, &store, &frag).unwrap_err()
        });
        assert_eq!(
            errs[0],
            EngineError::DataType("property z holds a non-scalar value".into())
        );
    }
}
