// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Mutable graph lifecycle driven through the command stream: modify
//! batches, owner-answered reports, direction views and copies, induced
//! subgraphs, and the transform detour through columnar form.
//!
//! Mutations and reports are collective, so every rank issues every
//! command; reports that only an owner can answer come back empty on
//! the other ranks and get folded host-side.

#![cfg(feature = "dynamic")]
#![allow(missing_docs, clippy::unwrap_used, clippy::panic)]

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use common::{
    archive_payload, create_dynamic_cmd, engine, engine_sharing, first_nonempty, graph_payload,
    init_tracing, modify_cmd, named_cmd, report_args_cmd, report_cmd, run_ranks, text_payload,
};
use skein_core::marshal::decode_dataframe;
use skein_core::value::DynValue;
use skein_core::EngineError;
use skein_proto::{Command, CommandKind, GraphKind, ParamKey, ParamValue};
use skein_store::MemoryStore;

/// One owner-answered report, folded across ranks.
fn folded(outputs: &[Vec<String>], idx: usize) -> String {
    first_nonempty(outputs.iter().map(|o| o[idx].clone()).collect())
}

fn json(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap()
}

#[test]
fn modify_batches_reshape_counts_and_attributes() {
    init_tracing();
    let outputs = run_ranks(2, |comm| {
        let mut engine = engine(comm);
        let def = graph_payload(engine.on_command(&create_dynamic_cmd(true)).unwrap());
        assert_eq!(def.key, "graph_1");
        assert_eq!(def.kind, GraphKind::DynamicProperty);

        let verts = modify_cmd(
            CommandKind::ModifyVertices,
            "graph_1",
            "add",
            r#"[[7, {"kind": "hub"}], 8]"#,
        )
        .with_param(ParamKey::CommonAttrs, ParamValue::Json(r#"{"seen": 1}"#.to_owned()));
        engine.on_command(&verts).unwrap();
        engine
            .on_command(&modify_cmd(
                CommandKind::ModifyEdges,
                "graph_1",
                "add",
                r#"[[1, 2, {"w": 5}], [2, 3]]"#,
            ))
            .unwrap();

        // Counts and existence are uniform across ranks.
        let count = |engine: &mut skein_core::GraphEngine<_>, kind: &str| {
            text_payload(engine.on_command(&report_cmd("graph_1", kind)).unwrap())
        };
        assert_eq!(count(&mut engine, "node_num"), "5");
        assert_eq!(count(&mut engine, "edge_num"), "2");
        assert_eq!(count(&mut engine, "selfloops_num"), "0");
        let probe = |engine: &mut skein_core::GraphEngine<_>, args: &str| {
            text_payload(
                engine
                    .on_command(&report_args_cmd("graph_1", "has_node", args))
                    .unwrap(),
            )
        };
        assert_eq!(probe(&mut engine, r#"{"node": 7}"#), "true");
        assert_eq!(probe(&mut engine, r#"{"node": 99}"#), "false");

        let mut owner = Vec::new();
        let mut ask = |engine: &mut skein_core::GraphEngine<_>, kind: &str, args: &str| {
            let cmd = report_args_cmd("graph_1", kind, args);
            owner.push(text_payload(engine.on_command(&cmd).unwrap()));
        };
        ask(&mut engine, "has_edge", r#"{"u": 1, "v": 2}"#);
        ask(&mut engine, "has_edge", r#"{"u": 2, "v": 1}"#);
        ask(&mut engine, "node_data", r#"{"node": 7}"#);
        ask(&mut engine, "edge_data", r#"{"u": 1, "v": 2}"#);
        ask(&mut engine, "deg_by_node", r#"{"node": 2}"#);
        ask(&mut engine, "in_deg_by_node", r#"{"node": 2}"#);
        ask(&mut engine, "out_deg_by_node", r#"{"node": 2}"#);
        ask(&mut engine, "succs_by_node", r#"{"node": 1}"#);
        ask(&mut engine, "preds_by_node", r#"{"node": 3}"#);
        ask(&mut engine, "nodes_by_loc", r#"{"fid": 0, "offset": 0, "limit": 16}"#);
        ask(&mut engine, "nodes_by_loc", r#"{"fid": 1, "offset": 0, "limit": 16}"#);

        engine
            .on_command(&modify_cmd(CommandKind::ModifyVertices, "graph_1", "del", "[8]"))
            .unwrap();
        assert_eq!(count(&mut engine, "node_num"), "4");
        engine
            .on_command(&modify_cmd(
                CommandKind::ModifyEdges,
                "graph_1",
                "del",
                "[[1, 2]]",
            ))
            .unwrap();
        assert_eq!(count(&mut engine, "edge_num"), "1");

        engine
            .on_command(&modify_cmd(
                CommandKind::ModifyVertices,
                "graph_1",
                "update",
                r#"[[7, {"kind": "core"}]]"#,
            ))
            .unwrap();
        ask(&mut engine, "node_data", r#"{"node": 7}"#);
        owner
    });

    let ans = |idx: usize| folded(&outputs, idx);
    assert_eq!(ans(0), "true");
    assert_eq!(ans(1), "false");
    assert_eq!(json(&ans(2)), serde_json::json!({"kind": "hub", "seen": 1}));
    assert_eq!(json(&ans(3)), serde_json::json!({"w": 5}));
    assert_eq!(ans(4), "2");
    assert_eq!(ans(5), "1");
    assert_eq!(ans(6), "1");
    assert_eq!(ans(7), "[2]");
    assert_eq!(ans(8), "[2]");
    // The two location batches partition the vertex set.
    let mut seen: BTreeSet<i64> = BTreeSet::new();
    for idx in [9, 10] {
        let batch: Vec<i64> = serde_json::from_str(&ans(idx)).unwrap();
        seen.extend(batch);
    }
    assert_eq!(seen, BTreeSet::from([1, 2, 3, 7, 8]));
    // Update merged the new attribute over the old ones.
    assert_eq!(json(&ans(11)), serde_json::json!({"kind": "core", "seen": 1}));
}

#[test]
fn views_read_shared_state_and_copies_fork_it() {
    let outputs = run_ranks(2, |comm| {
        let mut engine = engine(comm);
        engine.on_command(&create_dynamic_cmd(true)).unwrap();
        engine
            .on_command(&modify_cmd(
                CommandKind::ModifyEdges,
                "graph_1",
                "add",
                "[[1, 2], [2, 3]]",
            ))
            .unwrap();

        let view = |graph: &str, kind: &str| {
            Command::new(CommandKind::CreateGraphView)
                .with_param(ParamKey::GraphName, ParamValue::Str(graph.to_owned()))
                .with_param(ParamKey::ViewKind, ParamValue::Str(kind.to_owned()))
        };
        let def = graph_payload(engine.on_command(&view("graph_1", "reversed")).unwrap());
        assert_eq!(def.key, "graph_view_3");
        let def = graph_payload(engine.on_command(&view("graph_1", "both")).unwrap());
        assert_eq!(def.key, "graph_view_4");

        let copy = |graph: &str, kind: &str| {
            named_cmd(CommandKind::CopyGraph, ParamKey::GraphName, graph)
                .with_param(ParamKey::CopyKind, ParamValue::Str(kind.to_owned()))
        };
        // Copying a view materializes what the view reads.
        let def = graph_payload(engine.on_command(&copy("graph_view_3", "identical")).unwrap());
        assert_eq!(def.key, "graph_5");
        let err = engine.on_command(&copy("graph_view_3", "reverse")).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidOperation(
                "only identical copies of graph views are supported".into()
            )
        );
        let def = graph_payload(engine.on_command(&copy("graph_1", "reverse")).unwrap());
        assert_eq!(def.key, "graph_7");

        let def = graph_payload(
            engine
                .on_command(&named_cmd(
                    CommandKind::ToUndirected,
                    ParamKey::GraphName,
                    "graph_1",
                ))
                .unwrap(),
        );
        assert_eq!(def.key, "graph_8");
        assert!(!def.directed);
        let def = graph_payload(
            engine
                .on_command(&named_cmd(
                    CommandKind::ToDirected,
                    ParamKey::GraphName,
                    "graph_8",
                ))
                .unwrap(),
        );
        assert_eq!(def.key, "graph_9");
        assert!(def.directed);

        // Views are terminal: no stacking, no reorientation.
        let err = engine
            .on_command(&view("graph_view_3", "reversed"))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperation(_)));
        let err = engine
            .on_command(&named_cmd(
                CommandKind::ToDirected,
                ParamKey::GraphName,
                "graph_view_3",
            ))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperation(_)));

        let count = |engine: &mut skein_core::GraphEngine<_>, graph: &str, kind: &str| {
            text_payload(engine.on_command(&report_cmd(graph, kind)).unwrap())
        };
        assert_eq!(count(&mut engine, "graph_view_3", "node_num"), "3");
        assert_eq!(count(&mut engine, "graph_view_3", "edge_num"), "2");
        assert_eq!(count(&mut engine, "graph_view_4", "edge_num"), "2");
        assert_eq!(count(&mut engine, "graph_7", "edge_num"), "2");
        assert_eq!(count(&mut engine, "graph_8", "edge_num"), "2");
        assert_eq!(count(&mut engine, "graph_9", "edge_num"), "4");

        let mut owner = Vec::new();
        let mut ask = |engine: &mut skein_core::GraphEngine<_>, graph: &str, args: &str| {
            let cmd = report_args_cmd(graph, "has_edge", args);
            owner.push(text_payload(engine.on_command(&cmd).unwrap()));
        };
        ask(&mut engine, "graph_view_3", r#"{"u": 2, "v": 1}"#);
        ask(&mut engine, "graph_view_3", r#"{"u": 1, "v": 2}"#);
        ask(&mut engine, "graph_view_4", r#"{"u": 2, "v": 1}"#);
        ask(&mut engine, "graph_7", r#"{"u": 2, "v": 1}"#);
        ask(&mut engine, "graph_7", r#"{"u": 1, "v": 2}"#);
        ask(&mut engine, "graph_8", r#"{"u": 1, "v": 2}"#);
        ask(&mut engine, "graph_8", r#"{"u": 2, "v": 1}"#);

        engine
            .on_command(&named_cmd(
                CommandKind::ClearEdges,
                ParamKey::GraphName,
                "graph_1",
            ))
            .unwrap();
        assert_eq!(count(&mut engine, "graph_1", "edge_num"), "0");
        assert_eq!(count(&mut engine, "graph_1", "node_num"), "3");
        engine
            .on_command(&named_cmd(
                CommandKind::ClearGraph,
                ParamKey::GraphName,
                "graph_1",
            ))
            .unwrap();
        assert_eq!(count(&mut engine, "graph_1", "node_num"), "0");

        // The materialized copy kept its own adjacency.
        assert_eq!(count(&mut engine, "graph_5", "edge_num"), "2");
        ask(&mut engine, "graph_5", r#"{"u": 2, "v": 1}"#);
        owner
    });

    let ans = |idx: usize| folded(&outputs, idx);
    assert_eq!(ans(0), "true");
    assert_eq!(ans(1), "false");
    assert_eq!(ans(2), "true");
    assert_eq!(ans(3), "true");
    assert_eq!(ans(4), "false");
    assert_eq!(ans(5), "true");
    assert_eq!(ans(6), "true");
    assert_eq!(ans(7), "true");
}

#[test]
fn induced_subgraphs_keep_only_interior_structure() {
    run_ranks(2, |comm| {
        let mut engine = engine(comm);
        engine.on_command(&create_dynamic_cmd(true)).unwrap();
        engine
            .on_command(&modify_cmd(
                CommandKind::ModifyEdges,
                "graph_1",
                "add",
                "[[1, 2], [2, 3], [3, 1], [3, 3]]",
            ))
            .unwrap();

        let induce = Command::new(CommandKind::InduceSubgraph)
            .with_param(ParamKey::GraphName, ParamValue::Str("graph_1".to_owned()))
            .with_param(ParamKey::Nodes, ParamValue::Json("[1, 3]".to_owned()));
        let def = graph_payload(engine.on_command(&induce).unwrap());
        assert_eq!(def.key, "induced_graph_3");

        // Edge-induced: pairs missing from the source are skipped.
        let induce = Command::new(CommandKind::InduceSubgraph)
            .with_param(ParamKey::GraphName, ParamValue::Str("graph_1".to_owned()))
            .with_param(ParamKey::Edges, ParamValue::Json("[[1, 2], [2, 9]]".to_owned()));
        let def = graph_payload(engine.on_command(&induce).unwrap());
        assert_eq!(def.key, "induced_graph_4");

        let count = |engine: &mut skein_core::GraphEngine<_>, graph: &str, kind: &str| {
            text_payload(engine.on_command(&report_cmd(graph, kind)).unwrap())
        };
        assert_eq!(count(&mut engine, "induced_graph_3", "node_num"), "2");
        assert_eq!(count(&mut engine, "induced_graph_3", "edge_num"), "2");
        assert_eq!(count(&mut engine, "induced_graph_3", "selfloops_num"), "1");
        assert_eq!(count(&mut engine, "induced_graph_4", "node_num"), "2");
        assert_eq!(count(&mut engine, "induced_graph_4", "edge_num"), "1");
        assert_eq!(count(&mut engine, "induced_graph_4", "selfloops_num"), "0");
    });
}

#[test]
fn string_keyed_graphs_survive_the_columnar_detour() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let outputs = run_ranks(2, |comm| {
        let mut engine = engine_sharing(comm, &store);
        engine.on_command(&create_dynamic_cmd(true)).unwrap();
        engine
            .on_command(&modify_cmd(
                CommandKind::ModifyVertices,
                "graph_1",
                "add",
                r#"[["u1", {"score": 1.5}], "u2"]"#,
            ))
            .unwrap();
        engine
            .on_command(&modify_cmd(
                CommandKind::ModifyEdges,
                "graph_1",
                "add",
                r#"[["u1", "u2"]]"#,
            ))
            .unwrap();

        let transform = |graph: &str, dst: &str| {
            Command::new(CommandKind::TransformGraph)
                .with_param(ParamKey::GraphName, ParamValue::Str(graph.to_owned()))
                .with_param(ParamKey::DstGraphKind, ParamValue::Str(dst.to_owned()))
        };
        let def = graph_payload(engine.on_command(&transform("graph_1", "ARROW_PROPERTY")).unwrap());
        assert_eq!(def.key, "graph_4");
        assert_eq!(def.kind, GraphKind::ArrowProperty);
        assert!(def.directed);

        let frame = Command::new(CommandKind::GraphToDataframe)
            .with_param(ParamKey::GraphName, ParamValue::Str("graph_4".to_owned()))
            .with_param(
                ParamKey::Selector,
                ParamValue::Json(r#"{"id": "v:_.id", "score": "v:_.score"}"#.to_owned()),
            );
        let frame = archive_payload(engine.on_command(&frame).unwrap());

        let def = graph_payload(
            engine
                .on_command(&transform("graph_4", "DYNAMIC_PROPERTY"))
                .unwrap(),
        );
        assert_eq!(def.key, "graph_6");
        assert_eq!(def.kind, GraphKind::DynamicProperty);

        let count = |engine: &mut skein_core::GraphEngine<_>, kind: &str| {
            text_payload(engine.on_command(&report_cmd("graph_6", kind)).unwrap())
        };
        assert_eq!(count(&mut engine, "node_num"), "2");
        assert_eq!(count(&mut engine, "edge_num"), "1");
        let edge = text_payload(
            engine
                .on_command(&report_args_cmd(
                    "graph_6",
                    "has_edge",
                    r#"{"u": "u1", "v": "u2"}"#,
                ))
                .unwrap(),
        );
        let data = text_payload(
            engine
                .on_command(&report_args_cmd("graph_6", "node_data", r#"{"node": "u2"}"#))
                .unwrap(),
        );
        (frame, edge, data)
    });

    // Rows stay on the rank that owned the vertex, so order is only
    // meaningful after a host-side sort.
    let frame = decode_dataframe(&outputs[0].0).unwrap();
    assert_eq!(frame.columns[0].0, "id");
    assert_eq!(frame.columns[1].0, "score");
    let mut rows: Vec<(String, DynValue)> = frame.columns[0]
        .2
        .iter()
        .zip(frame.columns[1].2.iter())
        .map(|(id, score)| match id {
            DynValue::Str(s) => (s.clone(), score.clone()),
            other => panic!("unexpected id: {other:?}"),
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    // u2 never carried a score, so the column default filled in.
    assert_eq!(
        rows,
        vec![
            ("u1".to_owned(), DynValue::Float(1.5)),
            ("u2".to_owned(), DynValue::Float(0.0)),
        ]
    );

    let edges: Vec<String> = outputs.iter().map(|o| o.1.clone()).collect();
    assert_eq!(first_nonempty(edges), "true");
    let data: Vec<String> = outputs.iter().map(|o| o.2.clone()).collect();
    assert_eq!(json(&first_nonempty(data)), serde_json::json!({"score": 0.0}));
}

#[test]
fn centrality_runs_directly_on_mutable_graphs() {
    let outputs = run_ranks(2, |comm| {
        let mut engine = engine(comm);
        engine.on_command(&create_dynamic_cmd(true)).unwrap();
        engine
            .on_command(&modify_cmd(
                CommandKind::ModifyEdges,
                "graph_1",
                "add",
                "[[1, 2], [1, 3]]",
            ))
            .unwrap();

        // No algorithm name given: the library path is the fallback.
        let app_key = text_payload(
            engine
                .on_command(&named_cmd(
                    CommandKind::CreateApp,
                    ParamKey::AppLibraryPath,
                    "degree_centrality",
                ))
                .unwrap(),
        );
        assert_eq!(app_key, "app_3");

        let run = Command::new(CommandKind::RunApp)
            .with_param(ParamKey::AppName, ParamValue::Str(app_key))
            .with_param(ParamKey::GraphName, ParamValue::Str("graph_1".to_owned()));
        let body = text_payload(engine.on_command(&run).unwrap());
        let parsed = json(&body);
        assert_eq!(parsed["context_type"], "vertex_data");
        assert_eq!(parsed["context_key"], "ctx_4");

        let frame = Command::new(CommandKind::ContextToDataframe)
            .with_param(ParamKey::ContextName, ParamValue::Str("ctx_4".to_owned()))
            .with_param(
                ParamKey::Selector,
                ParamValue::Json(r#"{"id": "v.id", "rank": "r"}"#.to_owned()),
            );
        archive_payload(engine.on_command(&frame).unwrap())
    });

    // Vertices are hash-distributed, so join values to ids instead of
    // trusting row order.
    let frame = decode_dataframe(&outputs[0]).unwrap();
    assert_eq!(frame.columns[0].0, "id");
    assert_eq!(frame.columns[1].0, "rank");
    let mut by_id: BTreeMap<i64, DynValue> = BTreeMap::new();
    for (id, rank) in frame.columns[0].2.iter().zip(frame.columns[1].2.iter()) {
        match id {
            DynValue::Int(v) => by_id.insert(*v, rank.clone()),
            other => panic!("unexpected id: {other:?}"),
        };
    }
    assert_eq!(
        by_id,
        BTreeMap::from([
            (1, DynValue::Float(1.0)),
            (2, DynValue::Float(0.5)),
            (3, DynValue::Float(0.5)),
        ])
    );
}
