// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared harness for the engine integration tests: a threaded SPMD
//! group, per-rank engine constructors, payload extractors, command
//! builders, and the graph fixtures the pipelines run over.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;

use skein_comm::{LocalComm, LocalGroup};
use skein_core::column::Column;
use skein_core::columnar::{EdgeTable, FragmentData, FragmentDataSet, VertexTable};
use skein_core::{EngineConfig, GraphEngine};
use skein_proto::{
    Command, CommandKind, DispatchResult, GraphDef, GraphDefExt, ParamKey, ParamValue,
    ResultPayload, StoreExt,
};
use skein_store::{MemoryStore, ObjectId};
use tracing_subscriber::EnvFilter;

/// Route engine logs through the test harness when `RUST_LOG` asks for
/// them. Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Run `f` once per rank, each on its own thread, and collect the
/// results in rank order.
pub fn run_ranks<T: Send>(peers: u32, f: impl Fn(LocalComm) -> T + Send + Sync) -> Vec<T> {
    let comms = LocalGroup::new(peers).unwrap();
    thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| scope.spawn(|| f(comm)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Engine whose store no other rank sees. Enough for dynamic-only
/// command streams, which never touch the store.
pub fn engine(comm: LocalComm) -> GraphEngine<LocalComm> {
    GraphEngine::new(comm, Arc::new(MemoryStore::new()), EngineConfig::default())
}

/// Engine over a store the whole group shares. Persisting commands
/// group per-rank objects on rank 0, so anything that loads, projects,
/// extends, or converts columnar graphs needs this constructor.
pub fn engine_sharing(comm: LocalComm, store: &Arc<MemoryStore>) -> GraphEngine<LocalComm> {
    GraphEngine::new(
        comm,
        Arc::<MemoryStore>::clone(store),
        EngineConfig::default(),
    )
}

pub fn graph_payload(result: DispatchResult) -> GraphDef {
    match result.payload {
        ResultPayload::Graph(def) => def,
        other => panic!("unexpected payload: {other:?}"),
    }
}

pub fn text_payload(result: DispatchResult) -> String {
    match result.payload {
        ResultPayload::Text(s) => s,
        other => panic!("unexpected payload: {other:?}"),
    }
}

pub fn archive_payload(result: DispatchResult) -> Vec<u8> {
    match result.payload {
        ResultPayload::Archive(bytes) => bytes,
        other => panic!("unexpected payload: {other:?}"),
    }
}

/// The store extension a persisted columnar graph reports.
pub fn store_ext(def: &GraphDef) -> StoreExt {
    match &def.ext {
        Some(GraphDefExt::Store(ext)) => ext.clone(),
        other => panic!("graph has no store extension: {other:?}"),
    }
}

/// Coordinator-side fold of owner-answered reports: the first non-empty
/// per-rank answer, or empty when no rank held the data.
pub fn first_nonempty(answers: Vec<String>) -> String {
    answers
        .into_iter()
        .find(|a| !a.is_empty())
        .unwrap_or_default()
}

/// The object id a store-form command reports as `{"object_id": N}`.
pub fn object_id(text: &str) -> ObjectId {
    let parsed: serde_json::Value = serde_json::from_str(text).unwrap();
    ObjectId(parsed["object_id"].as_u64().unwrap())
}

pub fn named_cmd(kind: CommandKind, key: ParamKey, name: &str) -> Command {
    Command::new(kind).with_param(key, ParamValue::Str(name.to_owned()))
}

pub fn create_columnar_cmd(set: &FragmentDataSet) -> Command {
    Command::new(CommandKind::CreateGraph)
        .with_param(
            ParamKey::GraphKind,
            ParamValue::Str("ARROW_PROPERTY".to_owned()),
        )
        .with_param(ParamKey::FragmentData, ParamValue::Blob(set.to_cbor().unwrap()))
}

pub fn create_dynamic_cmd(directed: bool) -> Command {
    Command::new(CommandKind::CreateGraph)
        .with_param(
            ParamKey::GraphKind,
            ParamValue::Str("DYNAMIC_PROPERTY".to_owned()),
        )
        .with_param(ParamKey::Directed, ParamValue::Bool(directed))
}

pub fn modify_cmd(kind: CommandKind, graph: &str, verb: &str, items: &str) -> Command {
    let key = if matches!(kind, CommandKind::ModifyEdges) {
        ParamKey::Edges
    } else {
        ParamKey::Nodes
    };
    Command::new(kind)
        .with_param(ParamKey::GraphName, ParamValue::Str(graph.to_owned()))
        .with_param(ParamKey::ModifyKind, ParamValue::Str(verb.to_owned()))
        .with_param(key, ParamValue::Json(items.to_owned()))
}

pub fn report_cmd(graph: &str, kind: &str) -> Command {
    Command::new(CommandKind::ReportGraph)
        .with_param(ParamKey::GraphName, ParamValue::Str(graph.to_owned()))
        .with_param(ParamKey::ReportKind, ParamValue::Str(kind.to_owned()))
}

pub fn report_args_cmd(graph: &str, kind: &str, args: &str) -> Command {
    report_cmd(graph, kind).with_param(ParamKey::ReportArgs, ParamValue::Json(args.to_owned()))
}

/// Two-fragment people graph: rank 0 owns persons 1 and 3, rank 1 owns
/// person 2, and rank 0 holds the `knows` edges 1->2 and 1->3. Degree
/// centrality over its simple projection is 1.0, 0.5, 0.5 in owned
/// order.
pub fn linked_people() -> FragmentDataSet {
    FragmentDataSet {
        directed: true,
        fragments: vec![
            FragmentData {
                vertices: vec![VertexTable {
                    label: "person".to_owned(),
                    oids: Column::Int64(vec![1, 3]),
                    properties: vec![
                        ("age".to_owned(), Column::Int64(vec![31, 33])),
                        (
                            "name".to_owned(),
                            Column::Utf8(vec!["ada".to_owned(), "cog".to_owned()]),
                        ),
                    ],
                }],
                edges: vec![EdgeTable {
                    label: "knows".to_owned(),
                    src_label: "person".to_owned(),
                    dst_label: "person".to_owned(),
                    srcs: Column::Int64(vec![1, 1]),
                    dsts: Column::Int64(vec![2, 3]),
                    properties: Vec::new(),
                }],
            },
            FragmentData {
                vertices: vec![VertexTable {
                    label: "person".to_owned(),
                    oids: Column::Int64(vec![2]),
                    properties: vec![
                        ("age".to_owned(), Column::Int64(vec![32])),
                        ("name".to_owned(), Column::Utf8(vec!["bob".to_owned()])),
                    ],
                }],
                edges: vec![EdgeTable {
                    label: "knows".to_owned(),
                    src_label: "person".to_owned(),
                    dst_label: "person".to_owned(),
                    srcs: Column::Int64(vec![]),
                    dsts: Column::Int64(vec![]),
                    properties: Vec::new(),
                }],
            },
        ],
    }
}

/// A `city` label and `lives_in` edges aligned with [`linked_people`],
/// for merging a second label pair into a loaded graph. Edge rows sit
/// on the fragment that owns their source person.
pub fn city_extension() -> FragmentDataSet {
    FragmentDataSet {
        directed: true,
        fragments: vec![
            FragmentData {
                vertices: vec![VertexTable {
                    label: "city".to_owned(),
                    oids: Column::Int64(vec![100]),
                    properties: vec![("pop".to_owned(), Column::Int64(vec![50]))],
                }],
                edges: vec![EdgeTable {
                    label: "lives_in".to_owned(),
                    src_label: "person".to_owned(),
                    dst_label: "city".to_owned(),
                    srcs: Column::Int64(vec![1, 3]),
                    dsts: Column::Int64(vec![100, 200]),
                    properties: Vec::new(),
                }],
            },
            FragmentData {
                vertices: vec![VertexTable {
                    label: "city".to_owned(),
                    oids: Column::Int64(vec![200]),
                    properties: vec![("pop".to_owned(), Column::Int64(vec![70]))],
                }],
                edges: vec![EdgeTable {
                    label: "lives_in".to_owned(),
                    src_label: "person".to_owned(),
                    dst_label: "city".to_owned(),
                    srcs: Column::Int64(vec![2]),
                    dsts: Column::Int64(vec![200]),
                    properties: Vec::new(),
                }],
            },
        ],
    }
}
