// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire schema for skein analytical workers.
//!
//! A skein job is SPMD: every worker rank receives the identical command
//! stream and executes every command, rendezvousing at collective points.
//! This crate defines the bytes of that stream — the command envelope with
//! its typed parameter table, the graph descriptors workers report back,
//! and the per-rank dispatch results the coordinator aggregates — plus the
//! checksum-framed CBOR packet layout in [`wire`].
//!
//! Parameters are a closed tagged union ([`ParamValue`]) keyed by a closed
//! enum ([`ParamKey`]). There is no stringly-typed dispatch anywhere on the
//! wire: unknown commands or parameters fail at decode time, not deep in a
//! handler.

pub mod wire;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while building, reading, or transporting wire types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    /// A command handler required a parameter the envelope does not carry.
    #[error("missing required parameter: {0}")]
    MissingParam(ParamKey),
    /// A parameter is present but holds a different [`ParamValue`] variant.
    #[error("parameter {key} is not a {expected}")]
    ParamType {
        /// Key that was looked up.
        key: ParamKey,
        /// Variant name the caller asked for.
        expected: &'static str,
    },
    /// CBOR serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),
    /// CBOR deserialization failed.
    #[error("decode failed: {0}")]
    Decode(String),
    /// Packet framing violation (magic, version, length, or checksum).
    #[error("bad frame: {0}")]
    Frame(&'static str),
}

/// The four fragment kinds a worker can host.
///
/// `Arrow*` kinds are immutable columnar fragments; `Dynamic*` kinds are
/// mutable fragments keyed by dynamic vertex ids. `*Property` kinds carry
/// full label/property schemas; `*Projected` kinds are single vertex label,
/// single edge label, at most one property each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GraphKind {
    /// Immutable columnar property fragment.
    ArrowProperty,
    /// Immutable projected view over a columnar property fragment.
    ArrowProjected,
    /// Mutable dynamic property fragment.
    DynamicProperty,
    /// Typed projected view over a mutable dynamic fragment.
    DynamicProjected,
}

impl GraphKind {
    /// True for the two full property kinds.
    pub fn is_property(self) -> bool {
        matches!(self, Self::ArrowProperty | Self::DynamicProperty)
    }

    /// True for the two projected kinds.
    pub fn is_projected(self) -> bool {
        matches!(self, Self::ArrowProjected | Self::DynamicProjected)
    }

    /// True for the mutable dynamic kinds.
    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::DynamicProperty | Self::DynamicProjected)
    }
}

impl fmt::Display for GraphKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ArrowProperty => "ARROW_PROPERTY",
            Self::ArrowProjected => "ARROW_PROJECTED",
            Self::DynamicProperty => "DYNAMIC_PROPERTY",
            Self::DynamicProjected => "DYNAMIC_PROJECTED",
        };
        f.write_str(name)
    }
}

/// Every operation a worker understands.
///
/// One variant per coordinator verb; the dispatcher in `skein-core` owns
/// the single `match` over this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Materialize a graph on every rank and register it.
    CreateGraph,
    /// Drop a graph from the registry (and the store, if store-backed).
    UnloadGraph,
    /// Instantiate an algorithm from the app catalog.
    CreateApp,
    /// Drop an app instance from the registry.
    UnloadApp,
    /// Run a registered app over a registered graph; registers a context.
    RunApp,
    /// Drop an app context from the registry.
    UnloadContext,
    /// Answer a graph-inspection query (dynamic graphs only).
    ReportGraph,
    /// Property-to-property projection (subset of labels/properties).
    ProjectGraph,
    /// Project a property graph down to a simple typed fragment.
    ProjectToSimple,
    /// Add, delete, or update vertices of a dynamic graph.
    ModifyVertices,
    /// Add, delete, or update edges of a dynamic graph.
    ModifyEdges,
    /// Convert between columnar and dynamic representations.
    TransformGraph,
    /// Duplicate a graph under a new key.
    CopyGraph,
    /// Directed version of an undirected dynamic graph.
    ToDirected,
    /// Undirected version of a directed dynamic graph.
    ToUndirected,
    /// Subgraph induced by a vertex or edge list (dynamic graphs).
    InduceSubgraph,
    /// Remove all vertices and edges of a dynamic graph.
    ClearGraph,
    /// Remove all edges of a dynamic graph.
    ClearEdges,
    /// Register a read-only adjacency view over a dynamic graph.
    CreateGraphView,
    /// Merge additional vertex/edge labels into a columnar graph.
    AddLabels,
    /// Append app-context columns to a columnar graph.
    AddColumn,
    /// Marshal context columns as one ndarray to rank 0.
    ContextToNumpy,
    /// Marshal context columns as a dataframe to rank 0.
    ContextToDataframe,
    /// Write context columns to the object store as a tensor group.
    ContextToStoreTensor,
    /// Write context columns to the object store as a dataframe group.
    ContextToStoreDataframe,
    /// Marshal graph data as one ndarray to rank 0.
    GraphToNumpy,
    /// Marshal graph data as a dataframe to rank 0.
    GraphToDataframe,
    /// Register a graph or projection backend for a type signature.
    RegisterGraphType,
    /// Report the worker build configuration as JSON.
    GetEngineConfig,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateGraph => "CREATE_GRAPH",
            Self::UnloadGraph => "UNLOAD_GRAPH",
            Self::CreateApp => "CREATE_APP",
            Self::UnloadApp => "UNLOAD_APP",
            Self::RunApp => "RUN_APP",
            Self::UnloadContext => "UNLOAD_CONTEXT",
            Self::ReportGraph => "REPORT_GRAPH",
            Self::ProjectGraph => "PROJECT_GRAPH",
            Self::ProjectToSimple => "PROJECT_TO_SIMPLE",
            Self::ModifyVertices => "MODIFY_VERTICES",
            Self::ModifyEdges => "MODIFY_EDGES",
            Self::TransformGraph => "TRANSFORM_GRAPH",
            Self::CopyGraph => "COPY_GRAPH",
            Self::ToDirected => "TO_DIRECTED",
            Self::ToUndirected => "TO_UNDIRECTED",
            Self::InduceSubgraph => "INDUCE_SUBGRAPH",
            Self::ClearGraph => "CLEAR_GRAPH",
            Self::ClearEdges => "CLEAR_EDGES",
            Self::CreateGraphView => "CREATE_GRAPH_VIEW",
            Self::AddLabels => "ADD_LABELS",
            Self::AddColumn => "ADD_COLUMN",
            Self::ContextToNumpy => "CONTEXT_TO_NUMPY",
            Self::ContextToDataframe => "CONTEXT_TO_DATAFRAME",
            Self::ContextToStoreTensor => "CONTEXT_TO_STORE_TENSOR",
            Self::ContextToStoreDataframe => "CONTEXT_TO_STORE_DATAFRAME",
            Self::GraphToNumpy => "GRAPH_TO_NUMPY",
            Self::GraphToDataframe => "GRAPH_TO_DATAFRAME",
            Self::RegisterGraphType => "REGISTER_GRAPH_TYPE",
            Self::GetEngineConfig => "GET_ENGINE_CONFIG",
        };
        f.write_str(name)
    }
}

/// Keys of the command parameter table.
///
/// Closed set; handlers look keys up through the typed accessors on
/// [`Command`], so a missing or mistyped parameter surfaces as a
/// [`ProtoError`] with the key name in the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ParamKey {
    /// Target [`GraphKind`] of a create/register operation.
    GraphKind,
    /// Destination [`GraphKind`] of a transform.
    DstGraphKind,
    /// Registry key of the target graph.
    GraphName,
    /// Registry key of the target app instance.
    AppName,
    /// Registry key of the target context.
    ContextName,
    /// Algorithm name to instantiate from the app catalog.
    AlgoName,
    /// Library path an app factory was registered under.
    AppLibraryPath,
    /// Library path a graph backend factory was registered under.
    GraphLibraryPath,
    /// Frozen type signature of a graph/projection backend.
    TypeSignature,
    /// Whether a created graph is directed.
    Directed,
    /// Whether loading assigns dense edge ids.
    GenerateEid,
    /// Object-store id of an already-loaded fragment group.
    StoreId,
    /// Inline fragment tables (CBOR blob) for store-less loading.
    FragmentData,
    /// Mutation verb for modify commands: `add`, `del`, or `update`.
    ModifyKind,
    /// Vertex items (JSON array) for modify/induce commands.
    Nodes,
    /// Edge items (JSON array) for modify/induce commands.
    Edges,
    /// Properties applied to every item of a modify batch (JSON object).
    CommonAttrs,
    /// Copy flavor: `identical` or `reverse`.
    CopyKind,
    /// View flavor: `reversed` or `both`.
    ViewKind,
    /// Vertex label selected by a projection.
    VertexLabel,
    /// Edge label selected by a projection.
    EdgeLabel,
    /// Vertex property selected by a projection.
    VertexProp,
    /// Edge property selected by a projection.
    EdgeProp,
    /// Label-to-properties map (JSON) for property projection.
    VertexCollections,
    /// Label-to-properties map (JSON) for property projection.
    EdgeCollections,
    /// Output column selectors (JSON).
    Selector,
    /// Optional `[lower, upper)` vertex id range (JSON pair).
    VertexRange,
    /// Concatenation axis for ndarray marshalling.
    Axis,
    /// Sub-operation of a `REPORT_GRAPH` query.
    ReportKind,
    /// Arguments of a `REPORT_GRAPH` query (JSON).
    ReportArgs,
    /// Vertex label id a dynamic-to-columnar transform assigns by default.
    DefaultLabelId,
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GraphKind => "graph_kind",
            Self::DstGraphKind => "dst_graph_kind",
            Self::GraphName => "graph_name",
            Self::AppName => "app_name",
            Self::ContextName => "context_name",
            Self::AlgoName => "algo_name",
            Self::AppLibraryPath => "app_library_path",
            Self::GraphLibraryPath => "graph_library_path",
            Self::TypeSignature => "type_signature",
            Self::Directed => "directed",
            Self::GenerateEid => "generate_eid",
            Self::StoreId => "store_id",
            Self::FragmentData => "fragment_data",
            Self::ModifyKind => "modify_kind",
            Self::Nodes => "nodes",
            Self::Edges => "edges",
            Self::CommonAttrs => "common_attrs",
            Self::CopyKind => "copy_kind",
            Self::ViewKind => "view_kind",
            Self::VertexLabel => "vertex_label",
            Self::EdgeLabel => "edge_label",
            Self::VertexProp => "vertex_prop",
            Self::EdgeProp => "edge_prop",
            Self::VertexCollections => "vertex_collections",
            Self::EdgeCollections => "edge_collections",
            Self::Selector => "selector",
            Self::VertexRange => "vertex_range",
            Self::Axis => "axis",
            Self::ReportKind => "report_kind",
            Self::ReportArgs => "report_args",
            Self::DefaultLabelId => "default_label_id",
        };
        f.write_str(name)
    }
}

/// One parameter value: a closed tagged union.
///
/// `Json` carries sub-payloads whose shape is command-specific (item
/// batches, selectors, ranges); everything else is scalar and typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    I64(i64),
    /// Unsigned integer (store ids, counters).
    U64(u64),
    /// Floating-point scalar.
    F64(f64),
    /// UTF-8 string.
    Str(String),
    /// List of UTF-8 strings.
    StrList(Vec<String>),
    /// Opaque CBOR sub-payload.
    Blob(Vec<u8>),
    /// JSON text, parsed by the receiving handler.
    Json(String),
}

impl ParamValue {
    /// Variant name used in type-mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::I64(_) => "i64",
            Self::U64(_) => "u64",
            Self::F64(_) => "f64",
            Self::Str(_) => "string",
            Self::StrList(_) => "string list",
            Self::Blob(_) => "blob",
            Self::Json(_) => "json",
        }
    }
}

/// Positional arguments forwarded verbatim to an app's `query` entry point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryArgs {
    /// Arguments in call order.
    pub args: Vec<ParamValue>,
}

/// One command of the SPMD stream.
///
/// All ranks decode the same envelope; rank-dependent behavior comes only
/// from the worker's own rank, never from the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Operation to perform.
    pub kind: CommandKind,
    /// Typed parameter table.
    pub params: BTreeMap<ParamKey, ParamValue>,
    /// Positional app arguments (empty unless `kind` is `RunApp`).
    pub query_args: QueryArgs,
}

impl Command {
    /// Start an envelope for `kind` with an empty parameter table.
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
            query_args: QueryArgs::default(),
        }
    }

    /// Add one parameter (builder style).
    #[must_use]
    pub fn with_param(mut self, key: ParamKey, value: ParamValue) -> Self {
        self.params.insert(key, value);
        self
    }

    /// Replace the positional app arguments (builder style).
    #[must_use]
    pub fn with_args(mut self, args: Vec<ParamValue>) -> Self {
        self.query_args = QueryArgs { args };
        self
    }

    /// Raw lookup.
    pub fn param(&self, key: ParamKey) -> Option<&ParamValue> {
        self.params.get(&key)
    }

    /// Required string parameter.
    ///
    /// # Errors
    /// [`ProtoError::MissingParam`] when absent, [`ProtoError::ParamType`]
    /// when present with another variant.
    pub fn param_str(&self, key: ParamKey) -> Result<&str, ProtoError> {
        match self.params.get(&key) {
            Some(ParamValue::Str(s)) => Ok(s),
            Some(_) => Err(ProtoError::ParamType {
                key,
                expected: "string",
            }),
            None => Err(ProtoError::MissingParam(key)),
        }
    }

    /// Required boolean parameter.
    ///
    /// # Errors
    /// See [`Command::param_str`].
    pub fn param_bool(&self, key: ParamKey) -> Result<bool, ProtoError> {
        match self.params.get(&key) {
            Some(ParamValue::Bool(b)) => Ok(*b),
            Some(_) => Err(ProtoError::ParamType {
                key,
                expected: "bool",
            }),
            None => Err(ProtoError::MissingParam(key)),
        }
    }

    /// Required signed-integer parameter.
    ///
    /// # Errors
    /// See [`Command::param_str`].
    pub fn param_i64(&self, key: ParamKey) -> Result<i64, ProtoError> {
        match self.params.get(&key) {
            Some(ParamValue::I64(v)) => Ok(*v),
            Some(_) => Err(ProtoError::ParamType { key, expected: "i64" }),
            None => Err(ProtoError::MissingParam(key)),
        }
    }

    /// Required unsigned-integer parameter.
    ///
    /// # Errors
    /// See [`Command::param_str`].
    pub fn param_u64(&self, key: ParamKey) -> Result<u64, ProtoError> {
        match self.params.get(&key) {
            Some(ParamValue::U64(v)) => Ok(*v),
            Some(_) => Err(ProtoError::ParamType { key, expected: "u64" }),
            None => Err(ProtoError::MissingParam(key)),
        }
    }

    /// Required blob parameter.
    ///
    /// # Errors
    /// See [`Command::param_str`].
    pub fn param_blob(&self, key: ParamKey) -> Result<&[u8], ProtoError> {
        match self.params.get(&key) {
            Some(ParamValue::Blob(b)) => Ok(b),
            Some(_) => Err(ProtoError::ParamType {
                key,
                expected: "blob",
            }),
            None => Err(ProtoError::MissingParam(key)),
        }
    }

    /// Required JSON parameter (returned as raw text).
    ///
    /// # Errors
    /// See [`Command::param_str`].
    pub fn param_json(&self, key: ParamKey) -> Result<&str, ProtoError> {
        match self.params.get(&key) {
            Some(ParamValue::Json(s)) => Ok(s),
            Some(_) => Err(ProtoError::ParamType {
                key,
                expected: "json",
            }),
            None => Err(ProtoError::MissingParam(key)),
        }
    }

    /// Optional string parameter.
    ///
    /// # Errors
    /// [`ProtoError::ParamType`] when present with another variant.
    pub fn opt_param_str(&self, key: ParamKey) -> Result<Option<&str>, ProtoError> {
        match self.params.get(&key) {
            Some(ParamValue::Str(s)) => Ok(Some(s)),
            Some(_) => Err(ProtoError::ParamType {
                key,
                expected: "string",
            }),
            None => Ok(None),
        }
    }

    /// Optional boolean parameter.
    ///
    /// # Errors
    /// [`ProtoError::ParamType`] when present with another variant.
    pub fn opt_param_bool(&self, key: ParamKey) -> Result<Option<bool>, ProtoError> {
        match self.params.get(&key) {
            Some(ParamValue::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(ProtoError::ParamType {
                key,
                expected: "bool",
            }),
            None => Ok(None),
        }
    }

    /// Optional signed-integer parameter.
    ///
    /// # Errors
    /// [`ProtoError::ParamType`] when present with another variant.
    pub fn opt_param_i64(&self, key: ParamKey) -> Result<Option<i64>, ProtoError> {
        match self.params.get(&key) {
            Some(ParamValue::I64(v)) => Ok(Some(*v)),
            Some(_) => Err(ProtoError::ParamType { key, expected: "i64" }),
            None => Ok(None),
        }
    }

    /// Optional unsigned-integer parameter.
    ///
    /// # Errors
    /// [`ProtoError::ParamType`] when present with another variant.
    pub fn opt_param_u64(&self, key: ParamKey) -> Result<Option<u64>, ProtoError> {
        match self.params.get(&key) {
            Some(ParamValue::U64(v)) => Ok(Some(*v)),
            Some(_) => Err(ProtoError::ParamType { key, expected: "u64" }),
            None => Ok(None),
        }
    }

    /// Optional JSON parameter.
    ///
    /// # Errors
    /// [`ProtoError::ParamType`] when present with another variant.
    pub fn opt_param_json(&self, key: ParamKey) -> Result<Option<&str>, ProtoError> {
        match self.params.get(&key) {
            Some(ParamValue::Json(s)) => Ok(Some(s)),
            Some(_) => Err(ProtoError::ParamType {
                key,
                expected: "json",
            }),
            None => Ok(None),
        }
    }

    /// Optional blob parameter.
    ///
    /// # Errors
    /// [`ProtoError::ParamType`] when present with another variant.
    pub fn opt_param_blob(&self, key: ParamKey) -> Result<Option<&[u8]>, ProtoError> {
        match self.params.get(&key) {
            Some(ParamValue::Blob(b)) => Ok(Some(b.as_slice())),
            Some(_) => Err(ProtoError::ParamType {
                key,
                expected: "blob",
            }),
            None => Ok(None),
        }
    }
}

/// Store-backed graph extension of a [`GraphDef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreExt {
    /// This rank's fragment object id.
    pub object_id: u64,
    /// Fragment-group object id (one per job, owned by rank 0).
    pub group_id: u64,
    /// Number of fragments in the group.
    pub fragments: u32,
}

/// Projection extension of a [`GraphDef`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectedExt {
    /// Registry key of the parent property graph.
    pub parent: String,
    /// Selected vertex label.
    pub v_label: String,
    /// Selected edge label.
    pub e_label: String,
    /// Selected vertex property, if any.
    pub v_prop: Option<String>,
    /// Selected edge property, if any.
    pub e_prop: Option<String>,
}

/// Kind-specific extension of a [`GraphDef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphDefExt {
    /// Fragment lives in the external object store.
    Store(StoreExt),
    /// Fragment is a projection of another registered graph.
    Projected(ProjectedExt),
}

/// Graph descriptor reported to the coordinator after graph-producing
/// commands.
///
/// The schema travels as JSON text so the coordinator side stays decoupled
/// from the worker's column representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    /// Registry key the graph was stored under.
    pub key: String,
    /// Fragment kind.
    pub kind: GraphKind,
    /// Whether edges are directed.
    pub directed: bool,
    /// Whether dense edge ids were assigned at load time.
    pub generate_eid: bool,
    /// Property schema as JSON.
    pub schema_json: String,
    /// Kind-specific extension.
    pub ext: Option<GraphDefExt>,
}

/// How the coordinator folds per-rank results into one reply.
///
/// Advisory: aggregation happens coordinator-side, workers only tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregatePolicy {
    /// Concatenate all per-rank payloads in rank order.
    #[default]
    Concat,
    /// Keep rank 0's payload, drop the rest.
    PickFirst,
    /// Keep the lowest-ranked non-empty payload.
    PickFirstNonEmpty,
}

/// Payload of one rank's [`DispatchResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultPayload {
    /// Nothing to report.
    Empty,
    /// A graph descriptor.
    Graph(GraphDef),
    /// UTF-8 text (JSON reports, store ids).
    Text(String),
    /// Marshalled archive bytes (rank 0 carries the assembled result).
    Archive(Vec<u8>),
}

/// One rank's answer to one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Responding rank.
    pub rank: u32,
    /// Aggregation hint for the coordinator.
    pub policy: AggregatePolicy,
    /// The payload itself.
    pub payload: ResultPayload,
}

impl DispatchResult {
    /// Empty `Concat` result (the common "done, nothing to say" shape).
    pub fn empty(rank: u32) -> Self {
        Self {
            rank,
            policy: AggregatePolicy::Concat,
            payload: ResultPayload::Empty,
        }
    }

    /// Graph descriptor under `PickFirst` (identical on every rank).
    pub fn graph(rank: u32, def: GraphDef) -> Self {
        Self {
            rank,
            policy: AggregatePolicy::PickFirst,
            payload: ResultPayload::Graph(def),
        }
    }

    /// Text payload with an explicit policy.
    pub fn text(rank: u32, text: String, policy: AggregatePolicy) -> Self {
        Self {
            rank,
            policy,
            payload: ResultPayload::Text(text),
        }
    }

    /// Archive payload with an explicit policy.
    pub fn archive(rank: u32, bytes: Vec<u8>, policy: AggregatePolicy) -> Self {
        Self {
            rank,
            policy,
            payload: ResultPayload::Archive(bytes),
        }
    }

    /// False for `Empty`, empty text, and empty archives.
    ///
    /// The `PickFirstNonEmpty` policy keys off this.
    pub fn has_payload(&self) -> bool {
        match &self.payload {
            ResultPayload::Empty => false,
            ResultPayload::Graph(_) => true,
            ResultPayload::Text(s) => !s.is_empty(),
            ResultPayload::Archive(b) => !b.is_empty(),
        }
    }
}

/// Error category a failed command reports.
///
/// Mirrors the worker error taxonomy one-to-one; `Internal` covers
/// collaborator faults (store, transport) that have no user-facing
/// category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Malformed or out-of-domain argument.
    InvalidValue,
    /// Operation not meaningful for the target's kind.
    InvalidOperation,
    /// Key not present in the registry.
    NotFound,
    /// Registry object exists but has another type.
    InvalidCast,
    /// Unsupported or mismatched column/property type.
    DataType,
    /// Cross-rank or cross-object consistency violation.
    IllegalState,
    /// Recognized but unsupported operation.
    Unimplemented,
    /// Collaborator failure (store, transport, codec).
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidValue => "invalid value",
            Self::InvalidOperation => "invalid operation",
            Self::NotFound => "not found",
            Self::InvalidCast => "invalid cast",
            Self::DataType => "data type",
            Self::IllegalState => "illegal state",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Terminal status of one command on one rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchOutcome {
    /// Command succeeded; payload attached.
    Success(DispatchResult),
    /// Command failed; category + message attached.
    Failure {
        /// Responding rank.
        rank: u32,
        /// Taxonomy category.
        category: ErrorCategory,
        /// Human-readable detail.
        message: String,
    },
}

impl DispatchOutcome {
    /// True when this outcome carries a [`DispatchResult`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_distinguish_missing_from_mistyped() {
        let cmd = Command::new(CommandKind::CreateGraph)
            .with_param(ParamKey::GraphName, ParamValue::Str("graph_1".into()));

        assert_eq!(cmd.param_str(ParamKey::GraphName), Ok("graph_1"));
        assert_eq!(
            cmd.param_str(ParamKey::AppName),
            Err(ProtoError::MissingParam(ParamKey::AppName))
        );
        assert_eq!(
            cmd.param_bool(ParamKey::GraphName),
            Err(ProtoError::ParamType {
                key: ParamKey::GraphName,
                expected: "bool",
            })
        );
    }

    #[test]
    fn optional_accessors_pass_through_absence() {
        let cmd = Command::new(CommandKind::ContextToNumpy);
        assert_eq!(cmd.opt_param_json(ParamKey::VertexRange), Ok(None));
        assert_eq!(cmd.opt_param_i64(ParamKey::Axis), Ok(None));
    }

    #[test]
    fn param_errors_name_the_key() {
        let err = ProtoError::MissingParam(ParamKey::DstGraphKind);
        assert_eq!(err.to_string(), "missing required parameter: dst_graph_kind");

        let err = ProtoError::ParamType {
            key: ParamKey::Axis,
            expected: "i64",
        };
        assert_eq!(err.to_string(), "parameter axis is not a i64");
    }

    #[test]
    fn command_kinds_render_like_coordinator_verbs() {
        assert_eq!(CommandKind::CreateGraph.to_string(), "CREATE_GRAPH");
        assert_eq!(CommandKind::GetEngineConfig.to_string(), "GET_ENGINE_CONFIG");
        assert_eq!(GraphKind::DynamicProperty.to_string(), "DYNAMIC_PROPERTY");
    }

    #[test]
    fn empty_payload_detection_drives_pick_first_non_empty() {
        assert!(!DispatchResult::empty(0).has_payload());
        assert!(!DispatchResult::text(1, String::new(), AggregatePolicy::PickFirstNonEmpty)
            .has_payload());
        assert!(DispatchResult::text(1, "{}".into(), AggregatePolicy::PickFirstNonEmpty)
            .has_payload());
        assert!(!DispatchResult::archive(2, Vec::new(), AggregatePolicy::Concat).has_payload());
    }

    #[test]
    fn graph_kind_predicates_partition_the_four_kinds() {
        // Given: all four kinds.
        let kinds = [
            GraphKind::ArrowProperty,
            GraphKind::ArrowProjected,
            GraphKind::DynamicProperty,
            GraphKind::DynamicProjected,
        ];
        // Expect: property/projected are complementary, dynamic picks two.
        for k in kinds {
            assert_ne!(k.is_property(), k.is_projected());
        }
        assert!(GraphKind::DynamicProperty.is_dynamic());
        assert!(GraphKind::DynamicProjected.is_dynamic());
        assert!(!GraphKind::ArrowProperty.is_dynamic());
    }
}
