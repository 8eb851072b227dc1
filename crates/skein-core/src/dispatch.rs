// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Command dispatch.
//!
//! One engine runs per rank and every rank receives the identical
//! command stream, so each handler doubles as a collective: parameter
//! validation happens before any group call, and object keys derive
//! from a counter advanced exactly once per command. A command that
//! fails on every rank alike therefore leaves every registry unchanged
//! and every counter aligned, and the next command names the same
//! objects everywhere.

use std::sync::Arc;

use bytes::Bytes;
use skein_comm::Collective;
use skein_proto::{
    AggregatePolicy, Command, CommandKind, DispatchOutcome, DispatchResult, GraphKind, ParamKey,
    ParamValue, ProtoError,
};
use skein_store::{group_member_key, ObjectId, ObjectStore};
use tracing::{info, instrument, warn};

use crate::app::AppCatalog;
use crate::backend::{
    BackendCatalog, PropertyBackend, PropertySource, ProjectionBackend, ProjectionRequest,
    UtilityObject,
};
use crate::columnar::FragmentDataSet;
use crate::config::EngineConfig;
use crate::context::ContextKind;
use crate::error::EngineError;
use crate::registry::{EngineObject, ObjectRegistry};
use crate::schema::DEFAULT_LABEL;
use crate::selector::VertexRange;
use crate::wrapper::{ColumnarWrapper, FragmentHandle, FragmentWrapper};

#[cfg(feature = "dynamic")]
use rustc_hash::FxHashSet;

#[cfg(feature = "dynamic")]
use crate::convert;
#[cfg(feature = "dynamic")]
use crate::dynamic::{edge_item, vertex_item, AttrMap, DynamicFragment, ModifyKind, ViewMode};
#[cfg(feature = "dynamic")]
use crate::value::DynValue;
#[cfg(feature = "dynamic")]
use crate::vmap::gid_fid;
#[cfg(feature = "dynamic")]
use crate::wrapper::{DynamicWrapper, ReportRequest};

/// Per-rank engine state: the comm group, the store collaborator, the
/// object registry, and the catalogs commands draw on.
///
/// The engine itself keeps no state between commands beyond the
/// registry and the key counter; whatever a command needs arrives in
/// its parameter table.
pub struct GraphEngine<C: Collective> {
    comm: C,
    store: Arc<dyn ObjectStore>,
    registry: ObjectRegistry,
    apps: AppCatalog,
    backends: BackendCatalog,
    config: EngineConfig,
    seq: u64,
}

impl<C: Collective> GraphEngine<C> {
    /// Engine over `comm` and `store` with the builtin catalogs.
    pub fn new(comm: C, store: Arc<dyn ObjectStore>, config: EngineConfig) -> Self {
        Self::with_catalogs(
            comm,
            store,
            config,
            AppCatalog::builtin(),
            BackendCatalog::builtin(),
        )
    }

    /// Engine with caller-assembled catalogs.
    pub fn with_catalogs(
        comm: C,
        store: Arc<dyn ObjectStore>,
        config: EngineConfig,
        apps: AppCatalog,
        backends: BackendCatalog,
    ) -> Self {
        Self {
            comm,
            store,
            registry: ObjectRegistry::new(),
            apps,
            backends,
            config,
            seq: 0,
        }
    }

    /// This rank.
    pub fn rank(&self) -> u32 {
        self.comm.spec().rank
    }

    /// Objects this rank holds.
    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// The running configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one command, folding errors into a reportable outcome.
    #[instrument(skip(self, cmd), fields(rank = self.rank(), kind = %cmd.kind))]
    pub fn execute(&mut self, cmd: &Command) -> DispatchOutcome {
        match self.on_command(cmd) {
            Ok(result) => DispatchOutcome::Success(result),
            Err(e) => {
                warn!("command failed: {e}");
                e.into_outcome(self.rank())
            }
        }
    }

    /// Run one command.
    ///
    /// The key counter advances exactly once, before any work, so a
    /// failing command cannot desynchronize object names across ranks.
    ///
    /// # Errors
    /// Per-command validation and execution failures. The registry is
    /// never left partially updated: registration is the last step of
    /// every handler.
    pub fn on_command(&mut self, cmd: &Command) -> Result<DispatchResult, EngineError> {
        self.seq += 1;
        let id = self.seq;
        match cmd.kind {
            CommandKind::CreateGraph => self.create_graph(cmd, id),
            CommandKind::UnloadGraph => self.unload_graph(cmd),
            CommandKind::CreateApp => self.create_app(cmd, id),
            CommandKind::UnloadApp => self.unload_app(cmd),
            CommandKind::RunApp => self.run_app(cmd, id),
            CommandKind::UnloadContext => self.unload_context(cmd),
            CommandKind::ProjectGraph => self.project_graph(cmd, id),
            CommandKind::ProjectToSimple => self.project_to_simple(cmd, id),
            CommandKind::CopyGraph => self.copy_graph(cmd, id),
            CommandKind::AddLabels => self.add_labels(cmd, id),
            CommandKind::AddColumn => self.add_column(cmd, id),
            CommandKind::ContextToNumpy => self.context_to_numpy(cmd),
            CommandKind::ContextToDataframe => self.context_to_dataframe(cmd),
            CommandKind::ContextToStoreTensor => self.context_to_store_tensor(cmd),
            CommandKind::ContextToStoreDataframe => self.context_to_store_dataframe(cmd),
            CommandKind::GraphToNumpy => self.graph_to_numpy(cmd),
            CommandKind::GraphToDataframe => self.graph_to_dataframe(cmd),
            CommandKind::RegisterGraphType => self.register_graph_type(cmd),
            CommandKind::GetEngineConfig => Ok(self.engine_config()),
            #[cfg(feature = "dynamic")]
            CommandKind::ReportGraph => self.report_graph(cmd),
            #[cfg(feature = "dynamic")]
            CommandKind::ModifyVertices => self.modify_graph(cmd, false),
            #[cfg(feature = "dynamic")]
            CommandKind::ModifyEdges => self.modify_graph(cmd, true),
            #[cfg(feature = "dynamic")]
            CommandKind::TransformGraph => self.transform_graph(cmd, id),
            #[cfg(feature = "dynamic")]
            CommandKind::ToDirected => self.reorient(cmd, id, true),
            #[cfg(feature = "dynamic")]
            CommandKind::ToUndirected => self.reorient(cmd, id, false),
            #[cfg(feature = "dynamic")]
            CommandKind::InduceSubgraph => self.induce_subgraph(cmd, id),
            #[cfg(feature = "dynamic")]
            CommandKind::ClearGraph => self.clear_graph(cmd, false),
            #[cfg(feature = "dynamic")]
            CommandKind::ClearEdges => self.clear_graph(cmd, true),
            #[cfg(feature = "dynamic")]
            CommandKind::CreateGraphView => self.create_graph_view(cmd, id),
            #[cfg(not(feature = "dynamic"))]
            CommandKind::ReportGraph
            | CommandKind::ModifyVertices
            | CommandKind::ModifyEdges
            | CommandKind::TransformGraph
            | CommandKind::ToDirected
            | CommandKind::ToUndirected
            | CommandKind::InduceSubgraph
            | CommandKind::ClearGraph
            | CommandKind::ClearEdges
            | CommandKind::CreateGraphView => Err(needs_dynamic(cmd.kind)),
        }
    }

    /// The property backend for `kind`: one registered under the
    /// command's type signature when given, the builtin one otherwise.
    fn property_backend(
        &self,
        kind: GraphKind,
        cmd: &Command,
    ) -> Result<Arc<dyn PropertyBackend>, EngineError> {
        let utility = match cmd.opt_param_str(ParamKey::TypeSignature)? {
            Some(sig) => self.registry.get_utility(sig)?,
            None => self.backends.resolve(kind)?,
        };
        match utility {
            UtilityObject::Property(backend) => Ok(backend),
            UtilityObject::Projection(_) => Err(EngineError::InvalidCast(format!(
                "backend for {kind} graphs is a projector, expected a property builder"
            ))),
        }
    }

    fn projection_backend(
        &self,
        kind: GraphKind,
        cmd: &Command,
    ) -> Result<Arc<dyn ProjectionBackend>, EngineError> {
        let utility = match cmd.opt_param_str(ParamKey::TypeSignature)? {
            Some(sig) => self.registry.get_utility(sig)?,
            None => self.backends.resolve(kind)?,
        };
        match utility {
            UtilityObject::Projection(backend) => Ok(backend),
            UtilityObject::Property(_) => Err(EngineError::InvalidCast(format!(
                "backend for {kind} graphs is a property builder, expected a projector"
            ))),
        }
    }

    fn create_graph(&mut self, cmd: &Command, id: u64) -> Result<DispatchResult, EngineError> {
        let kind = parse_graph_kind(cmd.param_str(ParamKey::GraphKind)?)?;
        let key = format!("graph_{id}");
        let wrapper = match kind {
            GraphKind::ArrowProperty => {
                let backend = self.property_backend(kind, cmd)?;
                let decoded = match cmd.opt_param_blob(ParamKey::FragmentData)? {
                    Some(bytes) => Some(FragmentDataSet::from_cbor(bytes)?),
                    None => None,
                };
                let source = if let Some(raw) = cmd.opt_param_u64(ParamKey::StoreId)? {
                    PropertySource::Store(ObjectId(raw))
                } else if let Some(set) = decoded.as_ref() {
                    let generate_eid = cmd.opt_param_bool(ParamKey::GenerateEid)?.unwrap_or(false);
                    PropertySource::Inline(set, generate_eid)
                } else {
                    PropertySource::Empty {
                        directed: cmd.opt_param_bool(ParamKey::Directed)?.unwrap_or(true),
                    }
                };
                backend.create(&self.comm, self.store.as_ref(), &key, source)?
            }
            #[cfg(feature = "dynamic")]
            GraphKind::DynamicProperty => {
                let directed = cmd.param_bool(ParamKey::Directed)?;
                let backend = self.property_backend(kind, cmd)?;
                backend.create(
                    &self.comm,
                    self.store.as_ref(),
                    &key,
                    PropertySource::Empty { directed },
                )?
            }
            #[cfg(not(feature = "dynamic"))]
            GraphKind::DynamicProperty => return Err(needs_dynamic(cmd.kind)),
            other => {
                return Err(EngineError::InvalidValue(format!(
                    "unsupported graph type {other}"
                )))
            }
        };
        let def = wrapper.graph_def();
        self.registry.put(key, EngineObject::Fragment(wrapper))?;
        info!("graph {} loaded", def.key);
        Ok(DispatchResult::graph(self.rank(), def))
    }

    /// Drops a graph, first deleting its store footprint when the
    /// coordinator passed the group id. Deletion is parameter-driven
    /// because copies share fragment objects with their source; only
    /// the host knows when the last reference goes away.
    fn unload_graph(&mut self, cmd: &Command) -> Result<DispatchResult, EngineError> {
        let key = cmd.param_str(ParamKey::GraphName)?;
        self.registry.get_fragment(key)?;
        if let Some(raw) = cmd.opt_param_u64(ParamKey::StoreId)? {
            let group = ObjectId(raw);
            if let Some(meta) = self.store.get_meta(group)? {
                if let Some(member) = meta.member(&group_member_key(self.rank())) {
                    self.store.del_data(&[member])?;
                }
            }
            self.comm.barrier()?;
            if self.comm.spec().is_coordinator() {
                self.store.del_data(&[group])?;
            }
        }
        self.registry.remove(key)?;
        info!("graph {key} dropped");
        Ok(DispatchResult::empty(self.rank()))
    }

    fn create_app(&mut self, cmd: &Command, id: u64) -> Result<DispatchResult, EngineError> {
        let name = match cmd.opt_param_str(ParamKey::AlgoName)? {
            Some(name) => name,
            None => cmd.param_str(ParamKey::AppLibraryPath)?,
        };
        let app = self.apps.create(name)?;
        let key = format!("app_{id}");
        self.registry.put(key.as_str(), EngineObject::App(app))?;
        Ok(DispatchResult::text(
            self.rank(),
            key,
            AggregatePolicy::PickFirst,
        ))
    }

    fn unload_app(&mut self, cmd: &Command) -> Result<DispatchResult, EngineError> {
        let key = cmd.param_str(ParamKey::AppName)?;
        self.registry.get_app(key)?;
        self.registry.remove(key)?;
        Ok(DispatchResult::empty(self.rank()))
    }

    fn run_app(&mut self, cmd: &Command, id: u64) -> Result<DispatchResult, EngineError> {
        let app = self.registry.get_app(cmd.param_str(ParamKey::AppName)?)?;
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        if !app.compatible(wrapper.kind()) {
            return Err(EngineError::InvalidOperation(format!(
                "app {} cannot run on {} graphs",
                app.name(),
                wrapper.kind()
            )));
        }
        let args = cmd
            .query_args
            .args
            .iter()
            .find_map(|v| match v {
                ParamValue::Str(s) | ParamValue::Json(s) => Some(s.as_str()),
                _ => None,
            })
            .unwrap_or("");
        let ctx = app.query(&wrapper.handle(), args, &self.comm)?;
        let context_type = ctx.kind().name();
        let key = format!("ctx_{id}");
        let body = serde_json::json!({
            "context_type": context_type,
            "context_key": key,
        })
        .to_string();
        self.registry
            .put(key, EngineObject::Context(Arc::new(ctx)))?;
        Ok(DispatchResult::text(
            self.rank(),
            body,
            AggregatePolicy::PickFirst,
        ))
    }

    fn unload_context(&mut self, cmd: &Command) -> Result<DispatchResult, EngineError> {
        let key = cmd.param_str(ParamKey::ContextName)?;
        self.registry.get_context(key)?;
        self.registry.remove(key)?;
        Ok(DispatchResult::empty(self.rank()))
    }

    #[cfg(feature = "dynamic")]
    fn report_graph(&self, cmd: &Command) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let req = ReportRequest::parse(
            cmd.param_str(ParamKey::ReportKind)?,
            cmd.opt_param_json(ParamKey::ReportArgs)?.unwrap_or(""),
        )?;
        let body = wrapper.report(&self.comm, &req)?;
        Ok(DispatchResult::text(
            self.rank(),
            body,
            AggregatePolicy::PickFirstNonEmpty,
        ))
    }

    /// Restricts a columnar graph to a label/property subset and
    /// persists the result as a graph of its own.
    fn project_graph(&mut self, cmd: &Command, id: u64) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let FragmentHandle::Columnar(frag) = wrapper.handle() else {
            return Err(EngineError::InvalidOperation(format!(
                "label projection is only available for {} graphs",
                GraphKind::ArrowProperty
            )));
        };
        let vertex_keep =
            parse_collections(cmd.param_json(ParamKey::VertexCollections)?, "vertex")?;
        let edge_keep = parse_collections(cmd.param_json(ParamKey::EdgeCollections)?, "edge")?;
        let cut = frag.restrict(&vertex_keep, &edge_keep)?;
        let handles = cut.persist(self.store.as_ref(), &self.comm)?;
        let key = format!("graph_{id}");
        let built = Arc::new(ColumnarWrapper::new(
            key.as_str(),
            Arc::new(cut),
            Some(handles),
        ));
        let def = built.graph_def();
        self.registry.put(key, EngineObject::Fragment(built))?;
        Ok(DispatchResult::graph(self.rank(), def))
    }

    fn project_to_simple(&mut self, cmd: &Command, id: u64) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let dst_kind = match wrapper.kind() {
            GraphKind::ArrowProperty => GraphKind::ArrowProjected,
            GraphKind::DynamicProperty => GraphKind::DynamicProjected,
            other => {
                return Err(EngineError::InvalidOperation(format!(
                    "cannot project {other} graphs"
                )))
            }
        };
        let backend = self.projection_backend(dst_kind, cmd)?;
        let req = ProjectionRequest {
            v_label: cmd
                .opt_param_str(ParamKey::VertexLabel)?
                .unwrap_or(DEFAULT_LABEL)
                .to_owned(),
            e_label: cmd
                .opt_param_str(ParamKey::EdgeLabel)?
                .unwrap_or(DEFAULT_LABEL)
                .to_owned(),
            v_prop: cmd
                .opt_param_str(ParamKey::VertexProp)?
                .map(ToOwned::to_owned),
            e_prop: cmd
                .opt_param_str(ParamKey::EdgeProp)?
                .map(ToOwned::to_owned),
        };
        let key = format!("graph_projected_{id}");
        let projected = backend.project(&self.comm, &wrapper.handle(), wrapper.key(), &key, &req)?;
        let def = projected.graph_def();
        self.registry.put(key, EngineObject::Fragment(projected))?;
        Ok(DispatchResult::graph(self.rank(), def))
    }

    #[cfg(feature = "dynamic")]
    fn modify_graph(&mut self, cmd: &Command, edges: bool) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let frag = dynamic_target(&wrapper)?;
        let kind = ModifyKind::parse(cmd.param_str(ParamKey::ModifyKind)?)?;
        let common = match cmd.opt_param_json(ParamKey::CommonAttrs)? {
            Some(raw) => json_attrs(raw)?,
            None => AttrMap::new(),
        };
        if edges {
            let items = json_items(cmd.param_json(ParamKey::Edges)?, ParamKey::Edges)?;
            frag.modify_edges(kind, &items, &common)?;
        } else {
            let items = json_items(cmd.param_json(ParamKey::Nodes)?, ParamKey::Nodes)?;
            frag.modify_vertices(kind, &items, &common)?;
        }
        Ok(DispatchResult::empty(self.rank()))
    }

    #[cfg(feature = "dynamic")]
    fn transform_graph(&mut self, cmd: &Command, id: u64) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let dst_kind = parse_graph_kind(cmd.param_str(ParamKey::DstGraphKind)?)?;
        if let Some(label) = cmd.opt_param_i64(ParamKey::DefaultLabelId)? {
            if label != 0 {
                return Err(EngineError::InvalidValue(format!(
                    "default label id {label} out of range; converted graphs hold a single label"
                )));
            }
        }
        let key = format!("graph_{id}");
        let built: Arc<dyn FragmentWrapper> = match (wrapper.handle(), dst_kind) {
            (FragmentHandle::Columnar(frag), GraphKind::DynamicProperty) => {
                let converted = convert::to_dynamic(&self.comm, &frag)?;
                Arc::new(DynamicWrapper::new(key.as_str(), Arc::new(converted)))
            }
            (FragmentHandle::Dynamic(frag), GraphKind::ArrowProperty) => {
                let (converted, handles) =
                    convert::to_columnar(&self.comm, self.store.as_ref(), &frag)?;
                Arc::new(ColumnarWrapper::new(
                    key.as_str(),
                    Arc::new(converted),
                    Some(handles),
                ))
            }
            (handle, dst) => {
                return Err(EngineError::InvalidOperation(format!(
                    "unsupported conversion direction, from {} to {dst}",
                    handle.kind()
                )))
            }
        };
        let def = built.graph_def();
        self.registry.put(key, EngineObject::Fragment(built))?;
        Ok(DispatchResult::graph(self.rank(), def))
    }

    fn copy_graph(&mut self, cmd: &Command, id: u64) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let copy_kind = cmd.param_str(ParamKey::CopyKind)?;
        let key = format!("graph_{id}");
        let copied = wrapper.copy_graph(&self.comm, self.store.as_ref(), &key, copy_kind)?;
        let def = copied.graph_def();
        self.registry.put(key, EngineObject::Fragment(copied))?;
        Ok(DispatchResult::graph(self.rank(), def))
    }

    #[cfg(feature = "dynamic")]
    fn reorient(
        &mut self,
        cmd: &Command,
        id: u64,
        directed: bool,
    ) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let key = format!("graph_{id}");
        let flipped = if directed {
            wrapper.to_directed(&key)?
        } else {
            wrapper.to_undirected(&key)?
        };
        let def = flipped.graph_def();
        self.registry.put(key, EngineObject::Fragment(flipped))?;
        Ok(DispatchResult::graph(self.rank(), def))
    }

    /// Builds the subgraph induced by a vertex list or an edge list.
    ///
    /// Ownership is inherited from the source graph, so every rank can
    /// fill in its own part from local data; the vertex-map rebuild is
    /// the only exchange.
    #[cfg(feature = "dynamic")]
    fn induce_subgraph(&mut self, cmd: &Command, id: u64) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let src = dynamic_target(&wrapper)?;
        let spec = self.comm.spec();
        let sub = DynamicFragment::new(spec.rank, spec.peers, src.directed());

        let nodes = cmd.opt_param_json(ParamKey::Nodes)?;
        let edges = cmd.opt_param_json(ParamKey::Edges)?;
        let mut induced: Vec<DynValue> = Vec::new();
        let mut seen: FxHashSet<DynValue> = FxHashSet::default();
        let mut pairs: Vec<(DynValue, DynValue)> = Vec::new();
        if let Some(raw) = nodes {
            for item in json_items(raw, ParamKey::Nodes)? {
                let (oid, _) = vertex_item(&item)?;
                if seen.insert(oid.clone()) {
                    induced.push(oid);
                }
            }
        } else if let Some(raw) = edges {
            for item in json_items(raw, ParamKey::Edges)? {
                let (u, v, _) = edge_item(&item)?;
                for oid in [&u, &v] {
                    if src.has_node(oid) && seen.insert((*oid).clone()) {
                        induced.push((*oid).clone());
                    }
                }
                pairs.push((u, v));
            }
        }

        for oid in &induced {
            let Some(gid) = src.gid_of(oid) else { continue };
            if !src.has_node(oid) || gid_fid(gid) != spec.rank {
                continue;
            }
            sub.add_own_vertex(oid.clone(), src.node_attrs(gid))?;
        }
        sub.construct_vmap(&self.comm)?;

        if nodes.is_some() {
            // Edges survive when both endpoints made it into the new map.
            for oid in &induced {
                let Some(gid) = src.gid_of(oid) else { continue };
                if !src.has_node(oid) || gid_fid(gid) != spec.rank {
                    continue;
                }
                for (nbr, attrs) in src.out_entries(gid) {
                    let Some(nbr_oid) = src.oid_of(nbr) else { continue };
                    if sub.has_node(&nbr_oid) {
                        sub.install_edge(oid, &nbr_oid, attrs)?;
                    }
                }
                if src.directed() {
                    for (from, attrs) in src.in_entries(gid) {
                        let Some(from_oid) = src.oid_of(from) else { continue };
                        if sub.has_node(&from_oid) {
                            sub.install_edge(&from_oid, oid, attrs)?;
                        }
                    }
                }
            }
        } else {
            // Listed pairs survive when the source holds them; endpoint
            // owners answer and install, everyone else skips.
            for (u, v) in &pairs {
                if src.has_edge(u, v, ViewMode::AsIs) != Some(true) {
                    continue;
                }
                let data = match src.edge_data(u, v, ViewMode::AsIs) {
                    Some(DynValue::Map(attrs)) => attrs,
                    _ => AttrMap::new(),
                };
                sub.install_edge(u, v, data)?;
            }
        }

        let key = format!("induced_graph_{id}");
        let built = Arc::new(DynamicWrapper::new(key.as_str(), Arc::new(sub)));
        let def = built.graph_def();
        self.registry.put(key, EngineObject::Fragment(built))?;
        Ok(DispatchResult::graph(self.rank(), def))
    }

    #[cfg(feature = "dynamic")]
    fn clear_graph(
        &mut self,
        cmd: &Command,
        edges_only: bool,
    ) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let frag = dynamic_target(&wrapper)?;
        if edges_only {
            frag.clear_edges();
        } else {
            frag.clear();
        }
        Ok(DispatchResult::empty(self.rank()))
    }

    #[cfg(feature = "dynamic")]
    fn create_graph_view(&mut self, cmd: &Command, id: u64) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let key = format!("graph_view_{id}");
        let view = wrapper.create_view(&key, cmd.param_str(ParamKey::ViewKind)?)?;
        let def = view.graph_def();
        self.registry.put(key, EngineObject::Fragment(view))?;
        Ok(DispatchResult::graph(self.rank(), def))
    }

    fn add_labels(&mut self, cmd: &Command, id: u64) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let backend = self.property_backend(GraphKind::ArrowProperty, cmd)?;
        let data = FragmentDataSet::from_cbor(cmd.param_blob(ParamKey::FragmentData)?)?;
        let key = format!("graph_{id}");
        let grown = backend.add_labels(
            &self.comm,
            self.store.as_ref(),
            &wrapper.handle(),
            &key,
            &data,
        )?;
        let def = grown.graph_def();
        self.registry.put(key, EngineObject::Fragment(grown))?;
        Ok(DispatchResult::graph(self.rank(), def))
    }

    fn add_column(&mut self, cmd: &Command, id: u64) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let ctx = self
            .registry
            .get_context(cmd.param_str(ParamKey::ContextName)?)?;
        let key = format!("graph_{id}");
        let grown = wrapper.add_column(
            &self.comm,
            self.store.as_ref(),
            &key,
            &ctx,
            selector_arg(cmd)?,
        )?;
        let def = grown.graph_def();
        self.registry.put(key, EngineObject::Fragment(grown))?;
        Ok(DispatchResult::graph(self.rank(), def))
    }

    fn context_to_numpy(&self, cmd: &Command) -> Result<DispatchResult, EngineError> {
        let ctx = self
            .registry
            .get_context(cmd.param_str(ParamKey::ContextName)?)?;
        let bytes = match ctx.kind() {
            ContextKind::Tensor => ctx.tensor_to_ndarray(
                &self.comm,
                cmd.opt_param_i64(ParamKey::Axis)?.unwrap_or(0),
            )?,
            _ => ctx.to_ndarray(&self.comm, selector_arg(cmd)?, &vertex_range(cmd)?)?,
        };
        Ok(DispatchResult::archive(
            self.rank(),
            archive_bytes(bytes),
            AggregatePolicy::PickFirst,
        ))
    }

    fn context_to_dataframe(&self, cmd: &Command) -> Result<DispatchResult, EngineError> {
        let ctx = self
            .registry
            .get_context(cmd.param_str(ParamKey::ContextName)?)?;
        let bytes = match ctx.kind() {
            ContextKind::Tensor => ctx.tensor_to_dataframe(&self.comm)?,
            _ => ctx.to_dataframe(&self.comm, selector_arg(cmd)?, &vertex_range(cmd)?)?,
        };
        Ok(DispatchResult::archive(
            self.rank(),
            archive_bytes(bytes),
            AggregatePolicy::PickFirst,
        ))
    }

    fn context_to_store_tensor(&self, cmd: &Command) -> Result<DispatchResult, EngineError> {
        let ctx = self
            .registry
            .get_context(cmd.param_str(ParamKey::ContextName)?)?;
        let group = match ctx.kind() {
            ContextKind::Tensor => ctx.tensor_store(
                &self.comm,
                self.store.as_ref(),
                cmd.opt_param_i64(ParamKey::Axis)?.unwrap_or(0),
            )?,
            _ => ctx.store_to_tensor(
                &self.comm,
                self.store.as_ref(),
                selector_arg(cmd)?,
                &vertex_range(cmd)?,
            )?,
        };
        // The group is also findable by its printed id.
        if self.comm.spec().is_coordinator() {
            self.store.put_name(group, &group.to_string())?;
        }
        Ok(DispatchResult::text(
            self.rank(),
            store_id_json(group),
            AggregatePolicy::PickFirst,
        ))
    }

    fn context_to_store_dataframe(&self, cmd: &Command) -> Result<DispatchResult, EngineError> {
        let ctx = self
            .registry
            .get_context(cmd.param_str(ParamKey::ContextName)?)?;
        let group = match ctx.kind() {
            ContextKind::Tensor => ctx.tensor_store_dataframe(&self.comm, self.store.as_ref())?,
            _ => ctx.store_to_dataframe(
                &self.comm,
                self.store.as_ref(),
                selector_arg(cmd)?,
                &vertex_range(cmd)?,
            )?,
        };
        if self.comm.spec().is_coordinator() {
            self.store.put_name(group, &group.to_string())?;
        }
        Ok(DispatchResult::text(
            self.rank(),
            store_id_json(group),
            AggregatePolicy::PickFirst,
        ))
    }

    fn graph_to_numpy(&self, cmd: &Command) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let bytes = wrapper.to_ndarray(&self.comm, selector_arg(cmd)?, &vertex_range(cmd)?)?;
        Ok(DispatchResult::archive(
            self.rank(),
            archive_bytes(bytes),
            AggregatePolicy::PickFirst,
        ))
    }

    fn graph_to_dataframe(&self, cmd: &Command) -> Result<DispatchResult, EngineError> {
        let wrapper = self
            .registry
            .get_fragment(cmd.param_str(ParamKey::GraphName)?)?;
        let bytes = wrapper.to_dataframe(&self.comm, selector_arg(cmd)?, &vertex_range(cmd)?)?;
        Ok(DispatchResult::archive(
            self.rank(),
            archive_bytes(bytes),
            AggregatePolicy::PickFirst,
        ))
    }

    /// Binds a backend under a type signature. Registering a signature
    /// that already exists is a no-op, so replayed registrations stay
    /// idempotent.
    fn register_graph_type(&mut self, cmd: &Command) -> Result<DispatchResult, EngineError> {
        let kind = parse_graph_kind(cmd.param_str(ParamKey::GraphKind)?)?;
        let sig = cmd.param_str(ParamKey::TypeSignature)?;
        if self.registry.has(sig) {
            return Ok(DispatchResult::empty(self.rank()));
        }
        let utility = self.backends.resolve(kind)?;
        self.registry.put(sig, EngineObject::Utility(utility))?;
        Ok(DispatchResult::empty(self.rank()))
    }

    fn engine_config(&self) -> DispatchResult {
        DispatchResult::text(
            self.rank(),
            self.config.report_json(),
            AggregatePolicy::PickFirst,
        )
    }
}

fn parse_graph_kind(name: &str) -> Result<GraphKind, EngineError> {
    match name {
        "ARROW_PROPERTY" => Ok(GraphKind::ArrowProperty),
        "ARROW_PROJECTED" => Ok(GraphKind::ArrowProjected),
        "DYNAMIC_PROPERTY" => Ok(GraphKind::DynamicProperty),
        "DYNAMIC_PROJECTED" => Ok(GraphKind::DynamicProjected),
        other => Err(EngineError::InvalidValue(format!(
            "unsupported graph type {other}"
        ))),
    }
}

#[cfg(not(feature = "dynamic"))]
fn needs_dynamic(kind: CommandKind) -> EngineError {
    EngineError::Unimplemented(format!(
        "{kind} requires a build with dynamic-graph support"
    ))
}

#[cfg(feature = "dynamic")]
fn dynamic_target(
    wrapper: &Arc<dyn FragmentWrapper>,
) -> Result<Arc<DynamicFragment>, EngineError> {
    match wrapper.handle() {
        FragmentHandle::Dynamic(frag) => Ok(frag),
        _ => Err(EngineError::InvalidValue(format!(
            "wrong graph kind: {}, graph id: {}",
            wrapper.kind(),
            wrapper.key()
        ))),
    }
}

#[cfg(feature = "dynamic")]
fn json_items(raw: &str, key: ParamKey) -> Result<Vec<DynValue>, EngineError> {
    let parsed: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| EngineError::InvalidValue(format!("{key} payload is not JSON: {e}")))?;
    match DynValue::from_json(&parsed) {
        DynValue::List(items) => Ok(items),
        _ => Err(EngineError::InvalidValue(format!(
            "{key} payload must be a JSON array"
        ))),
    }
}

#[cfg(feature = "dynamic")]
fn json_attrs(raw: &str) -> Result<AttrMap, EngineError> {
    let parsed: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| EngineError::InvalidValue(format!("common attributes are not JSON: {e}")))?;
    match DynValue::from_json(&parsed) {
        DynValue::Map(attrs) => Ok(attrs),
        _ => Err(EngineError::InvalidValue(
            "common attributes must be a JSON object".into(),
        )),
    }
}

/// Parse a projection selection: a JSON object keyed by label, each
/// value `null` (keep all properties) or a list of property names.
fn parse_collections(
    raw: &str,
    what: &str,
) -> Result<Vec<(String, Option<Vec<String>>)>, EngineError> {
    let parsed: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| EngineError::InvalidValue(format!("{what} selection is not JSON: {e}")))?;
    let serde_json::Value::Object(entries) = parsed else {
        return Err(EngineError::InvalidValue(format!(
            "{what} selection must be a JSON object keyed by label"
        )));
    };
    let mut keep = Vec::with_capacity(entries.len());
    for (label, props) in entries {
        let wanted = match props {
            serde_json::Value::Null => None,
            serde_json::Value::Array(names) => {
                let mut list = Vec::with_capacity(names.len());
                for name in names {
                    let serde_json::Value::String(name) = name else {
                        return Err(EngineError::InvalidValue(format!(
                            "{what} selection of {label} must list property names"
                        )));
                    };
                    list.push(name);
                }
                Some(list)
            }
            _ => {
                return Err(EngineError::InvalidValue(format!(
                    "{what} selection of {label} must be null or a property list"
                )))
            }
        };
        keep.push((label, wanted));
    }
    Ok(keep)
}

/// The selector parameter, whichever of the string forms it arrived in.
fn selector_arg(cmd: &Command) -> Result<&str, EngineError> {
    match cmd.param(ParamKey::Selector) {
        Some(ParamValue::Str(s) | ParamValue::Json(s)) => Ok(s),
        Some(_) => Err(ProtoError::ParamType {
            key: ParamKey::Selector,
            expected: "string",
        }
        .into()),
        None => Err(ProtoError::MissingParam(ParamKey::Selector).into()),
    }
}

fn vertex_range(cmd: &Command) -> Result<VertexRange, EngineError> {
    match cmd.opt_param_json(ParamKey::VertexRange)? {
        Some(raw) => VertexRange::from_json(raw),
        None => Ok(VertexRange::all()),
    }
}

fn archive_bytes(bytes: Option<Bytes>) -> Vec<u8> {
    bytes.map_or_else(Vec::new, |b| b.to_vec())
}

fn store_id_json(id: ObjectId) -> String {
    serde_json::json!({ "object_id": id.0 }).to_string()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use std::thread;

    use skein_comm::{LocalComm, LocalGroup};
    use skein_proto::{GraphDef, ResultPayload};
    use skein_store::MemoryStore;

    use super::*;
    use crate::column::Column;
    use crate::columnar::{EdgeTable, FragmentData, VertexTable};

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

    fn engine_over(comm: LocalComm) -> GraphEngine<LocalComm> {
        GraphEngine::new(comm, Arc::new(MemoryStore::new()), EngineConfig::default())
    }

    // Persisting paths group per-rank store objects on rank 0, so tests
    // that load or convert columnar graphs share one store.
    fn engine_sharing(comm: LocalComm, store: &Arc<MemoryStore>) -> GraphEngine<LocalComm> {
        GraphEngine::new(
            comm,
            Arc::<MemoryStore>::clone(store),
            EngineConfig::default(),
        )
    }

    fn graph_payload(result: DispatchResult) -> GraphDef {
        match result.payload {
            ResultPayload::Graph(def) => def,
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    fn text_payload(result: DispatchResult) -> String {
        match result.payload {
            ResultPayload::Text(s) => s,
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    fn str_param(key: ParamKey, value: &str) -> (ParamKey, ParamValue) {
        (key, ParamValue::Str(value.to_owned()))
    }

    #[test]
    fn engine_config_reports_the_running_tunables() {
        let texts = per_rank(1, |comm| {
            let mut engine = engine_over(comm);
            text_payload(
                engine
                    .on_command(&Command::new(CommandKind::GetEngineConfig))
                    .unwrap(),
            )
        });
        let parsed: serde_json::Value = serde_json::from_str(&texts[0]).unwrap();
        assert_eq!(parsed["thread_num"], 1);
        assert!(parsed["dynamic_graph"].is_string());
    }

    #[test]
    fn failures_are_typed_and_leave_the_registry_untouched() {
        per_rank(1, |comm| {
            let mut engine = engine_over(comm);
            let (key, value) = str_param(ParamKey::AlgoName, "pagerank");
            let err = engine
                .on_command(&Command::new(CommandKind::CreateApp).with_param(key, value))
                .unwrap_err();
            assert_eq!(err, EngineError::InvalidValue("unknown app: pagerank".into()));

            let (key, value) = str_param(ParamKey::GraphName, "nope");
            let err = engine
                .on_command(&Command::new(CommandKind::UnloadGraph).with_param(key, value))
                .unwrap_err();
            assert_eq!(err, EngineError::NotFound("object nope".into()));
            assert!(engine.registry().is_empty());
        });
    }

    fn city_set() -> FragmentDataSet {
        FragmentDataSet {
            directed: true,
            fragments: vec![
                FragmentData {
                    vertices: vec![VertexTable {
                        label: "person".into(),
                        oids: Column::Int64(vec![1]),
                        properties: vec![
                            ("name".into(), Column::Utf8(vec!["ada".into()])),
                            ("age".into(), Column::Int64(vec![31])),
                        ],
                    }],
                    edges: vec![EdgeTable {
                        label: "knows".into(),
                        src_label: "person".into(),
                        dst_label: "person".into(),
                        srcs: Column::Int64(vec![1]),
                        dsts: Column::Int64(vec![2]),
                        properties: Vec::new(),
                    }],
                },
                FragmentData {
                    vertices: vec![VertexTable {
                        label: "person".into(),
                        oids: Column::Int64(vec![2]),
                        properties: vec![
                            ("name".into(), Column::Utf8(vec!["bob".into()])),
                            ("age".into(), Column::Int64(vec![32])),
                        ],
                    }],
                    edges: vec![EdgeTable {
                        label: "knows".into(),
                        src_label: "person".into(),
                        dst_label: "person".into(),
                        srcs: Column::Int64(vec![]),
                        dsts: Column::Int64(vec![]),
                        properties: Vec::new(),
                    }],
                },
            ],
        }
    }

    #[test]
    fn columnar_create_then_label_projection() {
        let blob = city_set().to_cbor().unwrap();
        let store = Arc::new(MemoryStore::new());
        let schemas = per_rank(2, |comm| {
            let mut engine = engine_sharing(comm, &store);
            let create = Command::new(CommandKind::CreateGraph)
                .with_param(
                    ParamKey::GraphKind,
                    ParamValue::Str("ARROW_PROPERTY".to_owned()),
                )
                .with_param(ParamKey::FragmentData, ParamValue::Blob(blob.clone()));
            let def = graph_payload(engine.on_command(&create).unwrap());
            assert_eq!(def.key, "graph_1");
            assert_eq!(def.kind, GraphKind::ArrowProperty);
            assert!(def.directed);

            let project = Command::new(CommandKind::ProjectGraph)
                .with_param(ParamKey::GraphName, ParamValue::Str("graph_1".to_owned()))
                .with_param(
                    ParamKey::VertexCollections,
                    ParamValue::Json(r#"{"person": ["age"]}"#.to_owned()),
                )
                .with_param(
                    ParamKey::EdgeCollections,
                    ParamValue::Json(r#"{"knows": null}"#.to_owned()),
                );
            let def = graph_payload(engine.on_command(&project).unwrap());
            assert_eq!(def.key, "graph_2");
            assert_eq!(def.kind, GraphKind::ArrowProperty);
            def.schema_json
        });
        assert_eq!(schemas[0], schemas[1]);
        assert!(schemas[0].contains("age"));
        assert!(!schemas[0].contains("name"));
    }

    #[cfg(feature = "dynamic")]
    fn create_dynamic() -> Command {
        Command::new(CommandKind::CreateGraph)
            .with_param(
                ParamKey::GraphKind,
                ParamValue::Str("DYNAMIC_PROPERTY".to_owned()),
            )
            .with_param(ParamKey::Directed, ParamValue::Bool(true))
    }

    #[cfg(feature = "dynamic")]
    fn modify_edges_cmd(graph: &str, items: &str) -> Command {
        Command::new(CommandKind::ModifyEdges)
            .with_param(ParamKey::GraphName, ParamValue::Str(graph.to_owned()))
            .with_param(ParamKey::ModifyKind, ParamValue::Str("add".to_owned()))
            .with_param(ParamKey::Edges, ParamValue::Json(items.to_owned()))
    }

    #[cfg(feature = "dynamic")]
    fn report_cmd(graph: &str, kind: &str) -> Command {
        Command::new(CommandKind::ReportGraph)
            .with_param(ParamKey::GraphName, ParamValue::Str(graph.to_owned()))
            .with_param(ParamKey::ReportKind, ParamValue::Str(kind.to_owned()))
    }

    #[cfg(feature = "dynamic")]
    #[test]
    fn keys_derive_from_a_counter_that_survives_failures() {
        let defs = per_rank(2, |comm| {
            let mut engine = engine_over(comm);
            // No graph_kind parameter: fails identically on every rank.
            assert!(engine
                .on_command(&Command::new(CommandKind::CreateGraph))
                .is_err());
            graph_payload(engine.on_command(&create_dynamic()).unwrap())
        });
        assert_eq!(defs[0].key, "graph_2");
        assert_eq!(defs[1].key, "graph_2");
        assert_eq!(defs[0].kind, GraphKind::DynamicProperty);
        assert!(defs[0].directed);
    }

    #[cfg(feature = "dynamic")]
    #[test]
    fn modify_report_and_induce_run_as_collectives() {
        let answers = per_rank(2, |comm| {
            let mut engine = engine_over(comm);
            engine.on_command(&create_dynamic()).unwrap();
            engine
                .on_command(&modify_edges_cmd("graph_1", "[[1, 2], [2, 3], [3, 1], [3, 3]]"))
                .unwrap();
            let nodes = text_payload(engine.on_command(&report_cmd("graph_1", "node_num")).unwrap());

            let induce = Command::new(CommandKind::InduceSubgraph)
                .with_param(ParamKey::GraphName, ParamValue::Str("graph_1".to_owned()))
                .with_param(ParamKey::Nodes, ParamValue::Json("[1, 2]".to_owned()));
            let def = graph_payload(engine.on_command(&induce).unwrap());
            assert_eq!(def.key, "induced_graph_4");

            let sub_nodes =
                text_payload(engine.on_command(&report_cmd("induced_graph_4", "node_num")).unwrap());
            let sub_edges =
                text_payload(engine.on_command(&report_cmd("induced_graph_4", "edge_num")).unwrap());
            (nodes, sub_nodes, sub_edges)
        });
        for (nodes, sub_nodes, sub_edges) in &answers {
            assert_eq!(nodes, "3");
            assert_eq!(sub_nodes, "2");
            // Only 1->2 joins two induced vertices.
            assert_eq!(sub_edges, "1");
        }
    }

    #[cfg(feature = "dynamic")]
    #[test]
    fn transform_round_trips_between_representations() {
        let store = Arc::new(MemoryStore::new());
        let counts = per_rank(2, |comm| {
            let mut engine = engine_sharing(comm, &store);
            engine.on_command(&create_dynamic()).unwrap();
            engine
                .on_command(&modify_edges_cmd("graph_1", "[[1, 2], [2, 3]]"))
                .unwrap();

            let to_columnar = Command::new(CommandKind::TransformGraph)
                .with_param(ParamKey::GraphName, ParamValue::Str("graph_1".to_owned()))
                .with_param(
                    ParamKey::DstGraphKind,
                    ParamValue::Str("ARROW_PROPERTY".to_owned()),
                );
            let def = graph_payload(engine.on_command(&to_columnar).unwrap());
            assert_eq!(def.kind, GraphKind::ArrowProperty);
            assert_eq!(def.key, "graph_3");

            let back = Command::new(CommandKind::TransformGraph)
                .with_param(ParamKey::GraphName, ParamValue::Str("graph_3".to_owned()))
                .with_param(
                    ParamKey::DstGraphKind,
                    ParamValue::Str("DYNAMIC_PROPERTY".to_owned()),
                );
            let def = graph_payload(engine.on_command(&back).unwrap());
            assert_eq!(def.kind, GraphKind::DynamicProperty);

            (
                text_payload(engine.on_command(&report_cmd("graph_4", "node_num")).unwrap()),
                text_payload(engine.on_command(&report_cmd("graph_4", "edge_num")).unwrap()),
            )
        });
        assert_eq!(answers_eq(&counts), ("3".to_owned(), "2".to_owned()));
    }

    #[cfg(feature = "dynamic")]
    fn answers_eq(counts: &[(String, String)]) -> (String, String) {
        for pair in counts {
            assert_eq!(pair, &counts[0]);
        }
        counts[0].clone()
    }

    #[cfg(feature = "dynamic")]
    #[test]
    fn unsupported_conversion_directions_are_rejected_uniformly() {
        per_rank(2, |comm| {
            let mut engine = engine_over(comm);
            engine.on_command(&create_dynamic()).unwrap();
            let sideways = Command::new(CommandKind::TransformGraph)
                .with_param(ParamKey::GraphName, ParamValue::Str("graph_1".to_owned()))
                .with_param(
                    ParamKey::DstGraphKind,
                    ParamValue::Str("DYNAMIC_PROPERTY".to_owned()),
                );
            let err = engine.on_command(&sideways).unwrap_err();
            assert_eq!(
                err,
                EngineError::InvalidOperation(
                    "unsupported conversion direction, from DYNAMIC_PROPERTY to DYNAMIC_PROPERTY"
                        .into()
                )
            );
            // The counter still advanced: the next graph is graph_3.
            let def = graph_payload(engine.on_command(&create_dynamic()).unwrap());
            assert_eq!(def.key, "graph_3");
        });
    }

    #[cfg(feature = "dynamic")]
    #[test]
    fn run_app_builds_a_context_and_marshals_it() {
        let outputs = per_rank(2, |comm| {
            let mut engine = engine_over(comm);
            engine.on_command(&create_dynamic()).unwrap();
            engine
                .on_command(&modify_edges_cmd("graph_1", "[[1, 2], [2, 3]]"))
                .unwrap();

            let (key, value) = str_param(ParamKey::AlgoName, "degree_centrality");
            let app_key =
                text_payload(engine.on_command(&Command::new(CommandKind::CreateApp).with_param(key, value)).unwrap());
            assert_eq!(app_key, "app_3");

            let run = Command::new(CommandKind::RunApp)
                .with_param(ParamKey::AppName, ParamValue::Str(app_key))
                .with_param(ParamKey::GraphName, ParamValue::Str("graph_1".to_owned()));
            let body = text_payload(engine.on_command(&run).unwrap());
            let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert_eq!(parsed["context_type"], "vertex_data");
            assert_eq!(parsed["context_key"], "ctx_4");

            let to_df = Command::new(CommandKind::ContextToDataframe)
                .with_param(ParamKey::ContextName, ParamValue::Str("ctx_4".to_owned()))
                .with_param(ParamKey::Selector, ParamValue::Json(r#"{"deg": "r"}"#.to_owned()));
            let result = engine.on_command(&to_df).unwrap();
            let rank = engine.rank();
            match result.payload {
                ResultPayload::Archive(bytes) => (rank, bytes.len()),
                other => panic!("unexpected payload: {other:?}"),
            }
        });
        // Rank 0 assembles the archive; helpers contribute only.
        assert!(outputs.iter().any(|(rank, len)| *rank == 0 && *len > 0));
        assert!(outputs.iter().any(|(rank, len)| *rank != 0 && *len == 0));
    }

    #[cfg(feature = "dynamic")]
    #[test]
    fn lifecycle_unloads_empty_the_registry() {
        per_rank(2, |comm| {
            let mut engine = engine_over(comm);
            engine.on_command(&create_dynamic()).unwrap();
            let (key, value) = str_param(ParamKey::AlgoName, "degree_centrality");
            engine
                .on_command(&Command::new(CommandKind::CreateApp).with_param(key, value))
                .unwrap();
            let run = Command::new(CommandKind::RunApp)
                .with_param(ParamKey::AppName, ParamValue::Str("app_2".to_owned()))
                .with_param(ParamKey::GraphName, ParamValue::Str("graph_1".to_owned()));
            engine.on_command(&run).unwrap();

            for cmd in [
                Command::new(CommandKind::UnloadContext)
                    .with_param(ParamKey::ContextName, ParamValue::Str("ctx_3".to_owned())),
                Command::new(CommandKind::UnloadApp)
                    .with_param(ParamKey::AppName, ParamValue::Str("app_2".to_owned())),
                Command::new(CommandKind::UnloadGraph)
                    .with_param(ParamKey::GraphName, ParamValue::Str("graph_1".to_owned())),
            ] {
                let result = engine.on_command(&cmd).unwrap();
                assert!(!result.has_payload());
            }
            assert!(engine.registry().is_empty());
        });
    }

    #[test]
    fn register_graph_type_is_idempotent() {
        per_rank(1, |comm| {
            let mut engine = engine_over(comm);
            let register = Command::new(CommandKind::RegisterGraphType)
                .with_param(
                    ParamKey::GraphKind,
                    ParamValue::Str("ARROW_PROPERTY".to_owned()),
                )
                .with_param(
                    ParamKey::TypeSignature,
                    ParamValue::Str("sig-columnar-v1".to_owned()),
                );
            engine.on_command(&register).unwrap();
            assert!(engine.registry().has("sig-columnar-v1"));
            // Replayed registration is a no-op, not a key collision.
            engine.on_command(&register).unwrap();
            assert!(engine.registry().has("sig-columnar-v1"));
        });
    }
}
