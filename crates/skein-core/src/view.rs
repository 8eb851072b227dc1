// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read-only graph views.
//!
//! A view shares its base fragment and reinterprets adjacency on the
//! fly; nothing is copied, and mutations to the base show through.

use std::sync::Arc;

use skein_comm::Collective;

use crate::dynamic::{
    AdjacencyDir, AttrMap, DegreeKind, DynamicFragment, ViewMode,
};
use crate::error::EngineError;
use crate::value::DynValue;
use crate::vmap::Gid;

/// Supported view flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    /// Every directed edge read in the opposite direction.
    Reversed,
    /// Edges readable in both directions, like an undirected reading.
    Both,
}

impl ViewKind {
    /// Parse the wire form.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on unknown view types.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "reversed" => Ok(Self::Reversed),
            "both" => Ok(Self::Both),
            other => Err(EngineError::InvalidValue(format!(
                "unknown view type: {other}"
            ))),
        }
    }

    /// The adjacency mode this view reads under.
    pub fn mode(self) -> ViewMode {
        match self {
            Self::Reversed => ViewMode::Reversed,
            Self::Both => ViewMode::Both,
        }
    }
}

/// A dynamic fragment read under a [`ViewKind`].
#[derive(Debug, Clone)]
pub struct DynamicFragmentView {
    base: Arc<DynamicFragment>,
    kind: ViewKind,
}

impl DynamicFragmentView {
    /// Wrap `base` under `kind`.
    ///
    /// # Errors
    /// [`EngineError::InvalidOperation`] for a reversed view of an
    /// undirected graph.
    pub fn new(base: Arc<DynamicFragment>, kind: ViewKind) -> Result<Self, EngineError> {
        if kind == ViewKind::Reversed && !base.directed() {
            return Err(EngineError::InvalidOperation(
                "cannot reverse an undirected graph".into(),
            ));
        }
        Ok(Self { base, kind })
    }

    /// The shared base fragment.
    pub fn base(&self) -> &Arc<DynamicFragment> {
        &self.base
    }

    /// This view's flavor.
    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    fn mode(&self) -> ViewMode {
        self.kind.mode()
    }

    /// Whether reads behave directed. A `both` view reads undirected.
    pub fn directed(&self) -> bool {
        self.base.directed() && self.kind != ViewKind::Both
    }

    /// See [`DynamicFragment::node_count`].
    pub fn node_count(&self) -> usize {
        self.base.node_count()
    }

    /// See [`DynamicFragment::has_node`].
    pub fn has_node(&self, oid: &DynValue) -> bool {
        self.base.has_node(oid)
    }

    /// See [`DynamicFragment::local_edge_count`].
    pub fn local_edge_count(&self) -> usize {
        self.base.local_edge_count(self.mode())
    }

    /// See [`DynamicFragment::edge_count`].
    ///
    /// # Errors
    /// Collective failures propagate.
    pub fn edge_count(&self, comm: &dyn Collective) -> Result<usize, EngineError> {
        self.base.edge_count(comm, self.mode())
    }

    /// See [`DynamicFragment::local_selfloop_count`].
    pub fn local_selfloop_count(&self) -> usize {
        self.base.local_selfloop_count()
    }

    /// See [`DynamicFragment::has_edge`].
    pub fn has_edge(&self, u: &DynValue, v: &DynValue) -> Option<bool> {
        self.base.has_edge(u, v, self.mode())
    }

    /// See [`DynamicFragment::node_data`].
    ///
    /// # Errors
    /// See [`DynamicFragment::node_data`].
    pub fn node_data(&self, oid: &DynValue) -> Result<Option<AttrMap>, EngineError> {
        self.base.node_data(oid)
    }

    /// See [`DynamicFragment::edge_data`].
    pub fn edge_data(&self, u: &DynValue, v: &DynValue) -> Option<DynValue> {
        self.base.edge_data(u, v, self.mode())
    }

    /// See [`DynamicFragment::degree`].
    ///
    /// # Errors
    /// See [`DynamicFragment::degree`].
    pub fn degree(
        &self,
        oid: &DynValue,
        kind: DegreeKind,
    ) -> Result<Option<usize>, EngineError> {
        self.base.degree(oid, kind, self.mode())
    }

    /// See [`DynamicFragment::adjacent`].
    ///
    /// # Errors
    /// See [`DynamicFragment::adjacent`].
    pub fn adjacent(
        &self,
        oid: &DynValue,
        dir: AdjacencyDir,
    ) -> Result<Option<Vec<DynValue>>, EngineError> {
        self.base.adjacent(oid, dir, self.mode())
    }

    /// See [`DynamicFragment::owned_vertices`].
    pub fn owned_vertices(&self) -> Vec<(Gid, DynValue)> {
        self.base.owned_vertices()
    }

    /// See [`DynamicFragment::owned_nodes_slice`].
    pub fn owned_nodes_slice(&self, offset: usize, limit: usize) -> Vec<DynValue> {
        self.base.owned_nodes_slice(offset, limit)
    }
}
