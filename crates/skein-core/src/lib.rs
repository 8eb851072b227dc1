// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker-side engine of the skein analytical runtime.
//!
//! One [`GraphEngine`] runs per rank of an SPMD worker group. Every
//! rank receives the identical command stream from the coordinator;
//! rank r holds fragment r of every loaded graph and contributes its
//! share to every collective. Objects a command creates (graphs, apps,
//! contexts) live in a rank-local [`ObjectRegistry`] under keys that
//! are equal on all ranks by construction.
//!
//! The crate splits along the object kinds commands touch:
//! [`columnar`] and `dynamic` hold the two fragment representations,
//! [`wrapper`] gives them one capability surface, `convert` moves data
//! between them, [`app`] runs algorithms over them, [`marshal`] folds
//! per-rank results into coordinator-readable archives, and
//! [`dispatch`] ties the lot to the command stream.
//!
//! The `dynamic` cargo feature (on by default) carries the mutable
//! fragment family. Without it the engine still loads, projects, and
//! marshals columnar graphs; commands that need mutability answer
//! "unimplemented".

pub mod app;
pub mod backend;
pub mod column;
pub mod columnar;
pub mod config;
pub mod context;
#[cfg(feature = "dynamic")]
pub mod convert;
pub mod dispatch;
#[cfg(feature = "dynamic")]
pub mod dynamic;
pub mod error;
pub mod marshal;
pub mod registry;
pub mod schema;
pub mod selector;
pub mod value;
#[cfg(feature = "dynamic")]
pub mod view;
pub mod vmap;
pub mod wrapper;

/// Running engine tunables.
pub use config::EngineConfig;
/// The per-rank command engine.
pub use dispatch::GraphEngine;
/// Error taxonomy shared by every engine operation.
pub use error::EngineError;
/// Rank-local object registry and the payload kinds it holds.
pub use registry::{EngineObject, ObjectRegistry};
/// The capability surface every fragment kind answers.
pub use wrapper::FragmentWrapper;
