// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Object-store collaborator boundary for skein workers.
//!
//! Workers keep fragments rank-local; what outlives a worker — loaded
//! fragments, marshalled tensors and dataframes, the groups that tie one
//! logical graph's per-rank objects together — goes through this seam.
//!
//! Absence is not an error on reads: [`ObjectStore::get`],
//! [`ObjectStore::get_meta`], and [`ObjectStore::get_name`] return
//! `Ok(None)` for unknown ids/names, and callers decide whether that is
//! fatal. Errors are reserved for integrity violations and write-side
//! misuse (duplicate names, persisting unknown ids).

mod memory;

pub use memory::MemoryStore;

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use thiserror::Error;

/// Identifier of one stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{:016x}", self.0)
    }
}

/// Scalar metadata entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    I64(i64),
    /// Unsigned integer.
    U64(u64),
    /// UTF-8 string.
    Str(String),
}

/// Typed metadata of one stored object.
///
/// `members` link to other objects by id; object identity comparisons
/// (e.g. "do these two fragments share a vertex map?") go through member
/// ids, never through payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Store-level type name (e.g. `skein::ColumnarFragment`).
    pub type_name: String,
    /// Scalar entries.
    pub entries: BTreeMap<String, MetaValue>,
    /// Member links to other objects.
    pub members: BTreeMap<String, ObjectId>,
}

impl ObjectMeta {
    /// Empty metadata of the given store type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            entries: BTreeMap::new(),
            members: BTreeMap::new(),
        }
    }

    /// Add one scalar entry (builder style).
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: MetaValue) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    /// Add one member link (builder style).
    #[must_use]
    pub fn with_member(mut self, key: impl Into<String>, id: ObjectId) -> Self {
        self.members.insert(key.into(), id);
        self
    }

    /// Scalar entry lookup.
    pub fn entry(&self, key: &str) -> Option<&MetaValue> {
        self.entries.get(key)
    }

    /// Member link lookup.
    pub fn member(&self, key: &str) -> Option<ObjectId> {
        self.members.get(key).copied()
    }
}

/// Errors surfaced by store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A write-side operation referenced an unknown object id.
    #[error("object not found: {0}")]
    NotFound(ObjectId),
    /// `put_name` would rebind an existing name.
    #[error("name already bound: {0}")]
    DuplicateName(String),
    /// A payload failed its digest check on read.
    #[error("payload digest mismatch for {0}")]
    Corrupt(ObjectId),
    /// A group referenced a member the store does not hold.
    #[error("group member not found: {key} -> {id}")]
    MissingMember {
        /// Member key inside the group.
        key: String,
        /// Referenced object id.
        id: ObjectId,
    },
}

/// The store seam.
///
/// Implementations are shared handles (`&self` everywhere) safe to call
/// from every rank of an in-process group concurrently.
pub trait ObjectStore: Send + Sync {
    /// Store a payload with its metadata; returns the new object's id.
    ///
    /// # Errors
    /// Implementation-defined write failures.
    fn put(&self, payload: Bytes, meta: ObjectMeta) -> Result<ObjectId, StoreError>;

    /// Fetch a payload. Unknown ids are `Ok(None)`.
    ///
    /// # Errors
    /// [`StoreError::Corrupt`] when the payload fails its digest check.
    fn get(&self, id: ObjectId) -> Result<Option<Bytes>, StoreError>;

    /// Fetch metadata. Unknown ids are `Ok(None)`.
    ///
    /// # Errors
    /// Implementation-defined read failures.
    fn get_meta(&self, id: ObjectId) -> Result<Option<ObjectMeta>, StoreError>;

    /// Whether the store holds `id`.
    ///
    /// # Errors
    /// Implementation-defined read failures.
    fn exists(&self, id: ObjectId) -> Result<bool, StoreError>;

    /// Delete objects. Unknown ids are ignored; deletion is idempotent.
    ///
    /// # Errors
    /// Implementation-defined write failures.
    fn del_data(&self, ids: &[ObjectId]) -> Result<(), StoreError>;

    /// Mark an object globally visible.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] for unknown ids.
    fn persist(&self, id: ObjectId) -> Result<(), StoreError>;

    /// Bind a name to an object.
    ///
    /// # Errors
    /// [`StoreError::DuplicateName`] when the name is taken,
    /// [`StoreError::NotFound`] for unknown ids.
    fn put_name(&self, id: ObjectId, name: &str) -> Result<(), StoreError>;

    /// Resolve a name. Unknown names are `Ok(None)`.
    ///
    /// # Errors
    /// Implementation-defined read failures.
    fn get_name(&self, name: &str) -> Result<Option<ObjectId>, StoreError>;

    /// Create and persist a group object binding fragment ids to member
    /// objects (member keys are `frag_<fid>`).
    ///
    /// # Errors
    /// [`StoreError::MissingMember`] when any member id is unknown.
    fn construct_group(
        &self,
        type_name: &str,
        members: BTreeMap<u32, ObjectId>,
    ) -> Result<ObjectId, StoreError>;
}

/// Member key a group uses for fragment `fid`.
pub fn group_member_key(fid: u32) -> String {
    format!("frag_{fid}")
}

/// Meta entry key holding a group's fragment count.
pub const GROUP_FRAGMENTS_ENTRY: &str = "fragments";
