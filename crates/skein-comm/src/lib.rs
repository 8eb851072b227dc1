// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Rank identity and blocking collectives for skein workers.
//!
//! A worker group has `peers` ranks, numbered `0..peers`; rank r owns
//! fragment id r. Collectives are blocking rendezvous points: every live
//! rank must call the same operation in the same order, and results come
//! back rank-indexed. Rank 0 is the root of the rooted collectives.
//!
//! The ordering obligation sits on the caller. Mixing two different
//! collectives in one rendezvous is a protocol violation and fails on
//! every participant rather than deadlocking.

mod local;

pub use local::{LocalComm, LocalGroup};

use std::fmt;

use thiserror::Error;

/// Errors surfaced by collective calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommError {
    /// Participants disagreed on which collective to run.
    #[error("collective mismatch: {0}")]
    Mismatch(&'static str),
    /// A peer handle was dropped while the group still had work in flight.
    #[error("worker group disbanded during {0}")]
    Disbanded(&'static str),
    /// Group construction rejected the requested shape.
    #[error("invalid group shape: {0}")]
    Shape(&'static str),
}

/// Identity of one rank inside a worker group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommSpec {
    /// This rank, in `0..peers`.
    pub rank: u32,
    /// Total ranks in the group.
    pub peers: u32,
}

impl CommSpec {
    /// Build a spec, rejecting impossible shapes.
    ///
    /// # Errors
    /// [`CommError::Shape`] when `peers` is zero or `rank` is out of range.
    pub fn new(rank: u32, peers: u32) -> Result<Self, CommError> {
        if peers == 0 {
            return Err(CommError::Shape("zero peers"));
        }
        if rank >= peers {
            return Err(CommError::Shape("rank out of range"));
        }
        Ok(Self { rank, peers })
    }

    /// True on rank 0, the root of rooted collectives.
    pub fn is_coordinator(self) -> bool {
        self.rank == 0
    }
}

impl fmt::Display for CommSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rank, self.peers)
    }
}

/// Blocking collectives over one worker group.
///
/// Implementations are shared-state handles: cloning or wrapping in `Arc`
/// is cheap, and every method takes `&self`.
pub trait Collective: Send + Sync {
    /// This handle's rank identity.
    fn spec(&self) -> CommSpec;

    /// Block until every rank has arrived.
    ///
    /// # Errors
    /// [`CommError::Disbanded`] when a peer drops mid-rendezvous,
    /// [`CommError::Mismatch`] when peers ran a different collective.
    fn barrier(&self) -> Result<(), CommError>;

    /// Sum `local` across all ranks; the total lands on rank 0 only.
    ///
    /// # Errors
    /// See [`Collective::barrier`].
    fn sum_i64_to_root(&self, local: i64) -> Result<Option<i64>, CommError>;

    /// Gather every rank's bytes to rank 0, rank-indexed.
    ///
    /// Non-root ranks contribute and receive `None`.
    ///
    /// # Errors
    /// See [`Collective::barrier`].
    fn gather_to_root(&self, local: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, CommError>;

    /// Gather every rank's bytes to every rank, rank-indexed.
    ///
    /// # Errors
    /// See [`Collective::barrier`].
    fn all_gather(&self, local: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError>;

    /// Distribute rank 0's bytes to every rank.
    ///
    /// Non-root ranks still pass a `local` argument; it is ignored.
    ///
    /// # Errors
    /// See [`Collective::barrier`].
    fn broadcast_from_root(&self, local: Vec<u8>) -> Result<Vec<u8>, CommError>;
}
