// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-process worker group: one thread per rank, collectives over shared
//! memory.
//!
//! Each collective is one *phase*. A phase opens when the first rank
//! arrives, finalizes when the last rank arrives, and resets only after
//! every rank has collected the result, so back-to-back collectives cannot
//! bleed into each other. Kind disagreement and dropped peers poison the
//! group instead of deadlocking it.

// Rank counts are small; rank-indexed slot access never truncates.
#![allow(clippy::cast_possible_truncation)]

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::{Collective, CommError, CommSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseKind {
    Barrier,
    Sum,
    Gather,
    AllGather,
    Broadcast,
}

impl PhaseKind {
    fn name(self) -> &'static str {
        match self {
            Self::Barrier => "barrier",
            Self::Sum => "sum_i64_to_root",
            Self::Gather => "gather_to_root",
            Self::AllGather => "all_gather",
            Self::Broadcast => "broadcast_from_root",
        }
    }
}

#[derive(Debug, Clone)]
enum PhaseResult {
    Unit,
    Sum(i64),
    Gathered(Arc<Vec<Vec<u8>>>),
    Payload(Arc<Vec<u8>>),
}

#[derive(Debug)]
struct PhaseState {
    kind: Option<PhaseKind>,
    entered: u32,
    collected: u32,
    slots: Vec<Option<Vec<u8>>>,
    sum: i64,
    result: Option<PhaseResult>,
    poisoned: Option<CommError>,
}

#[derive(Debug)]
struct Shared {
    peers: u32,
    state: Mutex<PhaseState>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PhaseState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Factory for in-process worker groups.
///
/// `LocalGroup::new(n)` hands back one [`LocalComm`] per rank; move each
/// handle onto its own thread and drive one engine per handle. Dropping a
/// handle while peers still rendezvous fails their calls with
/// [`CommError::Disbanded`].
#[derive(Debug)]
pub struct LocalGroup;

impl LocalGroup {
    /// Create handles for a group of `peers` ranks.
    ///
    /// # Errors
    /// [`CommError::Shape`] when `peers` is zero.
    pub fn new(peers: u32) -> Result<Vec<LocalComm>, CommError> {
        if peers == 0 {
            return Err(CommError::Shape("zero peers"));
        }
        let shared = Arc::new(Shared {
            peers,
            state: Mutex::new(PhaseState {
                kind: None,
                entered: 0,
                collected: 0,
                slots: vec![None; peers as usize],
                sum: 0,
                result: None,
                poisoned: None,
            }),
            cv: Condvar::new(),
        });
        Ok((0..peers)
            .map(|rank| LocalComm {
                spec: CommSpec { rank, peers },
                shared: Arc::clone(&shared),
            })
            .collect())
    }
}

/// One rank's handle onto an in-process worker group.
#[derive(Debug)]
pub struct LocalComm {
    spec: CommSpec,
    shared: Arc<Shared>,
}

impl LocalComm {
    fn run_phase(
        &self,
        kind: PhaseKind,
        payload: Option<Vec<u8>>,
        term: i64,
    ) -> Result<PhaseResult, CommError> {
        let shared = &*self.shared;
        let mut st = shared.lock();

        // Wait out the drain of any previous, already-finalized phase.
        while st.poisoned.is_none() && st.result.is_some() {
            st = shared.cv.wait(st).unwrap_or_else(|e| e.into_inner());
        }
        if let Some(err) = st.poisoned.clone() {
            shared.cv.notify_all();
            return Err(err);
        }

        // Join the open phase, or open it.
        match st.kind {
            None => st.kind = Some(kind),
            Some(k) if k == kind => {}
            Some(_) => {
                let err = CommError::Mismatch("peers ran different collectives");
                st.poisoned = Some(err.clone());
                shared.cv.notify_all();
                return Err(err);
            }
        }

        match kind {
            PhaseKind::Barrier => {}
            PhaseKind::Sum => st.sum += term,
            PhaseKind::Gather | PhaseKind::AllGather => {
                st.slots[self.spec.rank as usize] = Some(payload.unwrap_or_default());
            }
            PhaseKind::Broadcast => {
                if self.spec.is_coordinator() {
                    st.slots[0] = Some(payload.unwrap_or_default());
                }
            }
        }
        st.entered += 1;

        if st.entered == shared.peers {
            let result = match kind {
                PhaseKind::Barrier => PhaseResult::Unit,
                PhaseKind::Sum => PhaseResult::Sum(st.sum),
                PhaseKind::Gather | PhaseKind::AllGather => {
                    let gathered: Vec<Vec<u8>> = st
                        .slots
                        .iter_mut()
                        .map(|slot| slot.take().unwrap_or_default())
                        .collect();
                    PhaseResult::Gathered(Arc::new(gathered))
                }
                PhaseKind::Broadcast => {
                    PhaseResult::Payload(Arc::new(st.slots[0].take().unwrap_or_default()))
                }
            };
            st.result = Some(result);
            shared.cv.notify_all();
        } else {
            while st.poisoned.is_none() && st.result.is_none() {
                st = shared.cv.wait(st).unwrap_or_else(|e| e.into_inner());
            }
        }

        // A finalized result outranks late poisoning: every rank that
        // contributed to this phase must observe the same outcome.
        let out = match st.result.clone() {
            Some(result) => result,
            None => {
                let err = st
                    .poisoned
                    .clone()
                    .unwrap_or(CommError::Disbanded(kind.name()));
                shared.cv.notify_all();
                return Err(err);
            }
        };

        st.collected += 1;
        if st.collected == shared.peers {
            st.kind = None;
            st.entered = 0;
            st.collected = 0;
            st.sum = 0;
            st.result = None;
            for slot in &mut st.slots {
                *slot = None;
            }
            shared.cv.notify_all();
        }
        Ok(out)
    }
}

impl Collective for LocalComm {
    fn spec(&self) -> CommSpec {
        self.spec
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.run_phase(PhaseKind::Barrier, None, 0).map(|_| ())
    }

    fn sum_i64_to_root(&self, local: i64) -> Result<Option<i64>, CommError> {
        match self.run_phase(PhaseKind::Sum, None, local)? {
            PhaseResult::Sum(total) => Ok(self.spec.is_coordinator().then_some(total)),
            _ => Err(CommError::Mismatch("sum phase produced a non-sum result")),
        }
    }

    fn gather_to_root(&self, local: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, CommError> {
        match self.run_phase(PhaseKind::Gather, Some(local), 0)? {
            PhaseResult::Gathered(all) => Ok(self
                .spec
                .is_coordinator()
                .then(|| all.as_ref().clone())),
            _ => Err(CommError::Mismatch("gather phase produced a non-gather result")),
        }
    }

    fn all_gather(&self, local: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError> {
        match self.run_phase(PhaseKind::AllGather, Some(local), 0)? {
            PhaseResult::Gathered(all) => Ok(all.as_ref().clone()),
            _ => Err(CommError::Mismatch("gather phase produced a non-gather result")),
        }
    }

    fn broadcast_from_root(&self, local: Vec<u8>) -> Result<Vec<u8>, CommError> {
        let payload = self.spec.is_coordinator().then_some(local);
        match self.run_phase(PhaseKind::Broadcast, payload, 0)? {
            PhaseResult::Payload(bytes) => Ok(bytes.as_ref().clone()),
            _ => Err(CommError::Mismatch(
                "broadcast phase produced a non-payload result",
            )),
        }
    }
}

impl Drop for LocalComm {
    fn drop(&mut self) {
        let mut st = self.shared.lock();
        if st.poisoned.is_none() {
            st.poisoned = Some(CommError::Disbanded("peer dropped"));
        }
        self.shared.cv.notify_all();
    }
}
