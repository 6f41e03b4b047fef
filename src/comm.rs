//! Process groups and collective transport.
//!
//! Collectives here are blocking barriers: every rank in a group must invoke
//! the same call in the same order with matching shape and dtype, or the
//! program stalls. There is no timeout and no cancellation: a missing
//! participant is a hang, not a reported error; only local precondition
//! violations (shape or dtype mismatch, bad source rank, a hub poisoned by
//! a panicked rank) surface as [`Error::Comm`].
//!
//! Two transports ship: [`SoloGroup`], a world of one whose collectives are
//! no-ops, and [`LocalGroup`], an in-process world where each rank is a
//! thread synchronizing through a shared hub, enough to run real multi-rank
//! scenarios in tests and demos.

use crate::tensor::{TensorPayload, TensorStore};
use crate::types::{DType, Error, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, MutexGuard};

/// Rank identifier within a group.
pub type RankId = usize;

/// Which communicator a collective runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParallelMode {
    /// The whole world.
    Global,
    /// The data-parallel group.
    Data,
}

/// Collective transport over one set of ranks.
pub trait ProcessGroup: Send + Sync {
    /// This rank's index within the group.
    fn rank(&self) -> RankId;

    /// Number of ranks in the group.
    fn world_size(&self) -> usize;

    /// All ranks in the group, in rank order.
    fn ranks(&self) -> Vec<RankId>;

    /// Replace `payload` on every rank with the value held by `src`.
    /// Blocking: all ranks must call with matching shape and dtype.
    fn broadcast(&self, payload: &mut TensorPayload, src: RankId) -> Result<()>;

    /// Gather every rank's storage in rank order. Blocking.
    fn all_gather(&self, store: &TensorStore) -> Result<Vec<TensorStore>>;
}

/// Shared handle to a process group.
pub type GroupHandle = Arc<dyn ProcessGroup>;

thread_local! {
    static GROUPS: RefCell<HashMap<ParallelMode, GroupHandle>> = RefCell::new(HashMap::new());
}

/// Register the communicator for `mode` on this rank.
pub fn register_group(mode: ParallelMode, group: GroupHandle) {
    log::debug!(
        "registered {:?} group: rank {} of {}",
        mode,
        group.rank(),
        group.world_size()
    );
    GROUPS.with(|groups| groups.borrow_mut().insert(mode, group));
}

/// The communicator for `mode`; a solo group when none was registered.
pub fn group(mode: ParallelMode) -> GroupHandle {
    GROUPS
        .with(|groups| groups.borrow().get(&mode).cloned())
        .unwrap_or_else(|| Arc::new(SoloGroup))
}

/// Drop every registered group on this rank.
pub fn reset_groups() {
    GROUPS.with(|groups| groups.borrow_mut().clear());
}

/// This rank's index in the global group.
pub fn global_rank() -> RankId {
    group(ParallelMode::Global).rank()
}

/// Single-process world: world size 1, collectives are no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoloGroup;

impl ProcessGroup for SoloGroup {
    fn rank(&self) -> RankId {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn ranks(&self) -> Vec<RankId> {
        vec![0]
    }

    fn broadcast(&self, _payload: &mut TensorPayload, src: RankId) -> Result<()> {
        if src != 0 {
            return Err(Error::Comm(format!(
                "broadcast source {src} out of range for world size 1"
            )));
        }
        Ok(())
    }

    fn all_gather(&self, store: &TensorStore) -> Result<Vec<TensorStore>> {
        Ok(vec![store.clone()])
    }
}

struct BroadcastMsg {
    store: TensorStore,
    shape: Vec<usize>,
    dtype: DType,
}

struct LocalHub {
    world: usize,
    barrier: Barrier,
    broadcast_slot: Mutex<Option<BroadcastMsg>>,
    gather_slots: Mutex<Vec<Option<TensorStore>>>,
    broadcasts: AtomicUsize,
}

fn lock_hub<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Comm("collective hub poisoned by a panicked rank".into()))
}

/// One rank's endpoint of an in-process world.
///
/// Endpoints are built as a set by [`LocalGroup::connect`] and moved to
/// their rank threads; they synchronize through a shared hub.
#[derive(Clone)]
pub struct LocalGroup {
    rank: RankId,
    hub: Arc<LocalHub>,
}

impl LocalGroup {
    /// Create endpoints for a `world`-rank in-process group.
    pub fn connect(world: usize) -> Vec<LocalGroup> {
        let hub = Arc::new(LocalHub {
            world,
            barrier: Barrier::new(world),
            broadcast_slot: Mutex::new(None),
            gather_slots: Mutex::new(vec![None; world]),
            broadcasts: AtomicUsize::new(0),
        });
        (0..world)
            .map(|rank| LocalGroup {
                rank,
                hub: hub.clone(),
            })
            .collect()
    }

    /// Number of broadcasts completed on this group's hub.
    pub fn broadcast_count(&self) -> usize {
        self.hub.broadcasts.load(Ordering::SeqCst)
    }
}

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> RankId {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.hub.world
    }

    fn ranks(&self) -> Vec<RankId> {
        (0..self.hub.world).collect()
    }

    fn broadcast(&self, payload: &mut TensorPayload, src: RankId) -> Result<()> {
        if src >= self.hub.world {
            return Err(Error::Comm(format!(
                "broadcast source {src} out of range for world size {}",
                self.hub.world
            )));
        }
        if self.rank == src {
            let mut slot = lock_hub(&self.hub.broadcast_slot)?;
            *slot = Some(BroadcastMsg {
                store: payload.store().clone(),
                shape: payload.shape().to_vec(),
                dtype: payload.dtype(),
            });
        }
        self.hub.barrier.wait();

        let mut outcome = Ok(());
        if self.rank != src {
            let slot = lock_hub(&self.hub.broadcast_slot)?;
            match slot.as_ref() {
                Some(msg) => {
                    if msg.dtype != payload.dtype() || msg.shape != payload.shape() {
                        outcome = Err(Error::Comm(format!(
                            "broadcast mismatch: source sent {:?} {}, this rank holds {:?} {}",
                            msg.shape,
                            msg.dtype,
                            payload.shape(),
                            payload.dtype()
                        )));
                    } else {
                        outcome = payload.set_store(msg.store.clone());
                    }
                }
                None => {
                    outcome = Err(Error::InternalInvariant(
                        "broadcast slot empty after publication barrier".into(),
                    ))
                }
            }
        }
        self.hub.barrier.wait();

        if self.rank == src {
            lock_hub(&self.hub.broadcast_slot)?.take();
            self.hub.broadcasts.fetch_add(1, Ordering::SeqCst);
        }
        outcome
    }

    fn all_gather(&self, store: &TensorStore) -> Result<Vec<TensorStore>> {
        {
            let mut slots = lock_hub(&self.hub.gather_slots)?;
            slots[self.rank] = Some(store.clone());
        }
        self.hub.barrier.wait();

        let outcome = {
            let slots = lock_hub(&self.hub.gather_slots)?;
            let mut parts = Vec::with_capacity(self.hub.world);
            let mut err = None;
            for (rank, slot) in slots.iter().enumerate() {
                match slot {
                    Some(part) if part.dtype() != store.dtype() => {
                        err = Some(Error::Comm(format!(
                            "all_gather mismatch: rank {rank} sent {}, this rank holds {}",
                            part.dtype(),
                            store.dtype()
                        )));
                        break;
                    }
                    Some(part) => parts.push(part.clone()),
                    None => {
                        err = Some(Error::InternalInvariant(format!(
                            "gather slot {rank} empty after publication barrier"
                        )));
                        break;
                    }
                }
            }
            match err {
                Some(err) => Err(err),
                None => Ok(parts),
            }
        };
        self.hub.barrier.wait();

        // Each rank clears only its own slot: the next publish to that slot
        // happens on the same thread, so a later collective cannot observe
        // the cleanup out of order.
        lock_hub(&self.hub.gather_slots)?[self.rank] = None;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Device;
    use std::thread;

    #[test]
    fn test_solo_group_defaults() {
        reset_groups();
        let group = group(ParallelMode::Data);
        assert_eq!(group.world_size(), 1);
        assert_eq!(group.ranks(), vec![0]);

        let mut payload = TensorPayload::ones(&[2], Device::Cpu);
        group.broadcast(&mut payload, 0).unwrap();
        assert_eq!(payload.to_f32_vec(), vec![1.0, 1.0]);
        assert!(matches!(
            group.broadcast(&mut payload, 1),
            Err(Error::Comm(_))
        ));
    }

    #[test]
    fn test_local_broadcast_copies_source() {
        let endpoints = LocalGroup::connect(2);
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|endpoint| {
                thread::spawn(move || {
                    let rank = endpoint.rank();
                    let value = if rank == 0 { 3.5 } else { -1.0 };
                    let mut payload = TensorPayload::new(
                        TensorStore::F32(vec![value; 4]),
                        vec![4],
                        Device::Cpu,
                    )
                    .unwrap();
                    endpoint.broadcast(&mut payload, 0).unwrap();
                    (payload.to_f32_vec(), endpoint.broadcast_count())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for (values, _) in &results {
            assert_eq!(values, &vec![3.5; 4]);
        }
        assert_eq!(results[0].1, 1);
    }

    #[test]
    fn test_local_broadcast_shape_mismatch() {
        let endpoints = LocalGroup::connect(2);
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|endpoint| {
                thread::spawn(move || {
                    let rank = endpoint.rank();
                    let len = if rank == 0 { 4 } else { 3 };
                    let mut payload = TensorPayload::zeros(&[len], Device::Cpu);
                    endpoint.broadcast(&mut payload, 0)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Comm(_))));
    }

    #[test]
    fn test_back_to_back_all_gathers_keep_slots_intact() {
        let endpoints = LocalGroup::connect(2);
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|endpoint| {
                thread::spawn(move || {
                    for round in 0..200u32 {
                        let value = endpoint.rank() as f32 + round as f32;
                        let parts = endpoint
                            .all_gather(&TensorStore::F32(vec![value; 2]))
                            .unwrap();
                        for (rank, part) in parts.iter().enumerate() {
                            let expected = rank as f32 + round as f32;
                            assert_eq!(part, &TensorStore::F32(vec![expected; 2]));
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_poisoned_hub_surfaces_comm_error() {
        let endpoint = LocalGroup::connect(1).pop().unwrap();
        let hub = endpoint.hub.clone();
        let _ = thread::spawn(move || {
            let _slot = hub.broadcast_slot.lock().unwrap();
            panic!("induced");
        })
        .join();

        let mut payload = TensorPayload::zeros(&[2], Device::Cpu);
        assert!(matches!(
            endpoint.broadcast(&mut payload, 0),
            Err(Error::Comm(_))
        ));
    }

    #[test]
    fn test_all_gather_orders_by_rank() {
        let endpoints = LocalGroup::connect(3);
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|endpoint| {
                thread::spawn(move || {
                    let store = TensorStore::F32(vec![endpoint.rank() as f32; 2]);
                    endpoint.all_gather(&store).unwrap()
                })
            })
            .collect();

        for handle in handles {
            let parts = handle.join().unwrap();
            assert_eq!(parts.len(), 3);
            for (rank, part) in parts.iter().enumerate() {
                assert_eq!(part, &TensorStore::F32(vec![rank as f32; 2]));
            }
        }
    }
}
