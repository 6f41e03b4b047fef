//! Shard strategies: how wrapped payloads are partitioned across a group.

use crate::comm::ProcessGroup;
use crate::sharded_tensor::ShardedTensorEntity;
use crate::tensor::{TensorPayload, TensorStore};
use crate::types::{Error, Result};

/// Partitions wrap entities across a process group.
///
/// Implementations mutate entity payloads in place; the entities' origin
/// metadata is never touched. Both operations are blocking when the
/// implementation communicates.
pub trait ShardStrategy: Send + Sync {
    /// Replace each entity's payload with this rank's partition and mark the
    /// entity sharded.
    fn shard(&self, entities: &mut [&mut ShardedTensorEntity], group: &dyn ProcessGroup)
        -> Result<()>;

    /// Restore each entity's full payload from the partitions held across
    /// the group and clear the sharded mark.
    fn gather(&self, entities: &mut [&mut ShardedTensorEntity], group: &dyn ProcessGroup)
        -> Result<()>;
}

/// Even chunking of the flattened payload.
///
/// The payload is flattened and split into `world_size` chunks of
/// `ceil(numel / world_size)` elements, the trailing chunk zero-padded;
/// each rank keeps the chunk at its own rank index. A world of one only
/// marks the entity sharded.
#[derive(Debug, Default, Clone, Copy)]
pub struct TensorShardStrategy;

impl TensorShardStrategy {
    /// Create the default chunking strategy.
    pub fn new() -> Self {
        Self
    }
}

impl ShardStrategy for TensorShardStrategy {
    fn shard(
        &self,
        entities: &mut [&mut ShardedTensorEntity],
        group: &dyn ProcessGroup,
    ) -> Result<()> {
        let world = group.world_size();
        for entity in entities.iter_mut() {
            if entity.is_sharded() {
                continue;
            }
            if world > 1 {
                let local = {
                    let payload = entity.payload();
                    let chunk_len = (payload.numel() + world - 1) / world;
                    let chunk = payload.store().chunk(group.rank() * chunk_len, chunk_len);
                    TensorPayload::new(chunk, vec![chunk_len], payload.device())?
                };
                log::trace!(
                    "sharding payload: {} -> {} elements on rank {}",
                    entity.origin_numel(),
                    local.numel(),
                    group.rank()
                );
                entity.replace_payload(local);
            }
            entity.set_sharded(true);
        }
        Ok(())
    }

    fn gather(
        &self,
        entities: &mut [&mut ShardedTensorEntity],
        group: &dyn ProcessGroup,
    ) -> Result<()> {
        for entity in entities.iter_mut() {
            if !entity.is_sharded() {
                continue;
            }
            if group.world_size() > 1 {
                let parts = group.all_gather(entity.payload().store())?;
                let mut full = TensorStore::concat(&parts)?;
                full.truncate(entity.origin_numel());
                if full.dtype() != entity.origin_dtype() {
                    return Err(Error::Comm(format!(
                        "gathered {} storage does not match origin dtype {}",
                        full.dtype(),
                        entity.origin_dtype()
                    )));
                }
                let restored = TensorPayload::new(
                    full,
                    entity.origin_shape().to_vec(),
                    entity.payload().device(),
                )?;
                entity.replace_payload(restored);
            }
            entity.set_sharded(false);
        }
        Ok(())
    }
}
