//! Sharded tensor entities: a payload plus shard metadata and a lifecycle
//! state tag.

use crate::tensor::TensorPayload;
use crate::types::DType;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a managed payload.
///
/// A classification surface consumed by the runtime that owns the entity;
/// nothing in this crate drives transitions beyond wrap and release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TensorState {
    /// Payload is not resident.
    Free,
    /// Payload is resident and idle.
    Hold,
    /// Payload is in use by a compute kernel.
    Compute,
    /// Payload holds gradient data awaiting reduction.
    HoldGrad,
}

/// One parameter's payload with shard metadata.
///
/// The origin shape, element count, and dtype are captured once, when the
/// entity is created, and never recomputed from the possibly-partitioned
/// payload. The payload is owned exclusively; re-sharding replaces it
/// outright rather than aliasing it.
#[derive(Debug, Clone)]
pub struct ShardedTensorEntity {
    payload: TensorPayload,
    state: TensorState,
    origin_shape: Vec<usize>,
    origin_numel: usize,
    origin_dtype: DType,
    is_sharded: bool,
}

impl ShardedTensorEntity {
    /// Wrap a payload, capturing its logical identity.
    pub fn new(payload: TensorPayload) -> Self {
        let origin_shape = payload.shape().to_vec();
        let origin_numel = payload.numel();
        let origin_dtype = payload.dtype();
        Self {
            payload,
            state: TensorState::Hold,
            origin_shape,
            origin_numel,
            origin_dtype,
            is_sharded: false,
        }
    }

    /// Capture a payload's logical identity without taking the payload.
    ///
    /// Used when the full buffer must stay module-facing until scope exit:
    /// the entity starts in [`TensorState::Free`] holding a released stub
    /// and receives the real payload later via [`replace_payload`].
    ///
    /// [`replace_payload`]: ShardedTensorEntity::replace_payload
    pub fn reserve(payload: &TensorPayload) -> Self {
        Self {
            payload: TensorPayload::released(payload.dtype(), payload.device()),
            state: TensorState::Free,
            origin_shape: payload.shape().to_vec(),
            origin_numel: payload.numel(),
            origin_dtype: payload.dtype(),
            is_sharded: false,
        }
    }

    /// Borrow the resident payload.
    pub fn payload(&self) -> &TensorPayload {
        &self.payload
    }

    /// Mutably borrow the resident payload.
    pub fn payload_mut(&mut self) -> &mut TensorPayload {
        &mut self.payload
    }

    /// Install a new payload, returning the old one.
    ///
    /// The state follows the incoming payload: a released stub parks the
    /// entity in `Free`, anything resident moves it to `Hold`.
    pub fn replace_payload(&mut self, payload: TensorPayload) -> TensorPayload {
        self.state = if payload.is_released() {
            TensorState::Free
        } else {
            TensorState::Hold
        };
        std::mem::replace(&mut self.payload, payload)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TensorState {
        self.state
    }

    /// Set the lifecycle state.
    pub fn set_state(&mut self, state: TensorState) {
        self.state = state;
    }

    /// True once the payload has been partitioned.
    pub fn is_sharded(&self) -> bool {
        self.is_sharded
    }

    /// Mark the entity sharded or whole.
    pub fn set_sharded(&mut self, sharded: bool) {
        self.is_sharded = sharded;
    }

    /// Logical shape at wrap time.
    pub fn origin_shape(&self) -> &[usize] {
        &self.origin_shape
    }

    /// Logical element count at wrap time.
    pub fn origin_numel(&self) -> usize {
        self.origin_numel
    }

    /// Element type at wrap time.
    pub fn origin_dtype(&self) -> DType {
        self.origin_dtype
    }

    /// Physical element count of the resident payload.
    pub fn payload_numel(&self) -> usize {
        self.payload.numel()
    }
}
