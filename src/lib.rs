//! zshard: scoped ZeRO-style parameter sharding at model build time.
//!
//! A [`ShardInitContext`] intercepts module construction: every parameter
//! built inside its scope is wrapped, cast to half precision, moved to the
//! target device and sharded across the data group before the constructor's
//! caller ever sees it. On scope exit, replicated unsharded parameters are
//! broadcast from the first data rank and redundant payloads are released.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use zshard::{Device, Linear, ShardInitContext, TensorShardStrategy, DEFAULT_SEED};
//!
//! # fn main() -> zshard::Result<()> {
//! let ctx = ShardInitContext::new(
//!     Device::Gpu(0),
//!     Arc::new(TensorShardStrategy::new()),
//!     DEFAULT_SEED,
//!     true,
//! )?;
//! let counter = ctx.numel_counter();
//! let layer = ctx.scope(|| Linear::new(64, 64))?;
//!
//! assert!(layer.weight().is_wrapped());
//! assert!(layer.weight().data().is_released());
//! assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 64 * 64 + 64);
//! # Ok(())
//! # }
//! ```

mod attention;
pub mod comm;
mod context;
mod decoder_layer;
mod decoder_model;
mod embeddings;
mod hooks;
pub mod init;
mod linear;
mod module;
mod moe_layer;
mod rms_norm;
pub mod rng;
mod rope;
mod shard_strategy;
mod sharded_tensor;
mod tensor;
mod types;

pub use attention::CausalAttention;
pub use context::{
    hijack_config, no_shard_scope, with_no_shard, ContextConfig, HijackGuard,
    ShardInitContext, DEFAULT_SEED,
};
pub use decoder_layer::DecoderLayer;
pub use decoder_model::{DecoderConfig, DecoderModel};
pub use embeddings::Embedding;
pub use hooks::{intercept_scope, post_init, scope_active, PostInitHook};
pub use linear::Linear;
pub use module::{Buffer, Module, Param};
pub use moe_layer::{FeedForward, MoeLayer};
pub use rms_norm::RmsNorm;
pub use rope::RotaryEmbedding;
pub use shard_strategy::{ShardStrategy, TensorShardStrategy};
pub use sharded_tensor::{ShardedTensorEntity, TensorState};
pub use tensor::{TensorPayload, TensorStore};
pub use types::{
    current_accelerator, set_current_accelerator, DType, Device, Error, Result,
};
