//! Sharded parameter initialization context.
//!
//! [`ShardInitContext`] installs itself as the interception hook for a scope:
//! every module constructed inside the scope has its parameters wrapped,
//! half-cast, moved to the target device and sharded (or reserved) the moment
//! its constructor finishes. On scope exit replicated unsharded parameters
//! are broadcast from the first data rank and every compute payload is moved
//! into its wrap entity, leaving the parameters released.

use crate::comm::{self, GroupHandle, ParallelMode};
use crate::hooks::{self, PostInitHook};
use crate::init::{self, FanRoutine};
use crate::module::{Module, Param};
use crate::rng::{self, RngState};
use crate::shard_strategy::ShardStrategy;
use crate::sharded_tensor::ShardedTensorEntity;
use crate::types::{self, Device, Error, Result};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Seed used by contexts that do not pass their own.
pub const DEFAULT_SEED: u64 = 1023;

thread_local! {
    static CURRENT_CONTEXT: RefCell<Weak<CtxInner>> = const { RefCell::new(Weak::new()) };
}

fn current_context() -> Option<Rc<CtxInner>> {
    CURRENT_CONTEXT.with(|slot| slot.borrow().upgrade())
}

/// How parameters constructed under a context are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    target_device: Device,
    is_replicated: bool,
    shard_param: bool,
}

impl ContextConfig {
    /// Validate and build a placement config.
    ///
    /// Sharding requires replication, and replicated unsharded parameters
    /// must target an accelerator so the exit broadcast has somewhere to
    /// land.
    pub fn new(target_device: Device, is_replicated: bool, shard_param: bool) -> Result<Self> {
        if shard_param && !is_replicated {
            return Err(Error::ConfigInvariant(
                "non-replicated parameters cannot be sharded".to_string(),
            ));
        }
        if is_replicated && !shard_param && !target_device.is_accelerator() {
            return Err(Error::ConfigInvariant(format!(
                "replicated unsharded parameters must target an accelerator \
                 device for the exit broadcast, got {target_device}"
            )));
        }
        Ok(Self {
            target_device,
            is_replicated,
            shard_param,
        })
    }

    /// Device parameters are moved to when wrapped.
    pub fn target_device(&self) -> Device {
        self.target_device
    }

    /// Whether wrapped parameters hold the same value on every data rank.
    pub fn is_replicated(&self) -> bool {
        self.is_replicated
    }

    /// Whether wrapped parameters are sharded across the data group.
    pub fn shard_param(&self) -> bool {
        self.shard_param
    }
}

/// Per-scope bookkeeping captured on enter and consumed on exit.
struct RunState {
    param_list: Vec<Param>,
    saved_rng: RngState,
    saved_fan: FanRoutine,
}

struct CtxInner {
    config: RefCell<ContextConfig>,
    strategy: Arc<dyn ShardStrategy>,
    dp_group: GroupHandle,
    seed: u64,
    numel_counter: RefCell<Arc<AtomicU64>>,
    run: RefCell<Option<RunState>>,
}

/// Scoped interception context that shards parameters as modules build.
///
/// Only one context may exist per rank at a time; a second [`new`] while one
/// is alive returns [`Error::ContextActive`]. The context is consumed by
/// [`scope`], which releases the slot when it returns.
///
/// [`new`]: ShardInitContext::new
/// [`scope`]: ShardInitContext::scope
pub struct ShardInitContext {
    inner: Rc<CtxInner>,
}

impl std::fmt::Debug for ShardInitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardInitContext").finish_non_exhaustive()
    }
}

impl ShardInitContext {
    /// Build a context targeting `target_device`, seeding construction RNG
    /// from `seed` and this rank's position in the data group.
    pub fn new(
        target_device: Device,
        strategy: Arc<dyn ShardStrategy>,
        seed: u64,
        shard_param: bool,
    ) -> Result<Self> {
        let config = ContextConfig::new(target_device, true, shard_param)?;
        if current_context().is_some() {
            return Err(Error::ContextActive(
                "a sharded init context already exists on this rank".to_string(),
            ));
        }
        let inner = Rc::new(CtxInner {
            config: RefCell::new(config),
            strategy,
            dp_group: comm::group(ParallelMode::Data),
            seed,
            numel_counter: RefCell::new(Arc::new(AtomicU64::new(0))),
            run: RefCell::new(None),
        });
        CURRENT_CONTEXT.with(|slot| *slot.borrow_mut() = Rc::downgrade(&inner));
        Ok(Self { inner })
    }

    /// Replace the element counter with a caller-owned one.
    pub fn with_numel_counter(self, counter: Arc<AtomicU64>) -> Self {
        *self.inner.numel_counter.borrow_mut() = counter;
        self
    }

    /// Handle to the counter of elements wrapped so far.
    pub fn numel_counter(&self) -> Arc<AtomicU64> {
        self.inner.numel_counter.borrow().clone()
    }

    /// Device wrapped parameters are moved to.
    pub fn target_device(&self) -> Device {
        self.inner.config.borrow().target_device()
    }

    /// Run `body` with interception active, consuming the context.
    ///
    /// Enter swaps in the origin-shape fan routine and reseeds the RNG;
    /// exit broadcasts replicated unsharded parameters, moves compute
    /// payloads into their entities and restores RNG and fan state. A body
    /// error restores state without running any collective.
    pub fn scope<T>(self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        let hook: Rc<dyn PostInitHook> = self.inner.clone();
        hooks::intercept_scope(hook, body)
    }
}

impl CtxInner {
    fn rank_seed(&self) -> u64 {
        let rank = self.dp_group.rank() as u64;
        self.seed
            .wrapping_add(self.seed.wrapping_add(1).wrapping_mul(rank))
    }

    fn wrap_param(&self, param: &Param, config: ContextConfig) -> Result<()> {
        self.numel_counter
            .borrow()
            .fetch_add(param.numel() as u64, Ordering::Relaxed);
        param.set_replicated(config.is_replicated());
        param.cast_to_half();
        param.move_to(config.target_device());

        if config.shard_param() {
            let mut entity = ShardedTensorEntity::new(param.take_data());
            self.strategy
                .shard(&mut [&mut entity], self.dp_group.as_ref())?;
            param.put_data(entity.payload().clone());
            param.install_entity(entity);
        } else {
            let entity = ShardedTensorEntity::reserve(&param.data());
            param.install_entity(entity);
        }

        let mut run = self.run.borrow_mut();
        let run = run.as_mut().ok_or_else(|| {
            Error::InternalInvariant(
                "parameter wrapped outside an active scope run".to_string(),
            )
        })?;
        run.param_list.push(param.clone());
        Ok(())
    }

    fn exit_pass(&self, params: &[Param]) -> Result<()> {
        let src = self.dp_group.ranks().first().copied().unwrap_or(0);
        for param in params {
            if !param.is_wrapped() {
                return Err(Error::InternalInvariant(
                    "parameter in scope bookkeeping lacks wrap metadata".to_string(),
                ));
            }
            let sharded = param.entity().map(|e| e.is_sharded()).unwrap_or(false);
            if !sharded && param.is_replicated() {
                self.dp_group.broadcast(&mut param.data_mut(), src)?;
            }
            let payload = param.take_data();
            if let Some(mut entity) = param.entity_mut() {
                entity.replace_payload(payload);
            }
        }
        Ok(())
    }

    fn restore(&self, run: &RunState) {
        init::swap_fan_routine(run.saved_fan);
        rng::set_state(run.saved_rng.clone());
    }
}

impl PostInitHook for CtxInner {
    fn before_enter(&self) {
        let saved_fan = init::swap_fan_routine(init::fan_from_origin_shape);
        let saved_rng = rng::state();
        rng::manual_seed(self.rank_seed());
        log::debug!(
            "entering sharded init scope: rank {} of {}, target {}",
            self.dp_group.rank(),
            self.dp_group.world_size(),
            self.config.borrow().target_device()
        );
        *self.run.borrow_mut() = Some(RunState {
            param_list: Vec::new(),
            saved_rng,
            saved_fan,
        });
    }

    fn on_constructed(&self, module: &mut dyn Module) -> Result<()> {
        let config = *self.config.borrow();
        let mut first_err = None;
        module.visit_params(&mut |param| {
            if first_err.is_some() || param.is_wrapped() {
                return;
            }
            if let Err(err) = self.wrap_param(param, config) {
                first_err = Some(err);
            }
        });
        if let Some(err) = first_err {
            return Err(err);
        }
        module.visit_buffers(&mut |buffer| {
            let data = buffer.data_mut();
            data.to_device(types::current_accelerator());
            data.cast_to_half();
        });
        Ok(())
    }

    fn after_exit(&self) -> Result<()> {
        let run = self.run.borrow_mut().take().ok_or_else(|| {
            Error::InternalInvariant("scope exit without a matching enter".to_string())
        })?;
        let result = self.exit_pass(&run.param_list);
        self.restore(&run);
        if result.is_ok() {
            log::debug!(
                "leaving sharded init scope: {} parameters, {} elements wrapped",
                run.param_list.len(),
                self.numel_counter.borrow().load(Ordering::Relaxed)
            );
        }
        result
    }

    fn on_scope_error(&self) {
        if let Some(run) = self.run.borrow_mut().take() {
            self.restore(&run);
            log::warn!("sharded init scope aborted; state restored without collectives");
        }
    }
}

/// Guard restoring a hijacked context config on drop.
pub struct HijackGuard {
    restore: Option<(Rc<CtxInner>, ContextConfig)>,
}

impl Drop for HijackGuard {
    fn drop(&mut self) {
        if let Some((inner, config)) = self.restore.take() {
            *inner.config.borrow_mut() = config;
        }
    }
}

/// Swap the active context's placement config until the guard drops.
///
/// Without an active context this is a no-op guard, so module code can call
/// it unconditionally.
pub fn hijack_config(config: ContextConfig) -> HijackGuard {
    match current_context() {
        Some(inner) => {
            let previous = std::mem::replace(&mut *inner.config.borrow_mut(), config);
            HijackGuard {
                restore: Some((inner, previous)),
            }
        }
        None => HijackGuard { restore: None },
    }
}

/// Keep parameters built while the guard lives unsharded on the current
/// accelerator. `is_replicated: false` marks them rank-local so the exit
/// broadcast skips them.
pub fn no_shard_scope(is_replicated: bool) -> Result<HijackGuard> {
    let config = ContextConfig::new(types::current_accelerator(), is_replicated, false)?;
    Ok(hijack_config(config))
}

/// Run `f` under [`no_shard_scope`].
pub fn with_no_shard<T>(is_replicated: bool, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let _guard = no_shard_scope(is_replicated)?;
    f()
}
