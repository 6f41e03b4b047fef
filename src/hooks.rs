//! Construction hooks for module interception.
//!
//! A scope installs a [`PostInitHook`] in a rank-local slot; every module
//! constructor hands its finished value to [`post_init`], which dispatches
//! to the installed hook, if any. Constructors stay ordinary functions with
//! no hidden rewriting, and the participating hierarchy stays open: any type
//! implementing [`Module`] takes part, including types defined after the
//! scope begins.
//!
//! Scope discipline: installation and removal are paired on every exit path
//! (normal return, error return, panic). On success the hook's `after_exit`
//! runs after removal; on failure `on_scope_error` runs instead, so a
//! faulted rank never enters a collective its peers may not reach.
//!
//! # Example
//!
//! ```ignore
//! use zshard::{intercept_scope, PostInitHook};
//!
//! let hook: Rc<dyn PostInitHook> = Rc::new(MyHook::default());
//! let model = intercept_scope(hook, || TinyModel::new(&config))?;
//! ```

use crate::module::Module;
use crate::types::{Error, Result};
use std::cell::RefCell;
use std::rc::Rc;

/// Callbacks fired around and during an interception scope.
pub trait PostInitHook {
    /// Runs once when the scope is entered, before any construction.
    fn before_enter(&self) {}

    /// Runs for every module instance completed while the scope is active.
    ///
    /// May fire more than once for one instance when a constructor delegates
    /// to another constructor internally; implementations must be idempotent
    /// per intercepted entity. An error propagates out of the constructor
    /// that triggered the dispatch.
    fn on_constructed(&self, module: &mut dyn Module) -> Result<()>;

    /// Success-path teardown, run once after the hook is uninstalled.
    fn after_exit(&self) -> Result<()> {
        Ok(())
    }

    /// Fault-path teardown, run once after the hook is uninstalled. Must not
    /// block on other ranks.
    fn on_scope_error(&self) {}
}

thread_local! {
    /// Hook receiving construction events on this rank, if a scope is active.
    static ACTIVE_HOOK: RefCell<Option<Rc<dyn PostInitHook>>> = RefCell::new(None);
}

/// Hand a finished module to the active interception scope.
///
/// Call at the end of every constructor, on the fully built value. Outside
/// a scope this is a pass-through, so modules stay usable standalone.
pub fn post_init<M: Module>(mut module: M) -> Result<M> {
    let hook = ACTIVE_HOOK.with(|slot| slot.borrow().clone());
    if let Some(hook) = hook {
        hook.on_constructed(&mut module)?;
    }
    Ok(module)
}

/// True if an interception scope is active on this rank.
pub fn scope_active() -> bool {
    ACTIVE_HOOK.with(|slot| slot.borrow().is_some())
}

struct InstallGuard {
    hook: Rc<dyn PostInitHook>,
    armed: bool,
}

impl InstallGuard {
    fn install(hook: Rc<dyn PostInitHook>) -> Result<Self> {
        ACTIVE_HOOK.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_some() {
                return Err(Error::ContextActive(
                    "an interception scope is already installed on this rank".into(),
                ));
            }
            *slot = Some(hook.clone());
            Ok(())
        })?;
        log::trace!("interception scope installed");
        Ok(Self { hook, armed: true })
    }

    fn uninstall(&mut self) {
        if self.armed {
            self.armed = false;
            ACTIVE_HOOK.with(|slot| slot.borrow_mut().take());
            log::trace!("interception scope removed");
        }
    }
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.uninstall();
        // Reached only when unwinding out of the scope body.
        if std::thread::panicking() {
            self.hook.on_scope_error();
        }
    }
}

/// Run `body` with `hook` installed as this rank's interception scope.
///
/// Fails fast with [`Error::ContextActive`] if a scope is already active.
/// The hook is removed on every exit path before any teardown callback runs.
pub fn intercept_scope<T, F>(hook: Rc<dyn PostInitHook>, body: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let mut guard = InstallGuard::install(hook.clone())?;
    hook.before_enter();
    let outcome = body();
    guard.uninstall();
    match outcome {
        Ok(value) => {
            hook.after_exit()?;
            Ok(value)
        }
        Err(err) => {
            hook.on_scope_error();
            Err(err)
        }
    }
}
