//! Module, parameter, and buffer abstractions.
//!
//! `Param` is a shared handle the way tensor handles are shared in every
//! mainstream runtime: clones refer to the same storage, so a parameter can
//! sit in its owning layer while the active scope keeps it on a bookkeeping
//! list. One rank is one thread, so the handle is deliberately not `Send`.

use crate::sharded_tensor::ShardedTensorEntity;
use crate::tensor::TensorPayload;
use crate::types::{DType, Device};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

struct ParamInner {
    data: TensorPayload,
    grad: Option<TensorPayload>,
    entity: Option<ShardedTensorEntity>,
    is_replicated: bool,
}

/// A learnable parameter.
#[derive(Clone)]
pub struct Param {
    inner: Rc<RefCell<ParamInner>>,
}

impl Param {
    /// Wrap a payload as a trainable parameter, replicated by default.
    pub fn new(data: TensorPayload) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ParamInner {
                data,
                grad: None,
                entity: None,
                is_replicated: true,
            })),
        }
    }

    /// The module-facing compute payload.
    ///
    /// Holds full values during construction; after a sharded scope exits
    /// this is a released stub and the entity payload is authoritative.
    pub fn data(&self) -> Ref<'_, TensorPayload> {
        Ref::map(self.inner.borrow(), |p| &p.data)
    }

    /// Mutable access to the compute payload.
    pub fn data_mut(&self) -> RefMut<'_, TensorPayload> {
        RefMut::map(self.inner.borrow_mut(), |p| &mut p.data)
    }

    /// The gradient payload, if one is attached.
    pub fn grad(&self) -> Option<Ref<'_, TensorPayload>> {
        Ref::filter_map(self.inner.borrow(), |p| p.grad.as_ref()).ok()
    }

    /// Attach or clear the gradient payload.
    pub fn set_grad(&self, grad: Option<TensorPayload>) {
        self.inner.borrow_mut().grad = grad;
    }

    /// The wrap entity, if this parameter has been intercepted.
    pub fn entity(&self) -> Option<Ref<'_, ShardedTensorEntity>> {
        Ref::filter_map(self.inner.borrow(), |p| p.entity.as_ref()).ok()
    }

    /// Mutable access to the wrap entity.
    pub fn entity_mut(&self) -> Option<RefMut<'_, ShardedTensorEntity>> {
        RefMut::filter_map(self.inner.borrow_mut(), |p| p.entity.as_mut()).ok()
    }

    /// True once the parameter carries wrap metadata.
    pub fn is_wrapped(&self) -> bool {
        self.inner.borrow().entity.is_some()
    }

    /// True if the parameter's full data is meant to match across ranks.
    pub fn is_replicated(&self) -> bool {
        self.inner.borrow().is_replicated
    }

    /// Mark the parameter replicated or rank-local.
    pub fn set_replicated(&self, replicated: bool) {
        self.inner.borrow_mut().is_replicated = replicated;
    }

    /// Element count of the compute payload.
    pub fn numel(&self) -> usize {
        self.inner.borrow().data.numel()
    }

    /// Shape of the compute payload.
    pub fn shape(&self) -> Vec<usize> {
        self.inner.borrow().data.shape().to_vec()
    }

    /// Element type of the compute payload.
    pub fn dtype(&self) -> DType {
        self.inner.borrow().data.dtype()
    }

    /// Placement of the compute payload.
    pub fn device(&self) -> Device {
        self.inner.borrow().data.device()
    }

    pub(crate) fn cast_to_half(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.data.is_floating_point() {
            inner.data.cast_to_half();
        }
        if let Some(grad) = inner.grad.as_mut() {
            if grad.is_floating_point() {
                grad.cast_to_half();
            }
        }
    }

    pub(crate) fn move_to(&self, device: Device) {
        let mut inner = self.inner.borrow_mut();
        inner.data.to_device(device);
        if let Some(grad) = inner.grad.as_mut() {
            grad.to_device(device);
        }
    }

    pub(crate) fn take_data(&self) -> TensorPayload {
        self.inner.borrow_mut().data.release()
    }

    pub(crate) fn put_data(&self, data: TensorPayload) {
        self.inner.borrow_mut().data = data;
    }

    pub(crate) fn install_entity(&self, entity: ShardedTensorEntity) {
        self.inner.borrow_mut().entity = Some(entity);
    }
}

impl std::fmt::Debug for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Param")
            .field("shape", &inner.data.shape())
            .field("dtype", &inner.data.dtype())
            .field("device", &inner.data.device())
            .field("wrapped", &inner.entity.is_some())
            .field("is_replicated", &inner.is_replicated)
            .finish()
    }
}

/// A non-learnable tensor attached to a module (rotary caches, masks).
#[derive(Debug, Clone)]
pub struct Buffer {
    data: TensorPayload,
}

impl Buffer {
    /// Wrap a payload as a buffer.
    pub fn new(data: TensorPayload) -> Self {
        Self { data }
    }

    /// Borrow the payload.
    pub fn data(&self) -> &TensorPayload {
        &self.data
    }

    /// Mutably borrow the payload.
    pub fn data_mut(&mut self) -> &mut TensorPayload {
        &mut self.data
    }
}

/// A composable model component.
///
/// The visit methods walk the module's whole subtree, composites delegating
/// to their children. Submodules built inside a scope are intercepted by
/// their own constructors first, so a parent's visit mostly re-walks
/// already wrapped parameters; the wrap marker keeps that harmless. Any
/// type implementing this trait participates in construction interception,
/// including types defined after a scope has begun.
pub trait Module {
    /// Visit every parameter reachable from this module.
    fn visit_params(&self, f: &mut dyn FnMut(&Param));

    /// Visit every buffer reachable from this module.
    fn visit_buffers(&mut self, _f: &mut dyn FnMut(&mut Buffer)) {}
}
