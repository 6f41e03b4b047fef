use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use thiserror::Error;

/// Placement of a tensor payload.
///
/// The device is a placement tag: it records where a payload is meant to
/// live. Actual residency is the consuming runtime's concern, which lets
/// construction (and its tests) run on hosts without accelerators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
    /// Accelerator device with index.
    Gpu(usize),
}

impl Device {
    /// True if the device is an accelerator.
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Device::Gpu(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(index) => write!(f, "gpu:{index}"),
        }
    }
}

thread_local! {
    /// Accelerator index construction code on this rank targets by default.
    static CURRENT_ACCELERATOR: Cell<usize> = Cell::new(0);
}

/// Set the accelerator index used for buffer placement on this rank.
pub fn set_current_accelerator(index: usize) {
    CURRENT_ACCELERATOR.with(|cell| cell.set(index));
}

/// The accelerator device buffers and no-shard scopes target on this rank.
pub fn current_accelerator() -> Device {
    Device::Gpu(CURRENT_ACCELERATOR.with(|cell| cell.get()))
}

/// Element type of a tensor payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    F32,
    F16,
    BF16,
    I64,
    I32,
    Bool,
}

impl DType {
    /// True for the floating-point element types.
    pub fn is_floating_point(&self) -> bool {
        matches!(self, DType::F32 | DType::F16 | DType::BF16)
    }

    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::BF16 => 2,
            DType::I64 => 8,
            DType::Bool => 1,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::I64 => "i64",
            DType::I32 => "i32",
            DType::Bool => "bool",
        };
        write!(f, "{name}")
    }
}

/// zshard error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid context configuration field combination.
    #[error("Invalid context configuration: {0}")]
    ConfigInvariant(String),

    /// Shape mismatch or unsupported dimensionality.
    #[error("Shape error: {0}")]
    Shape(String),

    /// Operation requested on an unsupported element type.
    #[error("DType error: {0}")]
    DType(String),

    /// A sharded-initialization guarantee was broken.
    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    /// A context or interception scope is already active on this rank.
    #[error("Context already active: {0}")]
    ContextActive(String),

    /// Collective communication failed.
    #[error("Communication error: {0}")]
    Comm(String),
}

/// Result alias for zshard operations.
pub type Result<T> = std::result::Result<T, Error>;
