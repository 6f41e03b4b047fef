//! Rotary position embedding tables.

use crate::hooks::post_init;
use crate::module::{Buffer, Module, Param};
use crate::tensor::{TensorPayload, TensorStore};
use crate::types::{Device, Error, Result};

/// Precomputed cos/sin tables of shape `[max_positions, head_dim / 2]`.
///
/// The tables are buffers, not parameters: a sharding scope moves them to
/// the current accelerator and half-casts them but never shards or
/// broadcasts them.
pub struct RotaryEmbedding {
    cos: Buffer,
    sin: Buffer,
    head_dim: usize,
    max_positions: usize,
}

impl RotaryEmbedding {
    pub fn new(head_dim: usize, max_positions: usize) -> Result<Self> {
        Self::with_base(head_dim, max_positions, 10000.0)
    }

    pub fn with_base(head_dim: usize, max_positions: usize, base: f32) -> Result<Self> {
        if head_dim == 0 || head_dim % 2 != 0 {
            return Err(Error::Shape(format!(
                "rotary head dimension must be even and non-zero, got {head_dim}"
            )));
        }
        let half = head_dim / 2;
        let mut cos = vec![0.0f32; max_positions * half];
        let mut sin = vec![0.0f32; max_positions * half];
        for pos in 0..max_positions {
            for i in 0..half {
                let inv_freq = 1.0 / base.powf((2 * i) as f32 / head_dim as f32);
                let angle = pos as f32 * inv_freq;
                cos[pos * half + i] = angle.cos();
                sin[pos * half + i] = angle.sin();
            }
        }
        let shape = vec![max_positions, half];
        let cos = Buffer::new(TensorPayload::new(
            TensorStore::F32(cos),
            shape.clone(),
            Device::Cpu,
        )?);
        let sin = Buffer::new(TensorPayload::new(
            TensorStore::F32(sin),
            shape,
            Device::Cpu,
        )?);
        post_init(Self {
            cos,
            sin,
            head_dim,
            max_positions,
        })
    }

    pub fn cos(&self) -> &Buffer {
        &self.cos
    }

    pub fn sin(&self) -> &Buffer {
        &self.sin
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }
}

impl Module for RotaryEmbedding {
    fn visit_params(&self, _f: &mut dyn FnMut(&Param)) {}

    fn visit_buffers(&mut self, f: &mut dyn FnMut(&mut Buffer)) {
        f(&mut self.cos);
        f(&mut self.sin);
    }
}
