//! Causal self-attention block.

use crate::hooks::post_init;
use crate::linear::Linear;
use crate::module::{Buffer, Module, Param};
use crate::rope::RotaryEmbedding;
use crate::types::{Error, Result};

/// Multi-head attention projections plus rotary tables.
///
/// Holds no direct parameters of its own; the projections wrap themselves
/// as they build, and the parent visit only re-walks them.
pub struct CausalAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    rope: RotaryEmbedding,
    num_heads: usize,
    head_dim: usize,
}

impl CausalAttention {
    pub fn new(hidden_size: usize, num_heads: usize, max_positions: usize) -> Result<Self> {
        if num_heads == 0 || hidden_size % num_heads != 0 {
            return Err(Error::Shape(format!(
                "hidden size {hidden_size} is not divisible into {num_heads} heads"
            )));
        }
        let head_dim = hidden_size / num_heads;
        let q_proj = Linear::without_bias(hidden_size, hidden_size)?;
        let k_proj = Linear::without_bias(hidden_size, hidden_size)?;
        let v_proj = Linear::without_bias(hidden_size, hidden_size)?;
        let o_proj = Linear::without_bias(hidden_size, hidden_size)?;
        let rope = RotaryEmbedding::new(head_dim, max_positions)?;
        post_init(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            rope,
            num_heads,
            head_dim,
        })
    }

    pub fn q_proj(&self) -> &Linear {
        &self.q_proj
    }

    pub fn k_proj(&self) -> &Linear {
        &self.k_proj
    }

    pub fn v_proj(&self) -> &Linear {
        &self.v_proj
    }

    pub fn o_proj(&self) -> &Linear {
        &self.o_proj
    }

    pub fn rope(&self) -> &RotaryEmbedding {
        &self.rope
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }
}

impl Module for CausalAttention {
    fn visit_params(&self, f: &mut dyn FnMut(&Param)) {
        self.q_proj.visit_params(f);
        self.k_proj.visit_params(f);
        self.v_proj.visit_params(f);
        self.o_proj.visit_params(f);
    }

    fn visit_buffers(&mut self, f: &mut dyn FnMut(&mut Buffer)) {
        self.rope.visit_buffers(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_shapes() {
        let attn = CausalAttention::new(16, 2, 8).unwrap();
        assert_eq!(attn.head_dim(), 8);
        assert_eq!(attn.q_proj().weight().shape(), vec![16, 16]);
        assert_eq!(attn.rope().cos().data().shape(), &[8, 4]);
    }

    #[test]
    fn test_rejects_indivisible_heads() {
        assert!(matches!(
            CausalAttention::new(10, 3, 8),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn test_visits_all_projections() {
        let attn = CausalAttention::new(16, 2, 8).unwrap();
        let mut count = 0;
        attn.visit_params(&mut |_| count += 1);
        assert_eq!(count, 4);
    }
}
