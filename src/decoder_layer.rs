//! Pre-norm decoder block.

use crate::attention::CausalAttention;
use crate::hooks::post_init;
use crate::moe_layer::FeedForward;
use crate::module::{Buffer, Module, Param};
use crate::rms_norm::RmsNorm;
use crate::types::Result;

/// Norm, attention, norm, feed-forward.
pub struct DecoderLayer {
    input_norm: RmsNorm,
    attention: CausalAttention,
    post_attention_norm: RmsNorm,
    ffn: FeedForward,
}

impl DecoderLayer {
    pub fn new(
        hidden_size: usize,
        intermediate_size: usize,
        num_heads: usize,
        max_positions: usize,
    ) -> Result<Self> {
        let input_norm = RmsNorm::new(hidden_size)?;
        let attention = CausalAttention::new(hidden_size, num_heads, max_positions)?;
        let post_attention_norm = RmsNorm::new(hidden_size)?;
        let ffn = FeedForward::new(hidden_size, intermediate_size)?;
        post_init(Self {
            input_norm,
            attention,
            post_attention_norm,
            ffn,
        })
    }

    pub fn attention(&self) -> &CausalAttention {
        &self.attention
    }

    pub fn ffn(&self) -> &FeedForward {
        &self.ffn
    }

    pub fn input_norm(&self) -> &RmsNorm {
        &self.input_norm
    }

    pub fn post_attention_norm(&self) -> &RmsNorm {
        &self.post_attention_norm
    }
}

impl Module for DecoderLayer {
    fn visit_params(&self, f: &mut dyn FnMut(&Param)) {
        self.input_norm.visit_params(f);
        self.attention.visit_params(f);
        self.post_attention_norm.visit_params(f);
        self.ffn.visit_params(f);
    }

    fn visit_buffers(&mut self, f: &mut dyn FnMut(&mut Buffer)) {
        self.attention.visit_buffers(f);
    }
}
