//! Whole-model assembly: embedding, decoder stack, head.

use crate::decoder_layer::DecoderLayer;
use crate::embeddings::Embedding;
use crate::hooks::post_init;
use crate::linear::Linear;
use crate::module::{Buffer, Module, Param};
use crate::rms_norm::RmsNorm;
use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};

/// Decoder model dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub max_positions: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            vocab_size: 32,
            hidden_size: 16,
            intermediate_size: 32,
            num_heads: 2,
            num_layers: 2,
            max_positions: 8,
        }
    }
}

impl DecoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0
            || self.hidden_size == 0
            || self.intermediate_size == 0
            || self.num_layers == 0
            || self.max_positions == 0
        {
            return Err(Error::Shape(
                "decoder dimensions must all be non-zero".into(),
            ));
        }
        if self.num_heads == 0 || self.hidden_size % self.num_heads != 0 {
            return Err(Error::Shape(format!(
                "hidden size {} is not divisible into {} heads",
                self.hidden_size, self.num_heads
            )));
        }
        Ok(())
    }

    /// Total parameter elements the model will hold.
    pub fn param_count(&self) -> usize {
        let per_layer = 2 * self.hidden_size
            + 4 * self.hidden_size * self.hidden_size
            + 3 * self.hidden_size * self.intermediate_size;
        self.vocab_size * self.hidden_size
            + self.num_layers * per_layer
            + self.hidden_size
            + self.hidden_size * self.vocab_size
    }
}

/// Embedding, stacked decoder layers, final norm and untied LM head.
pub struct DecoderModel {
    embed: Embedding,
    layers: Vec<DecoderLayer>,
    final_norm: RmsNorm,
    lm_head: Linear,
    config: DecoderConfig,
}

impl DecoderModel {
    pub fn build(config: &DecoderConfig) -> Result<Self> {
        config.validate()?;
        let embed = Embedding::new(config.vocab_size, config.hidden_size)?;
        let layers = (0..config.num_layers)
            .map(|_| {
                DecoderLayer::new(
                    config.hidden_size,
                    config.intermediate_size,
                    config.num_heads,
                    config.max_positions,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let final_norm = RmsNorm::new(config.hidden_size)?;
        let lm_head = Linear::without_bias(config.hidden_size, config.vocab_size)?;
        post_init(Self {
            embed,
            layers,
            final_norm,
            lm_head,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn embed(&self) -> &Embedding {
        &self.embed
    }

    pub fn layers(&self) -> &[DecoderLayer] {
        &self.layers
    }

    pub fn final_norm(&self) -> &RmsNorm {
        &self.final_norm
    }

    pub fn lm_head(&self) -> &Linear {
        &self.lm_head
    }

    /// Sum of pre-shard parameter elements, reading wrap metadata where
    /// present.
    pub fn param_count(&self) -> usize {
        let mut total = 0;
        self.visit_params(&mut |param| {
            total += param
                .entity()
                .map(|entity| entity.origin_numel())
                .unwrap_or_else(|| param.numel());
        });
        total
    }
}

impl Module for DecoderModel {
    fn visit_params(&self, f: &mut dyn FnMut(&Param)) {
        self.embed.visit_params(f);
        for layer in &self.layers {
            layer.visit_params(f);
        }
        self.final_norm.visit_params(f);
        self.lm_head.visit_params(f);
    }

    fn visit_buffers(&mut self, f: &mut dyn FnMut(&mut Buffer)) {
        for layer in &mut self.layers {
            layer.visit_buffers(f);
        }
    }
}
