//! Token embedding table.

use crate::hooks::post_init;
use crate::init;
use crate::module::{Module, Param};
use crate::tensor::TensorPayload;
use crate::types::{Device, Error, Result};

/// Lookup table of shape `[vocab_size, embed_dim]`, N(0, 1) initialized.
pub struct Embedding {
    weight: Param,
    vocab_size: usize,
    embed_dim: usize,
    padding_idx: Option<usize>,
}

impl Embedding {
    pub fn new(vocab_size: usize, embed_dim: usize) -> Result<Self> {
        if vocab_size == 0 || embed_dim == 0 {
            return Err(Error::Shape(format!(
                "embedding table must be non-empty, got {vocab_size}x{embed_dim}"
            )));
        }
        let weight = Param::new(TensorPayload::zeros(&[vocab_size, embed_dim], Device::Cpu));
        init::normal(&weight, 0.0, 1.0)?;
        post_init(Self {
            weight,
            vocab_size,
            embed_dim,
            padding_idx: None,
        })
    }

    /// Embedding whose `padding_idx` row is zeroed.
    ///
    /// The row is only touched when the parameter still holds the full
    /// table; once a sharding scope has replaced it with a flat shard the
    /// zeroing is skipped.
    pub fn with_padding_idx(
        vocab_size: usize,
        embed_dim: usize,
        padding_idx: usize,
    ) -> Result<Self> {
        if padding_idx >= vocab_size {
            return Err(Error::Shape(format!(
                "padding index {padding_idx} out of range for vocab size {vocab_size}"
            )));
        }
        let mut embedding = Self::new(vocab_size, embed_dim)?;
        embedding.padding_idx = Some(padding_idx);
        {
            let mut data = embedding.weight.data_mut();
            if data.shape() == [vocab_size, embed_dim] {
                data.zero_range(padding_idx * embed_dim, embed_dim)?;
            }
        }
        post_init(embedding)
    }

    pub fn weight(&self) -> &Param {
        &self.weight
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    pub fn padding_idx(&self) -> Option<usize> {
        self.padding_idx
    }
}

impl Module for Embedding {
    fn visit_params(&self, f: &mut dyn FnMut(&Param)) {
        f(&self.weight);
    }
}
