//! RMS normalization layer.

use crate::hooks::post_init;
use crate::module::{Module, Param};
use crate::tensor::TensorPayload;
use crate::types::{Device, Error, Result};

/// Scale vector for root-mean-square normalization, initialized to ones.
pub struct RmsNorm {
    weight: Param,
    eps: f32,
}

impl RmsNorm {
    pub fn new(hidden_size: usize) -> Result<Self> {
        Self::with_eps(hidden_size, 1e-6)
    }

    pub fn with_eps(hidden_size: usize, eps: f32) -> Result<Self> {
        if hidden_size == 0 {
            return Err(Error::Shape("norm weight must be non-empty".into()));
        }
        let weight = Param::new(TensorPayload::ones(&[hidden_size], Device::Cpu));
        post_init(Self { weight, eps })
    }

    pub fn weight(&self) -> &Param {
        &self.weight
    }

    pub fn eps(&self) -> f32 {
        self.eps
    }
}

impl Module for RmsNorm {
    fn visit_params(&self, f: &mut dyn FnMut(&Param)) {
        f(&self.weight);
    }
}
