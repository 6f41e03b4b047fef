//! Linear projection layer.

use crate::hooks::post_init;
use crate::init;
use crate::module::{Module, Param};
use crate::tensor::TensorPayload;
use crate::types::{Device, Error, Result};

/// Affine projection with weight `[out_features, in_features]` and an
/// optional bias.
#[derive(Debug)]
pub struct Linear {
    weight: Param,
    bias: Option<Param>,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Linear layer with bias.
    pub fn new(in_features: usize, out_features: usize) -> Result<Self> {
        Self::build(in_features, out_features, true)
    }

    /// Linear layer without bias.
    pub fn without_bias(in_features: usize, out_features: usize) -> Result<Self> {
        Self::build(in_features, out_features, false)
    }

    fn build(in_features: usize, out_features: usize, with_bias: bool) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(Error::Shape(format!(
                "linear features must be non-zero, got {in_features}x{out_features}"
            )));
        }
        let weight = Param::new(TensorPayload::zeros(
            &[out_features, in_features],
            Device::Cpu,
        ));
        init::kaiming_uniform(&weight, (5.0f64).sqrt())?;

        let bias = if with_bias {
            let bias = Param::new(TensorPayload::zeros(&[out_features], Device::Cpu));
            let bound = init::linear_bias_bound(&weight)?;
            init::uniform(&bias, -bound, bound)?;
            Some(bias)
        } else {
            None
        };

        post_init(Self {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    pub fn weight(&self) -> &Param {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Param> {
        self.bias.as_ref()
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

impl Module for Linear {
    fn visit_params(&self, f: &mut dyn FnMut(&Param)) {
        f(&self.weight);
        if let Some(bias) = &self.bias {
            f(bias);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DType;

    #[test]
    fn test_new_shapes() {
        let layer = Linear::new(8, 4).unwrap();
        assert_eq!(layer.weight().shape(), vec![4, 8]);
        assert_eq!(layer.bias().unwrap().shape(), vec![4]);
        assert_eq!(layer.weight().dtype(), DType::F32);
    }

    #[test]
    fn test_without_bias() {
        let layer = Linear::without_bias(8, 4).unwrap();
        assert!(layer.bias().is_none());
    }

    #[test]
    fn test_rejects_zero_features() {
        assert!(matches!(Linear::new(0, 4), Err(Error::Shape(_))));
    }

    #[test]
    fn test_weight_within_kaiming_bound() {
        let layer = Linear::new(16, 16).unwrap();
        // a = sqrt(5): bound = sqrt(3) * sqrt(2/6) / sqrt(fan_in) = 1 / sqrt(fan_in)
        let bound = 1.0 / (16.0f32).sqrt();
        for value in layer.weight().data().to_f32_vec() {
            assert!(value.abs() <= bound + f32::EPSILON);
        }
    }

    #[test]
    fn test_visit_params_order() {
        let layer = Linear::new(8, 4).unwrap();
        let mut shapes = Vec::new();
        layer.visit_params(&mut |p| shapes.push(p.shape()));
        assert_eq!(shapes, vec![vec![4, 8], vec![4]]);
    }
}
