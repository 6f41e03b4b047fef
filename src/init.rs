//! Weight initialization routines.
//!
//! Fan computation is routed through a thread-local so a sharding scope can
//! swap in a variant that reads the pre-shard shape from wrap metadata.
//! Outside any scope the physical shape is used directly.

use crate::module::Param;
use crate::rng;
use crate::types::{Error, Result};
use std::cell::Cell;

/// Computes `(fan_in, fan_out)` for a parameter.
pub type FanRoutine = fn(&Param) -> Result<(usize, usize)>;

thread_local! {
    static FAN_ROUTINE: Cell<FanRoutine> = const { Cell::new(fan_from_physical_shape) };
}

/// Swap the active fan routine, returning the previous one.
pub(crate) fn swap_fan_routine(routine: FanRoutine) -> FanRoutine {
    FAN_ROUTINE.with(|slot| slot.replace(routine))
}

fn fan_from_shape(shape: &[usize]) -> Result<(usize, usize)> {
    if shape.len() < 2 {
        return Err(Error::Shape(format!(
            "fan computation requires at least 2 dimensions, got shape {:?}",
            shape
        )));
    }
    let receptive: usize = shape[2..].iter().product();
    Ok((shape[1] * receptive, shape[0] * receptive))
}

/// Fan from the parameter's physical shape.
pub fn fan_from_physical_shape(param: &Param) -> Result<(usize, usize)> {
    fan_from_shape(&param.shape())
}

/// Fan from the pre-shard shape recorded in wrap metadata, falling back to
/// the physical shape for unwrapped or unsharded parameters.
pub fn fan_from_origin_shape(param: &Param) -> Result<(usize, usize)> {
    if let Some(entity) = param.entity() {
        if entity.is_sharded() {
            return fan_from_shape(entity.origin_shape());
        }
    }
    fan_from_shape(&param.shape())
}

/// Compute `(fan_in, fan_out)` via the active routine.
pub fn calculate_fan_in_and_fan_out(param: &Param) -> Result<(usize, usize)> {
    let routine = FAN_ROUTINE.with(|slot| slot.get());
    routine(param)
}

/// Kaiming uniform fill, `a` being the negative slope of the following
/// rectifier.
pub fn kaiming_uniform(param: &Param, a: f64) -> Result<()> {
    let (fan_in, _) = calculate_fan_in_and_fan_out(param)?;
    let gain = (2.0 / (1.0 + a * a)).sqrt();
    let std = gain / (fan_in as f64).sqrt();
    let bound = (3.0f64).sqrt() * std;
    uniform(param, -bound as f32, bound as f32)
}

/// Uniform fill over `[low, high)`.
pub fn uniform(param: &Param, low: f32, high: f32) -> Result<()> {
    let device = param.device();
    let mut data = param.data_mut();
    rng::with_device(device, |rng| data.fill_uniform(rng, low, high))
}

/// Normal fill with the given mean and standard deviation.
pub fn normal(param: &Param, mean: f32, std: f32) -> Result<()> {
    let device = param.device();
    let mut data = param.data_mut();
    rng::with_device(device, |rng| data.fill_normal(rng, mean, std))
}

/// Bound for the uniform bias fill paired with a kaiming weight.
pub fn linear_bias_bound(weight: &Param) -> Result<f32> {
    let (fan_in, _) = calculate_fan_in_and_fan_out(weight)?;
    if fan_in == 0 {
        return Err(Error::Shape(
            "bias bound undefined for zero fan-in weight".to_string(),
        ));
    }
    Ok(1.0 / (fan_in as f32).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharded_tensor::ShardedTensorEntity;
    use crate::tensor::TensorPayload;
    use crate::types::Device;

    fn param(shape: &[usize]) -> Param {
        Param::new(TensorPayload::zeros(shape, Device::Cpu))
    }

    #[test]
    fn test_fan_of_matrix() {
        let p = param(&[8, 3]);
        assert_eq!(fan_from_physical_shape(&p).unwrap(), (3, 8));
    }

    #[test]
    fn test_fan_with_receptive_field() {
        // Conv-style shape: receptive field multiplies both fans.
        let p = param(&[16, 4, 3, 3]);
        assert_eq!(fan_from_physical_shape(&p).unwrap(), (36, 144));
    }

    #[test]
    fn test_fan_rejects_vector() {
        let p = param(&[5]);
        assert!(matches!(
            fan_from_physical_shape(&p),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn test_origin_fan_reads_wrap_metadata() {
        let p = param(&[6]);
        let mut entity =
            ShardedTensorEntity::new(TensorPayload::zeros(&[4, 3], Device::Cpu));
        entity.set_sharded(true);
        p.install_entity(entity);

        // Physical shape is a flat shard; origin shape drives the fan.
        assert_eq!(fan_from_origin_shape(&p).unwrap(), (3, 4));
        assert!(fan_from_physical_shape(&p).is_err());
    }

    #[test]
    fn test_swap_routine_round_trips() {
        let previous = swap_fan_routine(fan_from_origin_shape);
        let p = param(&[2, 2]);
        assert_eq!(calculate_fan_in_and_fan_out(&p).unwrap(), (2, 2));
        swap_fan_routine(previous);
    }

    #[test]
    fn test_kaiming_respects_bound() {
        let p = param(&[32, 64]);
        kaiming_uniform(&p, (5.0f64).sqrt()).unwrap();
        // gain = sqrt(2 / (1 + 5)), std = gain / 8, bound = sqrt(3) * std
        let bound = (3.0f64).sqrt() * (2.0 / 6.0f64).sqrt() / 8.0;
        for value in p.data().to_f32_vec() {
            assert!(value.abs() <= bound as f32 + f32::EPSILON);
        }
    }

    #[test]
    fn test_normal_is_centered() {
        let p = param(&[64, 64]);
        normal(&p, 0.0, 1.0).unwrap();
        let values = p.data().to_f32_vec();
        let mean: f32 = values.iter().sum::<f32>() / values.len() as f32;
        assert!(mean.abs() < 0.1);
    }

    #[test]
    fn test_bias_bound() {
        let weight = param(&[10, 16]);
        assert!((linear_bias_bound(&weight).unwrap() - 0.25).abs() < 1e-6);
    }
}
