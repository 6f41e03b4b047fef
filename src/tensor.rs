//! Dense tensor payloads with dtype-tagged storage.
//!
//! Payloads are plain host vectors behind a shape and a device tag. This is
//! all the construction path needs: casting, placement, deterministic fills,
//! and the flat chunking the shard strategy works on. Compute kernels belong
//! to the runtime that consumes the initialized model, not here.

use crate::types::{DType, Device, Error, Result};
use half::{bf16, f16};
use rand::Rng;

/// Raw storage for one payload, tagged by element type.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorStore {
    F32(Vec<f32>),
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    I64(Vec<i64>),
    I32(Vec<i32>),
    Bool(Vec<bool>),
}

fn chunk_slice<T: Copy + Default>(values: &[T], offset: usize, len: usize) -> Vec<T> {
    let end = (offset + len).min(values.len());
    let mut out: Vec<T> = if offset < values.len() {
        values[offset..end].to_vec()
    } else {
        Vec::new()
    };
    out.resize(len, T::default());
    out
}

impl TensorStore {
    /// Number of stored elements.
    pub fn len(&self) -> usize {
        match self {
            TensorStore::F32(v) => v.len(),
            TensorStore::F16(v) => v.len(),
            TensorStore::BF16(v) => v.len(),
            TensorStore::I64(v) => v.len(),
            TensorStore::I32(v) => v.len(),
            TensorStore::Bool(v) => v.len(),
        }
    }

    /// True if no elements are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type of this storage.
    pub fn dtype(&self) -> DType {
        match self {
            TensorStore::F32(_) => DType::F32,
            TensorStore::F16(_) => DType::F16,
            TensorStore::BF16(_) => DType::BF16,
            TensorStore::I64(_) => DType::I64,
            TensorStore::I32(_) => DType::I32,
            TensorStore::Bool(_) => DType::Bool,
        }
    }

    /// Zero-length storage of the given element type.
    pub fn empty(dtype: DType) -> TensorStore {
        match dtype {
            DType::F32 => TensorStore::F32(Vec::new()),
            DType::F16 => TensorStore::F16(Vec::new()),
            DType::BF16 => TensorStore::BF16(Vec::new()),
            DType::I64 => TensorStore::I64(Vec::new()),
            DType::I32 => TensorStore::I32(Vec::new()),
            DType::Bool => TensorStore::Bool(Vec::new()),
        }
    }

    /// `len` elements starting at `offset`, padded with the type's zero
    /// value past the end of the storage.
    pub(crate) fn chunk(&self, offset: usize, len: usize) -> TensorStore {
        match self {
            TensorStore::F32(v) => TensorStore::F32(chunk_slice(v, offset, len)),
            TensorStore::F16(v) => TensorStore::F16(chunk_slice(v, offset, len)),
            TensorStore::BF16(v) => TensorStore::BF16(chunk_slice(v, offset, len)),
            TensorStore::I64(v) => TensorStore::I64(chunk_slice(v, offset, len)),
            TensorStore::I32(v) => TensorStore::I32(chunk_slice(v, offset, len)),
            TensorStore::Bool(v) => TensorStore::Bool(chunk_slice(v, offset, len)),
        }
    }

    /// Concatenate stores of one element type in order.
    pub(crate) fn concat(parts: &[TensorStore]) -> Result<TensorStore> {
        let Some(first) = parts.first() else {
            return Err(Error::Shape("cannot concatenate zero storage parts".into()));
        };
        let dtype = first.dtype();
        let mut out = first.clone();
        for part in &parts[1..] {
            if part.dtype() != dtype {
                return Err(Error::DType(format!(
                    "cannot concatenate {} storage onto {}",
                    part.dtype(),
                    dtype
                )));
            }
            match (&mut out, part) {
                (TensorStore::F32(a), TensorStore::F32(b)) => a.extend_from_slice(b),
                (TensorStore::F16(a), TensorStore::F16(b)) => a.extend_from_slice(b),
                (TensorStore::BF16(a), TensorStore::BF16(b)) => a.extend_from_slice(b),
                (TensorStore::I64(a), TensorStore::I64(b)) => a.extend_from_slice(b),
                (TensorStore::I32(a), TensorStore::I32(b)) => a.extend_from_slice(b),
                (TensorStore::Bool(a), TensorStore::Bool(b)) => a.extend_from_slice(b),
                _ => unreachable!("dtype checked above"),
            }
        }
        Ok(out)
    }

    /// Drop elements past `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        match self {
            TensorStore::F32(v) => v.truncate(len),
            TensorStore::F16(v) => v.truncate(len),
            TensorStore::BF16(v) => v.truncate(len),
            TensorStore::I64(v) => v.truncate(len),
            TensorStore::I32(v) => v.truncate(len),
            TensorStore::Bool(v) => v.truncate(len),
        }
    }
}

/// A dense tensor payload: storage, shape, and placement.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorPayload {
    store: TensorStore,
    shape: Vec<usize>,
    device: Device,
}

impl TensorPayload {
    /// Create a payload, checking that storage length matches the shape.
    pub fn new(store: TensorStore, shape: Vec<usize>, device: Device) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if store.len() != numel {
            return Err(Error::Shape(format!(
                "storage length {} does not match shape {:?} ({} elements)",
                store.len(),
                shape,
                numel
            )));
        }
        Ok(Self {
            store,
            shape,
            device,
        })
    }

    /// All-zero f32 payload.
    pub fn zeros(shape: &[usize], device: Device) -> Self {
        let numel = shape.iter().product();
        Self {
            store: TensorStore::F32(vec![0.0; numel]),
            shape: shape.to_vec(),
            device,
        }
    }

    /// All-one f32 payload.
    pub fn ones(shape: &[usize], device: Device) -> Self {
        let numel = shape.iter().product();
        Self {
            store: TensorStore::F32(vec![1.0; numel]),
            shape: shape.to_vec(),
            device,
        }
    }

    /// Zero-length stub a released payload leaves behind.
    pub fn released(dtype: DType, device: Device) -> Self {
        Self {
            store: TensorStore::empty(dtype),
            shape: vec![0],
            device,
        }
    }

    /// Logical shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.store.dtype()
    }

    /// Placement tag.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Borrow the raw storage.
    pub fn store(&self) -> &TensorStore {
        &self.store
    }

    /// True for floating-point storage.
    pub fn is_floating_point(&self) -> bool {
        self.dtype().is_floating_point()
    }

    /// True if this payload is a released stub.
    pub fn is_released(&self) -> bool {
        self.shape == [0]
    }

    /// Take the payload out, leaving a released stub of the same dtype and
    /// device behind.
    pub fn release(&mut self) -> TensorPayload {
        let dtype = self.dtype();
        let device = self.device;
        std::mem::replace(self, TensorPayload::released(dtype, device))
    }

    /// Retag the payload with a new placement. Storage does not change.
    pub fn to_device(&mut self, device: Device) {
        self.device = device;
    }

    /// Cast floating storage to f16, narrowing. Integer and boolean storage
    /// is left unchanged (the cast is lossless for them by definition).
    pub fn cast_to_half(&mut self) {
        let store = std::mem::replace(&mut self.store, TensorStore::F32(Vec::new()));
        self.store = match store {
            TensorStore::F32(v) => TensorStore::F16(v.into_iter().map(f16::from_f32).collect()),
            TensorStore::BF16(v) => {
                TensorStore::F16(v.into_iter().map(|x| f16::from_f32(x.to_f32())).collect())
            }
            other => other,
        };
    }

    /// Read the payload back as f32 values, whatever the storage type.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.store {
            TensorStore::F32(v) => v.clone(),
            TensorStore::F16(v) => v.iter().map(|x| x.to_f32()).collect(),
            TensorStore::BF16(v) => v.iter().map(|x| x.to_f32()).collect(),
            TensorStore::I64(v) => v.iter().map(|x| *x as f32).collect(),
            TensorStore::I32(v) => v.iter().map(|x| *x as f32).collect(),
            TensorStore::Bool(v) => v.iter().map(|x| if *x { 1.0 } else { 0.0 }).collect(),
        }
    }

    /// Replace the storage, keeping shape and placement.
    pub(crate) fn set_store(&mut self, store: TensorStore) -> Result<()> {
        if store.len() != self.numel() {
            return Err(Error::Shape(format!(
                "replacement storage has {} elements, payload holds {}",
                store.len(),
                self.numel()
            )));
        }
        self.store = store;
        Ok(())
    }

    /// Fill with uniform draws from `[low, high)` using the given generator.
    pub fn fill_uniform<R: Rng>(&mut self, rng: &mut R, low: f32, high: f32) -> Result<()> {
        match &mut self.store {
            TensorStore::F32(v) => {
                for x in v.iter_mut() {
                    *x = rng.gen_range(low..high);
                }
            }
            TensorStore::F16(v) => {
                for x in v.iter_mut() {
                    *x = f16::from_f32(rng.gen_range(low..high));
                }
            }
            TensorStore::BF16(v) => {
                for x in v.iter_mut() {
                    *x = bf16::from_f32(rng.gen_range(low..high));
                }
            }
            _ => {
                return Err(Error::DType(format!(
                    "cannot fill {} storage with uniform draws",
                    self.dtype()
                )))
            }
        }
        Ok(())
    }

    /// Fill with normal draws (Box-Muller) using the given generator.
    pub fn fill_normal<R: Rng>(&mut self, rng: &mut R, mean: f32, std: f32) -> Result<()> {
        if !self.is_floating_point() {
            return Err(Error::DType(format!(
                "cannot fill {} storage with normal draws",
                self.dtype()
            )));
        }
        let mut draw = |rng: &mut R| {
            let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
            let u2: f32 = rng.gen();
            mean + std * (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
        };
        match &mut self.store {
            TensorStore::F32(v) => {
                for x in v.iter_mut() {
                    *x = draw(rng);
                }
            }
            TensorStore::F16(v) => {
                for x in v.iter_mut() {
                    *x = f16::from_f32(draw(rng));
                }
            }
            TensorStore::BF16(v) => {
                for x in v.iter_mut() {
                    *x = bf16::from_f32(draw(rng));
                }
            }
            _ => unreachable!("float storage checked above"),
        }
        Ok(())
    }

    /// Zero `len` elements starting at flat index `start`.
    pub fn zero_range(&mut self, start: usize, len: usize) -> Result<()> {
        if start + len > self.numel() {
            return Err(Error::Shape(format!(
                "range {}..{} out of bounds for {} elements",
                start,
                start + len,
                self.numel()
            )));
        }
        match &mut self.store {
            TensorStore::F32(v) => v[start..start + len].fill(0.0),
            TensorStore::F16(v) => v[start..start + len].fill(f16::ZERO),
            TensorStore::BF16(v) => v[start..start + len].fill(bf16::ZERO),
            TensorStore::I64(v) => v[start..start + len].fill(0),
            TensorStore::I32(v) => v[start..start + len].fill(0),
            TensorStore::Bool(v) => v[start..start + len].fill(false),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_new_checks_shape() {
        let store = TensorStore::F32(vec![0.0; 6]);
        assert!(TensorPayload::new(store.clone(), vec![2, 3], Device::Cpu).is_ok());
        let result = TensorPayload::new(store, vec![2, 4], Device::Cpu);
        assert!(matches!(result, Err(Error::Shape(_))));
    }

    #[test]
    fn test_cast_to_half_narrows_floats() {
        let mut payload = TensorPayload::new(
            TensorStore::F32(vec![1.0, -2.5, 0.0, 65504.0]),
            vec![4],
            Device::Cpu,
        )
        .unwrap();
        payload.cast_to_half();
        assert_eq!(payload.dtype(), DType::F16);
        assert_eq!(payload.to_f32_vec(), vec![1.0, -2.5, 0.0, 65504.0]);
    }

    #[test]
    fn test_cast_to_half_leaves_integers() {
        let mut payload =
            TensorPayload::new(TensorStore::I64(vec![0, 1, 2]), vec![3], Device::Cpu).unwrap();
        payload.cast_to_half();
        assert_eq!(payload.dtype(), DType::I64);

        let mut mask =
            TensorPayload::new(TensorStore::Bool(vec![true, false]), vec![2], Device::Cpu).unwrap();
        mask.cast_to_half();
        assert_eq!(mask.dtype(), DType::Bool);
    }

    #[test]
    fn test_release_leaves_stub() {
        let mut payload = TensorPayload::ones(&[2, 2], Device::Gpu(0));
        let taken = payload.release();
        assert_eq!(taken.numel(), 4);
        assert!(payload.is_released());
        assert_eq!(payload.numel(), 0);
        assert_eq!(payload.dtype(), DType::F32);
        assert_eq!(payload.device(), Device::Gpu(0));
    }

    #[test]
    fn test_fill_uniform_bounds() {
        let mut payload = TensorPayload::zeros(&[64], Device::Cpu);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        payload.fill_uniform(&mut rng, -0.5, 0.5).unwrap();
        for value in payload.to_f32_vec() {
            assert!((-0.5..0.5).contains(&value));
        }
    }

    #[test]
    fn test_fill_rejects_integer_storage() {
        let mut payload =
            TensorPayload::new(TensorStore::I32(vec![0; 4]), vec![4], Device::Cpu).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let result = payload.fill_uniform(&mut rng, 0.0, 1.0);
        assert!(matches!(result, Err(Error::DType(_))));
    }

    #[test]
    fn test_chunk_pads_past_end() {
        let store = TensorStore::F32(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let chunk = store.chunk(3, 3);
        assert_eq!(chunk, TensorStore::F32(vec![4.0, 5.0, 0.0]));
        let empty = store.chunk(6, 3);
        assert_eq!(empty, TensorStore::F32(vec![0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_concat_and_truncate() {
        let a = TensorStore::F32(vec![1.0, 2.0]);
        let b = TensorStore::F32(vec![3.0, 0.0]);
        let mut full = TensorStore::concat(&[a, b]).unwrap();
        full.truncate(3);
        assert_eq!(full, TensorStore::F32(vec![1.0, 2.0, 3.0]));

        let mixed = TensorStore::concat(&[
            TensorStore::F32(vec![1.0]),
            TensorStore::I64(vec![1]),
        ]);
        assert!(matches!(mixed, Err(Error::DType(_))));
    }

    #[test]
    fn test_zero_range() {
        let mut payload = TensorPayload::ones(&[2, 3], Device::Cpu);
        payload.zero_range(3, 3).unwrap();
        assert_eq!(payload.to_f32_vec(), vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
        assert!(matches!(payload.zero_range(5, 2), Err(Error::Shape(_))));
    }
}
