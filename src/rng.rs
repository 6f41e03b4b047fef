//! Per-rank random number generator registry.
//!
//! Each rank (thread) carries a host/accelerator generator pair, mirroring
//! the two generator domains a device runtime exposes. The sharded
//! initialization scope seeds both streams on entry and restores the exact
//! previous states on exit, so construction-time draws never perturb the
//! caller's randomness. ChaCha generators compare by state, which is what
//! makes the restore verifiable.

use crate::types::Device;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::cell::RefCell;

/// Snapshot of both generator streams, restorable bit-for-bit.
#[derive(Debug, Clone, PartialEq)]
pub struct RngState {
    host: ChaCha8Rng,
    accel: ChaCha8Rng,
}

thread_local! {
    static STREAMS: RefCell<RngState> = RefCell::new(RngState {
        host: seeded(rand::random(), HOST_STREAM),
        accel: seeded(rand::random(), ACCEL_STREAM),
    });
}

const HOST_STREAM: u64 = 0;
const ACCEL_STREAM: u64 = 1;

fn seeded(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

/// Seed both generator streams of this rank.
pub fn manual_seed(seed: u64) {
    STREAMS.with(|streams| {
        let mut streams = streams.borrow_mut();
        streams.host = seeded(seed, HOST_STREAM);
        streams.accel = seeded(seed, ACCEL_STREAM);
    });
}

/// Snapshot both streams.
pub fn state() -> RngState {
    STREAMS.with(|streams| streams.borrow().clone())
}

/// Restore a previously captured snapshot.
pub fn set_state(state: RngState) {
    STREAMS.with(|streams| *streams.borrow_mut() = state);
}

/// Run `f` with the host stream.
pub fn with_host<T>(f: impl FnOnce(&mut ChaCha8Rng) -> T) -> T {
    STREAMS.with(|streams| f(&mut streams.borrow_mut().host))
}

/// Run `f` with the accelerator stream.
pub fn with_accel<T>(f: impl FnOnce(&mut ChaCha8Rng) -> T) -> T {
    STREAMS.with(|streams| f(&mut streams.borrow_mut().accel))
}

/// Run `f` with the stream matching `device`.
pub fn with_device<T>(device: Device, f: impl FnOnce(&mut ChaCha8Rng) -> T) -> T {
    if device.is_accelerator() {
        with_accel(f)
    } else {
        with_host(f)
    }
}
