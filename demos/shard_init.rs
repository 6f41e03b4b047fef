//! Two-rank walkthrough of a sharded model build.
//!
//! Spawns one thread per rank, wires them to an in-process hub, builds the
//! same decoder model under a sharding scope on each, and prints a JSON
//! report of what every rank ended up holding.

use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use zshard::comm::{self, LocalGroup, ParallelMode, ProcessGroup};
use zshard::{
    DecoderConfig, DecoderModel, Device, Module, Result, ShardInitContext,
    TensorShardStrategy, DEFAULT_SEED,
};

#[derive(Serialize)]
struct RankReport {
    rank: usize,
    wrapped_params: usize,
    origin_elements: usize,
    local_elements: usize,
    released_params: usize,
}

fn build_on_rank(endpoint: &LocalGroup) -> Result<RankReport> {
    let rank = endpoint.rank();
    comm::register_group(ParallelMode::Global, Arc::new(endpoint.clone()));
    comm::register_group(ParallelMode::Data, Arc::new(endpoint.clone()));

    let config = DecoderConfig::default();
    let ctx = ShardInitContext::new(
        Device::Gpu(0),
        Arc::new(TensorShardStrategy::new()),
        DEFAULT_SEED,
        true,
    )?;
    let counter = ctx.numel_counter();
    let model = ctx.scope(|| DecoderModel::build(&config))?;

    let mut wrapped_params = 0;
    let mut local_elements = 0;
    let mut released_params = 0;
    model.visit_params(&mut |param| {
        if param.is_wrapped() {
            wrapped_params += 1;
        }
        if param.data().is_released() {
            released_params += 1;
        }
        if let Some(entity) = param.entity() {
            local_elements += entity.payload_numel();
        }
    });

    Ok(RankReport {
        rank,
        wrapped_params,
        origin_elements: counter.load(Ordering::Relaxed) as usize,
        local_elements,
        released_params,
    })
}

fn main() -> Result<()> {
    env_logger::init();

    let handles: Vec<_> = LocalGroup::connect(2)
        .into_iter()
        .map(|endpoint| thread::spawn(move || build_on_rank(&endpoint)))
        .collect();

    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.join().expect("rank thread panicked")?);
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&reports).expect("report serializes")
    );
    Ok(())
}
