//! End-to-end scope behavior on a single rank.
//!
//! Without registered groups every context runs against the built-in
//! solo group, so sharding only marks entities and keeps whole payloads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zshard::{
    current_accelerator, rng, with_no_shard, DType, DecoderConfig, DecoderModel, Device,
    Embedding, Error, Linear, Module, MoeLayer, ShardInitContext, TensorShardStrategy,
    TensorState, DEFAULT_SEED,
};

fn sharding_context() -> ShardInitContext {
    ShardInitContext::new(
        Device::Gpu(0),
        Arc::new(TensorShardStrategy::new()),
        DEFAULT_SEED,
        true,
    )
    .expect("context should open on a fresh rank")
}

#[test]
fn test_constructors_untouched_outside_scope() {
    let layer = Linear::new(8, 4).unwrap();
    let weight = layer.weight();
    assert!(!weight.is_wrapped());
    assert_eq!(weight.dtype(), DType::F32);
    assert_eq!(weight.device(), Device::Cpu);
}

#[test]
fn test_model_build_wraps_counts_and_releases() {
    let config = DecoderConfig::default();
    let ctx = sharding_context();
    let counter = ctx.numel_counter();
    let model = ctx.scope(|| DecoderModel::build(&config)).unwrap();

    assert_eq!(counter.load(Ordering::Relaxed), config.param_count() as u64);
    assert_eq!(model.param_count(), config.param_count());

    let mut wrapped = 0;
    model.visit_params(&mut |param| {
        assert!(param.is_wrapped());
        assert!(param.data().is_released());
        assert_eq!(param.device(), Device::Gpu(0));
        let entity = param.entity().unwrap();
        assert_eq!(entity.state(), TensorState::Hold);
        assert!(entity.is_sharded());
        assert_eq!(entity.payload().dtype(), DType::F16);
        wrapped += 1;
    });
    // embed + 2 layers x (2 norms + 4 projections + 3 ffn) + norm + head
    assert_eq!(wrapped, 21);
}

#[test]
fn test_buffers_follow_accelerator_unwrapped() {
    let ctx = sharding_context();
    let mut model = ctx
        .scope(|| DecoderModel::build(&DecoderConfig::default()))
        .unwrap();

    let mut buffers = 0;
    model.visit_buffers(&mut |buffer| {
        assert_eq!(buffer.data().device(), current_accelerator());
        assert_eq!(buffer.data().dtype(), DType::F16);
        assert!(!buffer.data().is_released());
        buffers += 1;
    });
    // cos and sin tables per layer
    assert_eq!(buffers, 4);
}

#[test]
fn test_padding_embedding_counts_once() {
    let ctx = sharding_context();
    let counter = ctx.numel_counter();
    let embed = ctx
        .scope(|| Embedding::with_padding_idx(32, 16, 3))
        .unwrap();

    // The constructor dispatches twice; the wrap marker keeps the second
    // dispatch from double counting.
    assert_eq!(counter.load(Ordering::Relaxed), 32 * 16);

    let weight = embed.weight();
    assert!(weight.data().is_released());
    let entity = weight.entity().unwrap();
    assert_eq!(entity.origin_numel(), 512);
    let values = entity.payload().to_f32_vec();
    assert_eq!(&values[3 * 16..4 * 16], &[0.0; 16]);
    assert!(values[..16].iter().any(|v| *v != 0.0));
}

#[test]
fn test_moe_experts_stay_local() {
    let ctx = sharding_context();
    let moe = ctx.scope(|| MoeLayer::new(8, 16, 2)).unwrap();

    let router = moe.router().weight();
    assert!(router.is_replicated());
    assert!(router.entity().unwrap().is_sharded());

    for expert in moe.experts() {
        let gate = expert.gate_proj().weight();
        assert!(gate.is_wrapped());
        assert!(!gate.is_replicated());
        let entity = gate.entity().unwrap();
        assert!(!entity.is_sharded());
        assert_eq!(entity.payload().shape(), &[16, 8]);
        assert_eq!(entity.payload().device(), current_accelerator());
    }
}

#[test]
fn test_counter_accumulates_across_contexts() {
    let counter = Arc::new(AtomicU64::new(0));

    let ctx = sharding_context().with_numel_counter(counter.clone());
    ctx.scope(|| Linear::without_bias(4, 4)).unwrap();
    let ctx = sharding_context().with_numel_counter(counter.clone());
    ctx.scope(|| Linear::without_bias(4, 4)).unwrap();

    assert_eq!(counter.load(Ordering::Relaxed), 32);
}

#[test]
fn test_same_seed_draws_identical_weights() {
    let first = sharding_context()
        .scope(|| Linear::without_bias(8, 8))
        .unwrap();
    let second = sharding_context()
        .scope(|| Linear::without_bias(8, 8))
        .unwrap();

    assert_eq!(
        *first.weight().entity().unwrap().payload(),
        *second.weight().entity().unwrap().payload()
    );
}

#[test]
fn test_failed_scope_restores_and_frees_rank() {
    rng::manual_seed(99);
    let before = rng::state();

    let ctx = sharding_context();
    let result = ctx.scope(|| {
        let _partial = Linear::new(4, 4)?;
        Err::<Linear, _>(Error::Shape("induced failure".into()))
    });
    assert!(result.is_err());
    assert_eq!(rng::state(), before);

    // Interception is fully uninstalled after the fault.
    let plain = Linear::new(4, 4).unwrap();
    assert!(!plain.weight().is_wrapped());

    // The rank accepts a fresh context immediately.
    let ctx = sharding_context();
    ctx.scope(|| Linear::new(2, 2)).unwrap();
}

#[test]
fn test_no_shard_outside_scope_is_plain_build() {
    let layer = with_no_shard(false, || Linear::new(4, 4)).unwrap();
    assert!(!layer.weight().is_wrapped());
    assert_eq!(layer.weight().dtype(), DType::F32);
}
