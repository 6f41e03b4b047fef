//! Feed-forward and mixture-of-experts blocks.

use crate::context;
use crate::hooks::post_init;
use crate::linear::Linear;
use crate::module::{Module, Param};
use crate::types::{Error, Result};

/// Gated feed-forward block (gate, up, down projections).
pub struct FeedForward {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
}

impl FeedForward {
    pub fn new(hidden_size: usize, intermediate_size: usize) -> Result<Self> {
        let gate_proj = Linear::without_bias(hidden_size, intermediate_size)?;
        let up_proj = Linear::without_bias(hidden_size, intermediate_size)?;
        let down_proj = Linear::without_bias(intermediate_size, hidden_size)?;
        post_init(Self {
            gate_proj,
            up_proj,
            down_proj,
        })
    }

    pub fn gate_proj(&self) -> &Linear {
        &self.gate_proj
    }

    pub fn up_proj(&self) -> &Linear {
        &self.up_proj
    }

    pub fn down_proj(&self) -> &Linear {
        &self.down_proj
    }
}

impl Module for FeedForward {
    fn visit_params(&self, f: &mut dyn FnMut(&Param)) {
        self.gate_proj.visit_params(f);
        self.up_proj.visit_params(f);
        self.down_proj.visit_params(f);
    }
}

/// Router plus a bank of rank-local experts.
///
/// The router is a regular parameter and shards like any other. Experts are
/// built under a no-shard hijack with replication off, so every data rank
/// keeps its own full, independently drawn expert weights and the exit
/// broadcast leaves them alone.
pub struct MoeLayer {
    router: Linear,
    experts: Vec<FeedForward>,
    num_experts: usize,
}

impl MoeLayer {
    pub fn new(
        hidden_size: usize,
        intermediate_size: usize,
        num_experts: usize,
    ) -> Result<Self> {
        if num_experts == 0 {
            return Err(Error::Shape("expert bank must be non-empty".into()));
        }
        let router = Linear::without_bias(hidden_size, num_experts)?;
        let experts = context::with_no_shard(false, || {
            (0..num_experts)
                .map(|_| FeedForward::new(hidden_size, intermediate_size))
                .collect::<Result<Vec<_>>>()
        })?;
        post_init(Self {
            router,
            experts,
            num_experts,
        })
    }

    pub fn router(&self) -> &Linear {
        &self.router
    }

    pub fn experts(&self) -> &[FeedForward] {
        &self.experts
    }

    pub fn num_experts(&self) -> usize {
        self.num_experts
    }
}

impl Module for MoeLayer {
    fn visit_params(&self, f: &mut dyn FnMut(&Param)) {
        self.router.visit_params(f);
        for expert in &self.experts {
            expert.visit_params(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_forward_shapes() {
        let ffn = FeedForward::new(16, 32).unwrap();
        assert_eq!(ffn.gate_proj().weight().shape(), vec![32, 16]);
        assert_eq!(ffn.down_proj().weight().shape(), vec![16, 32]);
    }

    #[test]
    fn test_moe_builds_expert_bank() {
        let moe = MoeLayer::new(16, 32, 4).unwrap();
        assert_eq!(moe.experts().len(), 4);
        assert_eq!(moe.router().weight().shape(), vec![4, 16]);
    }

    #[test]
    fn test_moe_rejects_zero_experts() {
        assert!(matches!(MoeLayer::new(16, 32, 0), Err(Error::Shape(_))));
    }

    #[test]
    fn test_moe_param_count() {
        let moe = MoeLayer::new(16, 32, 2).unwrap();
        let mut total = 0;
        moe.visit_params(&mut |p| total += p.numel());
        // router 2x16 + 2 experts x 3 projections x 512
        assert_eq!(total, 32 + 2 * 3 * 512);
    }
}
