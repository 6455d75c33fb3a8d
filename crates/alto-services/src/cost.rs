//! Cost engine — turns graph metrics into one comparable score.
//!
//! Two steps: the path between two peers is the minimum-weight path under
//! the policy's per-link weight, then that path's hop count, bottleneck
//! bandwidth and total delay are folded into a scalar by the policy's
//! score. Lower is better.
//!
//! A pair with no path is `Unreachable`. There is no numeric sentinel.

use std::sync::Arc;

use alto_core::config::CostWeights;

use crate::topology::{EdgeMetrics, PathMetrics, TopologyError, TopologyStore};

/// Pluggable scoring policy.
///
/// Both functions must be deterministic and return finite, non-negative
/// values for valid metrics.
pub trait CostPolicy: Send + Sync {
    /// Weight of one link when searching for the path.
    fn edge_weight(&self, link: &EdgeMetrics) -> f64;

    /// Score of a whole path.
    fn score(&self, path: &PathMetrics) -> f64;
}

pub type SharedPolicy = Arc<dyn CostPolicy>;

/// Default policy: weighted sum of normalised hop count, normalised inverse
/// bottleneck bandwidth and normalised delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedCost {
    weights: CostWeights,
}

impl WeightedCost {
    pub fn new(weights: CostWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &CostWeights {
        &self.weights
    }

    pub fn shared(weights: CostWeights) -> SharedPolicy {
        Arc::new(Self::new(weights))
    }
}

impl Default for WeightedCost {
    fn default() -> Self {
        Self::new(CostWeights::default())
    }
}

impl CostPolicy for WeightedCost {
    fn edge_weight(&self, link: &EdgeMetrics) -> f64 {
        let w = &self.weights;
        w.hop_weight / w.hop_scale
            + w.bandwidth_weight * (w.bandwidth_reference / link.bandwidth)
            + w.delay_weight * (link.delay / w.delay_scale)
    }

    fn score(&self, path: &PathMetrics) -> f64 {
        if path.hops == 0 {
            return 0.0;
        }
        let w = &self.weights;
        w.hop_weight * f64::from(path.hops) / w.hop_scale
            + w.bandwidth_weight * (w.bandwidth_reference / path.bottleneck_bandwidth)
            + w.delay_weight * (path.total_delay / w.delay_scale)
    }
}

/// A computed cost together with the path it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cost {
    pub score: f64,
    pub path: PathMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CostError {
    #[error("no path between {0} and {1}")]
    Unreachable(String, String),
}

/// Cost of moving data between `a` and `b`.
pub fn cost(
    topology: &TopologyStore,
    policy: &dyn CostPolicy,
    a: &str,
    b: &str,
) -> Result<Cost, CostError> {
    let unreachable = || CostError::Unreachable(a.to_string(), b.to_string());

    let path = match topology.shortest_path(a, b, |link| policy.edge_weight(link)) {
        Ok(Some(path)) => path,
        Ok(None) | Err(TopologyError::UnknownNode(_)) => return Err(unreachable()),
        Err(e) => {
            tracing::warn!(from = a, to = b, error = %e, "cost policy produced an invalid weight");
            return Err(unreachable());
        }
    };

    let score = policy.score(&path);
    if !score.is_finite() || score < 0.0 {
        tracing::warn!(from = a, to = b, score, "cost policy produced an invalid score");
        return Err(unreachable());
    }
    Ok(Cost { score, path })
}
