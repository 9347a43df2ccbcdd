//! Chooses a width and a set of endpoints for every fragment.

use crate::config::PlannerSettings;
use crate::error::{PlanningError, Result};
use crate::fragment::{Fragment, FragmentGraph};
use crate::planning_set::{ExchangeAssignment, ExchangeShape, PlanningSet};
use crate::stats::FragmentStats;
use crate::width::WidthPolicy;
use igloo_common::Endpoint;
use tracing::{debug, warn};

pub struct Assigner<'a> {
    settings: &'a PlannerSettings,
    policy: &'a dyn WidthPolicy,
    endpoints: &'a [Endpoint],
    foreman: &'a Endpoint,
    /// Next snapshot position for round-robin placement, shared by all
    /// fragments of the query.
    cursor: usize,
}

impl<'a> Assigner<'a> {
    pub fn new(
        settings: &'a PlannerSettings,
        policy: &'a dyn WidthPolicy,
        endpoints: &'a [Endpoint],
        foreman: &'a Endpoint,
    ) -> Self {
        Self {
            settings,
            policy,
            endpoints,
            foreman,
            cursor: 0,
        }
    }

    /// Places every fragment in pre-order, then records the placement of
    /// both sides of each exchange.
    pub fn assign(&mut self, graph: &FragmentGraph, planning: &mut PlanningSet) -> Result<()> {
        for id in graph.pre_order() {
            let Some(fragment) = graph.get(id) else {
                continue;
            };
            let endpoints = if fragment.is_root() {
                vec![self.foreman.clone()]
            } else {
                let stats = planning.stats(id).cloned().unwrap_or_default();
                self.place(fragment, &stats)?
            };
            debug!(
                fragment = %id,
                width = endpoints.len(),
                endpoints = ?endpoints.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "assigned fragment"
            );
            planning.set_endpoints(id, endpoints);
        }

        for fragment in graph {
            for pair in fragment {
                let sender_endpoints = planning.endpoints(pair.node()).to_vec();
                let receiver_endpoints = planning.endpoints(fragment.id()).to_vec();
                planning.record_exchange(ExchangeAssignment {
                    exchange: pair.exchange().id,
                    distribution: pair.distribution().clone(),
                    sender: pair.node(),
                    receiver: fragment.id(),
                    shape: ExchangeShape::from_widths(sender_endpoints.len(), receiver_endpoints.len()),
                    sender_endpoints,
                    receiver_endpoints,
                });
            }
        }
        Ok(())
    }

    fn place(&mut self, fragment: &Fragment, stats: &FragmentStats) -> Result<Vec<Endpoint>> {
        if self.endpoints.is_empty() {
            return Err(PlanningError::insufficient(
                fragment.id(),
                "no endpoints available",
            ));
        }
        let limit = self
            .settings
            .max_width
            .min(self.endpoints.len())
            .min(stats.max_width);
        if limit == 0 {
            return Err(PlanningError::insufficient(
                fragment.id(),
                "width resolves to zero",
            ));
        }
        let width = self.policy.width(stats).clamp(1, limit);

        let mut chosen = if stats.has_affinity() {
            let mut preferred = self.preferred(stats);
            if preferred.is_empty() {
                warn!(
                    fragment = %fragment.id(),
                    "no endpoint holds the fragment's data, falling back to round-robin"
                );
            }
            preferred.truncate(width);
            preferred
        } else {
            Vec::with_capacity(width)
        };
        self.round_robin(&mut chosen, width);
        Ok(chosen)
    }

    /// Endpoints holding a large enough share of the fragment's data,
    /// heaviest first.
    fn preferred(&self, stats: &FragmentStats) -> Vec<Endpoint> {
        let weights: Vec<u64> = self
            .endpoints
            .iter()
            .map(|e| stats.affinity.get(e.host()).copied().unwrap_or(0))
            .collect();
        let max_weight = weights.iter().copied().max().unwrap_or(0);
        if max_weight == 0 {
            return Vec::new();
        }
        let threshold = max_weight as f64 / self.settings.affinity_factor;

        let mut candidates: Vec<(u64, &Endpoint)> = weights
            .into_iter()
            .zip(self.endpoints)
            .filter(|(weight, _)| *weight > 0 && *weight as f64 >= threshold)
            .collect();
        // Stable, so equal weights keep snapshot order.
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        candidates.into_iter().map(|(_, e)| e.clone()).collect()
    }

    fn round_robin(&mut self, chosen: &mut Vec<Endpoint>, width: usize) {
        let n = self.endpoints.len();
        let mut scanned = 0;
        while chosen.len() < width && scanned < n {
            let candidate = &self.endpoints[self.cursor % n];
            self.cursor = (self.cursor + 1) % n;
            scanned += 1;
            if !chosen.contains(candidate) {
                chosen.push(candidate.clone());
            }
        }
    }
}
