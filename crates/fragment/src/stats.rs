//! Optimizer estimates aggregated per fragment.

use crate::config::PlannerSettings;
use crate::fragment::{Fragment, FragmentGraph};
use crate::planning_set::PlanningSet;
use igloo_plan::{CostEstimate, OperatorKind, PhysicalOperator};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentStats {
    /// Rows the fragment emits through its sending exchange.
    pub output_rows: f64,
    /// Sum of the costs of the fragment's own operators.
    pub local_cost: f64,
    /// Rows arriving through receiving exchanges, after amplification.
    pub received_rows: f64,
    /// Upper bound on copies imposed by the fragment's operators and
    /// receiving exchanges. `usize::MAX` when unconstrained.
    pub max_width: usize,
    /// Bytes of scanned data stored on each host.
    pub affinity: BTreeMap<String, u64>,
    pub operators: usize,
    pub defaulted_operators: usize,
}

impl Default for FragmentStats {
    fn default() -> Self {
        Self {
            output_rows: 0.0,
            local_cost: 0.0,
            received_rows: 0.0,
            max_width: usize::MAX,
            affinity: BTreeMap::new(),
            operators: 0,
            defaulted_operators: 0,
        }
    }
}

impl FragmentStats {
    /// Work the width policy sizes the fragment by.
    pub fn work(&self) -> f64 {
        self.local_cost + self.received_rows
    }

    /// Whether at least one operator carried an optimizer estimate.
    pub fn has_estimates(&self) -> bool {
        self.defaulted_operators < self.operators
    }

    pub fn has_affinity(&self) -> bool {
        !self.affinity.is_empty()
    }
}

/// Walks the fragment tree bottom-up and fills in each fragment's stats.
pub struct StatsCollector<'a> {
    settings: &'a PlannerSettings,
    broadcast_fan_out: usize,
}

impl<'a> StatsCollector<'a> {
    pub fn new(settings: &'a PlannerSettings, endpoint_count: usize) -> Self {
        Self {
            settings,
            broadcast_fan_out: settings.max_width.min(endpoint_count).max(1),
        }
    }

    pub fn collect(&self, graph: &FragmentGraph, planning: &mut PlanningSet) {
        for id in graph.post_order() {
            if let Some(fragment) = graph.get(id) {
                let stats = self.fragment_stats(fragment, planning);
                debug!(
                    fragment = %id,
                    work = stats.work(),
                    output_rows = stats.output_rows,
                    max_width = stats.max_width,
                    "collected fragment stats"
                );
                planning.set_stats(id, stats);
            }
        }
    }

    fn fragment_stats(&self, fragment: &Fragment, planning: &PlanningSet) -> FragmentStats {
        let mut stats = FragmentStats::default();
        // Boundary exchanges belong to the fragment on the other side.
        for op in fragment.root().iter().filter(|op| !op.kind.is_exchange()) {
            self.visit(op, &mut stats);
        }
        stats.output_rows = self.estimate(fragment.root()).0.rows;

        if fragment.iter().any(|pair| pair.distribution().requires_single_receiver()) {
            stats.max_width = 1;
        }
        // A broadcast reaches every copy of this fragment, which is at most
        // its width cap.
        let fan_out = self.broadcast_fan_out.min(stats.max_width);
        for pair in fragment {
            let sent = planning.stats(pair.node()).map_or(0.0, |s| s.output_rows);
            stats.received_rows += sent * pair.distribution().amplification(fan_out);
        }
        stats
    }

    fn visit(&self, op: &PhysicalOperator, stats: &mut FragmentStats) {
        let (estimate, defaulted) = self.estimate(op);
        stats.operators += 1;
        if defaulted {
            stats.defaulted_operators += 1;
            warn!(
                operator = op.id,
                kind = op.kind.name(),
                "no usable cost estimate, using defaults"
            );
        }
        stats.local_cost += estimate.cost;

        match &op.kind {
            OperatorKind::Screen => stats.max_width = 1,
            OperatorKind::Scan { splits, .. } => {
                stats.max_width = stats.max_width.min(splits.len().max(1));
                for split in splits {
                    *stats.affinity.entry(split.host.clone()).or_default() += split.bytes.max(1);
                }
            }
            _ => {}
        }
    }

    /// The operator's estimate, or the configured default when it is
    /// missing or not a finite non-negative number.
    fn estimate(&self, op: &PhysicalOperator) -> (CostEstimate, bool) {
        match op.cost {
            Some(c) if valid(c.rows) && valid(c.cost) => (c, false),
            _ => (
                CostEstimate::new(self.settings.default_row_count, self.settings.default_operator_cost),
                true,
            ),
        }
    }
}

fn valid(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FragmentId;
    use crate::fragmenter::make_fragments;
    use igloo_plan::build::*;
    use igloo_plan::{Distribution, ScanSplit};

    fn collect(plan: PhysicalOperator, endpoints: usize) -> (FragmentGraph, PlanningSet) {
        let settings = PlannerSettings::default();
        let graph = make_fragments(&plan.into_ref()).unwrap();
        let mut planning = PlanningSet::new(&graph);
        StatsCollector::new(&settings, endpoints).collect(&graph, &mut planning);
        (graph, planning)
    }

    #[test]
    fn sums_operator_costs_within_a_fragment() {
        let plan = screen(
            3,
            filter(2, "x > 1", scan(1, "t", vec![]).with_cost(100.0, 100.0)).with_cost(10.0, 50.0),
        )
        .with_cost(10.0, 10.0);
        let (_, planning) = collect(plan, 3);
        let stats = planning.stats(FragmentId::ROOT).unwrap();
        assert_eq!(stats.local_cost, 160.0);
        assert_eq!(stats.output_rows, 10.0);
        assert_eq!(stats.received_rows, 0.0);
        assert_eq!(stats.max_width, 1);
        assert_eq!(stats.defaulted_operators, 0);
    }

    #[test]
    fn propagates_rows_through_exchanges() {
        let plan = screen(
            4,
            aggregate(
                3,
                &["k"],
                exchange(
                    2,
                    Distribution::Hash { keys: vec!["k".into()] },
                    scan(1, "t", vec![]).with_cost(5000.0, 8000.0),
                ),
            )
            .with_cost(10.0, 5000.0),
        )
        .with_cost(10.0, 10.0);
        let (_, planning) = collect(plan, 3);
        let scan_stats = planning.stats(FragmentId(1)).unwrap();
        assert_eq!(scan_stats.output_rows, 5000.0);
        assert_eq!(scan_stats.work(), 8000.0);
        let root = planning.stats(FragmentId::ROOT).unwrap();
        assert_eq!(root.received_rows, 5000.0);
        assert_eq!(root.work(), 5010.0 + 5000.0);
    }

    #[test]
    fn broadcast_amplifies_receiver_volume() {
        let plan = join(
            5,
            exchange(2, Distribution::Hash { keys: vec![] }, scan(1, "big", vec![]).with_cost(100.0, 100.0)),
            exchange(4, Distribution::Broadcast, values(3, 10).with_cost(10.0, 10.0)),
        )
        .with_cost(100.0, 100.0);
        let (_, planning) = collect(plan, 4);
        let root = planning.stats(FragmentId::ROOT).unwrap();
        assert_eq!(root.received_rows, 100.0 + 10.0 * 4.0);
    }

    #[test]
    fn broadcast_into_a_single_copy_is_not_amplified() {
        let plan = join(
            5,
            exchange(2, Distribution::Union, scan(1, "big", vec![]).with_cost(100.0, 100.0)),
            exchange(4, Distribution::Broadcast, values(3, 10).with_cost(10.0, 10.0)),
        )
        .with_cost(100.0, 100.0);
        let (_, planning) = collect(plan, 4);
        let root = planning.stats(FragmentId::ROOT).unwrap();
        assert_eq!(root.max_width, 1);
        assert_eq!(root.received_rows, 100.0 + 10.0);
    }

    #[test]
    fn union_receiver_is_capped_at_one() {
        let plan = filter(
            3,
            "x",
            exchange(2, Distribution::Union, scan(1, "t", vec![])),
        );
        let (_, planning) = collect(plan, 4);
        assert_eq!(planning.stats(FragmentId::ROOT).unwrap().max_width, 1);
        assert_eq!(planning.stats(FragmentId(1)).unwrap().max_width, 1);
    }

    #[test]
    fn splits_bound_width_and_define_affinity() {
        let splits = vec![
            ScanSplit::new("p0", "node-a", 300),
            ScanSplit::new("p1", "node-b", 100),
            ScanSplit::new("p2", "node-a", 200),
        ];
        let plan = screen(
            3,
            exchange(2, Distribution::Union, scan(1, "t", splits).with_cost(1.0, 1.0)),
        );
        let (_, planning) = collect(plan, 4);
        let stats = planning.stats(FragmentId(1)).unwrap();
        assert_eq!(stats.max_width, 3);
        assert_eq!(stats.affinity.get("node-a"), Some(&500));
        assert_eq!(stats.affinity.get("node-b"), Some(&100));
    }

    #[test]
    fn missing_estimates_fall_back_to_defaults() {
        let settings = PlannerSettings::default();
        let mut bad = values(1, 1);
        bad.cost = Some(CostEstimate::new(f64::NAN, 3.0));
        let plan = screen(2, bad);
        let (_, planning) = collect(plan, 1);
        let stats = planning.stats(FragmentId::ROOT).unwrap();
        assert_eq!(stats.defaulted_operators, 2);
        assert!(!stats.has_estimates());
        assert_eq!(stats.local_cost, 2.0 * settings.default_operator_cost);
        assert_eq!(stats.output_rows, settings.default_row_count);
    }
}
