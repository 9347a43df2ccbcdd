use crate::config::PlannerSettings;
use crate::stats::FragmentStats;
use std::fmt;

/// Decides how many copies of a fragment to run.
///
/// The returned width is a request; the assigner clamps it to the cluster
/// and to the fragment's own bound.
pub trait WidthPolicy: Send + Sync + fmt::Debug {
    fn width(&self, stats: &FragmentStats) -> usize;
}

/// One copy per `slice_target` units of work.
#[derive(Debug, Clone)]
pub struct CostBasedWidth {
    slice_target: f64,
    default_width: usize,
}

impl CostBasedWidth {
    pub fn new(settings: &PlannerSettings) -> Self {
        Self {
            slice_target: settings.slice_target,
            default_width: settings.default_width,
        }
    }
}

impl WidthPolicy for CostBasedWidth {
    fn width(&self, stats: &FragmentStats) -> usize {
        if !stats.has_estimates() && !stats.has_affinity() {
            return self.default_width.max(1);
        }
        (stats.work() / self.slice_target).ceil().max(1.0) as usize
    }
}
