//! Drives a query from operator tree to dispatchable work units.

use crate::assigner::Assigner;
use crate::cancel::CancellationToken;
use crate::config::PlannerSettings;
use crate::error::{PlanningError, Result};
use crate::fragment::FragmentGraph;
use crate::fragmenter::make_fragments;
use crate::planning_set::PlanningSet;
use crate::stats::StatsCollector;
use crate::width::{CostBasedWidth, WidthPolicy};
use crate::work_unit::{QueryWorkUnit, WorkUnitBuilder};
use igloo_common::{Endpoint, QueryId};
use igloo_plan::{OperatorRef, PhysicalPlanReader};
use std::sync::Arc;
use tracing::{error, info, info_span};

/// Inputs of one planning run that come from outside the plan.
#[derive(Debug, Clone)]
pub struct PlanningContext {
    pub query_id: QueryId,
    /// Endpoint that issued the query; runs the root fragment.
    pub foreman: Endpoint,
    /// Live endpoints, taken once at the start of planning.
    pub endpoints: Vec<Endpoint>,
    pub cancellation: CancellationToken,
}

impl PlanningContext {
    pub fn new(foreman: Endpoint, endpoints: Vec<Endpoint>) -> Self {
        Self {
            query_id: QueryId::new(),
            foreman,
            endpoints,
            cancellation: CancellationToken::default(),
        }
    }

    pub fn with_query_id(mut self, query_id: QueryId) -> Self {
        self.query_id = query_id;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(PlanningError::Cancelled(self.query_id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Parallelizer {
    settings: PlannerSettings,
    policy: Arc<dyn WidthPolicy>,
}

impl Parallelizer {
    pub fn new(settings: PlannerSettings) -> Self {
        let policy = Arc::new(CostBasedWidth::new(&settings));
        Self { settings, policy }
    }

    pub fn with_policy(settings: PlannerSettings, policy: Arc<dyn WidthPolicy>) -> Self {
        Self { settings, policy }
    }

    /// Loads settings from the environment and configuration file.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(PlannerSettings::new()?))
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Fragments, sizes and places `root`, then materializes one work unit
    /// per fragment copy. Nothing is returned unless every phase succeeds.
    pub fn plan(&self, ctx: &PlanningContext, root: &OperatorRef) -> Result<QueryWorkUnit> {
        let span = info_span!("plan_query", query_id = %ctx.query_id);
        let _guard = span.enter();

        let result = self.plan_fragments(ctx, root).and_then(|(graph, planning)| {
            ctx.check_cancelled()?;
            WorkUnitBuilder::new(ctx.query_id, &graph, &planning).build()
        });
        match &result {
            Ok(work) => info!(
                units = work.len(),
                endpoints = ctx.endpoints.len(),
                "planned query"
            ),
            Err(e) => error!(error = %e, "planning failed"),
        }
        result
    }

    /// Reads a persisted physical plan and plans it.
    pub fn plan_json(&self, ctx: &PlanningContext, json: &str) -> Result<QueryWorkUnit> {
        let plan = PhysicalPlanReader::new().read_physical_plan(json)?;
        self.plan(ctx, &plan.root)
    }

    /// Runs fragmentation, stats collection and assignment, stopping short
    /// of work-unit materialization.
    pub fn plan_fragments(
        &self,
        ctx: &PlanningContext,
        root: &OperatorRef,
    ) -> Result<(FragmentGraph, PlanningSet)> {
        ctx.check_cancelled()?;
        let graph = make_fragments(root)?;

        ctx.check_cancelled()?;
        let mut planning = PlanningSet::new(&graph);
        StatsCollector::new(&self.settings, ctx.endpoints.len()).collect(&graph, &mut planning);

        ctx.check_cancelled()?;
        Assigner::new(&self.settings, self.policy.as_ref(), &ctx.endpoints, &ctx.foreman)
            .assign(&graph, &mut planning)?;
        Ok((graph, planning))
    }
}

impl Default for Parallelizer {
    fn default() -> Self {
        Self::new(PlannerSettings::default())
    }
}
