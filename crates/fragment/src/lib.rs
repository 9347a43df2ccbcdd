//! Fragment planner
//!
//! Cuts a physical operator tree into fragments at exchange boundaries,
//! decides how many copies of each fragment to run and where, and emits one
//! work unit per copy.
//!
//! # Example
//! ```rust
//! use igloo_common::Endpoint;
//! use igloo_fragment::{Parallelizer, PlanningContext};
//! use igloo_plan::build::{exchange, scan, screen};
//! use igloo_plan::Distribution;
//!
//! let plan = screen(3, exchange(2, Distribution::Union, scan(1, "lineitem", vec![]))).into_ref();
//! let foreman = Endpoint::new("foreman", 31010, 31011);
//! let ctx = PlanningContext::new(foreman, vec![Endpoint::new("worker-1", 31010, 31011)]);
//! let work = Parallelizer::default().plan(&ctx, &plan).unwrap();
//! assert_eq!(work.len(), 2);
//! ```

pub mod assigner;
pub mod cancel;
pub mod cluster;
pub mod config;
pub mod error;
pub mod fragment;
pub mod fragmenter;
pub mod parallelizer;
pub mod planning_set;
pub mod stats;
pub mod width;
pub mod work_unit;

pub use assigner::Assigner;
pub use cancel::{cancellation_pair, CancellationHandle, CancellationToken};
pub use cluster::{ClusterMembership, ClusterState, WorkerState};
pub use crate::config::PlannerSettings;
pub use error::{ClusterError, PlanningError, Result};
pub use fragment::{ExchangePair, Fragment, FragmentGraph, FragmentId};
pub use fragmenter::make_fragments;
pub use parallelizer::{Parallelizer, PlanningContext};
pub use planning_set::{ExchangeAssignment, ExchangeShape, FragmentPlanning, PlanningSet};
pub use stats::{FragmentStats, StatsCollector};
pub use width::{CostBasedWidth, WidthPolicy};
pub use work_unit::{
    assign_splits, FragmentHandle, FragmentUnit, MinorFragmentEndpoint, QueryWorkUnit,
    ReceiverBinding, SenderBinding, WorkUnitBuilder,
};
