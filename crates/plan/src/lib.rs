//! Plan crate
//!
//! The physical operator tree consumed by the fragment planner, and the
//! reader for persisted plans.
//!
//! # Example
//! ```rust
//! use igloo_plan::PhysicalPlanReader;
//! let json = r#"{
//!     "head": { "version": 1 },
//!     "graph": [
//!         { "@id": 1, "pop": "values", "rows": 3 },
//!         { "@id": 2, "pop": "screen", "child": 1 }
//!     ]
//! }"#;
//! let plan = PhysicalPlanReader::new().read_physical_plan(json).unwrap();
//! assert_eq!(plan.root.id, 2);
//! ```

pub mod error;
pub mod physical_plan;
pub mod reader;

pub use error::{PlanError, Result};
pub use physical_plan::{
    build, rewrite, Arity, CostEstimate, Distribution, JoinType, OperatorId, OperatorKind, OperatorRef,
    PhysicalOperator, ScanSplit,
};
pub use reader::{PhysicalPlan, PhysicalPlanReader, PlanHeader, PLAN_VERSION};
