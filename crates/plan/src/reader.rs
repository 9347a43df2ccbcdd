//! Reading and writing persisted physical plans.
//!
//! A persisted plan is a versioned JSON document whose `graph` lists every
//! operator once. Inputs are referenced by id through `child` or
//! `children`, and the root is the single operator that nothing references.

use crate::error::{PlanError, Result};
use crate::physical_plan::{CostEstimate, OperatorId, OperatorKind, OperatorRef, PhysicalOperator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const PLAN_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanHeader {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<Generator>,
}

impl Default for PlanHeader {
    fn default() -> Self {
        Self {
            version: PLAN_VERSION,
            generator: None,
        }
    }
}

/// A physical plan with its header, as read from a persisted document.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalPlan {
    pub head: PlanHeader,
    pub root: OperatorRef,
}

impl PhysicalPlan {
    pub fn new(root: OperatorRef) -> Self {
        Self {
            head: PlanHeader::default(),
            root,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawPlan {
    head: PlanHeader,
    graph: Vec<RawOperator>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawOperator {
    #[serde(rename = "@id")]
    id: OperatorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    child: Option<OperatorId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<OperatorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cost: Option<CostEstimate>,
    #[serde(flatten)]
    kind: OperatorKind,
}

impl RawOperator {
    fn inputs(&self) -> impl Iterator<Item = OperatorId> + '_ {
        self.child.iter().chain(self.children.iter()).copied()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PhysicalPlanReader;

impl PhysicalPlanReader {
    pub fn new() -> Self {
        Self
    }

    /// Parses a persisted plan and rebuilds its operator tree.
    ///
    /// Fails when the graph is not a single tree: duplicate ids, dangling
    /// references, operators with two parents, and operators unreachable
    /// from the root are all rejected.
    pub fn read_physical_plan(&self, json: &str) -> Result<PhysicalPlan> {
        let raw: RawPlan = serde_json::from_str(json)?;
        if raw.head.version != PLAN_VERSION {
            return Err(PlanError::UnsupportedVersion {
                found: raw.head.version,
                expected: PLAN_VERSION,
            });
        }
        if raw.graph.is_empty() {
            return Err(PlanError::Malformed("plan graph is empty".to_string()));
        }

        let mut nodes = BTreeMap::new();
        for op in raw.graph {
            let id = op.id;
            if nodes.insert(id, op).is_some() {
                return Err(PlanError::Malformed(format!(
                    "operator id {} is defined more than once",
                    id
                )));
            }
        }

        let mut parents: BTreeMap<OperatorId, OperatorId> = BTreeMap::new();
        for op in nodes.values() {
            if op.child.is_some() && !op.children.is_empty() {
                return Err(PlanError::Malformed(format!(
                    "operator {} declares both `child` and `children`",
                    op.id
                )));
            }
            for input in op.inputs() {
                if !nodes.contains_key(&input) {
                    return Err(PlanError::DanglingReference(input));
                }
                if let Some(previous) = parents.insert(input, op.id) {
                    return Err(PlanError::Malformed(format!(
                        "operator {} has more than one parent ({} and {})",
                        input, previous, op.id
                    )));
                }
            }
        }

        let roots: Vec<OperatorId> = nodes
            .keys()
            .filter(|id| !parents.contains_key(id))
            .copied()
            .collect();
        let root_id = match roots.as_slice() {
            [root] => *root,
            [] => {
                return Err(PlanError::Malformed(
                    "plan graph has no root, its operators form a cycle".to_string(),
                ))
            }
            many => {
                return Err(PlanError::Malformed(format!(
                    "disconnected subtree: plan graph has {} roots {:?}",
                    many.len(),
                    many
                )))
            }
        };

        let root = build_tree(root_id, &mut nodes)?;
        if !nodes.is_empty() {
            let unreachable: Vec<OperatorId> = nodes.keys().copied().collect();
            return Err(PlanError::Malformed(format!(
                "disconnected subtree: operators {:?} are not reachable from root {}",
                unreachable, root_id
            )));
        }

        Ok(PhysicalPlan {
            head: raw.head,
            root,
        })
    }

    /// Serializes a plan back into the persisted graph format. Inputs are
    /// listed before the operators that consume them.
    pub fn write_physical_plan(&self, plan: &PhysicalPlan) -> Result<String> {
        let mut graph = Vec::with_capacity(plan.root.subtree_len());
        flatten_tree(&plan.root, &mut graph);
        let raw = RawPlan {
            head: plan.head.clone(),
            graph,
        };
        Ok(serde_json::to_string_pretty(&raw)?)
    }
}

fn build_tree(root: OperatorId, nodes: &mut BTreeMap<OperatorId, RawOperator>) -> Result<OperatorRef> {
    enum Step {
        Enter(OperatorId),
        Exit(RawOperator, usize),
    }

    let mut stack = vec![Step::Enter(root)];
    let mut built: Vec<OperatorRef> = Vec::new();
    while let Some(step) = stack.pop() {
        match step {
            Step::Enter(id) => {
                let raw = nodes.remove(&id).ok_or_else(|| {
                    PlanError::Malformed(format!("operator {} is reachable more than once", id))
                })?;
                let inputs: Vec<OperatorId> = raw.inputs().collect();
                stack.push(Step::Exit(raw, inputs.len()));
                stack.extend(inputs.into_iter().rev().map(Step::Enter));
            }
            Step::Exit(raw, arity) => {
                let children = built.split_off(built.len() - arity);
                built.push(Arc::new(PhysicalOperator {
                    id: raw.id,
                    kind: raw.kind,
                    cost: raw.cost,
                    children,
                }));
            }
        }
    }
    built
        .pop()
        .ok_or_else(|| PlanError::Malformed(format!("operator {} produced no tree", root)))
}

/// Lists the operators of a tree in post-order.
fn flatten_tree(root: &PhysicalOperator, graph: &mut Vec<RawOperator>) {
    let mut stack = vec![(root, false)];
    while let Some((op, expanded)) = stack.pop() {
        if !expanded {
            stack.push((op, true));
            stack.extend(op.children.iter().rev().map(|c| (c.as_ref(), false)));
            continue;
        }
        let inputs: Vec<OperatorId> = op.children.iter().map(|c| c.id).collect();
        let (child, children) = match inputs.as_slice() {
            [] => (None, vec![]),
            [single] => (Some(*single), vec![]),
            _ => (None, inputs),
        };
        graph.push(RawOperator {
            id: op.id,
            child,
            children,
            cost: op.cost,
            kind: op.kind.clone(),
        });
    }
}
