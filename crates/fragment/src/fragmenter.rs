//! Splits an operator tree into fragments at exchange boundaries.

use crate::error::{PlanningError, Result};
use crate::fragment::{ExchangePair, Fragment, FragmentGraph, FragmentId};
use igloo_plan::{Distribution, OperatorId, OperatorKind, OperatorRef};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Operators accumulated for the fragment currently being built.
struct FragmentBuilder {
    id: FragmentId,
    parent: Option<FragmentId>,
    sending_exchange: Option<OperatorRef>,
    operators: Vec<OperatorId>,
    receiving: Vec<ExchangePair>,
    sources: usize,
}

impl FragmentBuilder {
    fn new(id: FragmentId, parent: Option<FragmentId>, sending_exchange: Option<OperatorRef>) -> Self {
        Self {
            id,
            parent,
            sending_exchange,
            operators: Vec::new(),
            receiving: Vec::new(),
            sources: 0,
        }
    }
}

#[derive(Default)]
struct Fragmenter {
    next_id: u32,
    sealed: Vec<Fragment>,
    seen: HashSet<OperatorId>,
}

/// One pending action of the depth-first walk.
enum Step<'a> {
    /// Check an operator and queue its inputs.
    Enter(&'a OperatorRef),
    /// Rebuild an operator over its fragment-local inputs.
    Exit(&'a OperatorRef),
    /// Close the sending fragment below an exchange.
    Seal {
        boundary: OperatorRef,
        distribution: &'a Distribution,
    },
}

/// Builds the fragment tree of `root` in one depth-first walk.
///
/// The root fragment gets id 0 and sending fragments are numbered in the
/// order their exchanges are met. Any violation of the tree's shape is
/// fatal and no fragments are returned.
pub fn make_fragments(root: &OperatorRef) -> Result<FragmentGraph> {
    let mut fragmenter = Fragmenter::default();
    fragmenter.walk(root)?;

    let mut fragments = fragmenter.sealed;
    fragments.sort_by_key(|f| f.id());
    debug!(fragments = fragments.len(), "fragmented operator tree");
    Ok(FragmentGraph::new(fragments))
}

impl Fragmenter {
    fn allocate(&mut self) -> FragmentId {
        let id = FragmentId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Walks the tree with an explicit stack. `open` holds the fragments
    /// under construction, innermost last, and `built` the fragment-local
    /// copies of finished subtrees, with exchanges cut down to childless
    /// boundary nodes.
    fn walk(&mut self, root: &OperatorRef) -> Result<()> {
        let mut open = vec![FragmentBuilder::new(self.allocate(), None, None)];
        let mut built: Vec<OperatorRef> = Vec::new();
        let mut stack = vec![Step::Enter(root)];

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(op) => {
                    self.check(op)?;
                    let current = open.last_mut().ok_or_else(|| unbalanced(op.id))?;
                    if let OperatorKind::Exchange { distribution } = &op.kind {
                        if current.operators.is_empty() {
                            return Err(PlanningError::malformed(
                                op.id,
                                "an exchange cannot be the root of a fragment",
                            ));
                        }
                        let parent = current.id;
                        let boundary = Arc::new(op.with_children(vec![]));
                        open.push(FragmentBuilder::new(
                            self.allocate(),
                            Some(parent),
                            Some(boundary.clone()),
                        ));
                        stack.push(Step::Seal {
                            boundary,
                            distribution,
                        });
                        stack.push(Step::Enter(&op.children[0]));
                    } else {
                        current.operators.push(op.id);
                        if op.kind.is_data_source() {
                            current.sources += 1;
                        }
                        stack.push(Step::Exit(op));
                        stack.extend(op.children.iter().rev().map(Step::Enter));
                    }
                }
                Step::Exit(op) => {
                    let children = built.split_off(built.len() - op.children.len());
                    built.push(Arc::new(op.with_children(children)));
                }
                Step::Seal {
                    boundary,
                    distribution,
                } => {
                    let tree = built.pop().ok_or_else(|| unbalanced(boundary.id))?;
                    let sender = open.pop().ok_or_else(|| unbalanced(boundary.id))?;
                    let sender_id = sender.id;
                    self.seal(sender, tree)?;
                    open.last_mut()
                        .ok_or_else(|| unbalanced(boundary.id))?
                        .receiving
                        .push(ExchangePair::new(boundary.clone(), distribution.clone(), sender_id));
                    built.push(boundary);
                }
            }
        }

        let tree = built.pop().ok_or_else(|| unbalanced(root.id))?;
        let builder = open.pop().ok_or_else(|| unbalanced(root.id))?;
        self.seal(builder, tree)
    }

    /// Rejects operators that break the tree's shape.
    fn check(&mut self, op: &OperatorRef) -> Result<()> {
        if !self.seen.insert(op.id) {
            return Err(PlanningError::malformed(
                op.id,
                "operator appears more than once, the plan is not a tree",
            ));
        }
        if op.kind.is_materialized_only() {
            return Err(PlanningError::malformed(
                op.id,
                format!("{} operators cannot appear in an input plan", op.kind.name()),
            ));
        }
        let (min, max) = op.kind.child_bounds();
        let count = op.children.len();
        if count < min || max.is_some_and(|max| count > max) {
            let expected = match max {
                Some(max) if max == min => format!("exactly {}", min),
                Some(max) => format!("between {} and {}", min, max),
                None => format!("at least {}", min),
            };
            return Err(PlanningError::malformed(
                op.id,
                format!("{} has {} inputs, expected {}", op.kind.name(), count, expected),
            ));
        }
        Ok(())
    }

    fn seal(&mut self, builder: FragmentBuilder, root: OperatorRef) -> Result<()> {
        if builder.receiving.is_empty() && builder.sources == 0 {
            return Err(PlanningError::malformed(
                root.id,
                format!("leaf fragment {} contains no data source", builder.id),
            ));
        }
        debug!(
            fragment = %builder.id,
            operators = builder.operators.len(),
            receiving = builder.receiving.len(),
            "sealed fragment"
        );
        self.sealed.push(Fragment::new(
            builder.id,
            builder.parent,
            root,
            builder.operators,
            builder.sending_exchange,
            builder.receiving,
        ));
        Ok(())
    }
}

fn unbalanced(operator: OperatorId) -> PlanningError {
    PlanningError::malformed(operator, "fragment walk lost track of its open fragments")
}
