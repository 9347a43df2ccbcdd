use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identity of an operator, unique within one physical plan.
pub type OperatorId = u32;

/// Shared handle to a node of the operator tree.
pub type OperatorRef = Arc<PhysicalOperator>;

/// Optimizer estimate attached to an operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub rows: f64,
    pub cost: f64,
}

impl CostEstimate {
    pub fn new(rows: f64, cost: f64) -> Self {
        Self { rows, cost }
    }
}

/// One readable unit of a scan and the host that stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSplit {
    pub id: String,
    pub host: String,
    #[serde(default)]
    pub bytes: u64,
}

impl ScanSplit {
    pub fn new(id: impl Into<String>, host: impl Into<String>, bytes: u64) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            bytes,
        }
    }
}

/// How an exchange moves rows from sender copies to receiver copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Distribution {
    /// Every sender copy sends to a single receiver.
    Union,
    /// Like `Union`, but the receiver merges sorted streams.
    SingleMerge { ordering: Vec<String> },
    /// Rows are routed to receivers by hashing `keys`.
    Hash { keys: Vec<String> },
    /// Every sender copy sends every row to all receivers.
    Broadcast,
}

impl Distribution {
    /// Whether the receiving side must run as a single copy.
    pub fn requires_single_receiver(&self) -> bool {
        matches!(self, Distribution::Union | Distribution::SingleMerge { .. })
    }

    /// Factor applied to sender rows to estimate receiver-side volume.
    pub fn amplification(&self, fan_out: usize) -> f64 {
        match self {
            Distribution::Broadcast => fan_out.max(1) as f64,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

/// The capability set of an operator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Leaf,
    Single,
    Multi,
    Exchange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pop", rename_all = "kebab-case")]
pub enum OperatorKind {
    Scan {
        table: String,
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default)]
        splits: Vec<ScanSplit>,
    },
    Values {
        rows: u64,
    },
    Filter {
        predicate: String,
    },
    Project {
        exprs: Vec<String>,
    },
    Sort {
        keys: Vec<String>,
    },
    Limit {
        #[serde(default)]
        offset: u64,
        #[serde(default)]
        fetch: Option<u64>,
    },
    HashAggregate {
        #[serde(default)]
        group_keys: Vec<String>,
        #[serde(default)]
        aggregates: Vec<String>,
    },
    HashJoin {
        join_type: JoinType,
        #[serde(default)]
        on: Vec<(String, String)>,
    },
    UnionAll,
    /// Returns the query result to the client.
    Screen,
    Exchange {
        distribution: Distribution,
    },
    /// Sending half of an exchange, only present in materialized work units.
    Sender {
        exchange: OperatorId,
        receiver_fragment: u32,
        distribution: Distribution,
    },
    /// Receiving half of an exchange, only present in materialized work units.
    Receiver {
        exchange: OperatorId,
        sender_fragment: u32,
        distribution: Distribution,
    },
}

impl OperatorKind {
    pub fn arity(&self) -> Arity {
        match self {
            OperatorKind::Scan { .. } | OperatorKind::Values { .. } | OperatorKind::Receiver { .. } => {
                Arity::Leaf
            }
            OperatorKind::Filter { .. }
            | OperatorKind::Project { .. }
            | OperatorKind::Sort { .. }
            | OperatorKind::Limit { .. }
            | OperatorKind::HashAggregate { .. }
            | OperatorKind::Screen
            | OperatorKind::Sender { .. } => Arity::Single,
            OperatorKind::HashJoin { .. } | OperatorKind::UnionAll => Arity::Multi,
            OperatorKind::Exchange { .. } => Arity::Exchange,
        }
    }

    /// Inclusive bounds on the number of inputs, `None` meaning unbounded.
    pub fn child_bounds(&self) -> (usize, Option<usize>) {
        match self {
            OperatorKind::HashJoin { .. } => (2, Some(2)),
            _ => match self.arity() {
                Arity::Leaf => (0, Some(0)),
                Arity::Single | Arity::Exchange => (1, Some(1)),
                Arity::Multi => (2, None),
            },
        }
    }

    /// Short operator name, matching the `pop` tag of the JSON plan format.
    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Scan { .. } => "scan",
            OperatorKind::Values { .. } => "values",
            OperatorKind::Filter { .. } => "filter",
            OperatorKind::Project { .. } => "project",
            OperatorKind::Sort { .. } => "sort",
            OperatorKind::Limit { .. } => "limit",
            OperatorKind::HashAggregate { .. } => "hash-aggregate",
            OperatorKind::HashJoin { .. } => "hash-join",
            OperatorKind::UnionAll => "union-all",
            OperatorKind::Screen => "screen",
            OperatorKind::Exchange { .. } => "exchange",
            OperatorKind::Sender { .. } => "sender",
            OperatorKind::Receiver { .. } => "receiver",
        }
    }

    pub fn is_exchange(&self) -> bool {
        self.arity() == Arity::Exchange
    }

    /// Leaf operators that produce rows on their own.
    pub fn is_data_source(&self) -> bool {
        matches!(self, OperatorKind::Scan { .. } | OperatorKind::Values { .. })
    }

    /// Operators that are only created when work units are materialized.
    pub fn is_materialized_only(&self) -> bool {
        matches!(self, OperatorKind::Sender { .. } | OperatorKind::Receiver { .. })
    }
}

/// A node of the physical operator tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalOperator {
    pub id: OperatorId,
    pub kind: OperatorKind,
    pub cost: Option<CostEstimate>,
    pub children: Vec<OperatorRef>,
}

impl PhysicalOperator {
    pub fn new(id: OperatorId, kind: OperatorKind, children: Vec<OperatorRef>) -> Self {
        Self {
            id,
            kind,
            cost: None,
            children,
        }
    }

    pub fn with_cost(mut self, rows: f64, cost: f64) -> Self {
        self.cost = Some(CostEstimate::new(rows, cost));
        self
    }

    /// Same operator with different inputs.
    pub fn with_children(&self, children: Vec<OperatorRef>) -> Self {
        Self {
            id: self.id,
            kind: self.kind.clone(),
            cost: self.cost,
            children,
        }
    }

    pub fn into_ref(self) -> OperatorRef {
        Arc::new(self)
    }

    pub fn arity(&self) -> Arity {
        self.kind.arity()
    }

    /// Preorder walk over the subtree rooted here.
    pub fn iter(&self) -> impl Iterator<Item = &PhysicalOperator> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let op = stack.pop()?;
            stack.extend(op.children.iter().rev().map(|c| c.as_ref()));
            Some(op)
        })
    }

    /// Number of operators in the subtree rooted here.
    pub fn subtree_len(&self) -> usize {
        self.iter().count()
    }

    /// Counts the exchange operators in the subtree rooted here.
    pub fn exchange_count(&self) -> usize {
        self.iter().filter(|op| op.kind.is_exchange()).count()
    }
}

/// Rebuilds a tree bottom-up with an explicit stack.
///
/// `replace` sees every operator before its inputs. Returning `Some`
/// substitutes that subtree and skips its inputs; returning `None` keeps the
/// operator and rebuilds it over its rewritten inputs.
pub fn rewrite<F>(root: &OperatorRef, mut replace: F) -> OperatorRef
where
    F: FnMut(&OperatorRef) -> Option<OperatorRef>,
{
    enum Step<'a> {
        Enter(&'a OperatorRef),
        Exit(&'a OperatorRef),
    }

    let mut stack = vec![Step::Enter(root)];
    let mut built: Vec<OperatorRef> = Vec::new();
    while let Some(step) = stack.pop() {
        match step {
            Step::Enter(op) => match replace(op) {
                Some(replacement) => built.push(replacement),
                None => {
                    stack.push(Step::Exit(op));
                    stack.extend(op.children.iter().rev().map(Step::Enter));
                }
            },
            Step::Exit(op) => {
                let children = built.split_off(built.len() - op.children.len());
                built.push(Arc::new(op.with_children(children)));
            }
        }
    }
    built.pop().unwrap_or_else(|| root.clone())
}

// Unlinks uniquely owned inputs one level at a time so that long chains do
// not drop recursively.
impl Drop for PhysicalOperator {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(child) = pending.pop() {
            if let Ok(mut op) = Arc::try_unwrap(child) {
                pending.append(&mut op.children);
            }
        }
    }
}

/// Indented rendering of the subtree, one operator per line.
impl fmt::Display for PhysicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![(self, 0usize)];
        while let Some((op, depth)) = stack.pop() {
            write!(f, "{:indent$}{}#{}", "", op.kind.name(), op.id, indent = depth * 2)?;
            if let Some(cost) = &op.cost {
                write!(f, " rows={} cost={}", cost.rows, cost.cost)?;
            }
            writeln!(f)?;
            stack.extend(op.children.iter().rev().map(|c| (c.as_ref(), depth + 1)));
        }
        Ok(())
    }
}

/// Shorthand constructors for building trees in code and tests.
pub mod build {
    use super::*;

    pub fn scan(id: OperatorId, table: &str, splits: Vec<ScanSplit>) -> PhysicalOperator {
        PhysicalOperator::new(
            id,
            OperatorKind::Scan {
                table: table.to_string(),
                columns: vec![],
                splits,
            },
            vec![],
        )
    }

    pub fn values(id: OperatorId, rows: u64) -> PhysicalOperator {
        PhysicalOperator::new(id, OperatorKind::Values { rows }, vec![])
    }

    pub fn filter(id: OperatorId, predicate: &str, input: PhysicalOperator) -> PhysicalOperator {
        PhysicalOperator::new(
            id,
            OperatorKind::Filter {
                predicate: predicate.to_string(),
            },
            vec![input.into_ref()],
        )
    }

    pub fn aggregate(id: OperatorId, group_keys: &[&str], input: PhysicalOperator) -> PhysicalOperator {
        PhysicalOperator::new(
            id,
            OperatorKind::HashAggregate {
                group_keys: group_keys.iter().map(|k| k.to_string()).collect(),
                aggregates: vec![],
            },
            vec![input.into_ref()],
        )
    }

    pub fn join(id: OperatorId, left: PhysicalOperator, right: PhysicalOperator) -> PhysicalOperator {
        PhysicalOperator::new(
            id,
            OperatorKind::HashJoin {
                join_type: JoinType::Inner,
                on: vec![],
            },
            vec![left.into_ref(), right.into_ref()],
        )
    }

    pub fn exchange(id: OperatorId, distribution: Distribution, input: PhysicalOperator) -> PhysicalOperator {
        PhysicalOperator::new(id, OperatorKind::Exchange { distribution }, vec![input.into_ref()])
    }

    pub fn screen(id: OperatorId, input: PhysicalOperator) -> PhysicalOperator {
        PhysicalOperator::new(id, OperatorKind::Screen, vec![input.into_ref()])
    }
}

#[cfg(test)]
mod tests {
    use super::build::*;
    use super::*;

    #[test]
    fn arity_matches_child_bounds() {
        assert_eq!(OperatorKind::Screen.child_bounds(), (1, Some(1)));
        assert_eq!(OperatorKind::UnionAll.child_bounds(), (2, None));
        let join = OperatorKind::HashJoin {
            join_type: JoinType::Inner,
            on: vec![],
        };
        assert_eq!(join.arity(), Arity::Multi);
        assert_eq!(join.child_bounds(), (2, Some(2)));
        let exchange = OperatorKind::Exchange {
            distribution: Distribution::Broadcast,
        };
        assert!(exchange.is_exchange());
        assert_eq!(exchange.child_bounds(), (1, Some(1)));
    }

    #[test]
    fn broadcast_amplifies_by_fan_out() {
        assert_eq!(Distribution::Broadcast.amplification(4), 4.0);
        assert_eq!(Distribution::Broadcast.amplification(0), 1.0);
        assert_eq!(Distribution::Hash { keys: vec![] }.amplification(4), 1.0);
        assert!(Distribution::Union.requires_single_receiver());
        assert!(!Distribution::Broadcast.requires_single_receiver());
    }

    #[test]
    fn counts_operators_and_exchanges() {
        let plan = screen(
            5,
            join(
                4,
                exchange(2, Distribution::Hash { keys: vec!["a".into()] }, scan(1, "t1", vec![])),
                exchange(3, Distribution::Broadcast, values(6, 3)),
            ),
        );
        assert_eq!(plan.subtree_len(), 6);
        assert_eq!(plan.exchange_count(), 2);
        let rendered = plan.to_string();
        assert!(rendered.starts_with("screen#5"));
        assert!(rendered.contains("    exchange#2"));
    }

    #[test]
    fn rewrite_replaces_subtrees_and_rebuilds_the_rest() {
        let plan = screen(
            4,
            join(3, exchange(2, Distribution::Union, scan(1, "t", vec![])), values(5, 2)),
        )
        .into_ref();
        let rewritten = rewrite(&plan, |op| match op.kind {
            OperatorKind::Exchange { .. } => Some(values(op.id, 7).into_ref()),
            _ => None,
        });
        assert_eq!(rewritten.subtree_len(), 4);
        assert_eq!(rewritten.exchange_count(), 0);
        let ids: Vec<OperatorId> = rewritten.iter().map(|op| op.id).collect();
        assert_eq!(ids, vec![4, 3, 2, 5]);
        assert_eq!(rewritten.children[0].children[0].kind, OperatorKind::Values { rows: 7 });
        assert_eq!(plan.exchange_count(), 1);
    }

    #[test]
    fn long_chains_are_walked_and_dropped_without_recursion() {
        let mut op = values(0, 1);
        for id in 1..200_000 {
            op = filter(id, "x > 0", op);
        }
        let plan = op.into_ref();
        assert_eq!(plan.subtree_len(), 200_000);
        let copy = rewrite(&plan, |_| None);
        assert_eq!(copy.iter().last().map(|op| op.id), Some(0));
        drop(copy);
        drop(plan);
    }
}
