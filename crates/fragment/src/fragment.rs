//! Fragments and the fragment dependency tree.

use igloo_plan::{rewrite, Distribution, OperatorId, OperatorKind, OperatorRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Major fragment id. The root fragment is always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentId(pub u32);

impl FragmentId {
    pub const ROOT: FragmentId = FragmentId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An exchange feeding a fragment, and the fragment on its sending side.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangePair {
    exchange: OperatorRef,
    distribution: Distribution,
    node: FragmentId,
}

impl ExchangePair {
    pub fn new(exchange: OperatorRef, distribution: Distribution, node: FragmentId) -> Self {
        Self {
            exchange,
            distribution,
            node,
        }
    }

    pub fn exchange(&self) -> &OperatorRef {
        &self.exchange
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// The sending fragment.
    pub fn node(&self) -> FragmentId {
        self.node
    }
}

/// A contiguous sub-tree of non-exchange operators executed as one unit.
///
/// Exchanges at the fragment's lower edge appear in `root` as childless
/// boundary nodes; the fragment on the other side is reachable through
/// `receiving_exchange_pairs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    id: FragmentId,
    parent: Option<FragmentId>,
    root: OperatorRef,
    operators: Vec<OperatorId>,
    sending_exchange: Option<OperatorRef>,
    receiving_exchange_pairs: Vec<ExchangePair>,
}

impl Fragment {
    pub(crate) fn new(
        id: FragmentId,
        parent: Option<FragmentId>,
        root: OperatorRef,
        operators: Vec<OperatorId>,
        sending_exchange: Option<OperatorRef>,
        receiving_exchange_pairs: Vec<ExchangePair>,
    ) -> Self {
        Self {
            id,
            parent,
            root,
            operators,
            sending_exchange,
            receiving_exchange_pairs,
        }
    }

    pub fn id(&self) -> FragmentId {
        self.id
    }

    /// The fragment this one sends to, `None` for the root fragment.
    pub fn parent(&self) -> Option<FragmentId> {
        self.parent
    }

    pub fn root(&self) -> &OperatorRef {
        &self.root
    }

    pub fn operators(&self) -> &[OperatorId] {
        &self.operators
    }

    pub fn sending_exchange(&self) -> Option<&OperatorRef> {
        self.sending_exchange.as_ref()
    }

    pub fn receiving_exchange_pairs(&self) -> &[ExchangePair] {
        &self.receiving_exchange_pairs
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ExchangePair> {
        self.receiving_exchange_pairs.iter()
    }

    pub fn is_root(&self) -> bool {
        self.sending_exchange.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.receiving_exchange_pairs.is_empty()
    }

    /// Distribution of the sending exchange.
    pub fn sending_distribution(&self) -> Option<&Distribution> {
        self.sending_exchange.as_ref().and_then(|e| match &e.kind {
            OperatorKind::Exchange { distribution } => Some(distribution),
            _ => None,
        })
    }
}

impl<'a> IntoIterator for &'a Fragment {
    type Item = &'a ExchangePair;
    type IntoIter = std::slice::Iter<'a, ExchangePair>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Arena of fragments indexed by [`FragmentId`].
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentGraph {
    fragments: Vec<Fragment>,
}

impl FragmentGraph {
    /// `fragments` must be ordered by id, starting at the root.
    pub(crate) fn new(fragments: Vec<Fragment>) -> Self {
        debug_assert!(fragments.iter().enumerate().all(|(i, f)| f.id.index() == i));
        Self { fragments }
    }

    pub fn root(&self) -> &Fragment {
        &self.fragments[FragmentId::ROOT.index()]
    }

    pub fn get(&self, id: FragmentId) -> Option<&Fragment> {
        self.fragments.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Fragment> {
        self.fragments.iter()
    }

    /// Fragments sending into `id`, in receiving-pair order.
    pub fn children(&self, id: FragmentId) -> impl Iterator<Item = &Fragment> + '_ {
        self.get(id)
            .into_iter()
            .flat_map(|f| f.iter())
            .filter_map(move |pair| self.get(pair.node()))
    }

    /// Parents before children, starting at the root.
    pub fn pre_order(&self) -> Vec<FragmentId> {
        let mut order = Vec::with_capacity(self.len());
        let mut stack = vec![FragmentId::ROOT];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(fragment) = self.get(id) {
                stack.extend(fragment.iter().rev().map(|p| p.node()));
            }
        }
        order
    }

    /// Children before parents, ending at the root.
    pub fn post_order(&self) -> Vec<FragmentId> {
        let mut order = Vec::with_capacity(self.len());
        let mut stack = vec![(FragmentId::ROOT, false)];
        while let Some((id, expanded)) = stack.pop() {
            let Some(fragment) = self.get(id) else {
                continue;
            };
            if expanded {
                order.push(id);
            } else {
                stack.push((id, true));
                stack.extend(fragment.iter().rev().map(|p| (p.node(), false)));
            }
        }
        order
    }

    /// Rebuilds the operator tree the fragments were cut from by grafting
    /// each sending fragment back under its exchange.
    pub fn reassemble(&self) -> OperatorRef {
        self.reassemble_fragment(self.root())
    }

    fn reassemble_fragment(&self, fragment: &Fragment) -> OperatorRef {
        let senders: HashMap<OperatorId, FragmentId> = fragment
            .iter()
            .map(|pair| (pair.exchange().id, pair.node()))
            .collect();
        rewrite(&fragment.root, |op| {
            if !op.kind.is_exchange() {
                return None;
            }
            let sender = senders.get(&op.id).and_then(|id| self.get(*id))?;
            Some(Arc::new(op.with_children(vec![self.reassemble_fragment(sender)])))
        })
    }
}

impl<'a> IntoIterator for &'a FragmentGraph {
    type Item = &'a Fragment;
    type IntoIter = std::slice::Iter<'a, Fragment>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One line per fragment, indented under the fragment it sends to.
impl fmt::Display for FragmentGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_fragment(
            graph: &FragmentGraph,
            fragment: &Fragment,
            depth: usize,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(
                f,
                "{:indent$}fragment {} root={}#{} operators={:?}",
                "",
                fragment.id,
                fragment.root.kind.name(),
                fragment.root.id,
                fragment.operators,
                indent = depth * 2
            )?;
            if let Some(exchange) = fragment.sending_exchange() {
                write!(f, " sends-via={}", exchange.id)?;
            }
            writeln!(f)?;
            for child in graph.children(fragment.id) {
                write_fragment(graph, child, depth + 1, f)?;
            }
            Ok(())
        }
        write_fragment(self, self.root(), 0, f)
    }
}
