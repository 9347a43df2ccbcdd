//! Per-query planning annotations, kept beside the immutable fragment tree.

use crate::fragment::{FragmentGraph, FragmentId};
use crate::stats::FragmentStats;
use igloo_common::Endpoint;
use igloo_plan::{Distribution, OperatorId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Planning data derived for one fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentPlanning {
    pub stats: FragmentStats,
    /// One endpoint per copy; empty until the fragment is assigned.
    pub endpoints: Vec<Endpoint>,
}

impl FragmentPlanning {
    pub fn width(&self) -> usize {
        self.endpoints.len()
    }
}

/// Fan-in/fan-out shape of an exchange once both sides have a width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeShape {
    OneToOne,
    ManyToOne { senders: usize },
    OneToMany { receivers: usize },
    ManyToMany { senders: usize, receivers: usize },
}

impl ExchangeShape {
    pub fn from_widths(senders: usize, receivers: usize) -> Self {
        match (senders, receivers) {
            (s, r) if s <= 1 && r <= 1 => ExchangeShape::OneToOne,
            (s, r) if r <= 1 => ExchangeShape::ManyToOne { senders: s },
            (s, r) if s <= 1 => ExchangeShape::OneToMany { receivers: r },
            (senders, receivers) => ExchangeShape::ManyToMany { senders, receivers },
        }
    }

    pub fn senders(&self) -> usize {
        match self {
            ExchangeShape::OneToOne | ExchangeShape::OneToMany { .. } => 1,
            ExchangeShape::ManyToOne { senders } | ExchangeShape::ManyToMany { senders, .. } => *senders,
        }
    }

    pub fn receivers(&self) -> usize {
        match self {
            ExchangeShape::OneToOne | ExchangeShape::ManyToOne { .. } => 1,
            ExchangeShape::OneToMany { receivers } | ExchangeShape::ManyToMany { receivers, .. } => {
                *receivers
            }
        }
    }
}

/// Sender and receiver placement of one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeAssignment {
    pub exchange: OperatorId,
    pub distribution: Distribution,
    pub sender: FragmentId,
    pub receiver: FragmentId,
    pub sender_endpoints: Vec<Endpoint>,
    pub receiver_endpoints: Vec<Endpoint>,
    pub shape: ExchangeShape,
}

/// Scratch space shared by the stats and assignment phases of one query.
///
/// Entries are indexed by fragment id. The set is dropped once work units
/// are built, or when planning fails or is cancelled.
#[derive(Debug, Clone, Default)]
pub struct PlanningSet {
    entries: Vec<FragmentPlanning>,
    exchanges: BTreeMap<OperatorId, ExchangeAssignment>,
}

impl PlanningSet {
    pub fn new(graph: &FragmentGraph) -> Self {
        Self {
            entries: vec![FragmentPlanning::default(); graph.len()],
            exchanges: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: FragmentId) -> Option<&FragmentPlanning> {
        self.entries.get(id.index())
    }

    pub fn stats(&self, id: FragmentId) -> Option<&FragmentStats> {
        self.get(id).map(|p| &p.stats)
    }

    pub fn set_stats(&mut self, id: FragmentId, stats: FragmentStats) {
        if let Some(entry) = self.entries.get_mut(id.index()) {
            entry.stats = stats;
        }
    }

    pub fn width(&self, id: FragmentId) -> usize {
        self.get(id).map_or(0, FragmentPlanning::width)
    }

    pub fn endpoints(&self, id: FragmentId) -> &[Endpoint] {
        self.get(id).map_or(&[], |p| p.endpoints.as_slice())
    }

    pub fn set_endpoints(&mut self, id: FragmentId, endpoints: Vec<Endpoint>) {
        if let Some(entry) = self.entries.get_mut(id.index()) {
            entry.endpoints = endpoints;
        }
    }

    pub fn record_exchange(&mut self, assignment: ExchangeAssignment) {
        self.exchanges.insert(assignment.exchange, assignment);
    }

    pub fn exchange(&self, exchange: OperatorId) -> Option<&ExchangeAssignment> {
        self.exchanges.get(&exchange)
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &ExchangeAssignment> {
        self.exchanges.values()
    }
}
