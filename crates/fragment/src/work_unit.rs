//! Materialized, per-endpoint units of execution.

use crate::error::{PlanningError, Result};
use crate::fragment::{Fragment, FragmentGraph, FragmentId};
use crate::planning_set::PlanningSet;
use igloo_common::{Endpoint, QueryId};
use igloo_plan::{
    rewrite, Distribution, OperatorId, OperatorKind, OperatorRef, PhysicalOperator, ScanSplit,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// `(query, major fragment, minor fragment)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentHandle {
    pub query_id: QueryId,
    pub major: FragmentId,
    pub minor: u32,
}

impl std::fmt::Display for FragmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.query_id, self.major, self.minor)
    }
}

/// One copy of a fragment and where it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinorFragmentEndpoint {
    pub minor: u32,
    pub endpoint: Endpoint,
}

/// Senders a unit receives from over one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverBinding {
    pub exchange: OperatorId,
    pub sender_fragment: FragmentId,
    #[serde(with = "json_text")]
    pub distribution: Distribution,
    pub senders: Vec<MinorFragmentEndpoint>,
}

impl ReceiverBinding {
    /// Number of sender streams that must finish before this input is done.
    pub fn expected_senders(&self) -> usize {
        self.senders.len()
    }
}

/// Receivers a unit sends its output to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderBinding {
    pub exchange: OperatorId,
    pub receiver_fragment: FragmentId,
    #[serde(with = "json_text")]
    pub distribution: Distribution,
    pub destinations: Vec<MinorFragmentEndpoint>,
}

/// Everything one endpoint needs to run one fragment copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentUnit {
    pub handle: FragmentHandle,
    pub endpoint: Endpoint,
    #[serde(with = "plan_graph")]
    pub plan: OperatorRef,
    pub receivers: Vec<ReceiverBinding>,
    pub sender: Option<SenderBinding>,
}

impl FragmentUnit {
    pub fn is_root(&self) -> bool {
        self.sender.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.receivers.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// The complete dispatchable output of planning one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryWorkUnit {
    pub query_id: QueryId,
    /// The single copy of the root fragment, run on the foreman.
    pub root: FragmentUnit,
    /// Every other unit, ordered by major then minor fragment id.
    pub fragments: Vec<FragmentUnit>,
}

impl QueryWorkUnit {
    pub fn units(&self) -> impl Iterator<Item = &FragmentUnit> {
        std::iter::once(&self.root).chain(self.fragments.iter())
    }

    pub fn units_for<'a>(&'a self, endpoint: &'a Endpoint) -> impl Iterator<Item = &'a FragmentUnit> {
        self.units().filter(move |u| &u.endpoint == endpoint)
    }

    /// Number of units, the root included.
    pub fn len(&self) -> usize {
        1 + self.fragments.len()
    }

    /// Always false: a planned query has at least its root unit.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Turns an assigned fragment tree into per-copy work units.
pub struct WorkUnitBuilder<'a> {
    query_id: QueryId,
    graph: &'a FragmentGraph,
    planning: &'a PlanningSet,
}

impl<'a> WorkUnitBuilder<'a> {
    pub fn new(query_id: QueryId, graph: &'a FragmentGraph, planning: &'a PlanningSet) -> Self {
        Self {
            query_id,
            graph,
            planning,
        }
    }

    pub fn build(&self) -> Result<QueryWorkUnit> {
        let mut units = Vec::new();
        for id in self.graph.pre_order() {
            if let Some(fragment) = self.graph.get(id) {
                units.extend(self.fragment_units(fragment)?);
            }
        }
        units.sort_by_key(|u| (u.handle.major, u.handle.minor));

        let mut units = units.into_iter();
        let root = match units.next() {
            Some(unit) if unit.handle.major == FragmentId::ROOT => unit,
            _ => {
                return Err(PlanningError::insufficient(
                    FragmentId::ROOT,
                    "root fragment has no assigned endpoint",
                ))
            }
        };
        let work = QueryWorkUnit {
            query_id: self.query_id,
            root,
            fragments: units.collect(),
        };
        info!(
            query_id = %self.query_id,
            fragments = self.graph.len(),
            units = work.len(),
            "built work units"
        );
        Ok(work)
    }

    fn fragment_units(&self, fragment: &Fragment) -> Result<Vec<FragmentUnit>> {
        let id = fragment.id();
        let endpoints = self.planning.endpoints(id);
        if endpoints.is_empty() {
            return Err(PlanningError::insufficient(id, "fragment has not been assigned"));
        }

        let receivers = fragment
            .iter()
            .map(|pair| -> Result<ReceiverBinding> {
                let assignment = self.planning.exchange(pair.exchange().id).ok_or_else(|| {
                    PlanningError::insufficient(
                        id,
                        format!("exchange {} has no assignment", pair.exchange().id),
                    )
                })?;
                Ok(ReceiverBinding {
                    exchange: assignment.exchange,
                    sender_fragment: assignment.sender,
                    distribution: assignment.distribution.clone(),
                    senders: minor_endpoints(&assignment.sender_endpoints),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let sender = match (fragment.sending_exchange(), fragment.parent()) {
            (Some(exchange), Some(parent)) => {
                let assignment = self.planning.exchange(exchange.id).ok_or_else(|| {
                    PlanningError::insufficient(id, format!("exchange {} has no assignment", exchange.id))
                })?;
                let mut destinations = minor_endpoints(&assignment.receiver_endpoints);
                if assignment.distribution.requires_single_receiver() {
                    destinations.truncate(1);
                }
                Some(SenderBinding {
                    exchange: exchange.id,
                    receiver_fragment: parent,
                    distribution: assignment.distribution.clone(),
                    destinations,
                })
            }
            _ => None,
        };

        let splits = collect_splits(fragment.root(), endpoints);

        let units = endpoints
            .iter()
            .enumerate()
            .map(|(minor, endpoint)| {
                let materializer = Materializer {
                    fragment,
                    minor,
                    splits: &splits,
                };
                let mut plan = materializer.materialize(fragment.root());
                if let Some(binding) = &sender {
                    plan = Arc::new(PhysicalOperator::new(
                        binding.exchange,
                        OperatorKind::Sender {
                            exchange: binding.exchange,
                            receiver_fragment: binding.receiver_fragment.0,
                            distribution: binding.distribution.clone(),
                        },
                        vec![plan],
                    ));
                }
                FragmentUnit {
                    handle: FragmentHandle {
                        query_id: self.query_id,
                        major: id,
                        minor: minor as u32,
                    },
                    endpoint: endpoint.clone(),
                    plan,
                    receivers: receivers.clone(),
                    sender: sender.clone(),
                }
            })
            .collect::<Vec<_>>();
        debug!(fragment = %id, units = units.len(), "materialized fragment");
        Ok(units)
    }
}

fn minor_endpoints(endpoints: &[Endpoint]) -> Vec<MinorFragmentEndpoint> {
    endpoints
        .iter()
        .enumerate()
        .map(|(minor, endpoint)| MinorFragmentEndpoint {
            minor: minor as u32,
            endpoint: endpoint.clone(),
        })
        .collect()
}

fn collect_splits(
    root: &PhysicalOperator,
    endpoints: &[Endpoint],
) -> HashMap<OperatorId, Vec<Vec<ScanSplit>>> {
    root.iter()
        .filter_map(|op| match &op.kind {
            OperatorKind::Scan { splits, .. } => Some((op.id, assign_splits(splits, endpoints))),
            _ => None,
        })
        .collect()
}

/// Distributes scan splits over the copies of a fragment.
///
/// A split goes to the least-loaded copy on its own host, or to the
/// least-loaded copy overall when no copy runs there. Ties go to the lowest
/// minor index. The result has one entry per endpoint.
pub fn assign_splits(splits: &[ScanSplit], endpoints: &[Endpoint]) -> Vec<Vec<ScanSplit>> {
    let mut assigned: Vec<Vec<ScanSplit>> = vec![Vec::new(); endpoints.len()];
    for split in splits {
        let local = (0..endpoints.len())
            .filter(|&i| endpoints[i].host() == split.host)
            .min_by_key(|&i| (assigned[i].len(), i));
        let target = local.or_else(|| (0..endpoints.len()).min_by_key(|&i| (assigned[i].len(), i)));
        if let Some(target) = target {
            assigned[target].push(split.clone());
        }
    }
    assigned
}

/// Rewrites a fragment tree for one copy.
struct Materializer<'a> {
    fragment: &'a Fragment,
    minor: usize,
    splits: &'a HashMap<OperatorId, Vec<Vec<ScanSplit>>>,
}

impl Materializer<'_> {
    fn materialize(&self, root: &OperatorRef) -> OperatorRef {
        rewrite(root, |op| self.replace(op))
    }

    /// Per-copy replacement for boundary and scan operators.
    fn replace(&self, op: &OperatorRef) -> Option<OperatorRef> {
        match &op.kind {
            OperatorKind::Exchange { distribution } => {
                let sender = self
                    .fragment
                    .iter()
                    .find(|pair| pair.exchange().id == op.id)
                    .map_or(0, |pair| pair.node().0);
                let mut receiver = PhysicalOperator::new(
                    op.id,
                    OperatorKind::Receiver {
                        exchange: op.id,
                        sender_fragment: sender,
                        distribution: distribution.clone(),
                    },
                    vec![],
                );
                receiver.cost = op.cost;
                Some(Arc::new(receiver))
            }
            OperatorKind::Scan { table, columns, .. } => {
                let splits = self
                    .splits
                    .get(&op.id)
                    .and_then(|per_copy| per_copy.get(self.minor))
                    .cloned()
                    .unwrap_or_default();
                let mut scan = PhysicalOperator::new(
                    op.id,
                    OperatorKind::Scan {
                        table: table.clone(),
                        columns: columns.clone(),
                        splits,
                    },
                    vec![],
                );
                scan.cost = op.cost;
                Some(Arc::new(scan))
            }
            _ => None,
        }
    }
}

/// Carries a plan as its persisted graph document. The graph lists
/// operators flat, so decoding does not nest with plan depth.
mod plan_graph {
    use igloo_plan::{OperatorRef, PhysicalPlan, PhysicalPlanReader};
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(plan: &OperatorRef, serializer: S) -> Result<S::Ok, S::Error> {
        let text = PhysicalPlanReader::new()
            .write_physical_plan(&PhysicalPlan::new(plan.clone()))
            .map_err(S::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OperatorRef, D::Error> {
        let text = String::deserialize(deserializer)?;
        PhysicalPlanReader::new()
            .read_physical_plan(&text)
            .map(|plan| plan.root)
            .map_err(D::Error::custom)
    }
}

/// Embeds a value as JSON text so that internally tagged enums survive
/// formats that cannot deserialize them directly.
mod json_text {
    use serde::de::{DeserializeOwned, Error as _};
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T: Serialize, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        let text = serde_json::to_string(value).map_err(S::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, T: DeserializeOwned, D: Deserializer<'de>>(deserializer: D) -> Result<T, D::Error> {
        let text = String::deserialize(deserializer)?;
        serde_json::from_str(&text).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assigner::Assigner;
    use crate::config::PlannerSettings;
    use crate::fragmenter::make_fragments;
    use crate::stats::StatsCollector;
    use crate::width::CostBasedWidth;
    use igloo_plan::build::*;

    fn endpoint(host: &str) -> Endpoint {
        Endpoint::new(host, 31010, 31011)
    }

    fn build_units(plan: PhysicalOperator, endpoints: &[Endpoint]) -> QueryWorkUnit {
        let settings = PlannerSettings::default();
        let graph = make_fragments(&plan.into_ref()).unwrap();
        let mut planning = PlanningSet::new(&graph);
        StatsCollector::new(&settings, endpoints.len()).collect(&graph, &mut planning);
        let policy = CostBasedWidth::new(&settings);
        let foreman = endpoint("foreman");
        Assigner::new(&settings, &policy, endpoints, &foreman)
            .assign(&graph, &mut planning)
            .unwrap();
        WorkUnitBuilder::new(QueryId::new(), &graph, &planning)
            .build()
            .unwrap()
    }

    #[test]
    fn splits_prefer_local_copies() {
        let endpoints = vec![endpoint("a"), endpoint("b")];
        let splits = vec![
            ScanSplit::new("0", "a", 1),
            ScanSplit::new("1", "b", 1),
            ScanSplit::new("2", "a", 1),
            ScanSplit::new("3", "c", 1),
        ];
        let assigned = assign_splits(&splits, &endpoints);
        let ids = |i: usize| assigned[i].iter().map(|s| s.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids(0), vec!["0", "2"]);
        assert_eq!(ids(1), vec!["1", "3"]);
    }

    #[test]
    fn remote_splits_balance_over_copies() {
        let endpoints = vec![endpoint("a"), endpoint("b"), endpoint("c")];
        let splits: Vec<_> = (0..7)
            .map(|i| ScanSplit::new(i.to_string(), "remote", 1))
            .collect();
        let assigned = assign_splits(&splits, &endpoints);
        let sizes: Vec<_> = assigned.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
        assert!(assign_splits(&splits, &[]).is_empty());
    }

    #[test]
    fn boundaries_become_receivers_and_senders() {
        let plan = screen(
            3,
            exchange(2, Distribution::Union, values(1, 5).with_cost(1.0, 1.0)),
        );
        let work = build_units(plan, &[endpoint("a")]);
        assert_eq!(work.len(), 2);

        match &work.root.plan.kind {
            OperatorKind::Screen => {}
            other => panic!("unexpected root {:?}", other),
        }
        assert!(matches!(
            work.root.plan.children[0].kind,
            OperatorKind::Receiver { exchange: 2, sender_fragment: 1, .. }
        ));
        assert_eq!(work.root.receivers[0].expected_senders(), 1);

        let leaf = &work.fragments[0];
        assert!(leaf.is_leaf());
        assert!(matches!(
            leaf.plan.kind,
            OperatorKind::Sender { exchange: 2, receiver_fragment: 0, .. }
        ));
        let sender = leaf.sender.as_ref().unwrap();
        assert_eq!(sender.destinations[0].endpoint, endpoint("foreman"));
    }

    #[test]
    fn each_copy_scans_its_own_splits() {
        let splits = vec![
            ScanSplit::new("0", "a", 10),
            ScanSplit::new("1", "b", 10),
        ];
        let plan = screen(
            3,
            exchange(2, Distribution::Union, scan(1, "t", splits).with_cost(1e6, 1e6)),
        );
        let endpoints = vec![endpoint("a"), endpoint("b")];
        let work = build_units(plan, &endpoints);
        assert_eq!(work.fragments.len(), 2);
        for unit in &work.fragments {
            let scan = &unit.plan.children[0];
            match &scan.kind {
                OperatorKind::Scan { splits, .. } => {
                    assert_eq!(splits.len(), 1);
                    assert_eq!(splits[0].host, unit.endpoint.host());
                }
                other => panic!("expected scan, got {:?}", other),
            }
        }
    }

    #[test]
    fn units_round_trip_through_bincode() {
        let plan = screen(
            3,
            exchange(
                2,
                Distribution::Hash { keys: vec!["k".into()] },
                scan(1, "t", vec![ScanSplit::new("0", "a", 1)]).with_cost(1.0, 2.0),
            ),
        );
        let work = build_units(plan, &[endpoint("a")]);
        for unit in work.units() {
            let bytes = unit.encode().unwrap();
            assert_eq!(&FragmentUnit::decode(&bytes).unwrap(), unit);
        }
    }

    #[test]
    fn deep_fragments_round_trip_through_bincode() {
        let mut chain = values(1, 5).with_cost(5.0, 5.0);
        for id in 2..=101 {
            chain = filter(id, "v > 0", chain);
        }
        let plan = screen(103, exchange(102, Distribution::Union, chain));
        let work = build_units(plan, &[endpoint("a")]);
        assert_eq!(work.len(), 2);
        for unit in work.units() {
            let decoded = FragmentUnit::decode(&unit.encode().unwrap()).unwrap();
            assert_eq!(&decoded, unit);
        }
        // Sender, 100 filters and the values source.
        assert_eq!(work.fragments[0].plan.subtree_len(), 102);
    }

    #[test]
    fn units_for_filters_by_endpoint() {
        let plan = screen(
            3,
            exchange(2, Distribution::Union, values(1, 5).with_cost(1.0, 1.0)),
        );
        let work = build_units(plan, &[endpoint("a")]);
        assert!(!work.is_empty());
        assert_eq!(work.units_for(&endpoint("a")).count(), 1);
        assert_eq!(work.units_for(&endpoint("foreman")).count(), 1);
        assert_eq!(work.units_for(&endpoint("z")).count(), 0);
    }
}
