//! Registry of live workers, the source of endpoint snapshots for planning.

use crate::config::PlannerSettings;
use crate::error::ClusterError;
use crate::parallelizer::PlanningContext;
use chrono::Utc;
use igloo_common::Endpoint;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerState {
    pub endpoint: Endpoint,
    pub last_seen: i64,
}

pub type ClusterState = Arc<Mutex<HashMap<String, WorkerState>>>;

#[derive(Debug, Clone, Default)]
pub struct ClusterMembership {
    cluster: ClusterState,
}

impl ClusterMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(cluster: ClusterState) -> Self {
        Self { cluster }
    }

    /// Adds a worker, or replaces the endpoint of one already known.
    pub async fn register(&self, worker_id: &str, address: &str) -> Result<Endpoint, ClusterError> {
        let endpoint: Endpoint = address.parse()?;
        let mut cluster = self.cluster.lock().await;
        cluster.insert(
            worker_id.to_string(),
            WorkerState {
                endpoint: endpoint.clone(),
                last_seen: Utc::now().timestamp(),
            },
        );
        info!(worker_id, %endpoint, "registered worker");
        Ok(endpoint)
    }

    pub async fn heartbeat(&self, worker_id: &str) -> Result<(), ClusterError> {
        let mut cluster = self.cluster.lock().await;
        match cluster.get_mut(worker_id) {
            Some(worker) => {
                worker.last_seen = Utc::now().timestamp();
                debug!(worker_id, "heartbeat");
                Ok(())
            }
            None => Err(ClusterError::WorkerNotFound(worker_id.to_string())),
        }
    }

    pub async fn deregister(&self, worker_id: &str) -> Option<Endpoint> {
        let removed = self.cluster.lock().await.remove(worker_id);
        if removed.is_some() {
            info!(worker_id, "deregistered worker");
        }
        removed.map(|w| w.endpoint)
    }

    /// Drops workers not heard from within `timeout_secs`, returning their ids.
    pub async fn prune(&self, timeout_secs: i64) -> Vec<String> {
        self.prune_at(Utc::now().timestamp(), timeout_secs).await
    }

    pub async fn prune_at(&self, now: i64, timeout_secs: i64) -> Vec<String> {
        let mut cluster = self.cluster.lock().await;
        let mut expired: Vec<String> = cluster
            .iter()
            .filter(|(_, w)| now - w.last_seen > timeout_secs)
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();
        for id in &expired {
            cluster.remove(id);
            warn!(worker_id = %id, "worker missed heartbeats, removed from cluster");
        }
        expired
    }

    /// Endpoints of all live workers, sorted.
    pub async fn snapshot(&self) -> Vec<Endpoint> {
        let cluster = self.cluster.lock().await;
        let mut endpoints: Vec<Endpoint> = cluster.values().map(|w| w.endpoint.clone()).collect();
        endpoints.sort();
        endpoints.dedup();
        endpoints
    }

    pub async fn len(&self) -> usize {
        self.cluster.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cluster.lock().await.is_empty()
    }

    /// A planning context over the current snapshot.
    pub async fn planning_context(&self, foreman: Endpoint) -> PlanningContext {
        PlanningContext::new(foreman, self.snapshot().await)
    }

    /// Prunes the registry every `prune_interval_secs`, dropping workers
    /// silent for longer than `worker_timeout_secs`, until the task is
    /// aborted. The first pass runs immediately.
    pub fn spawn_pruner(&self, settings: &PlannerSettings) -> JoinHandle<()> {
        let membership = self.clone();
        let interval = Duration::from_secs(settings.prune_interval_secs.max(1));
        let timeout_secs = settings.worker_timeout_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = membership.prune(timeout_secs).await;
                if !removed.is_empty() {
                    info!(removed = removed.len(), "pruned cluster");
                }
            }
        })
    }
}
