//! Bounded executor over a [`BuildGraph`]

use crate::graph::{BuildGraph, Node};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use testbench_core::{Error, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

/// Runs ready nodes concurrently, at most `jobs` at a time.
///
/// After the first failure no further node is started. Nodes already running
/// are allowed to finish, and every failure seen along the way is reported.
#[derive(Debug, Clone)]
pub struct Scheduler {
    jobs: usize,
}

impl Scheduler {
    pub fn new(jobs: usize) -> Self {
        Self { jobs: jobs.max(1) }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub async fn run<F, Fut>(&self, graph: &BuildGraph, work: F) -> Result<()>
    where
        F: Fn(Node) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        // Also rejects cycles before anything starts
        let order = graph.topological_order()?;

        let mut pending: HashMap<&Node, usize> = HashMap::with_capacity(order.len());
        let mut ready = VecDeque::new();
        for node in graph.nodes() {
            let count = graph.dependencies(node)?.len();
            if count == 0 {
                ready.push_back(node.clone());
            }
            pending.insert(node, count);
        }

        let permits = Arc::new(Semaphore::new(self.jobs));
        let mut in_flight = JoinSet::new();
        let mut failures = Vec::new();
        let mut completed = 0usize;

        loop {
            if failures.is_empty() {
                while !ready.is_empty() {
                    let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                        break;
                    };
                    let Some(node) = ready.pop_front() else {
                        break;
                    };
                    tracing::debug!(node = %node, "starting");
                    let span = tracing::info_span!("node", node = %node);
                    let task = work(node.clone());
                    in_flight.spawn(
                        async move {
                            let outcome = task.await;
                            drop(permit);
                            (node, outcome)
                        }
                        .instrument(span),
                    );
                }
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            match joined {
                Ok((node, Ok(()))) => {
                    completed += 1;
                    tracing::debug!(node = %node, "finished");
                    for dependent in graph.dependents(&node)? {
                        if let Some(count) = pending.get_mut(dependent) {
                            *count -= 1;
                            if *count == 0 {
                                ready.push_back(dependent.clone());
                            }
                        }
                    }
                }
                Ok((node, Err(e))) => {
                    tracing::error!(node = %node, error = %e, "node failed");
                    failures.push(e);
                }
                Err(e) => {
                    failures.push(Error::graph(format!("node task did not complete: {e}")));
                }
            }
        }

        if let Some(err) = Error::from_failures(failures) {
            return Err(err);
        }
        if completed != graph.len() {
            return Err(Error::graph(format!(
                "only {completed} of {} nodes ran",
                graph.len()
            )));
        }
        Ok(())
    }
}
