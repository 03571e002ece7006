//! Whole-run orchestration
//!
//! The orchestrator discovers environments, builds the graph for the
//! requested verb and walks it with the [`Scheduler`]. It owns the output
//! directory for the duration of a run and makes sure no lease outlives the
//! run that claimed it, unless asked to keep them.

use crate::driver::ExecutionDriver;
use crate::graph::{BuildGraph, Node, Stage};
use crate::hypervisor::{Hypervisor, Qemu};
use crate::image_access::{DissectMount, ImageAccess};
use crate::scheduler::Scheduler;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use testbench_cache::{ImageArtifact, ImageBuilder, ImageRealizer, ProcessImageBuilder};
use testbench_config::{discover, EnvironmentSet, TestbenchConfig};
use testbench_core::{EnvironmentName, Error, Result};
use testbench_lease::{ClusterClaim, LeaseBroker, LeaseManager, ProcessLeaseBroker};
use testbench_report::{AggregateReport, ExecutionResult};
use testbench_utils::atomic_file::remove_if_exists;
use testbench_utils::tracing::run_span;
use testbench_utils::RunLock;
use tokio::sync::watch;
use tracing::Instrument;

/// The external systems a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub builder: Arc<dyn ImageBuilder>,
    pub broker: Arc<dyn LeaseBroker>,
    pub access: Arc<dyn ImageAccess>,
    pub hypervisor: Arc<dyn Hypervisor>,
}

impl Collaborators {
    /// The real tools named by `config`
    pub fn from_config(config: &Arc<TestbenchConfig>) -> Self {
        Self {
            builder: Arc::new(ProcessImageBuilder::new(config.builder.clone())),
            broker: Arc::new(ProcessLeaseBroker::from_config(config)),
            access: Arc::new(DissectMount::new(config.mount_tool.clone())),
            hypervisor: Arc::new(Qemu::new(Arc::clone(config))),
        }
    }
}

pub struct Orchestrator {
    config: Arc<TestbenchConfig>,
    collaborators: Collaborators,
    interrupt: Option<watch::Receiver<bool>>,
}

impl Orchestrator {
    pub fn new(config: Arc<TestbenchConfig>, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            interrupt: None,
        }
    }

    /// Stop the run once `true` is sent on the channel
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn config(&self) -> &TestbenchConfig {
        &self.config
    }

    fn environments(&self, selected: &[String]) -> Result<EnvironmentSet> {
        discover(&self.config.descriptor_dir)?.select(selected)
    }

    fn lease_manager(&self) -> LeaseManager {
        LeaseManager::new(Arc::clone(&self.config), Arc::clone(&self.collaborators.broker))
    }

    /// Build, lease and execute every selected environment, then aggregate.
    ///
    /// `report.json` is only written when every environment produced a
    /// result. An empty `selected` means all discovered environments.
    pub async fn run(&self, selected: &[String], command: &[String]) -> Result<AggregateReport> {
        if command.is_empty() {
            return Err(Error::MissingCommand);
        }
        let environments = self.environments(selected)?;
        let _lock = RunLock::try_acquire(&self.config.output_dir)?;
        remove_if_exists(&self.config.report_path())?;

        let graph = BuildGraph::for_run(environments.names())?;
        let context = Arc::new(RunContext::new(self, environments, command.to_vec()));

        let span = run_span(context.environments.len(), self.config.jobs);
        let outcome = self.drive(&graph, &context).instrument(span).await;

        if let Err(e) = outcome {
            if self.config.keep_claims {
                tracing::info!("keeping claims of the failed run");
            } else {
                context.release_all().await;
            }
            return Err(e);
        }

        context.take_report().ok_or_else(|| Error::graph("the report node never ran"))
    }

    /// Realize the images of the selected environments without running them
    pub async fn prepare(&self, selected: &[String]) -> Result<Vec<ImageArtifact>> {
        let environments = self.environments(selected)?;
        let _lock = RunLock::try_acquire(&self.config.output_dir)?;

        let graph = BuildGraph::for_prepare(environments.names());
        let context = Arc::new(RunContext::new(self, environments, Vec::new()));
        let span = run_span(context.environments.len(), self.config.jobs);
        self.drive(&graph, &context).instrument(span).await?;

        let images = lock(&context.images);
        Ok(context
            .environments
            .names()
            .filter_map(|name| images.get(name).cloned())
            .collect())
    }

    /// Release the leases of every discovered environment and any claim
    /// left in the output directory by an environment that no longer exists.
    ///
    /// Returns the environments whose claim was released.
    pub async fn delete_claims(&self) -> Result<Vec<String>> {
        let mut targets: Vec<String> = match discover(&self.config.descriptor_dir) {
            Ok(environments) => environments.names().map(|n| n.to_string()).collect(),
            Err(Error::NoEnvironments { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };
        let _lock = RunLock::try_acquire(&self.config.output_dir)?;
        let leases = self.lease_manager();
        for orphan in leases.claimed_environments()? {
            if !targets.contains(&orphan) {
                targets.push(orphan);
            }
        }

        let mut released = Vec::new();
        let mut failures = Vec::new();
        for environment in targets {
            match leases.release(&environment).await {
                Ok(true) => released.push(environment),
                Ok(false) => {}
                Err(e) => failures.push(Error::lease_with_source(
                    &environment,
                    "failed to release claim",
                    e,
                )),
            }
        }
        match Error::from_failures(failures) {
            Some(err) => Err(err),
            None => Ok(released),
        }
    }

    /// Re-aggregate the stored results of the selected environments
    pub fn report(&self, selected: &[String]) -> Result<AggregateReport> {
        let environments = self.environments(selected)?;
        let report = AggregateReport::collect(
            environments
                .names()
                .map(|name| (name.as_str(), self.config.result_path(name))),
        )?;
        report.write(&self.config.report_path())?;
        Ok(report)
    }

    async fn drive(&self, graph: &BuildGraph, context: &Arc<RunContext>) -> Result<()> {
        let scheduler = Scheduler::new(self.config.jobs);
        let shared = Arc::clone(context);
        let run = scheduler.run(graph, move |node| {
            let context = Arc::clone(&shared);
            async move { context.perform(node).await }
        });

        let Some(mut interrupt) = self.interrupt.clone() else {
            return run.await;
        };
        tokio::select! {
            outcome = run => outcome,
            () = interrupted(&mut interrupt) => {
                tracing::warn!("interrupted, abandoning in-flight environments");
                Err(Error::Interrupted)
            }
        }
    }
}

/// Resolves once `true` was sent; never if the sender goes away silently
async fn interrupted(receiver: &mut watch::Receiver<bool>) {
    if receiver.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared by the nodes of one run
struct RunContext {
    config: Arc<TestbenchConfig>,
    environments: EnvironmentSet,
    command: Vec<String>,
    realizer: ImageRealizer,
    leases: LeaseManager,
    driver: ExecutionDriver,
    images: Mutex<HashMap<EnvironmentName, ImageArtifact>>,
    // `None` while the claim is being made; the claim file may already exist
    claims: Mutex<IndexMap<EnvironmentName, Option<ClusterClaim>>>,
    results: Mutex<HashMap<EnvironmentName, ExecutionResult>>,
    report: Mutex<Option<AggregateReport>>,
}

impl RunContext {
    fn new(orchestrator: &Orchestrator, environments: EnvironmentSet, command: Vec<String>) -> Self {
        let config = Arc::clone(&orchestrator.config);
        let collaborators = &orchestrator.collaborators;
        Self {
            realizer: ImageRealizer::new(Arc::clone(&config), Arc::clone(&collaborators.builder)),
            leases: orchestrator.lease_manager(),
            driver: ExecutionDriver::new(
                Arc::clone(&config),
                Arc::clone(&collaborators.access),
                Arc::clone(&collaborators.hypervisor),
            ),
            config,
            environments,
            command,
            images: Mutex::new(HashMap::new()),
            claims: Mutex::new(IndexMap::new()),
            results: Mutex::new(HashMap::new()),
            report: Mutex::new(None),
        }
    }

    async fn perform(&self, node: Node) -> Result<()> {
        match node {
            Node::Artifact { environment, stage } => match stage {
                Stage::Image => self.realize(&environment).await,
                Stage::Lease => self.claim(&environment).await,
                Stage::Execute => self.execute(&environment).await,
            },
            Node::Report => self.aggregate(),
        }
    }

    async fn realize(&self, environment: &EnvironmentName) -> Result<()> {
        let spec = self
            .environments
            .get(environment)
            .ok_or_else(|| Error::graph(format!("unknown environment '{environment}'")))?;
        let artifact = self.realizer.realize(spec).await?;
        lock(&self.images).insert(environment.clone(), artifact);
        Ok(())
    }

    async fn claim(&self, environment: &EnvironmentName) -> Result<()> {
        lock(&self.claims).insert(environment.clone(), None);
        let claim = self.leases.claim(environment).await?;
        lock(&self.claims).insert(environment.clone(), Some(claim));
        Ok(())
    }

    async fn execute(&self, environment: &EnvironmentName) -> Result<()> {
        let image = lock(&self.images).get(environment).cloned();
        let claim = lock(&self.claims).get(environment).cloned().flatten();
        let (Some(image), Some(claim)) = (image, claim) else {
            return Err(Error::graph(format!(
                "'{environment}' executed before its image and lease were ready"
            )));
        };

        let outcome = self.driver.execute(&image, &claim, &self.command).await;
        if !self.config.keep_claims {
            self.release(environment).await;
        }
        lock(&self.results).insert(environment.clone(), outcome?);
        Ok(())
    }

    fn aggregate(&self) -> Result<()> {
        let results = {
            let mut stored = lock(&self.results);
            self.environments
                .names()
                .map(|name| {
                    stored.remove(name).ok_or_else(|| {
                        Error::graph(format!("no result for '{name}' at aggregation"))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };
        let report = AggregateReport::aggregate(&results);
        report.write(&self.config.report_path())?;
        tracing::info!(
            environments = report.entries.len(),
            exit_code = report.exit_code(),
            "wrote report"
        );
        *lock(&self.report) = Some(report);
        Ok(())
    }

    async fn release(&self, environment: &EnvironmentName) {
        lock(&self.claims).shift_remove(environment);
        if let Err(e) = self.leases.release(environment).await {
            tracing::warn!(environment = %environment, error = %e, "could not release claim");
        }
    }

    /// Release every claim this run still holds
    async fn release_all(&self) {
        let outstanding: Vec<EnvironmentName> = lock(&self.claims).keys().cloned().collect();
        for environment in outstanding {
            self.release(&environment).await;
        }
    }

    fn take_report(&self) -> Option<AggregateReport> {
        lock(&self.report).take()
    }
}
