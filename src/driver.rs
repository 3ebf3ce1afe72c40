//! Orchestration driver
//!
//! Sequences a run through its phases: load and validate the stack, diff it
//! into a plan, execute, aggregate outputs. Commands stay thin wrappers; the
//! driver owns everything that has to happen in order. All inputs come from
//! the explicit `RunConfig` so a run never depends on ambient process state.

use crate::context::Context;
use crate::error::{EngineError, EngineResult};
use crate::executor::{ActionOutcome, ApplyReport, Executor};
use crate::expr::{Materialized, Resolver};
use crate::graph::{Address, ResourceGraph};
use crate::manifest::{AttrMap, StackManifest};
use crate::outputs::{self, OutputValue};
use crate::plan::{Plan, Planner};
use crate::provider::{HttpProvider, Provider};
use crate::state::{FileStateStore, StateRecord, StateStore};
use crate::vars::{self, VariableRegistry};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Furthest point a run has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Uninitialized,
    Validated,
    Planned,
    Applied,
    Destroyed,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Validated => "validated",
            Phase::Planned => "planned",
            Phase::Applied => "applied",
            Phase::Destroyed => "destroyed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything a run needs, resolved up front
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub manifest_path: PathBuf,
    pub state_path: PathBuf,
    pub var_file: Option<PathBuf>,
    pub endpoint: String,
    pub credentials: Option<String>,
    pub parallelism: usize,
}

/// A loaded, validated stack: manifest plus resolved variables and graph
pub struct LoadedStack {
    pub manifest: StackManifest,
    pub vars: VariableRegistry,
    pub graph: ResourceGraph,
}

pub struct Driver {
    ctx: Context,
    config: RunConfig,
    phase: Phase,
}

impl Driver {
    pub fn new(ctx: Context, config: RunConfig) -> Self {
        Self {
            ctx,
            config,
            phase: Phase::Uninitialized,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// File-backed state store at the configured path
    pub fn state_store(&self) -> Arc<FileStateStore> {
        Arc::new(FileStateStore::new(
            Arc::clone(&self.ctx.fs),
            self.config.state_path.clone(),
        ))
    }

    /// Check run preconditions: reachable state store and credentials
    pub fn initialize(&self, store: &dyn StateStore) -> EngineResult<()> {
        store.ping()?;
        self.ensure_credentials()?;
        Ok(())
    }

    /// Credentials for the remote API, or a precondition failure
    pub fn ensure_credentials(&self) -> EngineResult<String> {
        self.config.credentials.clone().ok_or_else(|| {
            EngineError::Precondition(
                "no API credentials configured (set LATTICE_API_TOKEN)".to_string(),
            )
        })
    }

    /// Build the HTTP provider for the configured endpoint
    pub fn provider(&self) -> Result<Arc<dyn Provider>> {
        let token = self.ensure_credentials()?;
        let provider = HttpProvider::new(&self.config.endpoint, &token)?;
        Ok(Arc::new(provider))
    }

    /// Load the manifest, resolve variables, build and materialize the graph
    ///
    /// Pure validation: no state or remote access. Any error here is fixable
    /// by editing the manifest or the supplied variable values.
    pub fn validate(&mut self) -> Result<LoadedStack> {
        let manifest = StackManifest::from_file(self.ctx.fs.as_ref(), &self.config.manifest_path)?;

        let overrides = vars::collect_overrides(
            self.ctx.fs.as_ref(),
            self.config.var_file.as_deref(),
            std::env::vars(),
        )?;
        let vars = VariableRegistry::resolve(&manifest.spec.variables, &overrides)?;

        let graph = ResourceGraph::build(&manifest.spec.resources)?;

        // Materialize against empty prior state to surface expression errors
        // early; the plan phase materializes again with real state.
        let prior = BTreeMap::new();
        Resolver::materialize(&vars, &graph, &prior)?;

        self.phase = self.phase.max(Phase::Validated);
        Ok(LoadedStack {
            manifest,
            vars,
            graph,
        })
    }

    /// Validate, then diff the materialized graph against recorded state
    pub fn plan(&mut self, store: &dyn StateStore) -> Result<(LoadedStack, Plan)> {
        let stack = self.validate()?;
        let snapshot = store.snapshot()?;

        let prior = committed_attributes(&snapshot);
        let materialized: BTreeMap<Address, Materialized> =
            Resolver::materialize(&stack.vars, &stack.graph, &prior)?;

        let plan = Planner::plan(&stack.graph, &materialized, &snapshot)?;
        self.phase = self.phase.max(Phase::Planned);
        Ok((stack, plan))
    }

    /// Build the all-destroy plan from recorded state alone
    pub fn destroy_plan(&mut self, store: &dyn StateStore) -> Result<Plan> {
        let snapshot = store.snapshot()?;
        Ok(Planner::destroy_all(&snapshot))
    }

    /// Execute a plan; the returned executor flag can be wired to ctrlc
    pub fn executor(&self, provider: Arc<dyn Provider>, store: Arc<dyn StateStore>) -> Executor {
        Executor::new(
            provider,
            store,
            Arc::clone(&self.ctx.output),
            self.config.parallelism,
        )
    }

    /// Run a plan to completion and advance the phase
    pub async fn execute(
        &mut self,
        executor: &Executor,
        plan: &Plan,
        destroying: bool,
    ) -> EngineResult<ApplyReport> {
        let report = executor.execute(plan).await?;
        self.phase = self.phase.max(if destroying {
            Phase::Destroyed
        } else {
            Phase::Applied
        });
        Ok(report)
    }

    /// Compare recorded state against remote reality; report-only
    ///
    /// Returns one warning per drifted address. Remote reads that fail are
    /// reported as warnings too rather than failing the plan.
    pub async fn refresh(
        &self,
        provider: &dyn Provider,
        store: &dyn StateStore,
    ) -> EngineResult<Vec<String>> {
        let snapshot = store.snapshot()?;
        let mut warnings = Vec::new();

        for (address, record) in &snapshot {
            match provider.read(&record.remote_id).await {
                Ok(None) => {
                    warnings.push(
                        EngineError::Drift {
                            address: address.to_string(),
                            message: format!(
                                "recorded resource '{}' no longer exists remotely",
                                record.remote_id
                            ),
                        }
                        .to_string(),
                    );
                }
                Ok(Some(remote)) => {
                    for (key, applied) in &record.inputs {
                        match remote.attributes.get(key) {
                            Some(actual) if actual == applied => {}
                            Some(actual) => warnings.push(
                                EngineError::Drift {
                                    address: address.to_string(),
                                    message: format!(
                                        "attribute '{}' is {} remotely, {} in state",
                                        key,
                                        actual,
                                        applied
                                    ),
                                }
                                .to_string(),
                            ),
                            None => warnings.push(
                                EngineError::Drift {
                                    address: address.to_string(),
                                    message: format!("attribute '{}' is unset remotely", key),
                                }
                                .to_string(),
                            ),
                        }
                    }
                }
                Err(e) => {
                    warnings.push(format!(
                        "Could not refresh '{}': {}",
                        address, e.message
                    ));
                }
            }
        }

        Ok(warnings)
    }

    /// Aggregate declared outputs against recorded state
    ///
    /// `stale_addresses` come from the last run's report (failed, blocked or
    /// skipped actions); pass an empty set when reading outputs cold.
    pub fn outputs(
        &self,
        stack: &LoadedStack,
        store: &dyn StateStore,
        stale_addresses: &BTreeSet<Address>,
    ) -> EngineResult<BTreeMap<String, OutputValue>> {
        let snapshot = store.snapshot()?;
        let committed = committed_attributes(&snapshot);

        let mut addresses = stack.graph.addresses();
        addresses.extend(snapshot.keys().cloned());

        outputs::aggregate(
            &stack.manifest.spec.outputs,
            &stack.vars,
            &committed,
            &addresses,
            stale_addresses,
        )
    }
}

/// Addresses whose last action did not reach terminal success
pub fn stale_addresses(report: &ApplyReport) -> BTreeSet<Address> {
    report
        .outcomes
        .iter()
        .filter(|(_, outcome)| {
            !matches!(outcome, ActionOutcome::Succeeded | ActionOutcome::NoOp)
        })
        .map(|(address, _)| address.clone())
        .collect()
}

fn committed_attributes(snapshot: &BTreeMap<Address, StateRecord>) -> BTreeMap<Address, AttrMap> {
    snapshot
        .iter()
        .map(|(a, r)| (a.clone(), r.attributes.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::starter_manifest;
    use crate::traits::{FileSystem, MockFileSystem, MockOutput, MockUserInput};
    use std::path::Path;

    fn test_config() -> RunConfig {
        RunConfig {
            manifest_path: PathBuf::from("/stack/lattice.yaml"),
            state_path: PathBuf::from("/stack/lattice.state.json"),
            var_file: None,
            endpoint: "http://localhost:8080".to_string(),
            credentials: Some("test-token".to_string()),
            parallelism: 4,
        }
    }

    fn test_driver(fs: Arc<MockFileSystem>, config: RunConfig) -> Driver {
        let ctx = Context::test_with(
            fs,
            Arc::new(MockUserInput::new()),
            Arc::new(MockOutput::new()),
        );
        Driver::new(ctx, config)
    }

    #[test]
    fn test_initialize_requires_credentials() {
        let fs = Arc::new(MockFileSystem::new());
        let mut config = test_config();
        config.credentials = None;

        let driver = test_driver(Arc::clone(&fs), config);
        let store = driver.state_store();
        let err = driver.initialize(store.as_ref()).unwrap_err();

        assert!(matches!(err, EngineError::Precondition(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_initialize_fails_on_corrupt_state() {
        let fs = Arc::new(MockFileSystem::new());
        fs.write(Path::new("/stack/lattice.state.json"), "{ nope")
            .unwrap();

        let driver = test_driver(Arc::clone(&fs), test_config());
        let store = driver.state_store();
        let err = driver.initialize(store.as_ref()).unwrap_err();

        assert!(matches!(err, EngineError::StateUnreachable(_)));
    }

    #[test]
    fn test_validate_loads_starter_stack() {
        let fs = Arc::new(MockFileSystem::new());
        fs.write(Path::new("/stack/lattice.yaml"), &starter_manifest("demo"))
            .unwrap();

        let mut driver = test_driver(Arc::clone(&fs), test_config());
        let stack = driver.validate().unwrap();

        assert_eq!(stack.graph.len(), 2);
        assert_eq!(driver.phase(), Phase::Validated);
    }

    #[test]
    fn test_plan_on_fresh_state_creates_everything_enabled() {
        let fs = Arc::new(MockFileSystem::new());
        fs.write(Path::new("/stack/lattice.yaml"), &starter_manifest("demo"))
            .unwrap();

        let mut driver = test_driver(Arc::clone(&fs), test_config());
        let store = driver.state_store();
        let (_, plan) = driver.plan(store.as_ref()).unwrap();

        // The gateway is count-gated off by default; only the network plans
        assert_eq!(plan.summary.to_add, 1);
        assert_eq!(plan.summary.to_destroy, 0);
        assert_eq!(driver.phase(), Phase::Planned);
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(Phase::Uninitialized.to_string(), "uninitialized");
        assert_eq!(Phase::Planned.to_string(), "planned");
        assert_eq!(Phase::Applied.to_string(), "applied");
        assert!(Phase::Validated < Phase::Planned);
    }

    #[test]
    fn test_stale_addresses_from_report() {
        let mut report = ApplyReport::default();
        report.record(Address::from("a"), ActionOutcome::Succeeded);
        report.record(
            Address::from("b"),
            ActionOutcome::Failed("boom".to_string()),
        );
        report.record(Address::from("c"), ActionOutcome::Skipped);

        let stale = stale_addresses(&report);
        assert!(!stale.contains(&Address::from("a")));
        assert!(stale.contains(&Address::from("b")));
        assert!(stale.contains(&Address::from("c")));
    }
}
