//! Parallel plan execution
//!
//! Runs plan actions with bounded parallelism while honoring each action's
//! ordering constraints. Every successful action commits its state record
//! before it is reported complete, so an interrupted run always leaves state
//! that accounts for the work actually done. A failed action blocks its
//! transitive dependents; independent subgraphs keep going.

pub mod report;

pub use report::{ActionOutcome, ApplyReport};

use crate::error::EngineResult;
use crate::expr;
use crate::graph::Address;
use crate::manifest::AttrMap;
use crate::plan::{ActionKind, Plan, PlanAction};
use crate::provider::{wait_terminal, Provider};
use crate::state::{new_record, StateStore};
use crate::traits::Output;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

enum ActionEffect {
    /// A record was committed for the address
    Committed(AttrMap),
    /// The record was removed (destroy)
    Removed,
}

type TaskResult = Result<ActionEffect, String>;

enum Dispatch {
    Spawned,
    Immediate(ActionOutcome),
}

/// Executes plans against a provider and a state store
pub struct Executor {
    provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    output: Arc<dyn Output>,
    parallelism: usize,
    cancelled: Arc<AtomicBool>,
}

impl Executor {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn StateStore>,
        output: Arc<dyn Output>,
        parallelism: usize,
    ) -> Self {
        Self {
            provider,
            store,
            output,
            parallelism: parallelism.max(1),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked before each dispatch; setting it stops new actions while
    /// in-flight ones drain to completion
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Run every action of the plan to a terminal outcome
    pub async fn execute(&self, plan: &Plan) -> EngineResult<ApplyReport> {
        let snapshot = self.store.snapshot()?;

        // Committed attributes per address, used to finalize references to
        // provider-computed values just before dispatch.
        let mut committed: BTreeMap<Address, AttrMap> = snapshot
            .iter()
            .map(|(a, r)| (a.clone(), r.attributes.clone()))
            .collect();

        let mut addresses: BTreeSet<Address> = snapshot.keys().cloned().collect();
        addresses.extend(plan.actions.iter().map(|a| a.address.clone()));

        let plan_addresses: BTreeSet<Address> =
            plan.actions.iter().map(|a| a.address.clone()).collect();

        let mut remaining: BTreeMap<Address, PlanAction> = plan
            .actions
            .iter()
            .map(|a| (a.address.clone(), a.clone()))
            .collect();

        // Ordering constraints restricted to addresses actually in the plan
        let mut deps_left: BTreeMap<Address, BTreeSet<Address>> = plan
            .actions
            .iter()
            .map(|a| {
                let deps = a
                    .after
                    .iter()
                    .filter(|d| plan_addresses.contains(d))
                    .cloned()
                    .collect();
                (a.address.clone(), deps)
            })
            .collect();

        let mut report = ApplyReport::default();
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let (tx, mut rx) = mpsc::unbounded_channel::<(Address, TaskResult)>();
        let mut in_flight = 0usize;

        loop {
            // Dispatch until nothing is ready; immediate outcomes (no-ops and
            // finalization failures) can unlock or block further actions.
            loop {
                if self.cancelled.load(Ordering::SeqCst) {
                    break;
                }
                let ready: Vec<Address> = remaining
                    .keys()
                    .filter(|a| deps_left.get(*a).is_none_or(|d| d.is_empty()))
                    .cloned()
                    .collect();
                if ready.is_empty() {
                    break;
                }

                for address in ready {
                    let Some(action) = remaining.remove(&address) else {
                        continue;
                    };
                    deps_left.remove(&address);

                    match self.dispatch(action, &committed, &addresses, &tx, &semaphore) {
                        Dispatch::Spawned => in_flight += 1,
                        Dispatch::Immediate(outcome) => complete(
                            self.output.as_ref(),
                            address,
                            outcome,
                            &mut remaining,
                            &mut deps_left,
                            &mut report,
                        ),
                    }
                }
            }

            if in_flight == 0 {
                break;
            }

            let Some((address, result)) = rx.recv().await else {
                break;
            };
            in_flight -= 1;

            let outcome = match result {
                Ok(ActionEffect::Committed(attrs)) => {
                    committed.insert(address.clone(), attrs);
                    ActionOutcome::Succeeded
                }
                Ok(ActionEffect::Removed) => {
                    committed.remove(&address);
                    ActionOutcome::Succeeded
                }
                Err(message) => ActionOutcome::Failed(message),
            };
            complete(
                self.output.as_ref(),
                address,
                outcome,
                &mut remaining,
                &mut deps_left,
                &mut report,
            );
        }

        // Whatever never got dispatched after a cancellation
        for (address, _) in remaining {
            self.output.warning(&format!("{}: skipped (cancelled)", address));
            report.record(address, ActionOutcome::Skipped);
        }

        Ok(report)
    }

    fn dispatch(
        &self,
        action: PlanAction,
        committed: &BTreeMap<Address, AttrMap>,
        addresses: &BTreeSet<Address>,
        tx: &mpsc::UnboundedSender<(Address, TaskResult)>,
        semaphore: &Arc<Semaphore>,
    ) -> Dispatch {
        if action.kind == ActionKind::NoOp {
            return Dispatch::Immediate(ActionOutcome::NoOp);
        }

        // Resolve any references to attributes committed earlier in this run
        let finalized = match &action.desired {
            Some(attrs) => {
                match expr::finalize_attributes(attrs, committed, addresses, &action.address) {
                    Ok(f) => Some(f),
                    Err(e) => return Dispatch::Immediate(ActionOutcome::Failed(e.to_string())),
                }
            }
            None => None,
        };

        self.output.dimmed(&format!(
            "{}: {}...",
            action.address,
            progress_label(action.kind)
        ));

        let provider = Arc::clone(&self.provider);
        let store = Arc::clone(&self.store);
        let semaphore = Arc::clone(semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = tx.send((
                        action.address.clone(),
                        Err("executor shut down before dispatch".to_string()),
                    ));
                    return;
                }
            };

            let result = run_action(provider.as_ref(), store.as_ref(), &action, finalized).await;
            let _ = tx.send((action.address.clone(), result));
        });

        Dispatch::Spawned
    }
}

/// Record an outcome and propagate blockage to transitive dependents
fn complete(
    output: &dyn Output,
    address: Address,
    outcome: ActionOutcome,
    remaining: &mut BTreeMap<Address, PlanAction>,
    deps_left: &mut BTreeMap<Address, BTreeSet<Address>>,
    report: &mut ApplyReport,
) {
    match &outcome {
        ActionOutcome::Succeeded => {
            output.success(&format!("{}: done", address));
            for deps in deps_left.values_mut() {
                deps.remove(&address);
            }
        }
        ActionOutcome::NoOp => {
            for deps in deps_left.values_mut() {
                deps.remove(&address);
            }
        }
        ActionOutcome::Failed(message) => {
            output.error(&format!("{}: {}", address, message));
        }
        ActionOutcome::Blocked { failed_dependency } => {
            output.warning(&format!(
                "{}: blocked by failure of {}",
                address, failed_dependency
            ));
        }
        ActionOutcome::Skipped => {}
    }

    let failed = matches!(
        outcome,
        ActionOutcome::Failed(_) | ActionOutcome::Blocked { .. }
    );
    let root = match &outcome {
        ActionOutcome::Blocked { failed_dependency } => failed_dependency.clone(),
        _ => address.clone(),
    };
    report.record(address.clone(), outcome);

    if !failed {
        return;
    }

    let dependents: Vec<Address> = remaining
        .iter()
        .filter(|(_, action)| action.after.contains(&address))
        .map(|(a, _)| a.clone())
        .collect();

    for dependent in dependents {
        remaining.remove(&dependent);
        deps_left.remove(&dependent);
        complete(
            output,
            dependent,
            ActionOutcome::Blocked {
                failed_dependency: root.clone(),
            },
            remaining,
            deps_left,
            report,
        );
    }
}

fn progress_label(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Create => "creating",
        ActionKind::Update => "updating",
        ActionKind::Destroy => "destroying",
        ActionKind::NoOp => "unchanged",
    }
}

/// Run one mutating action end to end: start the operation, wait for it,
/// commit the result to state
///
/// Mutation starts are never retried; only `wait_terminal` retries transient
/// poll failures. A failed start is terminal for the action, and the
/// idempotency token lets the operator re-apply safely.
async fn run_action(
    provider: &dyn Provider,
    store: &dyn StateStore,
    action: &PlanAction,
    finalized: Option<AttrMap>,
) -> TaskResult {
    let token = uuid::Uuid::new_v4().to_string();
    let provider_err = |e: crate::provider::ProviderError| {
        crate::error::EngineError::Provider {
            address: action.address.to_string(),
            message: e.message,
        }
        .to_string()
    };

    match action.kind {
        ActionKind::Create => {
            let attrs = finalized.ok_or_else(|| "create action without attributes".to_string())?;
            let operation = provider
                .create(&action.resource_kind, &attrs, &token)
                .await
                .map_err(provider_err)?;
            let resource = wait_terminal(provider, &operation)
                .await
                .map_err(provider_err)?
                .ok_or_else(|| "create operation returned no resource".to_string())?;

            let record = new_record(
                &action.resource_kind,
                &resource.id,
                attrs,
                resource.attributes,
                action.depends_on.clone(),
            );
            let committed = store
                .commit(&action.address, record, None)
                .map_err(|e| e.to_string())?;
            Ok(ActionEffect::Committed(committed.attributes))
        }
        ActionKind::Update => {
            let attrs = finalized.ok_or_else(|| "update action without attributes".to_string())?;
            let remote_id = action
                .remote_id
                .as_deref()
                .ok_or_else(|| "update action without a remote id".to_string())?;
            let operation = provider
                .update(remote_id, &attrs, &token)
                .await
                .map_err(provider_err)?;
            let resource = wait_terminal(provider, &operation)
                .await
                .map_err(provider_err)?
                .ok_or_else(|| "update operation returned no resource".to_string())?;

            let record = new_record(
                &action.resource_kind,
                &resource.id,
                attrs,
                resource.attributes,
                action.depends_on.clone(),
            );
            let committed = store
                .commit(&action.address, record, action.prior_version)
                .map_err(|e| e.to_string())?;
            Ok(ActionEffect::Committed(committed.attributes))
        }
        ActionKind::Destroy => {
            let remote_id = action
                .remote_id
                .as_deref()
                .ok_or_else(|| "destroy action without a remote id".to_string())?;
            let version = action
                .prior_version
                .ok_or_else(|| "destroy action without a state version".to_string())?;

            let operation = provider
                .delete(remote_id, &token)
                .await
                .map_err(provider_err)?;
            wait_terminal(provider, &operation)
                .await
                .map_err(provider_err)?;

            store
                .remove(&action.address, version)
                .map_err(|e| e.to_string())?;
            Ok(ActionEffect::Removed)
        }
        ActionKind::NoOp => Err("no-op actions are never dispatched".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Materialized, Resolver};
    use crate::graph::ResourceGraph;
    use crate::manifest::ResourceSpec;
    use crate::plan::Planner;
    use crate::provider::mock::{MockProvider, ProviderCall};
    use crate::state::{MemoryStateStore, StateRecord};
    use crate::traits::MockOutput;
    use crate::vars::VariableRegistry;
    use serde_json::json;

    fn spec(address: &str, kind: &str, attributes: serde_json::Value) -> ResourceSpec {
        ResourceSpec {
            address: address.to_string(),
            kind: kind.to_string(),
            count: None,
            depends_on: Vec::new(),
            attributes: attributes.as_object().cloned().unwrap(),
        }
    }

    fn plan_for(
        graph: &ResourceGraph,
        snapshot: &BTreeMap<Address, StateRecord>,
    ) -> crate::plan::Plan {
        let vars = VariableRegistry::empty();
        let prior: BTreeMap<Address, AttrMap> = snapshot
            .iter()
            .map(|(a, r)| (a.clone(), r.attributes.clone()))
            .collect();
        let materialized: BTreeMap<Address, Materialized> =
            Resolver::materialize(&vars, graph, &prior).unwrap();
        Planner::plan(graph, &materialized, snapshot).unwrap()
    }

    fn executor(provider: &Arc<MockProvider>, store: &Arc<MemoryStateStore>) -> Executor {
        Executor::new(
            Arc::clone(provider) as Arc<dyn Provider>,
            Arc::clone(store) as Arc<dyn StateStore>,
            Arc::new(MockOutput::new()),
            4,
        )
    }

    #[tokio::test]
    async fn test_apply_commits_records_and_finalizes_references() {
        let graph = ResourceGraph::build(&[
            spec("network.vpc", "network", json!({"cidr": "10.0.0.0/16"})),
            spec(
                "compute.web",
                "container",
                json!({"network_id": "${network.vpc.id}"}),
            ),
        ])
        .unwrap();

        let store = Arc::new(MemoryStateStore::new());
        let plan = plan_for(&graph, &store.snapshot().unwrap());
        let provider = Arc::new(MockProvider::new());
        let exec = executor(&provider, &store);

        let report = exec.execute(&plan).await.unwrap();
        assert!(!report.is_partial());
        assert_eq!(report.succeeded(), 2);

        let snapshot = store.snapshot().unwrap();
        let vpc = &snapshot[&Address::from("network.vpc")];
        let web = &snapshot[&Address::from("compute.web")];

        // The deferred reference was substituted from the committed record
        assert_eq!(web.inputs["network_id"], json!(vpc.remote_id));
        assert_eq!(vpc.version, 1);
        assert!(provider.resource(&vpc.remote_id).is_some());
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents_but_not_independents() {
        let graph = ResourceGraph::build(&[
            spec("network.vpc", "network", json!({})),
            spec(
                "compute.web",
                "container",
                json!({"network_id": "${network.vpc.id}"}),
            ),
            spec("bucket.logs", "bucket", json!({"name": "logs"})),
        ])
        .unwrap();

        let store = Arc::new(MemoryStateStore::new());
        let plan = plan_for(&graph, &store.snapshot().unwrap());
        let provider = Arc::new(MockProvider::new().fail_kind("network", "quota exceeded"));
        let exec = executor(&provider, &store);

        let report = exec.execute(&plan).await.unwrap();
        assert!(report.is_partial());

        assert!(matches!(
            report.outcome(&Address::from("network.vpc")),
            Some(ActionOutcome::Failed(msg)) if msg.contains("quota exceeded")
        ));
        assert_eq!(
            report.outcome(&Address::from("compute.web")),
            Some(&ActionOutcome::Blocked {
                failed_dependency: Address::from("network.vpc")
            })
        );
        assert_eq!(
            report.outcome(&Address::from("bucket.logs")),
            Some(&ActionOutcome::Succeeded)
        );

        // The independent success was still committed
        let snapshot = store.snapshot().unwrap();
        assert!(snapshot.contains_key(&Address::from("bucket.logs")));
        assert!(!snapshot.contains_key(&Address::from("network.vpc")));
    }

    #[tokio::test]
    async fn test_blockage_propagates_transitively() {
        let graph = ResourceGraph::build(&[
            spec("a", "network", json!({})),
            spec("b", "container", json!({"net": "${a.id}"})),
            spec("c", "container", json!({"peer": "${b.id}"})),
        ])
        .unwrap();

        let store = Arc::new(MemoryStateStore::new());
        let plan = plan_for(&graph, &store.snapshot().unwrap());
        let provider = Arc::new(MockProvider::new().fail_kind("network", "boom"));
        let exec = executor(&provider, &store);

        let report = exec.execute(&plan).await.unwrap();
        assert_eq!(
            report.outcome(&Address::from("c")),
            Some(&ActionOutcome::Blocked {
                failed_dependency: Address::from("a")
            })
        );
    }

    #[tokio::test]
    async fn test_cancellation_skips_pending_actions() {
        let graph = ResourceGraph::build(&[
            spec("a", "network", json!({})),
            spec("b", "bucket", json!({})),
        ])
        .unwrap();

        let store = Arc::new(MemoryStateStore::new());
        let plan = plan_for(&graph, &store.snapshot().unwrap());
        let provider = Arc::new(MockProvider::new());
        let exec = executor(&provider, &store);

        exec.cancellation_flag().store(true, Ordering::SeqCst);
        let report = exec.execute(&plan).await.unwrap();

        assert_eq!(report.skipped(), 2);
        assert!(report.is_partial());
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_removes_state_records() {
        let graph = ResourceGraph::build(&[spec("a", "network", json!({}))]).unwrap();

        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(MockProvider::new());

        let create_plan = plan_for(&graph, &store.snapshot().unwrap());
        let exec = executor(&provider, &store);
        exec.execute(&create_plan).await.unwrap();
        assert_eq!(store.snapshot().unwrap().len(), 1);

        let destroy_plan = Planner::destroy_all(&store.snapshot().unwrap());
        let report = exec.execute(&destroy_plan).await.unwrap();

        assert!(!report.is_partial());
        assert!(store.snapshot().unwrap().is_empty());
        assert_eq!(provider.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_start_failure_is_terminal_for_the_action() {
        let graph = ResourceGraph::build(&[spec("a", "network", json!({}))]).unwrap();

        let store = Arc::new(MemoryStateStore::new());
        let plan = plan_for(&graph, &store.snapshot().unwrap());
        let provider = Arc::new(MockProvider::new().transient_failures("network", 1));
        let exec = executor(&provider, &store);

        let report = exec.execute(&plan).await.unwrap();
        assert!(report.is_partial());
        assert!(matches!(
            report.outcome(&Address::from("a")),
            Some(ActionOutcome::Failed(_))
        ));

        // The start was not re-attempted and nothing was committed
        let creates = provider
            .calls()
            .iter()
            .filter(|c| matches!(c, ProviderCall::Create { .. }))
            .count();
        assert_eq!(creates, 1);
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operation_failing_at_poll_time_fails_the_action() {
        let graph = ResourceGraph::build(&[spec("a", "network", json!({}))]).unwrap();

        let store = Arc::new(MemoryStateStore::new());
        let plan = plan_for(&graph, &store.snapshot().unwrap());
        let provider = Arc::new(MockProvider::new().fail_operation("network", "disk full"));
        let exec = executor(&provider, &store);

        let report = exec.execute(&plan).await.unwrap();
        assert!(report.is_partial());
        assert!(matches!(
            report.outcome(&Address::from("a")),
            Some(ActionOutcome::Failed(msg)) if msg.contains("disk full")
        ));
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_noop_actions_make_no_provider_calls() {
        let graph = ResourceGraph::build(&[spec("a", "network", json!({"cidr": "10.0.0.0/16"}))])
            .unwrap();

        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(MockProvider::new());

        let first = plan_for(&graph, &store.snapshot().unwrap());
        let exec = executor(&provider, &store);
        exec.execute(&first).await.unwrap();

        let second = plan_for(&graph, &store.snapshot().unwrap());
        assert!(!second.summary.has_changes());

        let provider = Arc::new(MockProvider::new());
        let exec = executor(&provider, &store);
        let report = exec.execute(&second).await.unwrap();

        assert_eq!(report.unchanged(), 1);
        assert!(!report.is_partial());
        assert!(provider.calls().is_empty());
    }
}
