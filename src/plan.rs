//! Plan types and the planner
//!
//! The planner compares materialized definitions against the state store
//! snapshot and emits an ordered list of actions. Create/Update actions
//! follow the graph's topological order; Destroy actions run in the reverse
//! topological order of the prior state's dependency graph, because a
//! dependency cannot be removed while something still references it.

use crate::error::EngineResult;
use crate::expr::Materialized;
use crate::graph::{Address, ResourceGraph};
use crate::manifest::AttrMap;
use crate::state::StateRecord;
use crate::traits::FileSystem;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// The kind of change planned for a resource address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    /// Resource will be created
    Create,
    /// Resource will be updated in-place
    Update,
    /// Resource will be destroyed
    Destroy,
    /// No changes
    NoOp,
}

impl ActionKind {
    /// Symbol used to represent this action in plan output
    pub fn symbol(&self) -> &'static str {
        match self {
            ActionKind::Create => "+",
            ActionKind::Update => "~",
            ActionKind::Destroy => "-",
            ActionKind::NoOp => " ",
        }
    }

    /// Human-readable label for this action
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Create => "will be created",
            ActionKind::Update => "will be updated",
            ActionKind::Destroy => "will be destroyed",
            ActionKind::NoOp => "no changes",
        }
    }

    /// RGB color tuple for this action
    pub fn color(&self) -> (u8, u8, u8) {
        match self {
            ActionKind::Create => (152, 225, 152),  // Pastel mint green
            ActionKind::Update => (255, 230, 160),  // Pastel cream/yellow
            ActionKind::Destroy => (255, 160, 160), // Pastel coral
            ActionKind::NoOp => (160, 160, 160),    // Grey
        }
    }
}

/// One planned action for one resource address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAction {
    pub address: Address,
    pub kind: ActionKind,

    /// Provider resource kind
    pub resource_kind: String,

    /// Materialized attributes to apply (None for Destroy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<AttrMap>,

    /// Last-applied attributes from state (None for Create)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<AttrMap>,

    /// State version token observed at plan time (CAS expectation for apply)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_version: Option<u64>,

    /// Remote identifier from state (for Update/Destroy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,

    /// Graph dependencies at plan time, persisted into state on success
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<Address>,

    /// Actions that must reach terminal success before this one starts.
    /// Forward dependencies for Create/Update, dependents for Destroy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<Address>,
}

/// Count summary for a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub to_add: usize,
    pub to_change: usize,
    pub to_destroy: usize,
    pub unchanged: usize,
}

impl PlanSummary {
    pub fn has_changes(&self) -> bool {
        self.to_add > 0 || self.to_change > 0 || self.to_destroy > 0
    }

    pub fn total_changes(&self) -> usize {
        self.to_add + self.to_change + self.to_destroy
    }
}

/// An ordered, diffed set of actions reconciling desired graph with state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<PlanAction>,
    pub summary: PlanSummary,
}

impl Plan {
    fn from_actions(actions: Vec<PlanAction>) -> Self {
        let mut summary = PlanSummary::default();
        for action in &actions {
            match action.kind {
                ActionKind::Create => summary.to_add += 1,
                ActionKind::Update => summary.to_change += 1,
                ActionKind::Destroy => summary.to_destroy += 1,
                ActionKind::NoOp => summary.unchanged += 1,
            }
        }
        Self { actions, summary }
    }

    /// Look up the planned action for an address
    pub fn action(&self, address: &Address) -> Option<&PlanAction> {
        self.actions.iter().find(|a| &a.address == address)
    }

    /// Save the plan for a later `apply --plan`
    pub fn to_file(&self, fs: &dyn FileSystem, path: &Path) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize plan")?;
        fs.write(path, &contents)
            .with_context(|| format!("Failed to write plan file: {:?}", path))
    }

    /// Load a previously saved plan
    pub fn from_file(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let contents = fs
            .read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {:?}", path))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse plan file: {:?}", path))
    }
}

/// Builds plans by diffing materialized definitions against state
pub struct Planner;

impl Planner {
    /// Diff the materialized graph against the state snapshot
    pub fn plan(
        graph: &ResourceGraph,
        materialized: &BTreeMap<Address, Materialized>,
        snapshot: &BTreeMap<Address, StateRecord>,
    ) -> EngineResult<Plan> {
        let mut actions = Vec::new();

        // Addresses that are gone from the desired graph (removed definition
        // or count resolved to 0) but still recorded in state.
        let destroy_set: BTreeSet<Address> = snapshot
            .keys()
            .filter(|addr| {
                !matches!(materialized.get(addr), Some(Materialized::Present(_)))
            })
            .cloned()
            .collect();

        actions.extend(destroy_actions(snapshot, &destroy_set));

        // Present nodes, in dependency order.
        let changing: BTreeSet<Address> = materialized
            .iter()
            .filter_map(|(addr, m)| match m {
                Materialized::Present(_) => Some(addr.clone()),
                Materialized::Absent => None,
            })
            .collect();

        for address in graph.topo_order() {
            let Some(Materialized::Present(desired)) = materialized.get(address) else {
                continue;
            };
            let node = graph.node(address).ok_or_else(|| {
                crate::error::EngineError::Expression {
                    expression: address.to_string(),
                    message: "materialized node missing from graph".to_string(),
                }
            })?;

            let prior = snapshot.get(address);
            let kind = match prior {
                None => ActionKind::Create,
                Some(record) if &record.inputs == desired => ActionKind::NoOp,
                Some(_) => ActionKind::Update,
            };

            let after: Vec<Address> = node
                .dependencies
                .iter()
                .filter(|dep| changing.contains(dep))
                .cloned()
                .collect();

            actions.push(PlanAction {
                address: address.clone(),
                kind,
                resource_kind: node.kind.clone(),
                desired: Some(desired.clone()),
                prior: prior.map(|r| r.inputs.clone()),
                prior_version: prior.map(|r| r.version),
                remote_id: prior.map(|r| r.remote_id.clone()),
                depends_on: node.dependencies.iter().cloned().collect(),
                after,
            });
        }

        Ok(Plan::from_actions(actions))
    }

    /// Build a plan that destroys every address recorded in state
    pub fn destroy_all(snapshot: &BTreeMap<Address, StateRecord>) -> Plan {
        let destroy_set: BTreeSet<Address> = snapshot.keys().cloned().collect();
        Plan::from_actions(destroy_actions(snapshot, &destroy_set))
    }
}

/// Emit Destroy actions in reverse topological order of the prior state's
/// dependency graph, with `after` pointing at the dependents being destroyed
fn destroy_actions(
    snapshot: &BTreeMap<Address, StateRecord>,
    destroy_set: &BTreeSet<Address>,
) -> Vec<PlanAction> {
    let order = state_topo_order(snapshot);

    order
        .iter()
        .rev()
        .filter(|addr| destroy_set.contains(addr))
        .map(|addr| {
            let record = &snapshot[addr];
            // Dependents must be gone before their dependency is removed.
            let after: Vec<Address> = destroy_set
                .iter()
                .filter(|candidate| {
                    *candidate != addr && snapshot[*candidate].depends_on.contains(addr)
                })
                .cloned()
                .collect();

            PlanAction {
                address: addr.clone(),
                kind: ActionKind::Destroy,
                resource_kind: record.kind.clone(),
                desired: None,
                prior: Some(record.inputs.clone()),
                prior_version: Some(record.version),
                remote_id: Some(record.remote_id.clone()),
                depends_on: record.depends_on.clone(),
                after,
            }
        })
        .collect()
}

/// Topological order over the recorded state's dependency graph
///
/// Records whose dependencies are not in the snapshot (or that predate
/// dependency persistence) are treated as dependency-free.
fn state_topo_order(snapshot: &BTreeMap<Address, StateRecord>) -> Vec<Address> {
    let members: BTreeSet<&Address> = snapshot.keys().collect();
    let mut remaining: BTreeMap<&Address, BTreeSet<&Address>> = snapshot
        .iter()
        .map(|(addr, record)| {
            let deps: BTreeSet<&Address> = record
                .depends_on
                .iter()
                .filter(|d| members.contains(d))
                .collect();
            (addr, deps)
        })
        .collect();

    let mut order = Vec::with_capacity(snapshot.len());
    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .find(|(_, deps)| deps.is_empty())
            .map(|(addr, _)| (*addr).clone());

        // A cycle in recorded state cannot happen through normal applies;
        // fall back to alphabetical order to stay total.
        let next = match next {
            Some(addr) => addr,
            None => remaining.keys().next().map(|a| (*a).clone()).unwrap(),
        };

        remaining.remove(&next);
        for deps in remaining.values_mut() {
            deps.remove(&next);
        }
        order.push(next);
    }

    order
}
