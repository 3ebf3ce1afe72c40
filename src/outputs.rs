//! Stack output aggregation
//!
//! Outputs are named expressions evaluated against committed state after a
//! run. An output is marked stale when any resource it references did not
//! reach a successful terminal state in the run that produced it, or has
//! never been applied at all.

use crate::error::EngineResult;
use crate::expr;
use crate::graph::Address;
use crate::manifest::{AttrMap, OutputSpec};
use crate::vars::VariableRegistry;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One aggregated output value
#[derive(Debug, Clone, PartialEq)]
pub struct OutputValue {
    /// None when the output references resources that are absent or not
    /// yet applied
    pub value: Option<Value>,
    pub stale: bool,
    pub description: Option<String>,
}

/// Evaluate every declared output against committed state
///
/// `addresses` is the union of graph and state addresses so references stay
/// resolvable even for resources that are currently absent. `stale_addresses`
/// carries the addresses whose last action did not succeed.
pub fn aggregate(
    outputs: &BTreeMap<String, OutputSpec>,
    vars: &VariableRegistry,
    committed: &BTreeMap<Address, AttrMap>,
    addresses: &BTreeSet<Address>,
    stale_addresses: &BTreeSet<Address>,
) -> EngineResult<BTreeMap<String, OutputValue>> {
    let mut aggregated = BTreeMap::new();

    for (name, spec) in outputs {
        let referenced = expr::collect_string_references(&spec.value, addresses, name)?;
        let stale = referenced.iter().any(|addr| stale_addresses.contains(addr));

        let value = expr::eval_standalone(&spec.value, vars, committed, addresses, name)?;

        aggregated.insert(
            name.clone(),
            OutputValue {
                stale: stale || (value.is_none() && !referenced.is_empty()),
                value,
                description: spec.description.clone(),
            },
        );
    }

    Ok(aggregated)
}
