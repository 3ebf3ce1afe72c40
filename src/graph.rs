//! Resource graph construction
//!
//! Parses resource definitions into nodes, derives edges from explicit
//! `depends_on` sets and from attribute references embedded in expressions,
//! rejects cycles and produces a deterministic topological order.

use crate::error::{EngineError, EngineResult};
use crate::expr;
use crate::manifest::{AttrMap, ResourceSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Unique dotted path identifying one resource instance, e.g. "network.vpc"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A node in the resource graph: one definition plus its resolved edges
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub address: Address,
    pub kind: String,
    pub count: Option<String>,
    pub attributes: AttrMap,
    /// All addresses this node must follow (explicit + implicit)
    pub dependencies: BTreeSet<Address>,
}

/// A DAG of resource nodes with a precomputed topological order
#[derive(Debug)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    index: HashMap<Address, usize>,
    topo: Vec<Address>,
}

impl ResourceGraph {
    /// Build the graph from ordered resource definitions
    ///
    /// Implicit edges come from scanning every attribute expression (and the
    /// count expression) for references to other addresses. Each reference is
    /// validated against the known address table here, at build time.
    pub fn build(resources: &[ResourceSpec]) -> EngineResult<Self> {
        let mut addresses = BTreeSet::new();
        for spec in resources {
            if !addresses.insert(Address::new(&spec.address)) {
                return Err(EngineError::Validation {
                    variable: spec.address.clone(),
                    message: "duplicate resource address".to_string(),
                });
            }
        }

        let mut nodes = Vec::with_capacity(resources.len());
        let mut index = HashMap::new();

        for spec in resources {
            let address = Address::new(&spec.address);
            let mut dependencies = BTreeSet::new();

            for dep in &spec.depends_on {
                let dep_addr = Address::new(dep);
                if !addresses.contains(&dep_addr) {
                    return Err(EngineError::UnknownReference {
                        reference: dep.clone(),
                        referenced_from: spec.address.clone(),
                    });
                }
                dependencies.insert(dep_addr);
            }

            for referenced in expr::collect_references(
                &serde_json::Value::Object(spec.attributes.clone()),
                &addresses,
                &spec.address,
            )? {
                dependencies.insert(referenced);
            }

            if let Some(count) = &spec.count {
                for referenced in expr::collect_string_references(count, &addresses, &spec.address)? {
                    dependencies.insert(referenced);
                }
            }

            // A node depending on itself is the smallest cycle
            dependencies.remove(&address);

            index.insert(address.clone(), nodes.len());
            nodes.push(ResourceNode {
                address,
                kind: spec.kind.clone(),
                count: spec.count.clone(),
                attributes: spec.attributes.clone(),
                dependencies,
            });
        }

        detect_cycle(&nodes, &index)?;
        let topo = topological_order(&nodes, &index);

        Ok(Self { nodes, index, topo })
    }

    /// Look up a node by address
    pub fn node(&self, address: &Address) -> Option<&ResourceNode> {
        self.index.get(address).map(|i| &self.nodes[*i])
    }

    /// Addresses in dependency order (dependencies before dependents)
    pub fn topo_order(&self) -> &[Address] {
        &self.topo
    }

    /// All known addresses
    pub fn addresses(&self) -> BTreeSet<Address> {
        self.nodes.iter().map(|n| n.address.clone()).collect()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Depth-first cycle detection with a recursion stack
///
/// On cycle, the error carries the offending address sequence starting and
/// ending at the same node.
fn detect_cycle(nodes: &[ResourceNode], index: &HashMap<Address, usize>) -> EngineResult<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InStack,
        Done,
    }

    fn visit(
        node: &ResourceNode,
        nodes: &[ResourceNode],
        index: &HashMap<Address, usize>,
        marks: &mut [Mark],
        stack: &mut Vec<Address>,
    ) -> EngineResult<()> {
        let i = index[&node.address];
        marks[i] = Mark::InStack;
        stack.push(node.address.clone());

        for dep in &node.dependencies {
            let j = index[dep];
            match marks[j] {
                Mark::InStack => {
                    let start = stack.iter().position(|a| a == dep).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|a| a.to_string()).collect();
                    path.push(dep.to_string());
                    return Err(EngineError::Cycle { path });
                }
                Mark::Unvisited => visit(&nodes[j], nodes, index, marks, stack)?,
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[i] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut stack = Vec::new();

    for node in nodes {
        if marks[index[&node.address]] == Mark::Unvisited {
            visit(node, nodes, index, &mut marks, &mut stack)?;
        }
    }

    Ok(())
}

/// Kahn's algorithm with declaration-order tie-breaking
///
/// Deterministic order keeps plans stable across runs. Assumes the graph is
/// already known to be acyclic.
fn topological_order(nodes: &[ResourceNode], index: &HashMap<Address, usize>) -> Vec<Address> {
    let mut indegree: Vec<usize> = nodes.iter().map(|n| n.dependencies.len()).collect();
    let mut dependents: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

    for (i, node) in nodes.iter().enumerate() {
        for dep in &node.dependencies {
            dependents.entry(index[dep]).or_default().push(i);
        }
    }

    let mut order = Vec::with_capacity(nodes.len());
    let mut placed = vec![false; nodes.len()];

    while order.len() < nodes.len() {
        let Some(next) = (0..nodes.len()).find(|&i| !placed[i] && indegree[i] == 0) else {
            break;
        };

        placed[next] = true;
        order.push(nodes[next].address.clone());

        if let Some(deps) = dependents.get(&next) {
            for &d in deps {
                indegree[d] -= 1;
            }
        }
    }

    order
}
