//! Expression scanning and resolution
//!
//! Attribute values may embed `${...}` expressions: variable references
//! (`var.name`), resource attribute references (`network.vpc.id`) and
//! shallow map merges (`merge(var.base_tags, network.vpc.tags)`). The
//! address part of a reference is matched longest-prefix against the graph
//! builder's known address table, so every reference is validated before
//! evaluation ever runs.
//!
//! Materialization is a tagged variant per node: `Present` with fully
//! resolved attributes, or `Absent` when the count expression resolved to
//! zero. A reference to an absent node makes the referencing attribute
//! absent as well - never a hard failure - so dependents of a conditional
//! resource simply omit the corresponding configuration.

use crate::error::{EngineError, EngineResult};
use crate::graph::{Address, ResourceGraph};
use crate::manifest::AttrMap;
use crate::vars::VariableRegistry;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("template pattern is valid"))
}

/// What a single `${...}` token points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Variable(String),
    Attribute { address: Address, attribute: String },
}

/// Parse one reference token against the known address table
///
/// Addresses may themselves contain dots, so the address part is the longest
/// known prefix; the remainder is the attribute path.
pub fn parse_reference(token: &str, addresses: &BTreeSet<Address>) -> Option<RefTarget> {
    let token = token.trim();

    if let Some(name) = token.strip_prefix("var.") {
        return Some(RefTarget::Variable(name.to_string()));
    }

    let segments: Vec<&str> = token.split('.').collect();
    for split in (1..segments.len()).rev() {
        let candidate = Address::new(segments[..split].join("."));
        if addresses.contains(&candidate) {
            return Some(RefTarget::Attribute {
                address: candidate,
                attribute: segments[split..].join("."),
            });
        }
    }

    None
}

/// Split a `merge(a, b, ...)` token into its argument tokens
fn merge_args(token: &str) -> Option<Vec<String>> {
    let inner = token.trim().strip_prefix("merge(")?.strip_suffix(')')?;
    Some(
        inner
            .split(',')
            .map(|arg| arg.trim().to_string())
            .filter(|arg| !arg.is_empty())
            .collect(),
    )
}

fn token_targets(
    token: &str,
    addresses: &BTreeSet<Address>,
    referenced_from: &str,
) -> EngineResult<Vec<RefTarget>> {
    let tokens: Vec<String> = match merge_args(token) {
        Some(args) => args,
        None => vec![token.trim().to_string()],
    };

    let mut targets = Vec::new();
    for t in tokens {
        match parse_reference(&t, addresses) {
            Some(target) => targets.push(target),
            None => {
                return Err(EngineError::UnknownReference {
                    reference: t,
                    referenced_from: referenced_from.to_string(),
                });
            }
        }
    }
    Ok(targets)
}

/// Collect every resource address referenced inside a string expression
pub fn collect_string_references(
    s: &str,
    addresses: &BTreeSet<Address>,
    referenced_from: &str,
) -> EngineResult<Vec<Address>> {
    let mut found = Vec::new();
    for capture in template_regex().captures_iter(s) {
        for target in token_targets(&capture[1], addresses, referenced_from)? {
            if let RefTarget::Attribute { address, .. } = target {
                found.push(address);
            }
        }
    }
    Ok(found)
}

/// Collect every resource address referenced anywhere in a value tree
pub fn collect_references(
    value: &Value,
    addresses: &BTreeSet<Address>,
    referenced_from: &str,
) -> EngineResult<Vec<Address>> {
    let mut found = Vec::new();
    match value {
        Value::String(s) => {
            found.extend(collect_string_references(s, addresses, referenced_from)?);
        }
        Value::Array(items) => {
            for item in items {
                found.extend(collect_references(item, addresses, referenced_from)?);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                found.extend(collect_references(item, addresses, referenced_from)?);
            }
        }
        _ => {}
    }
    Ok(found)
}

/// Materialization result for one node
#[derive(Debug, Clone, PartialEq)]
pub enum Materialized {
    Present(AttrMap),
    Absent,
}

/// Internal evaluation outcome for one expression
enum Eval {
    /// Fully resolved value
    Value(Value),
    /// References an absent resource; the referencing attribute is omitted
    Absent,
    /// References an attribute only the provider can compute; the raw
    /// expression is kept and finalized by the executor from committed state
    Deferred,
}

/// Evaluates expressions in topological order against already-materialized
/// upstream attributes, resolved variables and prior state
pub struct Resolver<'a> {
    vars: &'a VariableRegistry,
    addresses: BTreeSet<Address>,
    prior: &'a BTreeMap<Address, AttrMap>,
    resolved: BTreeMap<Address, Materialized>,
}

impl<'a> Resolver<'a> {
    /// Materialize every node of the graph
    ///
    /// `prior` carries the last committed attributes per address (from the
    /// state store) so references to provider-computed attributes resolve on
    /// re-plans; on first create they stay deferred.
    pub fn materialize(
        vars: &'a VariableRegistry,
        graph: &ResourceGraph,
        prior: &'a BTreeMap<Address, AttrMap>,
    ) -> EngineResult<BTreeMap<Address, Materialized>> {
        let mut resolver = Resolver {
            vars,
            addresses: graph.addresses(),
            prior,
            resolved: BTreeMap::new(),
        };

        for address in graph.topo_order() {
            let node = graph
                .node(address)
                .ok_or_else(|| EngineError::Expression {
                    expression: address.to_string(),
                    message: "node missing from graph".to_string(),
                })?;

            let present = match &node.count {
                None => true,
                Some(count) => resolver.eval_count(count, address)?,
            };

            if !present {
                resolver.resolved.insert(address.clone(), Materialized::Absent);
                continue;
            }

            let mut attrs = AttrMap::new();
            for (key, value) in &node.attributes {
                if let Some(resolved) = resolver.eval_value(value, address)? {
                    attrs.insert(key.clone(), resolved);
                }
            }

            resolver
                .resolved
                .insert(address.clone(), Materialized::Present(attrs));
        }

        Ok(resolver.resolved)
    }

    fn eval_count(&self, expr: &str, from: &Address) -> EngineResult<bool> {
        match self.eval_string(expr, from)? {
            Eval::Value(v) => truthy(&v, expr),
            Eval::Absent => Ok(false),
            Eval::Deferred => Err(EngineError::Expression {
                expression: expr.to_string(),
                message: "count cannot depend on attributes computed during apply".to_string(),
            }),
        }
    }

    /// Evaluate one attribute value; None means the attribute is omitted
    fn eval_value(&self, value: &Value, from: &Address) -> EngineResult<Option<Value>> {
        match value {
            Value::String(s) => match self.eval_string(s, from)? {
                Eval::Value(v) => Ok(Some(v)),
                Eval::Absent => Ok(None),
                Eval::Deferred => Ok(Some(Value::String(s.clone()))),
            },
            Value::Array(items) => {
                let mut resolved = Vec::new();
                for item in items {
                    if let Some(v) = self.eval_value(item, from)? {
                        resolved.push(v);
                    }
                }
                Ok(Some(Value::Array(resolved)))
            }
            Value::Object(map) => {
                let mut resolved = AttrMap::new();
                for (key, item) in map {
                    if let Some(v) = self.eval_value(item, from)? {
                        resolved.insert(key.clone(), v);
                    }
                }
                Ok(Some(Value::Object(resolved)))
            }
            other => Ok(Some(other.clone())),
        }
    }

    fn eval_string(&self, s: &str, from: &Address) -> EngineResult<Eval> {
        let captures: Vec<regex::Captures> = template_regex().captures_iter(s).collect();
        if captures.is_empty() {
            return Ok(Eval::Value(Value::String(s.to_string())));
        }

        // A string that is exactly one expression splices the referenced
        // value with its type preserved; embedded expressions stringify.
        if captures.len() == 1 && captures[0].get(0).map(|m| m.as_str()) == Some(s.trim()) {
            return self.eval_token(&captures[0][1], from);
        }

        let mut rendered = String::new();
        let mut last = 0;
        for capture in &captures {
            let whole = capture.get(0).ok_or_else(|| EngineError::Expression {
                expression: s.to_string(),
                message: "malformed expression".to_string(),
            })?;
            rendered.push_str(&s[last..whole.start()]);
            match self.eval_token(&capture[1], from)? {
                Eval::Value(v) => rendered.push_str(&stringify(&v)),
                Eval::Absent => return Ok(Eval::Absent),
                Eval::Deferred => return Ok(Eval::Deferred),
            }
            last = whole.end();
        }
        rendered.push_str(&s[last..]);

        Ok(Eval::Value(Value::String(rendered)))
    }

    fn eval_token(&self, token: &str, from: &Address) -> EngineResult<Eval> {
        if let Some(args) = merge_args(token) {
            return self.eval_merge(token, &args, from);
        }
        self.eval_ref(token, from)
    }

    fn eval_merge(&self, token: &str, args: &[String], from: &Address) -> EngineResult<Eval> {
        let mut merged = AttrMap::new();
        for arg in args {
            match self.eval_ref(arg, from)? {
                Eval::Value(Value::Object(map)) => merged.extend(map),
                Eval::Value(other) => {
                    return Err(EngineError::Expression {
                        expression: token.to_string(),
                        message: format!("merge() argument '{}' is not a map: {}", arg, other),
                    });
                }
                // Absent arguments contribute nothing
                Eval::Absent => {}
                Eval::Deferred => return Ok(Eval::Deferred),
            }
        }
        Ok(Eval::Value(Value::Object(merged)))
    }

    fn eval_ref(&self, token: &str, from: &Address) -> EngineResult<Eval> {
        let target =
            parse_reference(token, &self.addresses).ok_or_else(|| EngineError::UnknownReference {
                reference: token.trim().to_string(),
                referenced_from: from.to_string(),
            })?;

        match target {
            RefTarget::Variable(name) => match self.vars.get(&name) {
                Some(value) => Ok(Eval::Value(value.clone())),
                None => Err(EngineError::Expression {
                    expression: token.trim().to_string(),
                    message: format!("unknown variable '{}'", name),
                }),
            },
            RefTarget::Attribute { address, attribute } => {
                match self.resolved.get(&address) {
                    Some(Materialized::Absent) => Ok(Eval::Absent),
                    Some(Materialized::Present(attrs)) => {
                        if let Some(value) = lookup_path(attrs, &attribute) {
                            return Ok(Eval::Value(value.clone()));
                        }
                        // Not declared: either committed earlier (state) or
                        // computed by the provider during this apply.
                        match self.prior.get(&address).and_then(|a| lookup_path(a, &attribute)) {
                            Some(value) => Ok(Eval::Value(value.clone())),
                            None => Ok(Eval::Deferred),
                        }
                    }
                    None => Err(EngineError::Expression {
                        expression: token.trim().to_string(),
                        message: format!("reference to '{}' evaluated out of order", address),
                    }),
                }
            }
        }
    }
}

/// Evaluate one standalone expression against committed attributes
///
/// Used for stack outputs after (or between) applies. Addresses known to the
/// graph or state but without committed attributes evaluate as absent, so an
/// output referencing a disabled resource yields None rather than an error;
/// references to attributes that were never applied also yield None.
pub fn eval_standalone(
    expr: &str,
    vars: &VariableRegistry,
    committed: &BTreeMap<Address, AttrMap>,
    addresses: &BTreeSet<Address>,
    owner: &str,
) -> EngineResult<Option<Value>> {
    let empty = BTreeMap::new();
    let mut resolved: BTreeMap<Address, Materialized> = BTreeMap::new();
    for address in addresses {
        match committed.get(address) {
            Some(attrs) => {
                resolved.insert(address.clone(), Materialized::Present(attrs.clone()));
            }
            None => {
                resolved.insert(address.clone(), Materialized::Absent);
            }
        }
    }

    let resolver = Resolver {
        vars,
        addresses: addresses.clone(),
        prior: &empty,
        resolved,
    };

    match resolver.eval_string(expr, &Address::new(owner))? {
        Eval::Value(v) => Ok(Some(v)),
        Eval::Absent | Eval::Deferred => Ok(None),
    }
}

/// Substitute any remaining deferred references from committed attributes
///
/// The executor calls this just before dispatching an action, once every
/// upstream action has committed its attributes to state.
pub fn finalize_attributes(
    attrs: &AttrMap,
    committed: &BTreeMap<Address, AttrMap>,
    addresses: &BTreeSet<Address>,
    owner: &Address,
) -> EngineResult<AttrMap> {
    let mut finalized = AttrMap::new();
    for (key, value) in attrs {
        finalized.insert(key.clone(), finalize_value(value, committed, addresses, owner)?);
    }
    Ok(finalized)
}

fn finalize_value(
    value: &Value,
    committed: &BTreeMap<Address, AttrMap>,
    addresses: &BTreeSet<Address>,
    owner: &Address,
) -> EngineResult<Value> {
    match value {
        Value::String(s) => finalize_string(s, committed, addresses, owner),
        Value::Array(items) => {
            let resolved: EngineResult<Vec<Value>> = items
                .iter()
                .map(|item| finalize_value(item, committed, addresses, owner))
                .collect();
            Ok(Value::Array(resolved?))
        }
        Value::Object(map) => {
            let mut resolved = AttrMap::new();
            for (key, item) in map {
                resolved.insert(
                    key.clone(),
                    finalize_value(item, committed, addresses, owner)?,
                );
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn finalize_string(
    s: &str,
    committed: &BTreeMap<Address, AttrMap>,
    addresses: &BTreeSet<Address>,
    owner: &Address,
) -> EngineResult<Value> {
    let lookup = |token: &str| -> EngineResult<Value> {
        match parse_reference(token, addresses) {
            Some(RefTarget::Attribute { address, attribute }) => committed
                .get(&address)
                .and_then(|attrs| lookup_path(attrs, &attribute))
                .cloned()
                .ok_or_else(|| EngineError::Expression {
                    expression: token.trim().to_string(),
                    message: format!(
                        "attribute '{}' of '{}' was not computed by the provider",
                        attribute, address
                    ),
                }),
            _ => Err(EngineError::Expression {
                expression: token.trim().to_string(),
                message: format!("unresolved reference in attributes of '{}'", owner),
            }),
        }
    };

    let captures: Vec<regex::Captures> = template_regex().captures_iter(s).collect();
    if captures.is_empty() {
        return Ok(Value::String(s.to_string()));
    }

    if captures.len() == 1 && captures[0].get(0).map(|m| m.as_str()) == Some(s.trim()) {
        return lookup(&captures[0][1]);
    }

    let mut rendered = String::new();
    let mut last = 0;
    for capture in &captures {
        let whole = capture.get(0).ok_or_else(|| EngineError::Expression {
            expression: s.to_string(),
            message: "malformed expression".to_string(),
        })?;
        rendered.push_str(&s[last..whole.start()]);
        rendered.push_str(&stringify(&lookup(&capture[1])?));
        last = whole.end();
    }
    rendered.push_str(&s[last..]);

    Ok(Value::String(rendered))
}

/// Descend an attribute map along a dotted path
fn lookup_path<'v>(attrs: &'v AttrMap, path: &str) -> Option<&'v Value> {
    let mut segments = path.split('.');
    let mut current = attrs.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Render a value inside a larger interpolated string
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Interpret a count expression result as present/absent
fn truthy(value: &Value, expr: &str) -> EngineResult<bool> {
    let result = match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim() {
            "" | "0" | "false" => Some(false),
            "1" | "true" => Some(true),
            _ => None,
        },
        _ => None,
    };

    result.ok_or_else(|| EngineError::Expression {
        expression: expr.to_string(),
        message: format!("count must resolve to 0 or 1, got {}", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ResourceSpec;
    use serde_json::json;

    fn build_graph(resources: Vec<ResourceSpec>) -> ResourceGraph {
        ResourceGraph::build(&resources).unwrap()
    }

    fn spec(address: &str, attributes: serde_json::Value) -> ResourceSpec {
        ResourceSpec {
            address: address.to_string(),
            kind: "test".to_string(),
            count: None,
            depends_on: Vec::new(),
            attributes: attributes.as_object().cloned().unwrap(),
        }
    }

    fn registry(pairs: Vec<(&str, Value)>) -> VariableRegistry {
        let mut decls = BTreeMap::new();
        for (name, value) in &pairs {
            let var_type = match value {
                Value::Bool(_) => crate::vars::VarType::Bool,
                Value::Number(_) => crate::vars::VarType::Number,
                Value::Object(_) => crate::vars::VarType::Map,
                Value::Array(_) => crate::vars::VarType::List,
                _ => crate::vars::VarType::String,
            };
            decls.insert(
                name.to_string(),
                crate::vars::VariableDecl {
                    var_type,
                    default: Some(value.clone()),
                    validation: None,
                },
            );
        }
        VariableRegistry::resolve(&decls, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_parse_reference_longest_prefix() {
        let mut addresses = BTreeSet::new();
        addresses.insert(Address::from("network.vpc"));
        addresses.insert(Address::from("network"));

        let target = parse_reference("network.vpc.subnet.id", &addresses).unwrap();
        assert_eq!(
            target,
            RefTarget::Attribute {
                address: Address::from("network.vpc"),
                attribute: "subnet.id".to_string(),
            }
        );
    }

    #[test]
    fn test_variable_interpolation() {
        let vars = registry(vec![("region", json!("us-east-1"))]);
        let graph = build_graph(vec![spec(
            "bucket.logs",
            json!({"name": "logs-${var.region}"}),
        )]);

        let prior = BTreeMap::new();
        let resolved = Resolver::materialize(&vars, &graph, &prior).unwrap();

        match &resolved[&Address::from("bucket.logs")] {
            Materialized::Present(attrs) => {
                assert_eq!(attrs["name"], json!("logs-us-east-1"));
            }
            Materialized::Absent => panic!("expected present"),
        }
    }

    #[test]
    fn test_full_string_splice_preserves_type() {
        let vars = registry(vec![("tags", json!({"team": "core"}))]);
        let graph = build_graph(vec![spec("bucket.logs", json!({"tags": "${var.tags}"}))]);

        let prior = BTreeMap::new();
        let resolved = Resolver::materialize(&vars, &graph, &prior).unwrap();

        match &resolved[&Address::from("bucket.logs")] {
            Materialized::Present(attrs) => {
                assert_eq!(attrs["tags"], json!({"team": "core"}));
            }
            Materialized::Absent => panic!("expected present"),
        }
    }

    #[test]
    fn test_merge_combines_maps_later_wins() {
        let vars = registry(vec![
            ("base", json!({"team": "core", "env": "dev"})),
            ("extra", json!({"env": "prod"})),
        ]);
        let graph = build_graph(vec![spec(
            "bucket.logs",
            json!({"tags": "${merge(var.base, var.extra)}"}),
        )]);

        let prior = BTreeMap::new();
        let resolved = Resolver::materialize(&vars, &graph, &prior).unwrap();

        match &resolved[&Address::from("bucket.logs")] {
            Materialized::Present(attrs) => {
                assert_eq!(attrs["tags"], json!({"team": "core", "env": "prod"}));
            }
            Materialized::Absent => panic!("expected present"),
        }
    }

    #[test]
    fn test_upstream_attribute_propagates() {
        let vars = registry(vec![]);
        let graph = build_graph(vec![
            spec("network.vpc", json!({"cidr": "10.0.0.0/16"})),
            spec("compute.web", json!({"vpc_cidr": "${network.vpc.cidr}"})),
        ]);

        let prior = BTreeMap::new();
        let resolved = Resolver::materialize(&vars, &graph, &prior).unwrap();

        match &resolved[&Address::from("compute.web")] {
            Materialized::Present(attrs) => {
                assert_eq!(attrs["vpc_cidr"], json!("10.0.0.0/16"));
            }
            Materialized::Absent => panic!("expected present"),
        }
    }

    #[test]
    fn test_count_zero_marks_absent_and_dependents_omit_attribute() {
        let vars = registry(vec![("enabled", json!(false))]);
        let mut gate = spec("gateway.bridge", json!({"image": "bridge:latest"}));
        gate.count = Some("${var.enabled}".to_string());

        let graph = build_graph(vec![
            gate,
            spec(
                "dns.record",
                json!({"target": "${gateway.bridge.ip}", "zone": "example.com"}),
            ),
        ]);

        let prior = BTreeMap::new();
        let resolved = Resolver::materialize(&vars, &graph, &prior).unwrap();

        assert_eq!(
            resolved[&Address::from("gateway.bridge")],
            Materialized::Absent
        );
        match &resolved[&Address::from("dns.record")] {
            Materialized::Present(attrs) => {
                assert!(!attrs.contains_key("target"));
                assert_eq!(attrs["zone"], json!("example.com"));
            }
            Materialized::Absent => panic!("expected present"),
        }
    }

    #[test]
    fn test_computed_attribute_resolves_from_prior_state() {
        let vars = registry(vec![]);
        let graph = build_graph(vec![
            spec("network.vpc", json!({"cidr": "10.0.0.0/16"})),
            spec("compute.web", json!({"network_id": "${network.vpc.id}"})),
        ]);

        let mut prior = BTreeMap::new();
        let mut vpc_attrs = AttrMap::new();
        vpc_attrs.insert("id".to_string(), json!("net-42"));
        prior.insert(Address::from("network.vpc"), vpc_attrs);

        let resolved = Resolver::materialize(&vars, &graph, &prior).unwrap();
        match &resolved[&Address::from("compute.web")] {
            Materialized::Present(attrs) => {
                assert_eq!(attrs["network_id"], json!("net-42"));
            }
            Materialized::Absent => panic!("expected present"),
        }
    }

    #[test]
    fn test_computed_attribute_stays_deferred_on_first_create() {
        let vars = registry(vec![]);
        let graph = build_graph(vec![
            spec("network.vpc", json!({"cidr": "10.0.0.0/16"})),
            spec("compute.web", json!({"network_id": "${network.vpc.id}"})),
        ]);

        let prior = BTreeMap::new();
        let resolved = Resolver::materialize(&vars, &graph, &prior).unwrap();

        match &resolved[&Address::from("compute.web")] {
            Materialized::Present(attrs) => {
                // Raw expression kept for the executor to finalize
                assert_eq!(attrs["network_id"], json!("${network.vpc.id}"));
            }
            Materialized::Absent => panic!("expected present"),
        }
    }

    #[test]
    fn test_finalize_attributes_substitutes_committed_values() {
        let mut attrs = AttrMap::new();
        attrs.insert("network_id".to_string(), json!("${network.vpc.id}"));
        attrs.insert("name".to_string(), json!("web-${network.vpc.id}"));

        let mut committed = BTreeMap::new();
        let mut vpc = AttrMap::new();
        vpc.insert("id".to_string(), json!("net-7"));
        committed.insert(Address::from("network.vpc"), vpc);

        let mut addresses = BTreeSet::new();
        addresses.insert(Address::from("network.vpc"));
        addresses.insert(Address::from("compute.web"));

        let finalized =
            finalize_attributes(&attrs, &committed, &addresses, &Address::from("compute.web"))
                .unwrap();

        assert_eq!(finalized["network_id"], json!("net-7"));
        assert_eq!(finalized["name"], json!("web-net-7"));
    }

    #[test]
    fn test_finalize_fails_on_missing_computed_attribute() {
        let mut attrs = AttrMap::new();
        attrs.insert("network_id".to_string(), json!("${network.vpc.id}"));

        let committed = BTreeMap::new();
        let mut addresses = BTreeSet::new();
        addresses.insert(Address::from("network.vpc"));

        let err = finalize_attributes(
            &attrs,
            &committed,
            &addresses,
            &Address::from("compute.web"),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Expression { .. }));
    }

    #[test]
    fn test_count_rejects_non_binary_value() {
        let vars = registry(vec![("replicas", json!(3))]);
        let mut node = spec("compute.web", json!({}));
        node.count = Some("${var.replicas}".to_string());
        let graph = build_graph(vec![node]);

        let prior = BTreeMap::new();
        let err = Resolver::materialize(&vars, &graph, &prior).unwrap_err();
        assert!(err.to_string().contains("count must resolve to 0 or 1"));
    }
}
