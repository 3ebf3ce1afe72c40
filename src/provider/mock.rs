//! Scriptable in-memory provider for tests

use super::{
    Operation, OperationStatus, Provider, ProviderError, ProviderResult, RemoteResource,
};
use crate::manifest::AttrMap;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// One recorded provider call
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    Create { kind: String, token: String },
    Read { id: String },
    Update { id: String, token: String },
    Delete { id: String, token: String },
}

struct PendingOperation {
    /// Remaining polls that report Pending before the terminal status
    polls_left: u32,
    polls_seen: u32,
    terminal: OperationStatus,
}

#[derive(Default)]
struct Inner {
    resources: HashMap<String, RemoteResource>,
    kinds: HashMap<String, String>,
    operations: HashMap<String, PendingOperation>,
    calls: Vec<ProviderCall>,
    fail_kinds: HashMap<String, String>,
    failed_operations_by_kind: HashMap<String, String>,
    transient_failures_by_kind: HashMap<String, u32>,
}

/// Provider double with controllable failures and operation latency
pub struct MockProvider {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    pending_polls: u32,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
            pending_polls: 0,
        }
    }

    /// Make every operation report Pending this many times first
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Make mutations on this kind fail with a permanent error
    pub fn fail_kind(self, kind: &str, message: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .fail_kinds
            .insert(kind.to_string(), message.to_string());
        self
    }

    /// Make mutations on this kind start fine but reach a Failed terminal
    /// status when polled
    pub fn fail_operation(self, kind: &str, message: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .failed_operations_by_kind
            .insert(kind.to_string(), message.to_string());
        self
    }

    /// Make the first `n` mutations on this kind fail transiently
    pub fn transient_failures(self, kind: &str, n: u32) -> Self {
        self.inner
            .lock()
            .unwrap()
            .transient_failures_by_kind
            .insert(kind.to_string(), n);
        self
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn poll_count(&self, operation_id: &str) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .operations
            .get(operation_id)
            .map(|op| op.polls_seen)
            .unwrap_or(0)
    }

    pub fn resource(&self, id: &str) -> Option<RemoteResource> {
        self.inner.lock().unwrap().resources.get(id).cloned()
    }

    pub fn resource_count(&self) -> usize {
        self.inner.lock().unwrap().resources.len()
    }

    fn fresh_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn enqueue(&self, inner: &mut Inner, terminal: OperationStatus) -> Operation {
        let id = self.fresh_id("op");
        inner.operations.insert(
            id.clone(),
            PendingOperation {
                polls_left: self.pending_polls,
                polls_seen: 0,
                terminal,
            },
        );
        Operation { id }
    }

    fn check_failures(&self, inner: &mut Inner, kind: &str) -> ProviderResult<()> {
        if let Some(left) = inner.transient_failures_by_kind.get_mut(kind)
            && *left > 0
        {
            *left -= 1;
            return Err(ProviderError::transient("injected transient failure"));
        }
        if let Some(message) = inner.fail_kinds.get(kind) {
            return Err(ProviderError::permanent(message.clone()));
        }
        Ok(())
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn create(
        &self,
        kind: &str,
        attributes: &AttrMap,
        idempotency_token: &str,
    ) -> ProviderResult<Operation> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ProviderCall::Create {
            kind: kind.to_string(),
            token: idempotency_token.to_string(),
        });
        self.check_failures(&mut inner, kind)?;

        if let Some(message) = inner.failed_operations_by_kind.get(kind).cloned() {
            return Ok(self.enqueue(&mut inner, OperationStatus::Failed(message)));
        }

        let id = self.fresh_id(kind);
        let mut committed = attributes.clone();
        committed.insert("id".to_string(), json!(id.clone()));
        let resource = RemoteResource {
            id: id.clone(),
            attributes: committed,
        };
        inner.kinds.insert(id.clone(), kind.to_string());
        inner.resources.insert(id, resource.clone());

        Ok(self.enqueue(&mut inner, OperationStatus::Succeeded(Some(resource))))
    }

    async fn read(&self, id: &str) -> ProviderResult<Option<RemoteResource>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ProviderCall::Read { id: id.to_string() });
        Ok(inner.resources.get(id).cloned())
    }

    async fn update(
        &self,
        id: &str,
        attributes: &AttrMap,
        idempotency_token: &str,
    ) -> ProviderResult<Operation> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ProviderCall::Update {
            id: id.to_string(),
            token: idempotency_token.to_string(),
        });

        let kind = inner.kinds.get(id).cloned().unwrap_or_default();
        self.check_failures(&mut inner, &kind)?;

        if let Some(message) = inner.failed_operations_by_kind.get(&kind).cloned() {
            return Ok(self.enqueue(&mut inner, OperationStatus::Failed(message)));
        }

        let Some(existing) = inner.resources.get(id).cloned() else {
            return Err(ProviderError::permanent(format!(
                "resource '{}' not found",
                id
            )));
        };

        let mut committed = attributes.clone();
        committed.insert("id".to_string(), json!(existing.id.clone()));
        let resource = RemoteResource {
            id: existing.id.clone(),
            attributes: committed,
        };
        inner.resources.insert(id.to_string(), resource.clone());

        Ok(self.enqueue(&mut inner, OperationStatus::Succeeded(Some(resource))))
    }

    async fn delete(&self, id: &str, idempotency_token: &str) -> ProviderResult<Operation> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ProviderCall::Delete {
            id: id.to_string(),
            token: idempotency_token.to_string(),
        });

        inner.resources.remove(id);
        Ok(self.enqueue(&mut inner, OperationStatus::Succeeded(None)))
    }

    async fn poll(&self, operation: &Operation) -> ProviderResult<OperationStatus> {
        let mut inner = self.inner.lock().unwrap();
        let Some(op) = inner.operations.get_mut(&operation.id) else {
            return Err(ProviderError::permanent(format!(
                "unknown operation '{}'",
                operation.id
            )));
        };

        op.polls_seen += 1;
        if op.polls_left > 0 {
            op.polls_left -= 1;
            return Ok(OperationStatus::Pending);
        }
        Ok(op.terminal.clone())
    }
}
