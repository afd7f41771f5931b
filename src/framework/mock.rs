//! # Mock Framework
//!
//! Test doubles for the two host collaborators.
//!
//! - [`MockSocket`] records every frame sent, every close, and the persisted
//!   attachment. Failures can be switched on to exercise error paths.
//! - [`MockStorage`] is an in-memory key-value engine with a fluent
//!   expectation API for queries.
//!
//! # Example
//! ```ignore
//! let storage = MockStorage::new();
//! storage
//!     .expect_exec("SELECT * FROM users WHERE id = ?")
//!     .return_ok(QueryResult { rows: vec![json!({"id": 1})], ..Default::default() });
//!
//! let state = ActorState::new("actor-1", Arc::new(storage.clone()));
//! // Use state in tests...
//! storage.verify(); // Ensures all expectations were met
//! ```

use crate::framework::{Result, RpcError};
use crate::storage::{ListOptions, MemoryStorage, QueryResult, StorageEngine, StorageSchema};
use crate::transport::Socket;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// =============================================================================
// SOCKET
// =============================================================================

#[derive(Default)]
struct SocketLog {
    sent: Vec<String>,
    closes: Vec<(u16, String)>,
    attachment: Option<Value>,
}

/// An in-memory [`Socket`].
#[derive(Default)]
pub struct MockSocket {
    label: String,
    log: Mutex<SocketLog>,
    fail_send: AtomicBool,
    fail_close: AtomicBool,
}

impl MockSocket {
    pub fn new() -> Self {
        Self::labelled("mock-socket")
    }

    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Every frame sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.log.lock().sent.clone()
    }

    /// Sent frames parsed as JSON. Panics on a non-JSON frame.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|frame| serde_json::from_str(frame).expect("frame is not JSON"))
            .collect()
    }

    pub fn closes(&self) -> Vec<(u16, String)> {
        self.log.lock().closes.clone()
    }

    pub fn attachment(&self) -> Option<Value> {
        self.log.lock().attachment.clone()
    }

    /// Makes every later `send` fail.
    pub fn fail_sends(&self) {
        self.fail_send.store(true, Ordering::SeqCst);
    }

    /// Makes every later `close` fail.
    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Socket for MockSocket {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, message: String) -> Result<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(RpcError::TransportClosed("mock send failure".into()));
        }
        let mut log = self.log.lock();
        if !log.closes.is_empty() {
            return Err(RpcError::TransportClosed("socket is closed".into()));
        }
        log.sent.push(message);
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) -> Result<()> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(RpcError::TransportClosed("mock close failure".into()));
        }
        self.log.lock().closes.push((code, reason.to_string()));
        Ok(())
    }

    fn serialize_attachment(&self, value: Value) -> Result<()> {
        self.log.lock().attachment = Some(value);
        Ok(())
    }

    fn deserialize_attachment(&self) -> Option<Value> {
        self.log.lock().attachment.clone()
    }
}

// =============================================================================
// STORAGE EXPECTATION BUILDER API
// =============================================================================

struct QueryExpectation {
    query: String,
    params: Option<Vec<Value>>,
    response: Result<QueryResult>,
}

#[derive(Default)]
struct StorageScript {
    expectations: VecDeque<QueryExpectation>,
    executed: Vec<(String, Vec<Value>)>,
    unexpected: Vec<String>,
    schema: StorageSchema,
}

/// A scriptable [`StorageEngine`]. Clones share the same data and script.
#[derive(Clone, Default)]
pub struct MockStorage {
    kv: Arc<MemoryStorage>,
    script: Arc<Mutex<StorageScript>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expects `query` as the next `exec` call.
    pub fn expect_exec(&self, query: impl Into<String>) -> ExecExpectationBuilder {
        ExecExpectationBuilder {
            query: query.into(),
            params: None,
            script: self.script.clone(),
        }
    }

    /// Schema reported by [`StorageEngine::schema`].
    pub fn set_schema(&self, schema: StorageSchema) {
        self.script.lock().schema = schema;
    }

    /// Every query executed, with its parameters.
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.script.lock().executed.clone()
    }

    /// Verifies that all expectations were met and nothing unexpected ran.
    pub fn verify(&self) {
        let script = self.script.lock();
        if !script.unexpected.is_empty() {
            panic!("Unexpected queries: {:?}", script.unexpected);
        }
        if !script.expectations.is_empty() {
            panic!(
                "Not all expectations were met. {} remaining",
                script.expectations.len()
            );
        }
    }
}

/// Builder for `exec` expectations.
pub struct ExecExpectationBuilder {
    query: String,
    params: Option<Vec<Value>>,
    script: Arc<Mutex<StorageScript>>,
}

impl ExecExpectationBuilder {
    /// Also requires these exact parameters.
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn return_ok(self, result: QueryResult) {
        self.push(Ok(result));
    }

    pub fn return_err(self, error: RpcError) {
        self.push(Err(error));
    }

    fn push(self, response: Result<QueryResult>) {
        self.script.lock().expectations.push_back(QueryExpectation {
            query: self.query,
            params: self.params,
            response,
        });
    }
}

#[async_trait]
impl StorageEngine for MockStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.kv.get(key).await
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.kv.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.kv.delete(key).await
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<(String, Value)>> {
        self.kv.list(options).await
    }

    async fn exec(&self, query: &str, params: &[Value]) -> Result<QueryResult> {
        let mut script = self.script.lock();
        script.executed.push((query.to_string(), params.to_vec()));

        let matches = script.expectations.front().is_some_and(|e| {
            e.query == query && e.params.as_deref().is_none_or(|p| p == params)
        });
        if !matches {
            script.unexpected.push(query.to_string());
            return Err(RpcError::Storage(format!("unexpected query: {query}")));
        }
        match script.expectations.pop_front() {
            Some(expectation) => expectation.response,
            None => Err(RpcError::Storage(format!("unexpected query: {query}"))),
        }
    }

    async fn schema(&self) -> Result<StorageSchema> {
        Ok(self.script.lock().schema.clone())
    }
}
