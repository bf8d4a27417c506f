//! In-process test doubles shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use pagewise::JsonMap;

use crate::connection::{Connection, ConnectionError};

/// Build a record from a JSON object literal.
pub fn record(json: serde_json::Value) -> JsonMap {
    match json {
        serde_json::Value::Object(m) => JsonMap::from(m),
        other => panic!("expected an object, got {other}"),
    }
}

/// A scripted [`Connection`] that records every call.
///
/// Responses are keyed by path. A path may have a queue of responses, which
/// are consumed in order; the last one repeats. Unknown paths answer with
/// status 404.
#[derive(Default)]
pub struct StubConnection {
    responses: Mutex<HashMap<String, Vec<Result<serde_json::Value, ConnectionError>>>>,
    calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl StubConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, path: &str, body: serde_json::Value) {
        self.push(path, Ok(body));
    }

    pub fn fail(&self, path: &str, error: ConnectionError) {
        self.push(path, Err(error));
    }

    fn push(&self, path: &str, response: Result<serde_json::Value, ConnectionError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push(response);
    }

    pub fn calls(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(p, _)| p == path).count()
    }
}

#[async_trait]
impl Connection for StubConnection {
    async fn get(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<serde_json::Value, ConnectionError> {
        self.calls
            .lock()
            .unwrap()
            .push((path.to_string(), params.to_vec()));

        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Err(ConnectionError::Status(404)),
        }
    }
}
