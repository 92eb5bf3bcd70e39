//! Scripted transport shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::{PrestoError, Result};
use crate::transport::{HttpRequest, HttpResponse, Transport};

pub(crate) const QUERY_ID: &str = "20240101_000000_00001_abcde";

pub(crate) enum Step {
    Respond(HttpResponse),
    /// Held until `release` is notified; `arrived` fires when the request lands.
    Gated(HttpResponse),
    Broken(String),
    /// Fails below HTTP, as a socket error would.
    Disconnected,
}

/// Answers non-DELETE requests from a queue; DELETE always gets `kill_status`.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<HttpRequest>>,
    kill_status: u16,
    pub arrived: Notify,
    pub release: Notify,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            kill_status: 204,
            arrived: Notify::new(),
            release: Notify::new(),
        }
    }

    pub fn with_kill_status(mut self, status: u16) -> Self {
        self.kill_status = status;
        self
    }

    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.push(Step::Respond(json_response(status, body)));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_with(&self, method: Method) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let is_delete = request.method == Method::DELETE;
        self.requests.lock().unwrap().push(request);
        if is_delete {
            return Ok(HttpResponse::new(self.kill_status, ""));
        }

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Gated(response)) => {
                self.arrived.notify_one();
                self.release.notified().await;
                Ok(response)
            }
            Some(Step::Broken(message)) => Err(PrestoError::protocol(0, message, "")),
            Some(Step::Disconnected) => Err(PrestoError::Transport(connection_error())),
            None => Err(PrestoError::protocol(0, "script exhausted", "")),
        }
    }
}

/// A real `reqwest::Error`; building a request for a host-less URL fails.
pub(crate) fn connection_error() -> reqwest::Error {
    reqwest::Client::new().get("http://").build().unwrap_err()
}

pub(crate) fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse::new(status, body.to_string()).with_header("content-type", "application/json")
}

pub(crate) fn uri(n: u32) -> String {
    format!("http://localhost:8080/v1/statement/{QUERY_ID}/{n}")
}

/// Body of a statement response in `state`, continuing to page `next` if given.
pub(crate) fn page(state: &str, next: Option<u32>) -> Value {
    let mut body = json!({
        "id": QUERY_ID,
        "infoUri": format!("http://localhost:8080/v1/query/{QUERY_ID}"),
        "stats": {"state": state, "scheduled": true, "nodes": 1},
    });
    if let Some(n) = next {
        body["nextUri"] = json!(uri(n));
    }
    body
}

pub(crate) fn with_rows(mut body: Value, columns: &[&str], rows: Value) -> Value {
    body["columns"] = Value::Array(
        columns
            .iter()
            .map(|name| json!({"name": name, "type": "varchar"}))
            .collect(),
    );
    body["data"] = rows;
    body
}

pub(crate) fn test_config() -> ClientConfig {
    ClientConfig::new("localhost", 8080)
        .with_user("tester")
        .with_catalog("tpch")
        .with_schema("tiny")
        .with_poll_interval(Duration::from_millis(10))
}

pub(crate) fn scripted_client(config: ClientConfig) -> (Client, Arc<ScriptedTransport>) {
    scripted_client_with(config, ScriptedTransport::new())
}

pub(crate) fn scripted_client_with(
    config: ClientConfig,
    transport: ScriptedTransport,
) -> (Client, Arc<ScriptedTransport>) {
    let transport = Arc::new(transport);
    let client = Client::with_transport(config, transport.clone());
    (client, transport)
}
