use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response body of `POST /v1/statement` and of every `GET <nextUri>`.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QueryResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_uri: Option<String>,
    /// Absent once the result set is exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_cancel_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatementStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<Column>>,
    /// Row data, positional against `columns`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Vec<Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl QueryResults {
    /// The state reported in `stats`, if any.
    pub fn state(&self) -> Option<QueryState> {
        self.stats.as_ref().map(|s| s.state.clone())
    }
}

/// Execution statistics reported with every statement response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatementStats {
    pub state: QueryState,
    #[serde(default)]
    pub scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_splits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_splits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_splits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_splits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_bytes: Option<u64>,
    // Anything else the server sends (cpuTimeMillis, rootStage, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatementStats {
    pub fn new(state: QueryState) -> Self {
        Self {
            state,
            scheduled: false,
            nodes: None,
            total_splits: None,
            queued_splits: None,
            running_splits: None,
            completed_splits: None,
            processed_rows: None,
            processed_bytes: None,
            extra: Map::new(),
        }
    }
}

/// One result column as described by the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_signature: Option<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            type_signature: None,
        }
    }
}

/// Query lifecycle state as reported by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QueryState {
    Queued,
    Planning,
    Starting,
    Running,
    Finishing,
    Finished,
    Canceled,
    Failed,
    /// A state this client does not know about.
    Other(String),
}

impl QueryState {
    /// `FINISHED`, `CANCELED` and `FAILED`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryState::Finished | QueryState::Canceled | QueryState::Failed
        )
    }

    /// States in which the query must be polled. Unrecognised states such as
    /// `WAITING_FOR_RESOURCES` count as pending.
    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &str {
        match self {
            QueryState::Queued => "QUEUED",
            QueryState::Planning => "PLANNING",
            QueryState::Starting => "STARTING",
            QueryState::Running => "RUNNING",
            QueryState::Finishing => "FINISHING",
            QueryState::Finished => "FINISHED",
            QueryState::Canceled => "CANCELED",
            QueryState::Failed => "FAILED",
            QueryState::Other(s) => s,
        }
    }
}

impl From<String> for QueryState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "QUEUED" => QueryState::Queued,
            "PLANNING" => QueryState::Planning,
            "STARTING" => QueryState::Starting,
            "RUNNING" => QueryState::Running,
            "FINISHING" => QueryState::Finishing,
            "FINISHED" => QueryState::Finished,
            "CANCELED" => QueryState::Canceled,
            "FAILED" => QueryState::Failed,
            _ => QueryState::Other(s),
        }
    }
}

impl From<QueryState> for String {
    fn from(state: QueryState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a statement renders result rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// One `Map<String, Value>` per row, keyed by column name.
    #[default]
    Object,
    /// Comma-delimited text: a header line, then one block per server page.
    Text,
}

impl OutputMode {
    /// High-water mark used when none is configured.
    pub fn default_high_water_mark(&self) -> usize {
        match self {
            OutputMode::Object => 16,
            OutputMode::Text => 1,
        }
    }
}

/// One produced data item.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Record(Map<String, Value>),
    Text(String),
}

/// Result of the optional post-completion info fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoOutcome {
    Fetched(Value),
    /// The fetch failed; the query itself still succeeded.
    Failed(String),
}

/// Everything a statement reports, in delivery order.
#[derive(Debug)]
pub enum StatementEvent {
    /// Periodic progress while the query has not finished.
    State {
        query_id: String,
        state: QueryState,
        stats: StatementStats,
    },
    /// The reported state differs from the last one seen.
    StateChange {
        query_id: String,
        state: QueryState,
        stats: StatementStats,
    },
    /// The result schema, emitted once.
    Columns(Vec<Column>),
    Data(Output),
    /// No further `Data` follows.
    End,
    Success {
        stats: StatementStats,
        info: Option<InfoOutcome>,
    },
    Error(crate::error::PrestoError),
}

impl StatementEvent {
    pub fn is_data(&self) -> bool {
        matches!(self, StatementEvent::Data(_))
    }
}

/// A fully drained statement.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub query_id: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Output>,
    pub stats: StatementStats,
    pub info: Option<InfoOutcome>,
}
