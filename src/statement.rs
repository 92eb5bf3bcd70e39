//! Pull-driven result cursor for one query.
//!
//! A [`Statement`] follows the server's `nextUri` chain. Each call to
//! [`Statement::next_event`] hands out one queued event. When the queue is empty,
//! the poll-or-fetch cycle runs until:
//! - the high-water mark of queued data is reached,
//! - the query is still pending and a poll is scheduled, or
//! - the chain ends.
//!
//! Rows that were fetched but not yet handed out stay queued. No new fetch is issued
//! until the queue drains.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use reqwest::Method;
use serde_json::{Map, Value};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::client::{has_error, Client, RequestOptions, SessionUpdate};
use crate::codec::{encode_header, encode_row};
use crate::error::{PrestoError, Result};
use crate::models::{
    Column, InfoOutcome, Output, OutputMode, QueryOutcome, QueryResults, QueryState,
    StatementEvent, StatementStats,
};

/// Fixed per-statement settings resolved by [`Client::execute`].
#[derive(Debug, Clone)]
pub(crate) struct StatementSettings {
    pub output: OutputMode,
    pub high_water_mark: usize,
    pub fetch_info: bool,
    pub state_updates: bool,
    pub poll_interval: Duration,
    pub session: Option<String>,
}

enum Flow {
    Continue,
    Stop,
}

/// Cancels a statement from another task, e.g. while its fetch is in flight.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    client: Client,
    query_id: String,
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Flags the statement and kills the query remotely.
    ///
    /// A response that arrives after this call is discarded by the statement.
    pub async fn cancel(&self) -> Result<Value> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.client.kill_query(&self.query_id).await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Clears the single-flight flag when a fetch finishes or its future is dropped.
struct RunningGuard(Arc<AtomicBool>);

impl RunningGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(Arc::clone(flag)))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Result cursor for one submitted query, created by [`Client::execute`].
///
/// Dropping a statement whose query has not reached a terminal state kills the query
/// on a spawned task, and a failure there can only be logged. Call
/// [`Statement::close`] instead to await that kill and receive its error.
pub struct Statement {
    client: Client,
    query_id: String,
    next_uri: Option<String>,
    info_uri: Option<String>,
    state: Option<QueryState>,
    last_stats: Option<StatementStats>,
    columns: Option<Vec<Column>>,
    session: Option<String>,
    settings: StatementSettings,
    cancelled: Arc<AtomicBool>,
    is_running: Arc<AtomicBool>,
    end_of_stream: bool,
    // Set once FINISHED is seen; mutes periodic state events from then on.
    progress_muted: bool,
    // No further cycles will run.
    finished: bool,
    // A remote kill was already issued.
    kill_sent: bool,
    poll_at: Option<Instant>,
    pending: VecDeque<StatementEvent>,
    queued_data: usize,
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("query_id", &self.query_id)
            .field("next_uri", &self.next_uri)
            .field("state", &self.state)
            .field("output", &self.settings.output)
            .field("end_of_stream", &self.end_of_stream)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Statement {
    pub(crate) fn new(
        client: Client,
        query_id: String,
        next_uri: String,
        info_uri: Option<String>,
        settings: StatementSettings,
    ) -> Self {
        Self {
            client,
            query_id,
            next_uri: Some(next_uri),
            info_uri,
            state: None,
            last_stats: None,
            columns: None,
            session: settings.session.clone(),
            settings,
            cancelled: Arc::new(AtomicBool::new(false)),
            is_running: Arc::new(AtomicBool::new(false)),
            end_of_stream: false,
            progress_muted: false,
            finished: false,
            kill_sent: false,
            poll_at: None,
            pending: VecDeque::new(),
            queued_data: 0,
        }
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// Last state reported by the server; `None` before the first poll.
    pub fn state(&self) -> Option<&QueryState> {
        self.state.as_ref()
    }

    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn output_mode(&self) -> OutputMode {
        self.settings.output
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn canceller(&self) -> CancelHandle {
        CancelHandle {
            client: self.client.clone(),
            query_id: self.query_id.clone(),
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Next event in delivery order, or `None` once the statement is spent.
    pub async fn next_event(&mut self) -> Option<StatementEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if event.is_data() {
                    self.queued_data -= 1;
                }
                return Some(event);
            }
            if self.finished {
                return None;
            }
            self.read().await;
        }
    }

    /// Next data item, skipping notifications. The first error event is returned as `Err`.
    pub async fn next_output(&mut self) -> Result<Option<Output>> {
        while let Some(event) = self.next_event().await {
            match event {
                StatementEvent::Data(output) => return Ok(Some(output)),
                StatementEvent::Error(err) => return Err(err),
                _ => {}
            }
        }
        Ok(None)
    }

    /// All events as a stream.
    pub fn into_stream(self) -> impl Stream<Item = StatementEvent> + Send {
        futures::stream::unfold(self, |mut stmt| async move {
            stmt.next_event().await.map(|event| (event, stmt))
        })
    }

    /// Drains the statement and gathers every row.
    pub async fn collect_all(mut self) -> Result<QueryOutcome> {
        let mut columns = Vec::new();
        let mut rows = Vec::new();
        let mut completion = None;

        while let Some(event) = self.next_event().await {
            match event {
                StatementEvent::Columns(cols) => columns = cols,
                StatementEvent::Data(output) => rows.push(output),
                StatementEvent::Success { stats, info } => completion = Some((stats, info)),
                StatementEvent::Error(err) => return Err(err),
                _ => {}
            }
        }

        let (stats, info) =
            completion.ok_or_else(|| PrestoError::Cancelled(self.query_id.clone()))?;
        Ok(QueryOutcome {
            query_id: self.query_id.clone(),
            columns,
            rows,
            stats,
            info,
        })
    }

    /// Stops the stream and kills the query remotely, returning the server payload.
    pub async fn cancel(&mut self) -> Result<Value> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.next_uri = None;
        self.kill_sent = true;
        self.client.kill_query(&self.query_id).await
    }

    /// Releases the statement, killing the query first if it has not reached a
    /// terminal state.
    pub async fn close(mut self) -> Result<()> {
        if self.needs_remote_cancel() {
            self.kill_sent = true;
            self.cancelled.store(true, Ordering::SeqCst);
            self.client.kill_query(&self.query_id).await?;
        }
        Ok(())
    }

    fn needs_remote_cancel(&self) -> bool {
        !self.kill_sent
            && !self.finished
            && !self.end_of_stream
            && !self.is_cancelled()
            && !self.state.as_ref().is_some_and(QueryState::is_terminal)
    }

    async fn read(&mut self) {
        let Some(_guard) = RunningGuard::acquire(&self.is_running) else {
            return;
        };

        if let Some(at) = self.poll_at {
            sleep_until(at).await;
            self.poll_at = None;
        }

        while let Flow::Continue = self.cycle().await {}
    }

    /// One poll-or-fetch round trip.
    async fn cycle(&mut self) -> Flow {
        if self.is_cancelled() {
            return self.stop_cancelled();
        }
        let Some(uri) = self.next_uri.clone() else {
            return self.complete().await;
        };

        let (status, update, body) = match self.fetch(&uri).await {
            Ok(fetched) => fetched,
            Err(err) => return self.halt(err).await,
        };

        if has_error(&body) {
            return self.halt(PrestoError::query(status, body)).await;
        }

        // A cancel may have landed while the request was in flight
        if self.is_cancelled() {
            return self.stop_cancelled();
        }

        self.session = update.apply(self.session.take());

        let results: QueryResults = match serde_json::from_value(body) {
            Ok(results) => results,
            Err(e) => {
                return self
                    .halt(PrestoError::protocol(
                        status,
                        format!("malformed statement response: {e}"),
                        "",
                    ))
                    .await
            }
        };
        let Some(stats) = results.stats.clone() else {
            return self
                .halt(PrestoError::protocol(status, "statement response has no stats", ""))
                .await;
        };

        self.observe(&stats);

        if stats.state.is_pending() && results.data.is_none() && results.next_uri.is_some() {
            self.next_uri = results.next_uri;
            self.poll_at = Some(Instant::now() + self.settings.poll_interval);
            trace!(
                query_id = %self.query_id,
                state = %stats.state,
                interval_ms = self.settings.poll_interval.as_millis() as u64,
                "Scheduling poll"
            );
            return Flow::Stop;
        }

        let mut more = true;
        if self.columns.is_none() {
            if let Some(columns) = results.columns {
                more = self.resolve_columns(columns);
            }
        }

        if let Some(rows) = results.data {
            match self.emit_rows(rows) {
                Ok(Some(accepting)) => more = accepting,
                Ok(None) => {}
                Err(err) => return self.halt(err).await,
            }
        }

        match results.next_uri {
            Some(next) => {
                self.next_uri = Some(next);
                if more {
                    Flow::Continue
                } else {
                    Flow::Stop
                }
            }
            None => self.complete().await,
        }
    }

    /// GETs `uri`, returning the status, session directive and parsed body.
    async fn fetch(&self, uri: &str) -> Result<(u16, SessionUpdate, Value)> {
        let request = self.client.request(
            Method::GET,
            uri,
            RequestOptions {
                session: self.session.as_deref(),
                ..Default::default()
            },
        )?;
        let resp = self.client.send(request).await?;

        if resp.status != 200 {
            return Err(PrestoError::protocol(
                resp.status,
                format!("unexpected status fetching {uri}"),
                resp.body,
            ));
        }
        let body = resp.json(self.client.codec())?;
        Ok((resp.status, self.client.session_update(&resp), body))
    }

    /// Emits periodic and change notifications for a freshly reported state.
    fn observe(&mut self, stats: &StatementStats) {
        if self.settings.state_updates && !self.progress_muted {
            self.pending.push_back(StatementEvent::State {
                query_id: self.query_id.clone(),
                state: stats.state.clone(),
                stats: stats.clone(),
            });
        }

        if self.state.as_ref() != Some(&stats.state) {
            debug!(query_id = %self.query_id, state = %stats.state, "Query state changed");
            self.pending.push_back(StatementEvent::StateChange {
                query_id: self.query_id.clone(),
                state: stats.state.clone(),
                stats: stats.clone(),
            });
            if stats.state == QueryState::Finished {
                self.progress_muted = true;
            }
            self.state = Some(stats.state.clone());
        }

        self.last_stats = Some(stats.clone());
    }

    /// Records the schema once. Returns the flow-control signal.
    fn resolve_columns(&mut self, mut columns: Vec<Column>) -> bool {
        match self.settings.output {
            OutputMode::Object => {
                dedupe_column_names(&mut columns);
                self.pending
                    .push_back(StatementEvent::Columns(columns.clone()));
                self.columns = Some(columns);
                true
            }
            OutputMode::Text => {
                let header = encode_header(columns.iter().map(|c| c.name.as_str()));
                self.pending
                    .push_back(StatementEvent::Columns(columns.clone()));
                self.columns = Some(columns);
                self.push_data(Output::Text(header + "\n"))
            }
        }
    }

    /// Encodes and queues one page of rows; `None` when nothing was pushed.
    fn emit_rows(&mut self, rows: Vec<Vec<Value>>) -> Result<Option<bool>> {
        if rows.is_empty() {
            return Ok(None);
        }

        match self.settings.output {
            OutputMode::Object => {
                let columns = self.columns.as_ref().ok_or_else(|| {
                    PrestoError::protocol(200, "rows received before columns", "")
                })?;
                let records: Vec<Map<String, Value>> = rows
                    .into_iter()
                    .map(|row| {
                        let mut cells = row.into_iter();
                        columns
                            .iter()
                            .map(|c| (c.name.clone(), cells.next().unwrap_or(Value::Null)))
                            .collect()
                    })
                    .collect();

                let mut more = true;
                for record in records {
                    more = self.push_data(Output::Record(record));
                }
                Ok(Some(more))
            }
            OutputMode::Text => {
                let codec = self.client.codec();
                let lines = rows
                    .iter()
                    .map(|row| encode_row(row, codec))
                    .collect::<Result<Vec<_>>>()?;
                let block = lines.join("\n") + "\n";
                Ok(Some(self.push_data(Output::Text(block))))
            }
        }
    }

    /// Queues a data item; `false` once the high-water mark is reached.
    fn push_data(&mut self, output: Output) -> bool {
        self.pending.push_back(StatementEvent::Data(output));
        self.queued_data += 1;
        self.queued_data < self.settings.high_water_mark
    }

    fn signal_end_of_stream(&mut self) {
        self.next_uri = None;
        if !self.end_of_stream {
            self.end_of_stream = true;
            self.pending.push_back(StatementEvent::End);
        }
    }

    fn stop_cancelled(&mut self) -> Flow {
        debug!(query_id = %self.query_id, "Statement cancelled");
        self.signal_end_of_stream();
        self.finished = true;
        Flow::Stop
    }

    /// Reports `err` and stops the statement for good.
    ///
    /// Server-side failures also kill the query. A failed kill is reported as a second
    /// error. Transport failures are only reported.
    async fn halt(&mut self, err: PrestoError) -> Flow {
        let kill = matches!(
            err,
            PrestoError::Protocol { .. } | PrestoError::Query { .. } | PrestoError::Codec(_)
        );
        warn!(query_id = %self.query_id, error = %err, "Statement failed");
        self.pending.push_back(StatementEvent::Error(err));
        self.finished = true;

        if kill && !self.kill_sent {
            self.kill_sent = true;
            if let Err(err) = self.client.kill_query(&self.query_id).await {
                warn!(query_id = %self.query_id, error = %err, "Failed to cancel query after error");
                self.pending.push_back(StatementEvent::Error(err));
            }
        }
        Flow::Stop
    }

    /// The chain is exhausted: end the stream and report success.
    async fn complete(&mut self) -> Flow {
        self.signal_end_of_stream();

        let stats = self.last_stats.clone().unwrap_or_else(|| {
            StatementStats::new(self.state.clone().unwrap_or(QueryState::Finished))
        });
        let info = match (&self.info_uri, self.settings.fetch_info) {
            (Some(uri), true) => Some(self.fetch_info(uri).await),
            _ => None,
        };

        self.pending
            .push_back(StatementEvent::Success { stats, info });
        self.finished = true;
        Flow::Stop
    }

    async fn fetch_info(&self, uri: &str) -> InfoOutcome {
        match self.get_info(uri).await {
            Ok(info) => InfoOutcome::Fetched(info),
            Err(err) => {
                warn!(query_id = %self.query_id, error = %err, "Failed to fetch query info");
                InfoOutcome::Failed(err.to_string())
            }
        }
    }

    async fn get_info(&self, uri: &str) -> Result<Value> {
        let request = self.client.request(
            Method::GET,
            uri,
            RequestOptions {
                session: self.session.as_deref(),
                ..Default::default()
            },
        )?;
        let resp = self.client.send(request).await?;
        if resp.status != 200 {
            return Err(PrestoError::protocol(resp.status, "info fetch failed", resp.body));
        }
        resp.json(self.client.codec())
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if !self.needs_remote_cancel() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(query_id = %self.query_id, "Statement dropped outside a runtime, query not cancelled");
            return;
        };

        let client = self.client.clone();
        let query_id = self.query_id.clone();
        runtime.spawn(async move {
            if let Err(err) = client.kill_query(&query_id).await {
                warn!(query_id = %query_id, error = %err, "Failed to cancel abandoned query");
            }
        });
    }
}

/// Renames repeated column names in place: `a, a, b` becomes `a, a_1, b`.
pub(crate) fn dedupe_column_names(columns: &mut [Column]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for column in columns.iter_mut() {
        let count = seen.entry(column.name.clone()).or_insert(0);
        if *count > 0 {
            column.name = format!("{}_{}", column.name, count);
        }
        *count += 1;
    }
}
