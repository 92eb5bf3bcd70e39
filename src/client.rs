use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::codec::{JsonCodec, SerdeJsonCodec};
use crate::config::{ClientConfig, ExecuteOptions};
use crate::error::{PrestoError, Result};
use crate::models::{QueryOutcome, QueryResults};
use crate::statement::{Statement, StatementSettings};
use crate::transport::{send_with_retry, HttpRequest, HttpResponse, ReqwestTransport, Transport};

/// Per-call additions merged over the client defaults.
#[derive(Debug, Default)]
pub(crate) struct RequestOptions<'a> {
    pub headers: Vec<(String, String)>,
    pub session: Option<&'a str>,
    pub body: Option<String>,
}

/// Presto coordinator client.
///
/// Cheap to clone; every [`Statement`] holds its own clone.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    base_url: String,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn JsonCodec>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("user", &self.config.user)
            .field("transport", &"<Transport>")
            .field("codec", &self.codec)
            .finish()
    }
}

impl Client {
    /// Creates a client backed by `reqwest`.
    ///
    /// Example: `Client::new(ClientConfig::new("coordinator", 8080).with_catalog("hive"))`
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Creates a client sending through a custom transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url: config.base_url(),
            config: Arc::new(config),
            transport,
            codec: Arc::new(SerdeJsonCodec),
        }
    }

    /// Replaces the JSON codec, e.g. with a big-integer safe parser.
    pub fn with_codec(mut self, codec: Arc<dyn JsonCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn codec(&self) -> &dyn JsonCodec {
        self.codec.as_ref()
    }

    /// Protocol header name for the configured engine.
    pub(crate) fn protocol_header(&self, suffix: &str) -> String {
        self.config.engine.header(suffix)
    }

    /// Builds a request against `uri`, which may be a path or an absolute server URI.
    pub(crate) fn request(
        &self,
        method: Method,
        uri: &str,
        options: RequestOptions<'_>,
    ) -> Result<HttpRequest> {
        let url = if uri.starts_with("http://") || uri.starts_with("https://") {
            uri.to_string()
        } else if uri.starts_with('/') {
            format!("{}{}", self.base_url, uri)
        } else {
            format!("{}/{}", self.base_url, uri)
        };

        let mut request = HttpRequest::new(method, url);
        set_header(&mut request, USER_AGENT.as_str(), &self.config.user_agent)?;
        set_header(&mut request, &self.protocol_header("user"), &self.config.user)?;
        set_header(&mut request, &self.protocol_header("source"), &self.config.source)?;

        if let Some(password) = &self.config.password {
            let credentials = format!("{}:{}", self.config.user, password);
            let value = format!("Basic {}", BASE64_STANDARD.encode(credentials));
            set_header(&mut request, AUTHORIZATION.as_str(), &value)?;
        }
        if let Some(session) = options.session {
            set_header(&mut request, &self.protocol_header("session"), session)?;
        }
        for (name, value) in &options.headers {
            set_header(&mut request, name, value)?;
        }

        request.body = options.body;
        Ok(request)
    }

    /// Sends a request, absorbing 503s.
    pub(crate) async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        send_with_retry(self.transport.as_ref(), request).await
    }

    /// POST /v1/statement
    /// Submit a query and return a statement streaming its results.
    pub async fn execute(&self, options: ExecuteOptions) -> Result<Statement> {
        let query = options.query.trim();
        if query.is_empty() {
            return Err(PrestoError::usage("query text is required"));
        }
        let catalog = options
            .catalog
            .as_deref()
            .or(self.config.catalog.as_deref())
            .ok_or_else(|| PrestoError::usage("catalog is not set"))?;
        let schema = options
            .schema
            .as_deref()
            .or(self.config.schema.as_deref())
            .ok_or_else(|| PrestoError::usage("schema is not set"))?;

        let mut headers = vec![
            (self.protocol_header("catalog"), catalog.to_string()),
            (self.protocol_header("schema"), schema.to_string()),
        ];
        if let Some(timezone) = &options.timezone {
            headers.push((self.protocol_header("time-zone"), timezone.clone()));
        }

        let request = self.request(
            Method::POST,
            "/v1/statement",
            RequestOptions {
                headers,
                session: options.session.as_deref(),
                body: Some(query.to_string()),
            },
        )?;
        let resp = self.send(request).await?;

        if resp.status != 200 {
            return Err(PrestoError::protocol(
                resp.status,
                "statement submission failed",
                resp.body,
            ));
        }
        let value = resp.json(self.codec())?;
        if has_error(&value) {
            let message = value["error"]
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("statement submission returned an error")
                .to_string();
            return Err(PrestoError::protocol(resp.status, message, resp.body));
        }

        let results: QueryResults = serde_json::from_value(value).map_err(|e| {
            PrestoError::protocol(resp.status, format!("malformed submit response: {e}"), resp.body.clone())
        })?;
        let (Some(query_id), Some(next_uri), Some(info_uri)) =
            (results.id, results.next_uri, results.info_uri)
        else {
            return Err(PrestoError::protocol(
                resp.status,
                "submit response is missing id, nextUri or infoUri",
                resp.body,
            ));
        };
        debug!(query_id = %query_id, "Query submitted");

        let session = self.session_update(&resp).apply(options.session);
        let output = options.output_mode.unwrap_or(self.config.output_mode);
        let settings = StatementSettings {
            output,
            high_water_mark: options
                .high_water_mark
                .or(self.config.high_water_mark)
                .unwrap_or_else(|| output.default_high_water_mark()),
            fetch_info: options.fetch_info,
            state_updates: options.state_updates.unwrap_or(true),
            poll_interval: self.config.poll_interval,
            session,
        };

        Ok(Statement::new(self.clone(), query_id, next_uri, Some(info_uri), settings))
    }

    /// Submit `sql` with default options and drain it to completion.
    pub async fn query(&self, sql: &str) -> Result<QueryOutcome> {
        self.execute(ExecuteOptions::new(sql)).await?.collect_all().await
    }

    /// GET /v1/query/{query_id}
    pub async fn status(&self, query_id: &str) -> Result<Value> {
        self.get_json(&format!("/v1/query/{query_id}")).await
    }

    /// DELETE /v1/query/{query_id}
    /// Request that a running query be killed.
    pub async fn kill(&self, query_id: &str) -> Result<()> {
        self.kill_query(query_id).await.map(|_| ())
    }

    /// Kill returning the server payload; `Value::Null` for 204.
    pub(crate) async fn kill_query(&self, query_id: &str) -> Result<Value> {
        let request = self.request(
            Method::DELETE,
            &format!("/v1/query/{query_id}"),
            RequestOptions::default(),
        )?;
        let resp = self.send(request).await?;

        match resp.status {
            204 => Ok(Value::Null),
            200 => resp.json(self.codec()),
            status => Err(PrestoError::protocol(status, "query kill failed", resp.body)),
        }
    }

    /// GET /v1/node, or /v1/node/failed
    pub async fn nodes(&self, failed: bool) -> Result<Value> {
        let path = if failed { "/v1/node/failed" } else { "/v1/node" };
        self.get_json(path).await
    }

    /// GET /v1/cluster
    pub async fn cluster(&self) -> Result<Value> {
        self.get_json("/v1/cluster").await
    }

    async fn get_json(&self, uri: &str) -> Result<Value> {
        let request = self.request(Method::GET, uri, RequestOptions::default())?;
        let resp = self.send(request).await?;

        if resp.status != 200 {
            return Err(PrestoError::protocol(
                resp.status,
                format!("GET {uri} failed"),
                resp.body,
            ));
        }
        resp.json(self.codec())
    }

    /// Session directive carried by a response, if any.
    pub(crate) fn session_update(&self, resp: &HttpResponse) -> SessionUpdate {
        if let Some(token) = resp.header(&self.protocol_header("set-session")) {
            return SessionUpdate::Set(token.to_string());
        }
        if resp.header(&self.protocol_header("clear-session")).is_some() {
            return SessionUpdate::Clear;
        }
        SessionUpdate::Unchanged
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionUpdate {
    Set(String),
    Clear,
    Unchanged,
}

impl SessionUpdate {
    pub fn apply(self, current: Option<String>) -> Option<String> {
        match self {
            SessionUpdate::Set(token) => Some(token),
            SessionUpdate::Clear => None,
            SessionUpdate::Unchanged => current,
        }
    }
}

pub(crate) fn has_error(value: &Value) -> bool {
    value.get("error").map(|e| !e.is_null()).unwrap_or(false)
}

fn set_header(request: &mut HttpRequest, name: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| PrestoError::usage(format!("invalid header name '{name}': {e}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| PrestoError::usage(format!("invalid value for header '{name}': {e}")))?;
    request.headers.insert(name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Engine;
    use crate::testing::*;
    use serde_json::json;

    fn submitted() -> Value {
        page("QUEUED", Some(1))
    }

    #[tokio::test]
    async fn test_execute_sends_protocol_headers() {
        let (client, transport) = scripted_client(test_config().with_password("s3cret"));
        transport.push_json(200, submitted());

        let stmt = client
            .execute(ExecuteOptions::new("SELECT 1").timezone("UTC").session("tok"))
            .await
            .unwrap();
        assert_eq!(stmt.query_id(), QUERY_ID);

        let posts = transport.requests_with(Method::POST);
        assert_eq!(posts.len(), 1);
        let req = &posts[0];
        assert_eq!(req.url, "http://localhost:8080/v1/statement");
        assert_eq!(req.body.as_deref(), Some("SELECT 1"));
        assert_eq!(req.header("x-presto-catalog"), Some("tpch"));
        assert_eq!(req.header("x-presto-schema"), Some("tiny"));
        assert_eq!(req.header("x-presto-time-zone"), Some("UTC"));
        assert_eq!(req.header("x-presto-session"), Some("tok"));
        assert_eq!(req.header("x-presto-user"), Some("tester"));
        assert_eq!(req.header("x-presto-source"), Some("presto-client-rs"));
        let expected = format!("Basic {}", BASE64_STANDARD.encode("tester:s3cret"));
        assert_eq!(req.header("authorization"), Some(expected.as_str()));
        assert!(req.header("user-agent").unwrap().starts_with("presto-client-rs/"));
    }

    #[tokio::test]
    async fn test_no_authorization_without_password() {
        let (client, transport) = scripted_client(test_config());
        transport.push_json(200, json!({"activeWorkers": 3}));

        let cluster = client.cluster().await.unwrap();
        assert_eq!(cluster["activeWorkers"], 3);
        let req = &transport.requests()[0];
        assert_eq!(req.url, "http://localhost:8080/v1/cluster");
        assert!(req.header("authorization").is_none());
    }

    #[tokio::test]
    async fn test_trino_dialect_headers() {
        let (client, transport) = scripted_client(test_config().with_engine(Engine::Trino));
        transport.push_json(200, submitted());

        client.execute(ExecuteOptions::new("SELECT 1")).await.unwrap();
        let req = &transport.requests()[0];
        assert_eq!(req.header("x-trino-catalog"), Some("tpch"));
        assert!(req.header("x-presto-catalog").is_none());
    }

    #[tokio::test]
    async fn test_execute_usage_errors_before_io() {
        let (client, transport) = scripted_client(ClientConfig::new("localhost", 8080));

        let err = client.execute(ExecuteOptions::new("   ")).await.unwrap_err();
        assert!(matches!(err, PrestoError::Usage(_)));

        let err = client.execute(ExecuteOptions::new("SELECT 1")).await.unwrap_err();
        assert!(matches!(err, PrestoError::Usage(ref m) if m.contains("catalog")));

        let err = client
            .execute(ExecuteOptions::new("SELECT 1").catalog("hive"))
            .await
            .unwrap_err();
        assert!(matches!(err, PrestoError::Usage(ref m) if m.contains("schema")));

        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_execute_rejects_error_body() {
        let (client, transport) = scripted_client(test_config());
        transport.push_json(200, json!({"id": QUERY_ID, "error": {"message": "Access Denied"}}));

        match client.execute(ExecuteOptions::new("SELECT 1")).await.unwrap_err() {
            PrestoError::Protocol { status, message, body } => {
                assert_eq!(status, 200);
                assert_eq!(message, "Access Denied");
                assert!(body.contains("Access Denied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_rejects_non_200_and_missing_fields() {
        let (client, transport) = scripted_client(test_config());
        transport.push(Step::Respond(HttpResponse::new(401, "Unauthorized")));
        transport.push_json(200, json!({"id": QUERY_ID, "stats": {"state": "QUEUED"}}));

        let err = client.execute(ExecuteOptions::new("SELECT 1")).await.unwrap_err();
        assert_eq!(err.status(), Some(401));

        let err = client.execute(ExecuteOptions::new("SELECT 1")).await.unwrap_err();
        assert!(matches!(err, PrestoError::Protocol { ref message, .. } if message.contains("nextUri")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_503() {
        let (client, transport) = scripted_client(test_config());
        transport.push(Step::Respond(HttpResponse::new(503, "")));
        transport.push(Step::Respond(HttpResponse::new(503, "")));
        transport.push_json(200, submitted());

        let stmt = client.execute(ExecuteOptions::new("SELECT 1")).await.unwrap();
        assert_eq!(stmt.query_id(), QUERY_ID);
        assert_eq!(transport.requests_with(Method::POST).len(), 3);
    }

    #[tokio::test]
    async fn test_status_nodes_and_kill() {
        let (client, transport) = scripted_client(test_config());
        transport.push_json(200, json!({"queryId": QUERY_ID, "state": "RUNNING"}));
        transport.push_json(200, json!([{"uri": "http://worker-1:8080"}]));
        transport.push_json(200, json!([]));

        let status = client.status(QUERY_ID).await.unwrap();
        assert_eq!(status["state"], "RUNNING");
        let nodes = client.nodes(false).await.unwrap();
        assert_eq!(nodes.as_array().unwrap().len(), 1);
        client.nodes(true).await.unwrap();
        client.kill(QUERY_ID).await.unwrap();

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                format!("http://localhost:8080/v1/query/{QUERY_ID}"),
                "http://localhost:8080/v1/node".to_string(),
                "http://localhost:8080/v1/node/failed".to_string(),
                format!("http://localhost:8080/v1/query/{QUERY_ID}"),
            ]
        );
        assert_eq!(transport.requests_with(Method::DELETE).len(), 1);
    }

    #[tokio::test]
    async fn test_kill_fails_on_unexpected_status() {
        let (client, _transport) =
            scripted_client_with(test_config(), ScriptedTransport::new().with_kill_status(404));
        let err = client.kill(QUERY_ID).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_status_non_200_is_protocol_error() {
        let (client, transport) = scripted_client(test_config());
        transport.push(Step::Respond(HttpResponse::new(410, "gone")));
        let err = client.status(QUERY_ID).await.unwrap_err();
        assert!(matches!(err, PrestoError::Protocol { status: 410, .. }));
    }

    #[test]
    fn test_request_resolves_absolute_uris() {
        let (client, _transport) = scripted_client(test_config());
        let req = client
            .request(Method::GET, "https://other:8443/v1/statement/x/2", RequestOptions::default())
            .unwrap();
        assert_eq!(req.url, "https://other:8443/v1/statement/x/2");

        let req = client.request(Method::GET, "v1/node", RequestOptions::default()).unwrap();
        assert_eq!(req.url, "http://localhost:8080/v1/node");
    }

    #[test]
    fn test_invalid_session_token_is_usage_error() {
        let (client, _transport) = scripted_client(test_config());
        let err = client
            .request(
                Method::GET,
                "/v1/node",
                RequestOptions {
                    session: Some("bad\nvalue"),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, PrestoError::Usage(_)));
    }

    #[test]
    fn test_session_update() {
        let (client, _transport) = scripted_client(test_config());
        let set = HttpResponse::new(200, "").with_header("x-presto-set-session", "k=v");
        let clear = HttpResponse::new(200, "").with_header("x-presto-clear-session", "k");
        let plain = HttpResponse::new(200, "");

        assert_eq!(client.session_update(&set).apply(None), Some("k=v".to_string()));
        assert_eq!(client.session_update(&clear).apply(Some("k=v".to_string())), None);
        assert_eq!(
            client.session_update(&plain).apply(Some("k=v".to_string())),
            Some("k=v".to_string())
        );
    }
}
