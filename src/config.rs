//! Client configuration and per-query options.

use std::time::Duration;

use crate::models::OutputMode;

/// Default interval between polls while a query is queued or running.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Header dialect spoken by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Engine {
    #[default]
    Presto,
    Trino,
}

impl Engine {
    fn prefix(&self) -> &'static str {
        match self {
            Engine::Presto => "x-presto-",
            Engine::Trino => "x-trino-",
        }
    }

    /// Full protocol header name for `suffix`, e.g. `catalog`.
    pub fn header(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix(), suffix)
    }
}

/// TLS settings handed to the HTTP client.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Extra root certificate in PEM form.
    pub ca_certificate_pem: Option<Vec<u8>>,
    pub accept_invalid_certs: bool,
}

/// Connection defaults shared by every request a [`Client`](crate::Client) makes.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// `Some` switches the scheme to https.
    pub tls: Option<TlsConfig>,
    pub user: String,
    /// Sent as HTTP Basic credentials when set.
    pub password: Option<String>,
    pub source: String,
    pub user_agent: String,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub poll_interval: Duration,
    pub output_mode: OutputMode,
    /// Defaults to the output mode's own mark when `None`.
    pub high_water_mark: Option<usize>,
    pub engine: Engine,
    pub request_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            tls: None,
            user: std::env::var("USER").unwrap_or_else(|_| "presto".to_string()),
            password: None,
            source: "presto-client-rs".to_string(),
            user_agent: format!("presto-client-rs/{}", env!("CARGO_PKG_VERSION")),
            catalog: None,
            schema: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            output_mode: OutputMode::Object,
            high_water_mark: None,
            engine: Engine::Presto,
            request_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_output_mode(mut self, output_mode: OutputMode) -> Self {
        self.output_mode = output_mode;
        self
    }

    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = Some(high_water_mark);
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Per-query overrides for [`Client::execute`](crate::Client::execute).
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub query: String,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub timezone: Option<String>,
    pub session: Option<String>,
    pub output_mode: Option<OutputMode>,
    pub high_water_mark: Option<usize>,
    /// Fetch the info URI once the result set is exhausted.
    pub fetch_info: bool,
    /// Periodic `State` events; on unless disabled.
    pub state_updates: Option<bool>,
}

impl ExecuteOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn output_mode(mut self, output_mode: OutputMode) -> Self {
        self.output_mode = Some(output_mode);
        self
    }

    pub fn high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = Some(high_water_mark);
        self
    }

    pub fn fetch_info(mut self, fetch_info: bool) -> Self {
        self.fetch_info = fetch_info;
        self
    }

    pub fn state_updates(mut self, enabled: bool) -> Self {
        self.state_updates = Some(enabled);
        self
    }
}
