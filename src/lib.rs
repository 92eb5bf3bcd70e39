//! Async client for the Presto (and Trino) HTTP statement protocol.
//!
//! ```no_run
//! use presto_client::{Client, ClientConfig, ExecuteOptions, StatementEvent};
//!
//! # async fn run() -> presto_client::Result<()> {
//! let client = Client::new(
//!     ClientConfig::new("coordinator", 8080)
//!         .with_catalog("tpch")
//!         .with_schema("tiny"),
//! )?;
//!
//! let mut stmt = client.execute(ExecuteOptions::new("SELECT * FROM nation")).await?;
//! while let Some(event) = stmt.next_event().await {
//!     match event {
//!         StatementEvent::Data(row) => println!("{row:?}"),
//!         StatementEvent::Error(err) => return Err(err),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod models;
pub mod statement;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use codec::{JsonCodec, SerdeJsonCodec};
pub use config::{ClientConfig, Engine, ExecuteOptions, TlsConfig, DEFAULT_POLL_INTERVAL};
pub use error::{PrestoError, Result};
pub use models::{
    Column, InfoOutcome, Output, OutputMode, QueryOutcome, QueryResults, QueryState,
    StatementEvent, StatementStats,
};
pub use statement::{CancelHandle, Statement};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
