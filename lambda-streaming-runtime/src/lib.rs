#![deny(clippy::all, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]
#![warn(missing_docs, nonstandard_style, rust_2018_idioms)]

//! A Lambda runtime that hands each invocation's raw event bytes to a
//! [`StreamingHandler`] together with a [`ResponseWriter`] for the response.
//!
//! The handler may answer buffered in one call or stream the response in
//! chunks, optionally preceded by a status-and-headers prelude. Without the
//! `AWS_LAMBDA_RUNTIME_API` environment variable (that is, outside an AWS
//! execution environment) and with the `local-server` feature enabled,
//! [`run`] starts an in-process emulator of the control plane so handlers
//! can be exercised with plain HTTP requests.
//!
//! ```no_run
//! use bytes::Bytes;
//! use lambda_streaming_runtime::{run, Context, Error, ResponseWriter, StreamingHandler};
//!
//! struct Echo;
//!
//! impl StreamingHandler for Echo {
//!     async fn handle(
//!         &mut self,
//!         event: Bytes,
//!         mut writer: ResponseWriter<'_>,
//!         _context: Context,
//!     ) -> Result<(), Error> {
//!         writer.write_and_finish(event).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     run(Echo).await
//! }
//! ```

mod clock;
mod config;
mod context;
mod error;
#[cfg(feature = "local-server")]
pub mod local_server;
mod runtime;
#[cfg(feature = "tracing")]
pub mod tracing;

pub use clock::{sleep_until, Timestamp, MAX_EXECUTION_TIME};
pub use context::{ClientApplication, ClientContext, CognitoIdentity, Context};
pub use error::RuntimeError;
pub use lambda_runtime_client::{
    BoxError, ClientError, Diagnostic, ResponsePrelude, ResponseWriter, RuntimeClient,
};
pub use runtime::{run, run_with_shutdown, Runtime, StreamingHandler};

/// Error type that handlers may return.
pub type Error = BoxError;
