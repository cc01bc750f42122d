use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures_util::FutureExt;
use lambda_runtime_client::{ClientError, Diagnostic, ResponseWriter, RuntimeClient};
use tracing::{debug, error, trace, Instrument};

use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::error::RuntimeError;
use crate::Error;

/// A handler that receives raw event bytes and streams its response through
/// the writer it is given.
///
/// The handler is moved into the runtime once and re-borrowed mutably for
/// every invocation; the control plane serializes invocations, so `handle`
/// is never called concurrently. Each call must end the response with
/// exactly one of [`ResponseWriter::finish`],
/// [`ResponseWriter::write_and_finish`], or [`ResponseWriter::report_error`].
///
/// ```
/// use bytes::Bytes;
/// use lambda_streaming_runtime::{Context, Error, ResponseWriter, StreamingHandler};
///
/// struct Echo;
///
/// impl StreamingHandler for Echo {
///     async fn handle(
///         &mut self,
///         event: Bytes,
///         mut writer: ResponseWriter<'_>,
///         _context: Context,
///     ) -> Result<(), Error> {
///         writer.write_and_finish(event).await?;
///         Ok(())
///     }
/// }
/// ```
pub trait StreamingHandler {
    /// Handle one invocation.
    fn handle(
        &mut self,
        event: Bytes,
        writer: ResponseWriter<'_>,
        context: Context,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

static RUNTIME_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Releases the process-wide run guard when the runtime exits.
struct StartGuard;

impl StartGuard {
    fn acquire() -> Result<StartGuard, RuntimeError> {
        if RUNTIME_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RuntimeError::RuntimeCanOnlyBeStartedOnce);
        }
        Ok(StartGuard)
    }
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        RUNTIME_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// A runtime bound to an explicit client, for embedding and tests.
///
/// [`run`] and [`run_with_shutdown`] are the usual entry points; they wire
/// the client from the environment and enforce the one-runtime-per-process
/// guard, which this type does not.
pub struct Runtime<H> {
    client: RuntimeClient,
    handler: H,
}

impl<H> Runtime<H>
where
    H: StreamingHandler,
{
    /// Create a runtime that polls `client` and dispatches to `handler`.
    pub fn new(client: RuntimeClient, handler: H) -> Runtime<H> {
        Runtime { client, handler }
    }

    /// Poll for invocations until the control plane connection is lost or
    /// the client is closed. Handler failures are reported to the control
    /// plane and do not stop the loop.
    pub async fn run(self) -> Result<(), Error> {
        run_loop(self.client, self.handler).await
    }
}

/// Start the runtime and begin polling for events on the [Lambda Runtime
/// APIs](https://docs.aws.amazon.com/lambda/latest/dg/runtimes-api.html).
///
/// The control plane endpoint is taken from `AWS_LAMBDA_RUNTIME_API`. When
/// that variable is absent and the `local-server` feature is enabled, an
/// in-process emulator is started instead and invocations can be submitted
/// to its `/invoke` endpoint.
///
/// Only one runtime may be active per process; a second concurrent call
/// fails with [`RuntimeError::RuntimeCanOnlyBeStartedOnce`].
pub async fn run<H>(handler: H) -> Result<(), Error>
where
    H: StreamingHandler,
{
    let _guard = StartGuard::acquire()?;
    let config = RuntimeConfig::from_env()?;
    match config.runtime_api.as_deref() {
        Some(endpoint) => {
            let client = RuntimeClient::new(endpoint)?;
            run_loop(client, handler).await
        }
        None => run_local(config, handler).await,
    }
}

/// Like [`run`], but stops cleanly when `shutdown` resolves.
///
/// Cancelling mid-invocation drops the response stream; the control plane
/// recycles the execution environment in that case.
pub async fn run_with_shutdown<H, S>(handler: H, shutdown: S) -> Result<(), Error>
where
    H: StreamingHandler,
    S: Future<Output = ()>,
{
    let _guard = StartGuard::acquire()?;
    let config = RuntimeConfig::from_env()?;
    let endpoint = config
        .runtime_api
        .as_deref()
        .ok_or(RuntimeError::MissingLambdaRuntimeApiEnvironmentVariable)?;
    let client = RuntimeClient::new(endpoint)?;

    tokio::select! {
        biased;
        _ = shutdown => {
            debug!("shutdown requested, stopping the runtime");
            Ok(())
        }
        res = run_loop(client, handler) => res,
    }
}

#[cfg(feature = "local-server")]
async fn run_local<H>(config: RuntimeConfig, handler: H) -> Result<(), Error>
where
    H: StreamingHandler,
{
    let server = crate::local_server::LocalServer::bind(
        &config.local_host,
        config.local_port,
        &config.invocation_endpoint,
    )
    .await?;
    let client = RuntimeClient::from_addr(server.local_addr());

    // The server loop and the run loop race; whichever finishes first takes
    // the other down with it.
    let result = tokio::select! {
        res = server.serve() => res,
        res = run_loop(client, handler) => res,
    };
    tracing::info!("local lambda emulator shut down");
    result
}

#[cfg(not(feature = "local-server"))]
async fn run_local<H>(_config: RuntimeConfig, _handler: H) -> Result<(), Error>
where
    H: StreamingHandler,
{
    Err(RuntimeError::MissingLambdaRuntimeApiEnvironmentVariable.into())
}

/// Dispatches one invocation to the handler and returns its outcome.
///
/// Extracted into its own `async fn` so the `writer`'s mutable borrow of the
/// client is fully released on return, letting the caller use the client
/// again immediately afterwards.
async fn dispatch_invocation<H>(
    handler: &mut H,
    event: Bytes,
    writer: ResponseWriter<'_>,
    context: Context,
    request_span: tracing::Span,
) -> Result<Result<(), Error>, Box<dyn std::any::Any + Send>>
where
    H: StreamingHandler,
{
    let task = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event, writer, context)));
    match task {
        Ok(task) => {
            AssertUnwindSafe(task)
                .catch_unwind()
                .instrument(request_span)
                .await
        }
        Err(err) => Err(err),
    }
}

async fn run_loop<H>(mut client: RuntimeClient, mut handler: H) -> Result<(), Error>
where
    H: StreamingHandler,
{
    loop {
        trace!("waiting for the next invocation (run loop)");
        let (invocation, writer) = match client.next_invocation().await {
            Ok(next) => next,
            Err(ClientError::ConnectionToControlPlaneLost) => {
                debug!("connection to the control plane was lost, leaving the run loop");
                return Ok(());
            }
            Err(ClientError::ClosingRuntimeClient) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let context = match Context::try_from(&invocation.metadata) {
            Ok(context) => context,
            Err(err) => {
                let mut writer = writer;
                error!(request_id = %invocation.metadata.request_id, "invalid invocation metadata: {err}");
                writer.report_error(Diagnostic::from(err)).await?;
                continue;
            }
        };
        let request_id = invocation.metadata.request_id;
        let request_span = context.request_span();

        trace!("dispatching event to the handler (run loop)");
        // Catches panics outside and inside of the returned future
        let outcome = dispatch_invocation(
            &mut handler,
            invocation.event,
            writer,
            context,
            request_span,
        )
        .await;

        let failure = match outcome {
            Ok(Ok(())) => {
                if client.is_invocation_complete() {
                    trace!("handler finished its response (run loop)");
                    None
                } else {
                    error!(request_id = %request_id, "handler returned without finishing the response");
                    Some(Diagnostic::new(
                        "Runtime.UnfinishedResponse",
                        "the handler returned without finishing the response",
                    ))
                }
            }
            Ok(Err(err)) => {
                error!("{err:?}");
                if client.is_invocation_complete() {
                    debug!("handler failed after its response was sent");
                    None
                } else {
                    Some(Diagnostic::from(err))
                }
            }
            Err(payload) => {
                error!("{payload:?}");
                let error_type = type_name_of_val(&payload);
                let error_message = if let Some(msg) = payload.downcast_ref::<&str>() {
                    format!("Lambda panicked: {msg}")
                } else if let Some(msg) = payload.downcast_ref::<String>() {
                    format!("Lambda panicked: {msg}")
                } else {
                    "Lambda panicked".to_string()
                };
                if client.is_invocation_complete() {
                    None
                } else {
                    Some(Diagnostic::new(error_type, error_message))
                }
            }
        };

        if let Some(diagnostic) = failure {
            match client.report_invocation_error(diagnostic).await {
                Ok(()) => {}
                Err(ClientError::ConnectionToControlPlaneLost) => {
                    debug!("connection lost while reporting a handler failure");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn type_name_of_val<T>(_: &T) -> &'static str {
    std::any::type_name::<T>()
}
