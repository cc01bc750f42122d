//! In-process emulator of the Lambda control plane.
//!
//! The emulator speaks the same runtime API the AWS endpoint does, against
//! the same client, plus one client-facing endpoint (`/invoke` by default)
//! that accepts events over plain HTTP and returns the handler's response.
//! It exists for local runs and tests only and is never started when
//! `AWS_LAMBDA_RUNTIME_API` is set.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use lambda_runtime_client::invocation::{
    HEADER_DEADLINE_MS, HEADER_FUNCTION_ARN, HEADER_REQUEST_ID, HEADER_TENANT_ID, HEADER_TRACE_ID,
};
use lambda_runtime_client::xray;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::Error;

mod pool;
use pool::Pool;

const LOCAL_FUNCTION_ARN: &str = "arn:aws:lambda:us-east-1:012345678912:function:local";
const ERROR_TYPE_HEADER: &str = "lambda-runtime-function-error-type";
const ERROR_BODY_TRAILER: &str = "lambda-runtime-function-error-body";

/// An event submitted through the invocation endpoint.
struct InvocationRecord {
    body: Bytes,
    tenant_id: Option<String>,
}

/// One piece of the runtime's answer to an invocation.
enum ResponsePart {
    Body(Bytes),
    Finished,
    Error(Bytes),
}

struct ServerState {
    invocations: Pool<InvocationRecord>,
    responses: Pool<ResponsePart>,
    invocation_endpoint: String,
}

/// The emulator server, bound to a loopback address.
pub struct LocalServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<ServerState>,
}

impl LocalServer {
    /// Bind the emulator to `host:port`. Port `0` picks an ephemeral port.
    pub async fn bind(
        host: &str,
        port: u16,
        invocation_endpoint: &str,
    ) -> Result<LocalServer, Error> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, endpoint = %invocation_endpoint, "local lambda emulator listening");
        Ok(LocalServer {
            listener,
            local_addr,
            state: Arc::new(ServerState {
                invocations: Pool::new(),
                responses: Pool::new(),
                invocation_endpoint: invocation_endpoint.to_string(),
            }),
        })
    }

    /// The address the emulator is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and serve connections until the future is dropped.
    pub async fn serve(self) -> Result<(), Error> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!(%peer, "accepted connection");
            let state = self.state.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| handle(state.clone(), req));
                let conn = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service);
                if let Err(err) = conn.await {
                    debug!(error = %err, "emulator connection ended");
                }
            });
        }
    }
}

async fn handle(
    state: Arc<ServerState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Error> {
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').collect();
    match (req.method(), &segments[1..]) {
        (&Method::GET, ["2018-06-01", "runtime", "invocation", "next"]) => {
            next_invocation(&state).await
        }
        (&Method::POST, ["2018-06-01", "runtime", "invocation", id, "response"]) => {
            let id = id.to_string();
            invocation_response(&state, id, req).await
        }
        (&Method::POST, ["2018-06-01", "runtime", "invocation", id, "error"]) => {
            let id = id.to_string();
            invocation_error(&state, id, req).await
        }
        (&Method::POST, ["2018-06-01", "runtime", "init", "error"]) => init_error(req).await,
        (&Method::POST, _) if path == state.invocation_endpoint => invoke(&state, req).await,
        _ => {
            warn!(%path, "unexpected request");
            empty_response(StatusCode::NOT_FOUND)
        }
    }
}

/// `GET /2018-06-01/runtime/invocation/next`: block until an event has been
/// submitted, then hand it to the runtime with the standard headers.
async fn next_invocation(state: &ServerState) -> Result<Response<Full<Bytes>>, Error> {
    let (request_id, record) = state.invocations.next().await?;
    debug!(%request_id, "delivering invocation to the runtime");

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(HEADER_REQUEST_ID, &request_id)
        .header(HEADER_DEADLINE_MS, i64::MAX)
        .header(HEADER_FUNCTION_ARN, LOCAL_FUNCTION_ARN)
        .header(
            HEADER_TRACE_ID,
            format!("Root={};Sampled=0", xray::generate_trace_id()),
        );
    if let Some(tenant_id) = record.tenant_id {
        builder = builder.header(HEADER_TENANT_ID, tenant_id);
    }
    Ok(builder.body(Full::from(record.body))?)
}

/// `POST /2018-06-01/runtime/invocation/<id>/response`: relay the response
/// to the waiting invoker. Chunked bodies are relayed part by part as they
/// arrive; a final marker signals completion.
async fn invocation_response(
    state: &ServerState,
    request_id: String,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Error> {
    let mut body = req.into_body();
    let mut failed = false;

    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%request_id, error = %err, "response stream aborted");
                failed = true;
                break;
            }
        };
        match frame.into_data() {
            Ok(data) => state.responses.push(request_id.clone(), ResponsePart::Body(data)),
            Err(frame) => {
                if let Ok(trailers) = frame.into_trailers() {
                    // a mid-stream failure arrives as error trailers, the
                    // diagnostic body base64-encoded
                    if trailers.contains_key(ERROR_TYPE_HEADER) {
                        let body = trailers
                            .get(ERROR_BODY_TRAILER)
                            .map(|value| decode_error_body(value.as_bytes()))
                            .unwrap_or_default();
                        state.responses.push(request_id.clone(), ResponsePart::Error(body));
                        failed = true;
                    }
                }
            }
        }
    }

    if !failed {
        state.responses.push(request_id, ResponsePart::Finished);
    }
    empty_response(StatusCode::ACCEPTED)
}

/// `POST /2018-06-01/runtime/invocation/<id>/error`: relay the error body to
/// the waiting invoker.
async fn invocation_error(
    state: &ServerState,
    request_id: String,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Error> {
    let body = req.into_body().collect().await?.to_bytes();
    debug!(%request_id, "runtime reported an invocation error");
    state.responses.push(request_id, ResponsePart::Error(body));
    empty_response(StatusCode::ACCEPTED)
}

/// `POST /2018-06-01/runtime/init/error`: the runtime failed before its
/// first invocation; there is no invoker to notify.
async fn init_error(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Error> {
    let body = req.into_body().collect().await?.to_bytes();
    warn!(
        body = %String::from_utf8_lossy(&body),
        "runtime reported an initialization error"
    );
    empty_response(StatusCode::ACCEPTED)
}

/// The client-facing endpoint: allocate a request id, queue the event, and
/// wait for the runtime's response parts for that id.
async fn invoke(
    state: &ServerState,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Error> {
    let tenant_id = query_param(req.uri().query(), "tenant");
    let body = req.into_body().collect().await?.to_bytes();

    let request_id = next_request_id();
    debug!(%request_id, "accepted invocation");
    state
        .invocations
        .push(request_id.clone(), InvocationRecord { body, tenant_id });

    let mut response_body = BytesMut::new();
    loop {
        match state.responses.next_for(&request_id).await? {
            ResponsePart::Body(chunk) => response_body.extend_from_slice(&chunk),
            ResponsePart::Finished => {
                return Ok(Response::builder()
                    .status(StatusCode::OK)
                    .body(Full::from(response_body.freeze()))?);
            }
            ResponsePart::Error(body) => {
                return Ok(Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Full::from(body))?);
            }
        }
    }
}

fn decode_error_body(encoded: &[u8]) -> Bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    match STANDARD.decode(encoded) {
        Ok(decoded) => Bytes::from(decoded),
        Err(_) => Bytes::copy_from_slice(encoded),
    }
}

fn empty_response(status: StatusCode) -> Result<Response<Full<Bytes>>, Error> {
    Ok(Response::builder().status(status).body(Full::default())?)
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Request ids are nanosecond timestamps, bumped when the clock has not
/// advanced so they stay strictly monotonic.
static LAST_REQUEST_ID: AtomicU64 = AtomicU64::new(0);

fn next_request_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    loop {
        let last = LAST_REQUEST_ID.load(Ordering::SeqCst);
        let candidate = now.max(last + 1);
        if LAST_REQUEST_ID
            .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return candidate.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_strictly_monotonic() {
        let first: u64 = next_request_id().parse().unwrap();
        let second: u64 = next_request_id().parse().unwrap();
        let third: u64 = next_request_id().parse().unwrap();
        assert!(first < second);
        assert!(second < third);
    }

    #[test]
    fn query_params_are_extracted() {
        assert_eq!(
            query_param(Some("tenant=alice&x=1"), "tenant").as_deref(),
            Some("alice")
        );
        assert_eq!(query_param(Some("x=1"), "tenant"), None);
        assert_eq!(query_param(None, "tenant"), None);
    }

    #[tokio::test]
    async fn binds_to_an_ephemeral_port() {
        let server = LocalServer::bind("127.0.0.1", 0, "/invoke").await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }
}
