#![deny(clippy::all, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]
#![warn(missing_docs, nonstandard_style, rust_2018_idioms)]

//! Client for the AWS Lambda Runtime API.
//!
//! The client owns one persistent HTTP/1.1 connection to the control plane
//! and drives the invocation lifecycle over it: fetch the next event, hand a
//! [`ResponseWriter`] to the caller, and deliver the buffered or streamed
//! response (or an error report) back. The control plane serves one
//! invocation at a time per execution environment, so the client never has
//! two requests in flight.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use http::header::HeaderName;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use tracing::{debug, error, trace};

pub mod body;
mod connection;
mod diagnostic;
mod error;
pub mod invocation;
mod requests;
mod writer;
pub mod xray;

pub use diagnostic::Diagnostic;
pub use error::{BoxError, ClientError};
pub use invocation::{Invocation, InvocationMetadata};
pub use writer::{ResponsePrelude, ResponseWriter};

use body::Body;
use connection::{Connection, InFlight};
use requests::IntoRequest;

/// Upper bound for a response that is sent buffered with a `Content-Length`.
/// Anything at least this large is streamed with chunked transfer encoding.
pub const MAX_BUFFERED_RESPONSE_BYTES: usize = 6_000_000;

/// Cap on collected control-plane response bodies, matching the service's
/// invocation payload limit.
const MAX_RESPONSE_BODY_BYTES: usize = 6 * 1024 * 1024;

/// Where the client is in the lifecycle of one invocation.
enum InvocationState {
    Idle {
        #[allow(dead_code)]
        previous_request_id: Option<String>,
    },
    WaitingForNext,
    WaitingForResponse {
        request_id: String,
    },
    SendingResponse {
        request_id: String,
        body_tx: body::Sender,
        in_flight: InFlight,
    },
    SentResponse {
        request_id: String,
    },
}

impl fmt::Debug for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationState::Idle { .. } => f.write_str("Idle"),
            InvocationState::WaitingForNext => f.write_str("WaitingForNext"),
            InvocationState::WaitingForResponse { request_id } => {
                write!(f, "WaitingForResponse({request_id})")
            }
            InvocationState::SendingResponse { request_id, .. } => {
                write!(f, "SendingResponse({request_id})")
            }
            InvocationState::SentResponse { request_id } => {
                write!(f, "SentResponse({request_id})")
            }
        }
    }
}

/// Client that speaks the runtime API over one exclusive connection.
///
/// The connection is established lazily on the first
/// [`next_invocation`](Self::next_invocation) and re-established when the
/// control plane drops it or asks for it to be closed.
pub struct RuntimeClient {
    addr: SocketAddr,
    connection: Option<Connection>,
    state: InvocationState,
    closed: bool,
}

impl RuntimeClient {
    /// Create a client for `endpoint`, an `ip:port` pair as published in the
    /// `AWS_LAMBDA_RUNTIME_API` environment variable.
    pub fn new(endpoint: &str) -> Result<RuntimeClient, ClientError> {
        Ok(RuntimeClient::from_addr(parse_endpoint(endpoint)?))
    }

    /// Create a client for an already resolved control plane address.
    pub fn from_addr(addr: SocketAddr) -> RuntimeClient {
        RuntimeClient {
            addr,
            connection: None,
            state: InvocationState::Idle {
                previous_request_id: None,
            },
            closed: false,
        }
    }

    /// Fetch the next invocation, blocking until the control plane delivers
    /// one, and return it together with the writer for its response.
    ///
    /// # Panics
    ///
    /// Panics when called while a previous invocation is still in flight;
    /// that is a bug in the caller, not a recoverable condition.
    pub async fn next_invocation(
        &mut self,
    ) -> Result<(Invocation, ResponseWriter<'_>), ClientError> {
        if !matches!(self.state, InvocationState::Idle { .. }) {
            panic!(
                "next_invocation is only valid while idle, current state: {:?}",
                self.state
            );
        }
        self.state = InvocationState::WaitingForNext;

        match self.fetch_next().await {
            Ok(invocation) => {
                trace!(request_id = %invocation.metadata.request_id, "invocation received");
                self.state = InvocationState::WaitingForResponse {
                    request_id: invocation.metadata.request_id.clone(),
                };
                Ok((invocation, ResponseWriter::new(self)))
            }
            Err(err) => {
                self.state = InvocationState::Idle {
                    previous_request_id: None,
                };
                Err(err)
            }
        }
    }

    async fn fetch_next(&mut self) -> Result<Invocation, ClientError> {
        let req = requests::NextEventRequest.into_req()?;
        let res = {
            let conn = self.ensure_connection().await?;
            conn.send(req).await?
        };

        let close = connection::peer_signalled_close(&res);
        let status = res.status();
        let (parts, body) = res.into_parts();

        if status != StatusCode::OK {
            let _ = Limited::new(body, MAX_RESPONSE_BODY_BYTES).collect().await;
            if close {
                self.drop_connection();
            }
            return Err(ClientError::UnexpectedStatusCodeForRequest(status));
        }

        let metadata = match InvocationMetadata::from_headers(&parts.headers) {
            Ok(metadata) => metadata,
            Err(err) => {
                // a next response without usable metadata poisons the
                // exchange; the caller always sees the same error, the
                // header-level cause is only recorded here
                debug!(error = %err, "failed to parse invocation metadata");
                self.drop_connection();
                return Err(ClientError::InvocationMissingMetadata);
            }
        };

        let event = collect_event_body(body).await?;
        if close {
            self.drop_connection();
        }
        Ok(Invocation { metadata, event })
    }

    pub(crate) async fn write_response_part(
        &mut self,
        bytes: Bytes,
        has_custom_headers: bool,
    ) -> Result<(), ClientError> {
        match self.take_state() {
            InvocationState::WaitingForResponse { request_id } => {
                let (mut body_tx, in_flight) =
                    self.start_streaming(&request_id, has_custom_headers).await?;
                body_tx
                    .send_data(bytes)
                    .await
                    .map_err(|_| ClientError::ConnectionToControlPlaneLost)?;
                self.state = InvocationState::SendingResponse {
                    request_id,
                    body_tx,
                    in_flight,
                };
                Ok(())
            }
            InvocationState::SendingResponse {
                request_id,
                mut body_tx,
                in_flight,
            } => {
                assert!(
                    !has_custom_headers,
                    "status and headers must be written before any response body"
                );
                let sent = body_tx.send_data(bytes).await;
                self.state = InvocationState::SendingResponse {
                    request_id,
                    body_tx,
                    in_flight,
                };
                sent.map_err(|_| ClientError::ConnectionToControlPlaneLost)
            }
            state @ (InvocationState::Idle { .. } | InvocationState::SentResponse { .. }) => {
                self.state = state;
                Err(ClientError::WriteAfterFinishHasBeenSent)
            }
            InvocationState::WaitingForNext => {
                panic!("cannot write a response while waiting for the next invocation")
            }
        }
    }

    pub(crate) async fn finish_response(&mut self, last: Option<Bytes>) -> Result<(), ClientError> {
        match self.take_state() {
            InvocationState::WaitingForResponse { request_id } => {
                let body = last.unwrap_or_default();
                if body.len() < MAX_BUFFERED_RESPONSE_BYTES {
                    let req = requests::EventCompletionRequest {
                        request_id: &request_id,
                        body,
                    }
                    .into_req()?;
                    let res = {
                        let conn = self.ensure_connection().await?;
                        conn.send(req).await?
                    };
                    self.finish_exchange(request_id, res).await
                } else {
                    let (mut body_tx, in_flight) = self.start_streaming(&request_id, false).await?;
                    body_tx
                        .send_data(body)
                        .await
                        .map_err(|_| ClientError::ConnectionToControlPlaneLost)?;
                    drop(body_tx);
                    let res = in_flight
                        .await
                        .map_err(|_| ClientError::ConnectionToControlPlaneLost)?;
                    self.finish_exchange(request_id, res).await
                }
            }
            InvocationState::SendingResponse {
                request_id,
                mut body_tx,
                in_flight,
            } => {
                if let Some(bytes) = last {
                    body_tx
                        .send_data(bytes)
                        .await
                        .map_err(|_| ClientError::ConnectionToControlPlaneLost)?;
                }
                drop(body_tx);
                let res = in_flight
                    .await
                    .map_err(|_| ClientError::ConnectionToControlPlaneLost)?;
                self.finish_exchange(request_id, res).await
            }
            state @ (InvocationState::Idle { .. } | InvocationState::SentResponse { .. }) => {
                self.state = state;
                Err(ClientError::FinishAfterFinishHasBeenSent)
            }
            InvocationState::WaitingForNext => {
                panic!("cannot finish a response while waiting for the next invocation")
            }
        }
    }

    /// Report a failure for the in-flight invocation.
    ///
    /// Routed through the [`ResponseWriter`] in the common case; exposed so a
    /// run loop can report an error once the writer has been consumed by the
    /// handler. Reporting after the response has been sent only logs.
    pub async fn report_invocation_error(
        &mut self,
        diagnostic: Diagnostic,
    ) -> Result<(), ClientError> {
        match self.take_state() {
            InvocationState::WaitingForResponse { request_id } => {
                let req = requests::EventErrorRequest {
                    request_id: &request_id,
                    diagnostic,
                }
                .into_req()?;
                let res = {
                    let conn = self.ensure_connection().await?;
                    conn.send(req).await?
                };
                self.finish_exchange(request_id, res).await
            }
            InvocationState::SendingResponse {
                request_id,
                mut body_tx,
                in_flight,
            } => {
                let trailers = streaming_error_trailers(&diagnostic)?;
                body_tx
                    .send_trailers(trailers)
                    .map_err(|_| ClientError::ConnectionToControlPlaneLost)?;
                drop(body_tx);
                let res = in_flight
                    .await
                    .map_err(|_| ClientError::ConnectionToControlPlaneLost)?;
                self.finish_exchange(request_id, res).await
            }
            state @ (InvocationState::Idle { .. } | InvocationState::SentResponse { .. }) => {
                error!(
                    error_message = %diagnostic.error_message,
                    "cannot report the error, the response has already been sent"
                );
                self.state = state;
                Ok(())
            }
            InvocationState::WaitingForNext => {
                panic!("cannot report an invocation error while waiting for the next invocation")
            }
        }
    }

    /// Report a failure that happened before the first invocation was
    /// fetched, e.g. while constructing the handler.
    pub async fn report_initialization_error(
        &mut self,
        diagnostic: Diagnostic,
    ) -> Result<(), ClientError> {
        let req = requests::InitErrorRequest { diagnostic }.into_req()?;
        let res = {
            let conn = self.ensure_connection().await?;
            conn.send(req).await?
        };
        let status = res.status();
        let _ = res.into_body().collect().await;
        if status == StatusCode::ACCEPTED {
            Ok(())
        } else {
            Err(ClientError::UnexpectedStatusCodeForRequest(status))
        }
    }

    /// Whether the current invocation has been answered, either with a
    /// finished response or an error report.
    pub fn is_invocation_complete(&self) -> bool {
        matches!(self.state, InvocationState::Idle { .. })
    }

    /// Close the client. Idempotent; pending operations fail with
    /// [`ClientError::ClosingRuntimeClient`], and the call returns once the
    /// connection has fully shut down.
    pub async fn close(&mut self) {
        self.closed = true;
        if let Some(conn) = self.connection.take() {
            conn.close().await;
        }
        debug!("runtime client closed");
    }

    fn take_state(&mut self) -> InvocationState {
        std::mem::replace(
            &mut self.state,
            InvocationState::Idle {
                previous_request_id: None,
            },
        )
    }

    async fn ensure_connection(&mut self) -> Result<&mut Connection, ClientError> {
        if self.closed {
            return Err(ClientError::ClosingRuntimeClient);
        }
        let needs_connect = match &self.connection {
            Some(conn) => !conn.is_open(),
            None => true,
        };
        if needs_connect {
            self.connection = Some(Connection::open(self.addr).await?);
        }
        match self.connection.as_mut() {
            Some(conn) => Ok(conn),
            None => unreachable!("connection was just established"),
        }
    }

    async fn start_streaming(
        &mut self,
        request_id: &str,
        has_custom_headers: bool,
    ) -> Result<(body::Sender, InFlight), ClientError> {
        let (body_tx, body) = Body::channel();
        let req = requests::StreamingResponseRequest {
            request_id,
            has_custom_headers,
            body,
        }
        .into_req()?;
        let conn = self.ensure_connection().await?;
        let in_flight = conn.start_send(req).await?;
        Ok((body_tx, in_flight))
    }

    /// Consume the response to a completed exchange: drain its body, honor
    /// close signals, and verify the control plane accepted it.
    async fn finish_exchange(
        &mut self,
        request_id: String,
        res: Response<Incoming>,
    ) -> Result<(), ClientError> {
        self.state = InvocationState::SentResponse {
            request_id: request_id.clone(),
        };
        let close = connection::peer_signalled_close(&res);
        let status = res.status();
        let _ = res.into_body().collect().await;

        if close {
            if let Some(conn) = &mut self.connection {
                conn.mark_going_away();
            }
        }
        if self.connection.as_ref().is_some_and(|conn| !conn.is_open()) {
            self.drop_connection();
        }

        self.state = InvocationState::Idle {
            previous_request_id: Some(request_id),
        };
        if status == StatusCode::ACCEPTED {
            Ok(())
        } else {
            Err(ClientError::UnexpectedStatusCodeForRequest(status))
        }
    }

    fn drop_connection(&mut self) {
        if self.connection.take().is_some() {
            debug!("dropping control plane connection");
        }
    }
}

impl fmt::Debug for RuntimeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeClient")
            .field("addr", &self.addr)
            .field("state", &self.state)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

async fn collect_event_body(body: Incoming) -> Result<Bytes, ClientError> {
    match Limited::new(body, MAX_RESPONSE_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.is::<http_body_util::LengthLimitError>() => {
            Err(ClientError::ResponseBodyTooLarge)
        }
        Err(_) => Err(ClientError::ConnectionToControlPlaneLost),
    }
}

fn streaming_error_trailers(diagnostic: &Diagnostic) -> Result<HeaderMap, ClientError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let mut trailers = HeaderMap::new();
    trailers.insert(
        HeaderName::from_static(requests::ERROR_TYPE_HEADER),
        HeaderValue::from_str(&diagnostic.error_type)
            .unwrap_or_else(|_| HeaderValue::from_static("Unhandled")),
    );
    let encoded = STANDARD.encode(serde_json::to_vec(diagnostic)?);
    trailers.insert(
        HeaderName::from_static(requests::ERROR_BODY_TRAILER),
        HeaderValue::from_str(&encoded).map_err(http::Error::from)?,
    );
    Ok(trailers)
}

fn parse_endpoint(endpoint: &str) -> Result<SocketAddr, ClientError> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| ClientError::InvalidEndpoint(endpoint.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ClientError::InvalidPort(endpoint.to_string()))?;
    let ip: IpAddr = host
        .parse()
        .map_err(|_| ClientError::InvalidEndpoint(endpoint.to_string()))?;
    Ok(SocketAddr::new(ip, port))
}
