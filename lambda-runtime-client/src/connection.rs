//! A single persistent HTTP/1.1 connection to the control plane.
//!
//! The control plane serializes invocations, so the connection carries at
//! most one request at a time. The socket is opened against a literal IP
//! address; the execution environment publishes the endpoint that way and
//! name resolution would only add failure modes.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use http::{header::CONNECTION, Request, Response, Version};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::body::Body;
use crate::error::ClientError;

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// A response that has been requested but not yet received, used while a
/// streamed body is still being written.
pub(crate) type InFlight =
    Pin<Box<dyn Future<Output = Result<Response<Incoming>, hyper::Error>> + Send>>;

pub(crate) struct Connection {
    sender: http1::SendRequest<Body>,
    task: JoinHandle<()>,
    going_away: bool,
}

impl Connection {
    /// Open a connection to `addr` and start driving it on a background task.
    pub(crate) async fn open(addr: SocketAddr) -> Result<Connection, ClientError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::ConnectTimeout)??;
        stream.set_nodelay(true)?;

        let (sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|_| ClientError::ConnectionToControlPlaneLost)?;
        let task = tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!(error = %err, "control plane connection terminated");
            }
        });
        debug!(%addr, "connected to the control plane");

        Ok(Connection {
            sender,
            task,
            going_away: false,
        })
    }

    /// Whether the connection can still accept requests.
    pub(crate) fn is_open(&self) -> bool {
        !self.going_away && !self.sender.is_closed()
    }

    /// Remember that the peer asked for this connection to be torn down once
    /// the in-flight exchange completes.
    pub(crate) fn mark_going_away(&mut self) {
        if !self.going_away {
            debug!("control plane signalled connection close");
            self.going_away = true;
        }
    }

    /// Send a request and wait for the response head.
    pub(crate) async fn send(
        &mut self,
        req: Request<Body>,
    ) -> Result<Response<Incoming>, ClientError> {
        let in_flight = self.start_send(req).await?;
        in_flight
            .await
            .map_err(|_| ClientError::ConnectionToControlPlaneLost)
    }

    /// Issue a request and return the pending response without awaiting it.
    ///
    /// Used for streamed bodies, where the control plane only responds once
    /// the body has been written to completion.
    pub(crate) async fn start_send(
        &mut self,
        req: Request<Body>,
    ) -> Result<InFlight, ClientError> {
        if self.going_away {
            return Err(ClientError::ConnectionToControlPlaneGoingAway);
        }
        self.sender
            .ready()
            .await
            .map_err(|_| ClientError::ConnectionToControlPlaneLost)?;
        Ok(Box::pin(self.sender.send_request(req)))
    }

    /// Shut the connection down and wait for the background task to finish.
    pub(crate) async fn close(self) {
        drop(self.sender);
        let _ = self.task.await;
    }
}

/// Whether a response requires the connection to be torn down afterwards:
/// an explicit `Connection: close` or a peer that does not speak HTTP/1.1.
pub(crate) fn peer_signalled_close<B>(res: &Response<B>) -> bool {
    res.version() != Version::HTTP_11
        || res
            .headers()
            .get(CONNECTION)
            .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"close"))
}
