use http::StatusCode;

/// Boxed error type shared across the runtime crates.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the runtime client and its response writer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The `/invocation/next` response lacked a required metadata header.
    /// Recorded as the cause of a parse failure; callers of
    /// `next_invocation` observe [`InvocationMissingMetadata`][Self::InvocationMissingMetadata]
    /// instead.
    #[error("next invocation response is missing the `{0}` header")]
    NextInvocationMissingHeader(&'static str),

    /// The `/invocation/next` response headers could not be interpreted as
    /// invocation metadata. This is the error a pending `next_invocation`
    /// fails with for any metadata parse failure.
    #[error("unable to parse invocation metadata from the response headers")]
    InvocationMissingMetadata,

    /// The control plane answered with something other than the status the
    /// protocol requires for the request.
    #[error("unexpected status code {0} from the runtime API")]
    UnexpectedStatusCodeForRequest(StatusCode),

    /// The TCP connection to the control plane was lost mid-exchange.
    #[error("connection to the control plane was lost")]
    ConnectionToControlPlaneLost,

    /// The control plane asked for the connection to be torn down; no new
    /// requests are accepted on it.
    #[error("connection to the control plane is going away")]
    ConnectionToControlPlaneGoingAway,

    /// The client has been closed.
    #[error("runtime client is closing")]
    ClosingRuntimeClient,

    /// Establishing the TCP connection did not complete in time.
    #[error("timed out connecting to the control plane")]
    ConnectTimeout,

    /// The configured endpoint does not contain a valid port number.
    #[error("invalid port in runtime API endpoint `{0}`")]
    InvalidPort(String),

    /// The configured endpoint is not an `ip:port` pair.
    #[error("invalid runtime API endpoint `{0}`, expected `ip:port`")]
    InvalidEndpoint(String),

    /// A control-plane response body exceeded the invocation payload limit.
    #[error("control plane response body exceeds the 6 MiB payload limit")]
    ResponseBodyTooLarge,

    /// A writer method was called after the response had been finished.
    #[error("cannot write, the response has already been finished")]
    WriteAfterFinishHasBeenSent,

    /// `finish` was called on an already finished response.
    #[error("cannot finish, the response has already been finished")]
    FinishAfterFinishHasBeenSent,

    /// A request could not be constructed.
    #[error(transparent)]
    Http(#[from] http::Error),

    /// A body could not be serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Socket-level failure while connecting.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
