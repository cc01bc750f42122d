use lambda_runtime_client::ClientError;

/// Errors produced by the runtime itself, outside of user handlers.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// `AWS_LAMBDA_RUNTIME_API` is not set and no local server is available
    /// to stand in for it.
    #[error("the AWS_LAMBDA_RUNTIME_API environment variable is not set")]
    MissingLambdaRuntimeApiEnvironmentVariable,

    /// A runtime is already running in this process.
    #[error("a lambda runtime is already running in this process")]
    RuntimeCanOnlyBeStartedOnce,

    /// The control-plane client failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}
