use std::env;

use lambda_runtime_client::ClientError;

use crate::error::RuntimeError;

const DEFAULT_LOCAL_HOST: &str = "127.0.0.1";
const DEFAULT_LOCAL_PORT: u16 = 7000;
const DEFAULT_INVOCATION_ENDPOINT: &str = "/invoke";

/// Runtime configuration read from the environment at startup.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    /// The control plane endpoint, absent outside of an AWS environment.
    pub(crate) runtime_api: Option<String>,
    /// Address the local emulator binds to when the control plane is absent.
    pub(crate) local_host: String,
    pub(crate) local_port: u16,
    /// Path the local emulator accepts invocations on.
    pub(crate) invocation_endpoint: String,
}

impl RuntimeConfig {
    pub(crate) fn from_env() -> Result<RuntimeConfig, RuntimeError> {
        let local_port = match env::var("LOCAL_LAMBDA_PORT") {
            Ok(value) => value
                .parse()
                .map_err(|_| RuntimeError::Client(ClientError::InvalidPort(value)))?,
            Err(_) => DEFAULT_LOCAL_PORT,
        };

        Ok(RuntimeConfig {
            runtime_api: env::var("AWS_LAMBDA_RUNTIME_API").ok(),
            local_host: env::var("LOCAL_LAMBDA_HOST").unwrap_or_else(|_| DEFAULT_LOCAL_HOST.into()),
            local_port,
            invocation_endpoint: env::var("LOCAL_LAMBDA_INVOCATION_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_INVOCATION_ENDPOINT.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        // the local emulator variables are not set in the test environment
        let config = RuntimeConfig::from_env().unwrap();
        assert_eq!(config.local_host, "127.0.0.1");
        assert_eq!(config.local_port, 7000);
        assert_eq!(config.invocation_endpoint, "/invoke");
    }
}
