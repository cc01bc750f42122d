use std::collections::HashMap;

use lambda_runtime_client::{BoxError, InvocationMetadata};
use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Client context sent by the AWS Mobile SDK.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct ClientContext {
    /// Information about the mobile application invoking the function.
    #[serde(default)]
    pub client: ClientApplication,
    /// Custom properties attached to the mobile event context.
    #[serde(default)]
    pub custom: HashMap<String, String>,
    /// Environment settings from the mobile client.
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// AWS Mobile SDK client fields.
#[derive(Serialize, Deserialize, Default, Clone, Debug, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientApplication {
    /// The mobile app installation id.
    pub installation_id: String,
    /// The app title as registered with AWS' mobile services.
    pub app_title: String,
    /// The version name of the application.
    pub app_version_name: String,
    /// The app version code.
    pub app_version_code: String,
    /// The package name of the mobile application invoking the function.
    pub app_package_name: String,
}

/// Cognito identity information sent with the event.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct CognitoIdentity {
    /// The unique identity id for the Cognito credentials invoking the function.
    pub identity_id: String,
    /// The identity pool id the caller is "registered" with.
    pub identity_pool_id: String,
}

/// The Lambda function execution context for one invocation, populated from
/// the headers returned by the poll request to the Runtime APIs.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct Context {
    /// The AWS request id generated by the Lambda service.
    pub request_id: String,
    /// The wall-clock deadline for the current invocation.
    pub deadline: Timestamp,
    /// The ARN of the Lambda function being invoked.
    pub invoked_function_arn: String,
    /// The X-Ray trace id for the current invocation.
    pub xray_trace_id: String,
    /// The tenant id of the invocation, when multi-tenancy is configured.
    pub tenant_id: Option<String>,
    /// The client context object sent by the AWS mobile SDK.
    pub client_context: Option<ClientContext>,
    /// The Cognito identity that invoked the function.
    pub cognito_identity: Option<CognitoIdentity>,
}

impl TryFrom<&InvocationMetadata> for Context {
    type Error = BoxError;

    fn try_from(metadata: &InvocationMetadata) -> Result<Context, Self::Error> {
        let client_context: Option<ClientContext> = match &metadata.client_context {
            Some(json) => serde_json::from_str(json)?,
            None => None,
        };
        let cognito_identity: Option<CognitoIdentity> = match &metadata.cognito_identity {
            Some(json) => serde_json::from_str(json)?,
            None => None,
        };

        Ok(Context {
            request_id: metadata.request_id.clone(),
            deadline: Timestamp::from_millis(metadata.deadline_ms),
            invoked_function_arn: metadata.invoked_function_arn.clone(),
            xray_trace_id: metadata.trace_id.clone(),
            tenant_id: metadata.tenant_id.clone(),
            client_context,
            cognito_identity,
        })
    }
}

impl Context {
    /// Milliseconds until the invocation deadline; negative once it passed.
    pub fn remaining_time(&self) -> i64 {
        Timestamp::now().duration_to(self.deadline)
    }

    /// The span for the invocation, carrying the request id so every log
    /// line emitted by the handler can be attributed to it.
    pub(crate) fn request_span(&self) -> tracing::Span {
        tracing::info_span!(
            "Lambda runtime invoke",
            requestId = %self.request_id,
            xrayTraceId = %self.xray_trace_id,
        )
    }
}
