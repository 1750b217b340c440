//! Remote compute provider API collaborator.
//!
//! The provisioning workflow depends only on the [`Ec2Api`] trait and its
//! typed request/response structures. The bundled [`HttpEc2Api`] is a thin
//! adapter: signed GET requests with query parameters, structured error
//! envelopes decoded into [`RemoteApiError`]. Request signing itself is
//! delegated to the [`RequestSigner`] collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::RemoteApiError;

const API_VERSION: &str = "2014-06-15";

/// Parameters for creating exactly one backing compute resource.
#[derive(Debug, Clone, Serialize)]
pub struct RunInstancesRequest {
    pub image_id: String,
    pub instance_type: String,
    pub availability_zone: String,
    pub security_group: String,
    pub key_name: String,
}

/// One created or described compute instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub instance_id: String,
    #[serde(default)]
    pub image_id: String,
    pub state: InstanceStateInfo,
    #[serde(default)]
    pub public_dns_name: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub private_ip: Option<String>,
}

/// Provider-native instance status, consumed as an already-typed structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceStateInfo {
    pub code: i32,
    pub name: String,
}

/// Response to a run-instances call.
#[derive(Debug, Clone, Deserialize)]
pub struct RunInstancesResponse {
    pub request_id: String,
    #[serde(default)]
    pub reservation_id: String,
    pub instances: Vec<InstanceDescriptor>,
}

/// Freshly generated key pair, including the private key material.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyPairMaterial {
    pub key_name: String,
    #[serde(default)]
    pub key_fingerprint: String,
    pub key_material: String,
}

/// A single ingress authorization: one TCP port opened to a source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngressRule {
    pub port: u16,
}

impl IngressRule {
    pub const SOURCE_RANGE: &'static str = "0.0.0.0/0";

    pub fn tcp(port: u16) -> Self {
        Self { port }
    }
}

/// Structured error envelope the provider returns on failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorEnvelope {
    #[serde(default)]
    pub errors: Vec<ApiError>,
    #[serde(default)]
    pub request_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiErrorEnvelope {
    /// Collapse the envelope into a [`RemoteApiError`] for the given action.
    pub fn into_remote_error(self, action: &str, status: u16) -> RemoteApiError {
        let (code, message) = match self.errors.into_iter().next() {
            Some(e) => (Some(e.code), e.message),
            None => (None, format!("non-success response ({status})")),
        };
        RemoteApiError {
            action: action.to_string(),
            code,
            message,
            status: Some(status),
        }
    }
}

/// Capability set of the remote compute provider.
///
/// Mutating calls are issued exactly once per invocation; retry policy lives
/// with the caller. Implementations must not cache state.
#[async_trait]
pub trait Ec2Api: Send + Sync {
    async fn run_instances(
        &self,
        request: &RunInstancesRequest,
    ) -> Result<RunInstancesResponse, RemoteApiError>;

    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<InstanceDescriptor, RemoteApiError>;

    async fn create_key_pair(&self, key_name: &str) -> Result<KeyPairMaterial, RemoteApiError>;

    async fn delete_key_pair(&self, key_name: &str) -> Result<(), RemoteApiError>;

    async fn create_security_group(
        &self,
        group_name: &str,
        description: &str,
    ) -> Result<(), RemoteApiError>;

    async fn authorize_ingress(
        &self,
        group_name: &str,
        rule: IngressRule,
    ) -> Result<(), RemoteApiError>;

    async fn create_tags(
        &self,
        resource_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), RemoteApiError>;

    async fn start_instances(&self, instance_id: &str) -> Result<(), RemoteApiError>;
    async fn stop_instances(&self, instance_id: &str) -> Result<(), RemoteApiError>;
    async fn reboot_instances(&self, instance_id: &str) -> Result<(), RemoteApiError>;
    async fn terminate_instances(&self, instance_id: &str) -> Result<(), RemoteApiError>;
}

/// Signs outgoing provider requests. Signing details are out of scope for the
/// core; implementations attach whatever headers the provider requires.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: &mut reqwest::Request);
}

/// Signer that attaches a static credential pair.
#[derive(Debug, Clone)]
pub struct CredentialSigner {
    access_key: String,
    secret_key: String,
}

impl CredentialSigner {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl RequestSigner for CredentialSigner {
    fn sign(&self, request: &mut reqwest::Request) {
        // Placeholder credential attachment; the real signature scheme is the
        // signing collaborator's concern, keyed off the same pair.
        let value = format!("Credential={}/{}", self.access_key, self.secret_key.len());
        if let Ok(header) = reqwest::header::HeaderValue::from_str(&value) {
            request
                .headers_mut()
                .insert(reqwest::header::AUTHORIZATION, header);
        }
    }
}

/// HTTP-backed [`Ec2Api`] implementation.
pub struct HttpEc2Api {
    client: reqwest::Client,
    endpoint: String,
    signer: Arc<dyn RequestSigner>,
}

impl HttpEc2Api {
    pub fn new(endpoint: impl Into<String>, signer: Arc<dyn RequestSigner>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            signer,
        }
    }

    /// Issue one signed query-parameter call and decode the typed response.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<T, RemoteApiError> {
        let mut query: Vec<(&str, &str)> = vec![("Action", action), ("Version", API_VERSION)];
        query.extend_from_slice(params);

        let mut request = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .build()
            .map_err(|e| RemoteApiError::new(action, e.to_string()))?;
        self.signer.sign(&mut request);

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| RemoteApiError::new(action, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ApiErrorEnvelope>(&body) {
                Ok(envelope) => envelope.into_remote_error(action, status.as_u16()),
                Err(_) => RemoteApiError::new(
                    action,
                    format!("non-success response: {body}"),
                )
                .with_status(status.as_u16()),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteApiError::new(action, format!("error decoding response: {e}")))
    }

    /// Calls whose response body carries nothing the workflow consumes.
    async fn call_discarding(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<(), RemoteApiError> {
        self.call::<serde_json::Value>(action, params).await?;
        Ok(())
    }
}

#[async_trait]
impl Ec2Api for HttpEc2Api {
    async fn run_instances(
        &self,
        request: &RunInstancesRequest,
    ) -> Result<RunInstancesResponse, RemoteApiError> {
        self.call(
            "RunInstances",
            &[
                ("ImageId", &request.image_id),
                ("InstanceType", &request.instance_type),
                ("Placement.AvailabilityZone", &request.availability_zone),
                ("SecurityGroup.1", &request.security_group),
                ("KeyName", &request.key_name),
                ("MinCount", "1"),
                ("MaxCount", "1"),
            ],
        )
        .await
    }

    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<InstanceDescriptor, RemoteApiError> {
        #[derive(Deserialize)]
        struct DescribeInstancesResponse {
            instances: Vec<InstanceDescriptor>,
        }
        let response: DescribeInstancesResponse = self
            .call("DescribeInstances", &[("InstanceId.1", instance_id)])
            .await?;
        response.instances.into_iter().next().ok_or_else(|| {
            RemoteApiError::new("DescribeInstances", "response contained no instances")
        })
    }

    async fn create_key_pair(&self, key_name: &str) -> Result<KeyPairMaterial, RemoteApiError> {
        self.call("CreateKeyPair", &[("KeyName", key_name)]).await
    }

    async fn delete_key_pair(&self, key_name: &str) -> Result<(), RemoteApiError> {
        self.call_discarding("DeleteKeyPair", &[("KeyName", key_name)])
            .await
    }

    async fn create_security_group(
        &self,
        group_name: &str,
        description: &str,
    ) -> Result<(), RemoteApiError> {
        self.call_discarding(
            "CreateSecurityGroup",
            &[
                ("GroupName", group_name),
                ("GroupDescription", description),
            ],
        )
        .await
    }

    async fn authorize_ingress(
        &self,
        group_name: &str,
        rule: IngressRule,
    ) -> Result<(), RemoteApiError> {
        let port = rule.port.to_string();
        self.call_discarding(
            "AuthorizeSecurityGroupIngress",
            &[
                ("GroupName", group_name),
                ("IpProtocol", "tcp"),
                ("FromPort", &port),
                ("ToPort", &port),
                ("CidrIp", IngressRule::SOURCE_RANGE),
            ],
        )
        .await
    }

    async fn create_tags(
        &self,
        resource_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), RemoteApiError> {
        self.call_discarding(
            "CreateTags",
            &[
                ("ResourceId.1", resource_id),
                ("Tag.1.Key", key),
                ("Tag.1.Value", value),
            ],
        )
        .await
    }

    async fn start_instances(&self, instance_id: &str) -> Result<(), RemoteApiError> {
        self.call_discarding("StartInstances", &[("InstanceId.1", instance_id)])
            .await
    }

    async fn stop_instances(&self, instance_id: &str) -> Result<(), RemoteApiError> {
        self.call_discarding("StopInstances", &[("InstanceId.1", instance_id)])
            .await
    }

    async fn reboot_instances(&self, instance_id: &str) -> Result<(), RemoteApiError> {
        self.call_discarding("RebootInstances", &[("InstanceId.1", instance_id)])
            .await
    }

    async fn terminate_instances(&self, instance_id: &str) -> Result<(), RemoteApiError> {
        self.call_discarding("TerminateInstances", &[("InstanceId.1", instance_id)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_collapses_to_first_error() {
        let envelope: ApiErrorEnvelope = serde_json::from_str(
            r#"{
                "errors": [
                    { "code": "InvalidGroup.Duplicate", "message": "group exists" },
                    { "code": "Other", "message": "secondary" }
                ],
                "request_id": "req-1"
            }"#,
        )
        .unwrap();
        let err = envelope.into_remote_error("CreateSecurityGroup", 400);
        assert!(err.is_code("InvalidGroup.Duplicate"));
        assert_eq!(err.action, "CreateSecurityGroup");
        assert_eq!(err.status, Some(400));
    }

    #[test]
    fn empty_envelope_still_reports_status() {
        let envelope = ApiErrorEnvelope {
            errors: vec![],
            request_id: String::new(),
        };
        let err = envelope.into_remote_error("RunInstances", 500);
        assert!(err.code.is_none());
        assert!(err.message.contains("500"));
    }
}
