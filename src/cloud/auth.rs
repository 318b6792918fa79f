use std::time::{Duration, SystemTime};

use aws_credential_types::provider::ProvideCredentials;
use aws_sigv4::http_request::{
    sign, SignableBody, SignableRequest, SignatureLocation, SigningParams, SigningSettings,
};
use aws_sigv4::sign::v4;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use secrecy::SecretString;
use tracing::{debug, warn};

use crate::error::{classify_aws, CloudError};

const TOKEN_TTL: Duration = Duration::from_secs(60);
const TOKEN_PREFIX: &str = "k8s-aws-v1.";

/* ============================= CLIENT FACTORY ============================= */

/// Builds Kubernetes clients for the managed cluster.
///
/// Each client carries a freshly presigned control-plane token (60 s TTL),
/// so callers that build a client per invocation automatically pick up
/// external permission changes. Falls back to the ambient kubeconfig when
/// the cluster cannot be described (local development).
#[derive(Clone)]
pub struct EksClientFactory {
    aws: aws_config::SdkConfig,
    eks: aws_sdk_eks::Client,
    cluster: String,
}

impl EksClientFactory {
    pub fn new(aws: &aws_config::SdkConfig, cluster: impl Into<String>) -> Self {
        Self {
            aws: aws.clone(),
            eks: aws_sdk_eks::Client::new(aws),
            cluster: cluster.into(),
        }
    }

    pub async fn client(&self) -> Result<kube::Client, CloudError> {
        match self.eks_client().await {
            Ok(client) => Ok(client),
            Err(e) => {
                debug!(error = %e, "eks_client_unavailable_trying_kubeconfig");
                kube::Client::try_default().await.map_err(|fallback| {
                    warn!(error = %fallback, "kubeconfig_fallback_failed");
                    e
                })
            }
        }
    }

    async fn eks_client(&self) -> Result<kube::Client, CloudError> {
        use aws_sdk_eks::error::ProvideErrorMetadata;

        let output = self
            .eks
            .describe_cluster()
            .name(&self.cluster)
            .send()
            .await
            .map_err(|e| classify_aws(e.code(), e.message().unwrap_or("describe_cluster failed")))?;

        let cluster = output
            .cluster
            .ok_or_else(|| CloudError::NotFound(format!("cluster {} not found", self.cluster)))?;
        let endpoint = cluster
            .endpoint
            .ok_or_else(|| CloudError::Fatal(format!("cluster {} has no endpoint", self.cluster)))?;
        let ca_data = cluster
            .certificate_authority
            .and_then(|ca| ca.data)
            .ok_or_else(|| CloudError::Fatal(format!("cluster {} has no CA data", self.cluster)))?;

        let token = self.bearer_token().await?;

        let mut config = kube::Config::new(
            endpoint
                .parse()
                .map_err(|e| CloudError::Fatal(format!("invalid cluster endpoint: {e}")))?,
        );
        config.default_namespace = "default".to_string();
        config.root_cert = Some(decode_ca_bundle(&ca_data)?);
        config.auth_info.token = Some(SecretString::new(token));

        kube::Client::try_from(config)
            .map_err(|e| CloudError::Fatal(format!("failed to build kubernetes client: {e}")))
    }

    /// Presign an STS `GetCallerIdentity` URL scoped to the cluster and wrap
    /// it as the bearer token the control plane expects.
    pub async fn bearer_token(&self) -> Result<String, CloudError> {
        let region = self
            .aws
            .region()
            .ok_or_else(|| CloudError::Fatal("aws region is not configured".to_string()))?
            .to_string();
        let provider = self
            .aws
            .credentials_provider()
            .ok_or_else(|| CloudError::Unauthorized("no aws credentials provider".to_string()))?;
        let credentials = provider
            .provide_credentials()
            .await
            .map_err(|e| CloudError::Unauthorized(format!("failed to resolve credentials: {e}")))?;
        let identity = aws_smithy_runtime_api::client::identity::Identity::from(credentials);

        let mut settings = SigningSettings::default();
        settings.signature_location = SignatureLocation::QueryParams;
        settings.expires_in = Some(TOKEN_TTL);

        let params: SigningParams = v4::SigningParams::builder()
            .identity(&identity)
            .region(&region)
            .name("sts")
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .map_err(|e| CloudError::Fatal(format!("failed to build signing params: {e}")))?
            .into();

        let host = format!("sts.{region}.amazonaws.com");
        let url = format!("https://{host}/?Action=GetCallerIdentity&Version=2011-06-15");
        let headers = [("host", host.as_str()), ("x-k8s-aws-id", self.cluster.as_str())];
        let signable =
            SignableRequest::new("GET", url.as_str(), headers.into_iter(), SignableBody::Bytes(b""))
                .map_err(|e| CloudError::Fatal(format!("failed to build signable request: {e}")))?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(|e| CloudError::Fatal(format!("failed to presign sts request: {e}")))?
            .into_parts();

        let mut request = http::Request::builder()
            .method("GET")
            .uri(url.as_str())
            .body(())
            .map_err(|e| CloudError::Fatal(format!("failed to build sts request: {e}")))?;
        instructions.apply_to_request_http1x(&mut request);

        Ok(encode_token(&request.uri().to_string()))
    }
}

/* ============================= HELPERS ============================= */

/// Base64url-encode the presigned URL without padding, under the
/// control-plane token prefix.
pub fn encode_token(presigned_url: &str) -> String {
    format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(presigned_url.as_bytes()))
}

/// The cluster CA arrives base64-encoded PEM; kube wants DER certificates.
pub fn decode_ca_bundle(ca_base64: &str) -> Result<Vec<Vec<u8>>, CloudError> {
    let pem = STANDARD
        .decode(ca_base64.trim())
        .map_err(|e| CloudError::Fatal(format!("cluster CA is not valid base64: {e}")))?;

    let certs: Vec<Vec<u8>> = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CloudError::Fatal(format!("cluster CA is not valid PEM: {e}")))?
        .into_iter()
        .map(|der| der.as_ref().to_vec())
        .collect();

    if certs.is_empty() {
        return Err(CloudError::Fatal("cluster CA bundle contains no certificates".to_string()));
    }
    Ok(certs)
}

/* ============================= TESTS ============================= */
