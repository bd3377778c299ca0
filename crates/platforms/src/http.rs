use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;

use crate::error::AdapterError;

pub const DEFAULT_UA: &str = concat!("relayhub/", env!("CARGO_PKG_VERSION"));

/// Overall request timeout; per-target fetch timeouts are applied on top.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client builder with the rustls stack preconfigured.
///
/// Does not depend on a process-wide default crypto provider.
pub fn create_client_builder() -> Result<ClientBuilder, AdapterError> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| AdapterError::Tls(e.to_string()))?
        .with_platform_verifier()
        .map_err(|e| AdapterError::Tls(e.to_string()))?
        .with_no_client_auth();

    Ok(Client::builder()
        .use_preconfigured_tls(tls_config)
        .user_agent(DEFAULT_UA)
        .timeout(REQUEST_TIMEOUT))
}

/// HTTP client shared by all adapters of a worker.
pub fn default_client() -> Result<Client, AdapterError> {
    Ok(create_client_builder()?.build()?)
}
