//! OAuth 1.0a request signing (HMAC-SHA1).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

use crate::error::AdapterError;

type HmacSha1 = Hmac<Sha1>;

/// The four secrets a Twitter credential entry carries.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl OAuthCredentials {
    pub fn is_complete(&self) -> bool {
        !(self.consumer_key.is_empty()
            || self.consumer_secret.is_empty()
            || self.access_token.is_empty()
            || self.access_token_secret.is_empty())
    }

    /// `Authorization` header value for a request.
    ///
    /// `params` are the query and form parameters the request carries.
    pub fn authorization_header(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<String, AdapterError> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.authorization_header_with(method, url, params, &nonce, &timestamp)
    }

    fn authorization_header_with(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
        nonce: &str,
        timestamp: &str,
    ) -> Result<String, AdapterError> {
        let oauth_params = [
            ("oauth_consumer_key", self.consumer_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp),
            ("oauth_token", self.access_token.as_str()),
            ("oauth_version", "1.0"),
        ];

        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.extend_from_slice(&oauth_params);
        let base = signature_base_string(method, url, &all);
        let signature = sign(&base, &self.consumer_secret, &self.access_token_secret)?;

        let mut fields: Vec<String> = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
            .collect();
        fields.push(format!("oauth_signature=\"{}\"", encode(&signature)));
        fields.sort();

        Ok(format!("OAuth {}", fields.join(", ")))
    }
}

fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// `METHOD&encoded-url&encoded-sorted-params`.
pub fn signature_base_string(method: &str, url: &str, params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> =
        params.iter().map(|(k, v)| (encode(k), encode(v))).collect();
    encoded.sort();

    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(url),
        encode(&param_string)
    )
}

/// Base64 HMAC-SHA1 of `base`, keyed by the two secrets.
pub fn sign(base: &str, consumer_secret: &str, token_secret: &str) -> Result<String, AdapterError> {
    let key = format!("{}&{}", encode(consumer_secret), encode(token_secret));
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| AdapterError::Other(format!("hmac key: {}", e)))?;
    mac.update(base.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Published example request from the Twitter developer documentation.
    const URL: &str = "https://api.twitter.com/1.1/statuses/update.json";
    const PARAMS: [(&str, &str); 2] = [
        ("status", "Hello Ladies + Gentlemen, a signed OAuth request!"),
        ("include_entities", "true"),
    ];

    fn credentials() -> OAuthCredentials {
        OAuthCredentials {
            consumer_key: "xvz1evFS4wEEPTGEFPHBog".to_string(),
            consumer_secret: "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw".to_string(),
            access_token: "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb".to_string(),
            access_token_secret: "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE".to_string(),
        }
    }

    #[test]
    fn test_signature_base_string_encoding() {
        let base = signature_base_string("post", URL, &[("status", "a b+c!"), ("a", "1")]);
        assert_eq!(
            base,
            "POST&https%3A%2F%2Fapi.twitter.com%2F1.1%2Fstatuses%2Fupdate.json&a%3D1%26status%3Da%2520b%252Bc%2521"
        );
    }

    #[test]
    fn test_known_signature() {
        let header = credentials()
            .authorization_header_with(
                "POST",
                URL,
                &PARAMS,
                "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg",
                "1318622958",
            )
            .unwrap();

        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_signature=\"hCtSmYh%2BiHYCEqBWrE7C7hYmtUk%3D\""));
        assert!(header.contains("oauth_consumer_key=\"xvz1evFS4wEEPTGEFPHBog\""));
    }

    #[test]
    fn test_incomplete_credentials() {
        let mut creds = credentials();
        assert!(creds.is_complete());
        creds.access_token_secret.clear();
        assert!(!creds.is_complete());
    }
}
