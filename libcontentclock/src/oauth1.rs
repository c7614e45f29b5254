//! OAuth 1.0a request signing (HMAC-SHA1)
//!
//! Twitter's v1.1 media upload and v2 tweet endpoints still accept user
//! context through OAuth 1.0a. Only the `oauth_*` parameters and the query
//! string are signed; JSON and multipart bodies are not part of the base
//! string.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha1::Sha1;

use crate::error::PlatformError;
use crate::http::{encode_component, HttpMethod};

type HmacSha1 = Hmac<Sha1>;

/// A user's OAuth1 token pair as stored on the connection: `"token secret"`.
#[derive(Debug)]
pub struct TwitterToken {
    pub token: String,
    pub secret: SecretString,
}

impl TwitterToken {
    /// Split the stored access token on its first space.
    pub fn parse(raw: &str) -> Result<Self, PlatformError> {
        let (token, secret) = raw.trim().split_once(' ').ok_or_else(|| {
            PlatformError::Validation(
                "access token must be an OAuth1 token and secret separated by a space".to_string(),
            )
        })?;

        let token = token.trim();
        let secret = secret.trim();
        if token.is_empty() || secret.is_empty() {
            return Err(PlatformError::Validation(
                "access token has an empty OAuth1 token or secret".to_string(),
            ));
        }

        Ok(Self {
            token: token.to_string(),
            secret: SecretString::from(secret.to_string()),
        })
    }
}

pub struct OAuth1Signer {
    consumer_key: String,
    consumer_secret: SecretString,
    token: String,
    token_secret: SecretString,
}

impl OAuth1Signer {
    pub fn new(consumer_key: &str, consumer_secret: &str, token: &TwitterToken) -> Self {
        Self {
            consumer_key: consumer_key.to_string(),
            consumer_secret: SecretString::from(consumer_secret.to_string()),
            token: token.token.clone(),
            token_secret: SecretString::from(token.secret.expose_secret().to_string()),
        }
    }

    /// `Authorization` header value for a request, with a fresh nonce and timestamp.
    pub fn authorization(
        &self,
        method: HttpMethod,
        url: &str,
        query: &[(String, String)],
    ) -> Result<String, PlatformError> {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let timestamp = chrono::Utc::now().timestamp();

        self.authorization_with(method, url, query, &nonce, timestamp)
    }

    pub fn authorization_with(
        &self,
        method: HttpMethod,
        url: &str,
        query: &[(String, String)],
        nonce: &str,
        timestamp: i64,
    ) -> Result<String, PlatformError> {
        let mut oauth_params = vec![
            ("oauth_consumer_key", self.consumer_key.clone()),
            ("oauth_nonce", nonce.to_string()),
            ("oauth_signature_method", "HMAC-SHA1".to_string()),
            ("oauth_timestamp", timestamp.to_string()),
            ("oauth_token", self.token.clone()),
            ("oauth_version", "1.0".to_string()),
        ];

        let mut signed: Vec<(String, String)> = oauth_params
            .iter()
            .map(|(k, v)| (encode_component(k), encode_component(v)))
            .chain(
                query
                    .iter()
                    .map(|(k, v)| (encode_component(k), encode_component(v))),
            )
            .collect();
        signed.sort();

        let param_string = signed
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let base_string = format!(
            "{}&{}&{}",
            method,
            encode_component(url),
            encode_component(&param_string)
        );
        let signing_key = format!(
            "{}&{}",
            encode_component(self.consumer_secret.expose_secret()),
            encode_component(self.token_secret.expose_secret())
        );

        let mut mac = HmacSha1::new_from_slice(signing_key.as_bytes())
            .map_err(|e| PlatformError::Validation(format!("invalid OAuth1 signing key: {}", e)))?;
        mac.update(base_string.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        oauth_params.push(("oauth_signature", signature));
        oauth_params.sort_by(|a, b| a.0.cmp(b.0));

        let header = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", encode_component(k), encode_component(v)))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!("OAuth {}", header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn twitter_docs_signer() -> OAuth1Signer {
        let token = TwitterToken::parse(
            "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE",
        )
        .unwrap();
        OAuth1Signer::new(
            "xvz1evFS4wEEPTGEFPHBog",
            "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw",
            &token,
        )
    }

    #[test]
    fn test_token_split_on_space() {
        let token = TwitterToken::parse("tok secret").unwrap();
        assert_eq!(token.token, "tok");
        assert_eq!(token.secret.expose_secret(), "secret");
    }

    #[test]
    fn test_token_without_space_is_validation_error() {
        let err = TwitterToken::parse("tokensecret").unwrap_err();
        assert!(matches!(err, PlatformError::Validation(_)));
    }

    #[test]
    fn test_token_with_blank_half_is_rejected() {
        assert!(TwitterToken::parse(" secret").is_err());
        assert!(TwitterToken::parse("tok   ").is_err());
        assert!(TwitterToken::parse("").is_err());
    }

    #[test]
    fn test_hmac_sha1_known_vector() {
        let mut mac = HmacSha1::new_from_slice(b"key").unwrap();
        mac.update(b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            STANDARD.encode(mac.finalize().into_bytes()),
            "3nybhbi3iqa8ino29wqQcBydtNk="
        );
    }

    #[test]
    fn test_signature_matches_published_example() {
        let signer = twitter_docs_signer();
        let query = vec![
            ("include_entities".to_string(), "true".to_string()),
            (
                "status".to_string(),
                "Hello Ladies + Gentlemen, a signed OAuth request!".to_string(),
            ),
        ];

        let header = signer
            .authorization_with(
                HttpMethod::Post,
                "https://api.twitter.com/1.1/statuses/update.json",
                &query,
                "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg",
                1318622958,
            )
            .unwrap();

        assert!(header.starts_with("OAuth oauth_consumer_key=\"xvz1evFS4wEEPTGEFPHBog\""));
        assert!(header.contains("oauth_signature=\"hCtSmYh%2BiHYCEqBWrE7C7hYmtUk%3D\""));
        assert!(header.contains("oauth_version=\"1.0\""));
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let signer = twitter_docs_signer();
        let a = signer.authorization(HttpMethod::Post, "https://x", &[]).unwrap();
        let b = signer.authorization(HttpMethod::Post, "https://x", &[]).unwrap();
        assert_ne!(a, b);
    }
}
