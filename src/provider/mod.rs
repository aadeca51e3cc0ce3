//! AI provider boundary.
//!
//! Providers are a closed set behind one capability: prompt in, completion
//! text out, or a typed failure. The gateway neither knows nor cares whether
//! a provider is a hosted API or a local process; adding a provider means
//! adding one variant and one implementation, not changing call sites.

pub mod anthropic;
pub mod gateway;
pub mod ollama;
pub mod openai;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, SessionError};

pub use anthropic::AnthropicProvider;
pub use gateway::{ProviderGateway, RetryPolicy};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Session-scoped provider selection. No automatic cross-provider fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Ollama,
    OpenAi,
    Groq,
    Anthropic,
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderId::Ollama => "ollama",
            ProviderId::OpenAi => "openai",
            ProviderId::Groq => "groq",
            ProviderId::Anthropic => "anthropic",
        };
        f.write_str(name)
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(ProviderId::Ollama),
            "openai" => Ok(ProviderId::OpenAi),
            "groq" => Ok(ProviderId::Groq),
            "anthropic" => Ok(ProviderId::Anthropic),
            other => Err(format!(
                "unknown provider '{}' (expected ollama, openai, groq, or anthropic)",
                other
            )),
        }
    }
}

/// Generation knobs passed through to the provider.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

/// Opaque capability handle bound to a provider identity. Resolved once at
/// session start; read-only afterward.
#[derive(Clone)]
pub enum ProviderCredential {
    ApiKey(String),
    Endpoint(String),
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material
        match self {
            ProviderCredential::ApiKey(_) => f.write_str("ApiKey(***)"),
            ProviderCredential::Endpoint(url) => write!(f, "Endpoint({})", url),
        }
    }
}

impl ProviderCredential {
    /// Resolve the credential for a provider from the environment. A remote
    /// provider without its key is a session-start configuration error.
    pub fn resolve(id: ProviderId, ollama_endpoint: &str) -> Result<Self, SessionError> {
        let var = match id {
            ProviderId::Ollama => {
                return Ok(ProviderCredential::Endpoint(ollama_endpoint.to_string()))
            }
            ProviderId::OpenAi => "OPENAI_API_KEY",
            ProviderId::Groq => "GROQ_API_KEY",
            ProviderId::Anthropic => "ANTHROPIC_API_KEY",
        };

        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(ProviderCredential::ApiKey(
                key.trim().to_string(),
            )),
            _ => Err(SessionError::MissingCredential {
                provider: id.to_string(),
                var: var.to_string(),
            }),
        }
    }
}

/// Single capability every provider exposes.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError>;

    fn id(&self) -> ProviderId;
}

/// Build the provider for a session from its resolved credential.
pub fn build_provider(
    id: ProviderId,
    credential: &ProviderCredential,
    model: &str,
) -> Result<Box<dyn Provider>, SessionError> {
    match (id, credential) {
        (ProviderId::Ollama, ProviderCredential::Endpoint(endpoint)) => {
            Ok(Box::new(OllamaProvider::new(endpoint.clone(), model)))
        }
        (ProviderId::OpenAi, ProviderCredential::ApiKey(key)) => {
            Ok(Box::new(OpenAiProvider::openai(key.clone(), model)))
        }
        (ProviderId::Groq, ProviderCredential::ApiKey(key)) => {
            Ok(Box::new(OpenAiProvider::groq(key.clone(), model)))
        }
        (ProviderId::Anthropic, ProviderCredential::ApiKey(key)) => {
            Ok(Box::new(AnthropicProvider::new(key.clone(), model)))
        }
        _ => Err(SessionError::Config(format!(
            "credential kind does not match provider '{}'",
            id
        ))),
    }
}

/// Shared status-code classification for HTTP providers.
pub(crate) fn classify_status(status: reqwest::StatusCode, body: String) -> ProviderError {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        ProviderError::AuthFailure(format!("{}: {}", status, body))
    } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited(format!("{}: {}", status, body))
    } else if status.is_server_error() {
        ProviderError::ProviderUnavailable(format!("{}: {}", status, body))
    } else {
        ProviderError::InvalidResponse(format!("{}: {}", status, body))
    }
}

/// Transport-level failures (connect refused, timeout) mean the provider is
/// unreachable; anything else about the body is an invalid response.
pub(crate) fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_connect() || err.is_timeout() {
        ProviderError::ProviderUnavailable(err.to_string())
    } else if err.is_decode() {
        ProviderError::InvalidResponse(err.to_string())
    } else {
        ProviderError::ProviderUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_round_trips_through_str() {
        for id in [
            ProviderId::Ollama,
            ProviderId::OpenAi,
            ProviderId::Groq,
            ProviderId::Anthropic,
        ] {
            assert_eq!(id.to_string().parse::<ProviderId>(), Ok(id));
        }
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!("cohere".parse::<ProviderId>().is_err());
    }

    #[test]
    fn credential_debug_hides_key_material() {
        let cred = ProviderCredential::ApiKey("sk-secret".to_string());
        assert!(!format!("{:?}", cred).contains("secret"));
    }

    #[test]
    fn status_classification_matches_policy() {
        use reqwest::StatusCode;

        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, String::new()),
            ProviderError::AuthFailure(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            ProviderError::ProviderUnavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, String::new()),
            ProviderError::InvalidResponse(_)
        ));
    }
}
