//! Auth gate.
//!
//! Extracts and validates the project-scoped API key from request metadata,
//! then delegates validation to an external `APIKeyService`. The tonic
//! interceptor wiring lives in `server`; this module only does extraction +
//! the collaborator contract so both the gRPC and HTTP transports can reuse
//! it.

use async_trait::async_trait;

use crate::error::IngestError;

const KEY_PREFIX: &str = "bk_";

/// What the auth gate resolves a valid credential to; threaded through
/// request context for C6 to read `project_id` from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub project_id: String,
    pub api_key_id: String,
}

/// Extracts the raw `bk_…` token from `authorization` (`Bearer <token>` or
/// bare `<token>`) or `x-api-key`, in that priority order. Header *names*
/// are matched case-insensitively by the caller (tonic/axum both lowercase
/// metadata keys already); this function only unwraps values.
pub fn extract_api_key(authorization: Option<&str>, x_api_key: Option<&str>) -> Result<String, IngestError> {
    if let Some(value) = authorization {
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .unwrap_or(value)
            .trim();
        if !token.is_empty() {
            return validate_prefix(token);
        }
    }
    if let Some(value) = x_api_key {
        let token = value.trim();
        if !token.is_empty() {
            return validate_prefix(token);
        }
    }
    Err(IngestError::MissingCredential)
}

fn validate_prefix(token: &str) -> Result<String, IngestError> {
    if token.starts_with(KEY_PREFIX) {
        Ok(token.to_string())
    } else {
        Err(IngestError::MissingCredential)
    }
}

/// The external API-key validation collaborator.
#[async_trait]
pub trait ApiKeyService: Send + Sync {
    async fn validate_api_key(&self, key: &str) -> Result<AuthContext, IngestError>;
}

#[derive(serde::Deserialize)]
struct ValidateApiKeyResponse {
    project_id: String,
    api_key_id: String,
}

/// HTTP-backed validator calling out to the platform's key-management
/// service. The wire shape is intentionally minimal — this core only needs
/// `project_id`/`api_key_id` back.
pub struct HttpApiKeyService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApiKeyService {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ApiKeyService for HttpApiKeyService {
    async fn validate_api_key(&self, key: &str) -> Result<AuthContext, IngestError> {
        let url = format!("{}/v1/api-keys/validate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "api_key": key }))
            .send()
            .await
            .map_err(|e| IngestError::InvalidCredential(format!("validator unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(IngestError::InvalidCredential(format!(
                "validator rejected credential: {}",
                response.status()
            )));
        }

        let body: ValidateApiKeyResponse = response
            .json()
            .await
            .map_err(|e| IngestError::InvalidCredential(format!("malformed validator response: {e}")))?;

        Ok(AuthContext {
            project_id: body.project_id,
            api_key_id: body.api_key_id,
        })
    }
}

/// In-memory validator for tests: any key present in the map validates.
#[derive(Debug, Clone, Default)]
pub struct StaticApiKeyService {
    keys: std::collections::HashMap<String, AuthContext>,
}

impl StaticApiKeyService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: &str, project_id: &str, api_key_id: &str) -> Self {
        self.keys.insert(
            key.to_string(),
            AuthContext {
                project_id: project_id.to_string(),
                api_key_id: api_key_id.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl ApiKeyService for StaticApiKeyService {
    async fn validate_api_key(&self, key: &str) -> Result<AuthContext, IngestError> {
        self.keys
            .get(key)
            .cloned()
            .ok_or_else(|| IngestError::InvalidCredential("unknown API key".into()))
    }
}
