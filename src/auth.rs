//! Request authentication
//!
//! Owner routes carry `Authorization: Bearer <jwt>`. The stream route also
//! accepts the same credential as a `token` query parameter, for players
//! that cannot set headers. Both paths go through one [`CredentialVerifier`].

use crate::db::OwnerId;
use axum::extract::{FromRef, FromRequestParts, Query};
use axum::http::{header, request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing credential")]
    MissingCredential,
    #[error("Invalid credential")]
    InvalidCredential,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "message": "Unauthorized",
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// JWT claims issued by the login service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: OwnerId,
    #[serde(default)]
    pub username: String,
    pub exp: u64,
}

/// Turns a raw credential into the owner it identifies
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<OwnerId, AuthError>;
}

pub type SharedVerifier = Arc<dyn CredentialVerifier>;

/// HS256 JWT verification with a shared secret
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        JwtVerifier {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, credential: &str) -> Result<OwnerId, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(credential, &self.key, &self.validation)
            .map_err(|e| {
                debug!("Rejected credential: {}", e);
                AuthError::InvalidCredential
            })?;
        if data.claims.user_id <= 0 {
            return Err(AuthError::InvalidCredential);
        }
        Ok(data.claims.user_id)
    }
}

fn bearer_credential(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Owner authenticated through the `Authorization` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub OwnerId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    SharedVerifier: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = SharedVerifier::from_ref(state);
        let credential = bearer_credential(parts).ok_or(AuthError::MissingCredential)?;
        Ok(AuthUser(verifier.verify(credential)?))
    }
}

#[derive(Debug, Deserialize)]
struct CredentialQuery {
    token: Option<String>,
}

/// Owner authenticated through a `token` query parameter or the `Authorization` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamUser(pub OwnerId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for StreamUser
where
    SharedVerifier: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = SharedVerifier::from_ref(state);
        let query_credential = Query::<CredentialQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.token)
            .filter(|token| !token.is_empty());

        let credential = match &query_credential {
            Some(token) => token.as_str(),
            None => bearer_credential(parts).ok_or(AuthError::MissingCredential)?,
        };
        Ok(StreamUser(verifier.verify(credential)?))
    }
}
