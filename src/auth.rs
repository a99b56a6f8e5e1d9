//! Bearer token authentication for back-office routes.
//!
//! Two kinds of callers exist:
//! - the platform admin, holding `ADMIN_TOKEN` from the configuration;
//! - an establishment, holding a token issued for it. Only the SHA-256 of an
//!   establishment token is stored.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::ApiToken;

/// Identity of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthContext {
    Admin,
    Establishment(Uuid),
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        matches!(self, AuthContext::Admin)
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "Operation requires the platform admin token".to_string(),
            ))
        }
    }

    /// Admin may act on any establishment, a tenant token only on its own.
    pub fn require_establishment(&self, establishment_id: Uuid) -> Result<(), AppError> {
        match self {
            AuthContext::Admin => Ok(()),
            AuthContext::Establishment(id) if *id == establishment_id => Ok(()),
            AuthContext::Establishment(id) => Err(AppError::Forbidden(format!(
                "Token of establishment {} cannot access establishment {}",
                id, establishment_id
            ))),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        if constant_time_compare(token, &state.config.admin_token) {
            return Ok(AuthContext::Admin);
        }

        let establishment_id = find_establishment_for_token(&state.db, token)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid or revoked token".to_string()))?;

        Ok(AuthContext::Establishment(establishment_id))
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Authorization must be a Bearer token".to_string()))
}

/// Constant-time string comparison.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Random 64 hex character token.
pub fn generate_token() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

async fn find_establishment_for_token(pool: &PgPool, token: &str) -> Result<Option<Uuid>, AppError> {
    let row = sqlx::query_as::<_, (Uuid,)>(
        "SELECT establishment_id FROM api_tokens WHERE token_hash = $1 AND revoked_at IS NULL",
    )
    .bind(hash_token(token))
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id,)| id))
}

/// Creates a token for an establishment and returns the stored row with the
/// plaintext token. The plaintext is not recoverable afterwards.
pub async fn issue_token(
    pool: &PgPool,
    establishment_id: Uuid,
    label: Option<&str>,
) -> Result<(ApiToken, String), AppError> {
    let token = generate_token();

    let row = sqlx::query_as::<_, ApiToken>(
        r#"
        INSERT INTO api_tokens (id, establishment_id, token_hash, label)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(establishment_id)
    .bind(hash_token(&token))
    .bind(label)
    .fetch_one(pool)
    .await?;

    tracing::info!(
        "Issued API token {} for establishment {}",
        row.id,
        establishment_id
    );

    Ok((row, token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(h) = header {
            builder = builder.header(AUTHORIZATION, h);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn extracts_bearer_token() {
        let parts = parts_with(Some("Bearer abc123"));
        assert_eq!(bearer_token(&parts).unwrap(), "abc123");
    }

    #[test]
    fn rejects_missing_or_malformed_header() {
        assert!(bearer_token(&parts_with(None)).is_err());
        assert!(bearer_token(&parts_with(Some("Basic dXNlcjpwYXNz"))).is_err());
        assert!(bearer_token(&parts_with(Some("Bearer   "))).is_err());
    }

    #[test]
    fn hashes_are_stable_hex() {
        let hash = hash_token("secret");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("secret"));
        assert_ne!(hash, hash_token("secret2"));
    }

    #[test]
    fn generated_tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn establishment_scope_is_enforced() {
        let own = Uuid::new_v4();
        let other = Uuid::new_v4();
        let ctx = AuthContext::Establishment(own);
        assert!(ctx.require_establishment(own).is_ok());
        assert!(ctx.require_establishment(other).is_err());
        assert!(ctx.require_admin().is_err());
        assert!(AuthContext::Admin.require_establishment(other).is_ok());
    }

    #[test]
    fn compare_is_exact() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
