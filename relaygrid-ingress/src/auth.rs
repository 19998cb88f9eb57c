//! Bearer-token authentication (spec §4.6, grounded on `shared/security.py`'s
//! salted-hash + constant-time comparison).

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use relaygrid_core::ApiKeyRole;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub fn hash_api_key(raw_key: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Timing-safe equality; used instead of `==` so a presented key's
/// correctness can't be inferred from how long the comparison took.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[derive(Clone, Debug)]
pub struct AuthenticatedKey {
    pub key_id: uuid::Uuid,
    pub role: ApiKeyRole,
}

impl AuthenticatedKey {
    pub fn require_role(&self, role: ApiKeyRole) -> Result<(), StatusCode> {
        let ok = match role {
            ApiKeyRole::Readonly => true,
            ApiKeyRole::Service => matches!(self.role, ApiKeyRole::Service | ApiKeyRole::Admin),
            ApiKeyRole::Admin => matches!(self.role, ApiKeyRole::Admin),
        };
        if ok {
            Ok(())
        } else {
            Err(StatusCode::FORBIDDEN)
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthenticatedKey {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;
        let raw_key = header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let State(state) = State::from_request_parts(parts, state)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let candidate_hash = hash_api_key(raw_key, &state.config.api_key_salt);
        let active = state
            .api_keys
            .list_active()
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let now = chrono::Utc::now();
        for record in active {
            if constant_time_eq(&candidate_hash, &record.key_hash) {
                if let Some(expiry) = record.expires_at {
                    if expiry <= now {
                        return Err(StatusCode::UNAUTHORIZED);
                    }
                }
                let _ = state.api_keys.touch_last_used(record.id).await;
                return Ok(AuthenticatedKey {
                    key_id: record.id,
                    role: record.role,
                });
            }
        }
        Err(StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic_and_salted() {
        let a = hash_api_key("secret", "salt-1");
        let b = hash_api_key("secret", "salt-1");
        let c = hash_api_key("secret", "salt-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn constant_time_eq_matches_string_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }

    #[test]
    fn service_role_cannot_act_as_admin() {
        let key = AuthenticatedKey {
            key_id: uuid::Uuid::new_v4(),
            role: ApiKeyRole::Service,
        };
        assert!(key.require_role(ApiKeyRole::Service).is_ok());
        assert!(key.require_role(ApiKeyRole::Admin).is_err());
    }
}
