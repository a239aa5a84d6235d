use std::collections::BTreeSet;

use chrono::{Duration, Utc};

use super::{TokenGenerator, parse_token};
use crate::authz::Principal;
use crate::store::Store;
use crate::types::{Token, TokenStatus, User};

#[derive(Debug)]
pub enum TokenValidationError {
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    InternalError,
}

/// A token that passed verification, and the principal it stands for.
pub struct Authenticated {
    pub token: Token,
    pub principal: Principal,
}

/// Extracts a token string from a Basic auth header.
/// Expects format: Basic base64(x-token:actual_token)
pub fn extract_basic_auth_token(header: &str) -> Option<String> {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    let (username, password) = credentials.split_once(':')?;

    if username != "x-token" {
        return None;
    }

    Some(password.to_string())
}

/// Extracts token from Authorization header (Bearer or Basic).
/// Returns None if no auth header is present.
/// Returns Err if the auth scheme is unsupported.
pub fn extract_token_from_header(
    auth_header: Option<&str>,
) -> Result<Option<String>, TokenValidationError> {
    match auth_header {
        Some(header) => {
            if let Some(token) = header.strip_prefix("Bearer ") {
                Ok(Some(token.trim().to_string()))
            } else if header.starts_with("Basic ") {
                extract_basic_auth_token(header)
                    .ok_or(TokenValidationError::InvalidToken)
                    .map(Some)
            } else {
                Err(TokenValidationError::InvalidScheme)
            }
        }
        None => Ok(None),
    }
}

/// Validates a raw token string against the store and resolves its principal.
///
/// The expiry decision and the last-action touch happen in one store
/// transaction.
pub fn authenticate(
    store: &dyn Store,
    raw_token: &str,
    grace: Duration,
) -> Result<Authenticated, TokenValidationError> {
    let (lookup, _secret) =
        parse_token(raw_token).map_err(|_| TokenValidationError::InvalidToken)?;

    let token = store
        .get_token_by_lookup(&lookup)
        .map_err(|_| TokenValidationError::InternalError)?
        .ok_or(TokenValidationError::InvalidToken)?;

    let generator = TokenGenerator::new();
    if !generator
        .verify(raw_token, &token.token_hash)
        .map_err(|_| TokenValidationError::InternalError)?
    {
        return Err(TokenValidationError::InvalidToken);
    }

    match store.check_token(&token.id, Utc::now(), grace) {
        Ok(Some(TokenStatus::Valid)) => {}
        Ok(Some(TokenStatus::Expired)) => return Err(TokenValidationError::TokenExpired),
        Ok(None) => return Err(TokenValidationError::InvalidToken),
        Err(e) => {
            tracing::warn!("Failed to check token {}: {e}", token.id);
            return Err(TokenValidationError::InternalError);
        }
    }

    let user = store
        .get_user(&token.user_id)
        .map_err(|_| TokenValidationError::InternalError)?
        .ok_or(TokenValidationError::InvalidToken)?;

    let principal = load_principal(store, user).map_err(|e| {
        tracing::warn!("Failed to load principal context: {e}");
        TokenValidationError::InternalError
    })?;

    Ok(Authenticated { token, principal })
}

/// Gathers the divider, group and role memberships of `user`.
pub fn load_principal(store: &dyn Store, user: User) -> crate::error::Result<Principal> {
    let dividers: BTreeSet<String> = store.list_user_dividers(&user.id)?.into_iter().collect();
    let groups: BTreeSet<String> = store.list_user_groups(&user.id)?.into_iter().collect();
    let roles: BTreeSet<String> = store.list_user_roles(&user.id)?.into_iter().collect();

    Ok(Principal {
        user,
        dividers,
        groups,
        roles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer() {
        let token = extract_token_from_header(Some("Bearer concrete_abc")).unwrap();
        assert_eq!(token.as_deref(), Some("concrete_abc"));
    }

    #[test]
    fn test_extract_basic() {
        use base64::Engine;
        use base64::engine::general_purpose::STANDARD;

        let header = format!("Basic {}", STANDARD.encode("x-token:concrete_abc"));
        let token = extract_token_from_header(Some(&header)).unwrap();
        assert_eq!(token.as_deref(), Some("concrete_abc"));

        let wrong_user = format!("Basic {}", STANDARD.encode("someone:concrete_abc"));
        assert!(matches!(
            extract_token_from_header(Some(&wrong_user)),
            Err(TokenValidationError::InvalidToken)
        ));
    }

    #[test]
    fn test_extract_rejects_unknown_scheme() {
        assert!(matches!(
            extract_token_from_header(Some("Digest abc")),
            Err(TokenValidationError::InvalidScheme)
        ));
        assert!(extract_token_from_header(None).unwrap().is_none());
    }
}
