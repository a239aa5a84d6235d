//! Login and logout.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::TokenGenerator;
use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{Level, Token, User, normalize_email};

const MAX_RETRIES: u32 = 3;

/// A freshly issued session. `raw_token` is only ever returned here.
#[derive(Debug)]
pub struct Session {
    pub raw_token: String,
    pub token: Token,
    pub user: User,
}

/// Checks the credentials and issues a token according to the configured
/// session mode.
pub fn login(store: &dyn Store, config: &AuthConfig, email: &str, password: &str) -> Result<Session> {
    let email = normalize_email(email);
    let user = store.get_user_by_email(&email)?.ok_or(Error::Unauthorized)?;

    if !TokenGenerator::for_passwords().verify(password, &user.password_hash)? {
        debug!(user = %user.id, "Password mismatch");
        return Err(Error::Unauthorized);
    }
    if user.level() == Level::Blocked {
        debug!(user = %user.id, "Blocked user tried to log in");
        return Err(Error::Unauthorized);
    }

    let now = Utc::now();
    if user.password_expired(config.password_expiry(), now) {
        return Err(Error::PasswordExpired);
    }

    let generator = TokenGenerator::new();
    for _ in 0..MAX_RETRIES {
        let (raw_token, lookup, hash) = generator.generate()?;
        let token = Token {
            id: Uuid::new_v4().to_string(),
            token_hash: hash,
            token_lookup: lookup,
            user_id: user.id.clone(),
            created_at: now,
            expiration_date: now + config.token_lifetime(),
            last_action_date: now,
        };

        match store.issue_session(&token, config.session_mode, config.max_sessions) {
            Ok(token) => {
                info!(user = %user.id, "Session issued");
                return Ok(Session {
                    raw_token,
                    token,
                    user,
                });
            }
            Err(Error::TokenLookupCollision) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(Error::TokenLookupCollision)
}

pub fn logout(store: &dyn Store, token: &Token) -> Result<()> {
    if !store.delete_token(&token.id)? {
        return Err(Error::NotFound);
    }
    info!(user = %token.user_id, "Session closed");
    Ok(())
}
