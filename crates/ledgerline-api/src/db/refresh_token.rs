//! DB-backed opaque refresh tokens.
//!
//! The raw token is 32 random bytes hex-encoded and is returned to the
//! client exactly once; only its SHA-256 hash is stored. Tokens rotate on
//! every use, and presenting an already-rotated token revokes the whole
//! family for that user.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use ledgerline_core::auth::jwt::REFRESH_TOKEN_TTL_SECS;
use ledgerline_core::error::CoreError;

use crate::db::executor::map_db_error;
use crate::db::schema::refresh_tokens;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = refresh_tokens)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
struct NewRefreshToken {
    user_id: Uuid,
    token_hash: String,
    expires_at: DateTime<Utc>,
}

fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct RefreshTokenRepository<'a> {
    connection: &'a mut PgConnection,
}

impl<'a> RefreshTokenRepository<'a> {
    pub fn new(connection: &'a mut PgConnection) -> Self {
        Self { connection }
    }

    /// Mint a refresh token for the user, returning the raw value.
    pub fn issue(&mut self, user_id: Uuid) -> Result<String, CoreError> {
        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        let raw = hex::encode(raw);

        let record = NewRefreshToken {
            user_id,
            token_hash: hash_token(&raw),
            expires_at: Utc::now() + Duration::seconds(REFRESH_TOKEN_TTL_SECS),
        };

        diesel::insert_into(refresh_tokens::table)
            .values(&record)
            .execute(self.connection)
            .map_err(map_db_error)?;

        Ok(raw)
    }

    /// Validate and rotate a presented token, returning the owning user id.
    ///
    /// A revoked-but-matching hash means the token was already rotated:
    /// treated as theft, every token for that user is revoked.
    pub fn consume(&mut self, raw: &str) -> Result<Uuid, CoreError> {
        use crate::db::schema::refresh_tokens::dsl;

        let hash = hash_token(raw);
        let found = dsl::refresh_tokens
            .filter(dsl::token_hash.eq(&hash))
            .first::<RefreshToken>(self.connection)
            .optional()
            .map_err(map_db_error)?;

        let token = match found {
            Some(t) => t,
            None => return Err(CoreError::unauthorized("unknown refresh token")),
        };

        if token.revoked {
            log::warn!(
                "refresh token reuse detected for user {}, revoking all sessions",
                token.user_id
            );
            self.revoke_all(token.user_id)?;
            return Err(CoreError::unauthorized("refresh token already used"));
        }

        if token.expires_at < Utc::now() {
            return Err(CoreError::unauthorized("refresh token expired"));
        }

        diesel::update(dsl::refresh_tokens.filter(dsl::id.eq(token.id)))
            .set(dsl::revoked.eq(true))
            .execute(self.connection)
            .map_err(map_db_error)?;

        Ok(token.user_id)
    }

    pub fn revoke_all(&mut self, user_id: Uuid) -> Result<(), CoreError> {
        use crate::db::schema::refresh_tokens::dsl;

        diesel::update(dsl::refresh_tokens.filter(dsl::user_id.eq(user_id)))
            .set(dsl::revoked.eq(true))
            .execute(self.connection)
            .map_err(map_db_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_and_hex() {
        let raw = "ab".repeat(32);
        let h1 = hash_token(&raw);
        let h2 = hash_token(&raw);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_different_tokens_different_hashes() {
        assert_ne!(hash_token("aaaa"), hash_token("aaab"));
    }
}
