use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserRole;
use crate::error::CoreError;

/// Access token lifetime: one hour.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 3600;
/// Refresh token lifetime: seven days.
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 3600;

/// Claims carried by both lobby and tenant tokens.
///
/// Lobby tokens have `tenant_id: None` and `schema_name: "public"`. A token
/// with a tenant id must verify against that tenant's own signing secret.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject: directory user id
    pub sub: String,
    /// User email at issuance time
    pub email: String,
    /// Role at issuance time; the directory stays authoritative
    pub role: UserRole,
    /// Owning tenant, absent for lobby users
    #[serde(rename = "tenantId")]
    pub tenant_id: Option<Uuid>,
    /// Schema name hint matching `tenant_id`
    #[serde(rename = "schemaName")]
    pub schema_name: String,
    /// Expiration time (UTC timestamp)
    pub exp: usize,
    /// Issued-at time (UTC timestamp)
    pub iat: usize,
}

impl Claims {
    /// Create access token claims expiring in one hour.
    pub fn access(
        user_id: Uuid,
        email: impl Into<String>,
        role: UserRole,
        tenant_id: Option<Uuid>,
        schema_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id.to_string(),
            email: email.into(),
            role,
            tenant_id,
            schema_name: schema_name.into(),
            exp: (now + Duration::seconds(ACCESS_TOKEN_TTL_SECS)).timestamp() as usize,
            iat: now.timestamp() as usize,
        }
    }

    pub fn user_id(&self) -> Result<Uuid, CoreError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| CoreError::unauthorized("credential subject is not a valid user id"))
    }

    pub fn is_lobby(&self) -> bool {
        self.tenant_id.is_none()
    }
}

/// HS256 signer/verifier over a caller-supplied secret.
///
/// The identity resolver constructs one instance per verification with
/// either the platform secret (lobby tokens) or the unwrapped per-tenant
/// secret. The service itself has no notion of which tenant it serves.
pub struct TokenService {
    secret: Vec<u8>,
}

impl TokenService {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, CoreError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(CoreError::configuration("signing secret cannot be empty"));
        }
        Ok(Self { secret })
    }

    /// Sign the given claims.
    pub fn sign(&self, claims: &Claims) -> Result<String, CoreError> {
        let key = EncodingKey::from_secret(&self.secret);
        encode(&Header::new(Algorithm::HS256), claims, &key)
            .map_err(|e| CoreError::unauthorized(format!("token signing failed: {}", e)))
    }

    /// Verify signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, CoreError> {
        let key = DecodingKey::from_secret(&self.secret);
        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(token, &key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    Err(CoreError::unauthorized("token expired"))
                }
                _ => Err(CoreError::unauthorized(format!("invalid token: {}", e))),
            },
        }
    }

    /// Decode claims without verifying the signature.
    ///
    /// Used only to read the `tenantId`/`schemaName` hints that decide which
    /// secret to verify with. The result is untrusted until [`Self::verify`]
    /// succeeds with the resolved secret.
    pub fn decode_unverified(token: &str) -> Result<Claims, CoreError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(|e| CoreError::unauthorized(format!("malformed token: {}", e)))
    }

    /// Extract bearer token from an Authorization header value.
    pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
        auth_header.strip_prefix("Bearer ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_claims(tenant: Option<Uuid>) -> Claims {
        Claims::access(
            Uuid::new_v4(),
            "user@example.com",
            UserRole::Manager,
            tenant,
            tenant
                .map(|_| "tenant_acme_a1b2c3d4".to_string())
                .unwrap_or_else(|| "public".to_string()),
        )
    }

    #[test]
    fn test_sign_and_verify_round_trip() {
        let service = TokenService::new(b"test_secret".to_vec()).unwrap();
        let claims = sample_claims(None);

        let token = service.sign(&claims).expect("sign");
        let decoded = service.verify(&token).expect("verify");

        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.role, UserRole::Manager);
        assert!(decoded.is_lobby());
        assert_eq!(decoded.schema_name, "public");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signer = TokenService::new(b"secret_a".to_vec()).unwrap();
        let verifier = TokenService::new(b"secret_b".to_vec()).unwrap();
        let token = signer.sign(&sample_claims(None)).unwrap();

        assert!(matches!(
            verifier.verify(&token),
            Err(CoreError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let service = TokenService::new(b"test_secret".to_vec()).unwrap();
        let mut claims = sample_claims(None);
        claims.exp = (Utc::now() - Duration::hours(2)).timestamp() as usize;

        let token = service.sign(&claims).unwrap();
        let err = service.verify(&token).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_unverified_decode_reads_tenant_hint() {
        let tenant = Uuid::new_v4();
        let service = TokenService::new(b"tenant_secret".to_vec()).unwrap();
        let token = service.sign(&sample_claims(Some(tenant))).unwrap();

        let hint = TokenService::decode_unverified(&token).expect("decode");
        assert_eq!(hint.tenant_id, Some(tenant));
        assert_eq!(hint.schema_name, "tenant_acme_a1b2c3d4");
    }

    #[test]
    fn test_unverified_decode_rejects_garbage() {
        assert!(TokenService::decode_unverified("not.a.token").is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(
            TokenService::extract_bearer_token("Bearer abc.def.ghi"),
            Some("abc.def.ghi")
        );
        assert_eq!(TokenService::extract_bearer_token("Basic dXNlcg=="), None);
        assert_eq!(TokenService::extract_bearer_token("abc.def.ghi"), None);
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(TokenService::new(Vec::new()).is_err());
    }
}
