use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token is malformed")]
    Malformed,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Malformed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub user_id: Uuid,
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Signs and verifies HS256 access and refresh tokens.
///
/// Both kinds share one secret and issuer; they are told apart by audience, so
/// a refresh token is never accepted as a bearer credential.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_audience: String,
    access_expiry: Duration,
    refresh_audience: String,
    refresh_expiry: Duration,
}

impl TokenService {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            access_audience: config.jwt_audience.clone(),
            access_expiry: Duration::minutes(config.access_token_expiry_minutes),
            refresh_audience: config.refresh_token_audience.clone(),
            refresh_expiry: Duration::days(config.refresh_token_expiry_days),
        }
    }

    pub fn access_expiry(&self) -> Duration {
        self.access_expiry
    }

    pub fn refresh_expiry(&self) -> Duration {
        self.refresh_expiry
    }

    pub fn issue_pair(&self, user_id: Uuid) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access: self.sign(user_id, &self.access_audience, self.access_expiry)?,
            refresh: self.sign(user_id, &self.refresh_audience, self.refresh_expiry)?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, &self.access_audience)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, &self.refresh_audience)
    }

    fn sign(
        &self,
        user_id: Uuid,
        audience: &str,
        lifetime: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let now = Utc::now();
        let expires_at = now + lifetime;
        let claims = Claims {
            sub: user_id,
            user_id,
            jti: random_jti(),
            iss: self.issuer.clone(),
            aud: audience.to_owned(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| TokenError::Signing(err.to_string()))?;
        Ok(IssuedToken { token, expires_at })
    }

    fn verify(&self, token: &str, audience: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

fn random_jti() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(secret: &str) -> TokenService {
        TokenService {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: "docbuilder".into(),
            access_audience: "clients".into(),
            access_expiry: Duration::minutes(15),
            refresh_audience: "refresh".into(),
            refresh_expiry: Duration::days(7),
        }
    }

    #[test]
    fn issued_pair_verifies_for_its_own_audience() {
        let tokens = service("secret");
        let user_id = Uuid::new_v4();
        let pair = tokens.issue_pair(user_id).unwrap();

        let access = tokens.verify_access(&pair.access.token).unwrap();
        assert_eq!(access.user_id, user_id);
        assert_eq!(access.sub, user_id);

        let refresh = tokens.verify_refresh(&pair.refresh.token).unwrap();
        assert_eq!(refresh.user_id, user_id);
        assert!(pair.refresh.expires_at > pair.access.expires_at);
    }

    #[test]
    fn refresh_token_is_not_a_bearer_credential() {
        let tokens = service("secret");
        let pair = tokens.issue_pair(Uuid::new_v4()).unwrap();
        assert!(tokens.verify_access(&pair.refresh.token).is_err());
        assert!(tokens.verify_refresh(&pair.access.token).is_err());
    }

    #[test]
    fn tokens_minted_back_to_back_differ() {
        let tokens = service("secret");
        let user_id = Uuid::new_v4();
        let first = tokens.issue_pair(user_id).unwrap();
        let second = tokens.issue_pair(user_id).unwrap();
        assert_ne!(first.access.token, second.access.token);
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let pair = service("one").issue_pair(Uuid::new_v4()).unwrap();
        let err = service("two").verify_access(&pair.access.token).unwrap_err();
        assert_eq!(err, TokenError::InvalidSignature);
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut tokens = service("secret");
        tokens.access_expiry = Duration::minutes(-5);
        let pair = tokens.issue_pair(Uuid::new_v4()).unwrap();
        let err = tokens.verify_access(&pair.access.token).unwrap_err();
        assert_eq!(err, TokenError::Expired);
    }

    #[test]
    fn garbage_is_malformed() {
        let err = service("secret").verify_access("not-a-jwt").unwrap_err();
        assert_eq!(err, TokenError::Malformed);
    }
}
