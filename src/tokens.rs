//! Stateless credentials: single-use confirmation codes derived from a user's
//! current state, and signed bearer access tokens.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::entities::user;

type HmacSha256 = Hmac<Sha256>;

const CONFIRMATION_MAC_CHARS: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token has expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: i32,
    exp: i64,
}

#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    access_ttl_seconds: i64,
    confirmation_ttl_seconds: i64,
}

impl TokenSigner {
    /// Lifetimes too large to represent in seconds saturate and never expire.
    pub fn new(secret: &str, access_ttl_hours: i64, confirmation_ttl_hours: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            access_ttl_seconds: access_ttl_hours.saturating_mul(3_600),
            confirmation_ttl_seconds: confirmation_ttl_hours.saturating_mul(3_600),
        }
    }

    pub fn confirmation_code(&self, user: &user::Model) -> String {
        self.confirmation_code_at(user, now_sec())
    }

    fn confirmation_code_at(&self, user: &user::Model, issued_at: i64) -> String {
        let mac = hex::encode(self.mac(&confirmation_payload(user, issued_at)));
        format!("{}-{}", to_base36(issued_at), &mac[..CONFIRMATION_MAC_CHARS])
    }

    /// Recomputes the code for the user's current state; any change to the
    /// fingerprinted fields since issue makes the code stale.
    pub fn check_confirmation_code(
        &self,
        user: &user::Model,
        code: &str,
    ) -> Result<(), TokenError> {
        self.check_confirmation_code_at(user, code, now_sec())
    }

    fn check_confirmation_code_at(
        &self,
        user: &user::Model,
        code: &str,
        now: i64,
    ) -> Result<(), TokenError> {
        let (issued, _) = code.split_once('-').ok_or(TokenError::Malformed)?;
        let issued_at = from_base36(issued).ok_or(TokenError::Malformed)?;
        let expected = self.confirmation_code_at(user, issued_at);
        if !bool::from(expected.as_bytes().ct_eq(code.as_bytes())) {
            return Err(TokenError::BadSignature);
        }
        if now.saturating_sub(issued_at) > self.confirmation_ttl_seconds {
            return Err(TokenError::Expired);
        }
        Ok(())
    }

    pub fn access_token(&self, user_id: i32) -> String {
        self.access_token_at(user_id, now_sec())
    }

    fn access_token_at(&self, user_id: i32, now: i64) -> String {
        let exp = now.saturating_add(self.access_ttl_seconds);
        let claims = AccessClaims { sub: user_id, exp };
        let body = URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&claims).expect("claims serialize to json"));
        let signature = URL_SAFE_NO_PAD.encode(self.mac(body.as_bytes()));
        format!("{body}.{signature}")
    }

    /// Returns the user id the token was issued for.
    pub fn verify_access_token(&self, token: &str) -> Result<i32, TokenError> {
        self.verify_access_token_at(token, now_sec())
    }

    fn verify_access_token_at(&self, token: &str, now: i64) -> Result<i32, TokenError> {
        let (body, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| TokenError::Malformed)?;
        let expected = self.mac(body.as_bytes());
        if expected.len() != signature.len() || !bool::from(expected.ct_eq(&signature)) {
            return Err(TokenError::BadSignature);
        }
        let raw = URL_SAFE_NO_PAD.decode(body).map_err(|_| TokenError::Malformed)?;
        let claims: AccessClaims = serde_json::from_slice(&raw).map_err(|_| TokenError::Malformed)?;
        if claims.exp < now {
            return Err(TokenError::Expired);
        }
        Ok(claims.sub)
    }

    fn mac(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts keys of any length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

fn confirmation_payload(user: &user::Model, issued_at: i64) -> Vec<u8> {
    format!(
        "confirm\0{}\0{}\0{}\0{}\0{}\0{}",
        user.id,
        user.username,
        user.email,
        user.role.as_str(),
        user.last_login.map(|t| t.to_string()).unwrap_or_default(),
        issued_at
    )
    .into_bytes()
}

fn to_base36(mut value: i64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value <= 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.iter().rev().map(|&b| char::from(b)).collect()
}

fn from_base36(raw: &str) -> Option<i64> {
    if raw.is_empty() || raw.len() > 12 {
        return None;
    }
    i64::from_str_radix(raw, 36).ok()
}

fn now_sec() -> i64 {
    jiff::Timestamp::now().as_second()
}
