//! Token signing seam.
//!
//! The signing primitive is treated as an opaque trusted function; this
//! module only fixes its shape ([`TokenSigner`]) and provides an HS256
//! implementation on top of the `hmac`/`sha2` crates. Tokens are compact JWS
//! strings: `base64url(header).base64url(claims).base64url(mac)`, no padding.

use std::time::{SystemTime, UNIX_EPOCH};

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    hmac::{Hmac, Mac},
    rand::RngCore,
    secrecy::{ExposeSecret, SecretString},
    serde::{Deserialize, Serialize},
    sha2::Sha256,
    thiserror::Error,
};

type HmacSha256 = Hmac<Sha256>;

const ALG: &str = "HS256";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Session,
    Renewal,
}

/// Claims carried by session and renewal tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id the token is bound to.
    pub sub: String,
    /// Random per-token id; makes every token value unique.
    pub jti: String,
    pub kind: TokenKind,
    pub iat: u64,
    pub exp: u64,
}

impl TokenClaims {
    /// Fresh claims for `user_id` valid for `ttl_secs` from now.
    pub fn new(user_id: &str, kind: TokenKind, ttl_secs: u64) -> Self {
        let iat = unix_now();
        Self {
            sub: user_id.to_string(),
            jti: random_id(),
            kind,
            iat,
            exp: iat.saturating_add(ttl_secs),
        }
    }
}

#[derive(Debug, Error)]
pub enum SignError {
    #[error("malformed token")]
    Malformed,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("failed to encode claims: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait TokenSigner: Send + Sync {
    fn sign(&self, claims: &TokenClaims) -> Result<String, SignError>;

    /// Check structure, signature and expiry, returning the claims.
    fn verify(&self, token: &str) -> Result<TokenClaims, SignError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// HS256 signer keyed by a configured secret.
pub struct HmacSigner {
    key: SecretString,
}

impl HmacSigner {
    pub fn new(key: SecretString) -> Self {
        Self { key }
    }

    fn mac(&self) -> Result<HmacSha256, SignError> {
        HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .map_err(|e| SignError::InvalidKey(e.to_string()))
    }
}

impl TokenSigner for HmacSigner {
    fn sign(&self, claims: &TokenClaims) -> Result<String, SignError> {
        let header = serde_json::to_vec(&Header {
            alg: ALG.into(),
            typ: "JWT".into(),
        })?;
        let payload = serde_json::to_vec(claims)?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{signing_input}.{signature}"))
    }

    fn verify(&self, token: &str) -> Result<TokenClaims, SignError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SignError::Malformed);
        };

        let header: Header = decode_json(header_b64)?;
        if header.alg != ALG {
            return Err(SignError::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| SignError::Malformed)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SignError::BadSignature)?;

        let claims: TokenClaims = decode_json(payload_b64)?;
        if claims.exp <= unix_now() {
            return Err(SignError::Expired);
        }
        Ok(claims)
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, SignError> {
    let raw = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| SignError::Malformed)?;
    serde_json::from_slice(&raw).map_err(|_| SignError::Malformed)
}

/// 256 random bits, base64url encoded.
pub fn random_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(key: &str) -> HmacSigner {
        HmacSigner::new(SecretString::new(key.into()))
    }

    #[test]
    fn sign_then_verify() {
        let s = signer("k1");
        let claims = TokenClaims::new("user-1", TokenKind::Session, 60);
        let token = s.sign(&claims).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(s.verify(&token).unwrap(), claims);
    }

    #[test]
    fn other_key_rejected() {
        let token = signer("k1")
            .sign(&TokenClaims::new("user-1", TokenKind::Renewal, 60))
            .unwrap();
        assert!(matches!(
            signer("k2").verify(&token),
            Err(SignError::BadSignature)
        ));
    }

    #[test]
    fn tampered_payload_rejected() {
        let s = signer("k1");
        let token = s
            .sign(&TokenClaims::new("user-1", TokenKind::Session, 60))
            .unwrap();
        let mut forged = TokenClaims::new("admin", TokenKind::Session, 60);
        forged.jti = "x".into();
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert!(matches!(s.verify(&tampered), Err(SignError::BadSignature)));
    }

    #[test]
    fn expired_rejected() {
        let s = signer("k1");
        let mut claims = TokenClaims::new("user-1", TokenKind::Session, 60);
        claims.exp = claims.iat.saturating_sub(1);
        let token = s.sign(&claims).unwrap();
        assert!(matches!(s.verify(&token), Err(SignError::Expired)));
    }

    #[test]
    fn malformed_rejected() {
        let s = signer("k1");
        for token in ["", "a.b", "a.b.c.d", "!!.??.**", "e30.e30.e30"] {
            assert!(s.verify(token).is_err(), "{token}");
        }
    }

    #[test]
    fn token_values_are_unique() {
        let s = signer("k1");
        let a = s
            .sign(&TokenClaims::new("u", TokenKind::Renewal, 60))
            .unwrap();
        let b = s
            .sign(&TokenClaims::new("u", TokenKind::Renewal, 60))
            .unwrap();
        assert_ne!(a, b);
    }
}
