//! Signed session tokens.
//!
//! A signed token is three base64url segments `header.payload.sig`.
//! The signature is HMAC-SHA256 over `header.payload` with the
//! configured secret; verification is constant-time via the Mac trait.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Fixed header for tokens minted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Header {
    pub alg: String,
    pub typ: String,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Claims carried by a signed token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,

    /// Session id, consulted against the revocation list.
    pub sid: String,

    /// Issued-at, epoch seconds.
    pub iat: u64,

    /// Not-before, epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Expiry, epoch seconds.
    pub exp: u64,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Why a signed token failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedTokenError {
    /// Not three segments, bad base64, or bad JSON.
    Malformed,
    /// Signature mismatch.
    BadSignature,
    /// Header declares an algorithm we do not accept.
    UnsupportedAlgorithm,
}

/// Encode and sign claims into a token string.
pub fn sign(claims: &Claims, secret: &[u8]) -> String {
    let header = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&Header::default()).expect("header serializes"),
    );
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).expect("claims serialize"));
    let signing_input = format!("{}.{}", header, payload);

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(signing_input.as_bytes());
    let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    format!("{}.{}", signing_input, sig)
}

/// Verify a token's signature and decode its claims.
///
/// Only the signature and shape are checked here; temporal claims are
/// the validator's responsibility so failures map to distinct codes.
pub fn verify(token: &str, secret: &[u8]) -> Result<Claims, SignedTokenError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(SignedTokenError::Malformed);
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| SignedTokenError::Malformed)?;
    let header: Header =
        serde_json::from_slice(&header_bytes).map_err(|_| SignedTokenError::Malformed)?;
    if header.alg != "HS256" {
        return Err(SignedTokenError::UnsupportedAlgorithm);
    }

    let sig = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| SignedTokenError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());
    mac.verify_slice(&sig)
        .map_err(|_| SignedTokenError::BadSignature)?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| SignedTokenError::Malformed)?;
    serde_json::from_slice(&payload_bytes).map_err(|_| SignedTokenError::Malformed)
}

/// Heuristic for auto token-kind detection: a signed token has exactly
/// three dot-separated segments.
pub fn looks_signed(token: &str) -> bool {
    token.bytes().filter(|b| *b == b'.').count() == 2
}
