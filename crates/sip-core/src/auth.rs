//! RFC 2617 Digest authentication (MD5)
//!
//! One challenge is held at a time and answered at most once; nonce reuse
//! counting is not supported, so the nonce count is pinned to `"00000001"`.

use std::fmt::Write as _;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Fixed nonce count: a single authenticated attempt per challenge
pub const NONCE_COUNT: &str = "00000001";

/// A parsed WWW-Authenticate Digest challenge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    /// Raw qop offer from the server, e.g. `auth`
    pub qop: Option<String>,
    pub stale: bool,
}

impl DigestChallenge {
    /// Parse a WWW-Authenticate header value
    ///
    /// Accepts the value with or without its leading `Digest` token. Params
    /// are comma-separated `key="value"` pairs with optional quoting; keys are
    /// case-insensitive. A challenge without a nonce is unusable.
    pub fn parse(header: &str) -> Result<DigestChallenge> {
        let params = header
            .trim()
            .strip_prefix("Digest")
            .unwrap_or(header)
            .trim();

        let mut challenge = DigestChallenge::default();
        for param in params.split(',') {
            let Some((name, value)) = param.split_once('=') else {
                continue;
            };
            let name = name.trim();
            let value = value.trim().trim_matches('"');
            if name.eq_ignore_ascii_case("realm") {
                challenge.realm = value.to_string();
            } else if name.eq_ignore_ascii_case("nonce") {
                challenge.nonce = value.to_string();
            } else if name.eq_ignore_ascii_case("opaque") {
                challenge.opaque = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("qop") {
                challenge.qop = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("stale") {
                challenge.stale = value.eq_ignore_ascii_case("true");
            }
        }

        if challenge.nonce.is_empty() {
            return Err(Error::MalformedChallenge {
                reason: "missing nonce",
            });
        }
        Ok(challenge)
    }

    /// Apply an operator-configured realm, which wins over the server's
    pub fn override_realm(&mut self, realm: &str) {
        if !realm.is_empty() {
            debug!(realm, "using configured realm for digest");
            self.realm = realm.to_string();
        }
    }
}

/// Computed Digest credentials for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestCredentials {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub opaque: Option<String>,
    /// cnonce/nc pair, present only when qop was applied
    pub cnonce: Option<String>,
}

impl DigestCredentials {
    /// Compute credentials for a challenge, generating a fresh cnonce
    pub fn compute(
        challenge: &DigestChallenge,
        method: &str,
        uri: &str,
        username: &str,
        password: &str,
        qop_enabled: bool,
    ) -> DigestCredentials {
        let cnonce = format!("{:08x}", rand::random::<u32>());
        Self::compute_with_cnonce(challenge, method, uri, username, password, qop_enabled, &cnonce)
    }

    /// Compute credentials with a caller-supplied cnonce
    ///
    /// HA1 = MD5(user:realm:password), HA2 = MD5(method:uri);
    /// response = MD5(HA1:nonce:HA2) without qop, or
    /// MD5(HA1:nonce:nc:cnonce:auth:HA2) with qop.
    pub fn compute_with_cnonce(
        challenge: &DigestChallenge,
        method: &str,
        uri: &str,
        username: &str,
        password: &str,
        qop_enabled: bool,
        cnonce: &str,
    ) -> DigestCredentials {
        let ha1 = md5_hex(&format!("{username}:{}:{password}", challenge.realm));
        let ha2 = md5_hex(&format!("{method}:{uri}"));

        let (response, cnonce) = if qop_enabled {
            let response = md5_hex(&format!(
                "{ha1}:{}:{NONCE_COUNT}:{cnonce}:auth:{ha2}",
                challenge.nonce
            ));
            (response, Some(cnonce.to_string()))
        } else {
            (md5_hex(&format!("{ha1}:{}:{ha2}", challenge.nonce)), None)
        };

        DigestCredentials {
            username: username.to_string(),
            realm: challenge.realm.clone(),
            nonce: challenge.nonce.clone(),
            uri: uri.to_string(),
            response,
            opaque: challenge.opaque.clone(),
            cnonce,
        }
    }

    /// Render the Authorization header value for these credentials
    pub fn authorization_value(&self) -> String {
        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            self.username, self.realm, self.nonce, self.uri
        );
        if let Some(cnonce) = &self.cnonce {
            let _ = write!(
                value,
                ", cnonce=\"{cnonce}\", nc={NONCE_COUNT}, qop=\"auth\""
            );
        }
        let _ = write!(value, ", response=\"{}\", algorithm=MD5", self.response);
        if let Some(opaque) = &self.opaque {
            let _ = write!(value, ", opaque=\"{opaque}\"");
        }
        value
    }
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
