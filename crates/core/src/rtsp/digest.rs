//! RTSP Digest authentication (RFC 2617, referenced by RFC 2326 §22.1).
//!
//! Nonces are minted per-challenge and accepted once, rather than a
//! stateless shared-secret scheme, so a captured response can't be
//! replayed after the nonce is consumed.

use std::collections::HashSet;

use md5::{Digest, Md5};
use parking_lot::Mutex;
use rand::Rng;

/// Realm advertised in the `WWW-Authenticate` challenge.
pub const DEFAULT_REALM: &str = "rtsp-rs";

fn hex_md5(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// One user's digest credential, pre-hashed as `MD5(username:realm:password)`
/// so the plaintext password is never retained.
#[derive(Debug, Clone)]
pub struct DigestCredential {
    pub username: String,
    ha1: String,
}

impl DigestCredential {
    pub fn new(username: &str, realm: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            ha1: hex_md5(&format!("{username}:{realm}:{password}")),
        }
    }
}

/// Server-side Digest challenge/response verifier. Tracks issued nonces so
/// each is usable exactly once.
pub struct DigestAuthenticator {
    realm: String,
    credentials: Vec<DigestCredential>,
    issued_nonces: Mutex<HashSet<String>>,
}

impl DigestAuthenticator {
    pub fn new(realm: impl Into<String>, credentials: Vec<DigestCredential>) -> Self {
        Self {
            realm: realm.into(),
            credentials,
            issued_nonces: Mutex::new(HashSet::new()),
        }
    }

    /// Mint a fresh nonce and return the `WWW-Authenticate` header value.
    pub fn challenge(&self) -> String {
        let nonce = format!("{:016x}", rand::rng().random::<u64>());
        self.issued_nonces.lock().insert(nonce.clone());
        format!(r#"Digest realm="{}", nonce="{}""#, self.realm, nonce)
    }

    /// Verify an `Authorization: Digest ...` header value against `method`.
    /// Consumes the nonce on success or failure — a given challenge can
    /// only be answered once.
    pub fn verify(&self, method: &str, authorization: &str) -> bool {
        let fields = parse_digest_fields(authorization);

        let (Some(username), Some(nonce), Some(uri), Some(response)) = (
            fields.get("username"),
            fields.get("nonce"),
            fields.get("uri"),
            fields.get("response"),
        ) else {
            return false;
        };

        if !self.issued_nonces.lock().remove(nonce.as_str()) {
            return false;
        }

        let Some(credential) = self.credentials.iter().find(|c| &c.username == username) else {
            return false;
        };

        let ha2 = hex_md5(&format!("{method}:{uri}"));
        let expected = hex_md5(&format!("{}:{nonce}:{ha2}", credential.ha1));
        expected == *response
    }
}

/// Build the `Authorization: Digest ...` header value a client sends in
/// answer to a `WWW-Authenticate` challenge (RFC 2617 §3.2.2).
pub fn client_authorization_header(
    username: &str,
    realm: &str,
    password: &str,
    nonce: &str,
    method: &str,
    uri: &str,
) -> String {
    let ha1 = hex_md5(&format!("{username}:{realm}:{password}"));
    let ha2 = hex_md5(&format!("{method}:{uri}"));
    let response = hex_md5(&format!("{ha1}:{nonce}:{ha2}"));
    format!(
        r#"Digest username="{username}", realm="{realm}", nonce="{nonce}", uri="{uri}", response="{response}""#
    )
}

/// Extract `realm` and `nonce` from a `WWW-Authenticate` header value.
pub fn parse_challenge(header: &str) -> Option<(String, String)> {
    let fields = parse_digest_fields(header);
    Some((fields.get("realm")?.clone(), fields.get("nonce")?.clone()))
}

fn parse_digest_fields(header: &str) -> std::collections::HashMap<String, String> {
    let body = header.trim_start_matches("Digest").trim();
    let mut fields = std::collections::HashMap::new();
    for part in body.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            fields.insert(key.trim().to_string(), value.trim().trim_matches('"').to_string());
        }
    }
    fields
}
