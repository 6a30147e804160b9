//! Visitor session identity carried in a signed cookie.
//!
//! Cookie format: `base64url(json{id, dt}).hex(sha256(secret ‖ payload))`.
//! Anything that fails to decode or verify is discarded and a fresh
//! identity is minted; a bad cookie never fails the request.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::cache::CacheConfig;

const SESSION_ID_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// 32 lowercase hex characters.
    pub id: String,
    pub issued: OffsetDateTime,
    /// Minted during this request rather than read from a cookie.
    pub minted: bool,
}

#[derive(Serialize, Deserialize)]
struct CookiePayload {
    id: String,
    dt: i64,
}

impl Session {
    pub fn mint(now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            issued: now,
            minted: true,
        }
    }

    /// Restore a session from a cookie value, or mint one when the cookie is
    /// absent, malformed or forged.
    pub fn from_cookie(raw: Option<&str>, secret: &str, now: OffsetDateTime) -> Self {
        raw.and_then(|value| decode_cookie(value, secret))
            .unwrap_or_else(|| Self::mint(now))
    }

    pub fn to_cookie(&self, secret: &str) -> String {
        let payload = CookiePayload {
            id: self.id.clone(),
            dt: self.issued.unix_timestamp(),
        };
        // Serializing two plain fields cannot fail.
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        let encoded = URL_SAFE_NO_PAD.encode(json);
        let signature = sign(secret, &encoded);
        format!("{encoded}.{signature}")
    }

    /// Whether the cookie is older than the refresh window.
    pub fn is_stale(&self, config: &CacheConfig, now: OffsetDateTime) -> bool {
        let age = now - self.issued;
        age.whole_seconds() >= 0
            && age.unsigned_abs() >= config.session_refresh
    }

    /// Reissue the cookie timestamp.
    pub fn refresh(&mut self, now: OffsetDateTime) {
        self.issued = now;
    }
}

fn decode_cookie(raw: &str, secret: &str) -> Option<Session> {
    let (encoded, signature) = raw.trim().split_once('.')?;
    let expected = sign(secret, encoded);
    if expected.as_bytes().ct_eq(signature.as_bytes()).unwrap_u8() == 0 {
        return None;
    }

    let json = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    let payload: CookiePayload = serde_json::from_slice(&json).ok()?;
    if payload.id.len() != SESSION_ID_LEN || !payload.id.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let issued = OffsetDateTime::from_unix_timestamp(payload.dt).ok()?;
    Some(Session {
        id: payload.id.to_ascii_lowercase(),
        issued,
        minted: false,
    })
}

fn sign(secret: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Probability gate deciding whether this request pays for an expiry sweep.
pub fn should_prune<R: Rng + ?Sized>(config: &CacheConfig, rng: &mut R) -> bool {
    if !config.prune_enabled {
        return false;
    }
    let probability = config.prune_probability.clamp(0.0, 1.0);
    rng.random_bool(probability)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use time::macros::datetime;

    use super::*;

    const SECRET: &str = "s3cret";

    #[test]
    fn minted_ids_are_32_hex() {
        let session = Session::mint(OffsetDateTime::now_utc());
        assert_eq!(session.id.len(), 32);
        assert!(session.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(session.minted);
    }

    #[test]
    fn cookie_round_trips() {
        let now = datetime!(2024-05-01 12:00 UTC);
        let session = Session::mint(now);
        let cookie = session.to_cookie(SECRET);
        let restored = Session::from_cookie(Some(&cookie), SECRET, now);
        assert_eq!(restored.id, session.id);
        assert_eq!(restored.issued, now);
        assert!(!restored.minted);
    }

    #[test]
    fn tampered_cookie_mints_a_new_session() {
        let now = datetime!(2024-05-01 12:00 UTC);
        let cookie = Session::mint(now).to_cookie(SECRET);
        let forged = Session::from_cookie(Some(&cookie), "other", now);
        assert!(forged.minted);

        let garbage = Session::from_cookie(Some("not-a-cookie"), SECRET, now);
        assert!(garbage.minted);
    }

    #[test]
    fn staleness_follows_refresh_window() {
        let config = CacheConfig::default();
        let session = Session::mint(datetime!(2024-05-01 12:00 UTC));
        assert!(!session.is_stale(&config, datetime!(2024-05-01 12:01 UTC)));
        assert!(session.is_stale(&config, datetime!(2024-05-01 12:05 UTC)));
    }

    #[test]
    fn prune_gate_respects_extremes() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut config = CacheConfig {
            prune_probability: 1.0,
            ..CacheConfig::default()
        };
        assert!(should_prune(&config, &mut rng));
        config.prune_probability = 0.0;
        assert!(!should_prune(&config, &mut rng));
        config.prune_probability = 1.0;
        config.prune_enabled = false;
        assert!(!should_prune(&config, &mut rng));
    }
}
