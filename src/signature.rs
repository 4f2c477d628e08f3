//! # Request Signing
//!
//! The service authenticates the WebSocket upgrade through query parameters:
//! `sign = hex(sha256(appID + salt + timestamp + appSecret))`, where `salt` is
//! 16 random hex characters and `timestamp` is the current Unix time in
//! milliseconds. The secret itself never leaves the client.

use sha2::{Digest, Sha256};

const SALT_LEN: usize = 16;

/// Hex-encoded SHA-256 over the concatenated fields.
pub fn sign(app_id: &str, salt: &str, timestamp: &str, app_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(app_id.as_bytes());
    hasher.update(salt.as_bytes());
    hasher.update(timestamp.as_bytes());
    hasher.update(app_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// 16 random lowercase hex characters.
pub fn generate_salt() -> String {
    let mut salt = uuid::Uuid::new_v4().simple().to_string();
    salt.truncate(SALT_LEN);
    salt
}

/// Query parameters of one signed connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedQuery {
    pub app_id: String,
    pub salt: String,
    pub timestamp: String,
    pub sign: String,
    pub from: String,
    pub to: String,
    pub rate: u32,
}

impl SignedQuery {
    /// Sign a request for now with a fresh salt.
    pub fn new(app_id: &str, app_secret: &str, from: &str, to: &str, rate: u32) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        Self::with_salt(app_id, app_secret, &generate_salt(), &timestamp, from, to, rate)
    }

    pub fn with_salt(
        app_id: &str,
        app_secret: &str,
        salt: &str,
        timestamp: &str,
        from: &str,
        to: &str,
        rate: u32,
    ) -> Self {
        Self {
            app_id: app_id.to_string(),
            salt: salt.to_string(),
            timestamp: timestamp.to_string(),
            sign: sign(app_id, salt, timestamp, app_secret),
            from: from.to_string(),
            to: to.to_string(),
            rate,
        }
    }

    /// Append the query to `base`, keeping any query it already has.
    pub fn to_url(&self, base: &str) -> String {
        let rate = self.rate.to_string();
        let params = [
            ("appID", self.app_id.as_str()),
            ("salt", self.salt.as_str()),
            ("timestamp", self.timestamp.as_str()),
            ("sign", self.sign.as_str()),
            ("from", self.from.as_str()),
            ("to", self.to.as_str()),
            ("rate", rate.as_str()),
        ];
        let query = params
            .iter()
            .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{}{}{}", base, separator, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_known_vectors() {
        assert_eq!(
            sign("", "", "", ""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        // Fields are concatenated without separators.
        assert_eq!(
            sign("a", "b", "c", ""),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sign("ab", "", "c", ""), sign("a", "b", "c", ""));
        assert_ne!(sign("app", "salt", "1", "secret"), sign("app", "salt", "2", "secret"));
    }

    #[test]
    fn test_salt_shape() {
        let salt = generate_salt();
        assert_eq!(salt.len(), SALT_LEN);
        assert!(salt.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn test_url_carries_every_parameter() {
        let query = SignedQuery::with_salt("id", "secret", "0123abcd0123abcd", "1700000000000", "zh-CN", "en US", 16000);
        let url = query.to_url("ws://localhost:9000/speech");

        let expected_sign = sign("id", "0123abcd0123abcd", "1700000000000", "secret");
        assert_eq!(
            url,
            format!(
                "ws://localhost:9000/speech?appID=id&salt=0123abcd0123abcd&timestamp=1700000000000&sign={}&from=zh-CN&to=en%20US&rate=16000",
                expected_sign
            )
        );
        assert!(!url.contains("secret"));
    }

    #[test]
    fn test_url_extends_existing_query() {
        let query = SignedQuery::with_salt("id", "s", "aaaa", "1", "en", "fr", 8000);
        assert!(query.to_url("ws://host/path?v=2").starts_with("ws://host/path?v=2&appID=id&"));
    }

    #[test]
    fn test_fresh_query_uses_millisecond_timestamp() {
        let before = chrono::Utc::now().timestamp_millis();
        let query = SignedQuery::new("id", "secret", "en", "fr", 16000);
        let after = chrono::Utc::now().timestamp_millis();

        let stamp: i64 = query.timestamp.parse().unwrap();
        assert!(stamp >= before && stamp <= after);
        assert_eq!(query.sign, sign("id", &query.salt, &query.timestamp, "secret"));
    }
}
