use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Registered claims plus an open extension map.
///
/// `aud` keeps its wire form: a single string or an array of strings are
/// both legal per RFC 7519 §4.1.3.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimsSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClaimsSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issuer(mut self, iss: &str) -> Self {
        self.iss = Some(iss.to_string());
        self
    }

    pub fn subject(mut self, sub: &str) -> Self {
        self.sub = Some(sub.to_string());
        self
    }

    pub fn audience(mut self, aud: &str) -> Self {
        self.aud = Some(Value::String(aud.to_string()));
        self
    }

    pub fn issued_at(mut self, at: DateTime<Utc>) -> Self {
        self.iat = Some(at.timestamp());
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.exp = Some(at.timestamp());
        self
    }

    pub fn claim(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.extra.get(name).and_then(Value::as_str)
    }

    /// True when `aud` contains `expected` (string equality, or array
    /// membership for multi-audience tokens).
    pub fn audience_matches(&self, expected: &str) -> bool {
        match &self.aud {
            Some(Value::String(s)) => s == expected,
            Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some(expected)),
            _ => false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.exp {
            Some(exp) => exp <= now.timestamp(),
            None => false,
        }
    }

    /// Serialized payload bytes for signing/encryption.
    pub fn to_json_bytes(&self) -> Vec<u8> {
        // ClaimsSet serialization cannot fail: all values are JSON-native.
        serde_json::to_vec(self).unwrap_or_default()
    }
}
