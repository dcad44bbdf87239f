//! Correlation envelope and wait token types.
//!
//! The envelope is the unit exchanged over a transport: one JSON object per
//! transport frame, carrying arbitrary payload keys plus the reserved
//! correlation key `waitId`.
//!
//! # Wire Format
//!
//! ```json
//! {
//!   "any": "payload",
//!   "fields": 42,
//!   "waitId": "550e8400-e29b-41d4-a716-446655440000"
//! }
//! ```
//!
//! `waitId` is the only reserved key. It is an opaque string token linking a
//! reply to its originating request within one connection; engines stamp a
//! fresh one on any outbound envelope that lacks it. Payload keys are held in
//! a map and read by key lookup; the reserved key is extracted at
//! construction so the payload never aliases it.
//!
//! # Decode Policy
//!
//! [`Envelope::decode`] is deliberately permissive: anything that is not a
//! JSON object comes back as `None` and the caller discards the frame. A
//! single corrupt frame never tears down a connection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::result::Result as StdResult;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Reserved envelope key carrying the correlation token.
pub const WAIT_ID_KEY: &str = "waitId";

// ============================================================================
// WaitId
// ============================================================================

/// Opaque correlation token linking a reply to its originating request.
///
/// Tokens are only ever compared within one connection; there is no
/// process-wide registry. [`WaitId::generate`] produces a version-4 UUID
/// string, which is collision-resistant for the lifetime of any connection.
/// Caller-supplied tokens are accepted as-is via the `From` impls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaitId(String);

impl WaitId {
    /// Generates a fresh random token.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the token as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WaitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for WaitId {
    #[inline]
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for WaitId {
    #[inline]
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl From<WaitId> for String {
    #[inline]
    fn from(id: WaitId) -> Self {
        id.0
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// The structured unit exchanged over a transport.
///
/// Holds the payload as a string-keyed map alongside the typed correlation
/// token. Construction pulls `waitId` out of the payload, so the map and the
/// token never disagree; serialization puts it back as the last key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    /// Correlation token, if any. Absent on untracked broadcasts until an
    /// engine stamps one at transmission.
    wait_id: Option<WaitId>,
    /// All non-reserved payload fields.
    payload: Map<String, Value>,
}

// ============================================================================
// Construction
// ============================================================================

impl Envelope {
    /// Creates an envelope from a payload map.
    ///
    /// A non-empty string under `waitId` is moved into the typed token;
    /// anything else under that key (numbers, empty strings) is dropped and
    /// treated as absent, so a later send stamps a fresh token.
    #[must_use]
    pub fn new(mut payload: Map<String, Value>) -> Self {
        let wait_id = match payload.remove(WAIT_ID_KEY) {
            Some(Value::String(token)) if !token.is_empty() => Some(WaitId::from(token)),
            _ => None,
        };
        Self { wait_id, payload }
    }

    /// Creates an envelope from a JSON value.
    ///
    /// Returns `None` unless the value is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(payload) => Some(Self::new(payload)),
            _ => None,
        }
    }

    /// Decodes one wire frame.
    ///
    /// Permissive by design: malformed JSON and non-object frames decode to
    /// `None` and the caller discards them. Never panics.
    #[must_use]
    pub fn decode(text: &str) -> Option<Self> {
        serde_json::from_str::<Value>(text)
            .ok()
            .and_then(Self::from_value)
    }

    /// Serializes the envelope into one wire frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if a payload value cannot
    /// be serialized.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }

    /// Converts the envelope back into a plain JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = self.payload.clone();
        if let Some(wait_id) = &self.wait_id {
            map.insert(WAIT_ID_KEY.to_string(), Value::String(wait_id.to_string()));
        }
        Value::Object(map)
    }
}

impl From<Map<String, Value>> for Envelope {
    #[inline]
    fn from(payload: Map<String, Value>) -> Self {
        Self::new(payload)
    }
}

// ============================================================================
// Correlation Token
// ============================================================================

impl Envelope {
    /// Returns the correlation token, if one is set.
    #[inline]
    #[must_use]
    pub fn wait_id(&self) -> Option<&WaitId> {
        self.wait_id.as_ref()
    }

    /// Sets the correlation token.
    #[inline]
    pub fn set_wait_id(&mut self, wait_id: WaitId) {
        self.wait_id = Some(wait_id);
    }

    /// Sets the correlation token, builder style.
    #[inline]
    #[must_use]
    pub fn with_wait_id(mut self, wait_id: WaitId) -> Self {
        self.wait_id = Some(wait_id);
        self
    }

    /// Returns the token, stamping a freshly generated one if none is set.
    ///
    /// Idempotent once a non-empty token exists. Engines call this before
    /// every transmission so requests always go out correlatable.
    pub fn ensure_wait_id(&mut self) -> &WaitId {
        if self.wait_id.as_ref().is_none_or(|id| id.as_str().is_empty()) {
            self.wait_id = Some(WaitId::generate());
        }
        self.wait_id.get_or_insert_with(WaitId::generate)
    }
}

// ============================================================================
// Payload Access
// ============================================================================

impl Envelope {
    /// Returns the payload map.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Gets a payload value by key.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Gets a string value from the payload.
    ///
    /// Returns empty string if key not found or not a string.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Gets a u64 value from the payload.
    ///
    /// Returns 0 if key not found or not a number.
    #[inline]
    #[must_use]
    pub fn get_u64(&self, key: &str) -> u64 {
        self.payload
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or_default()
    }

    /// Gets a boolean value from the payload.
    ///
    /// Returns false if key not found or not a boolean.
    #[inline]
    #[must_use]
    pub fn get_bool(&self, key: &str) -> bool {
        self.payload
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or_default()
    }
}

// ============================================================================
// Serialization
// ============================================================================

impl Serialize for Envelope {
    fn serialize<S>(&self, serializer: S) -> StdResult<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let reserved = usize::from(self.wait_id.is_some());
        let mut map = serializer.serialize_map(Some(self.payload.len() + reserved))?;
        for (key, value) in &self.payload {
            map.serialize_entry(key, value)?;
        }
        if let Some(wait_id) = &self.wait_id {
            map.serialize_entry(WAIT_ID_KEY, wait_id)?;
        }
        map.end()
    }
}

// ============================================================================
// Tests
// ============================================================================
