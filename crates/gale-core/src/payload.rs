//! The value-shape model behind `send`.
//!
//! Handlers return a [`Payload`]; the shape alone picks the status and the
//! content-type preset:
//!
//! | Shape | Status | Preset |
//! |---|---|---|
//! | `None` | 204 | text/plain |
//! | `Text` | 200 | text/plain |
//! | `Bytes` | 200 | octet-stream |
//! | `Json` | 200 | json |

use bytes::Bytes;
use serde::Serialize;

use crate::error::HttpError;
use crate::headers::HeaderPreset;

/// A handler-returned value, dispatched by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Nothing to say: 204, empty body.
    None,
    /// A UTF-8 string: 200 text/plain.
    Text(String),
    /// A contiguous byte view: 200 octet-stream.
    Bytes(Bytes),
    /// A JSON document: 200 json, serialized on send.
    Json(serde_json::Value),
}

impl Payload {
    /// Builds a JSON payload from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::server_error`] if serialization fails, which
    /// routes the caller onto the `send_error` fallback path.
    pub fn json<S: Serialize>(value: &S) -> Result<Self, HttpError> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|_| HttpError::server_error())
    }

    /// The default status for this shape, before any override.
    #[must_use]
    pub fn default_status(&self) -> u16 {
        match self {
            Self::None => 204,
            _ => 200,
        }
    }

    /// The content-type preset for this shape.
    #[must_use]
    pub fn preset(&self) -> HeaderPreset {
        match self {
            Self::None | Self::Text(_) => HeaderPreset::TextPlain,
            Self::Bytes(_) => HeaderPreset::OctetStream,
            Self::Json(_) => HeaderPreset::Json,
        }
    }

    /// Serializes the payload into response body bytes.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::server_error`] if JSON serialization fails.
    pub fn into_body(self) -> Result<Bytes, HttpError> {
        match self {
            Self::None => Ok(Bytes::new()),
            Self::Text(text) => Ok(Bytes::from(text)),
            Self::Bytes(bytes) => Ok(bytes),
            Self::Json(value) => serde_json::to_vec(&value)
                .map(Bytes::from)
                .map_err(|_| HttpError::server_error()),
        }
    }
}

impl From<()> for Payload {
    fn from((): ()) -> Self {
        Self::None
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn none_is_204_text() {
        let payload = Payload::None;
        assert_eq!(payload.default_status(), 204);
        assert_eq!(payload.preset(), HeaderPreset::TextPlain);
        assert!(payload.into_body().unwrap().is_empty());
    }

    #[test]
    fn text_is_200_text() {
        let payload = Payload::from("hello");
        assert_eq!(payload.default_status(), 200);
        assert_eq!(payload.preset(), HeaderPreset::TextPlain);
        assert_eq!(&payload.into_body().unwrap()[..], b"hello");
    }

    #[test]
    fn bytes_is_200_octet_stream() {
        let payload = Payload::from(vec![1u8, 2, 3]);
        assert_eq!(payload.default_status(), 200);
        assert_eq!(payload.preset(), HeaderPreset::OctetStream);
    }

    #[test]
    fn json_serializes_compact() {
        let payload = Payload::from(json!({"ok": true}));
        assert_eq!(payload.preset(), HeaderPreset::Json);
        assert_eq!(&payload.into_body().unwrap()[..], br#"{"ok":true}"#);
    }

    #[test]
    fn json_constructor_accepts_serialize() {
        #[derive(Serialize)]
        struct User {
            id: &'static str,
            name: &'static str,
        }
        let payload = Payload::json(&User {
            id: "x",
            name: "Ada",
        })
        .unwrap();
        assert_eq!(
            &payload.into_body().unwrap()[..],
            br#"{"id":"x","name":"Ada"}"#
        );
    }
}
