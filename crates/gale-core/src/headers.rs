//! Frozen content-type presets and the reply-header argument type.
//!
//! The three presets cover the content types the value-shape dispatch can
//! produce. Handlers passing a preset hit a fast path that writes a single
//! static header; custom maps take the general path.

/// One of the three canonical content-type presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderPreset {
    /// `text/plain; charset=utf-8`
    TextPlain,
    /// `application/json; charset=utf-8`
    Json,
    /// `application/octet-stream`
    OctetStream,
}

impl HeaderPreset {
    /// The content-type value this preset writes.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::TextPlain => "text/plain; charset=utf-8",
            Self::Json => "application/json; charset=utf-8",
            Self::OctetStream => "application/octet-stream",
        }
    }
}

/// Headers supplied to `reply`/`set_headers`.
///
/// `Preset` is the zero-allocation fast path; `Custom` carries an arbitrary
/// name/value list written in order.
#[derive(Debug, Clone)]
pub enum ReplyHeaders {
    /// One of the frozen presets.
    Preset(HeaderPreset),
    /// Arbitrary headers, written in order.
    Custom(Vec<(String, String)>),
    /// No headers.
    None,
}

impl ReplyHeaders {
    /// A custom header list from name/value pairs.
    #[must_use]
    pub fn custom<N: Into<String>, V: Into<String>>(pairs: Vec<(N, V)>) -> Self {
        Self::Custom(
            pairs
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }
}

impl From<HeaderPreset> for ReplyHeaders {
    fn from(preset: HeaderPreset) -> Self {
        Self::Preset(preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_content_types_are_exact() {
        assert_eq!(
            HeaderPreset::TextPlain.content_type(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(
            HeaderPreset::Json.content_type(),
            "application/json; charset=utf-8"
        );
        assert_eq!(
            HeaderPreset::OctetStream.content_type(),
            "application/octet-stream"
        );
    }

    #[test]
    fn custom_headers_keep_order() {
        let headers = ReplyHeaders::custom(vec![("x-a", "1"), ("x-b", "2")]);
        match headers {
            ReplyHeaders::Custom(pairs) => {
                assert_eq!(pairs[0], ("x-a".to_string(), "1".to_string()));
                assert_eq!(pairs[1], ("x-b".to_string(), "2".to_string()));
            }
            _ => panic!("expected custom headers"),
        }
    }
}
