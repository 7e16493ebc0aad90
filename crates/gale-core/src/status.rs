//! Canonical HTTP status lines.
//!
//! The engine writes status lines as a single pre-built `"<code> <reason>"`
//! string so the hot path never formats. The table covers the codes the
//! server can emit; anything outside it falls back to
//! `500 Internal Server Error`.

/// The fallback status line for codes outside the table.
pub const FALLBACK_STATUS_LINE: &str = "500 Internal Server Error";

/// Returns the canonical status line for a status code.
///
/// Unknown codes fall back to [`FALLBACK_STATUS_LINE`].
#[must_use]
pub const fn status_line(code: u16) -> &'static str {
    match code {
        100 => "100 Continue",
        101 => "101 Switching Protocols",
        102 => "102 Processing",
        200 => "200 OK",
        201 => "201 Created",
        202 => "202 Accepted",
        203 => "203 Non-Authoritative Information",
        204 => "204 No Content",
        205 => "205 Reset Content",
        206 => "206 Partial Content",
        300 => "300 Multiple Choices",
        301 => "301 Moved Permanently",
        302 => "302 Found",
        303 => "303 See Other",
        304 => "304 Not Modified",
        305 => "305 Use Proxy",
        306 => "306 Switch Proxy",
        307 => "307 Temporary Redirect",
        308 => "308 Permanent Redirect",
        400 => "400 Bad Request",
        401 => "401 Unauthorized",
        402 => "402 Payment Required",
        403 => "403 Forbidden",
        404 => "404 Not Found",
        405 => "405 Method Not Allowed",
        406 => "406 Not Acceptable",
        407 => "407 Proxy Authentication Required",
        408 => "408 Request Timeout",
        409 => "409 Conflict",
        410 => "410 Gone",
        411 => "411 Length Required",
        412 => "412 Precondition Failed",
        413 => "413 Payload Too Large",
        414 => "414 URI Too Long",
        415 => "415 Unsupported Media Type",
        418 => "418 I'm a Teapot",
        422 => "422 Unprocessable Entity",
        429 => "429 Too Many Requests",
        500 => "500 Internal Server Error",
        501 => "501 Not Implemented",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        504 => "504 Gateway Timeout",
        _ => FALLBACK_STATUS_LINE,
    }
}

/// Returns true if the code has a canonical entry in the table.
#[must_use]
pub const fn is_known_status(code: u16) -> bool {
    matches!(
        code,
        100..=102 | 200..=206 | 300..=308 | 400..=415 | 418 | 422 | 429 | 500..=504
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_canonical_lines() {
        assert_eq!(status_line(200), "200 OK");
        assert_eq!(status_line(201), "201 Created");
        assert_eq!(status_line(204), "204 No Content");
        assert_eq!(status_line(413), "413 Payload Too Large");
        assert_eq!(status_line(418), "418 I'm a Teapot");
        assert_eq!(status_line(503), "503 Service Unavailable");
    }

    #[test]
    fn unknown_codes_fall_back_to_500() {
        assert_eq!(status_line(0), FALLBACK_STATUS_LINE);
        assert_eq!(status_line(299), FALLBACK_STATUS_LINE);
        assert_eq!(status_line(599), FALLBACK_STATUS_LINE);
        assert_eq!(status_line(999), FALLBACK_STATUS_LINE);
    }

    #[test]
    fn membership_matches_table() {
        for code in 0..=1000u16 {
            let line = status_line(code);
            if is_known_status(code) {
                assert!(line.starts_with(&code.to_string()), "code {code}");
            } else {
                assert_eq!(line, FALLBACK_STATUS_LINE, "code {code}");
            }
        }
    }
}
