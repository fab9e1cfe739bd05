//! Decoding of the forum's JSON response envelope.
//!
//! Both services answer with a JSON object. Failures are signalled either by an
//! `error` string, an `errors` array, or (for crashes and 404s) an HTML page
//! whose `<title>` is the only useful message.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::LikerError;

static TITLE_RE: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex")
});

/// Decode a response body, surfacing envelope errors as typed failures.
///
/// # Errors
///
/// - [`LikerError::Generic`] if the body is HTML with a `<title>`.
/// - [`LikerError::Parse`] if the body is neither JSON nor titled HTML.
/// - [`LikerError::Api`] if the JSON carries `error` or `errors`. Only the first
///   entry of `errors` is surfaced.
pub fn parse_envelope(text: &str) -> Result<Value, LikerError> {
    let data: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            return Err(match extract_title(text) {
                Some(title) => LikerError::Generic(title),
                None => LikerError::Parse(e.to_string()),
            });
        }
    };

    if let Some(error) = data.get("error").and_then(Value::as_str) {
        return Err(LikerError::Api(error.to_string()));
    }

    if let Some(errors) = data.get("errors").and_then(Value::as_array) {
        if let Some(first) = errors.first() {
            let message = first
                .as_str()
                .map_or_else(|| first.to_string(), ToString::to_string);
            return Err(LikerError::Api(message));
        }
    }

    Ok(data)
}

/// Decode an envelope straight into a typed response.
///
/// # Errors
///
/// Returns the envelope errors of [`parse_envelope`], or [`LikerError::Parse`]
/// when the payload does not match `T`.
pub fn parse_typed<T: DeserializeOwned>(text: &str) -> Result<T, LikerError> {
    decode(parse_envelope(text)?)
}

/// Convert an already-checked envelope into a typed response.
///
/// # Errors
///
/// Returns [`LikerError::Parse`] when the payload does not match `T`.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, LikerError> {
    serde_json::from_value(value).map_err(|e| LikerError::Parse(e.to_string()))
}

/// Extract the text of the first `<title>` element.
fn extract_title(html: &str) -> Option<String> {
    TITLE_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json_passes_through() {
        let value = parse_envelope(r#"{"csrf": "abc", "n": 1}"#).unwrap();
        assert_eq!(value["csrf"], "abc");
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_error_field() {
        let err = parse_envelope(r#"{"error": "rate limited"}"#).unwrap_err();
        assert!(matches!(err, LikerError::Api(ref m) if m == "rate limited"));
    }

    #[test]
    fn test_errors_surface_first_only() {
        let err = parse_envelope(r#"{"errors": ["first", "second"]}"#).unwrap_err();
        assert!(matches!(err, LikerError::Api(ref m) if m == "first"));
    }

    #[test]
    fn test_empty_errors_is_not_an_error() {
        assert!(parse_envelope(r#"{"errors": [], "ok": true}"#).is_ok());
    }

    #[test]
    fn test_html_title_becomes_generic_error() {
        let html = "<html><head><title>Not Found</title></head><body>oops</body></html>";
        let err = parse_envelope(html).unwrap_err();
        assert!(matches!(err, LikerError::Generic(ref m) if m == "Not Found"));
    }

    #[test]
    fn test_multiline_title() {
        let html = "<HTML><TITLE>\n  502 Bad Gateway\n</TITLE></HTML>";
        let err = parse_envelope(html).unwrap_err();
        assert!(matches!(err, LikerError::Generic(ref m) if m == "502 Bad Gateway"));
    }

    #[test]
    fn test_untitled_garbage_is_parse_error() {
        let err = parse_envelope("definitely not json").unwrap_err();
        assert!(matches!(err, LikerError::Parse(_)));
    }

    #[test]
    fn test_parse_typed_shape_mismatch() {
        #[derive(Debug, serde::Deserialize)]
        struct Csrf {
            #[allow(dead_code)]
            csrf: String,
        }
        let err = parse_typed::<Csrf>(r#"{"other": 1}"#).unwrap_err();
        assert!(matches!(err, LikerError::Parse(_)));
    }
}
