//! `application/x-www-form-urlencoded` decoding for the provisioning form.
//!
//! Fields are split and percent-decoded into owned values, then each one
//! is bounds-checked on its own before a [`NetworkConfig`] is built.

use crate::config::{validate_password, validate_ssid, ConfigError, NetworkConfig};
use std::fmt;

/// Form field names.
pub const FIELD_SSID: &str = "ssid";
pub const FIELD_PASSWORD: &str = "password";
pub const FIELD_RETRIES: &str = "retries";
pub const FIELD_DELAY: &str = "delay";

/// Decode one form component: `+` is a space, `%XX` a byte. A `%` not
/// followed by two hex digits is kept literally.
pub fn percent_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (input.get(i + 1).and_then(hex), input.get(i + 2).and_then(hex)) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

fn hex(c: &u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Split a body into decoded `(name, value)` pairs, in order.
pub fn parse_pairs(body: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    body.split(|&b| b == b'&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (name, value) = match part.iter().position(|&b| b == b'=') {
                Some(eq) => (&part[..eq], &part[eq + 1..]),
                None => (part, &[][..]),
            };
            (percent_decode(name), percent_decode(value))
        })
        .collect()
}

/// Decode and validate a `POST /save` body.
///
/// Unknown fields are ignored; the first occurrence of a repeated field wins.
pub fn decode_form(body: &[u8]) -> Result<NetworkConfig, FormError> {
    let pairs = parse_pairs(body);
    let field = |name: &'static str| -> Result<String, FormError> {
        let raw = pairs
            .iter()
            .find(|(key, _)| key.as_slice() == name.as_bytes())
            .map(|(_, value)| value.clone())
            .ok_or(FormError::MissingField(name))?;
        String::from_utf8(raw).map_err(|_| FormError::NotUtf8(name))
    };

    let ssid = field(FIELD_SSID)?;
    validate_ssid(&ssid)?;
    let password = field(FIELD_PASSWORD)?;
    validate_password(&password)?;
    let retries = parse_count(FIELD_RETRIES, &field(FIELD_RETRIES)?)?;
    let delay = parse_count(FIELD_DELAY, &field(FIELD_DELAY)?)?;

    Ok(NetworkConfig::new(ssid, password, retries, delay)?)
}

fn parse_count(field: &'static str, value: &str) -> Result<u32, FormError> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| FormError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

/// Errors in a submitted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    /// A required field is absent.
    MissingField(&'static str),
    /// A field does not decode to UTF-8.
    NotUtf8(&'static str),
    /// A numeric field is not a non-negative integer.
    InvalidNumber { field: &'static str, value: String },
    /// A field is out of bounds.
    Invalid(ConfigError),
}

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(name) => write!(f, "missing field '{}'", name),
            Self::NotUtf8(name) => write!(f, "field '{}' is not valid UTF-8", name),
            Self::InvalidNumber { field, value } => {
                write!(f, "field '{}' is not a non-negative integer: '{}'", field, value)
            }
            Self::Invalid(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FormError {}

impl From<ConfigError> for FormError {
    fn from(e: ConfigError) -> Self {
        Self::Invalid(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Decoding Tests ====================

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode(b"My+Net%21"), b"My Net!");
        assert_eq!(percent_decode(b"%e2%82%AC"), "€".as_bytes());
        assert_eq!(percent_decode(b"a%2Bb"), b"a+b");
    }

    #[test]
    fn test_malformed_escape_kept_literally() {
        assert_eq!(percent_decode(b"100%"), b"100%");
        assert_eq!(percent_decode(b"%zz"), b"%zz");
        assert_eq!(percent_decode(b"%4"), b"%4");
    }

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs(b"a=1&&b=&c&d=x%3Dy");
        assert_eq!(
            pairs,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"".to_vec()),
                (b"c".to_vec(), b"".to_vec()),
                (b"d".to_vec(), b"x=y".to_vec()),
            ]
        );
    }

    // ==================== Form Tests ====================

    #[test]
    fn test_decode_form() {
        let config = decode_form(b"ssid=Home&password=Secret1&retries=3&delay=500").unwrap();
        assert_eq!(config, NetworkConfig::new("Home", "Secret1", 3, 500).unwrap());
    }

    #[test]
    fn test_decode_form_any_order_and_unknown_fields() {
        let config =
            decode_form(b"delay=250&submit=Save&password=p%40ss&ssid=Caf%C3%A9+Wifi&retries=0")
                .unwrap();
        assert_eq!(config.ssid, "Café Wifi");
        assert_eq!(config.password, "p@ss");
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.retry_delay_ms, 250);
    }

    #[test]
    fn test_decode_form_open_network() {
        let config = decode_form(b"ssid=Open&password=&retries=5&delay=1000").unwrap();
        assert!(config.is_open());
    }

    #[test]
    fn test_missing_field() {
        assert_eq!(
            decode_form(b"ssid=Home&retries=3&delay=500"),
            Err(FormError::MissingField("password"))
        );
    }

    #[test]
    fn test_empty_ssid_rejected() {
        assert_eq!(
            decode_form(b"ssid=&password=x&retries=3&delay=500"),
            Err(FormError::Invalid(ConfigError::SsidEmpty))
        );
    }

    #[test]
    fn test_ssid_bound_checked_after_decoding() {
        // 31 escaped bytes decode to exactly 31 bytes.
        let body = format!("ssid={}&password=&retries=1&delay=1", "%41".repeat(31));
        assert_eq!(decode_form(body.as_bytes()).unwrap().ssid.len(), 31);

        let body = format!("ssid={}&password=&retries=1&delay=1", "%41".repeat(32));
        assert!(matches!(
            decode_form(body.as_bytes()),
            Err(FormError::Invalid(ConfigError::SsidTooLong { len: 32, .. }))
        ));
    }

    #[test]
    fn test_password_too_long() {
        let body = format!("ssid=Home&password={}&retries=1&delay=1", "x".repeat(64));
        assert!(matches!(
            decode_form(body.as_bytes()),
            Err(FormError::Invalid(ConfigError::PasswordTooLong { .. }))
        ));
    }

    #[test]
    fn test_encoded_nul_rejected() {
        assert_eq!(
            decode_form(b"ssid=Ho%00me&password=&retries=1&delay=1"),
            Err(FormError::Invalid(ConfigError::EmbeddedNul("ssid")))
        );
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        assert_eq!(
            decode_form(b"ssid=%FF&password=&retries=1&delay=1"),
            Err(FormError::NotUtf8("ssid"))
        );
    }

    #[test]
    fn test_numbers_must_be_non_negative_integers() {
        for bad in ["-1", "abc", "", "3.5", "99999999999"] {
            let body = format!("ssid=Home&password=&retries={}&delay=1", bad);
            assert!(
                matches!(
                    decode_form(body.as_bytes()),
                    Err(FormError::InvalidNumber { field: "retries", .. })
                ),
                "accepted retries={}",
                bad
            );
        }
    }

    #[test]
    fn test_numbers_above_i32_rejected() {
        assert!(matches!(
            decode_form(b"ssid=Home&password=&retries=1&delay=3000000000"),
            Err(FormError::Invalid(ConfigError::OutOfRange { .. }))
        ));
    }
}
