//! HTML served by the provisioning portal.

use super::form::{FIELD_DELAY, FIELD_PASSWORD, FIELD_RETRIES, FIELD_SSID};
use crate::config::{NetworkConfig, MAX_PASSWORD_LEN, MAX_SSID_LEN};

const HEAD: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width,initial-scale=1\">\
<title>Sensor node setup</title></head><body>";
const TAIL: &str = "</body></html>";

/// Escape text for an HTML attribute or element body.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Configuration form pre-filled with `current` (password left blank).
pub fn form_page(device: &str, current: &NetworkConfig) -> String {
    format!(
        "{HEAD}<h1>{device}</h1>\
<form method=\"post\" action=\"/save\">\
<label>SSID <input name=\"{FIELD_SSID}\" maxlength=\"{MAX_SSID_LEN}\" value=\"{ssid}\" required></label><br>\
<label>Password <input type=\"password\" name=\"{FIELD_PASSWORD}\" maxlength=\"{MAX_PASSWORD_LEN}\"></label><br>\
<label>Retries <input type=\"number\" min=\"0\" name=\"{FIELD_RETRIES}\" value=\"{retries}\"></label><br>\
<label>Retry delay (ms) <input type=\"number\" min=\"0\" name=\"{FIELD_DELAY}\" value=\"{delay}\"></label><br>\
<button type=\"submit\">Save and restart</button></form>\
<form method=\"post\" action=\"/reset\"><button type=\"submit\">Reset to defaults</button></form>\
{TAIL}",
        device = escape(device),
        ssid = escape(&current.ssid),
        retries = current.max_retries,
        delay = current.retry_delay_ms,
    )
}

pub fn success_page(message: &str) -> String {
    format!("{HEAD}<h1>Done</h1><p>{}</p>{TAIL}", escape(message))
}

pub fn error_page(message: &str) -> String {
    format!(
        "{HEAD}<h1>Error</h1><p>{}</p><p><a href=\"/\">Back</a></p>{TAIL}",
        escape(message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_form_page_prefills_without_password() {
        let config = NetworkConfig::new("Home\"Net", "Secret1", 3, 500).unwrap();
        let page = form_page("ESP32_0ABC3D", &config);
        assert!(page.contains("ESP32_0ABC3D"));
        assert!(page.contains("value=\"Home&quot;Net\""));
        assert!(page.contains("value=\"3\""));
        assert!(page.contains("value=\"500\""));
        assert!(!page.contains("Secret1"));
    }
}
