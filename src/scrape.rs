//! Pulling tokens out of the vendor's WordPress pages.
//!
//! Everything here depends on the vendor's markup and is kept apart from the
//! login protocol so it can change without touching the rest of the crate.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value};

lazy_static! {
    static ref LOGIN_NONCE: Regex =
        Regex::new(r#""ur_login_form_save_nonce"\s*:\s*"([a-f0-9]+)""#).unwrap();
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]+>").unwrap();
}

/// The anti-forgery token the login form expects back.
pub fn find_login_nonce(html: &str) -> Option<String> {
    LOGIN_NONCE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn strip_tags(text: &str) -> String {
    HTML_TAG.replace_all(text, "").trim().to_string()
}

/// Text of every inline `<script>` element in the page.
pub fn script_bodies(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let selector = match Selector::parse("script") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };
    doc.select(&selector)
        .map(|el| el.text().collect::<String>())
        .filter(|text| !text.trim().is_empty())
        .collect()
}

/// Find `var <name> = {...}` in a page and parse the object literal.
///
/// Inline scripts are searched first, then the raw page.
pub fn extract_js_object(html: &str, var_name: &str) -> Option<Map<String, Value>> {
    script_bodies(html)
        .iter()
        .find_map(|script| find_js_object(script, var_name))
        .or_else(|| find_js_object(html, var_name))
}

/// Locate `var <name> = {` in `text` and parse everything up to the matching
/// close brace as JSON.
pub fn find_js_object(text: &str, var_name: &str) -> Option<Map<String, Value>> {
    let pattern = format!(r"var\s+{}\s*=\s*\{{", regex::escape(var_name));
    let re = Regex::new(&pattern).ok()?;
    let found = re.find(text)?;
    // the match ends just past the opening brace
    let start = found.end() - 1;
    let end = matching_brace(&text[start..])?;
    let literal = &text[start..start + end + 1];
    match serde_json::from_str::<Value>(literal) {
        Ok(Value::Object(map)) => Some(map),
        Ok(other) => {
            log::debug!("{var_name} is not an object: {other}");
            None
        }
        Err(e) => {
            log::debug!("Failed to parse {var_name} JSON from dashboard: {e}");
            None
        }
    }
}

/// Byte offset of the brace closing the one at the start of `text`.
///
/// Braces inside string literals don't count.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    for (i, b) in text.bytes().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn nonce() {
        let html = r#"<script>var ur_login_params = {"ajax_url":"/wp-admin/admin-ajax.php","ur_login_form_save_nonce" : "0a1b2c3d4e"};</script>"#;
        assert_eq!(find_login_nonce(html).as_deref(), Some("0a1b2c3d4e"));
        assert_eq!(find_login_nonce("<html>no form here</html>"), None);
        // not hex
        assert_eq!(find_login_nonce(r#""ur_login_form_save_nonce":"XYZ""#), None);
    }

    #[test]
    fn strips_markup() {
        assert_eq!(
            strip_tags("<strong>ERROR:</strong> Incorrect password. <a href=\"/lost\">Lost it?</a>"),
            "ERROR: Incorrect password. Lost it?"
        );
        assert_eq!(strip_tags("plain"), "plain");
    }

    #[test]
    fn nested_object() {
        let html = r#"var account_info = {"AccountID":"9","AuthCode":"abc", "nested":{"x":1}};"#;
        let obj = find_js_object(html, "account_info").unwrap();
        assert_eq!(
            Value::Object(obj),
            json!({"AccountID": "9", "AuthCode": "abc", "nested": {"x": 1}})
        );
    }

    #[test]
    fn braces_in_strings() {
        let text = r#"var device_info = {"1": {"Nickname": "Dad's {car}", "Note": "a \"}\" b"}}; var x = 1;"#;
        let obj = find_js_object(text, "device_info").unwrap();
        assert_eq!(obj["1"]["Nickname"], json!("Dad's {car}"));
        assert_eq!(obj["1"]["Note"], json!("a \"}\" b"));
    }

    #[test]
    fn missing_or_broken() {
        assert!(find_js_object("var other = {};", "account_info").is_none());
        // never closed
        assert!(find_js_object(r#"var account_info = {"a": {"b": 1}"#, "account_info").is_none());
        // not JSON
        assert!(find_js_object("var account_info = {a: 1};", "account_info").is_none());
        // a prefix of the name is not a match
        assert!(find_js_object(r#"var account_info_v2 = {"a": 1};"#, "account_info").is_none());
    }

    #[test]
    fn extracts_from_scripts() {
        let html = r#"<!DOCTYPE html>
<html>
<head><title>Dashboard</title></head>
<body>
<div data-example="var account_info = {broken">
<script type="text/javascript">
    var account_info = {"AccountID": 9, "AuthCode": "abc"};
    var device_info = {"867530912345": {"Nickname": "Van", "DeviceType": "SolidGPS"}};
</script>
</body>
</html>"#;
        let account = extract_js_object(html, "account_info").unwrap();
        assert_eq!(account["AccountID"], json!(9));
        let devices = extract_js_object(html, "device_info").unwrap();
        assert_eq!(devices["867530912345"]["Nickname"], json!("Van"));
    }

    #[test]
    fn falls_back_to_raw_page() {
        let text = r#"<p>var account_info = {"AccountID":"1","AuthCode":"z"};</p>"#;
        let account = extract_js_object(text, "account_info").unwrap();
        assert_eq!(account["AuthCode"], json!("z"));
    }
}
