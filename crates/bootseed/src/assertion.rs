//! Generic decoder for signed text documents ("assertions").
//!
//! Layout:
//!
//! ```text
//! type: model
//! brand-id: acme
//! required-packages:
//!   - network-manager
//!   - console-conf
//! body-length: 0
//!
//! <base64 signature>
//! ```
//!
//! The decoder checks structure only. The signature is decoded as base64 but
//! never verified; that is the job of whoever hands us the document.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Str(String),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Assertion {
    kind: String,
    headers: BTreeMap<String, HeaderValue>,
    body: Vec<u8>,
    signature: Vec<u8>,
}

impl Assertion {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    /// String header; an empty string counts as absent.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        match self.headers.get(name)? {
            HeaderValue::Str(s) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn header_list(&self, name: &str) -> Result<Vec<String>> {
        match self.headers.get(name) {
            None => Ok(Vec::new()),
            Some(HeaderValue::List(items)) => Ok(items.clone()),
            // A bare empty value is an empty list; anything else is a type error.
            Some(HeaderValue::Str(s)) if s.is_empty() => Ok(Vec::new()),
            Some(HeaderValue::Str(_)) => Err(decode_err(format!(
                "header '{name}' must be a list"
            ))),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}

fn decode_err(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::Decode, msg)
}

pub fn decode(raw: &[u8]) -> Result<Assertion> {
    let text = std::str::from_utf8(raw).map_err(|e| decode_err(format!("not utf-8: {e}")))?;
    let text = text.trim_start_matches('\u{feff}');
    if text.trim().is_empty() {
        return Err(decode_err("empty document"));
    }

    let (head, rest) = text
        .split_once("\n\n")
        .ok_or_else(|| decode_err("missing signature (no blank line after headers)"))?;
    let headers = parse_headers(head)?;

    let kind = match headers.get("type") {
        Some(HeaderValue::Str(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(_) => return Err(decode_err("header 'type' must be a non-empty string")),
        None => return Err(decode_err("missing 'type' header")),
    };

    let (body, sig_text) = match headers.get("body-length") {
        None => (Vec::new(), rest),
        Some(HeaderValue::Str(raw_len)) => {
            let len: usize = raw_len
                .trim()
                .parse()
                .map_err(|_| decode_err(format!("invalid body-length '{raw_len}'")))?;
            if len == 0 {
                (Vec::new(), rest)
            } else {
                let mismatch =
                    || decode_err(format!("body-length {len} does not match document body"));
                let end = len.checked_add(2).ok_or_else(mismatch)?;
                let bytes = rest.as_bytes();
                if bytes.get(len..end) != Some(b"\n\n".as_slice()) {
                    return Err(mismatch());
                }
                let sig = rest.get(end..).ok_or_else(mismatch)?;
                (bytes[..len].to_vec(), sig)
            }
        }
        Some(HeaderValue::List(_)) => return Err(decode_err("header 'body-length' must be a string")),
    };

    let sig_compact: String = sig_text.split_whitespace().collect();
    if sig_compact.is_empty() {
        return Err(decode_err("empty signature"));
    }
    let signature = STANDARD
        .decode(sig_compact.as_bytes())
        .map_err(|e| decode_err(format!("signature is not valid base64: {e}")))?;

    Ok(Assertion {
        kind,
        headers,
        body,
        signature,
    })
}

fn parse_headers(head: &str) -> Result<BTreeMap<String, HeaderValue>> {
    let mut out = BTreeMap::<String, HeaderValue>::new();
    let mut open_list: Option<String> = None;

    for (idx, line) in head.lines().enumerate() {
        let lineno = idx + 1;
        if let Some(item) = line.strip_prefix("  - ") {
            let Some(key) = open_list.as_ref() else {
                return Err(decode_err(format!(
                    "line {lineno}: list item outside of a list header"
                )));
            };
            let slot = out
                .entry(key.clone())
                .or_insert_with(|| HeaderValue::List(Vec::new()));
            if matches!(slot, HeaderValue::Str(_)) {
                *slot = HeaderValue::List(Vec::new());
            }
            if let HeaderValue::List(items) = slot {
                items.push(item.trim().to_string());
            }
            continue;
        }
        open_list = None;

        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(decode_err(format!("line {lineno}: unexpected indentation")));
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| decode_err(format!("line {lineno}: expected 'key: value'")))?;
        let key = key.trim();
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(decode_err(format!("line {lineno}: invalid header name '{key}'")));
        }
        if out.contains_key(key) {
            return Err(decode_err(format!("line {lineno}: duplicate header '{key}'")));
        }
        let value = value.trim();
        if value.is_empty() {
            open_list = Some(key.to_string());
        }
        out.insert(key.to_string(), HeaderValue::Str(value.to_string()));
    }

    Ok(out)
}
