use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::{DateTime, Utc};

use crate::{
    address::{parse_address, parse_address_list},
    models::{MessageHeader, MessagePart, NormalizedMessage, RawMessage},
};

const SNIPPET_FALLBACK_CHARS: usize = 200;

/// Convert a fetched provider message into its canonical record.
pub fn normalize_message(raw: &RawMessage) -> NormalizedMessage {
    let headers: &[MessageHeader] = raw
        .payload
        .as_ref()
        .map(|p| p.headers.as_slice())
        .unwrap_or(&[]);

    let from = parse_address(header_value(headers, "From"));
    let to = parse_address_list(header_value(headers, "To"));
    let cc = parse_address_list(header_value(headers, "Cc"));
    let subject = header_value(headers, "Subject").trim().to_string();

    let date = parse_header_date(header_value(headers, "Date"))
        .or_else(|| parse_internal_date(raw.internal_date.as_deref()));

    let body = raw.payload.as_ref().map(extract_body).unwrap_or_default();
    let snippet = if raw.snippet.trim().is_empty() {
        truncate_chars(body.trim(), SNIPPET_FALLBACK_CHARS)
    } else {
        raw.snippet.clone()
    };

    NormalizedMessage {
        message_id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        from,
        to,
        cc,
        subject,
        date,
        snippet,
        body,
    }
}

/// Body selection: direct payload body, else first `text/plain` part, else
/// first `text/html` part, else empty.
pub fn extract_body(payload: &MessagePart) -> String {
    if let Some(text) = part_data(payload) {
        return text;
    }

    if let Some(text) = find_part(&payload.parts, "text/plain") {
        return text;
    }

    find_part(&payload.parts, "text/html").unwrap_or_default()
}

fn find_part(parts: &[MessagePart], mime_type: &str) -> Option<String> {
    for part in parts {
        if part.mime_type.eq_ignore_ascii_case(mime_type) {
            if let Some(text) = part_data(part) {
                return Some(text);
            }
        }
        if let Some(text) = find_part(&part.parts, mime_type) {
            return Some(text);
        }
    }
    None
}

fn part_data(part: &MessagePart) -> Option<String> {
    let data = part.body.as_ref()?.data.as_deref()?;
    if data.is_empty() {
        return None;
    }
    decode_base64_text(data)
}

/// Decode Gmail's base64url payload data (padding optional) as lossy UTF-8.
pub fn decode_base64_text(data: &str) -> Option<String> {
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    let trimmed = compact.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

fn header_value<'a>(headers: &'a [MessageHeader], name: &str) -> &'a str {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
        .unwrap_or("")
}

/// RFC 2822 date, tolerating a trailing zone comment like `(UTC)`.
pub fn parse_header_date(value: &str) -> Option<DateTime<Utc>> {
    let mut value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.ends_with(')') {
        if let Some(idx) = value.rfind('(') {
            value = value[..idx].trim_end();
        }
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_internal_date(value: Option<&str>) -> Option<DateTime<Utc>> {
    let millis = value?.trim().parse::<i64>().ok()?;
    DateTime::from_timestamp_millis(millis)
}

pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect()
}
