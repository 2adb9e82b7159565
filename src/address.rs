use crate::models::Address;

/// Parse a single header address such as `Jane Doe <jane@x.com>` or `bob@x.com`.
///
/// Returns `None` for empty input or anything without a usable `local@domain`.
/// The email is trimmed and lowercased; a missing display name falls back to
/// the local part of the address.
pub fn parse_address(raw: &str) -> Option<Address> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (name, email) = split_angle(raw).unwrap_or_else(|| split_bare(raw));

    let email = email.trim().to_lowercase();
    if !is_plausible_email(&email) {
        return None;
    }

    let name = clean_display_name(name);
    let name = if name.is_empty() {
        local_part(&email).to_string()
    } else {
        name
    };

    Some(Address { name, email })
}

/// Parse a comma separated header list. Unparseable entries are dropped.
pub fn parse_address_list(raw: &str) -> Vec<Address> {
    split_list(raw)
        .into_iter()
        .filter_map(|entry| parse_address(&entry))
        .collect()
}

/// Local part of an address (everything before `@`).
pub fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

fn split_angle(raw: &str) -> Option<(&str, &str)> {
    let open = raw.rfind('<')?;
    let close = raw[open..].find('>').map(|idx| open + idx)?;
    Some((&raw[..open], &raw[open + 1..close]))
}

/// `Jane Doe jane@x.com`: the last whitespace-separated token is the address
/// when it contains `@`; otherwise the whole input is.
fn split_bare(raw: &str) -> (&str, &str) {
    match raw.rsplit_once(char::is_whitespace) {
        Some((name, last)) if last.contains('@') => (name, unquote(last)),
        _ => ("", unquote(raw)),
    }
}

fn unquote(value: &str) -> &str {
    value.trim_matches(|c| c == '"' || c == '\'')
}

fn clean_display_name(name: &str) -> String {
    let trimmed = name.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.replace("\\\"", "\"").trim().to_string()
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !email.chars().any(|c| c.is_whitespace() || c == '<' || c == '>')
}

/// Split on commas that are outside double quotes and angle brackets, so
/// `"Doe, Jane" <jane@x.com>` stays one entry.
fn split_list(raw: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut angle_depth = 0usize;

    for c in raw.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '<' if !in_quotes => {
                angle_depth += 1;
                current.push(c);
            }
            '>' if !in_quotes => {
                angle_depth = angle_depth.saturating_sub(1);
                current.push(c);
            }
            ',' if !in_quotes && angle_depth == 0 => {
                entries.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    entries.push(current);

    entries
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}
