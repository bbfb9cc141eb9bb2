//! Address cleanup helpers.
//!
//! Headers arrive as display forms ("Alice Example <alice@acme.com>",
//! comma-separated lists, stray angle brackets from sloppy journaling).
//! Everything downstream (tenant routing, hold predicates, domain filters)
//! works on the lowercase addr-spec only.

/// Extract the addr-spec from a single display-form address.
///
/// `"Name <a@b.com>"` -> `a@b.com`, `"a@b.com "` -> `a@b.com`.
/// Returns `None` when no `@` is present.
pub fn extract_email(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let candidate = match (raw.find('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => &raw[start + 1..end],
        _ => raw,
    };
    let cleaned = candidate.trim().trim_matches(|c| c == '<' || c == '>').to_lowercase();
    if cleaned.contains('@') {
        Some(cleaned)
    } else {
        None
    }
}

/// Extract addr-specs from a header that may hold a comma-separated list.
pub fn extract_emails(raw: &str) -> Vec<String> {
    raw.split(',').filter_map(extract_email).collect()
}

/// Lowercase DNS portion of a single address.
pub fn extract_domain(raw: &str) -> Option<String> {
    let email = extract_email(raw)?;
    email.rsplit('@').next().map(|d| d.trim().to_string()).filter(|d| !d.is_empty())
}

/// Union of lowercase domains across several header/envelope values, where
/// each value may itself be a list.
pub fn collect_domains<'a, I: IntoIterator<Item = &'a str>>(values: I) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        for part in value.split(',') {
            if let Some(d) = extract_domain(part) {
                if !out.contains(&d) {
                    out.push(d);
                }
            }
        }
    }
    out
}
