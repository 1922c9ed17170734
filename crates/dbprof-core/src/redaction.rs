/// Mask secrets in a connection URL before it is logged or written out.
///
/// The password in `user:password@host` and sensitive query parameters
/// (`password`, `sslpassword`, `token`) are replaced with `***`.
pub fn redact_connection_string(conn: &str) -> String {
    let (base, query) = match conn.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (conn, None),
    };

    let mut redacted = mask_authority_password(base);

    if let Some(query) = query {
        let params: Vec<String> = query
            .split('&')
            .map(|pair| match pair.split_once('=') {
                Some((key, _)) if is_secret_param(key) => format!("{key}=***"),
                _ => pair.to_string(),
            })
            .collect();
        redacted.push('?');
        redacted.push_str(&params.join("&"));
    }

    redacted
}

fn mask_authority_password(base: &str) -> String {
    let Some(scheme_end) = base.find("://") else {
        return base.to_string();
    };
    let authority_start = scheme_end + 3;
    let rest = &base[authority_start..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];

    let Some(at) = authority.rfind('@') else {
        return base.to_string();
    };
    let credentials = &authority[..at];
    let Some(colon) = credentials.find(':') else {
        return base.to_string();
    };

    format!(
        "{}{}:***{}",
        &base[..authority_start],
        &credentials[..colon],
        &base[authority_start + at..]
    )
}

fn is_secret_param(key: &str) -> bool {
    matches!(
        key.to_ascii_lowercase().as_str(),
        "password" | "sslpassword" | "token"
    )
}
