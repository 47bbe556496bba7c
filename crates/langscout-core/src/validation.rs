//! Explicit validation and normalization applied by every store before a write.

use url::Url;

use crate::error::AppError;
use crate::models::{Domain, NewProxy, ProxyScheme};

/// Normalize a submitted host.
///
/// Trims whitespace and a trailing `/`, and lower-cases the scheme and host
/// part. Rejects empty hosts and hosts that do not parse as a URL.
pub fn normalize_host(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    let (scheme, rest) = match trimmed.split_once("://") {
        Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
        None => (None, trimmed),
    };
    let rest = rest.trim_end_matches('/');

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    if authority.is_empty() {
        return Err(AppError::ValidationError(format!("empty host '{raw}'")));
    }
    let authority = authority.to_ascii_lowercase();

    let normalized = match &scheme {
        Some(scheme) => format!("{scheme}://{authority}{path}"),
        None => format!("{authority}{path}"),
    };

    let candidate = match &scheme {
        Some(_) => normalized.clone(),
        None => format!("http://{normalized}"),
    };
    let url = Url::parse(&candidate)
        .map_err(|e| AppError::ValidationError(format!("invalid host '{raw}': {e}")))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(AppError::ValidationError(format!("invalid host '{raw}'")));
    }
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::ValidationError(format!(
            "host '{raw}' uses unsupported scheme '{}'",
            url.scheme()
        )));
    }

    Ok(normalized)
}

/// Normalize one language tag to its lower-case primary subtag.
///
/// `en-US` → `en`. Returns `None` for anything that is not 2–3 ASCII letters.
pub fn normalize_language(raw: &str) -> Option<String> {
    let primary = raw.trim().split(['-', '_']).next()?.to_ascii_lowercase();
    let valid = (2..=3).contains(&primary.len()) && primary.chars().all(|c| c.is_ascii_lowercase());
    valid.then_some(primary)
}

/// Normalize a language list: drop invalid tags, dedupe, sort.
pub fn normalize_languages<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut langs: Vec<String> = raw
        .iter()
        .filter_map(|l| normalize_language(l.as_ref()))
        .collect();
    langs.sort();
    langs.dedup();
    langs
}

/// Validate and normalize a domain in place before it is written.
pub fn prepare_domain(domain: &mut Domain) -> Result<(), AppError> {
    if domain.id < 0 {
        return Err(AppError::ValidationError(format!(
            "invalid domain id {}",
            domain.id
        )));
    }
    domain.host = normalize_host(&domain.host)?;
    domain.content_language = normalize_language(&domain.content_language).unwrap_or_default();
    domain.tag_languages = normalize_languages(&domain.tag_languages);
    domain.sitemap_languages = normalize_languages(&domain.sitemap_languages);
    Ok(())
}

/// Validate a proxy before it is added to the registry.
pub fn validate_proxy(proxy: &NewProxy) -> Result<(), AppError> {
    if proxy.scheme == ProxyScheme::NoProxy {
        return Err(AppError::ValidationError(
            "the direct lane is built in and cannot be registered".into(),
        ));
    }

    let (host, port) = proxy.endpoint.rsplit_once(':').ok_or_else(|| {
        AppError::ValidationError(format!(
            "proxy endpoint '{}' must be host:port",
            proxy.endpoint
        ))
    })?;
    if host.is_empty() {
        return Err(AppError::ValidationError(format!(
            "proxy endpoint '{}' has no host",
            proxy.endpoint
        )));
    }
    match port.parse::<u16>() {
        Ok(p) if p > 0 => {}
        _ => {
            return Err(AppError::ValidationError(format!(
                "proxy endpoint '{}' has an invalid port",
                proxy.endpoint
            )));
        }
    }

    if let Some(creds) = &proxy.credentials
        && creds.username.is_empty()
    {
        return Err(AppError::ValidationError(
            "proxy credentials require a username".into(),
        ));
    }

    Ok(())
}
