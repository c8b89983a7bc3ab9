use http::Uri;

use crate::Result;
use crate::error::{Error, TransportErrorKind};

const MAX_ERROR_BODY_LEN: usize = 2048;

fn invalid_uri_error(uri: &str) -> Error {
    Error::InvalidUri {
        uri: uri.to_owned(),
    }
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

fn is_absolute_http_uri(target: &str) -> Result<bool> {
    match target.parse::<Uri>() {
        Ok(uri) if uri.host().is_some() => {
            let Some(scheme) = uri.scheme_str() else {
                return Err(invalid_uri_error(target));
            };
            if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") {
                Ok(true)
            } else {
                Err(invalid_uri_error(target))
            }
        }
        _ => Ok(false),
    }
}

/// Resolves `target` against an optional transport base url.
///
/// Absolute http(s) targets are used as-is. Anything else needs a base url.
pub(crate) fn resolve_uri(base_url: Option<&str>, target: &str) -> Result<(String, Uri)> {
    let uri_text = if is_absolute_http_uri(target)? {
        target.to_owned()
    } else {
        match base_url {
            Some(base_url) => join_base_path(base_url, target),
            None => return Err(invalid_uri_error(target)),
        }
    };
    let uri = uri_text
        .parse::<Uri>()
        .map_err(|_| invalid_uri_error(&uri_text))?;
    if uri.host().is_none() {
        return Err(invalid_uri_error(&uri_text));
    }
    Ok((uri_text, uri))
}

pub(crate) fn join_base_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

pub(crate) fn validate_base_url(base_url: &str) -> Result<()> {
    let normalized = base_url.trim();
    if normalized.len() != base_url.len() || normalized.is_empty() {
        return Err(invalid_uri_error(base_url));
    }

    let parsed = url::Url::parse(normalized).map_err(|_| invalid_uri_error(base_url))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid_uri_error(base_url));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid_uri_error(base_url));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid_uri_error(base_url));
    }
    Ok(())
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    if error.is_connect() {
        let text = error.to_string().to_ascii_lowercase();
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        if text.contains("timed out") || text.contains("timeout") {
            return TransportErrorKind::Timeout;
        }
        return TransportErrorKind::Connect;
    }

    let text = error.to_string().to_ascii_lowercase();
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("connection closed")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
