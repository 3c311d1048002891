use percent_encoding::percent_decode_str;

use crate::error::DavError;

/// Strip a request URI down to a path relative to the base URI.
///
/// Scheme and authority are dropped if present, duplicate slashes
/// collapse, the result is percent-decoded and loses the base prefix plus
/// any surrounding slashes. A request that does not live under the base
/// URI is forbidden. The bare base URI without its trailing slash maps to
/// the empty path.
pub fn calculate_uri(base_uri: &str, raw_uri: &str) -> Result<String, DavError> {
    let mut uri = raw_uri;
    if let Some(rest) = uri
        .strip_prefix("http://")
        .or_else(|| uri.strip_prefix("https://"))
    {
        uri = rest.find('/').map(|at| &rest[at..]).unwrap_or("/");
    }
    let uri = uri.split('?').next().unwrap_or("");

    let collapsed = collapse_slashes(uri);
    let decoded = percent_decode(&collapsed)?;

    let base = ensure_trailing_slash(base_uri);
    if decoded == base || decoded == base[..base.len() - 1] {
        return Ok(String::new());
    }
    match decoded.strip_prefix(base.as_str()) {
        Some(rest) => Ok(rest.trim_matches('/').to_string()),
        None => Err(DavError::Forbidden(format!(
            "requested uri ({}) is out of base uri ({})",
            raw_uri, base
        ))),
    }
}

/// Derive the base URI from a request URI and the path-info suffix the
/// gateway reports. The two must agree on the suffix; anything else is a
/// deployment problem, not a client error.
pub fn guess_base_uri(request_uri: &str, path_info: &str) -> Result<String, DavError> {
    let uri = request_uri.split('?').next().unwrap_or("");
    let decoded_uri = percent_decode(uri)?;

    let suffix = path_info.trim_end_matches('/');
    if suffix.is_empty() {
        return Ok(ensure_trailing_slash(&decoded_uri));
    }

    let decoded_suffix = percent_decode(suffix)?;
    match decoded_uri
        .trim_end_matches('/')
        .strip_suffix(decoded_suffix.as_str())
    {
        Some(base) => Ok(ensure_trailing_slash(base)),
        None => Err(DavError::Internal(anyhow::anyhow!(
            "the request uri ({}) does not end with the path info ({}); this server is probably misconfigured",
            request_uri,
            path_info
        ))),
    }
}

/// Split a relative path into `(parent, name)`.
pub fn split_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => (String::new(), path.to_string()),
    }
}

pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

fn ensure_trailing_slash(uri: &str) -> String {
    if uri.ends_with('/') {
        uri.to_string()
    } else {
        format!("{}/", uri)
    }
}

fn collapse_slashes(uri: &str) -> String {
    let mut out = String::with_capacity(uri.len());
    let mut last_was_slash = false;
    for c in uri.chars() {
        if c == '/' {
            if !last_was_slash {
                out.push(c);
            }
            last_was_slash = true;
        } else {
            out.push(c);
            last_was_slash = false;
        }
    }
    out
}

fn percent_decode(raw: &str) -> Result<String, DavError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| DavError::BadRequest(format!("invalid percent-encoding in uri: {}", raw)))
}
