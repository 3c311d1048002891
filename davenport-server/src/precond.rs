use http::HeaderMap;

use davenport_xml::values::parse_http_date;

use crate::error::DavError;
use crate::headers::{etag_list_matches, header_str};
use crate::node::DavNode;
use crate::server::Server;

/// The happy outcomes of conditional-header evaluation. Failures come
/// back as errors; `NotModified` only ever happens in GET mode and tells
/// the caller to answer 304 and stop.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PrecondOutcome {
    Pass,
    NotModified,
}

/// Evaluate If-Match / If-None-Match / If-Modified-Since /
/// If-Unmodified-Since against the node at `uri`.
///
/// The order is fixed and the first failure wins. `handle_as_get` turns
/// If-None-Match failures into 304 instead of 412, and is the only mode
/// in which If-Modified-Since applies at all.
pub async fn check(
    server: &Server,
    headers: &HeaderMap,
    uri: &str,
    handle_as_get: bool,
) -> Result<PrecondOutcome, DavError> {
    let node = match server.tree().node_for_path(uri).await {
        Ok(node) => Some(node),
        Err(DavError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };
    let etag = file_etag(node.as_deref()).await?;

    if let Some(raw) = header_str(headers, "If-Match") {
        if node.is_none() {
            return Err(DavError::PreconditionFailed(
                "an If-Match header was specified, but the node does not exist".into(),
            ));
        }
        if raw.trim() != "*" {
            let matched = matches!(&etag, Some(etag) if etag_list_matches(raw, etag));
            if !matched {
                return Err(DavError::PreconditionFailed(format!(
                    "an If-Match header was specified, but none of the specified etags matched ({:?})",
                    etag
                )));
            }
        }
    }

    let mut saw_if_none_match = false;
    if let Some(raw) = header_str(headers, "If-None-Match") {
        saw_if_none_match = true;
        if node.is_some() {
            let matched = raw.trim() == "*"
                || matches!(&etag, Some(etag) if etag_list_matches(raw, etag));
            if matched {
                return if handle_as_get {
                    Ok(PrecondOutcome::NotModified)
                } else {
                    Err(DavError::PreconditionFailed(
                        "an If-None-Match header was specified, but the node matched one of the specified etags".into(),
                    ))
                };
            }
        }
    }

    if !saw_if_none_match && handle_as_get {
        if let Some(header_date) = header_str(headers, "If-Modified-Since").and_then(parse_http_date)
        {
            if let Some(modified) = file_last_modified(node.as_deref()).await? {
                if modified.timestamp() <= header_date.timestamp() {
                    return Ok(PrecondOutcome::NotModified);
                }
            }
        }
    }

    if let Some(raw) = header_str(headers, "If-Unmodified-Since") {
        // An unparsable date means the header is ignored, per RFC 9110
        if let Some(header_date) = parse_http_date(raw) {
            let node = node.ok_or_else(|| {
                DavError::NotFound(format!(
                    "an If-Unmodified-Since header was specified, but node {} does not exist",
                    uri
                ))
            })?;
            if let Some(modified) = file_last_modified(Some(node.as_ref())).await? {
                if modified.timestamp() > header_date.timestamp() {
                    return Err(DavError::PreconditionFailed(
                        "an If-Unmodified-Since header was specified, but the entity changed since the specified date".into(),
                    ));
                }
            }
        }
    }

    Ok(PrecondOutcome::Pass)
}

async fn file_etag(node: Option<&dyn DavNode>) -> Result<Option<String>, DavError> {
    match node.and_then(|n| n.as_file()) {
        Some(file) => file.etag().await,
        None => Ok(None),
    }
}

async fn file_last_modified(
    node: Option<&dyn DavNode>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, DavError> {
    match node.and_then(|n| n.as_file()) {
        Some(file) => file.last_modified().await,
        None => Ok(None),
    }
}
