use chrono::{DateTime, Utc};

use davenport_xml::values::parse_http_date;

use crate::error::DavError;

/// A parsed `Range: bytes=start-end` header, both sides optional.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct RangeSpec {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// Parse a Range header. Anything that is not a single well-formed byte
/// range, including the degenerate `bytes=-`, is ignored rather than
/// rejected.
pub fn parse_range(raw: &str) -> Option<RangeSpec> {
    let rest = raw.trim().strip_prefix("bytes=")?;
    let (start_raw, end_raw) = rest.split_once('-')?;
    let (start_raw, end_raw) = (start_raw.trim(), end_raw.trim());

    let parse = |part: &str| -> Option<Option<u64>> {
        if part.is_empty() {
            Some(None)
        } else if part.bytes().all(|b| b.is_ascii_digit()) {
            part.parse().ok().map(Some)
        } else {
            None
        }
    };

    let start = parse(start_raw)?;
    let end = parse(end_raw)?;
    if start.is_none() && end.is_none() {
        return None;
    }
    Some(RangeSpec { start, end })
}

/// Resolve a range against the entity size into inclusive offsets.
pub fn resolve_range(spec: &RangeSpec, size: u64) -> Result<(u64, u64), DavError> {
    let unsatisfiable = || {
        DavError::RangeNotSatisfiable(format!(
            "the requested range is not satisfiable for an entity of {} bytes",
            size
        ))
    };

    match (spec.start, spec.end) {
        (Some(start), Some(end)) => {
            if end < start || start >= size {
                return Err(unsatisfiable());
            }
            Ok((start, end.min(size - 1)))
        }
        (Some(start), None) => {
            if start >= size {
                return Err(unsatisfiable());
            }
            Ok((start, size - 1))
        }
        (None, Some(last)) => {
            if last == 0 || size == 0 {
                return Err(unsatisfiable());
            }
            Ok((size.saturating_sub(last), size - 1))
        }
        (None, None) => Err(unsatisfiable()),
    }
}

/// Strip the weak marker and surrounding quotes off an entity tag.
pub fn unquote_etag(raw: &str) -> &str {
    let raw = raw.trim();
    let raw = raw.strip_prefix("W/").unwrap_or(raw);
    raw.trim_matches('"')
}

/// Whether any member of a comma-separated entity-tag list matches.
pub fn etag_list_matches(raw: &str, etag: &str) -> bool {
    raw.split(',')
        .any(|candidate| unquote_etag(candidate) == unquote_etag(etag))
}

/// If-Range carries either an entity tag or a date; a stale validator
/// downgrades the range request to a full response, never to an error.
pub fn if_range_matches(
    raw: &str,
    etag: Option<&str>,
    last_modified: Option<DateTime<Utc>>,
) -> bool {
    let raw = raw.trim();
    if raw.contains('"') {
        return match etag {
            Some(etag) => unquote_etag(raw) == unquote_etag(etag),
            None => false,
        };
    }
    match (parse_http_date(raw), last_modified) {
        (Some(header_date), Some(modified)) => header_date.timestamp() == modified.timestamp(),
        _ => false,
    }
}

pub fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
