use std::io::Error;
use std::path::Path;

use futures::stream::{StreamExt, TryStreamExt};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, BodyStream, Full, StreamBody};
use hyper::body::{Bytes, Frame};
use hyper::Response;
use quick_xml::events::{BytesDecl, Event};
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};

use davenport_xml::types::Depth;
use davenport_xml::xml as dxml;
use davenport_xml::xml::NamespaceMap;

use crate::error::DavError;

pub type Body = BoxBody<Bytes, std::io::Error>;
pub type HttpResponse = Response<Body>;

/// Request body bounds the dispatcher works against. `hyper::body::Incoming`
/// satisfies them in production; tests inject `Full<Bytes>`.
pub trait HttpBody:
    http_body::Body<Data = Bytes, Error: std::error::Error + Send + Sync + 'static>
    + Send
    + Unpin
    + 'static
{
}
impl<B> HttpBody for B where
    B: http_body::Body<Data = Bytes, Error: std::error::Error + Send + Sync + 'static>
        + Send
        + Unpin
        + 'static
{
}

pub fn text_body(txt: impl Into<Bytes>) -> Body {
    BoxBody::new(Full::new(txt.into()).map_err(|e| match e {}))
}

pub fn empty_body() -> Body {
    text_body("")
}

/// The response standing in for a vetoed operation when the subscriber
/// supplied none: the subscriber is assumed to have answered out-of-band.
pub fn veto_response(provided: Option<HttpResponse>) -> HttpResponse {
    match provided {
        Some(response) => response,
        None => Response::builder()
            .status(200)
            .header("Content-Length", "0")
            .body(empty_body())
            .unwrap_or_else(|_| Response::new(empty_body())),
    }
}

/// Write the XML declaration followed by one document element.
async fn write_document<T: dxml::QWrite>(
    elem: &T,
    out: impl dxml::IWrite,
    ns: &NamespaceMap,
) -> Result<(), quick_xml::Error> {
    let q = quick_xml::writer::Writer::new_with_indent(out, b' ', 4);
    let mut xml = dxml::Writer::new(q, ns);
    let decl = BytesDecl::new("1.0", Some("utf-8"), None);
    xml.q.write_event_async(Event::Decl(decl)).await?;
    elem.qwrite(&mut xml).await
}

/// Serialize an XML document as a streaming response body.
///
/// The document is written into one end of an in-memory pipe while the
/// response body drains the other, so large multistatus bodies never
/// buffer whole. An error mid-write can only truncate the body; the
/// status line is long gone by then.
pub fn serialize<T: dxml::QWrite + Send + Sync + 'static>(
    status: http::StatusCode,
    elem: T,
    ns: &NamespaceMap,
) -> Result<HttpResponse, DavError> {
    let (writer, reader) = tokio::io::duplex(8 * 1024);
    let ns = ns.clone();

    tokio::task::spawn(async move {
        if let Err(e) = write_document(&elem, writer, &ns).await {
            tracing::warn!(err=?e, "response serialization aborted, body is truncated");
        }
    });

    let chunks = ReaderStream::new(reader).map_ok(Frame::data);
    let response = Response::builder()
        .status(status)
        .header("content-type", "application/xml; charset=\"utf-8\"")
        .body(BoxBody::new(StreamBody::new(chunks)))
        .map_err(|e| DavError::Internal(e.into()))?;

    Ok(response)
}

/// Serialize an XML document into a buffer. Error documents use this so
/// their Content-Length is known up front.
pub async fn serialize_to_string<T: dxml::QWrite>(
    elem: &T,
    ns: &NamespaceMap,
) -> Result<String, DavError> {
    let mut buffer = Vec::new();
    let mut sink = tokio::io::BufWriter::new(&mut buffer);
    write_document(elem, &mut sink, ns)
        .await
        .map_err(|e| DavError::Internal(e.into()))?;
    sink.flush().await.map_err(|e| DavError::Internal(e.into()))?;
    drop(sink);

    String::from_utf8(buffer).map_err(|e| DavError::Internal(e.into()))
}

/// Deserialize an XML request body.
pub async fn deserialize<T: dxml::Node<T>>(bytes: &[u8]) -> Result<T, DavError> {
    let mut rdr = dxml::Reader::new(quick_xml::reader::NsReader::from_reader(bytes)).await?;
    let parsed = rdr.find::<T>().await?;
    Ok(parsed)
}

/// Buffer a whole request body. Only used for XML bodies, which stay
/// small; PUT payloads go through [`stage_body`] instead.
pub async fn collect_body<B: HttpBody>(body: B) -> Result<Bytes, DavError> {
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| DavError::BadRequest(format!("unable to read request body: {}", e)))
}

/// Stream a request body into a uniquely-named staging file under `dir`.
///
/// The returned guard deletes the file when dropped, which covers every
/// exit path of the caller, including errors and lost connections.
/// Non-data frames (trailers) are dropped on the floor.
pub async fn stage_body<B: HttpBody>(
    body: B,
    dir: &Path,
) -> Result<(Bytes, tempfile::NamedTempFile), DavError> {
    let staging = tempfile::NamedTempFile::new_in(dir)?;
    let mut spool = tokio::fs::File::from_std(staging.reopen()?);

    let frames = BodyStream::new(body).map(|frame| match frame {
        Ok(frame) => Ok(frame.into_data().unwrap_or_default()),
        Err(e) => Err(Error::other(e)),
    });
    let mut reader = StreamReader::new(frames);
    tokio::io::copy(&mut reader, &mut spool).await?;
    spool.flush().await?;

    let data = tokio::fs::read(staging.path()).await?;
    Ok((Bytes::from(data), staging))
}

/// The Depth request header, with the caller-supplied fallback for
/// absent, empty or unparsable values.
pub fn depth(headers: &http::HeaderMap, fallback: Depth) -> Depth {
    let raw = match headers.get("Depth").map(|v| v.to_str()) {
        Some(Ok(raw)) => raw.trim(),
        _ => return fallback,
    };
    if raw.is_empty() {
        return fallback;
    }
    if raw.eq_ignore_ascii_case("infinity") {
        return Depth::Infinity;
    }
    match raw.parse::<u32>() {
        Ok(0) => Depth::Zero,
        Ok(_) => Depth::One,
        Err(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    fn headers_with_depth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Depth", value.parse().unwrap());
        headers
    }

    #[test]
    fn depth_parsing() {
        assert_eq!(depth(&HeaderMap::new(), Depth::Infinity), Depth::Infinity);
        assert_eq!(depth(&headers_with_depth("0"), Depth::Infinity), Depth::Zero);
        assert_eq!(depth(&headers_with_depth("1"), Depth::Zero), Depth::One);
        assert_eq!(depth(&headers_with_depth("2"), Depth::Zero), Depth::One);
        assert_eq!(
            depth(&headers_with_depth("infinity"), Depth::Zero),
            Depth::Infinity
        );
        assert_eq!(
            depth(&headers_with_depth("Infinity"), Depth::Zero),
            Depth::Infinity
        );
        assert_eq!(depth(&headers_with_depth("bogus"), Depth::One), Depth::One);
    }

    #[tokio::test]
    async fn stage_body_roundtrip_and_cleanup() {
        let body = Full::new(Bytes::from_static(b"staged payload"));
        let dir = std::env::temp_dir();
        let (data, staging) = stage_body(body, &dir).await.unwrap();
        assert_eq!(data.as_ref(), b"staged payload");

        let path = staging.path().to_path_buf();
        assert!(path.exists());
        drop(staging);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn streamed_serialization_carries_the_declaration() {
        let elem = davenport_xml::types::Href("/spool/".into());
        let response = serialize(
            http::StatusCode::MULTI_STATUS,
            elem,
            &NamespaceMap::default(),
        )
        .unwrap();
        assert_eq!(response.status(), 207);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(text.contains("<d:href"), "body: {text}");
    }
}
