//! End-to-end dispatcher tests against the in-memory backend.

use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;

use davenport_server::codec::text_body;
use davenport_server::config::DavConfig;
use davenport_server::dispatch;
use davenport_server::events::{Event, EventKind, Flow, Subscriber};
use davenport_server::memfs::MemTree;
use davenport_server::plugins::auth::BasicAuth;
use davenport_server::{DavError, Server};

fn base_config() -> DavConfig {
    DavConfig {
        bind_addr: "127.0.0.1:0".parse().expect("socket addr"),
        base_uri: "/".into(),
        tmp_dir: std::env::temp_dir(),
        tls: None,
    }
}

fn server() -> Arc<Server> {
    Arc::new(Server::new(base_config(), Box::new(MemTree::new())).expect("server"))
}

async fn request(
    server: &Arc<Server>,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> (http::StatusCode, http::HeaderMap, String) {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("request");

    let response = dispatch(server, req).await;
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.expect("body").to_bytes();
    (
        parts.status,
        parts.headers,
        String::from_utf8_lossy(&bytes).into_owned(),
    )
}

fn header<'a>(headers: &'a http::HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

// --- the documented scenarios ---

#[tokio::test]
async fn propfind_depth_zero_on_root() {
    let srv = server();
    let (status, headers, body) = request(&srv, "PROPFIND", "/", &[("Depth", "0")], "").await;

    assert_eq!(status, 207, "body: {body}");
    assert_eq!(
        header(&headers, "content-type"),
        "application/xml; charset=\"utf-8\""
    );
    assert_eq!(body.matches("<d:response>").count(), 1);
    assert!(body.contains("<d:href>/</d:href>"), "body: {body}");
    assert!(body.contains("<d:resourcetype>"), "body: {body}");
    assert!(body.contains("<d:collection/>"), "body: {body}");
}

#[tokio::test]
async fn get_with_byte_range() {
    let srv = server();
    let (status, _, _) = request(&srv, "PUT", "/data.bin", &[], "abcdefghij").await;
    assert_eq!(status, 201);

    let (status, headers, body) =
        request(&srv, "GET", "/data.bin", &[("Range", "bytes=0-4")], "").await;
    assert_eq!(status, 206);
    assert_eq!(header(&headers, "Content-Range"), "bytes 0-4/10");
    assert_eq!(header(&headers, "Content-Length"), "5");
    assert_eq!(body, "abcde");
}

#[tokio::test]
async fn put_creates_and_get_reads_back() {
    let srv = server();
    let (status, headers, _) = request(&srv, "PUT", "/new.txt", &[], "hi").await;
    assert_eq!(status, 201);
    assert_eq!(header(&headers, "Content-Length"), "0");

    let (status, headers, body) = request(&srv, "GET", "/new.txt", &[], "").await;
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "Content-Type"), "application/octet-stream");
    assert_eq!(body, "hi");
}

#[tokio::test]
async fn move_without_overwrite_leaves_both_nodes() {
    let srv = server();
    request(&srv, "PUT", "/a", &[], "A").await;
    request(&srv, "PUT", "/b", &[], "B").await;

    let (status, _, body) = request(
        &srv,
        "MOVE",
        "/a",
        &[("Destination", "/b"), ("Overwrite", "F")],
        "",
    )
    .await;
    assert_eq!(status, 412, "body: {body}");

    let (_, _, a) = request(&srv, "GET", "/a", &[], "").await;
    let (_, _, b) = request(&srv, "GET", "/b", &[], "").await;
    assert_eq!(a, "A");
    assert_eq!(b, "B");
}

#[tokio::test]
async fn mkcol_then_listed_by_propfind() {
    let srv = server();
    let (status, _, _) = request(&srv, "MKCOL", "/sub", &[], "").await;
    assert_eq!(status, 201);

    let (status, _, body) = request(&srv, "PROPFIND", "/", &[("Depth", "1")], "").await;
    assert_eq!(status, 207);
    assert_eq!(body.matches("<d:response>").count(), 2);
    assert!(body.contains("<d:href>/sub/</d:href>"), "body: {body}");
    assert!(body.contains("<d:collection/>"), "body: {body}");
}

#[tokio::test]
async fn proppatch_on_protected_property_is_atomic() {
    let srv = server();
    let update = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propertyupdate xmlns:d="DAV:">
    <d:set>
        <d:prop>
            <d:getetag>"forged"</d:getetag>
            <d:displayname>Home</d:displayname>
        </d:prop>
    </d:set>
</d:propertyupdate>"#;

    let (status, _, body) = request(&srv, "PROPPATCH", "/", &[], update).await;
    assert_eq!(status, 207, "body: {body}");
    assert!(body.contains("HTTP/1.1 403 Forbidden"), "body: {body}");
    assert!(body.contains("<d:getetag/>"), "body: {body}");
    // the untouched candidate reports a failed dependency
    assert!(body.contains("HTTP/1.1 424 Failed Dependency"), "body: {body}");
    assert!(body.contains("<d:displayname/>"), "body: {body}");

    // nothing was persisted
    let probe = r#"<?xml version="1.0"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:displayname/></d:prop></d:propfind>"#;
    let (_, _, body) = request(&srv, "PROPFIND", "/", &[("Depth", "0")], probe).await;
    assert!(body.contains("HTTP/1.1 404 Not Found"), "body: {body}");
}

// --- invariants ---

#[tokio::test]
async fn collection_hrefs_end_with_a_slash_and_file_hrefs_do_not() {
    let srv = server();
    request(&srv, "MKCOL", "/folder", &[], "").await;
    request(&srv, "PUT", "/report.txt", &[], "data").await;

    let (_, _, body) = request(&srv, "PROPFIND", "/", &[("Depth", "1")], "").await;
    assert!(body.contains("<d:href>/folder/</d:href>"), "body: {body}");
    assert!(body.contains("<d:href>/report.txt</d:href>"), "body: {body}");
}

#[tokio::test]
async fn failed_if_match_prevents_mutation() {
    let srv = server();
    request(&srv, "PUT", "/f", &[], "one").await;

    let (status, _, _) = request(&srv, "PUT", "/f", &[("If-Match", "\"bogus\"")], "two").await;
    assert_eq!(status, 412);

    let (_, _, body) = request(&srv, "GET", "/f", &[], "").await;
    assert_eq!(body, "one");
}

#[tokio::test]
async fn if_match_on_a_missing_node_beats_404() {
    let srv = server();
    let (status, _, _) = request(&srv, "GET", "/absent", &[("If-Match", "*")], "").await;
    assert_eq!(status, 412);

    // without the conditional the same request is a plain 404
    let (status, _, _) = request(&srv, "GET", "/absent", &[], "").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn if_none_match_star_is_304_on_get_and_412_on_put() {
    let srv = server();
    request(&srv, "PUT", "/f", &[], "one").await;

    let (status, _, _) = request(&srv, "GET", "/f", &[("If-None-Match", "*")], "").await;
    assert_eq!(status, 304);

    let (status, _, _) = request(&srv, "PUT", "/f", &[("If-None-Match", "*")], "two").await;
    assert_eq!(status, 412);

    let (_, _, body) = request(&srv, "GET", "/f", &[], "").await;
    assert_eq!(body, "one");
}

#[tokio::test]
async fn if_modified_since_yields_304() {
    let srv = server();
    request(&srv, "PUT", "/f", &[], "one").await;

    let (status, _, _) = request(
        &srv,
        "GET",
        "/f",
        &[("If-Modified-Since", "Fri, 01 Jan 2100 00:00:00 GMT")],
        "",
    )
    .await;
    assert_eq!(status, 304);

    let (status, _, _) = request(
        &srv,
        "GET",
        "/f",
        &[("If-Modified-Since", "Mon, 01 Jan 1990 00:00:00 GMT")],
        "",
    )
    .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn if_unmodified_since_yields_412_after_change() {
    let srv = server();
    request(&srv, "PUT", "/f", &[], "one").await;

    let (status, _, _) = request(
        &srv,
        "PUT",
        "/f",
        &[("If-Unmodified-Since", "Mon, 01 Jan 1990 00:00:00 GMT")],
        "two",
    )
    .await;
    assert_eq!(status, 412);
}

// --- method surface ---

#[tokio::test]
async fn options_advertises_mkcol_only_on_unmapped_uris() {
    let srv = server();

    let (status, headers, _) = request(&srv, "OPTIONS", "/", &[], "").await;
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "DAV"), "1,3,extended-mkcol");
    assert_eq!(header(&headers, "MS-Author-Via"), "DAV");
    assert_eq!(header(&headers, "Accept-Ranges"), "bytes");
    assert!(!header(&headers, "Allow").contains("MKCOL"));

    let (_, headers, _) = request(&srv, "OPTIONS", "/not-there", &[], "").await;
    assert!(header(&headers, "Allow").contains("MKCOL"));
}

#[tokio::test]
async fn head_on_files_carries_entity_headers() {
    let srv = server();
    request(&srv, "PUT", "/f", &[], "body").await;

    let (status, headers, body) = request(&srv, "HEAD", "/f", &[], "").await;
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "Content-Length"), "4");
    assert!(headers.get("ETag").is_some());
    assert!(headers.get("Last-Modified").is_some());
    assert_eq!(body, "");

    // collections answer 200 with no entity headers for interop
    let (status, headers, _) = request(&srv, "HEAD", "/", &[], "").await;
    assert_eq!(status, 200);
    assert!(headers.get("ETag").is_none());
}

#[tokio::test]
async fn get_on_a_collection_is_not_implemented() {
    let srv = server();
    let (status, _, body) = request(&srv, "GET", "/", &[], "").await;
    assert_eq!(status, 501);
    assert!(body.contains("<a:exception>NotImplemented</a:exception>"), "body: {body}");
}

#[tokio::test]
async fn delete_answers_204_and_removes_the_node() {
    let srv = server();
    request(&srv, "PUT", "/gone.txt", &[], "x").await;

    let (status, headers, _) = request(&srv, "DELETE", "/gone.txt", &[], "").await;
    assert_eq!(status, 204);
    assert_eq!(header(&headers, "Content-Length"), "0");

    let (status, _, body) = request(&srv, "GET", "/gone.txt", &[], "").await;
    assert_eq!(status, 404);
    assert!(body.contains("<a:exception>NotFound</a:exception>"), "body: {body}");
}

#[tokio::test]
async fn put_on_a_collection_conflicts() {
    let srv = server();
    request(&srv, "MKCOL", "/col", &[], "").await;
    let (status, _, body) = request(&srv, "PUT", "/col", &[], "data").await;
    assert_eq!(status, 409);
    assert!(body.contains("PUT is not allowed on non-files"), "body: {body}");
}

#[tokio::test]
async fn copy_overwrites_with_default_overwrite() {
    let srv = server();
    request(&srv, "PUT", "/src", &[], "fresh").await;
    request(&srv, "PUT", "/dst", &[], "stale").await;

    let (status, _, _) = request(&srv, "COPY", "/src", &[("Destination", "/dst")], "").await;
    assert_eq!(status, 204);

    let (_, _, body) = request(&srv, "GET", "/dst", &[], "").await;
    assert_eq!(body, "fresh");

    let (status, _, _) = request(&srv, "COPY", "/src", &[("Destination", "/copy")], "").await;
    assert_eq!(status, 201);
}

#[tokio::test]
async fn copy_and_move_status_ladder() {
    let srv = server();
    request(&srv, "PUT", "/src", &[], "x").await;

    // no Destination header
    let (status, _, _) = request(&srv, "COPY", "/src", &[], "").await;
    assert_eq!(status, 400);

    // bad Overwrite value
    let (status, _, _) = request(
        &srv,
        "COPY",
        "/src",
        &[("Destination", "/y"), ("Overwrite", "yes")],
        "",
    )
    .await;
    assert_eq!(status, 400);

    // destination parent absent
    let (status, _, _) = request(
        &srv,
        "COPY",
        "/src",
        &[("Destination", "/missing/child")],
        "",
    )
    .await;
    assert_eq!(status, 409);

    // destination parent is a file
    request(&srv, "PUT", "/plain", &[], "f").await;
    let (status, _, _) = request(
        &srv,
        "COPY",
        "/src",
        &[("Destination", "/plain/child")],
        "",
    )
    .await;
    assert_eq!(status, 415);
}

#[tokio::test]
async fn mkcol_refuses_non_xml_bodies_and_mapped_uris() {
    let srv = server();

    let (status, _, _) = request(
        &srv,
        "MKCOL",
        "/c",
        &[("Content-Type", "text/plain")],
        "some text",
    )
    .await;
    assert_eq!(status, 415);

    request(&srv, "MKCOL", "/c", &[], "").await;
    let (status, _, _) = request(&srv, "MKCOL", "/c", &[], "").await;
    assert_eq!(status, 405);
}

#[tokio::test]
async fn extended_mkcol_sets_initial_properties() {
    let srv = server();
    let body = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:mkcol xmlns:d="DAV:">
    <d:set>
        <d:prop>
            <d:resourcetype><d:collection/></d:resourcetype>
            <d:displayname>Fancy</d:displayname>
        </d:prop>
    </d:set>
</d:mkcol>"#;

    let (status, _, reply) = request(
        &srv,
        "MKCOL",
        "/fancy",
        &[("Content-Type", "application/xml")],
        body,
    )
    .await;
    assert_eq!(status, 201, "body: {reply}");

    let probe = r#"<?xml version="1.0"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:displayname/></d:prop></d:propfind>"#;
    let (_, _, body) = request(&srv, "PROPFIND", "/fancy", &[("Depth", "0")], probe).await;
    assert!(
        body.contains("<d:displayname>Fancy</d:displayname>"),
        "body: {body}"
    );
}

#[tokio::test]
async fn proppatch_sets_and_removes_dead_properties() {
    let srv = server();
    request(&srv, "MKCOL", "/notes", &[], "").await;

    let set = r#"<?xml version="1.0"?>
<d:propertyupdate xmlns:d="DAV:">
    <d:set><d:prop><d:displayname>Notes</d:displayname></d:prop></d:set>
</d:propertyupdate>"#;
    let (status, _, body) = request(&srv, "PROPPATCH", "/notes", &[], set).await;
    assert_eq!(status, 207);
    assert!(body.contains("HTTP/1.1 200 OK"), "body: {body}");

    let probe = r#"<?xml version="1.0"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:displayname/></d:prop></d:propfind>"#;
    let (_, _, body) = request(&srv, "PROPFIND", "/notes", &[("Depth", "0")], probe).await;
    assert!(body.contains("<d:displayname>Notes</d:displayname>"), "body: {body}");

    let remove = r#"<?xml version="1.0"?>
<d:propertyupdate xmlns:d="DAV:">
    <d:remove><d:prop><d:displayname/></d:prop></d:remove>
</d:propertyupdate>"#;
    let (status, _, _) = request(&srv, "PROPPATCH", "/notes", &[], remove).await;
    assert_eq!(status, 207);

    let (_, _, body) = request(&srv, "PROPFIND", "/notes", &[("Depth", "0")], probe).await;
    assert!(body.contains("HTTP/1.1 404 Not Found"), "body: {body}");
}

#[tokio::test]
async fn allprop_includes_quota_and_etag_for_files() {
    let srv = server();
    request(&srv, "PUT", "/f", &[], "12345").await;

    let (_, _, body) = request(&srv, "PROPFIND", "/", &[("Depth", "1")], "").await;
    assert!(body.contains("<d:quota-used-bytes>5</d:quota-used-bytes>"), "body: {body}");
    assert!(body.contains("<d:getetag>"), "body: {body}");
    assert!(
        body.contains("<d:getcontentlength>5</d:getcontentlength>"),
        "body: {body}"
    );
}

// --- extension surface ---

#[tokio::test]
async fn unknown_methods_answer_501() {
    let srv = server();
    let (status, _, body) = request(&srv, "PATCH", "/", &[], "").await;
    assert_eq!(status, 501);
    assert!(body.contains("<a:exception>NotImplemented</a:exception>"), "body: {body}");
}

#[tokio::test]
async fn unhandled_reports_answer_501() {
    let srv = server();
    let report = r#"<?xml version="1.0"?>
<x:strange-report xmlns:x="urn:example"/>"#;
    let (status, _, body) = request(&srv, "REPORT", "/", &[], report).await;
    assert_eq!(status, 501);
    assert!(
        body.contains("<a:exception>ReportNotImplemented</a:exception>"),
        "body: {body}"
    );
}

struct PingReport;

#[async_trait]
impl Subscriber for PingReport {
    async fn notify(&self, event: &mut Event<'_>) -> Result<Flow, DavError> {
        if let Event::Report { name, .. } = event {
            if name.local == "ping" {
                let response = hyper::Response::builder()
                    .status(207)
                    .body(text_body("pong"))
                    .expect("response");
                return Ok(Flow::Veto(Some(response)));
            }
        }
        Ok(Flow::Continue)
    }
}

#[tokio::test]
async fn report_subscribers_take_over() {
    let mut srv = Server::new(base_config(), Box::new(MemTree::new())).expect("server");
    srv.subscribe(EventKind::Report, Arc::new(PingReport));
    let srv = Arc::new(srv);

    let report = r#"<?xml version="1.0"?><x:ping xmlns:x="urn:example"/>"#;
    let (status, _, body) = request(&srv, "REPORT", "/", &[], report).await;
    assert_eq!(status, 207);
    assert_eq!(body, "pong");
}

#[tokio::test]
async fn basic_auth_plugin_guards_every_method() {
    let mut srv = Server::new(base_config(), Box::new(MemTree::new())).expect("server");
    srv.add_plugin(Arc::new(BasicAuth::new("files", |user, password| {
        user == "ada" && password == "secret"
    })))
    .expect("plugin");
    let srv = Arc::new(srv);

    let (status, headers, _) = request(&srv, "PROPFIND", "/", &[("Depth", "0")], "").await;
    assert_eq!(status, 401);
    assert_eq!(header(&headers, "WWW-Authenticate"), "Basic realm=\"files\"");

    // "ada:secret"
    let (status, _, _) = request(
        &srv,
        "PROPFIND",
        "/",
        &[("Depth", "0"), ("Authorization", "Basic YWRhOnNlY3JldA==")],
        "",
    )
    .await;
    assert_eq!(status, 207);
}

#[tokio::test]
async fn requests_outside_the_base_uri_are_forbidden() {
    let mut config = base_config();
    config.base_uri = "/dav/".into();
    let srv = Arc::new(Server::new(config, Box::new(MemTree::new())).expect("server"));

    let (status, _, body) = request(&srv, "PROPFIND", "/elsewhere", &[("Depth", "0")], "").await;
    assert_eq!(status, 403);
    assert!(body.contains("<a:exception>Forbidden</a:exception>"), "body: {body}");

    let (status, _, _) = request(&srv, "PROPFIND", "/dav", &[("Depth", "0")], "").await;
    assert_eq!(status, 207);
}

#[tokio::test]
async fn every_response_carries_the_version_header() {
    let srv = server();
    let (_, headers, _) = request(&srv, "OPTIONS", "/", &[], "").await;
    assert_eq!(
        header(&headers, "X-Davenport-Version"),
        davenport_server::VERSION
    );
}
