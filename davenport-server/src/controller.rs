use std::sync::Arc;

use hyper::{Request, Response};

use davenport_xml::element::Element;
use davenport_xml::error::ParsingError;
use davenport_xml::types::{Depth, Mkcol, Multistatus, PropFind, PropertyUpdate, Report};
use davenport_xml::xml::QName;

use crate::codec::{self, HttpBody, HttpResponse};
use crate::error::DavError;
use crate::events::{Emit, Event};
use crate::headers;
use crate::node::DavNode;
use crate::precond::{self, PrecondOutcome};
use crate::props::CreateOutcome;
use crate::server::Server;
use crate::uri;
use crate::VERSION;

/// HTTP entry point: route one request, convert any error into the XML
/// error document. Never fails; the error path is the error handler.
pub async fn dispatch<B: HttpBody>(server: &Arc<Server>, req: Request<B>) -> HttpResponse {
    let method = req.method().as_str().to_uppercase();
    let raw_uri = req.uri().path().to_string();
    tracing::info!(method = %method, uri = %raw_uri, "dav request");

    let mut response = match Controller::route(server, req).await {
        Ok(response) => response,
        Err(err) => error_response(server, err).await,
    };
    if let Ok(version) = VERSION.parse() {
        response.headers_mut().insert("X-Davenport-Version", version);
    }
    response
}

/// The centralized error handler: status from the error kind, headers
/// contributed by the error, an XML document as the body.
async fn error_response(server: &Server, err: DavError) -> HttpResponse {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(err = %err, "dav request failed");
    } else {
        tracing::debug!(err = %err, status = %status, "dav request refused");
    }

    let document = err.into_body(VERSION);
    let xml = codec::serialize_to_string(&document, server.namespaces())
        .await
        .unwrap_or_default();

    let mut builder = Response::builder()
        .status(status)
        .header("Content-Type", "application/xml; charset=utf-8");
    for (name, value) in err.extra_headers() {
        builder = builder.header(name, value);
    }
    builder
        .body(codec::text_body(xml))
        .unwrap_or_else(|_| Response::new(codec::empty_body()))
}

fn internal(e: http::Error) -> DavError {
    DavError::Internal(e.into())
}

fn simple(status: u16) -> Result<HttpResponse, DavError> {
    Response::builder()
        .status(status)
        .header("Content-Length", "0")
        .body(codec::empty_body())
        .map_err(internal)
}

struct CopyMoveInfo {
    destination: String,
    destination_exists: bool,
    destination_node: Option<Box<dyn DavNode>>,
}

struct Controller<'a, B> {
    srv: &'a Arc<Server>,
    req: Request<B>,
    path: String,
}

impl<'a, B: HttpBody> Controller<'a, B> {
    async fn route(server: &'a Arc<Server>, req: Request<B>) -> Result<HttpResponse, DavError> {
        let method = req.method().as_str().to_uppercase();
        let path = uri::calculate_uri(server.base_uri(), req.uri().path())?;

        {
            let mut event = Event::BeforeMethod {
                method: &method,
                uri: &path,
                headers: req.headers(),
            };
            if let Emit::Vetoed(response) = server.events().emit(&mut event).await? {
                return Ok(codec::veto_response(response));
            }
        }

        let ctrl = Controller {
            srv: server,
            req,
            path,
        };
        match method.as_str() {
            "OPTIONS" => ctrl.options().await,
            "GET" => ctrl.get().await,
            "HEAD" => ctrl.head().await,
            "DELETE" => ctrl.delete().await,
            "PUT" => ctrl.put().await,
            "MKCOL" => ctrl.mkcol().await,
            "COPY" => ctrl.copy_move(false).await,
            "MOVE" => ctrl.copy_move(true).await,
            "PROPFIND" => ctrl.propfind().await,
            "PROPPATCH" => ctrl.proppatch().await,
            "REPORT" => ctrl.report().await,
            _ => ctrl.unknown(&method).await,
        }
    }

    // --- Per-method handlers ---

    async fn options(self) -> Result<HttpResponse, DavError> {
        let exists = match self.srv.tree().node_for_path(&self.path).await {
            Ok(_) => true,
            Err(DavError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };

        let mut allow: Vec<String> = [
            "OPTIONS", "GET", "HEAD", "DELETE", "PROPFIND", "PUT", "PROPPATCH", "COPY", "MOVE",
            "REPORT",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        // MKCOL can only ever succeed on an unmapped uri
        if !exists {
            allow.push("MKCOL".to_string());
        }

        let mut features: Vec<String> = ["1", "3", "extended-mkcol"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for plugin in self.srv.plugins() {
            allow.extend(plugin.http_methods(&self.path));
            features.extend(plugin.features());
        }

        Response::builder()
            .status(200)
            .header("Allow", allow.join(","))
            .header("DAV", features.join(","))
            .header("MS-Author-Via", "DAV")
            .header("Accept-Ranges", "bytes")
            .header("Content-Length", "0")
            .body(codec::empty_body())
            .map_err(internal)
    }

    async fn get(self) -> Result<HttpResponse, DavError> {
        let outcome = precond::check(self.srv, self.req.headers(), &self.path, true).await?;
        if outcome == PrecondOutcome::NotModified {
            return Response::builder()
                .status(304)
                .body(codec::empty_body())
                .map_err(internal);
        }

        let node = self.srv.tree().node_for_path(&self.path).await?;
        let file = node.as_file().ok_or_else(|| {
            DavError::NotImplemented("GET is only implemented on files".into())
        })?;

        let mut entity_headers = self.srv.http_headers(&self.path).await?;
        if !entity_headers.iter().any(|(name, _)| *name == "Content-Type") {
            entity_headers.push(("Content-Type", "application/octet-stream".to_string()));
        }

        let body = file.get().await?;
        let size = file.size().await?;

        if let Some(spec) =
            headers::header_str(self.req.headers(), "Range").and_then(headers::parse_range)
        {
            let wants_range = match headers::header_str(self.req.headers(), "If-Range") {
                Some(raw) => headers::if_range_matches(
                    raw,
                    file.etag().await?.as_deref(),
                    file.last_modified().await?,
                ),
                None => true,
            };
            if wants_range {
                let (start, end) = headers::resolve_range(&spec, size)?;
                let upper = ((end + 1) as usize).min(body.len());
                let slice = body.slice(start as usize..upper);

                let mut builder = Response::builder()
                    .status(206)
                    .header("Content-Range", format!("bytes {}-{}/{}", start, end, size))
                    .header("Content-Length", slice.len().to_string());
                for (name, value) in &entity_headers {
                    if *name != "Content-Length" {
                        builder = builder.header(*name, value.as_str());
                    }
                }
                return builder.body(codec::text_body(slice)).map_err(internal);
            }
        }

        let mut builder = Response::builder()
            .status(200)
            .header("Content-Length", body.len().to_string());
        for (name, value) in &entity_headers {
            if *name != "Content-Length" {
                builder = builder.header(*name, value.as_str());
            }
        }
        builder.body(codec::text_body(body)).map_err(internal)
    }

    async fn head(self) -> Result<HttpResponse, DavError> {
        let node = self.srv.tree().node_for_path(&self.path).await?;
        if node.as_file().is_none() {
            // Not a 405: legacy authoring clients probe collections with
            // HEAD and give up entirely on an error
            return simple(200);
        }

        let mut entity_headers = self.srv.http_headers(&self.path).await?;
        if !entity_headers.iter().any(|(name, _)| *name == "Content-Type") {
            entity_headers.push(("Content-Type", "application/octet-stream".to_string()));
        }

        let mut builder = Response::builder().status(200);
        for (name, value) in &entity_headers {
            builder = builder.header(*name, value.as_str());
        }
        builder.body(codec::empty_body()).map_err(internal)
    }

    async fn delete(self) -> Result<HttpResponse, DavError> {
        let node = self.srv.tree().node_for_path(&self.path).await?;
        {
            let mut event = Event::BeforeUnbind { uri: &self.path };
            if let Emit::Vetoed(response) = self.srv.events().emit(&mut event).await? {
                return Ok(codec::veto_response(response));
            }
        }
        node.delete().await?;
        simple(204)
    }

    async fn put(self) -> Result<HttpResponse, DavError> {
        let (parts, body) = self.req.into_parts();
        // the staging guard deletes the spool file on every exit path
        let (data, _staging) = codec::stage_body(body, self.srv.tmp_dir()).await?;

        match self.srv.tree().node_for_path(&self.path).await {
            Ok(node) => {
                precond::check(self.srv, &parts.headers, &self.path, false).await?;
                let file = node.as_file().ok_or_else(|| {
                    DavError::Conflict("PUT is not allowed on non-files".into())
                })?;
                {
                    let mut event = Event::BeforeWriteContent { uri: &self.path };
                    if let Emit::Vetoed(response) = self.srv.events().emit(&mut event).await? {
                        return Ok(codec::veto_response(response));
                    }
                }
                file.put(data).await?;
                simple(200)
            }
            Err(DavError::NotFound(_)) => {
                match self.srv.create_file(&self.path, data).await? {
                    Some(response) => Ok(response),
                    None => simple(201),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn mkcol(self) -> Result<HttpResponse, DavError> {
        let (parts, body) = self.req.into_parts();
        let bytes = codec::collect_body(body).await?;

        let (resource_types, properties) = if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            (vec![QName::dav("collection")], vec![])
        } else {
            let content_type = parts
                .headers
                .get("Content-Type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if !(content_type.starts_with("application/xml")
                || content_type.starts_with("text/xml"))
            {
                return Err(DavError::UnsupportedMediaType(
                    "the MKCOL request body requires an xml content-type".into(),
                ));
            }

            let dom: Element = codec::deserialize(&bytes).await?;
            let mkcol = Mkcol::from_element(&dom, self.srv.registry()).map_err(|e| {
                DavError::BadRequest(match e {
                    ParsingError::TagNotFound => "expected a {DAV:}mkcol document".to_string(),
                    ParsingError::MissingChild => {
                        "the mkcol body requires a {DAV:}set block carrying {DAV:}resourcetype"
                            .to_string()
                    }
                    other => other.to_string(),
                })
            })?;
            (mkcol.resource_types, mkcol.properties)
        };

        match self
            .srv
            .create_collection(&self.path, &resource_types, &properties)
            .await?
        {
            CreateOutcome::Created => simple(201),
            CreateOutcome::PropertyFailure(entry) => codec::serialize(
                http::StatusCode::MULTI_STATUS,
                Multistatus::new(vec![entry.into_response()]),
                self.srv.namespaces(),
            ),
            CreateOutcome::Vetoed(response) => Ok(response),
        }
    }

    async fn copy_move(self, is_move: bool) -> Result<HttpResponse, DavError> {
        let info = self.copy_move_info().await?;

        if let Some(existing) = &info.destination_node {
            let mut event = Event::BeforeUnbind {
                uri: &info.destination,
            };
            if let Emit::Vetoed(response) = self.srv.events().emit(&mut event).await? {
                return Ok(codec::veto_response(response));
            }
            existing.delete().await?;
        }

        {
            let mut event = Event::BeforeBind {
                uri: &info.destination,
            };
            if let Emit::Vetoed(response) = self.srv.events().emit(&mut event).await? {
                return Ok(codec::veto_response(response));
            }
        }

        if is_move {
            self.srv
                .tree()
                .move_node(&self.path, &info.destination)
                .await?;
        } else {
            self.srv.tree().copy(&self.path, &info.destination).await?;
        }

        {
            let mut event = Event::AfterBind {
                uri: &info.destination,
            };
            self.srv.events().emit(&mut event).await?;
        }

        simple(if info.destination_exists { 204 } else { 201 })
    }

    /// Destination/Overwrite header handling shared by COPY and MOVE.
    async fn copy_move_info(&self) -> Result<CopyMoveInfo, DavError> {
        let destination_raw = headers::header_str(self.req.headers(), "Destination")
            .ok_or_else(|| DavError::BadRequest("the Destination header is missing".into()))?;
        let overwrite = match headers::header_str(self.req.headers(), "Overwrite").map(str::trim)
        {
            None | Some("") => true,
            Some(raw) if raw.eq_ignore_ascii_case("T") => true,
            Some(raw) if raw.eq_ignore_ascii_case("F") => false,
            Some(_) => {
                return Err(DavError::BadRequest(
                    "the Overwrite header must be either T or F".into(),
                ))
            }
        };
        let destination = uri::calculate_uri(self.srv.base_uri(), destination_raw)?;

        // the source must resolve before the destination is touched
        self.srv.tree().node_for_path(&self.path).await?;

        let (parent_path, _) = uri::split_path(&destination);
        let parent = match self.srv.tree().node_for_path(&parent_path).await {
            Ok(parent) => parent,
            Err(DavError::NotFound(_)) => {
                return Err(DavError::Conflict(
                    "the destination parent node does not exist".into(),
                ))
            }
            Err(e) => return Err(e),
        };
        if parent.as_collection().is_none() {
            return Err(DavError::UnsupportedMediaType(
                "the destination parent node is not a collection".into(),
            ));
        }

        let destination_node = match self.srv.tree().node_for_path(&destination).await {
            Ok(node) => {
                if !overwrite {
                    return Err(DavError::PreconditionFailed(
                        "the destination node already exists, and the Overwrite header is set to F"
                            .into(),
                    ));
                }
                Some(node)
            }
            Err(DavError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        Ok(CopyMoveInfo {
            destination_exists: destination_node.is_some(),
            destination,
            destination_node,
        })
    }

    async fn propfind(self) -> Result<HttpResponse, DavError> {
        // any non-zero depth, including infinity, walks direct children
        let depth = match codec::depth(self.req.headers(), Depth::Infinity) {
            Depth::Zero => Depth::Zero,
            _ => Depth::One,
        };

        let (_, body) = self.req.into_parts();
        let bytes = codec::collect_body(body).await?;
        let names: Vec<QName> = if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            // an empty request body is an allprop request
            vec![]
        } else {
            match codec::deserialize::<PropFind>(&bytes).await? {
                PropFind::Prop(names) => names,
                PropFind::AllProp(_) | PropFind::PropName => vec![],
            }
        };

        let entries = self
            .srv
            .get_properties_for_path(&self.path, &names, depth)
            .await?;
        let multistatus =
            Multistatus::new(entries.into_iter().map(|e| e.into_response()).collect());
        codec::serialize(
            http::StatusCode::MULTI_STATUS,
            multistatus,
            self.srv.namespaces(),
        )
    }

    async fn proppatch(self) -> Result<HttpResponse, DavError> {
        let (_, body) = self.req.into_parts();
        let bytes = codec::collect_body(body).await?;
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(DavError::BadRequest(
                "the propertyupdate request body is missing".into(),
            ));
        }

        let dom: Element = codec::deserialize(&bytes).await?;
        let update = PropertyUpdate::from_element(&dom, self.srv.registry()).map_err(|_| {
            DavError::BadRequest("expected a {DAV:}propertyupdate document".into())
        })?;

        let entry = self.srv.update_properties(&self.path, &update.0).await?;
        codec::serialize(
            http::StatusCode::MULTI_STATUS,
            Multistatus::new(vec![entry.into_response()]),
            self.srv.namespaces(),
        )
    }

    async fn report(self) -> Result<HttpResponse, DavError> {
        let (_, body) = self.req.into_parts();
        let bytes = codec::collect_body(body).await?;
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(DavError::BadRequest("the report request body is missing".into()));
        }

        let dom: Element = codec::deserialize(&bytes).await?;
        let report = Report::from_element(dom);

        let mut event = Event::Report {
            name: report.name(),
            body: &report.root,
        };
        match self.srv.events().emit(&mut event).await? {
            Emit::Vetoed(response) => Ok(codec::veto_response(response)),
            Emit::Completed => Err(DavError::ReportNotImplemented(format!(
                "the {} report is not implemented",
                report.name()
            ))),
        }
    }

    async fn unknown(self, method: &str) -> Result<HttpResponse, DavError> {
        let mut event = Event::UnknownMethod {
            method,
            uri: &self.path,
        };
        match self.srv.events().emit(&mut event).await? {
            Emit::Vetoed(response) => Ok(codec::veto_response(response)),
            Emit::Completed => Err(DavError::NotImplemented(format!(
                "there is no handler for the {} method",
                method
            ))),
        }
    }
}
