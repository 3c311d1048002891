use std::collections::BTreeMap;

use hyper::body::Bytes;

use davenport_xml::types::{Depth, MsBody, MsResponse, Href, PropPatch, PropStat, Status};
use davenport_xml::values::PropValue;
use davenport_xml::xml::QName;

use crate::codec::{self, HttpResponse};
use crate::error::DavError;
use crate::events::{Emit, Event};
use crate::node::{DavNode, UpdateOutcome};
use crate::server::Server;
use crate::uri;

/// The conventional allprop set.
const DEFAULT_PROPERTIES: [&str; 7] = [
    "getlastmodified",
    "getcontentlength",
    "resourcetype",
    "quota-used-bytes",
    "quota-available-bytes",
    "getetag",
    "getcontenttype",
];

/// Per-resource outcome of a property operation: the href plus one
/// bucket of `(name, value)` pairs per status code. Empty buckets are
/// elided at serialization time.
pub struct PropfindEntry {
    pub href: String,
    pub buckets: BTreeMap<u16, Vec<(QName, Option<PropValue>)>>,
}

impl PropfindEntry {
    pub fn new(href: impl Into<String>) -> Self {
        let mut buckets = BTreeMap::new();
        buckets.insert(200, vec![]);
        buckets.insert(404, vec![]);
        Self {
            href: href.into(),
            buckets,
        }
    }

    pub fn insert(&mut self, status: u16, name: QName, value: Option<PropValue>) {
        self.buckets.entry(status).or_default().push((name, value));
    }

    pub fn has(&self, status: u16, name: &QName) -> bool {
        self.buckets
            .get(&status)
            .is_some_and(|bucket| bucket.iter().any(|(n, _)| n == name))
    }

    pub fn has_any(&self, name: &QName) -> bool {
        self.buckets
            .values()
            .any(|bucket| bucket.iter().any(|(n, _)| n == name))
    }

    pub fn value(&self, status: u16, name: &QName) -> Option<&PropValue> {
        self.buckets
            .get(&status)?
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn remove(&mut self, status: u16, name: &QName) {
        if let Some(bucket) = self.buckets.get_mut(&status) {
            bucket.retain(|(n, _)| n != name);
        }
    }

    pub fn names(&self, status: u16) -> Vec<QName> {
        self.buckets
            .get(&status)
            .map(|bucket| bucket.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether any bucket outside the 2xx class holds a property.
    pub fn has_failures(&self) -> bool {
        self.buckets
            .iter()
            .any(|(status, bucket)| !(200..300).contains(status) && !bucket.is_empty())
    }

    /// Strip empty buckets and produce the multistatus response.
    pub fn into_response(self) -> MsResponse {
        let propstats = self
            .buckets
            .into_iter()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(status, props)| PropStat {
                status: Status(
                    http::StatusCode::from_u16(status)
                        .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR),
                ),
                props,
            })
            .collect();
        MsResponse {
            href: Href(self.href),
            body: MsBody::PropStat(propstats),
        }
    }
}

/// What `create_collection` reports back to the MKCOL handler.
pub enum CreateOutcome {
    Created,
    /// The node was created, a property failed, and the creation was
    /// rolled back. The entry holds the per-property verdicts.
    PropertyFailure(PropfindEntry),
    Vetoed(HttpResponse),
}

impl Server {
    /// Gather properties for a node and, at depth 1, its children.
    ///
    /// An empty name list means allprop: the conventional default set
    /// unioned with whatever the node declares on its own.
    pub async fn get_properties_for_path(
        &self,
        path: &str,
        names: &[QName],
        depth: Depth,
    ) -> Result<Vec<PropfindEntry>, DavError> {
        let node = self.tree().node_for_path(path).await?;

        let mut children = vec![];
        if depth == Depth::One {
            if let Some(collection) = node.as_collection() {
                for child in collection.children().await? {
                    let child_path = uri::join_path(path, &child.name());
                    children.push((child_path, child));
                }
            }
        }

        let mut entries = vec![];
        entries.push(self.props_for_node(path, node.as_ref(), names).await?);
        for (child_path, child) in &children {
            entries.push(
                self.props_for_node(child_path, child.as_ref(), names)
                    .await?,
            );
        }
        Ok(entries)
    }

    async fn props_for_node(
        &self,
        path: &str,
        node: &dyn DavNode,
        names: &[QName],
    ) -> Result<PropfindEntry, DavError> {
        let mut entry = PropfindEntry::new(self.href_for(path));
        let allprop = names.is_empty();
        let mut requested: Vec<QName> = names.to_vec();

        // Whatever the node declares is authoritative
        if let Some(store) = node.as_properties() {
            for (name, value) in store.get_properties(&requested).await? {
                entry.insert(200, name, Some(value));
            }
        }

        if allprop {
            let mut set: Vec<QName> = DEFAULT_PROPERTIES.iter().map(|n| QName::dav(*n)).collect();
            for supplied in entry.names(200) {
                if !set.contains(&supplied) {
                    set.push(supplied);
                }
            }
            requested = set;
        }

        // resourcetype decides the trailing slash, so it is resolved even
        // when the client did not ask for it
        let resourcetype = QName::dav("resourcetype");
        let auto_resourcetype = !requested.contains(&resourcetype);
        if auto_resourcetype {
            requested.push(resourcetype.clone());
        }

        for name in &requested {
            if entry.has(200, name) {
                continue;
            }
            match self.live_property(node, name).await? {
                Some(value) => entry.insert(200, name.clone(), Some(value)),
                None => entry.insert(404, name.clone(), None),
            }
        }

        let mut event = Event::AfterGetProperties {
            path,
            entry: &mut entry,
        };
        self.events().emit(&mut event).await?;

        let is_collection = match entry.value(200, &resourcetype) {
            Some(PropValue::ResourceType(types)) => !types.is_empty(),
            Some(_) => true,
            None => false,
        };
        if is_collection && !entry.href.ends_with('/') {
            entry.href.push('/');
        }

        if auto_resourcetype {
            entry.remove(200, &resourcetype);
            entry.remove(404, &resourcetype);
        }

        Ok(entry)
    }

    /// The built-in providers for live DAV: properties. `None` lands the
    /// name in the 404 bucket.
    async fn live_property(
        &self,
        node: &dyn DavNode,
        name: &QName,
    ) -> Result<Option<PropValue>, DavError> {
        if name.ns != davenport_xml::xml::DAV_URN {
            return Ok(None);
        }
        let value = match name.local.as_str() {
            "getlastmodified" => match node.as_file() {
                Some(file) => file.last_modified().await?.map(PropValue::Date),
                None => None,
            },
            "getcontentlength" => match node.as_file() {
                Some(file) => Some(PropValue::Int(file.size().await? as i64)),
                None => None,
            },
            "resourcetype" => {
                if node.is_collection() {
                    Some(PropValue::ResourceType(vec![QName::dav("collection")]))
                } else {
                    Some(PropValue::ResourceType(vec![]))
                }
            }
            "quota-used-bytes" => match node.as_quota() {
                Some(quota) => Some(PropValue::Int(quota.quota_info().await?.0 as i64)),
                None => None,
            },
            "quota-available-bytes" => match node.as_quota() {
                Some(quota) => Some(PropValue::Int(quota.quota_info().await?.1 as i64)),
                None => None,
            },
            "getetag" => match node.as_file() {
                Some(file) => file.etag().await?.map(PropValue::Text),
                None => None,
            },
            "getcontenttype" => match node.as_file() {
                Some(file) => file.content_type().await?.map(PropValue::Text),
                None => None,
            },
            "supported-report-set" => Some(PropValue::SupportedReportSet(vec![])),
            _ => None,
        };
        Ok(value)
    }

    /// Apply a PROPPATCH operation list. Protected names fail with 403
    /// and poison the rest of the batch with 424; nothing is written
    /// unless every candidate can be attempted.
    pub async fn update_properties(
        &self,
        path: &str,
        ops: &[PropPatch],
    ) -> Result<PropfindEntry, DavError> {
        let node = self.tree().node_for_path(path).await?;
        let mut entry = PropfindEntry::new(self.href_for(path));

        let store = match node.as_properties() {
            Some(store) => store,
            None => {
                for op in ops {
                    entry.insert(403, op.name.clone(), None);
                }
                return Ok(entry);
            }
        };

        let mut rejected = false;
        for op in ops {
            if self.is_protected(&op.name) {
                entry.insert(403, op.name.clone(), None);
                rejected = true;
            }
        }
        let candidates: Vec<PropPatch> = ops
            .iter()
            .filter(|op| !self.is_protected(&op.name))
            .cloned()
            .collect();

        if rejected {
            for op in &candidates {
                entry.insert(424, op.name.clone(), None);
            }
            return Ok(entry);
        }

        match store.update_properties(&candidates).await? {
            UpdateOutcome::Applied => {
                for op in &candidates {
                    entry.insert(200, op.name.clone(), None);
                }
            }
            UpdateOutcome::Rejected => {
                for op in &candidates {
                    entry.insert(403, op.name.clone(), None);
                }
            }
            UpdateOutcome::Detailed(verdicts) => {
                for (status, names) in verdicts {
                    for name in names {
                        entry.insert(status, name, None);
                    }
                }
                for op in &candidates {
                    if !entry.has_any(&op.name) {
                        entry.insert(424, op.name.clone(), None);
                    }
                }
            }
        }
        Ok(entry)
    }

    /// Create a file through the bind events. `Some` means a subscriber
    /// vetoed and this is the response to send.
    pub(crate) async fn create_file(
        &self,
        path: &str,
        data: Bytes,
    ) -> Result<Option<HttpResponse>, DavError> {
        let mut before_bind = Event::BeforeBind { uri: path };
        if let Emit::Vetoed(response) = self.events().emit(&mut before_bind).await? {
            return Ok(Some(codec::veto_response(response)));
        }
        let mut before_create = Event::BeforeCreateFile {
            uri: path,
            data: &data,
        };
        if let Emit::Vetoed(response) = self.events().emit(&mut before_create).await? {
            return Ok(Some(codec::veto_response(response)));
        }

        let (parent_path, name) = uri::split_path(path);
        let parent = match self.tree().node_for_path(&parent_path).await {
            Ok(parent) => parent,
            Err(DavError::NotFound(_)) => {
                return Err(DavError::Conflict(format!(
                    "cannot create {}: the parent collection does not exist",
                    path
                )))
            }
            Err(e) => return Err(e),
        };
        let collection = parent.as_collection().ok_or_else(|| {
            DavError::Conflict(format!(
                "cannot create {}: the parent node is not a collection",
                path
            ))
        })?;
        collection.create_file(&name, data).await?;

        let mut after_bind = Event::AfterBind { uri: path };
        self.events().emit(&mut after_bind).await?;
        Ok(None)
    }

    /// Create a collection, extended-MKCOL style: resource types plus
    /// initial properties, rolled back if a property cannot be set.
    pub(crate) async fn create_collection(
        &self,
        path: &str,
        resource_types: &[QName],
        properties: &[(QName, PropValue)],
    ) -> Result<CreateOutcome, DavError> {
        if !resource_types.iter().any(|t| t.is_dav("collection")) {
            return Err(DavError::InvalidResourceType(
                "every collection must carry the {DAV:}collection resource type".into(),
            ));
        }

        let (parent_path, name) = uri::split_path(path);
        let parent = match self.tree().node_for_path(&parent_path).await {
            Ok(parent) => parent,
            Err(DavError::NotFound(_)) => {
                return Err(DavError::Conflict(format!(
                    "the parent node of {} does not exist",
                    path
                )))
            }
            Err(e) => return Err(e),
        };
        let collection = parent.as_collection().ok_or_else(|| {
            DavError::Conflict(format!("the parent node of {} is not a collection", path))
        })?;
        match self.tree().node_for_path(path).await {
            Ok(_) => {
                return Err(DavError::MethodNotAllowed(format!(
                    "the node {} already exists",
                    path
                )))
            }
            Err(DavError::NotFound(_)) => (),
            Err(e) => return Err(e),
        }

        let mut before_bind = Event::BeforeBind { uri: path };
        if let Emit::Vetoed(response) = self.events().emit(&mut before_bind).await? {
            return Ok(CreateOutcome::Vetoed(codec::veto_response(response)));
        }

        if let Some(extended) = parent.as_extended() {
            extended
                .create_extended(&name, resource_types, properties)
                .await?;
        } else {
            if resource_types.iter().any(|t| !t.is_dav("collection")) {
                return Err(DavError::InvalidResourceType(
                    "this collection does not support extended resource types".into(),
                ));
            }
            collection.create_directory(&name).await?;

            if !properties.is_empty() {
                let ops: Vec<PropPatch> = properties
                    .iter()
                    .map(|(name, value)| PropPatch {
                        name: name.clone(),
                        value: Some(value.clone()),
                    })
                    .collect();
                match self.update_properties(path, &ops).await {
                    Ok(entry) if entry.has_failures() => {
                        self.rollback_creation(path).await;
                        return Ok(CreateOutcome::PropertyFailure(entry));
                    }
                    Ok(_) => (),
                    Err(e) => {
                        self.rollback_creation(path).await;
                        return Err(e);
                    }
                }
            }
        }

        let mut after_bind = Event::AfterBind { uri: path };
        self.events().emit(&mut after_bind).await?;
        Ok(CreateOutcome::Created)
    }

    /// Undo a half-finished creation; the original failure is what the
    /// client hears about, so problems here are only logged.
    async fn rollback_creation(&self, path: &str) {
        let mut before_unbind = Event::BeforeUnbind { uri: path };
        if let Err(e) = self.events().emit(&mut before_unbind).await {
            tracing::warn!(err=?e, path, "rollback: beforeUnbind subscriber failed");
        }
        match self.tree().node_for_path(path).await {
            Ok(node) => {
                if let Err(e) = node.delete().await {
                    tracing::warn!(err=?e, path, "rollback: unable to delete node");
                }
            }
            Err(e) => tracing::warn!(err=?e, path, "rollback: node vanished"),
        }
    }

    /// The four entity headers derived from properties; missing
    /// properties are simply omitted.
    pub async fn http_headers(&self, path: &str) -> Result<Vec<(&'static str, String)>, DavError> {
        let names = [
            QName::dav("getcontenttype"),
            QName::dav("getcontentlength"),
            QName::dav("getlastmodified"),
            QName::dav("getetag"),
        ];
        let mut entries = self
            .get_properties_for_path(path, &names, Depth::Zero)
            .await?;
        let entry = match entries.drain(..).next() {
            Some(entry) => entry,
            None => return Ok(vec![]),
        };

        let mut headers = vec![];
        if let Some(PropValue::Text(v)) = entry.value(200, &names[0]) {
            headers.push(("Content-Type", v.clone()));
        }
        if let Some(PropValue::Int(v)) = entry.value(200, &names[1]) {
            headers.push(("Content-Length", v.to_string()));
        }
        if let Some(PropValue::Date(v)) = entry.value(200, &names[2]) {
            headers.push((
                "Last-Modified",
                davenport_xml::values::format_http_date(v),
            ));
        }
        if let Some(PropValue::Text(v)) = entry.value(200, &names[3]) {
            headers.push(("ETag", v.clone()));
        }
        Ok(headers)
    }

    pub(crate) fn href_for(&self, path: &str) -> String {
        format!("{}{}", self.base_uri(), path)
    }
}
