use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::body::Bytes;

use davenport_xml::types::PropPatch;
use davenport_xml::values::PropValue;
use davenport_xml::xml::QName;

use crate::error::DavError;

/// A resource in the tree.
///
/// Capabilities are queried, never assumed: a handler that needs a file
/// asks [`DavNode::as_file`] and turns a `None` into its own status code.
/// Backends implement the capability traits they support and reveal them
/// through the `as_*` accessors.
#[async_trait]
pub trait DavNode: Send + Sync {
    /// The last path segment of this node.
    fn name(&self) -> String;

    async fn delete(&self) -> Result<(), DavError>;

    fn as_file(&self) -> Option<&dyn FileNode> {
        None
    }
    fn as_collection(&self) -> Option<&dyn CollectionNode> {
        None
    }
    fn as_properties(&self) -> Option<&dyn PropertyStore> {
        None
    }
    fn as_quota(&self) -> Option<&dyn QuotaNode> {
        None
    }
    fn as_extended(&self) -> Option<&dyn ExtendedCollectionNode> {
        None
    }

    fn is_collection(&self) -> bool {
        self.as_collection().is_some()
    }
}

#[async_trait]
pub trait FileNode: DavNode {
    async fn get(&self) -> Result<Bytes, DavError>;
    async fn put(&self, data: Bytes) -> Result<(), DavError>;
    async fn size(&self) -> Result<u64, DavError>;
    async fn etag(&self) -> Result<Option<String>, DavError>;
    async fn content_type(&self) -> Result<Option<String>, DavError>;
    async fn last_modified(&self) -> Result<Option<DateTime<Utc>>, DavError>;
}

#[async_trait]
pub trait CollectionNode: DavNode {
    async fn child(&self, name: &str) -> Result<Box<dyn DavNode>, DavError>;
    async fn children(&self) -> Result<Vec<Box<dyn DavNode>>, DavError>;
    async fn create_file(&self, name: &str, data: Bytes) -> Result<(), DavError>;
    async fn create_directory(&self, name: &str) -> Result<(), DavError>;
}

/// What a backend reports after applying a property update.
pub enum UpdateOutcome {
    /// Every operation applied: all properties answer 200.
    Applied,
    /// Nothing applied: all properties answer 403.
    Rejected,
    /// Per-status verdicts, used verbatim. Operations the backend does
    /// not mention answer 424.
    Detailed(BTreeMap<u16, Vec<QName>>),
}

#[async_trait]
pub trait PropertyStore: DavNode {
    /// Declared values for the requested names; an empty request returns
    /// everything the node has.
    async fn get_properties(&self, names: &[QName]) -> Result<Vec<(QName, PropValue)>, DavError>;

    /// Apply the ordered operation list. The caller has already filtered
    /// protected names; the whole batch must apply or fail together.
    async fn update_properties(&self, ops: &[PropPatch]) -> Result<UpdateOutcome, DavError>;
}

#[async_trait]
pub trait QuotaNode: DavNode {
    /// `(used, available)` in bytes.
    async fn quota_info(&self) -> Result<(u64, u64), DavError>;
}

#[async_trait]
pub trait ExtendedCollectionNode: CollectionNode {
    /// Atomically create a child collection carrying the given resource
    /// types and initial properties.
    async fn create_extended(
        &self,
        name: &str,
        resource_types: &[QName],
        properties: &[(QName, PropValue)],
    ) -> Result<(), DavError>;
}
