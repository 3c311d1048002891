//! An in-memory tree backend.
//!
//! Small enough to read in one sitting, complete enough to exercise every
//! capability the dispatcher knows about: files, collections, dead
//! properties, quota and atomic extended MKCOL. The test-suite runs on
//! it; nothing here survives a restart.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::body::Bytes;

use davenport_xml::types::PropPatch;
use davenport_xml::values::PropValue;
use davenport_xml::xml::QName;

use crate::error::DavError;
use crate::node::{
    CollectionNode, DavNode, ExtendedCollectionNode, FileNode, PropertyStore, QuotaNode,
    UpdateOutcome,
};
use crate::tree::DavTree;
use crate::uri;

/// Reported as quota-available-bytes; memory is the real limit.
const FREE_SPACE: u64 = 4 << 30;

type Shared = Arc<Mutex<Dir>>;

#[derive(Default, Clone)]
struct Dir {
    entries: BTreeMap<String, Entry>,
    props: BTreeMap<QName, PropValue>,
}

#[derive(Clone)]
struct FileData {
    data: Bytes,
    content_type: Option<String>,
    modified: DateTime<Utc>,
    props: BTreeMap<QName, PropValue>,
}

#[derive(Clone)]
enum Entry {
    Dir(Dir),
    File(FileData),
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn dir_at<'a>(root: &'a Dir, path: &str) -> Option<&'a Dir> {
    let mut cur = root;
    for segment in segments(path) {
        match cur.entries.get(segment) {
            Some(Entry::Dir(dir)) => cur = dir,
            _ => return None,
        }
    }
    Some(cur)
}

fn dir_at_mut<'a>(root: &'a mut Dir, path: &str) -> Option<&'a mut Dir> {
    let mut cur = root;
    for segment in segments(path) {
        match cur.entries.get_mut(segment) {
            Some(Entry::Dir(dir)) => cur = dir,
            _ => return None,
        }
    }
    Some(cur)
}

/// The entry at `path`; the root itself is not an entry.
fn entry_at<'a>(root: &'a Dir, path: &str) -> Option<&'a Entry> {
    let (parent, name) = uri::split_path(path);
    if name.is_empty() {
        return None;
    }
    dir_at(root, &parent)?.entries.get(&name)
}

fn entry_at_mut<'a>(root: &'a mut Dir, path: &str) -> Option<&'a mut Entry> {
    let (parent, name) = uri::split_path(path);
    if name.is_empty() {
        return None;
    }
    dir_at_mut(root, &parent)?.entries.get_mut(&name)
}

fn subtree_size(dir: &Dir) -> u64 {
    dir.entries
        .values()
        .map(|entry| match entry {
            Entry::Dir(dir) => subtree_size(dir),
            Entry::File(file) => file.data.len() as u64,
        })
        .sum()
}

fn content_etag(data: &Bytes) -> String {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    data.len().hash(&mut hasher);
    format!("\"{:x}\"", hasher.finish())
}

fn not_found(path: &str) -> DavError {
    DavError::NotFound(format!("file not found: {}", path))
}

#[derive(Clone, Default)]
pub struct MemTree {
    shared: Shared,
}

impl MemTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Dir>, DavError> {
        self.shared
            .lock()
            .map_err(|_| DavError::Internal(anyhow::anyhow!("memfs state lock poisoned")))
    }

    fn node_at(&self, guard: &Dir, path: &str) -> Result<Box<dyn DavNode>, DavError> {
        if path.is_empty() {
            return Ok(Box::new(MemCollection {
                shared: self.shared.clone(),
                path: String::new(),
            }));
        }
        match entry_at(guard, path) {
            Some(Entry::Dir(_)) => Ok(Box::new(MemCollection {
                shared: self.shared.clone(),
                path: path.to_string(),
            })),
            Some(Entry::File(_)) => Ok(Box::new(MemFile {
                shared: self.shared.clone(),
                path: path.to_string(),
            })),
            None => Err(not_found(path)),
        }
    }
}

#[async_trait]
impl DavTree for MemTree {
    async fn node_for_path(&self, path: &str) -> Result<Box<dyn DavNode>, DavError> {
        let guard = self.lock()?;
        self.node_at(&guard, path)
    }

    async fn copy(&self, source: &str, destination: &str) -> Result<(), DavError> {
        let mut guard = self.lock()?;
        let entry = entry_at(&guard, source).cloned().ok_or_else(|| not_found(source))?;
        let (parent_path, name) = uri::split_path(destination);
        if name.is_empty() {
            return Err(DavError::Forbidden("the root collection cannot be replaced".into()));
        }
        let parent = dir_at_mut(&mut guard, &parent_path).ok_or_else(|| {
            DavError::Conflict(format!("the parent of {} is not a collection", destination))
        })?;
        parent.entries.insert(name, entry);
        Ok(())
    }

    async fn move_node(&self, source: &str, destination: &str) -> Result<(), DavError> {
        let mut guard = self.lock()?;
        let (dest_parent, dest_name) = uri::split_path(destination);
        if dest_name.is_empty() {
            return Err(DavError::Forbidden("the root collection cannot be replaced".into()));
        }
        if dir_at(&guard, &dest_parent).is_none() {
            return Err(DavError::Conflict(format!(
                "the parent of {} is not a collection",
                destination
            )));
        }

        let (src_parent, src_name) = uri::split_path(source);
        let entry = dir_at_mut(&mut guard, &src_parent)
            .and_then(|dir| dir.entries.remove(&src_name))
            .ok_or_else(|| not_found(source))?;

        // the parent re-lookup cannot fail: the lock is still held
        if let Some(parent) = dir_at_mut(&mut guard, &dest_parent) {
            parent.entries.insert(dest_name, entry);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemCollection {
    shared: Shared,
    path: String,
}

impl MemCollection {
    fn lock(&self) -> Result<MutexGuard<'_, Dir>, DavError> {
        self.shared
            .lock()
            .map_err(|_| DavError::Internal(anyhow::anyhow!("memfs state lock poisoned")))
    }
}

#[async_trait]
impl DavNode for MemCollection {
    fn name(&self) -> String {
        uri::split_path(&self.path).1
    }

    async fn delete(&self) -> Result<(), DavError> {
        if self.path.is_empty() {
            return Err(DavError::Forbidden("the root collection cannot be deleted".into()));
        }
        let mut guard = self.lock()?;
        let (parent, name) = uri::split_path(&self.path);
        dir_at_mut(&mut guard, &parent)
            .and_then(|dir| dir.entries.remove(&name))
            .map(|_| ())
            .ok_or_else(|| not_found(&self.path))
    }

    fn as_collection(&self) -> Option<&dyn CollectionNode> {
        Some(self)
    }
    fn as_properties(&self) -> Option<&dyn PropertyStore> {
        Some(self)
    }
    fn as_quota(&self) -> Option<&dyn QuotaNode> {
        Some(self)
    }
    fn as_extended(&self) -> Option<&dyn ExtendedCollectionNode> {
        Some(self)
    }
}

#[async_trait]
impl CollectionNode for MemCollection {
    async fn child(&self, name: &str) -> Result<Box<dyn DavNode>, DavError> {
        let guard = self.lock()?;
        let child_path = uri::join_path(&self.path, name);
        let dir = dir_at(&guard, &self.path).ok_or_else(|| not_found(&self.path))?;
        match dir.entries.get(name) {
            Some(Entry::Dir(_)) => Ok(Box::new(MemCollection {
                shared: self.shared.clone(),
                path: child_path,
            })),
            Some(Entry::File(_)) => Ok(Box::new(MemFile {
                shared: self.shared.clone(),
                path: child_path,
            })),
            None => Err(not_found(&child_path)),
        }
    }

    async fn children(&self) -> Result<Vec<Box<dyn DavNode>>, DavError> {
        let guard = self.lock()?;
        let dir = dir_at(&guard, &self.path).ok_or_else(|| not_found(&self.path))?;
        let mut children: Vec<Box<dyn DavNode>> = vec![];
        for (name, entry) in &dir.entries {
            let child_path = uri::join_path(&self.path, name);
            children.push(match entry {
                Entry::Dir(_) => Box::new(MemCollection {
                    shared: self.shared.clone(),
                    path: child_path,
                }),
                Entry::File(_) => Box::new(MemFile {
                    shared: self.shared.clone(),
                    path: child_path,
                }),
            });
        }
        Ok(children)
    }

    async fn create_file(&self, name: &str, data: Bytes) -> Result<(), DavError> {
        let mut guard = self.lock()?;
        let dir = dir_at_mut(&mut guard, &self.path).ok_or_else(|| not_found(&self.path))?;
        dir.entries.insert(
            name.to_string(),
            Entry::File(FileData {
                data,
                content_type: None,
                modified: Utc::now(),
                props: BTreeMap::new(),
            }),
        );
        Ok(())
    }

    async fn create_directory(&self, name: &str) -> Result<(), DavError> {
        let mut guard = self.lock()?;
        let dir = dir_at_mut(&mut guard, &self.path).ok_or_else(|| not_found(&self.path))?;
        if dir.entries.contains_key(name) {
            return Err(DavError::MethodNotAllowed(format!(
                "the node {} already exists",
                uri::join_path(&self.path, name)
            )));
        }
        dir.entries.insert(name.to_string(), Entry::Dir(Dir::default()));
        Ok(())
    }
}

#[async_trait]
impl PropertyStore for MemCollection {
    async fn get_properties(&self, names: &[QName]) -> Result<Vec<(QName, PropValue)>, DavError> {
        let guard = self.lock()?;
        let dir = dir_at(&guard, &self.path).ok_or_else(|| not_found(&self.path))?;
        Ok(select_props(&dir.props, names))
    }

    async fn update_properties(&self, ops: &[PropPatch]) -> Result<UpdateOutcome, DavError> {
        let mut guard = self.lock()?;
        let dir = dir_at_mut(&mut guard, &self.path).ok_or_else(|| not_found(&self.path))?;
        apply_props(&mut dir.props, ops);
        Ok(UpdateOutcome::Applied)
    }
}

#[async_trait]
impl QuotaNode for MemCollection {
    async fn quota_info(&self) -> Result<(u64, u64), DavError> {
        let guard = self.lock()?;
        let dir = dir_at(&guard, &self.path).ok_or_else(|| not_found(&self.path))?;
        Ok((subtree_size(dir), FREE_SPACE))
    }
}

#[async_trait]
impl ExtendedCollectionNode for MemCollection {
    async fn create_extended(
        &self,
        name: &str,
        resource_types: &[QName],
        properties: &[(QName, PropValue)],
    ) -> Result<(), DavError> {
        if resource_types.iter().any(|t| !t.is_dav("collection")) {
            return Err(DavError::InvalidResourceType(
                "memfs only supports plain collections".into(),
            ));
        }
        let mut guard = self.lock()?;
        let dir = dir_at_mut(&mut guard, &self.path).ok_or_else(|| not_found(&self.path))?;
        if dir.entries.contains_key(name) {
            return Err(DavError::MethodNotAllowed(format!(
                "the node {} already exists",
                uri::join_path(&self.path, name)
            )));
        }
        let mut created = Dir::default();
        for (prop_name, value) in properties {
            created.props.insert(prop_name.clone(), value.clone());
        }
        dir.entries.insert(name.to_string(), Entry::Dir(created));
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemFile {
    shared: Shared,
    path: String,
}

impl MemFile {
    fn lock(&self) -> Result<MutexGuard<'_, Dir>, DavError> {
        self.shared
            .lock()
            .map_err(|_| DavError::Internal(anyhow::anyhow!("memfs state lock poisoned")))
    }

    fn with_file<T>(
        &self,
        guard: &Dir,
        read: impl FnOnce(&FileData) -> T,
    ) -> Result<T, DavError> {
        match entry_at(guard, &self.path) {
            Some(Entry::File(file)) => Ok(read(file)),
            _ => Err(not_found(&self.path)),
        }
    }
}

#[async_trait]
impl DavNode for MemFile {
    fn name(&self) -> String {
        uri::split_path(&self.path).1
    }

    async fn delete(&self) -> Result<(), DavError> {
        let mut guard = self.lock()?;
        let (parent, name) = uri::split_path(&self.path);
        dir_at_mut(&mut guard, &parent)
            .and_then(|dir| dir.entries.remove(&name))
            .map(|_| ())
            .ok_or_else(|| not_found(&self.path))
    }

    fn as_file(&self) -> Option<&dyn FileNode> {
        Some(self)
    }
    fn as_properties(&self) -> Option<&dyn PropertyStore> {
        Some(self)
    }
}

#[async_trait]
impl FileNode for MemFile {
    async fn get(&self) -> Result<Bytes, DavError> {
        let guard = self.lock()?;
        self.with_file(&guard, |file| file.data.clone())
    }

    async fn put(&self, data: Bytes) -> Result<(), DavError> {
        let mut guard = self.lock()?;
        match entry_at_mut(&mut guard, &self.path) {
            Some(Entry::File(file)) => {
                file.data = data;
                file.modified = Utc::now();
                Ok(())
            }
            _ => Err(not_found(&self.path)),
        }
    }

    async fn size(&self) -> Result<u64, DavError> {
        let guard = self.lock()?;
        self.with_file(&guard, |file| file.data.len() as u64)
    }

    async fn etag(&self) -> Result<Option<String>, DavError> {
        let guard = self.lock()?;
        self.with_file(&guard, |file| Some(content_etag(&file.data)))
    }

    async fn content_type(&self) -> Result<Option<String>, DavError> {
        let guard = self.lock()?;
        self.with_file(&guard, |file| file.content_type.clone())
    }

    async fn last_modified(&self) -> Result<Option<DateTime<Utc>>, DavError> {
        let guard = self.lock()?;
        self.with_file(&guard, |file| Some(file.modified))
    }
}

#[async_trait]
impl PropertyStore for MemFile {
    async fn get_properties(&self, names: &[QName]) -> Result<Vec<(QName, PropValue)>, DavError> {
        let guard = self.lock()?;
        self.with_file(&guard, |file| select_props(&file.props, names))
    }

    async fn update_properties(&self, ops: &[PropPatch]) -> Result<UpdateOutcome, DavError> {
        let mut guard = self.lock()?;
        match entry_at_mut(&mut guard, &self.path) {
            Some(Entry::File(file)) => {
                apply_props(&mut file.props, ops);
                Ok(UpdateOutcome::Applied)
            }
            _ => Err(not_found(&self.path)),
        }
    }
}

fn select_props(
    props: &BTreeMap<QName, PropValue>,
    names: &[QName],
) -> Vec<(QName, PropValue)> {
    if names.is_empty() {
        props.iter().map(|(n, v)| (n.clone(), v.clone())).collect()
    } else {
        names
            .iter()
            .filter_map(|n| props.get(n).map(|v| (n.clone(), v.clone())))
            .collect()
    }
}

fn apply_props(props: &mut BTreeMap<QName, PropValue>, ops: &[PropPatch]) {
    for op in ops {
        match &op.value {
            Some(value) => {
                props.insert(op.name.clone(), value.clone());
            }
            None => {
                props.remove(&op.name);
            }
        }
    }
}
