use async_trait::async_trait;

use crate::error::DavError;
use crate::node::DavNode;
use crate::uri;

/// The single storage seam the dispatcher relies on.
///
/// `copy` and `move_node` ship with recursive default implementations in
/// terms of the node contract; backends that can do better (a rename, a
/// reflink) override them.
#[async_trait]
pub trait DavTree: Send + Sync {
    async fn node_for_path(&self, path: &str) -> Result<Box<dyn DavNode>, DavError>;

    async fn copy(&self, source: &str, destination: &str) -> Result<(), DavError> {
        let node = self.node_for_path(source).await?;
        let (parent_path, name) = uri::split_path(destination);
        let parent = self.node_for_path(&parent_path).await?;
        let parent = parent.as_collection().ok_or_else(|| {
            DavError::Conflict(format!(
                "cannot copy into {}: parent is not a collection",
                destination
            ))
        })?;

        if let Some(file) = node.as_file() {
            parent.create_file(&name, file.get().await?).await?;
        } else if let Some(collection) = node.as_collection() {
            parent.create_directory(&name).await?;
            for child in collection.children().await? {
                let child_name = child.name();
                self.copy(
                    &uri::join_path(source, &child_name),
                    &uri::join_path(destination, &child_name),
                )
                .await?;
            }
        } else {
            return Err(DavError::NotImplemented(format!(
                "node {} is neither a file nor a collection, refusing to copy it",
                source
            )));
        }
        Ok(())
    }

    async fn move_node(&self, source: &str, destination: &str) -> Result<(), DavError> {
        self.copy(source, destination).await?;
        self.node_for_path(source).await?.delete().await
    }
}
