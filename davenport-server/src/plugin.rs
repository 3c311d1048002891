use std::sync::Arc;

use crate::error::DavError;
use crate::server::Server;

/// A server extension.
///
/// Plugins contribute OPTIONS feature tokens and per-URI verbs, and wire
/// themselves into the event bus during registration. The plugin set is
/// frozen once the server starts serving.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extra tokens for the `DAV:` response header.
    fn features(&self) -> Vec<String> {
        vec![]
    }

    /// Extra verbs for the `Allow` header on the given uri.
    fn http_methods(&self, _uri: &str) -> Vec<String> {
        vec![]
    }

    /// Called once from [`Server::add_plugin`]; subscribe to events and
    /// register property factories or namespaces here.
    fn register(self: Arc<Self>, server: &mut Server) -> Result<(), DavError>;
}
