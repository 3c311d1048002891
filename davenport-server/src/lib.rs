pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod headers;
pub mod memfs;
pub mod node;
pub mod plugin;
pub mod plugins;
pub mod precond;
pub mod props;
pub mod server;
pub mod tree;
pub mod uri;

pub use controller::dispatch;
pub use error::DavError;
pub use server::Server;

/// Version advertised in the `X-Davenport-Version` header and in error
/// documents.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
