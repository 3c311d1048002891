use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

use davenport_xml::values::PropertyRegistry;
use davenport_xml::xml::{NamespaceMap, QName};

use crate::config::DavConfig;
use crate::controller::dispatch;
use crate::error::DavError;
use crate::events::{EventBus, EventKind, Subscriber};
use crate::plugin::Plugin;
use crate::tree::DavTree;

/// Properties the server computes; PROPPATCH may never touch them.
const PROTECTED_PROPERTIES: [&str; 12] = [
    "getcontentlength",
    "getetag",
    "getlastmodified",
    "lockdiscovery",
    "resourcetype",
    "supportedlock",
    "quota-available-bytes",
    "quota-used-bytes",
    "acl",
    "supported-privilege-set",
    "current-user-privilege-set",
    "current-user-principal",
];

/// The server instance: one tree, one property registry, one plugin set,
/// one namespace map.
///
/// Everything here is mutated during setup only and is read-only while
/// requests are in flight; per-request state lives on the dispatcher's
/// stack, never on this struct.
pub struct Server {
    base_uri: String,
    bind_addr: SocketAddr,
    tmp_dir: PathBuf,
    tls: Option<TlsAcceptor>,
    tree: Box<dyn DavTree>,
    registry: PropertyRegistry,
    events: EventBus,
    plugins: Vec<Arc<dyn Plugin>>,
    namespaces: NamespaceMap,
    protected: Vec<QName>,
}

fn tls_acceptor(config: &crate::config::TlsConfig) -> Result<TlsAcceptor> {
    let mut cert_reader = std::io::BufReader::new(std::fs::File::open(&config.certs)?);
    let chain = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;

    let mut key_reader = std::io::BufReader::new(std::fs::File::open(&config.key)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {:?}", config.key))?;

    let tls = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    Ok(TlsAcceptor::from(Arc::new(tls)))
}

impl Server {
    pub fn new(config: DavConfig, tree: Box<dyn DavTree>) -> Result<Self> {
        let tls = match &config.tls {
            Some(tls_config) => Some(tls_acceptor(tls_config)?),
            None => None,
        };

        let base_uri = if config.base_uri.ends_with('/') {
            config.base_uri
        } else {
            format!("{}/", config.base_uri)
        };

        Ok(Self {
            base_uri,
            bind_addr: config.bind_addr,
            tmp_dir: config.tmp_dir,
            tls,
            tree,
            registry: PropertyRegistry::default(),
            events: EventBus::default(),
            plugins: vec![],
            namespaces: NamespaceMap::default(),
            protected: PROTECTED_PROPERTIES.iter().map(|n| QName::dav(*n)).collect(),
        })
    }

    // --- setup-time mutation, before `run` ---

    pub fn add_plugin(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), DavError> {
        tracing::debug!(plugin = plugin.name(), "registering plugin");
        plugin.clone().register(self)?;
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn subscribe(&mut self, kind: EventKind, subscriber: Arc<dyn Subscriber>) {
        self.events.subscribe(kind, subscriber);
    }

    pub fn add_namespace(&mut self, uri: impl Into<String>, prefix: impl Into<String>) {
        self.namespaces.add(uri, prefix);
    }

    pub fn protect_property(&mut self, name: QName) {
        if !self.protected.contains(&name) {
            self.protected.push(name);
        }
    }

    pub fn registry_mut(&mut self) -> &mut PropertyRegistry {
        &mut self.registry
    }

    // --- read-only request-time state ---

    pub fn tree(&self) -> &dyn DavTree {
        self.tree.as_ref()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &PropertyRegistry {
        &self.registry
    }

    pub fn namespaces(&self) -> &NamespaceMap {
        &self.namespaces
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub fn is_protected(&self, name: &QName) -> bool {
        self.protected.contains(name)
    }

    // --- the accept loop ---

    /// Serve until `must_exit` flips to true, then drain whatever is
    /// still in flight. The TLS handshake runs on the connection task so
    /// a slow client cannot stall the listener.
    pub async fn run(self, mut must_exit: watch::Receiver<bool>) -> Result<()> {
        let server = Arc::new(self);
        let listener = TcpListener::bind(server.bind_addr).await?;
        tracing::info!("DAV server listening on {}", server.bind_addr);

        let mut connections = JoinSet::new();
        loop {
            if *must_exit.borrow() {
                break;
            }
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = must_exit.changed() => continue,
            };
            let (socket, remote_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(err=?e, "accept failed");
                    continue;
                }
            };
            tracing::debug!(%remote_addr, "accepted connection");

            let server = server.clone();
            connections.spawn(async move {
                let served = match &server.tls {
                    Some(acceptor) => match acceptor.accept(socket).await {
                        Ok(tls_stream) => serve(&server, TokioIo::new(tls_stream)).await,
                        Err(e) => {
                            tracing::warn!(err=?e, "TLS handshake failed");
                            return;
                        }
                    },
                    None => serve(&server, TokioIo::new(socket)).await,
                };
                if let Err(e) = served {
                    tracing::warn!(err=?e, "connection failed");
                }
            });

            // reap finished connections without blocking the listener
            while connections.try_join_next().is_some() {}
        }

        drop(listener);
        tracing::info!(open = connections.len(), "draining connections before shutdown");
        while connections.join_next().await.is_some() {}

        Ok(())
    }
}

async fn serve<S>(server: &Arc<Server>, io: S) -> hyper::Result<()>
where
    S: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
        let server = server.clone();
        async move { Ok::<_, Infallible>(dispatch(&server, req).await) }
    });
    http1::Builder::new().serve_connection(io, service).await
}
