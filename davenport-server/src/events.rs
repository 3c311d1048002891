use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;
use hyper::body::Bytes;

use davenport_xml::element::Element;
use davenport_xml::xml::QName;

use crate::codec::HttpResponse;
use crate::error::DavError;
use crate::props::PropfindEntry;

/// The events the core emits, with their payloads.
///
/// `before*` events guard an operation: a veto aborts it. `after*` events
/// report a finished mutation; their return values are ignored.
pub enum Event<'a> {
    BeforeMethod {
        method: &'a str,
        uri: &'a str,
        headers: &'a HeaderMap,
    },
    UnknownMethod {
        method: &'a str,
        uri: &'a str,
    },
    BeforeBind {
        uri: &'a str,
    },
    BeforeUnbind {
        uri: &'a str,
    },
    AfterBind {
        uri: &'a str,
    },
    BeforeCreateFile {
        uri: &'a str,
        data: &'a Bytes,
    },
    BeforeWriteContent {
        uri: &'a str,
    },
    /// Plugins may rewrite the gathered buckets before serialization.
    AfterGetProperties {
        path: &'a str,
        entry: &'a mut PropfindEntry,
    },
    Report {
        name: &'a QName,
        body: &'a Element,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BeforeMethod,
    UnknownMethod,
    BeforeBind,
    BeforeUnbind,
    AfterBind,
    BeforeCreateFile,
    BeforeWriteContent,
    AfterGetProperties,
    Report,
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::BeforeMethod { .. } => EventKind::BeforeMethod,
            Event::UnknownMethod { .. } => EventKind::UnknownMethod,
            Event::BeforeBind { .. } => EventKind::BeforeBind,
            Event::BeforeUnbind { .. } => EventKind::BeforeUnbind,
            Event::AfterBind { .. } => EventKind::AfterBind,
            Event::BeforeCreateFile { .. } => EventKind::BeforeCreateFile,
            Event::BeforeWriteContent { .. } => EventKind::BeforeWriteContent,
            Event::AfterGetProperties { .. } => EventKind::AfterGetProperties,
            Event::Report { .. } => EventKind::Report,
        }
    }
}

/// What a subscriber tells the emitter.
pub enum Flow {
    Continue,
    /// Stop here. Later subscribers do not run and the guarded operation
    /// must not happen. The subscriber may hand over the response it
    /// already composed.
    Veto(Option<HttpResponse>),
}

/// What an emit reports back to the handler.
pub enum Emit {
    Completed,
    Vetoed(Option<HttpResponse>),
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn notify(&self, event: &mut Event<'_>) -> Result<Flow, DavError>;
}

/// Named-event subscriptions, invoked synchronously in registration
/// order. Mutated during plugin registration only; requests never touch
/// the subscription map itself.
#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<EventKind, Vec<Arc<dyn Subscriber>>>,
}

impl EventBus {
    pub fn subscribe(&mut self, kind: EventKind, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.entry(kind).or_default().push(subscriber);
    }

    pub async fn emit(&self, event: &mut Event<'_>) -> Result<Emit, DavError> {
        let subscribers = match self.subscribers.get(&event.kind()) {
            Some(subscribers) => subscribers,
            None => return Ok(Emit::Completed),
        };
        for subscriber in subscribers {
            match subscriber.notify(event).await? {
                Flow::Continue => (),
                Flow::Veto(response) => return Ok(Emit::Vetoed(response)),
            }
        }
        Ok(Emit::Completed)
    }
}
