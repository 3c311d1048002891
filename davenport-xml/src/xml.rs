use std::future::Future;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use tokio::io::{AsyncBufRead, AsyncWrite};

use super::error::ParsingError;

// Constants
pub const DAV_URN: &str = "DAV:";
pub const VENDOR_URN: &str = "http://davenport.rs/ns";

// Async traits
pub trait IWrite: AsyncWrite + Unpin + Send {}
impl<T: AsyncWrite + Unpin + Send> IWrite for T {}
pub trait IRead: AsyncBufRead + Unpin + Send {}
impl<T: AsyncBufRead + Unpin + Send> IRead for T {}

// Serialization/Deserialization traits
pub trait QWrite {
    fn qwrite(
        &self,
        xml: &mut Writer<impl IWrite>,
    ) -> impl Future<Output = Result<(), quick_xml::Error>> + Send;
}
pub trait QRead<T> {
    fn qread(xml: &mut Reader<impl IRead>) -> impl Future<Output = Result<T, ParsingError>> + Send;
}

// The representation of an XML node in Rust
pub trait Node<T>: QRead<T> + std::fmt::Debug + PartialEq + Clone + Sync {}
impl<T, U> Node<T> for U where U: QRead<T> + std::fmt::Debug + PartialEq + Clone + Sync {}

// ---------------

/// An expanded XML name, rendered in Clark notation: `{namespace-uri}local-name`.
///
/// Property names, resource types and report names all travel through the
/// server in this form, so prefix choices made by clients never leak past
/// the parser.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub ns: String,
    pub local: String,
}

impl QName {
    pub fn new(ns: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            local: local.into(),
        }
    }

    /// A name in the `DAV:` namespace.
    pub fn dav(local: impl Into<String>) -> Self {
        Self::new(DAV_URN, local)
    }

    pub fn is_dav(&self, local: &str) -> bool {
        self.ns == DAV_URN && self.local == local
    }

    /// Parse `{namespace-uri}local-name`. A name without braces belongs to
    /// the empty namespace.
    pub fn from_clark(s: &str) -> Result<Self, ParsingError> {
        if let Some(rest) = s.strip_prefix('{') {
            match rest.split_once('}') {
                Some((ns, local)) if !local.is_empty() => Ok(Self::new(ns, local)),
                _ => Err(ParsingError::InvalidClarkNotation(s.to_string())),
            }
        } else if s.is_empty() || s.contains('}') {
            Err(ParsingError::InvalidClarkNotation(s.to_string()))
        } else {
            Ok(Self::new("", s))
        }
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ns.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.ns, self.local)
        }
    }
}

/// Namespace-URI to prefix assignments used by the writer.
///
/// The default map binds `DAV:` to `d` and the vendor namespace to `a`;
/// servers may register more pairs before they start serving. Names in a
/// namespace with no assigned prefix are emitted with an inline
/// `xmlns:custom` declaration.
#[derive(Debug, Clone)]
pub struct NamespaceMap {
    pairs: Vec<(String, String)>,
}

impl Default for NamespaceMap {
    fn default() -> Self {
        Self {
            pairs: vec![
                (DAV_URN.to_string(), "d".to_string()),
                (VENDOR_URN.to_string(), "a".to_string()),
            ],
        }
    }
}

impl NamespaceMap {
    pub fn add(&mut self, uri: impl Into<String>, prefix: impl Into<String>) {
        self.pairs.push((uri.into(), prefix.into()));
    }

    pub fn prefix_of(&self, uri: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(u, _)| u == uri)
            .map(|(_, p)| p.as_str())
    }

    /// The `xmlns:*` attributes declaring every assigned prefix.
    pub fn xmlns_attrs(&self) -> Vec<(String, String)> {
        self.pairs
            .iter()
            .map(|(uri, prefix)| (format!("xmlns:{}", prefix), uri.clone()))
            .collect()
    }
}

/// Transform a Rust object into an XML stream of characters
pub struct Writer<T: IWrite> {
    pub q: quick_xml::writer::Writer<T>,
    pending_xmlns: Vec<(String, String)>,
    prefixes: NamespaceMap,
}

impl<T: IWrite> Writer<T> {
    pub fn new(q: quick_xml::writer::Writer<T>, ns: &NamespaceMap) -> Self {
        Self {
            q,
            pending_xmlns: ns.xmlns_attrs(),
            prefixes: ns.clone(),
        }
    }

    pub fn create_dav_element(&mut self, name: &str) -> BytesStart<'static> {
        self.stamp(BytesStart::new(format!("d:{}", name)))
    }

    pub fn create_vendor_element(&mut self, name: &str) -> BytesStart<'static> {
        self.stamp(BytesStart::new(format!("a:{}", name)))
    }

    /// Create an element for an arbitrary expanded name, consulting the
    /// prefix map. Unknown namespaces get a local `xmlns:custom` binding.
    pub fn create_element(&mut self, name: &QName) -> BytesStart<'static> {
        let start = match self.prefixes.prefix_of(&name.ns) {
            Some(prefix) => BytesStart::new(format!("{}:{}", prefix, name.local)),
            None if name.ns.is_empty() => BytesStart::new(name.local.clone()),
            None => {
                let mut start = BytesStart::new(format!("custom:{}", name.local));
                start.push_attribute(("xmlns:custom", name.ns.as_str()));
                start
            }
        };
        self.stamp(start)
    }

    /// The first element of a document carries the xmlns declarations.
    fn stamp(&mut self, mut start: BytesStart<'static>) -> BytesStart<'static> {
        for (attr, uri) in self.pending_xmlns.drain(..) {
            start.push_attribute((attr.as_str(), uri.as_str()));
        }
        start
    }
}

/// What the reader pushed when an element was opened. A self-closed
/// element has no content and its single event is only consumed on
/// `close`.
enum Scope {
    Open,
    Empty,
}

/// Transform an XML stream of characters into a Rust object.
///
/// The reader keeps one event of lookahead and a stack of opened scopes.
/// Parsers inspect the lookahead (`peek_qname`, `peek_attributes`), enter
/// elements with `open`/`open_any`, pull text with `text`, and leave with
/// `close`; anything they do not understand is dropped with `skip`. A
/// failed `open` is recoverable, so alternatives can be probed in
/// sequence.
pub struct Reader<T: IRead> {
    src: NsReader<T>,
    lookahead: Event<'static>,
    stack: Vec<Scope>,
    scratch: Vec<u8>,
}

impl<T: IRead> Reader<T> {
    pub async fn new(mut src: NsReader<T>) -> Result<Self, ParsingError> {
        let mut scratch = Vec::new();
        let lookahead = src.read_event_into_async(&mut scratch).await?.into_owned();
        scratch.clear();
        Ok(Self {
            src,
            lookahead,
            stack: Vec::new(),
            scratch,
        })
    }

    /// Replace the lookahead with the next event from the stream.
    async fn advance(&mut self) -> Result<(), ParsingError> {
        let next = self
            .src
            .read_event_into_async(&mut self.scratch)
            .await?
            .into_owned();
        self.scratch.clear();
        self.lookahead = next;
        Ok(())
    }

    pub fn peek(&self) -> &Event<'static> {
        &self.lookahead
    }

    /// Whether the current scope can still hold events. Self-closed
    /// elements have no content; the document root always does.
    pub fn has_content(&self) -> bool {
        !matches!(self.stack.last(), Some(Scope::Empty))
    }

    /// The expanded name of the element the reader is positioned on.
    pub fn peek_qname(&self) -> Option<QName> {
        let raw = match &self.lookahead {
            Event::Start(tag) | Event::Empty(tag) => tag.name(),
            _ => return None,
        };
        let (resolved, local) = self.src.resolve_element(raw);
        let local = String::from_utf8_lossy(local.into_inner()).into_owned();
        let ns = match resolved {
            ResolveResult::Bound(uri) => String::from_utf8_lossy(uri.into_inner()).into_owned(),
            ResolveResult::Unbound => String::new(),
            ResolveResult::Unknown(prefix) => String::from_utf8_lossy(&prefix).into_owned(),
        };
        Some(QName::new(ns, local))
    }

    /// Non-namespace attributes of the element the reader is positioned on.
    pub fn peek_attributes(&self) -> Result<Vec<(String, String)>, ParsingError> {
        let tag = match &self.lookahead {
            Event::Start(tag) | Event::Empty(tag) => tag,
            _ => return Ok(vec![]),
        };
        let mut found = vec![];
        for attr in tag.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let value = attr
                .decode_and_unescape_value(&self.src)
                .map_err(ParsingError::from)?
                .into_owned();
            found.push((key, value));
        }
        Ok(found)
    }

    fn at(&self, ns: &str, local: &str) -> bool {
        self.peek_qname()
            .map_or(false, |name| name.ns == ns && name.local == local)
    }

    /// Enter the element the reader is positioned on, whatever its name.
    pub async fn open_any(&mut self) -> Result<(), ParsingError> {
        match &self.lookahead {
            Event::Start(_) => {
                self.stack.push(Scope::Open);
                self.advance().await
            }
            Event::Empty(_) => {
                self.stack.push(Scope::Empty);
                Ok(())
            }
            _ => Err(ParsingError::Recoverable),
        }
    }

    /// Enter the element with the given expanded name, or recover.
    pub async fn open(&mut self, ns: &str, local: &str) -> Result<(), ParsingError> {
        if !self.has_content() || !self.at(ns, local) {
            return Err(ParsingError::Recoverable);
        }
        self.open_any().await
    }

    pub async fn maybe_open(&mut self, ns: &str, local: &str) -> Result<bool, ParsingError> {
        match self.open(ns, local).await {
            Ok(()) => Ok(true),
            Err(ParsingError::Recoverable) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drop the event under the lookahead, subtree and all.
    pub async fn skip(&mut self) -> Result<(), ParsingError> {
        let subtree_end = match &self.lookahead {
            Event::Start(tag) => Some(tag.to_end().into_owned()),
            Event::End(_) => return Err(ParsingError::WrongToken),
            Event::Eof => return Err(ParsingError::Eof),
            _ => None,
        };
        if let Some(end) = subtree_end {
            self.src
                .read_to_end_into_async(end.name(), &mut self.scratch)
                .await?;
        }
        self.advance().await
    }

    /// Accumulated character data up to the next element boundary.
    pub async fn text(&mut self) -> Result<String, ParsingError> {
        let mut out = String::new();
        loop {
            let boundary = match &self.lookahead {
                Event::Text(escaped) => {
                    out.push_str(escaped.unescape()?.as_ref());
                    false
                }
                Event::CData(raw) => {
                    out.push_str(std::str::from_utf8(raw.as_ref())?);
                    false
                }
                Event::Start(_) | Event::Empty(_) | Event::End(_) => true,
                Event::Eof => return Err(ParsingError::Eof),
                _ => false,
            };
            if boundary {
                return Ok(out);
            }
            self.advance().await?;
        }
    }

    /// Scan forward at the current level until `N` parses.
    pub async fn find<N: Node<N>>(&mut self) -> Result<N, ParsingError> {
        if !self.has_content() {
            return Err(ParsingError::Recoverable);
        }
        loop {
            match N::qread(self).await {
                Err(ParsingError::Recoverable) => self.skip().await?,
                outcome => return outcome,
            }
        }
    }

    /// Leave the innermost open element, dropping whatever was not read.
    pub async fn close(&mut self) -> Result<(), ParsingError> {
        match self.stack.pop() {
            // consume the self-closed tag itself
            Some(Scope::Empty) => self.advance().await,
            Some(Scope::Open) => loop {
                match &self.lookahead {
                    Event::End(_) => return self.advance().await,
                    Event::Eof => return Err(ParsingError::Eof),
                    _ => self.skip().await?,
                }
            },
            None => Err(ParsingError::WrongToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clark_roundtrip() {
        let name = QName::from_clark("{DAV:}resourcetype").unwrap();
        assert_eq!(name, QName::dav("resourcetype"));
        assert_eq!(name.to_string(), "{DAV:}resourcetype");

        let bare = QName::from_clark("displayname").unwrap();
        assert_eq!(bare.ns, "");
        assert_eq!(bare.to_string(), "displayname");
    }

    #[test]
    fn clark_rejects_malformed() {
        assert!(QName::from_clark("{DAV:resourcetype").is_err());
        assert!(QName::from_clark("{DAV:}").is_err());
        assert!(QName::from_clark("").is_err());
    }

    #[test]
    fn namespace_map_defaults() {
        let ns = NamespaceMap::default();
        assert_eq!(ns.prefix_of(DAV_URN), Some("d"));
        assert_eq!(ns.prefix_of(VENDOR_URN), Some("a"));
        assert_eq!(ns.prefix_of("urn:example"), None);
    }

    #[tokio::test]
    async fn reader_walks_nested_scopes() {
        let src =
            r#"<?xml version="1.0"?><D:a xmlns:D="DAV:"><D:b>text</D:b><D:c/><ignored><deep/></ignored></D:a>"#;

        let mut rdr = Reader::new(NsReader::from_reader(src.as_bytes()))
            .await
            .unwrap();
        // the declaration is not an element
        assert!(rdr.open(DAV_URN, "a").await.is_err());
        rdr.skip().await.unwrap();

        rdr.open(DAV_URN, "a").await.unwrap();
        assert!(!rdr.maybe_open(DAV_URN, "nope").await.unwrap());
        assert!(rdr.maybe_open(DAV_URN, "b").await.unwrap());
        assert_eq!(rdr.text().await.unwrap(), "text");
        rdr.close().await.unwrap();

        // self-closed elements have no content
        rdr.open(DAV_URN, "c").await.unwrap();
        assert!(!rdr.has_content());
        rdr.close().await.unwrap();

        // close() drops the unread vendor subtree
        rdr.close().await.unwrap();
        assert!(matches!(rdr.peek(), Event::Eof));
    }
}
