use futures::future::{BoxFuture, FutureExt};
use quick_xml::events::{BytesText, Event};

use super::error::ParsingError;
use super::xml::{IRead, IWrite, QName, QRead, QWrite, Reader, Writer};

/// A parsed XML element with resolved names.
///
/// Request bodies whose vocabulary is open-ended (PROPPATCH and MKCOL
/// property values, REPORT bodies handed to plugins) are parsed into this
/// tree instead of a closed set of types. Prefixes are resolved during the
/// parse, so consumers only ever see expanded names.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: QName,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: vec![],
            children: vec![],
            text: String::new(),
        }
    }

    pub fn with_text(name: QName, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::new(name)
        }
    }

    pub fn child(&self, name: &QName) -> Option<&Element> {
        self.children.iter().find(|c| &c.name == name)
    }

    pub fn dav_child(&self, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name.is_dav(local))
    }

    /// Expanded names of the direct child elements, in document order.
    pub fn child_names(&self) -> Vec<QName> {
        self.children.iter().map(|c| c.name.clone()).collect()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

impl QRead<Element> for Element {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Element, ParsingError> {
        parse_element(xml).await
    }
}

fn parse_element<'a, R: IRead>(
    xml: &'a mut Reader<R>,
) -> BoxFuture<'a, Result<Element, ParsingError>> {
    async move {
        let name = match xml.peek_qname() {
            Some(name) => name,
            None => return Err(ParsingError::Recoverable),
        };
        let attributes = xml.peek_attributes()?;
        xml.open_any().await?;

        let mut element = Element {
            name,
            attributes,
            children: vec![],
            text: String::new(),
        };

        if xml.has_content() {
            loop {
                match xml.peek() {
                    Event::Start(_) | Event::Empty(_) => {
                        let child = parse_element(xml).await?;
                        element.children.push(child);
                    }
                    Event::End(_) => break,
                    Event::Eof => return Err(ParsingError::Eof),
                    _ => {
                        let chunk = xml.text().await?;
                        element.text.push_str(&chunk);
                    }
                }
            }
        }
        xml.close().await?;

        // Indentation between child elements is not content
        if !element.children.is_empty() && element.text.trim().is_empty() {
            element.text.clear();
        }

        Ok(element)
    }
    .boxed()
}

impl QWrite for Element {
    async fn qwrite(
        &self,
        xml: &mut Writer<impl IWrite>,
    ) -> Result<(), quick_xml::Error> {
        write_element(self, xml).await
    }
}

fn write_element<'a, W: IWrite>(
    element: &'a Element,
    xml: &'a mut Writer<W>,
) -> BoxFuture<'a, Result<(), quick_xml::Error>> {
    async move {
        let mut start = xml.create_element(&element.name);
        for (k, v) in &element.attributes {
            start.push_attribute((k.as_str(), v.as_str()));
        }

        if element.children.is_empty() && element.text.is_empty() {
            return xml.q.write_event_async(Event::Empty(start)).await;
        }

        let end = start.to_end().into_owned();
        xml.q.write_event_async(Event::Start(start.clone())).await?;
        if !element.text.is_empty() {
            xml.q
                .write_event_async(Event::Text(BytesText::new(&element.text)))
                .await?;
        }
        for child in &element.children {
            write_element(child, xml).await?;
        }
        xml.q.write_event_async(Event::End(end)).await
    }
    .boxed()
}
