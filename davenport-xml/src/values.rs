use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::element::Element;
use super::error::ParsingError;
use super::types::MsResponse;
use super::xml::QName;

/// A typed WebDAV property value.
///
/// Scalar kinds cover the common live properties; `Xml` carries any
/// structured value the server does not model, preserved verbatim so dead
/// properties round-trip through PROPPATCH and PROPFIND.
#[derive(Debug, PartialEq, Clone)]
pub enum PropValue {
    Text(String),
    Int(i64),
    /// Serialized in RFC 1123 form (`Tue, 15 Nov 1994 08:12:31 GMT`).
    Date(DateTime<Utc>),
    Href(String),
    /// `{DAV:}resourcetype`: the expanded names of the type elements.
    ResourceType(Vec<QName>),
    /// `{DAV:}supported-report-set`: the expanded names of the reports.
    SupportedReportSet(Vec<QName>),
    /// A nested multistatus response, used by principal-style plugins.
    Response(Box<MsResponse>),
    Xml(Element),
}

impl PropValue {
    /// Whether serializing this value produces no element content.
    pub fn is_empty_content(&self) -> bool {
        match self {
            Self::Text(t) => t.is_empty(),
            Self::ResourceType(t) => t.is_empty(),
            Self::SupportedReportSet(r) => r.is_empty(),
            Self::Xml(el) => el.children.is_empty() && el.text.is_empty(),
            _ => false,
        }
    }

    /// The fallback conversion for elements with no registered factory.
    pub fn from_element(element: &Element) -> Self {
        if element.is_leaf() {
            return Self::Text(element.text.clone());
        }
        match element.children.as_slice() {
            [only] if only.name.is_dav("href") && only.is_leaf() => {
                Self::Href(only.text.trim().to_string())
            }
            _ => Self::Xml(element.clone()),
        }
    }
}

pub fn format_http_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

pub type ValueFactory = fn(&Element) -> Result<PropValue, ParsingError>;

/// Maps property names to value parsers.
///
/// Consulted when PROPPATCH and MKCOL bodies are converted into property
/// values; names without a factory fall back to
/// [`PropValue::from_element`]. Frozen once the server starts serving.
pub struct PropertyRegistry {
    factories: HashMap<QName, ValueFactory>,
}

impl Default for PropertyRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(QName::dav("resourcetype"), parse_resource_type);
        registry.register(QName::dav("getlastmodified"), parse_date);
        registry.register(QName::dav("supported-report-set"), parse_report_set);
        registry
    }
}

impl PropertyRegistry {
    pub fn register(&mut self, name: QName, factory: ValueFactory) {
        self.factories.insert(name, factory);
    }

    pub fn parse(&self, element: &Element) -> Result<PropValue, ParsingError> {
        match self.factories.get(&element.name) {
            Some(factory) => factory(element),
            None => Ok(PropValue::from_element(element)),
        }
    }
}

fn parse_resource_type(element: &Element) -> Result<PropValue, ParsingError> {
    Ok(PropValue::ResourceType(element.child_names()))
}

fn parse_date(element: &Element) -> Result<PropValue, ParsingError> {
    match parse_http_date(element.text.trim()) {
        Some(date) => Ok(PropValue::Date(date)),
        None => Err(ParsingError::InvalidValue),
    }
}

fn parse_report_set(element: &Element) -> Result<PropValue, ParsingError> {
    let mut reports = vec![];
    for supported in &element.children {
        if !supported.name.is_dav("supported-report") {
            continue;
        }
        for report in &supported.children {
            if report.name.is_dav("report") {
                reports.extend(report.child_names());
            }
        }
    }
    Ok(PropValue::SupportedReportSet(reports))
}
