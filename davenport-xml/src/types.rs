use super::element::Element;
use super::values::PropValue;
use super::xml::QName;

/// 14.4 depth XML Element / 10.2 Depth header
///
/// Value:   "0" | "1" | "infinity"
///
/// `Infinity` is a distinguished sentinel, never a number.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

/// 14.7.  href XML Element
///
/// Name:   href
///
/// Purpose:   MUST contain a URI or a relative reference.
///
/// <!ELEMENT href (#PCDATA)>
#[derive(Debug, PartialEq, Clone)]
pub struct Href(pub String);

/// 14.28.  status XML Element
///
/// Name:   status
///
/// Purpose:   Holds a single HTTP status-line.
///
/// <!ELEMENT status (#PCDATA) >
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Status(pub http::StatusCode);

/// 14.16.  multistatus XML Element
///
/// Name:   multistatus
///
/// Purpose:   Contains multiple response messages.
///
/// <!ELEMENT multistatus (response*, responsedescription?)  >
#[derive(Debug, PartialEq, Clone)]
pub struct Multistatus {
    pub responses: Vec<MsResponse>,
}

/// 14.24.  response XML Element
///
/// Holds a single response describing the effect of a method on a
/// resource and/or its properties.
#[derive(Debug, PartialEq, Clone)]
pub struct MsResponse {
    pub href: Href,
    pub body: MsBody,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MsBody {
    /// `(href*, status)` form — one verdict for whole resources.
    Status(Status),
    /// `(href, propstat+)` form — per-property verdicts.
    PropStat(Vec<PropStat>),
}

/// 14.22.  propstat XML Element
///
/// Groups properties sharing one status. A propstat with an empty
/// property list is never serialized.
#[derive(Debug, PartialEq, Clone)]
pub struct PropStat {
    pub status: Status,
    /// `None` values render as empty property elements (name-only form,
    /// used for 404 buckets and propname answers).
    pub props: Vec<(QName, Option<PropValue>)>,
}

/// 14.20.  propfind XML Element
///
/// <!ELEMENT propfind ( propname | (allprop, include?) | prop ) >
///
/// An empty request body is an `AllProp` by decision of the caller, not
/// of this parser.
#[derive(Debug, PartialEq, Clone)]
pub enum PropFind {
    PropName,
    AllProp(Vec<QName>),
    Prop(Vec<QName>),
}

/// 14.19.  propertyupdate XML Element
///
/// <!ELEMENT propertyupdate (remove | set)+ >
///
/// Flattened into one ordered operation list; document order is preserved
/// because PROPPATCH processing is order-sensitive.
#[derive(Debug, PartialEq, Clone)]
pub struct PropertyUpdate(pub Vec<PropPatch>);

#[derive(Debug, PartialEq, Clone)]
pub struct PropPatch {
    pub name: QName,
    /// `Some` to set, `None` to remove.
    pub value: Option<PropValue>,
}

/// RFC 5689 extended MKCOL request body.
///
/// <!ELEMENT mkcol (set+)>
#[derive(Debug, PartialEq, Clone)]
pub struct Mkcol {
    pub resource_types: Vec<QName>,
    pub properties: Vec<(QName, PropValue)>,
}

/// A REPORT request. The root element's expanded name identifies the
/// report; the body is handed to whichever plugin claims it.
#[derive(Debug, PartialEq, Clone)]
pub struct Report {
    pub root: Element,
}

impl Report {
    pub fn name(&self) -> &QName {
        &self.root.name
    }
}

/// 14.5 error XML Element, extended with the vendor diagnostics the
/// server attaches to every failure: exception kind, message, optional
/// source position, server version.
#[derive(Debug, PartialEq, Clone)]
pub struct ErrorBody {
    pub exception: String,
    pub message: String,
    /// Optional RFC 4918 condition code rendered as an empty DAV: element.
    pub condition: Option<QName>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub version: String,
}

impl Multistatus {
    pub fn new(responses: Vec<MsResponse>) -> Self {
        Self { responses }
    }
}
