use quick_xml::events::attributes::AttrError;

#[derive(Debug, thiserror::Error)]
pub enum ParsingError {
    /// The current element is not the one the caller hoped for.
    /// Callers trying alternatives catch this one and move on;
    /// every other variant aborts the parse.
    #[error("recoverable")]
    Recoverable,
    #[error("missing child")]
    MissingChild,
    #[error("missing attribute")]
    MissingAttribute,
    #[error("wrong token")]
    WrongToken,
    #[error("tag not found")]
    TagNotFound,
    #[error("invalid value")]
    InvalidValue,
    #[error("invalid Clark notation: {0}")]
    InvalidClarkNotation(String),
    #[error("utf8 error")]
    Utf8Error(#[from] std::str::Utf8Error),
    #[error("quick-xml error")]
    QuickXml(#[from] quick_xml::Error),
    #[error("date parsing error")]
    Chrono(#[from] chrono::format::ParseError),
    #[error("number parsing error")]
    Int(#[from] std::num::ParseIntError),
    #[error("found EOF while expecting data")]
    Eof,
}

impl From<AttrError> for ParsingError {
    fn from(value: AttrError) -> Self {
        Self::QuickXml(value.into())
    }
}
