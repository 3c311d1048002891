use davenport_xml::error::ParsingError;
use davenport_xml::types::ErrorBody;
use davenport_xml::xml::QName;
use http::StatusCode;

/// Every failure the dispatcher can surface, tagged by kind.
///
/// The kind decides the HTTP status and the `<a:exception>` element of
/// the error document; individual kinds may additionally contribute
/// response headers and an RFC 4918 condition element.
#[derive(Debug, thiserror::Error)]
pub enum DavError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    MethodNotAllowed(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error("{0}")]
    RangeNotSatisfiable(String),
    #[error("{message}")]
    Locked {
        message: String,
        lock_token: Option<String>,
    },
    #[error("{0}")]
    InvalidResourceType(String),
    #[error("{0}")]
    ReportNotImplemented(String),
    #[error("{0}")]
    NotImplemented(String),
    #[error("{0}")]
    InsufficientStorage(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl DavError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Locked { .. } => StatusCode::LOCKED,
            Self::InvalidResourceType(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ReportNotImplemented(_) | Self::NotImplemented(_) => {
                StatusCode::NOT_IMPLEMENTED
            }
            Self::InsufficientStorage(_) => StatusCode::INSUFFICIENT_STORAGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The exception name written into the error document.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BadRequest",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "NotFound",
            Self::MethodNotAllowed(_) => "MethodNotAllowed",
            Self::Conflict(_) => "Conflict",
            Self::PreconditionFailed(_) => "PreconditionFailed",
            Self::UnsupportedMediaType(_) => "UnsupportedMediaType",
            Self::RangeNotSatisfiable(_) => "RequestedRangeNotSatisfiable",
            Self::Locked { .. } => "Locked",
            Self::InvalidResourceType(_) => "InvalidResourceType",
            Self::ReportNotImplemented(_) => "ReportNotImplemented",
            Self::NotImplemented(_) => "NotImplemented",
            Self::InsufficientStorage(_) => "InsufficientStorage",
            Self::Internal(_) => "ServerError",
        }
    }

    /// Headers this error contributes to the response.
    pub fn extra_headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Locked {
                lock_token: Some(token),
                ..
            } => vec![("Lock-Token", format!("<{}>", token))],
            _ => vec![],
        }
    }

    /// Optional RFC 4918 / RFC 5689 condition element for the error
    /// document.
    pub fn condition(&self) -> Option<QName> {
        match self {
            Self::Locked { .. } => Some(QName::dav("lock-token-submitted")),
            Self::InvalidResourceType(_) => Some(QName::dav("valid-resourcetype")),
            _ => None,
        }
    }

    pub fn into_body(&self, version: &str) -> ErrorBody {
        ErrorBody {
            exception: self.kind().to_string(),
            message: self.to_string(),
            condition: self.condition(),
            file: None,
            line: None,
            version: version.to_string(),
        }
    }
}

impl From<std::io::Error> for DavError {
    fn from(value: std::io::Error) -> Self {
        Self::Internal(value.into())
    }
}

impl From<ParsingError> for DavError {
    fn from(value: ParsingError) -> Self {
        Self::BadRequest(format!("unparsable request body: {}", value))
    }
}
