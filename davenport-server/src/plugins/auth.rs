use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use hyper::Response;

use crate::codec::text_body;
use crate::error::DavError;
use crate::events::{Event, EventKind, Flow, Subscriber};
use crate::plugin::Plugin;
use crate::server::Server;

/// HTTP Basic authentication as a `beforeMethod` subscriber.
///
/// Requests without acceptable credentials are vetoed with a 401
/// challenge; everything else proceeds untouched. The credential check
/// itself is caller-supplied.
pub struct BasicAuth {
    realm: String,
    verify: Box<dyn Fn(&str, &str) -> bool + Send + Sync>,
}

impl BasicAuth {
    pub fn new(
        realm: impl Into<String>,
        verify: impl Fn(&str, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            realm: realm.into(),
            verify: Box::new(verify),
        }
    }

    fn challenge(&self, message: &'static str) -> Flow {
        let response = Response::builder()
            .status(401)
            .header(
                "WWW-Authenticate",
                format!("Basic realm=\"{}\"", self.realm),
            )
            .body(text_body(message))
            .ok();
        Flow::Veto(response)
    }

    /// Pull the username/password pair out of an Authorization header.
    fn credentials(raw: &str) -> Option<(String, String)> {
        let b64 = match raw.split_once(' ') {
            Some(("Basic", b64)) => b64,
            _ => return None,
        };
        // authorization is theoretically padded, but be liberal in what
        // you accept
        let cleaned = b64.trim().trim_end_matches('=');
        let decoded = base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(cleaned)
            .ok()?;
        let text = std::str::from_utf8(&decoded).ok()?;
        let (username, password) = text.split_once(':')?;
        Some((username.to_string(), password.to_string()))
    }
}

impl Plugin for BasicAuth {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn register(self: Arc<Self>, server: &mut Server) -> Result<(), DavError> {
        server.subscribe(EventKind::BeforeMethod, self);
        Ok(())
    }
}

#[async_trait]
impl Subscriber for BasicAuth {
    async fn notify(&self, event: &mut Event<'_>) -> Result<Flow, DavError> {
        let headers = match event {
            Event::BeforeMethod { headers, .. } => headers,
            _ => return Ok(Flow::Continue),
        };

        let raw = match headers.get(http::header::AUTHORIZATION) {
            Some(value) => match value.to_str() {
                Ok(raw) => raw,
                Err(_) => return Ok(self.challenge("Malformed Authorization header")),
            },
            None => {
                tracing::info!("missing authorization header");
                return Ok(self.challenge("Missing Authorization header"));
            }
        };

        match Self::credentials(raw) {
            Some((username, password)) if (self.verify)(&username, &password) => {
                Ok(Flow::Continue)
            }
            Some((username, _)) => {
                tracing::info!(user = %username, "wrong credentials");
                Ok(self.challenge("Wrong credentials"))
            }
            None => Ok(self.challenge("Unsupported Authorization header")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_credentials() {
        // "ada:secret"
        let raw = "Basic YWRhOnNlY3JldA==";
        assert_eq!(
            BasicAuth::credentials(raw),
            Some(("ada".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(BasicAuth::credentials("Bearer abc"), None);
        assert_eq!(BasicAuth::credentials("garbage"), None);
    }
}
