//! HTTP signaling over a single relay URL.

use crate::signaling::{SignalingEnvelope, SignalingTransport};
use crate::utils::{ConfigError, Result, SignalingConfig, SignalingError};
use async_trait::async_trait;
use url::Url;

/// Longest relay error body kept in a [`SignalingError`]
const MAX_ERROR_BODY: usize = 512;

/// Signaling transport that POSTs JSON envelopes to one relay endpoint
///
/// Holds a single [`reqwest::Client`] for its whole lifetime; each call
/// checks a connection out of the client's pool and returns it when the
/// response body has been read.
#[derive(Debug, Clone)]
pub struct HttpSignaling {
    client: reqwest::Client,
    url: Url,
}

impl HttpSignaling {
    /// Build a transport from configuration
    pub fn new(config: &SignalingConfig) -> Result<Self> {
        let url = Url::parse(&config.url).map_err(|e| ConfigError::InvalidValue {
            field: "signaling.url".to_string(),
            value: format!("{} ({})", config.url, e),
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .timeout(config.request_timeout())
            .user_agent(concat!("p2p-courier/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SignalingError::from)?;

        Ok(Self { client, url })
    }

    /// Relay endpoint
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl SignalingTransport for HttpSignaling {
    async fn post_envelope(
        &self,
        envelope: &SignalingEnvelope,
        credential: Option<&str>,
    ) -> Result<Option<SignalingEnvelope>> {
        log::debug!("POST {} ({})", self.url, envelope.kind());

        let mut request = self.client.post(self.url.clone()).json(envelope);
        if let Some(token) = credential {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(SignalingError::from)?;
        let status = response.status();
        let body = response.text().await.map_err(SignalingError::from)?;

        if !status.is_success() {
            return Err(SignalingError::Http {
                status: status.as_u16(),
                body: truncate(body),
            }
            .into());
        }

        Ok(parse_reply(&body))
    }
}

/// Interpret a success body
///
/// Relays either answer with a JSON envelope or, for the offer, with the
/// bare SDP text of the answer.
pub fn parse_reply(body: &str) -> Option<SignalingEnvelope> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    match serde_json::from_str::<SignalingEnvelope>(body) {
        Ok(envelope) => Some(envelope),
        Err(_) if body.starts_with("v=") => Some(SignalingEnvelope::answer(body)),
        Err(e) => {
            log::debug!("Relay reply is not an envelope: {}", e);
            None
        }
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
