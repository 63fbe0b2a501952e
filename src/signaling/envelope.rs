//! Signaling wire format.
//!
//! The relay speaks plain JSON objects; the shape of the object identifies
//! the message, so envelopes are untagged on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a session description
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Local offer
    Offer,
    /// Remote answer; assumed when a relay reply omits the type
    #[default]
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
        }
    }
}

/// ICE candidate in the browser `RTCIceCandidateInit` JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

/// Every message exchanged with the signaling relay
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalingEnvelope {
    /// `{username, password}`; always the first request of a session
    AuthRequest {
        /// Relay account name
        username: String,
        /// Relay account password
        password: String,
    },
    /// `{sdp, type}`; the offer we post, or the answer the relay returns
    SessionDescription {
        /// Raw SDP text
        sdp: String,
        /// Offer or answer
        #[serde(rename = "type", default)]
        sdp_type: SdpType,
    },
    /// `{ice: {...}}`; a trickled local candidate
    IceCandidate {
        /// The candidate
        ice: IceCandidate,
    },
    /// `{token}`; relay reply to a successful [`SignalingEnvelope::AuthRequest`]
    ///
    /// Kept last: untagged variants are tried in order and any object with a
    /// `token` field matches this one.
    AuthGranted {
        /// Bearer credential for the rest of the session
        token: String,
    },
}

impl SignalingEnvelope {
    /// Authentication request
    pub fn auth(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::AuthRequest {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Local offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::SessionDescription {
            sdp: sdp.into(),
            sdp_type: SdpType::Offer,
        }
    }

    /// Remote answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::SessionDescription {
            sdp: sdp.into(),
            sdp_type: SdpType::Answer,
        }
    }

    /// Candidate notification
    pub fn ice(candidate: IceCandidate) -> Self {
        Self::IceCandidate { ice: candidate }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthRequest { .. } => "auth",
            Self::AuthGranted { .. } => "auth-granted",
            Self::SessionDescription {
                sdp_type: SdpType::Offer,
                ..
            } => "offer",
            Self::SessionDescription { .. } => "answer",
            Self::IceCandidate { .. } => "ice",
        }
    }
}

// Credentials stay out of logs.
impl fmt::Debug for SignalingEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthRequest { username, .. } => f
                .debug_struct("AuthRequest")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::AuthGranted { .. } => f
                .debug_struct("AuthGranted")
                .field("token", &"<redacted>")
                .finish(),
            Self::SessionDescription { sdp, sdp_type } => f
                .debug_struct("SessionDescription")
                .field("sdp_type", sdp_type)
                .field("sdp_len", &sdp.len())
                .finish(),
            Self::IceCandidate { ice } => f.debug_struct("IceCandidate").field("ice", ice).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host_candidate() -> IceCandidate {
        IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.168.1.5 54321 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn test_wire_shapes() {
        assert_eq!(
            serde_json::to_value(SignalingEnvelope::auth("alice", "hunter2")).unwrap(),
            json!({"username": "alice", "password": "hunter2"})
        );
        assert_eq!(
            serde_json::to_value(SignalingEnvelope::offer("v=0")).unwrap(),
            json!({"sdp": "v=0", "type": "offer"})
        );
        assert_eq!(
            serde_json::to_value(SignalingEnvelope::ice(host_candidate())).unwrap(),
            json!({"ice": {
                "candidate": "candidate:1 1 udp 2130706431 192.168.1.5 54321 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            }})
        );
    }

    #[test]
    fn test_envelopes_round_trip() {
        let mut with_ufrag = host_candidate();
        with_ufrag.username_fragment = Some("abcd".to_string());
        let envelopes = [
            SignalingEnvelope::auth("alice", "hunter2"),
            SignalingEnvelope::AuthGranted {
                token: "t0k3n".to_string(),
            },
            SignalingEnvelope::offer("v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n"),
            SignalingEnvelope::answer("v=0\r\n"),
            SignalingEnvelope::ice(host_candidate()),
            SignalingEnvelope::ice(with_ufrag),
        ];

        for envelope in envelopes {
            let text = serde_json::to_string(&envelope).unwrap();
            let parsed: SignalingEnvelope = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed, envelope, "round trip of {}", envelope.kind());
        }
    }

    #[test]
    fn test_answer_type_defaults_when_omitted() {
        let parsed: SignalingEnvelope = serde_json::from_str(r#"{"sdp": "v=0"}"#).unwrap();
        assert_eq!(parsed, SignalingEnvelope::answer("v=0"));
    }

    #[test]
    fn test_answer_with_extra_token_field_is_an_answer() {
        let parsed: SignalingEnvelope = serde_json::from_str(
            r#"{"sdp": "v=0", "type": "answer", "token": "abc"}"#,
        )
        .unwrap();
        assert_eq!(parsed, SignalingEnvelope::answer("v=0"));

        let granted: SignalingEnvelope = serde_json::from_str(r#"{"token": "abc"}"#).unwrap();
        assert_eq!(granted.kind(), "auth-granted");
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let rendered = format!("{:?}", SignalingEnvelope::auth("alice", "hunter2"));
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }
}
