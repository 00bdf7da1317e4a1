//! Jingle session-control payloads.
//!
//! These types are the decoded form of `<jingle/>` elements. Encoding and
//! decoding to XML belongs to the stanza codec and is not done here.

use crate::error::Error;
use crate::jid::Jid;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Session identifier naming one call's negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sid(String);

impl Sid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random session id (32 lowercase hex characters).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Sid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $err:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $s)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(Error::$err(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// The `action` attribute of a Jingle request.
    JingleAction, UnknownAction {
        ContentAccept => "content-accept",
        ContentAdd => "content-add",
        ContentModify => "content-modify",
        ContentReject => "content-reject",
        ContentRemove => "content-remove",
        DescriptionInfo => "description-info",
        SecurityInfo => "security-info",
        SessionAccept => "session-accept",
        SessionInfo => "session-info",
        SessionInitiate => "session-initiate",
        SessionTerminate => "session-terminate",
        TransportAccept => "transport-accept",
        TransportInfo => "transport-info",
        TransportReject => "transport-reject",
        TransportReplace => "transport-replace",
    }
);

string_enum!(
    /// Condition carried in a `session-terminate` `<reason/>`.
    Reason, UnknownReason {
        AlternativeSession => "alternative-session",
        Busy => "busy",
        Cancel => "cancel",
        ConnectivityError => "connectivity-error",
        Decline => "decline",
        Expired => "expired",
        FailedApplication => "failed-application",
        FailedTransport => "failed-transport",
        GeneralError => "general-error",
        Gone => "gone",
        IncompatibleParameters => "incompatible-parameters",
        MediaError => "media-error",
        SecurityError => "security-error",
        Success => "success",
        Timeout => "timeout",
        UnsupportedApplications => "unsupported-applications",
        UnsupportedTransports => "unsupported-transports",
    }
);

string_enum!(
    /// Which party created a content.
    ContentCreator, UnknownCreator {
        Initiator => "initiator",
        Responder => "responder",
    }
);

impl Default for ContentCreator {
    fn default() -> Self {
        Self::Initiator
    }
}

string_enum!(
    /// Media carried by an RTP content.
    MediaKind, UnsupportedMedia {
        Audio => "audio",
        Video => "video",
    }
);

/// One RTP payload type offered in a content description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadType {
    pub id: u8,
    pub name: String,
    pub clockrate: u32,
    pub channels: u8,
}

impl PayloadType {
    pub fn new(id: u8, name: &str, clockrate: u32, channels: u8) -> Self {
        Self {
            id,
            name: name.to_string(),
            clockrate,
            channels,
        }
    }

    /// Static payload types (below 96) match by id, dynamic ones by
    /// encoding name, clock rate and channel count.
    pub fn matches(&self, other: &PayloadType) -> bool {
        if self.id < 96 && other.id < 96 {
            return self.id == other.id;
        }
        self.name.eq_ignore_ascii_case(&other.name)
            && self.clockrate == other.clockrate
            && self.channels == other.channels
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    Host,
    Srflx,
    Prflx,
    Relay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub foundation: String,
    pub component: u8,
    pub protocol: String,
    pub priority: u32,
    pub ip: IpAddr,
    pub port: u16,
    pub kind: CandidateKind,
}

/// ICE-UDP transport of a content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceTransport {
    pub ufrag: String,
    pub pwd: String,
    pub candidates: Vec<Candidate>,
}

impl IceTransport {
    pub fn has_credentials(&self) -> bool {
        !self.ufrag.is_empty() && !self.pwd.is_empty()
    }
}

/// Content-only description of one negotiated media stream.
///
/// Used both inside pairwise Jingle requests and in Muji presence payloads.
/// Two descriptors are equal when they share creator and name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentDescriptor {
    pub creator: ContentCreator,
    pub name: String,
    /// Raw `media` attribute of the RTP description; empty when absent.
    pub media: String,
    pub payload_types: Vec<PayloadType>,
    pub transport: Option<IceTransport>,
}

impl ContentDescriptor {
    pub fn new(creator: ContentCreator, name: &str, media: MediaKind) -> Self {
        Self {
            creator,
            name: name.to_string(),
            media: media.as_str().to_string(),
            payload_types: Vec::new(),
            transport: None,
        }
    }

    pub fn media_kind(&self) -> Result<MediaKind, Error> {
        self.media.parse()
    }

    pub fn is_same(&self, creator: ContentCreator, name: &str) -> bool {
        self.creator == creator && self.name == name
    }
}

impl PartialEq for ContentDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other.creator, &other.name)
    }
}

impl Eq for ContentDescriptor {}

/// A decoded `<jingle/>` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JingleIq {
    pub action: JingleAction,
    pub sid: Sid,
    pub initiator: Option<Jid>,
    pub responder: Option<Jid>,
    pub contents: Vec<ContentDescriptor>,
    pub reason: Option<Reason>,
    /// XEP-0167 `<ringing/>` session-info payload.
    pub ringing: bool,
}

impl JingleIq {
    pub fn new(action: JingleAction, sid: Sid) -> Self {
        Self {
            action,
            sid,
            initiator: None,
            responder: None,
            contents: Vec::new(),
            reason: None,
            ringing: false,
        }
    }

    pub fn with_contents(mut self, contents: Vec<ContentDescriptor>) -> Self {
        self.contents = contents;
        self
    }

    pub fn with_reason(mut self, reason: Reason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn ringing(mut self) -> Self {
        self.ringing = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_sids_are_unique() {
        let a = Sid::generate();
        let b = Sid::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_action_round_trip_strings() {
        assert_eq!(
            "session-initiate".parse::<JingleAction>().unwrap(),
            JingleAction::SessionInitiate
        );
        assert_eq!(JingleAction::TransportInfo.to_string(), "transport-info");
        assert_eq!(
            "bogus".parse::<JingleAction>(),
            Err(Error::UnknownAction("bogus".into()))
        );
    }

    #[test]
    fn test_reason_serde_uses_wire_names() {
        let json = serde_json::to_string(&Reason::FailedApplication).unwrap();
        assert_eq!(json, "\"failed-application\"");
    }

    #[test]
    fn test_content_equality_ignores_media() {
        let audio = ContentDescriptor::new(ContentCreator::Initiator, "microphone", MediaKind::Audio);
        let mut other = audio.clone();
        other.media = "video".into();
        other.payload_types.push(PayloadType::new(0, "PCMU", 8000, 1));
        assert_eq!(audio, other);

        let responder = ContentDescriptor::new(ContentCreator::Responder, "microphone", MediaKind::Audio);
        assert_ne!(audio, responder);
    }

    #[test]
    fn test_empty_content_has_no_media_kind() {
        let empty = ContentDescriptor::default();
        assert_eq!(
            empty.media_kind(),
            Err(Error::UnsupportedMedia(String::new()))
        );
    }

    #[test]
    fn test_payload_type_matching() {
        let pcmu = PayloadType::new(0, "PCMU", 8000, 1);
        let pcmu_renamed = PayloadType::new(0, "pcmu", 8000, 1);
        assert!(pcmu.matches(&pcmu_renamed));

        let opus = PayloadType::new(111, "opus", 48000, 2);
        let opus_other_id = PayloadType::new(101, "OPUS", 48000, 2);
        assert!(opus.matches(&opus_other_id));

        let opus_mono = PayloadType::new(111, "opus", 48000, 1);
        assert!(!opus.matches(&opus_mono));
    }
}
