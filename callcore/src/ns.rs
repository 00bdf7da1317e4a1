//! Namespaces advertised through service discovery.

/// XEP-0166: Jingle
pub const JINGLE: &str = "urn:xmpp:jingle:1";
/// XEP-0167: Jingle RTP Sessions
pub const JINGLE_RTP: &str = "urn:xmpp:jingle:apps:rtp:1";
pub const JINGLE_RTP_AUDIO: &str = "urn:xmpp:jingle:apps:rtp:audio";
pub const JINGLE_RTP_VIDEO: &str = "urn:xmpp:jingle:apps:rtp:video";
/// XEP-0176: Jingle ICE-UDP Transport Method
pub const JINGLE_ICE_UDP: &str = "urn:xmpp:jingle:transports:ice-udp:1";

pub const CALL_FEATURES: [&str; 5] = [
    JINGLE,
    JINGLE_RTP,
    JINGLE_RTP_AUDIO,
    JINGLE_RTP_VIDEO,
    JINGLE_ICE_UDP,
];
