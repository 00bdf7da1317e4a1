//! Media stream descriptions and the seam to the media/ICE engine.
//!
//! RTP and ICE packet handling live outside this crate. A [`MediaBackend`]
//! tells the signaling layer which media kinds can be carried and what the
//! local side offers for them; the resulting [`ContentStream`] records what
//! was negotiated so the engine can be configured once the call is active.

use super::transport::TransportConfig;
use callcore::{
    Candidate, ContentCreator, ContentDescriptor, IceTransport, MediaKind, PayloadType,
};
use log::debug;
use rand::RngCore;
use std::net::IpAddr;

/// One negotiated media stream within a call.
#[derive(Debug, Clone)]
pub struct ContentStream {
    pub creator: ContentCreator,
    pub name: String,
    pub media: MediaKind,
    pub local_payload_types: Vec<PayloadType>,
    /// Payload types both sides support, in the remote party's order.
    pub negotiated_payload_types: Vec<PayloadType>,
    pub local_transport: IceTransport,
    pub remote_transport: Option<IceTransport>,
    pub stun_servers: Vec<(IpAddr, u16)>,
    pub turn_server: Option<(IpAddr, u16)>,
}

impl ContentStream {
    /// Content descriptor announcing the local side of this stream.
    pub fn local_content(&self) -> ContentDescriptor {
        ContentDescriptor {
            creator: self.creator,
            name: self.name.clone(),
            media: self.media.as_str().to_string(),
            payload_types: if self.negotiated_payload_types.is_empty() {
                self.local_payload_types.clone()
            } else {
                self.negotiated_payload_types.clone()
            },
            transport: Some(self.local_transport.clone()),
        }
    }

    /// Check the remote description and record the common payload types.
    pub fn apply_description(&mut self, content: &ContentDescriptor) -> bool {
        if content.media_kind().ok() != Some(self.media) {
            debug!(
                "Content {} offers media '{}' but stream carries {}",
                content.name, content.media, self.media
            );
            return false;
        }

        let common: Vec<PayloadType> = content
            .payload_types
            .iter()
            .filter(|remote| self.local_payload_types.iter().any(|l| l.matches(remote)))
            .cloned()
            .collect();

        if common.is_empty() {
            debug!("No common payload types for content {}", content.name);
            return false;
        }
        self.negotiated_payload_types = common;
        true
    }

    /// Check the remote ICE-UDP transport and record its credentials.
    pub fn apply_transport(&mut self, content: &ContentDescriptor) -> bool {
        match &content.transport {
            Some(transport) if transport.has_credentials() => {
                self.remote_transport = Some(transport.clone());
                true
            }
            _ => {
                debug!("Content {} has no usable ICE-UDP transport", content.name);
                false
            }
        }
    }

    pub fn add_remote_candidates(&mut self, candidates: &[Candidate]) {
        let transport = self.remote_transport.get_or_insert_with(IceTransport::default);
        for candidate in candidates {
            if !transport.candidates.contains(candidate) {
                transport.candidates.push(candidate.clone());
            }
        }
    }
}

/// Capabilities of the local media engine.
pub trait MediaBackend: Send + Sync {
    /// Payload types offered for `media`; empty when the kind is unsupported.
    fn payload_types(&self, media: MediaKind) -> Vec<PayloadType>;

    /// Local candidates known before connectivity checks start.
    fn local_candidates(&self, _media: MediaKind, _config: &TransportConfig) -> Vec<Candidate> {
        Vec::new()
    }
}

/// Opus/PCMU audio and VP8/H264 video.
#[derive(Debug, Clone, Default)]
pub struct DefaultMediaBackend;

impl MediaBackend for DefaultMediaBackend {
    fn payload_types(&self, media: MediaKind) -> Vec<PayloadType> {
        match media {
            MediaKind::Audio => vec![
                PayloadType::new(111, "opus", 48000, 2),
                PayloadType::new(0, "PCMU", 8000, 1),
            ],
            MediaKind::Video => vec![
                PayloadType::new(96, "VP8", 90000, 1),
                PayloadType::new(97, "H264", 90000, 1),
            ],
        }
    }
}

/// Create a stream for the raw `media` attribute of a content.
///
/// Returns `None` when the media kind is unknown or the backend cannot carry
/// it.
pub fn create_stream(
    backend: &dyn MediaBackend,
    media: &str,
    creator: ContentCreator,
    name: &str,
    config: &TransportConfig,
) -> Option<ContentStream> {
    let media: MediaKind = match media.parse() {
        Ok(kind) => kind,
        Err(e) => {
            debug!("Cannot create stream {}: {}", name, e);
            return None;
        }
    };

    let local_payload_types = backend.payload_types(media);
    if local_payload_types.is_empty() {
        debug!("Media backend does not support {} for stream {}", media, name);
        return None;
    }

    let local_transport = IceTransport {
        ufrag: random_token(4),
        pwd: random_token(11),
        candidates: backend.local_candidates(media, config),
    };

    Some(ContentStream {
        creator,
        name: name.to_string(),
        media,
        local_payload_types,
        negotiated_payload_types: Vec::new(),
        local_transport,
        remote_transport: None,
        stun_servers: config.stun_servers.clone(),
        turn_server: config.turn_host.map(|host| (host, config.turn_port)),
    })
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
