//! Decoded top-level stanzas the call engine consumes and produces.

use crate::jid::Jid;
use crate::jingle::JingleIq;
use crate::muji::MujiPayload;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IqType {
    Get,
    Set,
    Result,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iq {
    pub id: String,
    pub from: Jid,
    pub to: Jid,
    pub kind: IqType,
    pub jingle: Option<JingleIq>,
}

impl Iq {
    pub fn set(id: impl Into<String>, to: Jid, jingle: JingleIq) -> Self {
        Self {
            id: id.into(),
            from: Jid::default(),
            to,
            kind: IqType::Set,
            jingle: Some(jingle),
        }
    }

    /// Empty `result` acknowledging `request`.
    pub fn result_for(request: &Iq) -> Self {
        Self {
            id: request.id.clone(),
            from: request.to.clone(),
            to: request.from.clone(),
            kind: IqType::Result,
            jingle: None,
        }
    }

    pub fn is_jingle_request(&self) -> bool {
        self.kind == IqType::Set && self.jingle.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceType {
    #[default]
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub from: Jid,
    pub to: Jid,
    pub kind: PresenceType,
    pub muji: MujiPayload,
}

impl Presence {
    pub fn to(to: Jid) -> Self {
        Self {
            to,
            ..Default::default()
        }
    }

    pub fn with_muji(mut self, muji: MujiPayload) -> Self {
        self.muji = muji;
        self
    }

    pub fn is_unavailable(&self) -> bool {
        self.kind == PresenceType::Unavailable
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stanza {
    Iq(Iq),
    Presence(Presence),
}

impl Stanza {
    /// Top-level element name, used for routing.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Iq(_) => "iq",
            Self::Presence(_) => "presence",
        }
    }
}

impl From<Iq> for Stanza {
    fn from(iq: Iq) -> Self {
        Self::Iq(iq)
    }
}

impl From<Presence> for Stanza {
    fn from(presence: Presence) -> Self {
        Self::Presence(presence)
    }
}
