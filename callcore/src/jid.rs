use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An XMPP address of the form `node@domain/resource`.
///
/// Group conversations are addressed by their bare JID (`room@conference.host`)
/// and their occupants by a full JID whose resource is the occupant nickname.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    pub node: String,
    pub domain: String,
    pub resource: String,
}

impl Jid {
    pub fn new(node: &str, domain: &str) -> Self {
        Self {
            node: node.to_string(),
            domain: domain.to_string(),
            resource: String::new(),
        }
    }

    pub fn with_resource(&self, resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            ..self.clone()
        }
    }

    /// The address with its resource stripped.
    pub fn to_bare(&self) -> Self {
        Self {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: String::new(),
        }
    }

    pub fn is_bare(&self) -> bool {
        self.resource.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.domain.is_empty()
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }

        // The resource may itself contain '@' and '/', so split it off first.
        let (addr, resource) = match s.split_once('/') {
            Some((a, r)) => (a, r),
            None => (s, ""),
        };
        let (node, domain) = match addr.split_once('@') {
            Some((n, d)) => (n, d),
            None => ("", addr),
        };

        if domain.is_empty() || domain.contains('@') {
            return Err(Error::InvalidJid(s.to_string()));
        }
        if s.contains('@') && node.is_empty() {
            return Err(Error::InvalidJid(s.to_string()));
        }
        if s.contains('/') && resource.is_empty() {
            return Err(Error::InvalidJid(s.to_string()));
        }

        Ok(Self {
            node: node.to_string(),
            domain: domain.to_string(),
            resource: resource.to_string(),
        })
    }
}

impl TryFrom<String> for Jid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.node.is_empty() {
            write!(f, "{}@", self.node)?;
        }
        f.write_str(&self.domain)?;
        if !self.resource.is_empty() {
            write!(f, "/{}", self.resource)?;
        }
        Ok(())
    }
}
