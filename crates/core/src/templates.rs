use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::registry::RegistryError;
use crate::slots::SlotId;

/// Symbolic name of a system utterance. Renderers map each key to text; the dialogue
/// core only ever deals in keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TemplateKey {
    Welcome,
    Closing,
    RequestMore,
    FailRestart,
    Request(SlotId),
    RequestWithError(SlotId),
}

impl TemplateKey {
    pub fn catalog_key(&self) -> String {
        match self {
            Self::Welcome => "welcomemsg".to_string(),
            Self::Closing => "closingmsg".to_string(),
            Self::RequestMore => "reqmore".to_string(),
            Self::FailRestart => "fail_restart".to_string(),
            Self::Request(slot) => format!("request({slot})"),
            Self::RequestWithError(slot) => format!("reqwerr({slot})"),
        }
    }

    pub fn slot(&self) -> Option<SlotId> {
        match self {
            Self::Request(slot) | Self::RequestWithError(slot) => Some(*slot),
            _ => None,
        }
    }

    /// Every key the dialogue can emit.
    pub fn all() -> Vec<TemplateKey> {
        let mut keys = vec![Self::Welcome, Self::Closing, Self::RequestMore, Self::FailRestart];
        keys.extend(SlotId::PRIORITY.into_iter().map(Self::Request));
        keys.extend(SlotId::PRIORITY.into_iter().map(Self::RequestWithError));
        keys
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.catalog_key())
    }
}

impl FromStr for TemplateKey {
    type Err = RegistryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let unknown = || RegistryError::UnknownTemplate(value.to_string());
        match trimmed {
            "welcomemsg" => return Ok(Self::Welcome),
            "closingmsg" => return Ok(Self::Closing),
            "reqmore" => return Ok(Self::RequestMore),
            "fail_restart" => return Ok(Self::FailRestart),
            _ => {}
        }

        let (prefix, rest) = trimmed.split_once('(').ok_or_else(unknown)?;
        let slot_name = rest.strip_suffix(')').ok_or_else(unknown)?;
        let slot = slot_name.parse::<SlotId>().map_err(|_| unknown())?;
        match prefix {
            "request" => Ok(Self::Request(slot)),
            "reqwerr" => Ok(Self::RequestWithError(slot)),
            _ => Err(unknown()),
        }
    }
}

impl TryFrom<String> for TemplateKey {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TemplateKey> for String {
    fn from(value: TemplateKey) -> Self {
        value.catalog_key()
    }
}
