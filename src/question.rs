use std::io::Cursor;

use bytes::Buf;
use tracing::instrument;

use super::{Name, Networkable};
use crate::util::ensure_remaining;
use crate::{DnsError, RecordType};

pub const CLASS_IN: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: Name,
    pub type_: RecordType,
    pub class: u16,
}

impl Question {
    pub fn new(name: Name, type_: RecordType) -> Self {
        Self {
            name,
            type_,
            class: CLASS_IN,
        }
    }
}

impl Networkable for Question {
    #[instrument(level = "trace", skip_all)]
    fn to_bytes(&self) -> Vec<u8> {
        let mut ret = Vec::new();

        ret.extend_from_slice(&self.name.to_bytes());
        ret.extend_from_slice(&u16::from(self.type_).to_be_bytes());
        ret.extend_from_slice(&self.class.to_be_bytes());

        ret
    }

    #[instrument(level = "trace", skip_all)]
    fn from_bytes(bytes: &mut Cursor<&[u8]>) -> Result<Self, DnsError> {
        let name = Name::from_bytes(bytes)?;

        ensure_remaining(bytes, 4)?;
        let type_ = RecordType::from(bytes.get_u16());
        let class = bytes.get_u16();

        Ok(Self { name, type_, class })
    }
}
