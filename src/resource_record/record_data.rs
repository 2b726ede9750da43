use std::fmt::Display;
use std::io::Cursor;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, Bytes};
use itertools::Itertools;

use crate::util::ensure_remaining;
use crate::{DnsError, Name, Networkable, RecordType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(Name),
    Ptr(Name),
    Cname(Name),
    /// Anything this proxy does not interpret, kept verbatim
    Other(Bytes),
}

impl RecordData {
    /// Reads `rd_length` bytes of record data. The cursor must span the whole
    /// message, since name-valued data may be compressed.
    pub fn from_bytes(
        type_: RecordType,
        rd_length: u16,
        bytes: &mut Cursor<&[u8]>,
    ) -> Result<Self, DnsError> {
        let rd_length = rd_length as usize;
        ensure_remaining(bytes, rd_length)?;
        let end = bytes.position() + rd_length as u64;

        let data = match type_ {
            RecordType::A if rd_length == 4 => Self::A(bytes.get_u32().into()),
            RecordType::Aaaa if rd_length == 16 => Self::Aaaa(bytes.get_u128().into()),
            RecordType::A | RecordType::Aaaa => return Err(DnsError::FormatError),
            RecordType::Ns => Self::Ns(Name::from_bytes(bytes)?),
            RecordType::Ptr => Self::Ptr(Name::from_bytes(bytes)?),
            RecordType::Cname => Self::Cname(Name::from_bytes(bytes)?),
            _ => Self::Other(bytes.copy_to_bytes(rd_length)),
        };

        if bytes.position() != end {
            return Err(DnsError::FormatError);
        }

        Ok(data)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::A(addr) => addr.octets().to_vec(),
            Self::Aaaa(addr) => addr.octets().to_vec(),
            Self::Ns(name) | Self::Ptr(name) | Self::Cname(name) => name.to_bytes(),
            Self::Other(data) => data.to_vec(),
        }
    }

    /// Parses the textual form produced by `Display`. Only types that can be
    /// cached have a textual form worth parsing back.
    pub fn parse(type_: RecordType, text: &str) -> Result<Self, DnsError> {
        let invalid = || DnsError::InvalidRecordData {
            type_: type_.to_string(),
            data: text.to_owned(),
        };

        match type_ {
            RecordType::A => text.parse().map(Self::A).map_err(|_| invalid()),
            RecordType::Aaaa => text.parse().map(Self::Aaaa).map_err(|_| invalid()),
            RecordType::Ns => Name::parse(text).map(Self::Ns).map_err(|_| invalid()),
            RecordType::Ptr => Name::parse(text).map(Self::Ptr).map_err(|_| invalid()),
            RecordType::Cname => Name::parse(text).map(Self::Cname).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl Display for RecordData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A(addr) => addr.fmt(f),
            Self::Aaaa(addr) => addr.fmt(f),
            Self::Ns(name) | Self::Ptr(name) | Self::Cname(name) => name.fmt(f),
            // RFC 3597 generic form
            Self::Other(data) => write!(
                f,
                "\\# {} {}",
                data.len(),
                data.iter().map(|b| format!("{b:02x}")).join("")
            ),
        }
    }
}
