use std::fmt::Display;
use std::io::Cursor;

use bytes::Buf;

use super::Networkable;
use crate::util::ensure_remaining;
use crate::DnsError;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_JUMPS: usize = 64;

/// A domain name in trailing-dot presentation form, with case preserved.
/// E.g. `www.example.com.`, or `.` for the root.
///
/// Label bytes that would be ambiguous in that form are escaped the RFC 1035
/// way: `.` and `\` as `\.` and `\\`, anything outside printable ASCII as
/// `\DDD`. Two names are equal exactly when their wire labels are.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Name(String);

impl Name {
    /// Appends the trailing dot if missing. Label lengths are not checked,
    /// see [`Name::parse`].
    pub fn new(name: &str) -> Self {
        if name.is_empty() || name == "." {
            Self(".".to_owned())
        } else if has_terminal_dot(name) {
            Self(name.to_owned())
        } else {
            Self(format!("{name}."))
        }
    }

    pub fn parse(name: &str) -> Result<Self, DnsError> {
        let name = Self::new(name);

        let mut wire_len = 1;
        for label in name.labels() {
            if label.is_empty() {
                return Err(DnsError::FormatError);
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(DnsError::LabelTooLong);
            }
            wire_len += label.len() + 1;
        }
        if wire_len > MAX_NAME_LEN {
            return Err(DnsError::NameTooLong);
        }

        Ok(name)
    }

    pub fn is_root(&self) -> bool {
        self.0 == "."
    }

    /// Raw wire labels from left to right, without the empty root label.
    pub fn labels(&self) -> Vec<Vec<u8>> {
        if self.is_root() {
            return Vec::new();
        }

        let text = self.0.as_bytes();
        let mut labels = Vec::new();
        let mut label = Vec::new();
        let mut i = 0;

        while i < text.len() {
            match text[i] {
                b'\\' => match decimal_escape(&text[i + 1..]) {
                    Some(byte) => {
                        label.push(byte);
                        i += 4;
                    }
                    None if i + 1 < text.len() => {
                        label.push(text[i + 1]);
                        i += 2;
                    }
                    // A lone trailing backslash stands for itself
                    None => {
                        label.push(b'\\');
                        i += 1;
                    }
                },
                b'.' => {
                    labels.push(std::mem::take(&mut label));
                    i += 1;
                }
                byte => {
                    label.push(byte);
                    i += 1;
                }
            }
        }

        if !label.is_empty() {
            labels.push(label);
        }

        labels
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    fn from_labels(labels: &[Vec<u8>]) -> Self {
        if labels.is_empty() {
            return Self(".".to_owned());
        }

        let mut name = String::new();
        for label in labels {
            escape_label(label, &mut name);
            name.push('.');
        }
        Self(name)
    }
}

/// True when `name` ends in a dot that is not itself escaped.
fn has_terminal_dot(name: &str) -> bool {
    let Some(rest) = name.strip_suffix('.') else {
        return false;
    };

    let backslashes = rest.bytes().rev().take_while(|b| *b == b'\\').count();
    backslashes % 2 == 0
}

/// `\DDD` with DDD at most 255, given the bytes after the backslash.
fn decimal_escape(text: &[u8]) -> Option<u8> {
    match text {
        [a, b, c, ..] if a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit() => {
            let value =
                (*a - b'0') as u16 * 100 + (*b - b'0') as u16 * 10 + (*c - b'0') as u16;
            u8::try_from(value).ok()
        }
        _ => None,
    }
}

fn escape_label(label: &[u8], out: &mut String) {
    for &byte in label {
        match byte {
            b'.' | b'\\' => {
                out.push('\\');
                out.push(byte as char);
            }
            0x21..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\{byte:03}")),
        }
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Networkable for Name {
    fn to_bytes(&self) -> Vec<u8> {
        let mut ret = Vec::with_capacity(self.0.len() + 1);

        for label in self.labels() {
            ret.push(label.len() as u8);
            ret.extend_from_slice(&label);
        }

        ret.push(0);

        ret
    }

    /// Reads a possibly compressed name. The cursor must span the whole
    /// message so that compression pointers can be followed.
    fn from_bytes(bytes: &mut Cursor<&[u8]>) -> Result<Self, DnsError> {
        let mut labels: Vec<Vec<u8>> = Vec::new();
        let mut wire_len = 1;
        let mut jumps = 0;
        // Where to continue once the first pointer has been followed
        let mut resume_at = None;

        loop {
            ensure_remaining(bytes, 1)?;
            let len = bytes.get_u8();

            match len & 0b1100_0000 {
                0b1100_0000 => {
                    // Compressed
                    ensure_remaining(bytes, 1)?;
                    let pointer = (((len & 0b0011_1111) as u64) << 8) | (bytes.get_u8() as u64);

                    jumps += 1;
                    if jumps > MAX_POINTER_JUMPS {
                        return Err(DnsError::PointerLoop);
                    }
                    if pointer as usize >= bytes.get_ref().len() {
                        return Err(DnsError::FormatError);
                    }

                    if resume_at.is_none() {
                        resume_at = Some(bytes.position());
                    }
                    bytes.set_position(pointer);
                }
                0 => {
                    // Uncompressed
                    let len = len as usize;
                    if len == 0 {
                        break;
                    }

                    ensure_remaining(bytes, len)?;
                    wire_len += len + 1;
                    if wire_len > MAX_NAME_LEN {
                        return Err(DnsError::NameTooLong);
                    }

                    labels.push(bytes.copy_to_bytes(len).to_vec());
                }
                // Extended label types are obsolete
                _ => return Err(DnsError::FormatError),
            }
        }

        if let Some(position) = resume_at {
            bytes.set_position(position);
        }

        Ok(Self::from_labels(&labels))
    }
}
