use std::io::Cursor;

mod error;
pub use error::{DnsError, ProxyError};

mod header;
pub use header::{Flags, Header, Rcode, HEADER_LEN};

mod name;
pub use name::Name;

mod message;
pub use message::Message;

mod question;
pub use question::{Question, CLASS_IN};

mod resource_record;
pub use resource_record::{RecordData, ResourceRecord};

mod record_type;
pub use record_type::RecordType;

pub mod cache;
pub mod config;
pub mod handler;
pub mod janitor;
pub mod persistence;
pub mod proxy;
pub mod server;
pub mod upstream;

mod util;
pub use util::unix_now;

pub trait Networkable: Sized {
    fn to_bytes(&self) -> Vec<u8>;

    fn from_bytes(bytes: &mut Cursor<&[u8]>) -> Result<Self, DnsError>;
}
