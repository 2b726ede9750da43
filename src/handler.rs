use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use derivative::Derivative;
use tracing::{debug, instrument, warn};

use crate::cache::{CachedRecord, RecordStore};
use crate::upstream::Forwarder;
use crate::{
    unix_now, DnsError, Flags, Header, Message, Name, Networkable, ProxyError, Question, Rcode,
    RecordData, RecordType, ResourceRecord, CLASS_IN, HEADER_LEN,
};

/// Largest datagram accepted from, or sent to, a client.
pub const MAX_DATAGRAM_SIZE: usize = 512;

/// A decoded client query. Only the first question is used; its wire bytes
/// are kept so replies echo it exactly.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct Query {
    pub id: u16,
    pub flags: Flags,
    pub name: Name,
    pub qtype: RecordType,
    pub class: u16,
    #[derivative(Debug = "ignore")]
    pub question: Bytes,
}

/// Parses the header and first question of a client datagram. Responses
/// and question-less messages are rejected.
pub fn decode_query(bytes: &[u8]) -> Result<Query, ProxyError> {
    let mut cursor = Cursor::new(bytes);
    let header = Header::from_bytes(&mut cursor)?;

    if header.flags.qr() || header.num_questions == 0 {
        return Err(ProxyError::MalformedQuery(DnsError::FormatError));
    }

    let start = cursor.position() as usize;
    let Question { name, type_, class } = Question::from_bytes(&mut cursor)?;
    let end = cursor.position() as usize;

    Ok(Query {
        id: header.id,
        flags: header.flags,
        name,
        qtype: type_,
        class,
        question: Bytes::copy_from_slice(&bytes[start..end]),
    })
}

/// Builds the reply to `query`: same id, the query's first question copied
/// byte for byte, and the records of the requested type as answers. Answers
/// that would push the reply past 512 bytes are dropped and TC is set.
pub fn encode_response(query: &Query, records: &[ResourceRecord], rcode: Rcode) -> Vec<u8> {
    let mut header = Header::new(query.id, Flags::response_to(query.flags, rcode));
    header.num_questions = 1;

    let mut size = HEADER_LEN + query.question.len();
    let mut answers = Vec::new();
    for record in records.iter().filter(|r| r.type_ == query.qtype) {
        let encoded = record.to_bytes();
        if size + encoded.len() > MAX_DATAGRAM_SIZE {
            header.flags.set_tc(true);
            break;
        }

        size += encoded.len();
        answers.push(encoded);
        header.num_answers += 1;
    }

    let mut bytes = header.to_bytes();
    bytes.reserve(size - HEADER_LEN);
    bytes.extend_from_slice(&query.question);
    for answer in answers {
        bytes.extend_from_slice(&answer);
    }

    bytes
}

/// Turns still-valid cached records of the queried type into answers,
/// skipping any whose stored data no longer parses.
pub fn answers_from_cache(query: &Query, cached: &[CachedRecord], now: f64) -> Vec<ResourceRecord> {
    cached
        .iter()
        .filter(|r| r.type_ == query.qtype && r.is_valid_at(now))
        .filter_map(|r| match RecordData::parse(r.type_, &r.data) {
            Ok(data) => Some(ResourceRecord {
                name: query.name.clone(),
                type_: r.type_,
                class: CLASS_IN,
                ttl: r.remaining_ttl(now),
                data,
            }),
            Err(e) => {
                warn!(name = %query.name, error = %e, "skipping unusable cached record");
                None
            }
        })
        .collect()
}

/// Stores every cacheable record of `response` in `store`. Returns how many
/// records were stored.
pub fn harvest(store: &RecordStore, response: &Message) -> usize {
    let now = unix_now();
    let mut stored = 0;

    for record in response
        .records()
        .filter(|r| r.type_.is_cacheable() && r.class == CLASS_IN)
    {
        store.insert(
            record.name.as_str(),
            CachedRecord::at(record.type_, record.data.to_string(), record.ttl, now),
        );
        stored += 1;
    }

    stored
}

/// How a handled query was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Synthesized from the cache
    Cached(Vec<u8>),
    /// Relayed verbatim from upstream
    Forwarded(Bytes),
}

impl Reply {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Cached(bytes) => &bytes[..],
            Self::Forwarded(bytes) => &bytes[..],
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Self::Cached(_) => "cache",
            Self::Forwarded(_) => "upstream",
        }
    }
}

/// Answers one datagram at a time, from the cache when it can and from the
/// upstream otherwise.
#[derive(Clone)]
pub struct QueryHandler {
    store: Arc<RecordStore>,
    forwarder: Arc<dyn Forwarder>,
}

impl QueryHandler {
    pub fn new(store: Arc<RecordStore>, forwarder: Arc<dyn Forwarder>) -> Self {
        Self { store, forwarder }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Any error means no reply should be sent.
    #[instrument(level = "debug", skip_all)]
    pub async fn handle(&self, datagram: &[u8]) -> Result<Reply, ProxyError> {
        let query = decode_query(datagram)?;
        debug!(id = query.id, name = %query.name, qtype = %query.qtype, "query received");

        // Only class IN answers are ever cached
        if query.class == CLASS_IN && query.qtype.is_cacheable() {
            let now = unix_now();
            let cached = self.store.lookup_at(query.name.as_str(), now);
            let answers = answers_from_cache(&query, &cached, now);

            if !answers.is_empty() {
                debug!(name = %query.name, answers = answers.len(), "cache hit");
                return Ok(Reply::Cached(encode_response(
                    &query,
                    &answers,
                    Rcode::NoError,
                )));
            }
        }

        debug!(name = %query.name, "cache miss, forwarding");
        let response = self.forwarder.forward(datagram).await?;

        match Message::from_bytes(&mut Cursor::new(&response[..])) {
            Ok(message) => {
                let stored = harvest(&self.store, &message);
                debug!(name = %query.name, stored, "harvested upstream response");
            }
            Err(e) => {
                warn!(name = %query.name, error = %e, "relaying undecodable upstream response uncached");
            }
        }

        Ok(Reply::Forwarded(response))
    }
}
