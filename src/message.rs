use std::io::Cursor;

use tracing::instrument;

use super::{Flags, Header, Name, Networkable, Question, RecordType, ResourceRecord};
use crate::DnsError;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
}

impl Message {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            ..Default::default()
        }
    }

    /// A recursion-desired query for `name` with a random transaction id.
    pub fn query(name: Name, type_: RecordType) -> Self {
        let mut flags = Flags::default();
        flags.set_rd(true);

        let mut query = Self::new(Header::new(rand::random::<u16>(), flags));
        query.add_question(Question::new(name, type_));
        query
    }

    pub fn add_question(&mut self, question: Question) {
        self.header.num_questions += 1;
        self.questions.push(question)
    }

    pub fn add_answer(&mut self, answer: ResourceRecord) {
        self.header.num_answers += 1;
        self.answers.push(answer)
    }

    pub fn add_authority(&mut self, answer: ResourceRecord) {
        self.header.num_authorities += 1;
        self.authorities.push(answer)
    }

    pub fn add_additional(&mut self, answer: ResourceRecord) {
        self.header.num_additionals += 1;
        self.additionals.push(answer)
    }

    /// Answer, authority and additional records, in that order.
    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.additionals.iter())
    }
}

impl Networkable for Message {
    #[instrument(level = "trace", skip_all)]
    fn to_bytes(&self) -> Vec<u8> {
        // Section counts always follow the sections actually present
        let header = Header {
            num_questions: self.questions.len() as u16,
            num_answers: self.answers.len() as u16,
            num_authorities: self.authorities.len() as u16,
            num_additionals: self.additionals.len() as u16,
            ..self.header.clone()
        };

        let mut response = header.to_bytes();

        for question in self.questions.iter() {
            response.extend_from_slice(&question.to_bytes())
        }

        for record in self.records() {
            response.extend_from_slice(&record.to_bytes())
        }

        response
    }

    #[instrument(level = "trace", skip_all)]
    fn from_bytes(bytes: &mut Cursor<&[u8]>) -> Result<Self, DnsError> {
        let header = Header::from_bytes(bytes)?;

        let mut questions = Vec::new();
        for _ in 0..header.num_questions {
            questions.push(Question::from_bytes(bytes)?);
        }

        let mut answers = Vec::new();
        for _ in 0..header.num_answers {
            answers.push(ResourceRecord::from_bytes(bytes)?);
        }

        let mut authorities = Vec::new();
        for _ in 0..header.num_authorities {
            authorities.push(ResourceRecord::from_bytes(bytes)?);
        }

        let mut additionals = Vec::new();
        for _ in 0..header.num_additionals {
            additionals.push(ResourceRecord::from_bytes(bytes)?);
        }

        Ok(Self {
            header,
            questions,
            answers,
            authorities,
            additionals,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::Ipv4Addr;

    use crate::{Message, Name, Networkable, RecordData, RecordType};

    // dig example.com A, answer compressed against the question name
    const RESPONSE: &[u8] = &[
        0x12, 0x34, 0x81, 0x80, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, //
        0x07, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x03, b'c', b'o', b'm', 0x00, //
        0x00, 0x01, 0x00, 0x01, //
        0xc0, 0x0c, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x0e, 0x10, 0x00, 0x04, //
        93, 184, 216, 34,
    ];

    #[test]
    fn decodes_compressed_response() {
        let message = Message::from_bytes(&mut Cursor::new(RESPONSE)).unwrap();

        assert_eq!(message.header.id, 0x1234);
        assert!(message.header.flags.qr());
        assert_eq!(message.questions[0].name.as_str(), "example.com.");
        assert_eq!(message.answers.len(), 1);

        let answer = &message.answers[0];
        assert_eq!(answer.name, Name::new("example.com"));
        assert_eq!(answer.ttl, 3600);
        assert_eq!(answer.data, RecordData::A(Ipv4Addr::new(93, 184, 216, 34)));
    }

    #[test]
    fn truncated_answer_fails() {
        let cut = &RESPONSE[..RESPONSE.len() - 2];
        assert!(Message::from_bytes(&mut Cursor::new(cut)).is_err());
    }

    #[test]
    fn encoded_query_decodes_to_same_message() {
        let query = Message::query(Name::new("www.example.com"), RecordType::Aaaa);
        let bytes = query.to_bytes();

        let decoded = Message::from_bytes(&mut Cursor::new(&bytes[..])).unwrap();
        assert_eq!(decoded, query);
        assert!(decoded.header.flags.rd());
    }

    #[test]
    fn counts_follow_sections() {
        let mut message = Message::query(Name::new("example.com"), RecordType::A);
        message.questions.clear();

        let bytes = message.to_bytes();
        assert_eq!(&bytes[4..6], &[0, 0]);
    }
}
