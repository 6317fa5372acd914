//! Hand-rolled DNS wire-format parser.
//!
//! Turns one raw DNS message into correlated question/answer records. The
//! parser is stateless per call and total: malformed input yields an empty
//! result, never a panic. Only the record types the sensor reports on are
//! interpreted (A, AAAA, CNAME); everything else is skipped by length.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

const HEADER_SIZE: usize = 12;
const QUESTION_FIXED: usize = 4;
const ANSWER_FIXED: usize = 10;

/// Pointer-hop budget while decompressing one name. A compliant message
/// never chains this deep; a crafted pointer cycle exhausts the budget and
/// parses as malformed instead of looping.
const MAX_POINTER_HOPS: usize = 16;

const TYPE_A: u16 = 1;
const TYPE_CNAME: u16 = 5;
const TYPE_AAAA: u16 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// One question with its accumulated answers: comma-joined resolved
/// addresses, following CNAME chains within the same message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsExchange {
    pub domain_name: String,
    pub reply_code: u16,
    pub query_result: String,
}

/// Parse a raw DNS message. TCP payloads carry a 2-byte length prefix
/// before the header; UDP payloads start at the header directly. Any
/// structural failure discards the whole message so partial correlations
/// are never reported.
pub fn parse_message(buf: &[u8], transport: Transport) -> Vec<DnsExchange> {
    let offset = match transport {
        Transport::Udp => 0,
        Transport::Tcp => 2,
    };
    if buf.len() <= offset + HEADER_SIZE {
        return Vec::new();
    }

    let mut parser = Parser {
        data: buf,
        base: offset,
        cursor: offset,
        questions: HashMap::new(),
        results: Vec::new(),
    };
    match parser.run() {
        Some(()) => parser.results,
        None => Vec::new(),
    }
}

struct Parser<'a> {
    data: &'a [u8],
    /// Offset of the DNS header; compression-pointer targets are relative
    /// to it, which matters for TCP payloads with their length prefix.
    base: usize,
    cursor: usize,
    /// Decompressed name -> question index, re-keyed on CNAME so later
    /// records resolving the alias still attach to the original question.
    questions: HashMap<String, usize>,
    results: Vec<DnsExchange>,
}

impl Parser<'_> {
    fn run(&mut self) -> Option<()> {
        let flags = self.read_u16(self.cursor + 2)?;
        let question_count = self.read_u16(self.cursor + 4)?;
        let answer_count = self.read_u16(self.cursor + 6)?;
        self.cursor += HEADER_SIZE;

        let reply_code = flags & 0x000f;
        self.parse_questions(question_count, reply_code)?;
        self.parse_answers(answer_count)
    }

    fn parse_questions(&mut self, count: u16, reply_code: u16) -> Option<()> {
        for index in 0..count as usize {
            let mut domain_name = String::new();
            let consumed = self.read_name(self.cursor, &mut domain_name, 0)?;
            self.cursor += consumed;

            if self.cursor + QUESTION_FIXED > self.data.len() {
                return None;
            }
            self.cursor += QUESTION_FIXED;

            self.questions.insert(domain_name.clone(), index);
            self.results.push(DnsExchange {
                domain_name,
                reply_code,
                query_result: String::new(),
            });
        }
        Some(())
    }

    fn parse_answers(&mut self, count: u16) -> Option<()> {
        for _ in 0..count {
            let mut owner = String::new();
            let consumed = self.read_name(self.cursor, &mut owner, 0)?;
            self.cursor += consumed;

            if self.cursor + ANSWER_FIXED > self.data.len() {
                return None;
            }
            let rtype = self.read_u16(self.cursor)?;
            let rdata_len = self.read_u16(self.cursor + 8)? as usize;
            let rdata = self.cursor + ANSWER_FIXED;
            if rdata + rdata_len > self.data.len() {
                return None;
            }

            match rtype {
                TYPE_A if rdata_len == 4 => {
                    let addr = Ipv4Addr::new(
                        self.data[rdata],
                        self.data[rdata + 1],
                        self.data[rdata + 2],
                        self.data[rdata + 3],
                    );
                    self.append_result(&owner, &addr.to_string());
                }
                TYPE_AAAA if rdata_len == 16 => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(&self.data[rdata..rdata + 16]);
                    self.append_result(&owner, &Ipv6Addr::from(octets).to_string());
                }
                TYPE_CNAME => {
                    // Chase the alias: records later in the message answer
                    // under the canonical name, so re-key the correlation.
                    let mut alias = String::new();
                    self.read_name(rdata, &mut alias, 0)?;
                    if let Some(index) = self.questions.get(&owner).copied() {
                        self.questions.insert(alias, index);
                    }
                }
                _ => {}
            }

            self.cursor = rdata + rdata_len;
        }
        Some(())
    }

    /// Append one resolved address to the question the answer correlates
    /// to. Answers for names no question asked about are dropped.
    fn append_result(&mut self, owner: &str, address: &str) {
        let Some(index) = self.questions.get(owner).copied() else {
            return;
        };
        let result = &mut self.results[index].query_result;
        if !result.is_empty() {
            result.push(',');
        }
        result.push_str(address);
    }

    /// Decompress the domain name at `pos`, appending labels to `name`.
    /// Returns how many bytes the name occupies at `pos` itself; bytes
    /// behind a compression pointer do not count. Recursion mirrors the
    /// wire format: a pointer re-enters this routine at its target.
    fn read_name(&self, pos: usize, name: &mut String, hops: usize) -> Option<usize> {
        if hops > MAX_POINTER_HOPS {
            return None;
        }

        let start = pos;
        let mut pos = pos;
        loop {
            let len = *self.data.get(pos)?;

            if len & 0xC0 == 0xC0 {
                let low = *self.data.get(pos + 1)?;
                let target = self.base + ((((len & 0x3F) as usize) << 8) | low as usize);
                self.read_name(target, name, hops + 1)?;
                return Some(pos + 2 - start);
            }
            if len & 0xC0 != 0 {
                // 0x40/0x80 label types are not defined for this use.
                return None;
            }
            if len == 0 {
                return Some(pos + 1 - start);
            }

            let label = pos + 1;
            let end = label + len as usize;
            if end > self.data.len() {
                return None;
            }
            if !name.is_empty() {
                name.push('.');
            }
            name.extend(self.data[label..end].iter().map(|&b| b as char));
            pos = end;
        }
    }

    fn read_u16(&self, at: usize) -> Option<u16> {
        let high = *self.data.get(at)?;
        let low = *self.data.get(at + 1)?;
        Some(u16::from_be_bytes([high, low]))
    }
}
