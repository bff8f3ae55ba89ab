// The capability surface predicates read from, and its two implementations:
// one backed purely by index metadata (cheap, no I/O), one that parses the
// on-disk message on demand (covers everything else).

use crate::error::Result;
use crate::flag::Flag;
use crate::index::MessageIndexEntry;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchType {
  Flag,
  Keyword,
  Size,
  InternalDate,
  SentDate,
  IndexedHeader,
  OtherHeader,
  Body,
  Text,
  Identity,
}

pub trait MessageContext {
  fn get_message_number(&self) -> usize;
  fn get_uid(&self) -> u64;
  fn get_size(&self) -> u64;
  fn get_flags(&self) -> &BTreeSet<Flag>;
  fn get_keywords(&self) -> &[String];
  fn get_internal_date(&self) -> i64;
  fn get_sent_date(&self) -> Option<i64>;
  fn get_internal_local_date(&self) -> NaiveDate;
  fn get_sent_local_date(&self) -> Option<NaiveDate>;
  /// Returns the lower-cased value for an indexed header name, or the
  /// empty string if this context can't answer for `name`.
  fn get_header(&self, name: &str) -> Result<String>;
  fn get_headers_text(&self) -> Result<String>;
  fn get_body_text(&self) -> Result<String>;
  fn can_evaluate(&self, search_type: SearchType) -> bool;
}

pub struct IndexedMessageContext<'a> {
  entry: &'a MessageIndexEntry,
  message_number: usize,
}

impl<'a> IndexedMessageContext<'a> {
  pub fn new(entry: &'a MessageIndexEntry, message_number: usize) -> Self {
    IndexedMessageContext { entry, message_number }
  }
}

impl<'a> MessageContext for IndexedMessageContext<'a> {
  fn get_message_number(&self) -> usize {
    self.message_number
  }

  fn get_uid(&self) -> u64 {
    self.entry.uid
  }

  fn get_size(&self) -> u64 {
    self.entry.size
  }

  fn get_flags(&self) -> &BTreeSet<Flag> {
    &self.entry.flags
  }

  fn get_keywords(&self) -> &[String] {
    &self.entry.keywords
  }

  fn get_internal_date(&self) -> i64 {
    self.entry.internal_date_ms
  }

  fn get_sent_date(&self) -> Option<i64> {
    self.entry.sent_date_ms
  }

  fn get_internal_local_date(&self) -> NaiveDate {
    crate::time::local_date_from_ms(self.entry.internal_date_ms)
  }

  fn get_sent_local_date(&self) -> Option<NaiveDate> {
    self.entry.sent_date_ms.map(crate::time::local_date_from_ms)
  }

  fn get_header(&self, name: &str) -> Result<String> {
    let lower = name.to_ascii_lowercase();
    Ok(match lower.as_str() {
      "from" | "sender" => self.entry.from.clone(),
      "to" => self.entry.to.clone(),
      "cc" => self.entry.cc.clone(),
      "bcc" => self.entry.bcc.clone(),
      "subject" => self.entry.subject.clone(),
      "message-id" => self.entry.message_id.clone(),
      _ => String::new(),
    })
  }

  fn get_headers_text(&self) -> Result<String> {
    Ok(String::new())
  }

  fn get_body_text(&self) -> Result<String> {
    Ok(String::new())
  }

  fn can_evaluate(&self, search_type: SearchType) -> bool {
    !matches!(search_type, SearchType::OtherHeader | SearchType::Body | SearchType::Text)
  }
}

pub struct ParsedMessageContext {
  message_number: usize,
  uid: u64,
  headers: Vec<(String, String)>,
  headers_text: String,
  body_text: String,
  size: u64,
  flags: BTreeSet<Flag>,
  keywords: Vec<String>,
  internal_date_ms: i64,
  sent_date_ms: Option<i64>,
}

impl ParsedMessageContext {
  #[allow(clippy::too_many_arguments)]
  pub fn load(
    path: &Path,
    message_number: usize,
    uid: u64,
    size: u64,
    flags: BTreeSet<Flag>,
    keywords: Vec<String>,
    internal_date_ms: i64,
  ) -> Result<Self> {
    let raw = fs::read(path)?;
    let (parsed_headers, body_start) = mailparse::parse_headers(&raw).unwrap_or_default();
    let headers = parsed_headers
      .iter()
      .map(|h| (h.get_key().to_ascii_lowercase(), h.get_value().to_lowercase()))
      .collect();
    let headers_text = String::from_utf8_lossy(&raw[..body_start.min(raw.len())]).to_lowercase();
    let body_text = String::from_utf8_lossy(&raw[body_start.min(raw.len())..]).to_lowercase();
    let sent_date_ms = parsed_headers
      .iter()
      .find(|h| h.get_key().eq_ignore_ascii_case("date"))
      .and_then(|h| mailparse::dateparse(&h.get_value()).ok())
      .map(|secs| secs * 1000);

    Ok(ParsedMessageContext {
      message_number,
      uid,
      headers,
      headers_text,
      body_text,
      size,
      flags,
      keywords,
      internal_date_ms,
      sent_date_ms,
    })
  }
}

impl MessageContext for ParsedMessageContext {
  fn get_message_number(&self) -> usize {
    self.message_number
  }

  fn get_uid(&self) -> u64 {
    self.uid
  }

  fn get_size(&self) -> u64 {
    self.size
  }

  fn get_flags(&self) -> &BTreeSet<Flag> {
    &self.flags
  }

  fn get_keywords(&self) -> &[String] {
    &self.keywords
  }

  fn get_internal_date(&self) -> i64 {
    self.internal_date_ms
  }

  fn get_sent_date(&self) -> Option<i64> {
    self.sent_date_ms
  }

  fn get_internal_local_date(&self) -> NaiveDate {
    crate::time::local_date_from_ms(self.internal_date_ms)
  }

  fn get_sent_local_date(&self) -> Option<NaiveDate> {
    self.sent_date_ms.map(crate::time::local_date_from_ms)
  }

  fn get_header(&self, name: &str) -> Result<String> {
    let lower = name.to_ascii_lowercase();
    Ok(
      self
        .headers
        .iter()
        .find(|(key, _)| *key == lower)
        .map(|(_, value)| value.clone())
        .unwrap_or_default(),
    )
  }

  fn get_headers_text(&self) -> Result<String> {
    Ok(self.headers_text.clone())
  }

  fn get_body_text(&self) -> Result<String> {
    Ok(self.body_text.clone())
  }

  fn can_evaluate(&self, _search_type: SearchType) -> bool {
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::index::MessageIndexEntry;

  fn sample_entry() -> MessageIndexEntry {
    MessageIndexEntry {
      uid: 5,
      size: 42,
      internal_date_ms: 0,
      sent_date_ms: None,
      flags: BTreeSet::from([Flag::Seen]),
      location: "cur/5".to_string(),
      from: "alice@example.com".to_string(),
      to: String::new(),
      cc: String::new(),
      bcc: String::new(),
      subject: "hi".to_string(),
      message_id: String::new(),
      keywords: Vec::new(),
    }
  }

  #[test]
  fn indexed_context_answers_indexed_headers_only() {
    let entry = sample_entry();
    let ctx = IndexedMessageContext::new(&entry, 1);
    assert_eq!(ctx.get_header("from").unwrap(), "alice@example.com");
    assert_eq!(ctx.get_header("x-custom").unwrap(), "");
    assert!(ctx.can_evaluate(SearchType::Flag));
    assert!(!ctx.can_evaluate(SearchType::Body));
  }

  #[test]
  fn parsed_context_covers_body_and_arbitrary_headers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("msg");
    fs::write(&path, b"From: a@x.com\r\nX-Custom: yes\r\n\r\nhello body\r\n").unwrap();
    let ctx = ParsedMessageContext::load(&path, 1, 1, 10, BTreeSet::new(), Vec::new(), 0).unwrap();
    assert_eq!(ctx.get_header("x-custom").unwrap(), "yes");
    assert!(ctx.get_body_text().unwrap().contains("hello body"));
    assert!(ctx.can_evaluate(SearchType::Body));
  }
}
