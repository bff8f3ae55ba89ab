// https://cr.yp.to/proto/maildir.html - Maildir
// https://www.courier-mta.org/imap/README.maildirquota.html - Maildir++ flag/keyword suffix
//
// <timestamp>.<uniquifier>[,S=<size>][:2,<letters>]
//
// The base filename (timestamp + uniquifier + size tag) is the message's
// stable on-disk identity; flags/keywords live only in the `:2,` suffix and
// change by rename, never by rewriting the base.

use crate::error::{MailboxError, Result};
use crate::flag::Flag;
use std::collections::BTreeSet;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time;

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn host_identifier() -> String {
  std::env::var("HOSTNAME")
    .ok()
    .filter(|host| !host.is_empty())
    .map(|host| {
      host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
    })
    .unwrap_or_else(|| "localhost".to_string())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaildirFilename {
  pub timestamp: i64,
  pub uniquifier: String,
  pub size: Option<u64>,
  pub flags: BTreeSet<Flag>,
  pub keyword_indices: BTreeSet<u8>,
}

impl MaildirFilename {
  /// Parses a filename as found in `cur/`, `new/` or `tmp/`. Messages in
  /// `new/` may omit the `:2,` suffix entirely; that is accepted here (an
  /// absent suffix just means no flags and no keywords).
  pub fn parse(filename: &str) -> Result<MaildirFilename> {
    grammar::filename(filename).map_err(|_| MailboxError::MalformedName(filename.to_string()))
  }

  /// The stable part of the filename: identifies the message independently
  /// of its current flag/keyword state.
  pub fn base(&self) -> String {
    match self.size {
      Some(size) => format!("{}.{},S={}", self.timestamp, self.uniquifier, size),
      None => format!("{}.{}", self.timestamp, self.uniquifier),
    }
  }

  /// The full on-disk name, flags and keywords rendered in the canonical
  /// sorted order (flag letters first, then keyword letters).
  pub fn render(&self) -> String {
    let mut flag_letters: Vec<char> = self.flags.iter().filter_map(|flag| flag.letter()).collect();
    flag_letters.sort_unstable();
    let mut letters: String = flag_letters.into_iter().collect();
    for index in self.keyword_indices.iter() {
      letters.push((b'a' + index) as char);
    }
    format!("{}:2,{}", self.base(), letters)
  }

  /// Builds a fresh filename for a newly delivered message, generating a
  /// uniquifier from the current time, a process-unique counter and a host
  /// identifier so that two deliveries within the same second never
  /// collide, even across processes on the same host.
  pub fn generate(size: u64, flags: BTreeSet<Flag>, keyword_indices: BTreeSet<u8>) -> MaildirFilename {
    let timestamp = time::SystemTime::now()
      .duration_since(time::UNIX_EPOCH)
      .map(|d| d.as_secs() as i64)
      .unwrap_or(0);
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    let uniquifier = format!("R{}P{}Q{}", counter, process::id(), host_identifier());
    MaildirFilename {
      timestamp,
      uniquifier,
      size: Some(size),
      flags,
      keyword_indices,
    }
  }

  /// A copy of this filename with a different flag/keyword set, same base
  /// identity. Used to compute the rename target for flag mutations.
  pub fn with_flags(&self, flags: BTreeSet<Flag>, keyword_indices: BTreeSet<u8>) -> MaildirFilename {
    MaildirFilename {
      flags,
      keyword_indices,
      ..self.clone()
    }
  }
}

peg::parser! {
  grammar grammar() for str {
    rule digits() -> &'input str
      = s:$(['0'..='9']+) { s }

    rule uniq_char() -> char
      = c:['A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '_' | '-'] { c }

    rule uniquifier() -> &'input str
      = s:$(uniq_char()+) { s }

    rule size() -> u64
      = ",S=" n:digits() { n.parse().unwrap() }

    rule letter() -> char
      = c:['A'..='Z' | 'a'..='z'] { c }

    rule suffix() -> &'input str
      = ":2," letters:$(letter()*) { letters }

    pub rule filename() -> super::MaildirFilename
      = ts:digits() "." uniq:uniquifier() size:size()? suffix:suffix()? {
        let mut flags = std::collections::BTreeSet::new();
        let mut keyword_indices = std::collections::BTreeSet::new();
        for c in suffix.unwrap_or("").chars() {
          if c.is_ascii_uppercase() {
            if let Some(flag) = super::Flag::from_letter(c) {
              flags.insert(flag);
            }
          } else if c.is_ascii_lowercase() {
            keyword_indices.insert(c as u8 - b'a');
          }
        }
        super::MaildirFilename {
          timestamp: ts.parse().unwrap_or(0),
          uniquifier: uniq.to_string(),
          size,
          flags,
          keyword_indices,
        }
      }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_full() {
    let name = MaildirFilename::parse("1657000000.abcXYZ123,S=512:2,FS").unwrap();
    assert_eq!(name.timestamp, 1657000000);
    assert_eq!(name.uniquifier, "abcXYZ123");
    assert_eq!(name.size, Some(512));
    assert!(name.flags.contains(&Flag::Seen));
    assert!(name.flags.contains(&Flag::Flagged));
    assert_eq!(name.flags.len(), 2);
    assert!(name.keyword_indices.is_empty());
  }

  #[test]
  fn parse_without_suffix() {
    let name = MaildirFilename::parse("1657000000.abc").unwrap();
    assert!(name.flags.is_empty());
    assert!(name.size.is_none());
    assert_eq!(name.base(), "1657000000.abc");
  }

  #[test]
  fn parse_with_keywords() {
    let name = MaildirFilename::parse("1657000000.abc:2,Sab").unwrap();
    assert!(name.flags.contains(&Flag::Seen));
    assert_eq!(name.keyword_indices, BTreeSet::from([0, 1]));
  }

  #[test]
  fn render_sorts_flags_then_keywords() {
    let mut flags = BTreeSet::new();
    flags.insert(Flag::Deleted);
    flags.insert(Flag::Draft);
    let mut keywords = BTreeSet::new();
    keywords.insert(2u8);
    keywords.insert(0u8);
    let name = MaildirFilename {
      timestamp: 100,
      uniquifier: "x".to_string(),
      size: Some(4),
      flags,
      keyword_indices: keywords,
    };
    assert_eq!(name.render(), "100.x,S=4:2,DTac");
  }

  #[test]
  fn rejects_malformed() {
    assert!(MaildirFilename::parse("not-a-filename").is_err());
    assert!(MaildirFilename::parse("").is_err());
  }

  #[test]
  fn generate_is_unique_across_calls() {
    let a = MaildirFilename::generate(10, BTreeSet::new(), BTreeSet::new());
    let b = MaildirFilename::generate(10, BTreeSet::new(), BTreeSet::new());
    assert_ne!(a.uniquifier, b.uniquifier);
  }

  #[test]
  fn with_flags_preserves_base() {
    let original = MaildirFilename::generate(10, BTreeSet::new(), BTreeSet::new());
    let mut flags = BTreeSet::new();
    flags.insert(Flag::Seen);
    let updated = original.with_flags(flags, BTreeSet::new());
    assert_eq!(original.base(), updated.base());
    assert_ne!(original.render(), updated.render());
  }
}
