use crate::flag::Flag;
use std::collections::BTreeSet;

/// One message's searchable metadata: an immutable value object. Flag
/// changes produce a mutated copy rather than mutating in place (see
/// `MessageIndex::update_flags`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageIndexEntry {
  pub uid: u64,
  pub size: u64,
  pub internal_date_ms: i64,
  pub sent_date_ms: Option<i64>,
  pub flags: BTreeSet<Flag>,
  pub location: String,
  pub from: String,
  pub to: String,
  pub cc: String,
  pub bcc: String,
  pub subject: String,
  pub message_id: String,
  pub keywords: Vec<String>,
}

impl MessageIndexEntry {
  pub fn with_flags(&self, flags: BTreeSet<Flag>) -> MessageIndexEntry {
    MessageIndexEntry {
      flags,
      ..self.clone()
    }
  }

  pub fn with_keywords(&self, keywords: Vec<String>) -> MessageIndexEntry {
    MessageIndexEntry {
      keywords,
      ..self.clone()
    }
  }
}
