// The on-disk `.gidx` format and the in-memory sub-indexes built on top of
// it. Entries are the source of truth; every sub-index is a deterministic,
// rebuildable projection of `entries` (see `rebuild_subindexes`).

pub mod builder;
pub mod entry;

pub use builder::MessageIndexBuilder;
pub use entry::MessageIndexEntry;

use crate::error::{MailboxError, Result};
use crate::flag::Flag;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Read, Write};
use std::path;

const MAGIC: &[u8; 4] = b"GIDX";
const VERSION: u16 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddressKind {
  From,
  To,
  Cc,
  Bcc,
}

pub struct MessageIndex {
  entries: BTreeMap<u64, MessageIndexEntry>,

  flag_bitsets: BTreeMap<Flag, BTreeSet<u64>>,
  internal_date_index: BTreeMap<i64, BTreeSet<u64>>,
  sent_date_index: BTreeMap<i64, BTreeSet<u64>>,
  size_index: BTreeMap<u64, BTreeSet<u64>>,
  address_index: BTreeMap<AddressKind, BTreeMap<String, BTreeSet<u64>>>,
  keyword_index: BTreeMap<String, BTreeSet<u64>>,

  uidvalidity: i64,
  uidnext: u64,
  dirty: bool,
}

impl MessageIndex {
  pub fn new(uidvalidity: i64, uidnext: u64) -> Self {
    MessageIndex {
      entries: BTreeMap::new(),
      flag_bitsets: BTreeMap::new(),
      internal_date_index: BTreeMap::new(),
      sent_date_index: BTreeMap::new(),
      size_index: BTreeMap::new(),
      address_index: BTreeMap::new(),
      keyword_index: BTreeMap::new(),
      uidvalidity,
      uidnext,
      dirty: false,
    }
  }

  pub fn uidvalidity(&self) -> i64 {
    self.uidvalidity
  }

  pub fn uidnext(&self) -> u64 {
    self.uidnext
  }

  pub fn is_dirty(&self) -> bool {
    self.dirty
  }

  pub fn get_entry_count(&self) -> usize {
    self.entries.len()
  }

  pub fn get_entry_by_uid(&self, uid: u64) -> Option<&MessageIndexEntry> {
    self.entries.get(&uid)
  }

  /// Entries in ascending UID order, i.e. in message-number order.
  pub fn entries(&self) -> impl Iterator<Item = &MessageIndexEntry> {
    self.entries.values()
  }

  pub fn addr_index_for(addr_field: &str) -> Option<&'static str> {
    match addr_field {
      "from" | "to" | "cc" | "bcc" => Some(addr_field),
      _ => None,
    }
  }

  fn reg_addresses(&mut self, kind: AddressKind, field: &str, uid: u64) {
    for addr in field.split_whitespace() {
      self
        .address_index
        .entry(kind)
        .or_default()
        .entry(addr.to_string())
        .or_default()
        .insert(uid);
    }
  }

  fn unreg_addresses(&mut self, kind: AddressKind, field: &str, uid: u64) {
    if let Some(by_addr) = self.address_index.get_mut(&kind) {
      for addr in field.split_whitespace() {
        if let Some(set) = by_addr.get_mut(addr) {
          set.remove(&uid);
          if set.is_empty() {
            by_addr.remove(addr);
          }
        }
      }
    }
  }

  pub fn add_entry(&mut self, entry: MessageIndexEntry) {
    let uid = entry.uid;
    self.flag_bitsets_insert(uid, &entry.flags);
    self.internal_date_index.entry(entry.internal_date_ms).or_default().insert(uid);
    if let Some(sent) = entry.sent_date_ms {
      self.sent_date_index.entry(sent).or_default().insert(uid);
    }
    self.size_index.entry(entry.size).or_default().insert(uid);
    self.reg_addresses(AddressKind::From, &entry.from, uid);
    self.reg_addresses(AddressKind::To, &entry.to, uid);
    self.reg_addresses(AddressKind::Cc, &entry.cc, uid);
    self.reg_addresses(AddressKind::Bcc, &entry.bcc, uid);
    for keyword in entry.keywords.iter() {
      self.keyword_index.entry(keyword.clone()).or_default().insert(uid);
    }
    self.entries.insert(uid, entry);
    self.uidnext = self.uidnext.max(uid + 1);
    self.dirty = true;
  }

  fn flag_bitsets_insert(&mut self, uid: u64, flags: &BTreeSet<Flag>) {
    for flag in flags {
      self.flag_bitsets.entry(*flag).or_default().insert(uid);
    }
  }

  fn flag_bitsets_remove(&mut self, uid: u64, flags: &BTreeSet<Flag>) {
    for flag in flags {
      if let Some(set) = self.flag_bitsets.get_mut(flag) {
        set.remove(&uid);
      }
    }
  }

  pub fn remove_entry(&mut self, uid: u64) {
    let Some(entry) = self.entries.remove(&uid) else {
      return;
    };
    self.flag_bitsets_remove(uid, &entry.flags);
    if let Some(set) = self.internal_date_index.get_mut(&entry.internal_date_ms) {
      set.remove(&uid);
    }
    if let Some(sent) = entry.sent_date_ms {
      if let Some(set) = self.sent_date_index.get_mut(&sent) {
        set.remove(&uid);
      }
    }
    if let Some(set) = self.size_index.get_mut(&entry.size) {
      set.remove(&uid);
    }
    self.unreg_addresses(AddressKind::From, &entry.from, uid);
    self.unreg_addresses(AddressKind::To, &entry.to, uid);
    self.unreg_addresses(AddressKind::Cc, &entry.cc, uid);
    self.unreg_addresses(AddressKind::Bcc, &entry.bcc, uid);
    for keyword in entry.keywords.iter() {
      if let Some(set) = self.keyword_index.get_mut(keyword) {
        set.remove(&uid);
      }
    }
    self.dirty = true;
  }

  /// Replaces an entry with `f(old_entry)`, keeping every sub-index
  /// consistent. Implemented as remove-then-add rather than patching
  /// individual sub-indexes in place, so flag and keyword changes (or both
  /// at once) can share one correct code path.
  pub fn update_entry(&mut self, uid: u64, f: impl FnOnce(&MessageIndexEntry) -> MessageIndexEntry) {
    let Some(entry) = self.entries.get(&uid) else {
      return;
    };
    let updated = f(entry);
    self.remove_entry(uid);
    self.add_entry(updated);
  }

  pub fn update_flags(&mut self, uid: u64, new_flags: BTreeSet<Flag>) {
    self.update_entry(uid, |entry| entry.with_flags(new_flags.clone()));
  }

  pub fn update_keywords(&mut self, uid: u64, new_keywords: Vec<String>) {
    self.update_entry(uid, |entry| entry.with_keywords(new_keywords.clone()));
  }

  /// Candidate-set producers. These are exact projections of `entries`, so
  /// they are safe to use for pre-selection before full predicate
  /// evaluation (§4.6).
  pub fn match_by_flag(&self, flag: Flag) -> BTreeSet<u64> {
    self.flag_bitsets.get(&flag).cloned().unwrap_or_default()
  }

  pub fn range_by_internal_date(&self, lo: i64, hi: i64) -> BTreeSet<u64> {
    self
      .internal_date_index
      .range(lo..hi)
      .flat_map(|(_, uids)| uids.iter().copied())
      .collect()
  }

  pub fn range_by_sent_date(&self, lo: i64, hi: i64) -> BTreeSet<u64> {
    self
      .sent_date_index
      .range(lo..hi)
      .flat_map(|(_, uids)| uids.iter().copied())
      .collect()
  }

  pub fn range_by_size(&self, lo: u64, hi: u64) -> BTreeSet<u64> {
    self
      .size_index
      .range(lo..hi)
      .flat_map(|(_, uids)| uids.iter().copied())
      .collect()
  }

  pub fn by_address(&self, kind: AddressKind, addr: &str) -> BTreeSet<u64> {
    self
      .address_index
      .get(&kind)
      .and_then(|by_addr| by_addr.get(addr))
      .cloned()
      .unwrap_or_default()
  }

  pub fn by_keyword(&self, keyword: &str) -> BTreeSet<u64> {
    self.keyword_index.get(keyword).cloned().unwrap_or_default()
  }

  // ---- .gidx persistence ----

  pub fn save(&mut self, path: &path::Path) -> Result<()> {
    let mut entry_section = Vec::new();
    for entry in self.entries.values() {
      write_entry_record(&mut entry_section, entry);
    }
    let entry_crc = crc32fast::hash(&entry_section);

    let mut header = Vec::new();
    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&VERSION.to_be_bytes());
    header.extend_from_slice(&0u16.to_be_bytes()); // flags, reserved
    header.extend_from_slice(&(self.uidvalidity as u64).to_be_bytes());
    header.extend_from_slice(&self.uidnext.to_be_bytes());
    header.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
    let header_crc = crc32fast::hash(&header[4..]); // everything after magic

    let mut out = Vec::new();
    out.extend_from_slice(&header);
    out.extend_from_slice(&header_crc.to_be_bytes());
    out.extend_from_slice(&entry_section);
    out.extend_from_slice(&entry_crc.to_be_bytes());

    let tmp_path = path.with_extension("gidx.tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(&out)?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    self.dirty = false;
    Ok(())
  }

  /// Loads and validates a `.gidx` file, checking magic/version/CRCs and
  /// that the stored `uidvalidity` matches the mailbox's current one. Any
  /// failure returns `CorruptIndex`; the caller (Mailbox) is expected to
  /// rebuild from the maildir in that case.
  pub fn load(path: &path::Path, expected_uidvalidity: i64) -> Result<Self> {
    let mut file = fs::File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    Self::parse(&data, expected_uidvalidity)
  }

  fn parse(data: &[u8], expected_uidvalidity: i64) -> Result<Self> {
    let corrupt = |reason: &str| MailboxError::CorruptIndex(reason.to_string());

    if data.len() < 4 + 2 + 2 + 8 + 8 + 4 + 4 {
      return Err(corrupt("file too short for a header"));
    }
    if &data[0..4] != MAGIC {
      return Err(corrupt("bad magic"));
    }
    let version = u16::from_be_bytes(data[4..6].try_into().unwrap());
    if version != VERSION {
      return Err(corrupt("unsupported version"));
    }
    let header_end = 4 + 2 + 2 + 8 + 8 + 4;
    let header_crc_expected = u32::from_be_bytes(data[header_end..header_end + 4].try_into().unwrap());
    let header_crc_actual = crc32fast::hash(&data[4..header_end]);
    if header_crc_expected != header_crc_actual {
      return Err(corrupt("header CRC mismatch"));
    }

    let uidvalidity = u64::from_be_bytes(data[8..16].try_into().unwrap()) as i64;
    let uidnext = u64::from_be_bytes(data[16..24].try_into().unwrap());
    let entry_count = u32::from_be_bytes(data[24..28].try_into().unwrap()) as usize;

    if uidvalidity != expected_uidvalidity {
      return Err(corrupt("uidvalidity mismatch"));
    }

    let entry_section_start = header_end + 4;
    if data.len() < entry_section_start + 4 {
      return Err(corrupt("file too short for trailer"));
    }
    let entry_section_end = data.len() - 4;
    let entry_section = &data[entry_section_start..entry_section_end];
    let trailer_crc_expected = u32::from_be_bytes(data[entry_section_end..].try_into().unwrap());
    let trailer_crc_actual = crc32fast::hash(entry_section);
    if trailer_crc_expected != trailer_crc_actual {
      return Err(corrupt("entry section CRC mismatch"));
    }

    let mut index = MessageIndex::new(uidvalidity, uidnext);
    let mut cursor = entry_section;
    for _ in 0..entry_count {
      let (entry, rest) = read_entry_record(cursor).ok_or_else(|| corrupt("truncated entry record"))?;
      cursor = rest;
      index.add_entry(entry);
    }
    if index.entries.len() != entry_count {
      return Err(corrupt("entry count mismatch"));
    }
    index.dirty = false;
    Ok(index)
  }

  /// Reassigns message numbers implicitly: message numbers are always
  /// `entries.values().enumerate()`, so there's nothing to store here — a
  /// no-op that exists so callers have an explicit step after expunge.
  pub fn compact(&self) {}

  pub fn message_number_of(&self, uid: u64) -> Option<usize> {
    self.entries.keys().position(|&u| u == uid).map(|pos| pos + 1)
  }
}

const TAG_UID: u8 = 1;
const TAG_SIZE: u8 = 2;
const TAG_INTERNAL_DATE: u8 = 3;
const TAG_SENT_DATE: u8 = 4;
const TAG_FLAGS: u8 = 5;
const TAG_LOCATION: u8 = 6;
const TAG_FROM: u8 = 7;
const TAG_TO: u8 = 8;
const TAG_CC: u8 = 9;
const TAG_BCC: u8 = 10;
const TAG_SUBJECT: u8 = 11;
const TAG_MESSAGE_ID: u8 = 12;
const TAG_KEYWORDS: u8 = 13;

const KEYWORD_SEPARATOR: char = '\u{1f}';

fn flags_to_bitmask(flags: &BTreeSet<Flag>) -> u8 {
  let mut mask = 0u8;
  for flag in flags {
    if let Some(bit) = persistent_bit(*flag) {
      mask |= 1 << bit;
    }
  }
  mask
}

fn bitmask_to_flags(mask: u8) -> BTreeSet<Flag> {
  crate::flag::PERSISTENT_FLAGS
    .iter()
    .enumerate()
    .filter(|(bit, _)| mask & (1 << bit) != 0)
    .map(|(_, flag)| *flag)
    .collect()
}

fn persistent_bit(flag: Flag) -> Option<usize> {
  crate::flag::PERSISTENT_FLAGS.iter().position(|f| *f == flag)
}

fn write_field(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
  out.push(tag);
  out.extend_from_slice(&(value.len() as u32).to_be_bytes());
  out.extend_from_slice(value);
}

fn write_entry_record(out: &mut Vec<u8>, entry: &MessageIndexEntry) {
  let mut body = Vec::new();
  write_field(&mut body, TAG_UID, &entry.uid.to_be_bytes());
  write_field(&mut body, TAG_SIZE, &entry.size.to_be_bytes());
  write_field(&mut body, TAG_INTERNAL_DATE, &entry.internal_date_ms.to_be_bytes());
  if let Some(sent) = entry.sent_date_ms {
    write_field(&mut body, TAG_SENT_DATE, &sent.to_be_bytes());
  }
  write_field(&mut body, TAG_FLAGS, &[flags_to_bitmask(&entry.flags)]);
  write_field(&mut body, TAG_LOCATION, entry.location.as_bytes());
  write_field(&mut body, TAG_FROM, entry.from.as_bytes());
  write_field(&mut body, TAG_TO, entry.to.as_bytes());
  write_field(&mut body, TAG_CC, entry.cc.as_bytes());
  write_field(&mut body, TAG_BCC, entry.bcc.as_bytes());
  write_field(&mut body, TAG_SUBJECT, entry.subject.as_bytes());
  write_field(&mut body, TAG_MESSAGE_ID, entry.message_id.as_bytes());
  let keywords = entry.keywords.join(&KEYWORD_SEPARATOR.to_string());
  write_field(&mut body, TAG_KEYWORDS, keywords.as_bytes());

  out.extend_from_slice(&(body.len() as u32).to_be_bytes());
  out.extend_from_slice(&body);
}

fn read_entry_record(data: &[u8]) -> Option<(MessageIndexEntry, &[u8])> {
  if data.len() < 4 {
    return None;
  }
  let len = u32::from_be_bytes(data[0..4].try_into().ok()?) as usize;
  let body_start = 4;
  if data.len() < body_start + len {
    return None;
  }
  let body = &data[body_start..body_start + len];
  let rest = &data[body_start + len..];

  let mut uid = None;
  let mut size = None;
  let mut internal_date_ms = None;
  let mut sent_date_ms = None;
  let mut flags = BTreeSet::new();
  let mut location = String::new();
  let mut from = String::new();
  let mut to = String::new();
  let mut cc = String::new();
  let mut bcc = String::new();
  let mut subject = String::new();
  let mut message_id = String::new();
  let mut keywords = Vec::new();

  let mut cursor = body;
  while !cursor.is_empty() {
    if cursor.len() < 5 {
      return None;
    }
    let tag = cursor[0];
    let value_len = u32::from_be_bytes(cursor[1..5].try_into().ok()?) as usize;
    if cursor.len() < 5 + value_len {
      return None;
    }
    let value = &cursor[5..5 + value_len];
    cursor = &cursor[5 + value_len..];
    match tag {
      TAG_UID => uid = Some(u64::from_be_bytes(value.try_into().ok()?)),
      TAG_SIZE => size = Some(u64::from_be_bytes(value.try_into().ok()?)),
      TAG_INTERNAL_DATE => internal_date_ms = Some(i64::from_be_bytes(value.try_into().ok()?)),
      TAG_SENT_DATE => sent_date_ms = Some(i64::from_be_bytes(value.try_into().ok()?)),
      TAG_FLAGS => flags = bitmask_to_flags(*value.first()?),
      TAG_LOCATION => location = String::from_utf8_lossy(value).into_owned(),
      TAG_FROM => from = String::from_utf8_lossy(value).into_owned(),
      TAG_TO => to = String::from_utf8_lossy(value).into_owned(),
      TAG_CC => cc = String::from_utf8_lossy(value).into_owned(),
      TAG_BCC => bcc = String::from_utf8_lossy(value).into_owned(),
      TAG_SUBJECT => subject = String::from_utf8_lossy(value).into_owned(),
      TAG_MESSAGE_ID => message_id = String::from_utf8_lossy(value).into_owned(),
      TAG_KEYWORDS => {
        let joined = String::from_utf8_lossy(value).into_owned();
        if !joined.is_empty() {
          keywords = joined.split(KEYWORD_SEPARATOR).map(str::to_string).collect();
        }
      }
      _ => (), // unknown tag: forward-compat, skip
    }
  }

  let entry = MessageIndexEntry {
    uid: uid?,
    size: size?,
    internal_date_ms: internal_date_ms?,
    sent_date_ms,
    flags,
    location,
    from,
    to,
    cc,
    bcc,
    subject,
    message_id,
    keywords,
  };
  Some((entry, rest))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_entry(uid: u64) -> MessageIndexEntry {
    MessageIndexEntry {
      uid,
      size: 100,
      internal_date_ms: 1_000,
      sent_date_ms: Some(2_000),
      flags: BTreeSet::from([Flag::Seen]),
      location: format!("cur/{uid}"),
      from: "a@x.com".to_string(),
      to: "b@y.com".to_string(),
      cc: String::new(),
      bcc: String::new(),
      subject: "hello".to_string(),
      message_id: "<1@x>".to_string(),
      keywords: vec!["important".to_string()],
    }
  }

  #[test]
  fn add_and_query_subindexes() {
    let mut index = MessageIndex::new(1, 1);
    index.add_entry(sample_entry(1));
    index.add_entry(sample_entry(2));
    assert_eq!(index.get_entry_count(), 2);
    assert_eq!(index.match_by_flag(Flag::Seen), BTreeSet::from([1, 2]));
    assert_eq!(index.by_address(AddressKind::From, "a@x.com"), BTreeSet::from([1, 2]));
    assert_eq!(index.by_keyword("important"), BTreeSet::from([1, 2]));
    assert_eq!(index.range_by_size(0, 200), BTreeSet::from([1, 2]));
  }

  #[test]
  fn remove_entry_clears_all_subindexes() {
    let mut index = MessageIndex::new(1, 3);
    index.add_entry(sample_entry(1));
    index.add_entry(sample_entry(2));
    index.remove_entry(1);
    assert!(index.get_entry_by_uid(1).is_none());
    assert_eq!(index.match_by_flag(Flag::Seen), BTreeSet::from([2]));
    assert_eq!(index.by_address(AddressKind::From, "a@x.com"), BTreeSet::from([2]));
    assert_eq!(index.by_keyword("important"), BTreeSet::from([2]));
  }

  #[test]
  fn update_flags_leaves_other_subindexes_untouched() {
    let mut index = MessageIndex::new(1, 2);
    index.add_entry(sample_entry(1));
    index.update_flags(1, BTreeSet::from([Flag::Deleted]));
    assert_eq!(index.match_by_flag(Flag::Seen), BTreeSet::new());
    assert_eq!(index.match_by_flag(Flag::Deleted), BTreeSet::from([1]));
    assert_eq!(index.by_keyword("important"), BTreeSet::from([1]));
  }

  #[test]
  fn save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".gidx");
    let mut index = MessageIndex::new(42, 3);
    index.add_entry(sample_entry(1));
    index.add_entry(sample_entry(2));
    index.save(&path).unwrap();

    let loaded = MessageIndex::load(&path, 42).unwrap();
    assert_eq!(loaded.uidvalidity(), 42);
    assert_eq!(loaded.get_entry_count(), 2);
    assert_eq!(loaded.get_entry_by_uid(1), index.get_entry_by_uid(1));
    assert_eq!(loaded.match_by_flag(Flag::Seen), BTreeSet::from([1, 2]));
  }

  #[test]
  fn corrupted_crc_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".gidx");
    let mut index = MessageIndex::new(42, 2);
    index.add_entry(sample_entry(1));
    index.save(&path).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(MessageIndex::load(&path, 42), Err(MailboxError::CorruptIndex(_))));
  }

  #[test]
  fn uidvalidity_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".gidx");
    let mut index = MessageIndex::new(42, 2);
    index.add_entry(sample_entry(1));
    index.save(&path).unwrap();

    assert!(matches!(MessageIndex::load(&path, 43), Err(MailboxError::CorruptIndex(_))));
  }
}
