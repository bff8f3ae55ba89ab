// The per-session view of one mailbox: lifecycle, listing, fetching, flag
// mutation, expunge and the three-phase append state machine, plus search.
// `MailboxStore` (store.rs) is the layer above that maps IMAP mailbox names
// to `Mailbox` instances.

use crate::error::{MailboxError, Result};
use crate::flag::{Flag, PERSISTENT_FLAGS};
use crate::index::{MessageIndex, MessageIndexBuilder, MessageIndexEntry};
use crate::keywords::Keywords;
use crate::maildir::{Descriptor, Maildir};
use crate::search::{IndexedMessageContext, MessageContext, ParsedMessageContext, SearchCriteria};
use crate::time::now_ms;
use crate::uidlist::UidList;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read as _;
use std::path::{Path, PathBuf};

struct PendingAppend {
  flags: BTreeSet<Flag>,
  keywords: Vec<String>,
  internal_date_ms: i64,
  buffer: Vec<u8>,
}

pub struct Mailbox {
  name: String,
  read_only: bool,
  maildir: Maildir,
  index_path: PathBuf,
  uidlist: UidList,
  keywords: Keywords,
  index: MessageIndex,
  descriptors: BTreeMap<u64, Descriptor>,
  deleted_set: BTreeSet<u64>,
  pending_append: Option<PendingAppend>,
}

impl Mailbox {
  /// Opens a mailbox at `path`: normalizes `new/` into `cur/` (skipped on a
  /// read-only open, per the shared-resource policy), loads or rebuilds the
  /// UID list, keyword table and search index, and rehydrates `deletedSet`
  /// from messages that already carry `\Deleted` on disk.
  pub fn open(path: &Path, name: &str, root: bool, read_only: bool) -> Result<Self> {
    let maildir = Maildir::open(path, root)?;
    if !read_only {
      maildir.normalize_new()?;
    }
    let live_descriptors = maildir.scan()?;

    let mut uidlist = UidList::load(&path.join(".uidlist"))?;
    let mut keywords = Keywords::load(&path.join(".keywords"))?;

    let index_path = path.join(".gidx");
    log_index_staleness(path, &index_path);
    let mut index = match MessageIndex::load(&index_path, uidlist.uidvalidity()) {
      Ok(index) => index,
      Err(error) => {
        log::warn!("{path:?}: index unusable ({error}), rebuilding");
        MessageIndex::new(uidlist.uidvalidity(), uidlist.uidnext())
      }
    };

    let mut descriptors = BTreeMap::new();
    let mut live_uids = BTreeSet::new();
    for descriptor in live_descriptors {
      let uid = uidlist.assign_uid(&descriptor.base);
      live_uids.insert(uid);
      if index.get_entry_by_uid(uid).is_none() {
        match Self::build_entry(&descriptor, uid, &mut keywords) {
          Ok(entry) => index.add_entry(entry),
          Err(error) => log::warn!("{:?}: failed to index, skipping: {error}", descriptor.path),
        }
      }
      descriptors.insert(uid, descriptor);
    }

    let stale: Vec<u64> = index.entries().map(|entry| entry.uid).filter(|uid| !live_uids.contains(uid)).collect();
    for uid in stale {
      index.remove_entry(uid);
    }

    let deleted_set = index.entries().filter(|entry| entry.flags.contains(&Flag::Deleted)).map(|entry| entry.uid).collect();

    let mut mailbox = Mailbox {
      name: name.to_string(),
      read_only,
      maildir,
      index_path,
      uidlist,
      keywords,
      index,
      descriptors,
      deleted_set,
      pending_append: None,
    };
    mailbox.persist()?;
    Ok(mailbox)
  }

  fn build_entry(descriptor: &Descriptor, uid: u64, keywords: &mut Keywords) -> Result<MessageIndexEntry> {
    let file = fs::File::open(&descriptor.path)?;
    let keyword_strings = keywords.indices_to_keywords(descriptor.keyword_indices());
    let entry = MessageIndexBuilder::build(
      uid,
      descriptor.size,
      descriptor_timestamp_ms(descriptor),
      descriptor.flags().clone(),
      descriptor.base.clone(),
      file,
    )?;
    Ok(entry.with_keywords(keyword_strings))
  }

  fn persist(&mut self) -> Result<()> {
    if self.read_only {
      return Ok(());
    }
    self.uidlist.save()?;
    self.keywords.save()?;
    if self.index.is_dirty() {
      self.index.save(&self.index_path)?;
    }
    Ok(())
  }

  // ---- metadata ----

  pub fn get_name(&self) -> &str {
    &self.name
  }

  pub fn is_read_only(&self) -> bool {
    self.read_only
  }

  pub fn get_message_count(&self) -> usize {
    self.index.get_entry_count()
  }

  pub fn get_mailbox_size(&self) -> u64 {
    self.index.entries().map(|entry| entry.size).sum()
  }

  pub fn get_uid_validity(&self) -> i64 {
    self.uidlist.uidvalidity()
  }

  pub fn get_uid_next(&self) -> u64 {
    self.uidlist.uidnext()
  }

  pub fn get_permanent_flags(&self) -> Vec<String> {
    let mut flags: Vec<String> = PERSISTENT_FLAGS.iter().map(|flag| flag.to_string()).collect();
    flags.extend(self.keywords.all().iter().cloned());
    flags
  }

  pub fn get_quota_root(&self) -> &str {
    "" // single default quota root per user, see MailboxStore::get_quota_root
  }

  pub fn get_quota(&self) -> Result<(u64, usize)> {
    self.maildir.usage()
  }

  pub fn get_mailbox_attributes(&self) -> Vec<&'static str> {
    if self.get_message_count() == 0 {
      vec!["\\Unmarked"]
    } else {
      vec!["\\Marked"]
    }
  }

  // ---- listing ----

  pub fn get_message_list(&self) -> impl Iterator<Item = (usize, &MessageIndexEntry)> {
    self.index.entries().enumerate().map(|(i, entry)| (i + 1, entry))
  }

  pub fn get_message(&self, msg_num: usize) -> Option<&MessageIndexEntry> {
    self.index.entries().nth(msg_num.checked_sub(1)?)
  }

  fn uid_for_message_number(&self, msg_num: usize) -> Result<u64> {
    self
      .get_message(msg_num)
      .map(|entry| entry.uid)
      .ok_or_else(|| MailboxError::NotFound(format!("message #{msg_num}")))
  }

  fn descriptor_for_uid(&self, uid: u64) -> Result<&Descriptor> {
    self.descriptors.get(&uid).ok_or_else(|| MailboxError::NotFound(uid.to_string()))
  }

  // ---- fetching ----

  pub fn get_message_content(&self, msg_num: usize) -> Result<fs::File> {
    let uid = self.uid_for_message_number(msg_num)?;
    Ok(fs::File::open(&self.descriptor_for_uid(uid)?.path)?)
  }

  /// Headers plus the first `body_lines` lines of the body (LF-terminated;
  /// a trailing partial line without its own LF still counts).
  pub fn get_message_top(&self, msg_num: usize, body_lines: usize) -> Result<Vec<u8>> {
    let uid = self.uid_for_message_number(msg_num)?;
    let data = fs::read(&self.descriptor_for_uid(uid)?.path)?;
    let header_end = find_header_boundary(&data).unwrap_or(data.len());
    let body = &data[header_end..];

    let mut cut = body.len();
    let mut lines_seen = 0;
    for (i, byte) in body.iter().enumerate() {
      if *byte == b'\n' {
        lines_seen += 1;
        if lines_seen == body_lines {
          cut = i + 1;
          break;
        }
      }
    }

    let mut out = data[..header_end].to_vec();
    out.extend_from_slice(&body[..cut]);
    Ok(out)
  }

  // ---- flags ----

  pub fn get_flags(&self, msg_num: usize) -> Result<BTreeSet<Flag>> {
    Ok(self.get_message(msg_num).ok_or_else(|| MailboxError::NotFound(format!("message #{msg_num}")))?.flags.clone())
  }

  pub fn get_keywords(&self, msg_num: usize) -> Result<Vec<String>> {
    Ok(self.get_message(msg_num).ok_or_else(|| MailboxError::NotFound(format!("message #{msg_num}")))?.keywords.clone())
  }

  pub fn set_flags(&mut self, msg_num: usize, add_flags: &BTreeSet<Flag>, remove_flags: &BTreeSet<Flag>, add_keywords: &[String], remove_keywords: &[String]) -> Result<()> {
    if self.read_only {
      return Err(MailboxError::ReadOnly);
    }
    let uid = self.uid_for_message_number(msg_num)?;
    let entry = self.index.get_entry_by_uid(uid).cloned().ok_or_else(|| MailboxError::NotFound(uid.to_string()))?;

    let mut new_flags = entry.flags.clone();
    for flag in add_flags {
      new_flags.insert(*flag);
    }
    for flag in remove_flags {
      new_flags.remove(flag);
    }

    let mut new_keywords = entry.keywords.clone();
    for keyword in add_keywords {
      if !new_keywords.contains(keyword) {
        new_keywords.push(keyword.clone());
      }
    }
    new_keywords.retain(|keyword| !remove_keywords.contains(keyword));

    self.apply_flags_and_keywords(uid, new_flags, new_keywords)
  }

  pub fn replace_flags(&mut self, msg_num: usize, flags: BTreeSet<Flag>, keywords: Vec<String>) -> Result<()> {
    if self.read_only {
      return Err(MailboxError::ReadOnly);
    }
    let uid = self.uid_for_message_number(msg_num)?;
    self.apply_flags_and_keywords(uid, flags, keywords)
  }

  fn apply_flags_and_keywords(&mut self, uid: u64, flags: BTreeSet<Flag>, keywords: Vec<String>) -> Result<()> {
    let keyword_indices = self.keywords.keywords_to_indices(&keywords)?;
    let descriptor = self.descriptor_for_uid(uid)?.clone();
    let renamed = self.maildir.rename_flags(&descriptor, flags.clone(), keyword_indices)?;
    self.descriptors.insert(uid, renamed);
    self.index.update_entry(uid, |entry| entry.with_flags(flags.clone()).with_keywords(keywords.clone()));
    if flags.contains(&Flag::Deleted) {
      self.deleted_set.insert(uid);
    } else {
      self.deleted_set.remove(&uid);
    }
    self.persist()
  }

  // ---- deletion / expunge ----

  pub fn delete_message(&mut self, msg_num: usize) -> Result<()> {
    if self.read_only {
      return Err(MailboxError::ReadOnly);
    }
    let mut flags = BTreeSet::new();
    flags.insert(Flag::Deleted);
    self.set_flags(msg_num, &flags, &BTreeSet::new(), &[], &[])?;
    Ok(())
  }

  pub fn undelete_all(&mut self) -> Result<()> {
    if self.read_only {
      return Err(MailboxError::ReadOnly);
    }
    let uids: Vec<u64> = self.deleted_set.iter().copied().collect();
    let mut remove = BTreeSet::new();
    remove.insert(Flag::Deleted);
    for uid in uids {
      if let Some(msg_num) = self.index.message_number_of(uid) {
        self.set_flags(msg_num, &BTreeSet::new(), &remove, &[], &[])?;
      }
    }
    Ok(())
  }

  /// 1) delete files and UID mappings for `deletedSet`, in reverse
  /// message-number order, recording each one's old message number; 2)
  /// remove the corresponding index entries; 3) compact (renumbering falls
  /// out of the remaining entries' UID order); 4) clear `deletedSet`; 5)
  /// return the expunged numbers ascending.
  pub fn expunge(&mut self) -> Result<Vec<usize>> {
    if self.read_only {
      return Err(MailboxError::ReadOnly);
    }
    let snapshot: Vec<(usize, u64)> = self.index.entries().enumerate().map(|(i, entry)| (i + 1, entry.uid)).collect();

    let mut expunged = Vec::new();
    for (msg_num, uid) in snapshot.into_iter().rev() {
      if !self.deleted_set.contains(&uid) {
        continue;
      }
      if let Some(descriptor) = self.descriptors.remove(&uid) {
        self.maildir.delete(&descriptor)?;
        self.uidlist.remove_uid(&descriptor.base);
      }
      self.index.remove_entry(uid);
      expunged.push(msg_num);
    }
    self.index.compact();
    self.deleted_set.clear();
    expunged.sort_unstable();
    self.persist()?;
    Ok(expunged)
  }

  // ---- append (three-phase) ----

  pub fn start_append_message(&mut self, flags: BTreeSet<Flag>, keywords: Vec<String>, internal_date_ms: Option<i64>) -> Result<()> {
    if self.read_only {
      return Err(MailboxError::ReadOnly);
    }
    if self.pending_append.is_some() {
      return Err(MailboxError::AppendInProgress);
    }
    self.pending_append = Some(PendingAppend {
      flags,
      keywords,
      internal_date_ms: internal_date_ms.unwrap_or_else(now_ms),
      buffer: Vec::new(),
    });
    Ok(())
  }

  pub fn append_message_content(&mut self, data: &[u8]) -> Result<()> {
    let pending = self.pending_append.as_mut().ok_or(MailboxError::NoAppendInProgress)?;
    pending.buffer.extend_from_slice(data);
    Ok(())
  }

  /// Writes the buffered message to `tmp/`, renames it into `cur/`,
  /// assigns a UID and refreshes the index. Returns the new UID.
  pub fn end_append_message(&mut self) -> Result<u64> {
    let pending = self.pending_append.take().ok_or(MailboxError::NoAppendInProgress)?;
    let keyword_indices = self.keywords.keywords_to_indices(&pending.keywords)?;
    let descriptor = self.maildir.deliver(&pending.buffer, pending.flags.clone(), keyword_indices)?;
    let uid = self.uidlist.assign_uid(&descriptor.base);
    let entry = MessageIndexBuilder::build(
      uid,
      descriptor.size,
      pending.internal_date_ms,
      pending.flags.clone(),
      descriptor.base.clone(),
      std::io::Cursor::new(&pending.buffer),
    )?
    .with_keywords(pending.keywords.clone());
    self.index.add_entry(entry);
    self.descriptors.insert(uid, descriptor);
    self.persist()?;
    Ok(uid)
  }

  /// Discards a pending append. Since the buffer only hits `tmp/` at
  /// `end_append_message`, aborting before that point leaves no file to
  /// clean up.
  pub fn abort_append(&mut self) {
    self.pending_append = None;
  }

  // ---- search ----

  pub fn search(&self, criteria: &SearchCriteria) -> Result<Vec<usize>> {
    let search_type = criteria.search_type();
    let mut matched = Vec::new();
    for (msg_num, entry) in self.get_message_list() {
      if self.deleted_set.contains(&entry.uid) {
        continue;
      }
      let indexed_ctx = IndexedMessageContext::new(entry, msg_num);
      let is_match = if indexed_ctx.can_evaluate(search_type) {
        criteria.matches(&indexed_ctx)?
      } else {
        let descriptor = self.descriptor_for_uid(entry.uid)?;
        let parsed_ctx = ParsedMessageContext::load(
          &descriptor.path,
          msg_num,
          entry.uid,
          entry.size,
          entry.flags.clone(),
          entry.keywords.clone(),
          entry.internal_date_ms,
        )?;
        criteria.matches(&parsed_ctx)?
      };
      if is_match {
        matched.push(msg_num);
      }
    }
    Ok(matched)
  }

  /// Discards any pending append and flushes the UID list, keyword table
  /// and index if this session holds write access.
  pub fn close(&mut self, expunge: bool) -> Result<Vec<usize>> {
    self.pending_append = None;
    let expunged = if expunge && !self.read_only { self.expunge()? } else { Vec::new() };
    self.persist()?;
    Ok(expunged)
  }
}

fn descriptor_timestamp_ms(descriptor: &Descriptor) -> i64 {
  descriptor.name.timestamp * 1000
}

/// Purely diagnostic: a `.gidx` noticeably older than the maildir root
/// usually just means messages were delivered since the last save, which
/// `Mailbox::open`'s incremental scan already accounts for. Logged at debug
/// so an operator chasing a real corruption report has a timeline to check.
fn log_index_staleness(maildir_path: &Path, index_path: &Path) {
  let (Ok(maildir_meta), Ok(index_meta)) = (fs::metadata(maildir_path), fs::metadata(index_path)) else {
    return;
  };
  let (Ok(maildir_mtime), Ok(index_mtime)) = (maildir_meta.modified(), index_meta.modified()) else {
    return;
  };
  if let Ok(gap) = maildir_mtime.duration_since(index_mtime) {
    if gap.as_secs() > 60 {
      log::debug!("{maildir_path:?}: .gidx is {}s older than the maildir root", gap.as_secs());
    }
  }
}

fn find_header_boundary(data: &[u8]) -> Option<usize> {
  if let Some(pos) = memchr::memmem::find(data, b"\r\n\r\n") {
    return Some(pos + 4);
  }
  memchr::memmem::find(data, b"\n\n").map(|pos| pos + 2)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_message(subject: &str) -> Vec<u8> {
    format!("From: a@x.com\r\nTo: b@y.com\r\nSubject: {subject}\r\nDate: Mon, 1 Jan 2024 10:00:00 +0000\r\n\r\nbody line one\r\nbody line two\r\nbody line three\r\n").into_bytes()
  }

  #[test]
  fn append_then_list_and_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailbox = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
    mailbox.start_append_message(BTreeSet::new(), Vec::new(), None).unwrap();
    mailbox.append_message_content(&sample_message("hello")).unwrap();
    let uid = mailbox.end_append_message().unwrap();

    assert_eq!(mailbox.get_message_count(), 1);
    let (msg_num, entry) = mailbox.get_message_list().next().unwrap();
    assert_eq!(msg_num, 1);
    assert_eq!(entry.uid, uid);
    assert_eq!(entry.subject, "hello");

    let content = {
      let mut file = mailbox.get_message_content(1).unwrap();
      let mut buf = Vec::new();
      file.read_to_end(&mut buf).unwrap();
      buf
    };
    assert!(content.starts_with(b"From: a@x.com"));
  }

  #[test]
  fn double_start_append_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailbox = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
    mailbox.start_append_message(BTreeSet::new(), Vec::new(), None).unwrap();
    assert!(matches!(mailbox.start_append_message(BTreeSet::new(), Vec::new(), None), Err(MailboxError::AppendInProgress)));
  }

  #[test]
  fn get_message_top_cuts_after_n_body_lines() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailbox = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
    mailbox.start_append_message(BTreeSet::new(), Vec::new(), None).unwrap();
    mailbox.append_message_content(&sample_message("top-test")).unwrap();
    mailbox.end_append_message().unwrap();

    let top = mailbox.get_message_top(1, 1).unwrap();
    let text = String::from_utf8(top).unwrap();
    assert!(text.contains("body line one"));
    assert!(!text.contains("body line two"));
  }

  #[test]
  fn delete_then_expunge_renumbers() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailbox = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
    for subject in ["first", "second", "third"] {
      mailbox.start_append_message(BTreeSet::new(), Vec::new(), None).unwrap();
      mailbox.append_message_content(&sample_message(subject)).unwrap();
      mailbox.end_append_message().unwrap();
    }
    mailbox.delete_message(2).unwrap();
    let expunged = mailbox.expunge().unwrap();
    assert_eq!(expunged, vec![2]);
    assert_eq!(mailbox.get_message_count(), 2);
    let subjects: Vec<&str> = mailbox.get_message_list().map(|(_, e)| e.subject.as_str()).collect();
    assert_eq!(subjects, vec!["first", "third"]);
  }

  #[test]
  fn search_skips_deleted_messages() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailbox = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
    mailbox.start_append_message(BTreeSet::new(), Vec::new(), None).unwrap();
    mailbox.append_message_content(&sample_message("findme")).unwrap();
    mailbox.end_append_message().unwrap();
    mailbox.delete_message(1).unwrap();

    let results = mailbox.search(&SearchCriteria::subject("findme")).unwrap();
    assert!(results.is_empty());
  }

  #[test]
  fn reopen_loads_persisted_state() {
    let dir = tempfile::tempdir().unwrap();
    {
      let mut mailbox = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
      mailbox.start_append_message(BTreeSet::new(), Vec::new(), None).unwrap();
      mailbox.append_message_content(&sample_message("persisted")).unwrap();
      mailbox.end_append_message().unwrap();
    }
    let reopened = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
    assert_eq!(reopened.get_message_count(), 1);
    assert_eq!(reopened.get_message_list().next().unwrap().1.subject, "persisted");
  }

  #[test]
  fn read_only_session_cannot_mutate() {
    let dir = tempfile::tempdir().unwrap();
    {
      let mut mailbox = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
      mailbox.start_append_message(BTreeSet::new(), Vec::new(), None).unwrap();
      mailbox.append_message_content(&sample_message("x")).unwrap();
      mailbox.end_append_message().unwrap();
    }
    let mut reader = Mailbox::open(dir.path(), "INBOX", true, true).unwrap();
    assert!(matches!(reader.delete_message(1), Err(MailboxError::ReadOnly)));
  }
}
