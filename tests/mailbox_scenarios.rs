use gumdrop_mailbox::flag::Flag;
use gumdrop_mailbox::search::SearchCriteria;
use gumdrop_mailbox::{Mailbox, MailboxError, MailboxStore};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::fs;

mod common;
use common::{append, message};

#[test_log::test]
fn s1_deliver_and_search_round_trip() {
  let dir = tempfile::tempdir().unwrap();
  let mut mailbox = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();

  let uid = append(
    &mut mailbox,
    &message("Alice <alice@x.com>", "b@y.com", "hello world", "Mon, 4 Jul 2022 13:09:53 +0900", "hi\r\n"),
  )
  .unwrap();
  assert_eq!(uid, 1);

  assert_eq!(mailbox.search(&SearchCriteria::from_addr("alice")).unwrap(), vec![1]);
  assert_eq!(mailbox.search(&SearchCriteria::subject("HELLO")).unwrap(), vec![1]);

  let since_4th = SearchCriteria::SentSince(chrono::NaiveDate::from_ymd_opt(2022, 7, 4).unwrap());
  assert_eq!(mailbox.search(&since_4th).unwrap(), vec![1]);

  let since_5th = SearchCriteria::SentSince(chrono::NaiveDate::from_ymd_opt(2022, 7, 5).unwrap());
  assert_eq!(mailbox.search(&since_5th).unwrap(), Vec::<usize>::new());
}

#[test_log::test]
fn s2_flag_change_is_atomic_rename_and_visible_to_search() {
  let dir = tempfile::tempdir().unwrap();
  let mut mailbox = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
  append(&mut mailbox, &message("a@x.com", "b@y.com", "subject", "Mon, 1 Jan 2024 00:00:00 +0000", "body\r\n")).unwrap();

  let mut add = BTreeSet::new();
  add.insert(Flag::Seen);
  add.insert(Flag::Flagged);
  mailbox.set_flags(1, &add, &BTreeSet::new(), &[], &[]).unwrap();

  assert_eq!(mailbox.get_flags(1).unwrap(), add);
  assert_eq!(mailbox.search(&SearchCriteria::HasFlag(Flag::Seen)).unwrap(), vec![1]);
  assert_eq!(mailbox.search(&SearchCriteria::NotFlag(Flag::Seen)).unwrap(), Vec::<usize>::new());

  let cur_dir = dir.path().join("cur");
  let filenames: Vec<String> = fs::read_dir(&cur_dir).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
  assert!(filenames.iter().any(|name| name.ends_with(":2,FS")), "filenames: {filenames:?}");
}

#[test_log::test]
fn s3_expunge_renumbers_survivors() {
  let dir = tempfile::tempdir().unwrap();
  let mut mailbox = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
  for n in 1..=4 {
    append(&mut mailbox, &message("a@x.com", "b@y.com", &format!("msg{n}"), "Mon, 1 Jan 2024 00:00:00 +0000", "body\r\n")).unwrap();
  }

  mailbox.delete_message(2).unwrap();
  mailbox.delete_message(3).unwrap();
  let expunged = mailbox.expunge().unwrap();
  assert_eq!(expunged, vec![2, 3]);

  assert_eq!(mailbox.get_message_count(), 2);
  let uids: Vec<u64> = mailbox.get_message_list().map(|(_, entry)| entry.uid).collect();
  assert_eq!(uids, vec![1, 4]);
  assert!(mailbox.get_message(3).is_none());
}

#[test_log::test]
fn s4_index_rebuild_on_corruption() {
  let dir = tempfile::tempdir().unwrap();
  {
    let mut mailbox = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
    append(&mut mailbox, &message("a@x.com", "b@y.com", "one", "Mon, 1 Jan 2024 00:00:00 +0000", "body\r\n")).unwrap();
    append(&mut mailbox, &message("a@x.com", "b@y.com", "two", "Mon, 1 Jan 2024 00:00:00 +0000", "body\r\n")).unwrap();
  }

  let index_path = dir.path().join(".gidx");
  let mut bytes = fs::read(&index_path).unwrap();
  let last = bytes.len() - 1;
  bytes[last] ^= 0xff;
  fs::write(&index_path, &bytes).unwrap();

  let reopened = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
  assert_eq!(reopened.get_message_count(), 2);
  assert_eq!(reopened.search(&SearchCriteria::subject("one")).unwrap(), vec![1]);
  assert_eq!(reopened.search(&SearchCriteria::subject("two")).unwrap(), vec![2]);
}

#[test_log::test]
fn s5_uidvalidity_mismatch_triggers_rebuild() {
  let dir = tempfile::tempdir().unwrap();
  let original_uidvalidity = {
    let mut mailbox = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
    append(&mut mailbox, &message("a@x.com", "b@y.com", "one", "Mon, 1 Jan 2024 00:00:00 +0000", "body\r\n")).unwrap();
    mailbox.get_uid_validity()
  };

  // Forge a .gidx with a uidvalidity that no longer matches .uidlist.
  let mut stale_index = gumdrop_mailbox::index::MessageIndex::new(original_uidvalidity + 1, 2);
  stale_index.save(&dir.path().join(".gidx")).unwrap();

  let reopened = Mailbox::open(dir.path(), "INBOX", true, false).unwrap();
  assert_eq!(reopened.get_uid_validity(), original_uidvalidity);
  assert_eq!(reopened.get_message_count(), 1);
  assert!(reopened.get_uid_next() >= 2);
}

#[test_log::test]
fn s6_maildir_sandbox_and_pattern_matching() {
  let dir = tempfile::tempdir().unwrap();
  let store = MailboxStore::open(dir.path(), "alice").unwrap();
  store.create_mailbox("Archives/2025").unwrap();
  store.create_mailbox("Archives/2024").unwrap();

  assert_eq!(
    store.list_mailboxes("", "*").unwrap(),
    vec!["Archives/2024".to_string(), "Archives/2025".to_string(), "INBOX".to_string()]
  );
  assert_eq!(
    store.list_mailboxes("", "Archives/%").unwrap(),
    vec!["Archives/2024".to_string(), "Archives/2025".to_string()]
  );

  let error = store.create_mailbox("../evil").unwrap_err();
  assert!(matches!(error, MailboxError::InvalidMailboxPath(_)));
  assert!(!dir.path().join("evil").exists());
  assert!(!dir.path().parent().unwrap().join("evil").exists());
}
