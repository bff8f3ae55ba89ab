// Maildir++ per-user namespace: name <-> directory translation, mailbox
// CRUD, subscriptions, IMAP wildcard listing and quota.

use crate::error::{MailboxError, Result};
use crate::mailbox::Mailbox;
use crate::maildir::Maildir;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

pub struct MailboxStore {
  root: PathBuf,
}

impl MailboxStore {
  /// Opens (creating if needed) the per-user tree at `users_root/username`,
  /// ensures INBOX's `cur/new/tmp` exist, and auto-subscribes INBOX on
  /// first open.
  pub fn open(users_root: &Path, username: &str) -> Result<Self> {
    validate_username(username)?;
    let root = users_root.join(username);
    fs::create_dir_all(&root)?;
    let root = root.canonicalize()?;
    let store = MailboxStore { root };

    Maildir::open(&store.root, true)?;
    let mut subscriptions = store.load_subscriptions()?;
    if !subscriptions.iter().any(|name| name.eq_ignore_ascii_case("INBOX")) {
      subscriptions.push("INBOX".to_string());
      store.save_subscriptions(&subscriptions)?;
    }
    Ok(store)
  }

  pub fn close(&self) -> Result<()> {
    Ok(())
  }

  fn resolve_path(&self, name: &str) -> Result<(PathBuf, bool)> {
    if name.eq_ignore_ascii_case("INBOX") {
      return Ok((self.root.clone(), true));
    }
    if name.is_empty() || name.contains('\\') {
      return Err(MailboxError::InvalidMailboxPath(name.to_string()));
    }
    let components: Vec<&str> = name.split('/').collect();
    if components.iter().any(|component| component.is_empty() || *component == "." || *component == "..") {
      return Err(MailboxError::InvalidMailboxPath(name.to_string()));
    }
    let encoded = components.iter().map(|component| encode_component(component)).collect::<Vec<_>>().join(".");
    let path = self.root.join(format!(".{encoded}"));
    Ok((path, false))
  }

  pub fn open_mailbox(&self, name: &str, read_only: bool) -> Result<Mailbox> {
    let (path, root) = self.resolve_path(name)?;
    if !root && !path.join("cur").is_dir() {
      return Err(MailboxError::NotFound(name.to_string()));
    }
    let display_name = if root { "INBOX" } else { name };
    Mailbox::open(&path, display_name, root, read_only)
  }

  pub fn create_mailbox(&self, name: &str) -> Result<()> {
    let (path, root) = self.resolve_path(name)?;
    if root {
      return Err(MailboxError::InvalidMailboxPath(name.to_string()));
    }
    Maildir::open(&path, false)?;
    Ok(())
  }

  pub fn delete_mailbox(&self, name: &str) -> Result<()> {
    let (path, root) = self.resolve_path(name)?;
    if root {
      return Err(MailboxError::InvalidMailboxPath(name.to_string()));
    }
    if !path.is_dir() {
      return Err(MailboxError::NotFound(name.to_string()));
    }
    fs::remove_dir_all(&path)?;
    let mut subscriptions = self.load_subscriptions()?;
    subscriptions.retain(|subscribed| subscribed != name);
    self.save_subscriptions(&subscriptions)?;
    Ok(())
  }

  pub fn rename_mailbox(&self, from: &str, to: &str) -> Result<()> {
    let (from_path, from_root) = self.resolve_path(from)?;
    let (to_path, to_root) = self.resolve_path(to)?;
    if from_root || to_root {
      return Err(MailboxError::InvalidMailboxPath(if from_root { from.to_string() } else { to.to_string() }));
    }
    if !from_path.is_dir() {
      return Err(MailboxError::NotFound(from.to_string()));
    }
    if let Some(parent) = to_path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::rename(&from_path, &to_path)?;
    let mut subscriptions = self.load_subscriptions()?;
    for subscribed in subscriptions.iter_mut() {
      if subscribed == from {
        *subscribed = to.to_string();
      }
    }
    self.save_subscriptions(&subscriptions)?;
    Ok(())
  }

  fn all_mailbox_names(&self) -> Result<Vec<String>> {
    let mut names = vec!["INBOX".to_string()];
    for entry in fs::read_dir(&self.root)? {
      let entry = entry?;
      if !entry.file_type()?.is_dir() {
        continue;
      }
      let file_name = entry.file_name();
      let file_name = file_name.to_string_lossy();
      let Some(encoded) = file_name.strip_prefix('.') else {
        continue;
      };
      if !entry.path().join("cur").is_dir() {
        continue; // a dotfile like .uidlist, not a maildir subfolder
      }
      let name = encoded.split('.').map(decode_component).collect::<Vec<_>>().join("/");
      names.push(name);
    }
    Ok(names)
  }

  pub fn list_mailboxes(&self, reference: &str, pattern: &str) -> Result<Vec<String>> {
    let combined = format!("{reference}{pattern}");
    let mut names = self.all_mailbox_names()?;
    names.retain(|name| wildcard_match(&combined, name));
    names.sort_by_key(|name| name.to_lowercase());
    Ok(names)
  }

  pub fn list_subscribed(&self, reference: &str, pattern: &str) -> Result<Vec<String>> {
    let subscriptions = self.load_subscriptions()?;
    let combined = format!("{reference}{pattern}");
    let mut names: Vec<String> = subscriptions.into_iter().filter(|name| wildcard_match(&combined, name)).collect();
    names.sort_by_key(|name| name.to_lowercase());
    Ok(names)
  }

  pub fn subscribe(&self, name: &str) -> Result<()> {
    let (path, root) = self.resolve_path(name)?;
    if !root && !path.join("cur").is_dir() {
      return Err(MailboxError::NotFound(name.to_string()));
    }
    let mut subscriptions = self.load_subscriptions()?;
    if !subscriptions.iter().any(|subscribed| subscribed.eq_ignore_ascii_case(name)) {
      subscriptions.push(name.to_string());
      self.save_subscriptions(&subscriptions)?;
    }
    Ok(())
  }

  pub fn unsubscribe(&self, name: &str) -> Result<()> {
    let mut subscriptions = self.load_subscriptions()?;
    subscriptions.retain(|subscribed| !subscribed.eq_ignore_ascii_case(name));
    self.save_subscriptions(&subscriptions)?;
    Ok(())
  }

  /// Forces a from-scratch rebuild of `name`'s `.gidx`: removes it, then
  /// opens and closes the mailbox writably so `Mailbox::open`'s normal
  /// rebuild-on-missing-index path does the work.
  pub fn rebuild_index(&self, name: &str) -> Result<()> {
    let (path, _) = self.resolve_path(name)?;
    match fs::remove_file(path.join(".gidx")) {
      Ok(()) => (),
      Err(error) if error.kind() == io::ErrorKind::NotFound => (),
      Err(error) => return Err(error.into()),
    }
    let mut mailbox = self.open_mailbox(name, false)?;
    mailbox.close(false)?;
    Ok(())
  }

  pub fn get_mailbox_attributes(&self, name: &str) -> Result<Vec<&'static str>> {
    let (path, root) = self.resolve_path(name)?;
    if !root && !path.join("cur").is_dir() {
      return Err(MailboxError::NotFound(name.to_string()));
    }
    let prefix = format!("{name}/");
    let has_children = self.all_mailbox_names()?.iter().any(|other| other.starts_with(&prefix));
    Ok(if has_children { vec!["\\HasChildren"] } else { vec!["\\HasNoChildren"] })
  }

  pub fn get_quota_root(&self) -> &str {
    ""
  }

  /// `(used_kb, message_count, limit_kb)`; unlimited (`None`) by default.
  pub fn get_quota(&self) -> Result<(u64, usize, Option<u64>)> {
    let mut bytes = 0u64;
    let mut count = 0usize;
    accumulate_usage(&self.root, &mut bytes, &mut count)?;
    Ok((bytes / 1024, count, None))
  }

  fn subscriptions_path(&self) -> PathBuf {
    self.root.join(".subscriptions")
  }

  fn load_subscriptions(&self) -> Result<Vec<String>> {
    match fs::read_to_string(self.subscriptions_path()) {
      Ok(contents) => Ok(contents.lines().map(str::to_string).collect()),
      Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
      Err(error) => Err(error.into()),
    }
  }

  fn save_subscriptions(&self, names: &[String]) -> Result<()> {
    let contents: String = names.iter().map(|name| format!("{name}\n")).collect();
    let tmp_path = self.subscriptions_path().with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp_path, self.subscriptions_path())?;
    Ok(())
  }
}

fn validate_username(username: &str) -> Result<()> {
  if username.is_empty() || username.contains('/') || username.contains('\\') || username.contains("..") || username.starts_with('.') {
    return Err(MailboxError::InvalidMailboxPath(username.to_string()));
  }
  Ok(())
}

fn accumulate_usage(dir: &Path, bytes: &mut u64, count: &mut usize) -> Result<()> {
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    if !entry.file_type()?.is_dir() {
      continue;
    }
    let name = entry.file_name();
    let name = name.to_string_lossy();
    if name == "tmp" {
      continue;
    }
    if name == "cur" || name == "new" {
      for message in fs::read_dir(entry.path())? {
        let message = message?;
        if message.file_name().to_string_lossy().starts_with('.') {
          continue;
        }
        if message.file_type()?.is_file() {
          *bytes += message.metadata()?.len();
          *count += 1;
        }
      }
    } else {
      accumulate_usage(&entry.path(), bytes, count)?;
    }
  }
  Ok(())
}

/// Percent-encodes `.` and `%` so a user-supplied path component can't
/// collide with the on-disk `.`-separated hierarchy delimiter.
fn encode_component(component: &str) -> String {
  let mut out = String::new();
  for ch in component.chars() {
    if ch == '.' || ch == '%' {
      for byte in ch.to_string().bytes() {
        out.push_str(&format!("%{byte:02X}"));
      }
    } else {
      out.push(ch);
    }
  }
  out
}

fn decode_component(encoded: &str) -> String {
  let mut bytes = Vec::new();
  let mut chars = encoded.chars().peekable();
  while let Some(c) = chars.next() {
    if c == '%' {
      let hex: String = chars.by_ref().take(2).collect();
      match u8::from_str_radix(&hex, 16) {
        Ok(byte) => bytes.push(byte),
        Err(_) => bytes.extend_from_slice(format!("%{hex}").as_bytes()),
      }
    } else {
      let mut buf = [0u8; 4];
      bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    }
  }
  String::from_utf8_lossy(&bytes).into_owned()
}

/// `*` matches any sequence including `/`; `%` matches any sequence not
/// containing `/`. INBOX matches case-insensitively; every other literal
/// matches exactly.
fn wildcard_match(pattern: &str, name: &str) -> bool {
  let case_insensitive = name.eq_ignore_ascii_case("INBOX");
  let pattern_chars: Vec<char> = pattern.chars().collect();
  let name_chars: Vec<char> = name.chars().collect();
  matches_rec(&pattern_chars, &name_chars, case_insensitive)
}

fn matches_rec(pattern: &[char], name: &[char], case_insensitive: bool) -> bool {
  match pattern.first() {
    None => name.is_empty(),
    Some('*') => matches_rec(&pattern[1..], name, case_insensitive) || (!name.is_empty() && matches_rec(pattern, &name[1..], case_insensitive)),
    Some('%') => {
      matches_rec(&pattern[1..], name, case_insensitive)
        || (!name.is_empty() && name[0] != '/' && matches_rec(pattern, &name[1..], case_insensitive))
    }
    Some(&c) => {
      if name.is_empty() {
        return false;
      }
      let equal = if case_insensitive { c.eq_ignore_ascii_case(&name[0]) } else { c == name[0] };
      equal && matches_rec(&pattern[1..], &name[1..], case_insensitive)
    }
  }
}
