// Textual, line-oriented persistence for the base-filename <-> UID mapping:
//
//   # gumdrop-uidlist v1
//   uidvalidity <n>
//   uidnext <n>
//   <uid> <baseFilename>
//   ...
//
// Written with a temp-file-then-atomic-rename, same durability story as
// maildir delivery itself.

use crate::time::now_ms;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write as _};
use std::path;

const HEADER: &str = "# gumdrop-uidlist v1";

pub struct UidList {
  path: path::PathBuf,
  uidvalidity: i64,
  uidnext: u64,
  by_base: BTreeMap<String, u64>,
  by_uid: BTreeMap<u64, String>,
  dirty: bool,
}

impl UidList {
  /// Loads `path` if present; otherwise starts a fresh, empty list with a
  /// brand new `uidvalidity` (current epoch seconds).
  pub fn load(path: &path::Path) -> io::Result<Self> {
    let fresh = |reason: &str| -> Self {
      log::warn!("{path:?}: {reason}, starting a fresh uid list");
      UidList {
        path: path.to_path_buf(),
        uidvalidity: now_ms() / 1000,
        uidnext: 1,
        by_base: BTreeMap::new(),
        by_uid: BTreeMap::new(),
        dirty: true,
      }
    };

    let contents = match fs::read_to_string(path) {
      Ok(contents) => contents,
      Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(fresh("file does not exist")),
      Err(error) => return Err(error),
    };

    let mut lines = contents.lines();
    match lines.next() {
      Some(header) if header.trim() == HEADER => (),
      _ => return Ok(fresh("missing or unrecognized header")),
    }

    let mut uidvalidity = None;
    let mut uidnext = None;
    let mut by_base = BTreeMap::new();
    let mut by_uid = BTreeMap::new();

    for line in lines {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      if let Some(rest) = line.strip_prefix("uidvalidity ") {
        match rest.trim().parse() {
          Ok(value) => uidvalidity = Some(value),
          Err(_) => {
            log::warn!("{path:?}: malformed uidvalidity line {line:?}, skipping");
          }
        }
        continue;
      }
      if let Some(rest) = line.strip_prefix("uidnext ") {
        match rest.trim().parse() {
          Ok(value) => uidnext = Some(value),
          Err(_) => {
            log::warn!("{path:?}: malformed uidnext line {line:?}, skipping");
          }
        }
        continue;
      }
      let mut parts = line.splitn(2, ' ');
      match (parts.next(), parts.next()) {
        (Some(uid), Some(base)) => match uid.parse::<u64>() {
          Ok(uid) => {
            by_base.insert(base.to_string(), uid);
            by_uid.insert(uid, base.to_string());
          }
          Err(_) => log::warn!("{path:?}: malformed mapping line {line:?}, skipping"),
        },
        _ => log::warn!("{path:?}: malformed mapping line {line:?}, skipping"),
      }
    }

    let (uidvalidity, uidnext) = match (uidvalidity, uidnext) {
      (Some(v), Some(n)) => (v, n),
      _ => return Ok(fresh("missing uidvalidity or uidnext")),
    };

    Ok(UidList {
      path: path.to_path_buf(),
      uidvalidity,
      uidnext,
      by_base,
      by_uid,
      dirty: false,
    })
  }

  /// Write-to-temp-then-atomic-rename; no-op if nothing changed since the
  /// last save.
  pub fn save(&mut self) -> io::Result<()> {
    if !self.dirty {
      return Ok(());
    }
    let mut contents = format!("{HEADER}\nuidvalidity {}\nuidnext {}\n", self.uidvalidity, self.uidnext);
    for (uid, base) in self.by_uid.iter() {
      contents.push_str(&format!("{uid} {base}\n"));
    }
    let tmp_path = self.path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp_path, &self.path)?;
    self.dirty = false;
    Ok(())
  }

  pub fn uidvalidity(&self) -> i64 {
    self.uidvalidity
  }

  pub fn uidnext(&self) -> u64 {
    self.uidnext
  }

  pub fn get_uid(&self, base: &str) -> Option<u64> {
    self.by_base.get(base).copied()
  }

  pub fn get_base(&self, uid: u64) -> Option<&str> {
    self.by_uid.get(&uid).map(String::as_str)
  }

  /// Returns the existing UID for `base`, or allocates `uidnext` and
  /// advances it.
  pub fn assign_uid(&mut self, base: &str) -> u64 {
    if let Some(uid) = self.by_base.get(base) {
      return *uid;
    }
    let uid = self.uidnext;
    self.uidnext += 1;
    self.by_base.insert(base.to_string(), uid);
    self.by_uid.insert(uid, base.to_string());
    self.dirty = true;
    uid
  }

  pub fn remove_uid(&mut self, base: &str) {
    if let Some(uid) = self.by_base.remove(base) {
      self.by_uid.remove(&uid);
      self.dirty = true;
    }
  }
}
