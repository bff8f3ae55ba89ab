// https://cr.yp.to/proto/maildir.html - Maildir
// https://www.courier-mta.org/imap/README.maildirquota.html - Maildir++
// https://doc.dovecot.org/admin_manual/mailbox_formats/maildir/ - Maildir Mailbox Format

pub mod filename;

use crate::error::{MailboxError, Result};
use crate::flag::Flag;
use filename::MaildirFilename;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write as _;
use std::path;

/// One message currently living in `cur/`, with its filename already
/// decoded. This is the unit the UID list and the index builder both
/// consume.
#[derive(Clone, Debug)]
pub struct Descriptor {
  pub base: String,
  pub name: MaildirFilename,
  pub path: path::PathBuf,
  pub size: u64,
}

impl Descriptor {
  pub fn flags(&self) -> &BTreeSet<Flag> {
    &self.name.flags
  }

  pub fn keyword_indices(&self) -> &BTreeSet<u8> {
    &self.name.keyword_indices
  }
}

/// A single maildir directory: `cur/`, `new/` and `tmp/` under `path`.
/// One `Maildir` corresponds to one IMAP mailbox (INBOX or a subfolder);
/// `MailboxStore` is in charge of mapping mailbox names to `Maildir`
/// instances (see `store.rs`).
#[derive(Debug)]
pub struct Maildir {
  path: path::PathBuf,
  root: bool,
}

impl Maildir {
  /// Opens (creating if needed) the `cur/new/tmp` triplet at `path`. `root`
  /// marks the account's INBOX, which does not get a `maildirfolder`
  /// sentinel.
  pub fn open(path: &path::Path, root: bool) -> Result<Self> {
    fs::create_dir_all(path)?;
    let path = path.canonicalize()?;
    for directory in ["cur", "new", "tmp"] {
      fs::create_dir_all(path.join(directory))?;
    }
    if !root {
      // Within each subdirectory there's an empty file, maildirfolder; its
      // existence tells other maildir-aware tools this is a Maildir++
      // subfolder and not the account root. Never load-bearing for us.
      let marker = path.join("maildirfolder");
      if !marker.exists() {
        fs::File::create(marker)?;
      }
    }
    Ok(Self { path, root })
  }

  pub fn path(&self) -> &path::Path {
    &self.path
  }

  pub fn root(&self) -> bool {
    self.root
  }

  pub fn remove(self) -> Result<()> {
    Ok(fs::remove_dir_all(self.path)?)
  }

  fn cur(&self) -> path::PathBuf {
    self.path.join("cur")
  }

  fn new(&self) -> path::PathBuf {
    self.path.join("new")
  }

  fn tmp(&self) -> path::PathBuf {
    self.path.join("tmp")
  }

  /// Moves everything out of `new/` into `cur/`, adding a `:2,` suffix (no
  /// flags, no keywords) to filenames that don't already have one. This is
  /// the "move on open" semantics chosen in DESIGN.md for the new-vs-cur
  /// open question.
  pub fn normalize_new(&self) -> Result<()> {
    for entry in fs::read_dir(self.new())? {
      let entry = entry?;
      if !entry.file_type()?.is_file() {
        continue;
      }
      let name = entry.file_name();
      let name = name.to_str().ok_or_else(|| {
        MailboxError::MalformedName(entry.path().to_string_lossy().to_string())
      })?;
      let target_name = match MaildirFilename::parse(name) {
        Ok(parsed) => parsed.render(),
        Err(error) => {
          log::warn!("skipping malformed maildir filename {name:?} in new/: {error}");
          continue;
        }
      };
      fs::rename(entry.path(), self.cur().join(target_name))?;
    }
    Ok(())
  }

  /// Lists every live message in `cur/`. Filenames that fail to parse are
  /// logged and skipped, per the `MalformedName` policy; they do not abort
  /// the scan.
  pub fn scan(&self) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::new();
    for entry in fs::read_dir(self.cur())? {
      let entry = entry?;
      if !entry.file_type()?.is_file() {
        continue;
      }
      let path = entry.path();
      let file_name = entry.file_name();
      let file_name = match file_name.to_str() {
        Some(name) => name,
        None => {
          log::warn!("skipping non-utf8 maildir filename {path:?}");
          continue;
        }
      };
      let name = match MaildirFilename::parse(file_name) {
        Ok(name) => name,
        Err(error) => {
          log::warn!("skipping malformed maildir filename {file_name:?}: {error}");
          continue;
        }
      };
      let actual_size = entry.metadata()?.len();
      descriptors.push(Descriptor {
        base: name.base(),
        name,
        path,
        size: actual_size,
      });
    }
    descriptors.sort_by(|a, b| a.name.timestamp.cmp(&b.name.timestamp).then(a.base.cmp(&b.base)));
    Ok(descriptors)
  }

  /// Writes `data` to a fresh file in `tmp/`, fsyncs it, then atomically
  /// renames it into `cur/` using a generated filename. Returns the
  /// resulting descriptor. The file is durable in `tmp/` before the rename
  /// completes, so a crash mid-delivery never leaves a half-written
  /// message visible in `cur/`.
  pub fn deliver(&self, data: &[u8], flags: BTreeSet<Flag>, keyword_indices: BTreeSet<u8>) -> Result<Descriptor> {
    let name = MaildirFilename::generate(data.len() as u64, flags, keyword_indices);
    let tmp_path = self.tmp().join(name.base());
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    let cur_path = self.cur().join(name.render());
    fs::rename(&tmp_path, &cur_path)?;
    Ok(Descriptor {
      base: name.base(),
      name,
      path: cur_path,
      size: data.len() as u64,
    })
  }

  /// Renames a message to reflect a new flag/keyword set. Returns the
  /// updated descriptor. Rename is atomic: an observer sees either the old
  /// or the new filename, never both.
  pub fn rename_flags(&self, descriptor: &Descriptor, flags: BTreeSet<Flag>, keyword_indices: BTreeSet<u8>) -> Result<Descriptor> {
    let name = descriptor.name.with_flags(flags, keyword_indices);
    let new_path = self.cur().join(name.render());
    if new_path != descriptor.path {
      fs::rename(&descriptor.path, &new_path)?;
    }
    Ok(Descriptor {
      base: descriptor.base.clone(),
      name,
      path: new_path,
      size: descriptor.size,
    })
  }

  /// Permanently removes a message's file.
  pub fn delete(&self, descriptor: &Descriptor) -> Result<()> {
    Ok(fs::remove_file(&descriptor.path)?)
  }

  /// Recursively sums the size (in bytes) of regular files under `cur/`
  /// and `new/`, excluding `tmp/` and hidden files, plus the message count.
  /// Used by `MailboxStore::get_quota`.
  pub fn usage(&self) -> Result<(u64, usize)> {
    let mut bytes = 0u64;
    let mut count = 0usize;
    for dir in [self.cur(), self.new()] {
      for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
          continue;
        }
        if entry.file_type()?.is_file() {
          bytes += entry.metadata()?.len();
          count += 1;
        }
      }
    }
    Ok((bytes, count))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn open_creates_layout() {
    let dir = tempfile::tempdir().unwrap();
    let maildir = Maildir::open(dir.path(), true).unwrap();
    assert!(maildir.path().join("cur").is_dir());
    assert!(maildir.path().join("new").is_dir());
    assert!(maildir.path().join("tmp").is_dir());
    assert!(!maildir.path().join("maildirfolder").exists());
  }

  #[test]
  fn subfolder_gets_marker() {
    let dir = tempfile::tempdir().unwrap();
    let maildir = Maildir::open(&dir.path().join(".Archive"), false).unwrap();
    assert!(maildir.path().join("maildirfolder").exists());
  }

  #[test]
  fn deliver_then_scan() {
    let dir = tempfile::tempdir().unwrap();
    let maildir = Maildir::open(dir.path(), true).unwrap();
    let descriptor = maildir.deliver(b"hello", BTreeSet::new(), BTreeSet::new()).unwrap();
    assert!(descriptor.path.exists());
    let scanned = maildir.scan().unwrap();
    assert_eq!(scanned.len(), 1);
    assert_eq!(scanned[0].base, descriptor.base);
    assert_eq!(scanned[0].size, 5);
  }

  #[test]
  fn rename_flags_is_atomic_and_preserves_base() {
    let dir = tempfile::tempdir().unwrap();
    let maildir = Maildir::open(dir.path(), true).unwrap();
    let descriptor = maildir.deliver(b"hello", BTreeSet::new(), BTreeSet::new()).unwrap();
    let mut flags = BTreeSet::new();
    flags.insert(Flag::Seen);
    let updated = maildir.rename_flags(&descriptor, flags, BTreeSet::new()).unwrap();
    assert_eq!(updated.base, descriptor.base);
    assert!(updated.path.to_string_lossy().ends_with(":2,S"));
    assert!(!descriptor.path.exists());
    assert!(updated.path.exists());
  }

  #[test]
  fn normalize_new_moves_files_into_cur() {
    let dir = tempfile::tempdir().unwrap();
    let maildir = Maildir::open(dir.path(), true).unwrap();
    fs::write(maildir.path().join("new").join("1700000000.abc"), b"x").unwrap();
    maildir.normalize_new().unwrap();
    let scanned = maildir.scan().unwrap();
    assert_eq!(scanned.len(), 1);
    assert!(fs::read_dir(maildir.path().join("new")).unwrap().next().is_none());
  }

  #[test]
  fn malformed_names_are_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let maildir = Maildir::open(dir.path(), true).unwrap();
    fs::write(maildir.path().join("cur").join("garbage"), b"x").unwrap();
    let descriptor = maildir.deliver(b"hello", BTreeSet::new(), BTreeSet::new()).unwrap();
    let scanned = maildir.scan().unwrap();
    assert_eq!(scanned.len(), 1);
    assert_eq!(scanned[0].base, descriptor.base);
  }
}
