// Textual file mapping letter-offset (0 = 'a', 1 = 'b', ...) to a
// user-defined keyword string. Insertion-only: once a keyword is assigned a
// letter it keeps it for the mailbox's lifetime, so existing filenames
// never need renaming when a new keyword is introduced.

use crate::error::{MailboxError, Result};
use std::fs;
use std::io::Write as _;
use std::path;

pub struct Keywords {
  path: path::PathBuf,
  list: Vec<String>,
  dirty: bool,
}

impl Keywords {
  pub fn load(path: &path::Path) -> Result<Self> {
    let list = match fs::read_to_string(path) {
      Ok(contents) => contents.lines().map(str::to_string).collect(),
      Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
      Err(error) => return Err(error.into()),
    };
    Ok(Keywords {
      path: path.to_path_buf(),
      list,
      dirty: false,
    })
  }

  pub fn save(&mut self) -> Result<()> {
    if !self.dirty {
      return Ok(());
    }
    let contents = self.list.join("\n") + if self.list.is_empty() { "" } else { "\n" };
    let tmp_path = self.path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp_path, &self.path)?;
    self.dirty = false;
    Ok(())
  }

  pub fn to_letter(&self, index: u8) -> Option<char> {
    if (index as usize) < self.list.len() {
      Some((b'a' + index) as char)
    } else {
      None
    }
  }

  pub fn at(&self, index: u8) -> Option<&str> {
    self.list.get(index as usize).map(String::as_str)
  }

  /// Returns the existing index for `keyword`, or allocates the next free
  /// letter. Fails with `TooManyKeywords` past `z`.
  pub fn index_of(&mut self, keyword: &str) -> Result<u8> {
    if let Some(index) = self.list.iter().position(|k| k == keyword) {
      return Ok(index as u8);
    }
    if self.list.len() >= 26 {
      return Err(MailboxError::TooManyKeywords);
    }
    self.list.push(keyword.to_string());
    self.dirty = true;
    Ok((self.list.len() - 1) as u8)
  }

  pub fn keywords_to_indices(&mut self, keywords: &[String]) -> Result<std::collections::BTreeSet<u8>> {
    keywords.iter().map(|k| self.index_of(k)).collect()
  }

  pub fn indices_to_keywords(&self, indices: &std::collections::BTreeSet<u8>) -> Vec<String> {
    indices.iter().filter_map(|i| self.at(*i)).map(str::to_string).collect()
  }

  pub fn all(&self) -> &[String] {
    &self.list
  }
}
