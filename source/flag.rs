use std::fmt;

/// A persistent IMAP system flag, plus the session-local `Recent` flag.
///
/// `Recent` never appears in a maildir filename or in the search index: it is
/// tracked by the session that observed the message arrive, not by the
/// mailbox itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
  Answered,
  Deleted,
  Draft,
  Flagged,
  Recent,
  Seen,
}

/// The five flags reported in `PERMANENTFLAGS`; `Recent` is excluded
/// because IMAP never allows a client to set it explicitly.
pub const PERSISTENT_FLAGS: [Flag; 5] = [
  Flag::Seen,
  Flag::Answered,
  Flag::Flagged,
  Flag::Deleted,
  Flag::Draft,
];

impl Flag {
  /// The maildir filename letter for this flag, or `None` for `Recent`
  /// which is never persisted. Per the Maildir convention: D(raft),
  /// F(lagged), R(eplied/answered), S(een), T(rashed/deleted).
  pub fn letter(self) -> Option<char> {
    match self {
      Flag::Draft => Some('D'),
      Flag::Flagged => Some('F'),
      Flag::Answered => Some('R'),
      Flag::Seen => Some('S'),
      Flag::Deleted => Some('T'),
      Flag::Recent => None,
    }
  }

  pub fn from_letter(letter: char) -> Option<Flag> {
    match letter {
      'D' => Some(Flag::Draft),
      'F' => Some(Flag::Flagged),
      'R' => Some(Flag::Answered),
      'S' => Some(Flag::Seen),
      'T' => Some(Flag::Deleted),
      _ => None,
    }
  }
}

impl fmt::Display for Flag {
  fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Flag::Answered => "\\Answered",
      Flag::Deleted => "\\Deleted",
      Flag::Draft => "\\Draft",
      Flag::Flagged => "\\Flagged",
      Flag::Recent => "\\Recent",
      Flag::Seen => "\\Seen",
    };
    write!(formatter, "{name}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn letters_round_trip() {
    for flag in PERSISTENT_FLAGS {
      let letter = flag.letter().unwrap();
      assert_eq!(Flag::from_letter(letter), Some(flag));
    }
    assert_eq!(Flag::Recent.letter(), None);
  }
}
