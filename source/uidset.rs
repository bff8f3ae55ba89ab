// Parses the IMAP `sequence-set`/`uid-set` syntax
// (`n`, `n:m`, `n:*`, comma-separated) into a concrete `BTreeSet<u64>`. Not
// part of the closed `MailboxError` surface: this is parsing glue for
// whatever sits above the library (the CLI, or eventually an IMAP command
// parser), not a mailbox-core failure mode.

use std::collections::BTreeSet;

/// Parses `spec` against `max` (the mailbox's current max UID or sequence
/// number, substituted for `*`).
pub fn parse_set(spec: &str, max: u64) -> Result<BTreeSet<u64>, String> {
  let mut set = BTreeSet::new();
  for part in spec.split(',') {
    let part = part.trim();
    if part.is_empty() {
      continue;
    }
    match part.split_once(':') {
      Some((lo, hi)) => {
        let lo = parse_bound(lo, max)?;
        let hi = parse_bound(hi, max)?;
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        set.extend(lo..=hi);
      }
      None => {
        set.insert(parse_bound(part, max)?);
      }
    }
  }
  Ok(set)
}

fn parse_bound(token: &str, max: u64) -> Result<u64, String> {
  if token == "*" {
    return Ok(max);
  }
  token.parse().map_err(|_| format!("not a valid sequence number: {token:?}"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_singletons_ranges_and_star() {
    let set = parse_set("1,3:5,9:*", 12).unwrap();
    assert_eq!(set, BTreeSet::from([1, 3, 4, 5, 9, 10, 11, 12]));
  }

  #[test]
  fn rejects_garbage() {
    assert!(parse_set("abc", 10).is_err());
  }

  #[test]
  fn reversed_range_is_normalized() {
    let set = parse_set("5:3", 10).unwrap();
    assert_eq!(set, BTreeSet::from([3, 4, 5]));
  }
}
