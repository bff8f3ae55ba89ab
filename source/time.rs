// Small time helpers shared by the index and the search predicates.
//
// Internal/sent dates are stored as epoch milliseconds (matching the
// on-disk .gidx format, which is a fixed-width binary layout and has no use
// for a richer type). Date-only comparisons (On/Before/Since) are done on
// the mailbox's local calendar day.

use chrono::{Local, NaiveDate, TimeZone};

pub fn now_ms() -> i64 {
  chrono::Utc::now().timestamp_millis()
}

/// The local calendar day an instant (epoch ms) falls on.
pub fn local_date_from_ms(ms: i64) -> NaiveDate {
  Local
    .timestamp_millis_opt(ms)
    .single()
    .unwrap_or_else(|| Local.timestamp_millis_opt(0).unwrap())
    .date_naive()
}

/// Epoch ms of local midnight for a given calendar day.
pub fn ms_from_local_date(date: NaiveDate) -> i64 {
  Local
    .from_local_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
    .single()
    .map(|dt| dt.timestamp_millis())
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trip_local_date() {
    let ms = now_ms();
    let date = local_date_from_ms(ms);
    let reconstructed = ms_from_local_date(date);
    assert_eq!(local_date_from_ms(reconstructed), date);
  }
}
