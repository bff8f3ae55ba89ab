// The IMAP SEARCH predicate algebra: a closed tagged-variant tree with a
// single evaluation entry point, `matches`. Smart constructors apply the
// algebraic simplification laws so a caller building a tree from parsed
// IMAP SEARCH syntax doesn't have to think about them.

use super::context::{MessageContext, SearchType};
use crate::error::Result;
use crate::flag::Flag;
use chrono::NaiveDate;
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchCriteria {
  All,
  HasFlag(Flag),
  NotFlag(Flag),
  Keyword(String),
  NotKeyword(String),
  Larger(u64),
  Smaller(u64),
  Before(NaiveDate),
  On(NaiveDate),
  Since(NaiveDate),
  SentBefore(NaiveDate),
  SentOn(NaiveDate),
  SentSince(NaiveDate),
  Header(String, String),
  From(String),
  To(String),
  Cc(String),
  Bcc(String),
  Subject(String),
  Body(String),
  Text(String),
  Uid(u64),
  UidSet(BTreeSet<u64>),
  UidRange(u64, u64),
  Seq(usize),
  SeqSet(BTreeSet<usize>),
  SeqRange(usize, usize),
  And(Vec<SearchCriteria>),
  Or(Box<SearchCriteria>, Box<SearchCriteria>),
  Not(Box<SearchCriteria>),
}

impl SearchCriteria {
  pub fn header(name: impl Into<String>, substring: impl Into<String>) -> SearchCriteria {
    SearchCriteria::Header(name.into(), substring.into().to_lowercase())
  }

  pub fn from_addr(substring: impl Into<String>) -> SearchCriteria {
    SearchCriteria::From(substring.into().to_lowercase())
  }

  pub fn to_addr(substring: impl Into<String>) -> SearchCriteria {
    SearchCriteria::To(substring.into().to_lowercase())
  }

  pub fn cc_addr(substring: impl Into<String>) -> SearchCriteria {
    SearchCriteria::Cc(substring.into().to_lowercase())
  }

  pub fn bcc_addr(substring: impl Into<String>) -> SearchCriteria {
    SearchCriteria::Bcc(substring.into().to_lowercase())
  }

  pub fn subject(substring: impl Into<String>) -> SearchCriteria {
    SearchCriteria::Subject(substring.into().to_lowercase())
  }

  pub fn body(substring: impl Into<String>) -> SearchCriteria {
    SearchCriteria::Body(substring.into().to_lowercase())
  }

  pub fn text(substring: impl Into<String>) -> SearchCriteria {
    SearchCriteria::Text(substring.into().to_lowercase())
  }

  /// `And([c]) ≡ c`, empty ⇒ `All`, `And(All, c) ≡ c`.
  pub fn and(items: Vec<SearchCriteria>) -> SearchCriteria {
    let mut flat = Vec::with_capacity(items.len());
    for item in items {
      match item {
        SearchCriteria::All => (),
        SearchCriteria::And(inner) => flat.extend(inner),
        other => flat.push(other),
      }
    }
    match flat.len() {
      0 => SearchCriteria::All,
      1 => flat.into_iter().next().unwrap(),
      _ => SearchCriteria::And(flat),
    }
  }

  /// `Or(c, c) ≡ c`, `Or(All, c) ≡ All`.
  pub fn or(a: SearchCriteria, b: SearchCriteria) -> SearchCriteria {
    if a == SearchCriteria::All || b == SearchCriteria::All {
      return SearchCriteria::All;
    }
    if a == b {
      return a;
    }
    SearchCriteria::Or(Box::new(a), Box::new(b))
  }

  /// `Not(Not(c)) ≡ c`.
  pub fn not(c: SearchCriteria) -> SearchCriteria {
    match c {
      SearchCriteria::Not(inner) => *inner,
      other => SearchCriteria::Not(Box::new(other)),
    }
  }

  pub fn search_type(&self) -> SearchType {
    match self {
      SearchCriteria::All => SearchType::Identity,
      SearchCriteria::HasFlag(_) | SearchCriteria::NotFlag(_) => SearchType::Flag,
      SearchCriteria::Keyword(_) | SearchCriteria::NotKeyword(_) => SearchType::Keyword,
      SearchCriteria::Larger(_) | SearchCriteria::Smaller(_) => SearchType::Size,
      SearchCriteria::Before(_) | SearchCriteria::On(_) | SearchCriteria::Since(_) => SearchType::InternalDate,
      SearchCriteria::SentBefore(_) | SearchCriteria::SentOn(_) | SearchCriteria::SentSince(_) => SearchType::SentDate,
      SearchCriteria::From(_)
      | SearchCriteria::To(_)
      | SearchCriteria::Cc(_)
      | SearchCriteria::Bcc(_)
      | SearchCriteria::Subject(_) => SearchType::IndexedHeader,
      SearchCriteria::Header(name, _) => {
        if matches!(name.to_ascii_lowercase().as_str(), "from" | "sender" | "to" | "cc" | "bcc" | "subject" | "message-id") {
          SearchType::IndexedHeader
        } else {
          SearchType::OtherHeader
        }
      }
      SearchCriteria::Body(_) => SearchType::Body,
      SearchCriteria::Text(_) => SearchType::Text,
      SearchCriteria::Uid(_) | SearchCriteria::UidSet(_) | SearchCriteria::UidRange(..) => SearchType::Identity,
      SearchCriteria::Seq(_) | SearchCriteria::SeqSet(_) | SearchCriteria::SeqRange(..) => SearchType::Identity,
      SearchCriteria::And(items) => items.iter().map(SearchCriteria::search_type).max_by_key(rank).unwrap_or(SearchType::Identity),
      SearchCriteria::Or(a, b) => {
        let (sa, sb) = (a.search_type(), b.search_type());
        if rank(&sa) >= rank(&sb) {
          sa
        } else {
          sb
        }
      }
      SearchCriteria::Not(inner) => inner.search_type(),
    }
  }

  pub fn matches(&self, ctx: &dyn MessageContext) -> Result<bool> {
    Ok(match self {
      SearchCriteria::All => true,
      SearchCriteria::HasFlag(flag) => ctx.get_flags().contains(flag),
      SearchCriteria::NotFlag(flag) => !ctx.get_flags().contains(flag),
      SearchCriteria::Keyword(keyword) => ctx.get_keywords().iter().any(|k| k == keyword),
      SearchCriteria::NotKeyword(keyword) => !ctx.get_keywords().iter().any(|k| k == keyword),
      SearchCriteria::Larger(n) => ctx.get_size() > *n,
      SearchCriteria::Smaller(n) => ctx.get_size() < *n,
      SearchCriteria::Before(date) => ctx.get_internal_local_date() < *date,
      SearchCriteria::On(date) => ctx.get_internal_local_date() == *date,
      SearchCriteria::Since(date) => ctx.get_internal_local_date() >= *date,
      SearchCriteria::SentBefore(date) => ctx.get_sent_local_date().is_some_and(|d| d < *date),
      SearchCriteria::SentOn(date) => ctx.get_sent_local_date().is_some_and(|d| d == *date),
      SearchCriteria::SentSince(date) => ctx.get_sent_local_date().is_some_and(|d| d >= *date),
      // Haystacks are already lower-cased by both `MessageContext` impls;
      // the needle is lower-cased here too so matching is correct even if a
      // caller builds a variant directly instead of through the smart
      // constructors above, which would otherwise silently break equality.
      SearchCriteria::Header(name, substring) => ctx.get_header(name)?.contains(&substring.to_lowercase()),
      SearchCriteria::From(substring) => ctx.get_header("from")?.contains(&substring.to_lowercase()),
      SearchCriteria::To(substring) => ctx.get_header("to")?.contains(&substring.to_lowercase()),
      SearchCriteria::Cc(substring) => ctx.get_header("cc")?.contains(&substring.to_lowercase()),
      SearchCriteria::Bcc(substring) => ctx.get_header("bcc")?.contains(&substring.to_lowercase()),
      SearchCriteria::Subject(substring) => ctx.get_header("subject")?.contains(&substring.to_lowercase()),
      SearchCriteria::Body(substring) => ctx.get_body_text()?.contains(&substring.to_lowercase()),
      SearchCriteria::Text(substring) => {
        let mut combined = ctx.get_headers_text()?;
        combined.push_str(&ctx.get_body_text()?);
        combined.contains(&substring.to_lowercase())
      }
      SearchCriteria::Uid(uid) => ctx.get_uid() == *uid,
      SearchCriteria::UidSet(set) => set.contains(&ctx.get_uid()),
      SearchCriteria::UidRange(lo, hi) => (*lo..=*hi).contains(&ctx.get_uid()),
      SearchCriteria::Seq(n) => ctx.get_message_number() == *n,
      SearchCriteria::SeqSet(set) => set.contains(&ctx.get_message_number()),
      SearchCriteria::SeqRange(lo, hi) => (*lo..=*hi).contains(&ctx.get_message_number()),
      SearchCriteria::And(items) => {
        for item in items {
          if !item.matches(ctx)? {
            return Ok(false);
          }
        }
        true
      }
      SearchCriteria::Or(a, b) => a.matches(ctx)? || b.matches(ctx)?,
      SearchCriteria::Not(inner) => !inner.matches(ctx)?,
    })
  }
}

fn rank(search_type: &SearchType) -> u8 {
  match search_type {
    SearchType::Identity | SearchType::Flag | SearchType::Keyword | SearchType::Size | SearchType::InternalDate | SearchType::SentDate | SearchType::IndexedHeader => 0,
    SearchType::OtherHeader | SearchType::Body | SearchType::Text => 1,
  }
}
