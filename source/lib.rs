// https://cr.yp.to/proto/maildir.html - Maildir
// https://www.courier-mta.org/imap/README.maildirquota.html - Maildir++
// https://www.rfc-editor.org/rfc/rfc3501 - IMAP4rev1 SEARCH

pub mod error;
pub mod flag;
pub mod index;
pub mod keywords;
pub mod mailbox;
pub mod maildir;
pub mod search;
pub mod store;
pub mod time;
pub mod uidlist;
pub mod uidset;

pub use error::{MailboxError, Result};
pub use flag::Flag;
pub use mailbox::Mailbox;
pub use store::MailboxStore;

use std::path;

/// CLI-facing argument group for `gumdrop-mailctl` subcommands that operate
/// on one user's store; `#[clap(flatten)]`ed into each subcommand's
/// arguments in `main.rs`.
#[derive(clap::Args)]
#[group(skip)]
pub struct StoreArguments {
  #[arg(long = "users-root", help = "Root directory holding all per-user Maildir++ trees")]
  pub users_root: path::PathBuf,
  #[arg(long = "user", help = "Username")]
  pub user: String,
}

impl StoreArguments {
  pub fn open(&self) -> Result<MailboxStore> {
    MailboxStore::open(&self.users_root, &self.user)
  }
}
