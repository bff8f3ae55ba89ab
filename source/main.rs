use clap::Parser as _;
use gumdrop_mailbox::{search::SearchCriteria, StoreArguments};
use std::path;

#[derive(clap::Parser)]
struct CommandLine {
  #[clap(subcommand)]
  command: Command,
  #[arg(
    long = "log-directory",
    help = "Log directory",
    default_value_t = String::from("$ENV{XDG_RUNTIME_DIR}")
  )]
  log_directory: String,
  #[clap(flatten)]
  verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}

#[derive(clap::Subcommand)]
enum Command {
  /// List every message in a mailbox: message number, UID, size and flags.
  Scan {
    #[clap(flatten)]
    store: StoreArguments,
    #[arg(long = "mailbox", default_value = "INBOX")]
    mailbox: String,
  },
  /// Evaluate a subject substring search against a mailbox.
  Search {
    #[clap(flatten)]
    store: StoreArguments,
    #[arg(long = "mailbox", default_value = "INBOX")]
    mailbox: String,
    #[arg(long = "subject", help = "Subject substring to search for")]
    subject: String,
  },
  /// Delete and regenerate a mailbox's `.gidx` from the messages on disk.
  RebuildIndex {
    #[clap(flatten)]
    store: StoreArguments,
    #[arg(long = "mailbox", default_value = "INBOX")]
    mailbox: String,
  },
  /// List mailboxes matching an IMAP wildcard pattern.
  ListMailboxes {
    #[clap(flatten)]
    store: StoreArguments,
    #[arg(long = "pattern", default_value = "*")]
    pattern: String,
  },
}

fn main() -> anyhow::Result<()> {
  let arguments = CommandLine::parse();

  let encoder = Box::new(log4rs::encode::pattern::PatternEncoder::new(
    "{d(%F %T)} {l} {t} - {m}{n}",
  ));
  log4rs::init_config(
    log4rs::config::Config::builder()
      .appender(
        log4rs::config::Appender::builder()
          .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(
            log::LevelFilter::Trace,
          )))
          .build(
            "file",
            Box::new(
              log4rs::append::file::FileAppender::builder()
                .encoder(encoder.clone())
                .build(path::Path::new(&arguments.log_directory).join("gumdrop-mailctl.log"))?,
            ),
          ),
      )
      .appender(
        log4rs::config::Appender::builder()
          .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(
            arguments.verbose.log_level_filter(),
          )))
          .build(
            "console",
            Box::new(
              log4rs::append::console::ConsoleAppender::builder()
                .encoder(encoder)
                .build(),
            ),
          ),
      )
      .build(
        log4rs::config::Root::builder()
          .appenders(["console", "file"])
          .build(log::LevelFilter::Trace),
      )?,
  )?;

  run(&arguments.command)
}

fn run(command: &Command) -> anyhow::Result<()> {
  match command {
    Command::Scan { store, mailbox } => {
      let store = store.open()?;
      let opened = store.open_mailbox(mailbox, true)?;
      for (number, entry) in opened.get_message_list() {
        println!("{number}\tuid={}\tsize={}\tflags={:?}\t{}", entry.uid, entry.size, entry.flags, entry.subject);
      }
      Ok(())
    }
    Command::Search { store, mailbox, subject } => {
      let store = store.open()?;
      let opened = store.open_mailbox(mailbox, true)?;
      for number in opened.search(&SearchCriteria::subject(subject.clone()))? {
        println!("{number}");
      }
      Ok(())
    }
    Command::RebuildIndex { store, mailbox } => {
      let store = store.open()?;
      store.rebuild_index(mailbox)?;
      log::info!("rebuilt index for {mailbox:?}");
      Ok(())
    }
    Command::ListMailboxes { store, pattern } => {
      let store = store.open()?;
      for name in store.list_mailboxes("", pattern)? {
        println!("{name}");
      }
      Ok(())
    }
  }
}
