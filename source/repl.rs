// The interactive command loop. Grounded on original_source/src/imap-client.c's
// interactionLoop/handleUserInput (command parsing, NOOP-on-timeout) and printing.c (paging and
// message display), rewritten around a background stdin-reading thread feeding a channel instead
// of a blocking poll() on a file descriptor.

use anyhow::Context as _;
use crate::session::{self, Session};
use std::io::{BufRead as _, Read, Write};
use std::{sync::mpsc, thread, time};

const PAGE_SIZE: usize = 20;
const NOOP_INTERVAL: time::Duration = time::Duration::from_secs(3);

/// Spawns a thread that blocks reading lines from stdin and forwards each one on `tx`. The main
/// loop can then `recv_timeout` instead of blocking on terminal input forever, which is what lets
/// it fall back to NOOP on quiescence.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
  let (tx, rx) = mpsc::channel();
  thread::spawn(move || {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
      match line {
        Ok(line) => {
          if tx.send(line).is_err() {
            break;
          }
        }
        Err(_) => break,
      }
    }
  });
  rx
}

fn print_help() {
  println!("!delete N     mark message N for deletion");
  println!("!undelete N   clear the deletion mark on message N");
  println!("!expunge      remove deleted messages");
  println!("!read N       display message N in full");
  println!("!page N       display page N ({PAGE_SIZE} messages per page)");
  println!("!select NAME  select a different mailbox");
  println!("!list         list mailboxes");
  println!("!stats        show mailbox statistics");
  println!("!clear        clear the screen");
  println!("!logout       log out and exit");
  println!("!help         show this message");
}

fn print_stats<RW>(session: &Session<RW>) {
  let pages = session.cache.size() / PAGE_SIZE + 1;
  println!(
    "Messages: {}   Recent: {}   Pages: {pages}",
    session.cache.size(),
    session.cache.recent()
  );
}

fn truncate(s: &str, n: usize) -> String {
  if s.chars().count() <= n {
    s.to_owned()
  } else {
    s.chars().take(n.saturating_sub(1)).collect::<String>() + "\u{2026}"
  }
}

fn format_from(message: &crate::cache::Message) -> String {
  message
    .envelope
    .from
    .first()
    .map(|address| {
      address
        .personal_name
        .clone()
        .unwrap_or_else(|| format!("{}@{}", address.mailbox_name, address.host_name))
    })
    .unwrap_or_else(|| "(unknown)".to_owned())
}

fn print_page<RW>(session: &Session<RW>, page: usize) {
  let start = page.saturating_sub(1) * PAGE_SIZE + 1;
  let end = std::cmp::min(start + PAGE_SIZE - 1, session.cache.size());
  println!("{:<5} {:<20} {:<35} flags", "num", "from", "subject");
  for n in start..=end {
    match session.cache.get(n) {
      Some(message) => {
        let flags = [
          (crate::cache::SEEN, 'S'),
          (crate::cache::RECENT, 'R'),
          (crate::cache::ANSWERED, 'A'),
          (crate::cache::DELETED, 'D'),
          (crate::cache::FLAGGED, 'F'),
        ]
        .into_iter()
        .filter(|(bit, _)| message.flags & bit != 0)
        .map(|(_, letter)| letter)
        .collect::<String>();
        println!(
          "{:<5} {:<20} {:<35} {flags}",
          n,
          truncate(&format_from(message), 20),
          truncate(message.envelope.subject.as_deref().unwrap_or("(no subject)"), 35),
        );
      }
      None => println!("{n:<5} (not fetched yet)"),
    }
  }
}

fn display_message<RW>(session: &mut Session<RW>, n: usize) -> anyhow::Result<()>
where
  RW: Read + Write,
{
  if n == 0 || n > session.cache.size() {
    println!("no such message: {n}");
    return Ok(());
  }
  if session.cache.get(n).and_then(|m| m.body_text.as_ref()).is_none() {
    session.fetch_text(n).context("fetching message text failed")?;
  }
  match session.cache.get(n) {
    Some(message) => {
      println!("Subject: {}", message.envelope.subject.as_deref().unwrap_or(""));
      println!("From: {}", format_from(message));
      println!("Date: {}", message.internal_date.as_deref().unwrap_or(""));
      println!();
      println!("{}", message.body_text.as_deref().unwrap_or(""));
    }
    None => println!("no such message: {n}"),
  }
  Ok(())
}

enum Command {
  Delete(usize),
  Undelete(usize),
  Expunge,
  Read(usize),
  Page(usize),
  Select(String),
  List,
  Stats,
  Clear,
  Logout,
  Help,
  Invalid,
  Empty,
}

fn parse_command(line: &str) -> Command {
  let line = line.trim();
  if line.is_empty() {
    return Command::Empty;
  }
  let Some(rest) = line.strip_prefix('!') else {
    return Command::Invalid;
  };
  let mut parts = rest.splitn(2, char::is_whitespace);
  let word = parts.next().unwrap_or("");
  let argument = parts.next().unwrap_or("").trim();
  match word {
    "delete" => argument.parse().map(Command::Delete).unwrap_or(Command::Invalid),
    "undelete" => argument.parse().map(Command::Undelete).unwrap_or(Command::Invalid),
    "expunge" => Command::Expunge,
    "read" => argument.parse().map(Command::Read).unwrap_or(Command::Invalid),
    "page" => argument.parse().map(Command::Page).unwrap_or(Command::Invalid),
    "select" if !argument.is_empty() => Command::Select(argument.to_owned()),
    "list" => Command::List,
    "stats" => Command::Stats,
    "clear" => Command::Clear,
    "logout" => Command::Logout,
    "help" => Command::Help,
    _ => Command::Invalid,
  }
}

/// Prompts for a mailbox (default INBOX) and selects it, retrying on a server NO.
fn select_mailbox<RW>(session: &mut Session<RW>) -> anyhow::Result<()>
where
  RW: Read + Write,
{
  let mut mailbox = "INBOX".to_owned();
  loop {
    match session.select(&mailbox).context("mailbox selection failed")? {
      session::Outcome::Ok => {
        println!("selected {mailbox}");
        return Ok(());
      }
      session::Outcome::Retry(_) => {
        print!("mailbox name [INBOX]: ");
        std::io::stdout().flush().ok();
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        let input = input.trim();
        mailbox = if input.is_empty() { "INBOX".to_owned() } else { input.to_owned() };
      }
    }
  }
}

/// Attempts LOGIN; on a server NO, asks the user whether to try again with the same credentials.
/// Returns `false` once the user declines, `true` on success.
fn login<RW>(session: &mut Session<RW>, user: &str, password: &str) -> anyhow::Result<bool>
where
  RW: Read + Write,
{
  loop {
    match session.login(user, password).context("login failed")? {
      session::Outcome::Ok => return Ok(true),
      session::Outcome::Retry(_) => {
        print!("login failed, try again? [y/N] ");
        std::io::stdout().flush().ok();
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
          return Ok(false);
        }
      }
    }
  }
}

pub fn run<RW>(session: &mut Session<RW>, user: &str, password: &str) -> anyhow::Result<()>
where
  RW: Read + Write,
{
  if !login(session, user, password)? {
    return Ok(());
  }
  select_mailbox(session)?;

  let lines = spawn_stdin_reader();
  print_help();
  loop {
    match lines.recv_timeout(NOOP_INTERVAL) {
      Ok(line) => match parse_command(&line) {
        Command::Delete(n) => session.delete(n)?,
        Command::Undelete(n) => session.undelete(n)?,
        Command::Expunge => session.expunge()?,
        Command::Read(n) => display_message(session, n)?,
        Command::Page(n) => print_page(session, n),
        Command::Select(name) => {
          session.cache.reset();
          match session.select(&name)? {
            session::Outcome::Ok => println!("selected {name}"),
            session::Outcome::Retry(text) => println!("couldn't select {name}: {text}"),
          }
        }
        Command::List => session.list()?,
        Command::Stats => print_stats(session),
        Command::Clear => print!("\x1b[2J\x1b[H"),
        Command::Logout => break,
        Command::Help => print_help(),
        Command::Invalid => println!("invalid command, try !help"),
        Command::Empty => (),
      },
      Err(mpsc::RecvTimeoutError::Timeout) => (),
      Err(mpsc::RecvTimeoutError::Disconnected) => break,
    }
    session.noop().context("keepalive failed")?;
    session.close_gap().context("fetching new messages failed")?;
  }
  session.logout().context("logout failed")
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io;

  struct NoTraffic;

  impl Read for NoTraffic {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
      Ok(0)
    }
  }

  impl Write for NoTraffic {
    fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
      panic!("display_message must not touch the wire for an out-of-range message number");
    }
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.write_all(buf).map(|()| buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn display_message_out_of_range_does_not_hit_the_wire() {
    let mut session = Session::new(NoTraffic);
    session.cache.resize(2);
    display_message(&mut session, 9999).unwrap();
  }

  #[test]
  fn parses_delete_with_argument() {
    assert!(matches!(parse_command("!delete 3"), Command::Delete(3)));
  }

  #[test]
  fn parses_select_with_name() {
    assert!(matches!(parse_command("!select Archive"), Command::Select(name) if name == "Archive"));
  }

  #[test]
  fn rejects_non_bang_prefixed_lines() {
    assert!(matches!(parse_command("delete 3"), Command::Invalid));
  }

  #[test]
  fn empty_line_is_empty_not_invalid() {
    assert!(matches!(parse_command(""), Command::Empty));
  }

  #[test]
  fn truncate_keeps_short_strings() {
    assert_eq!("hello", truncate("hello", 10));
  }

  #[test]
  fn truncate_shortens_long_strings() {
    assert_eq!(5, truncate("hello world", 5).chars().count());
  }
}
