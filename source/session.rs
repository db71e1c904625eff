// The command dispatcher: generates tags, writes commands, drains untagged responses through
// the interpreter while waiting for the matching tagged completion. Grounded on the dispatch
// loop shape shared by every command in the teacher's sync/mod.rs (greetings/authenticate/enable)
// and original_source/src/commands.c's sendCommand/sendSelect/sendLogin.

use crate::{cache, untagged, wire};
use std::io::{Read, Write};

/// A, B, ..., Z, A, ... each cycling through 000..999. original_source/src/utils.c's
/// generateTag() in spirit; kept as plain session-owned state rather than process-global.
struct TagGenerator {
  letter: u8,
  number: u16,
}

impl TagGenerator {
  fn new() -> Self {
    Self {
      letter: b'A',
      number: 0,
    }
  }

  fn next(&mut self) -> String {
    let tag = format!("{}{:03}", self.letter as char, self.number);
    self.number += 1;
    if self.number == 1000 {
      self.number = 0;
      self.letter = if self.letter == b'Z' { b'A' } else { self.letter + 1 };
    }
    tag
  }
}

pub struct Session<RW> {
  stream: wire::Stream<RW>,
  tags: TagGenerator,
  pub cache: cache::Cache,
}

/// What happened to a command that can legitimately be refused by the server (LOGIN, SELECT).
pub enum Outcome {
  Ok,
  Retry(String),
}

impl<RW> Session<RW>
where
  RW: Read + Write,
{
  pub fn new(rw: RW) -> Self {
    Self {
      stream: wire::Stream::new(rw),
      tags: TagGenerator::new(),
      cache: cache::Cache::new(),
    }
  }

  /// Reads the server's initial `* OK ...` greeting.
  pub fn greeting(&mut self) -> anyhow::Result<()> {
    let head = self.stream.expect_string()?;
    anyhow::ensure!(
      head == b"*",
      "{}",
      wire::Signal::Malformed(format!("expected an untagged greeting, got {head:?}"))
    );
    self.stream.expect_space()?;
    let word = self.stream.expect_string()?;
    if !word.eq_ignore_ascii_case(b"OK") {
      let mut text = String::new();
      self.stream.echo_line(&mut text)?;
      anyhow::bail!(wire::Signal::Malformed(format!("bad greeting: {word:?} {text}")));
    }
    self.stream.skip_line()
  }

  /// Drives a command through completion. `context` is passed through to the untagged
  /// interpreter for every untagged line seen while waiting for the tag.
  fn dispatch(&mut self, command: &str, context: untagged::Context) -> anyhow::Result<Outcome> {
    let tag = self.tags.next();
    self.stream.write_line(format!("{tag} {command}\r\n").as_bytes())?;
    loop {
      let head = self.stream.expect_string()?;
      if head == tag.as_bytes() {
        self.stream.expect_space()?;
        let word = self.stream.expect_string()?;
        return match word.to_ascii_uppercase().as_slice() {
          b"OK" => {
            self.stream.skip_line()?;
            Ok(Outcome::Ok)
          }
          b"NO" => {
            let mut text = String::new();
            self.stream.echo_line(&mut text)?;
            eprintln!("server: {text}");
            Ok(Outcome::Retry(text))
          }
          _ => {
            let mut text = String::new();
            self.stream.echo_line(&mut text)?;
            anyhow::bail!(wire::Signal::CommandRejected(format!("{word:?} {text}")))
          }
        };
      }
      anyhow::ensure!(
        head == b"*",
        "{}",
        wire::Signal::Malformed(format!("unexpected response tag {head:?}"))
      );
      self.stream.expect_space()?;
      let mut stderr = String::new();
      untagged::interpret(&mut self.stream, &mut self.cache, context, &mut stderr)?;
      if !stderr.is_empty() {
        eprintln!("{stderr}");
      }
    }
  }

  pub fn login(&mut self, user: &str, password: &str) -> anyhow::Result<Outcome> {
    self.dispatch(
      &format!("LOGIN {} {}", quote(user), quote(password)),
      untagged::Context::None,
    )
  }

  /// Selects `mailbox` and, on success, bulk-fetches every message it contains so the cache
  /// starts fully populated with no pending gap.
  pub fn select(&mut self, mailbox: &str) -> anyhow::Result<Outcome> {
    match self.dispatch(&format!("SELECT {mailbox}"), untagged::Context::Select)? {
      Outcome::Ok => {
        let size = self.cache.size();
        if size > 0 {
          self.fetch_all(1, size)?;
        }
        self.cache.mark_synced();
        Ok(Outcome::Ok)
      }
      retry => Ok(retry),
    }
  }

  pub fn list(&mut self) -> anyhow::Result<()> {
    self.dispatch("LIST \"\" %", untagged::Context::List).map(|_| ())
  }

  /// Fetches the full ALL set for messages `start..=end` (1-based, inclusive). A no-op if the
  /// range is empty, mirroring sendFetchAll's `endNum == 0` guard.
  pub fn fetch_all(&mut self, start: usize, end: usize) -> anyhow::Result<()> {
    if end == 0 || start > end {
      return Ok(());
    }
    let range = if start == end {
      format!("{start}")
    } else {
      format!("{start}:{end}")
    };
    self.dispatch(&format!("FETCH {range} ALL"), untagged::Context::None)?;
    Ok(())
  }

  pub fn fetch_text(&mut self, n: usize) -> anyhow::Result<()> {
    self.dispatch(&format!("FETCH {n} RFC822.TEXT"), untagged::Context::None)?;
    Ok(())
  }

  pub fn delete(&mut self, n: usize) -> anyhow::Result<()> {
    self
      .dispatch(&format!("STORE {n} +FLAGS (\\DELETED)"), untagged::Context::None)?;
    Ok(())
  }

  pub fn undelete(&mut self, n: usize) -> anyhow::Result<()> {
    self
      .dispatch(&format!("STORE {n} -FLAGS (\\DELETED)"), untagged::Context::None)?;
    Ok(())
  }

  pub fn expunge(&mut self) -> anyhow::Result<()> {
    self.dispatch("EXPUNGE", untagged::Context::None)?;
    Ok(())
  }

  pub fn noop(&mut self) -> anyhow::Result<()> {
    self.dispatch("NOOP", untagged::Context::None)?;
    Ok(())
  }

  /// Closes any pending fetch gap: if the cache grew (an EXISTS arrived mid-command) since the
  /// last time this was called, fetches the newly-visible slots and marks the cache synced.
  pub fn close_gap(&mut self) -> anyhow::Result<()> {
    let (prev, size) = (self.cache.prev_size(), self.cache.size());
    if size > prev {
      self.fetch_all(prev + 1, size)?;
      self.cache.mark_synced();
    }
    Ok(())
  }

  /// Sends LOGOUT and waits for the matching tag, printing any untagged BYE line and ignoring
  /// everything else — mirrors original_source/src/commands.c's logout().
  pub fn logout(&mut self) -> anyhow::Result<()> {
    let tag = self.tags.next();
    self.stream.write_line(format!("{tag} LOGOUT\r\n").as_bytes())?;
    loop {
      let head = self.stream.expect_string()?;
      if head == tag.as_bytes() {
        self.stream.skip_line()?;
        return Ok(());
      }
      anyhow::ensure!(
        head == b"*",
        "{}",
        wire::Signal::Malformed(format!("unexpected response tag {head:?} during logout"))
      );
      self.stream.expect_space()?;
      let word = self.stream.expect_string()?;
      if word.eq_ignore_ascii_case(b"BYE") {
        let mut text = String::new();
        self.stream.echo_line(&mut text)?;
        println!("server: {text}");
      } else {
        let mut unused = String::new();
        self.stream.echo_line(&mut unused)?;
      }
    }
  }
}

fn quote(s: &str) -> String {
  format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io;

  /// An in-memory duplex fixture: reads come from a fixed canned buffer, writes accumulate into
  /// `outbound` so tests can assert on the exact bytes a command put on the wire.
  fn duplex(server_says: &[u8]) -> Session<DuplexFixture> {
    Session::new(DuplexFixture {
      inbound: io::Cursor::new(server_says.to_vec()),
      outbound: Vec::new(),
    })
  }

  struct DuplexFixture {
    inbound: io::Cursor<Vec<u8>>,
    outbound: Vec<u8>,
  }

  impl Read for DuplexFixture {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      self.inbound.read(buf)
    }
  }

  impl Write for DuplexFixture {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
      self.outbound.extend_from_slice(buf);
      Ok(())
    }
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.outbound.extend_from_slice(buf);
      Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn greeting_ok() {
    let mut session = duplex(b"* OK IMAP server ready\r\n");
    session.greeting().unwrap();
  }

  #[test]
  fn select_bulk_prefetches_and_syncs() {
    let mut session = duplex(
      b"* 3 EXISTS\r\n\
        * 1 RECENT\r\n\
        A000 OK completed\r\n\
        * 1 FETCH (RFC822.SIZE 10)\r\n\
        * 2 FETCH (RFC822.SIZE 20)\r\n\
        * 3 FETCH (RFC822.SIZE 30)\r\n\
        A001 OK fetch completed\r\n",
    );
    let outcome = session.select("INBOX").unwrap();
    assert!(matches!(outcome, Outcome::Ok));
    assert_eq!(3, session.cache.size());
    assert_eq!(3, session.cache.prev_size());
    assert_eq!(1, session.cache.recent());
    assert_eq!(Some(10), session.cache.get(1).unwrap().size_octets);
    assert_eq!(Some(30), session.cache.get(3).unwrap().size_octets);
  }

  #[test]
  fn select_sends_unquoted_mailbox_name() {
    let mut session = duplex(b"* 0 EXISTS\r\n* 0 RECENT\r\nA000 OK completed\r\n");
    session.select("INBOX").unwrap();
    assert_eq!(b"A000 SELECT INBOX\r\n", session.stream.inner().outbound.as_slice());
  }

  #[test]
  fn login_no_is_retry_not_fatal() {
    let mut session = duplex(b"A000 NO bad credentials\r\n");
    match session.login("user", "pass").unwrap() {
      Outcome::Retry(text) => assert!(text.contains("bad credentials")),
      Outcome::Ok => panic!("expected Retry"),
    }
  }

  #[test]
  fn noop_drains_expunge_mid_command() {
    let mut session = duplex(b"* 2 EXPUNGE\r\nA000 OK NOOP completed\r\n");
    session.cache.resize(3);
    session.noop().unwrap();
    assert_eq!(2, session.cache.size());
  }

  #[test]
  fn close_gap_fetches_only_new_slots() {
    let mut session = duplex(b"* 4 FETCH (RFC822.SIZE 40)\r\nA000 OK fetch completed\r\n");
    session.cache.resize(4);
    session.cache.set_recent(0);
    // Pretend slots 1..=3 were already synced; only slot 4 is new.
    session.cache.resize(3);
    session.cache.mark_synced();
    session.cache.resize(4);
    session.close_gap().unwrap();
    assert_eq!(4, session.cache.prev_size());
  }
}
