// https://www.rfc-editor.org/rfc/rfc3501#section-9 - formal syntax
// https://www.rfc-editor.org/rfc/rfc2234#section-2.3 - ABNF core rules

use anyhow::Context as _;
use std::{cmp, fmt, io};

/// One node of the wire grammar: an atom/quoted-string/literal (all three collapse to `Str`
/// once parsed — nothing downstream cares how the bytes arrived), a parenthesized list, or one
/// of the two delimiters a caller can choose to materialize instead of silently skipping.
#[derive(Clone, Debug, PartialEq)]
pub enum Object {
  Nil,
  Str(Vec<u8>),
  List(Vec<Object>),
  Sp,
  Crlf,
}

impl Object {
  pub fn as_str(&self) -> Option<&[u8]> {
    match self {
      Object::Str(bytes) => Some(bytes),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[Object]> {
    match self {
      Object::List(objects) => Some(objects),
      Object::Nil => Some(&[]),
      _ => None,
    }
  }
}

/// A declared literal octet count above this is rejected before any byte of it is read. Chosen
/// to comfortably hold a full message while still bounding a hostile server's request for
/// allocation.
pub const MAX_LITERAL: u64 = 16 * 1024 * 1024;

fn is_forbidden(byte: u8) -> bool {
  matches!(byte, b'{' | b'"' | b'\r' | b'\n' | b'%')
}

fn escape(bytes: &[u8]) -> String {
  let mut string = String::new();
  for byte in bytes {
    string += &std::ascii::escape_default(*byte).to_string();
  }
  string
}

/// Blocking byte channel with one-byte pushback, built on any `Read + Write`. Owns line-level
/// debug logging of what's sent and received so protocol traffic shows up in the trace log
/// without every call site having to remember to log it.
pub struct Stream<RW> {
  rw: RW,
  pushback: Option<u8>,
}

impl<RW> Stream<RW>
where
  RW: io::Read + io::Write,
{
  pub fn new(rw: RW) -> Self {
    Self { rw, pushback: None }
  }

  #[cfg(test)]
  pub fn inner(&self) -> &RW {
    &self.rw
  }

  pub fn write_line(&mut self, line: &[u8]) -> anyhow::Result<()> {
    log::debug!("> {}", escape(line));
    self.rw.write_all(line)?;
    Ok(())
  }

  fn read_byte(&mut self) -> anyhow::Result<u8> {
    if let Some(byte) = self.pushback.take() {
      return Ok(byte);
    }
    let mut buffer = [0u8; 1];
    match self.rw.read(&mut buffer)? {
      0 => anyhow::bail!(Signal::Disconnected),
      _ => Ok(buffer[0]),
    }
  }

  fn read_exact(&mut self, n: u64) -> anyhow::Result<Vec<u8>> {
    let n = usize::try_from(n).context("literal size doesn't fit this platform's usize")?;
    let mut out = Vec::new();
    out
      .try_reserve_exact(n)
      .map_err(|_| anyhow::anyhow!(Signal::Malformed("literal too large to allocate".into())))?;
    // The first byte may be sitting in pushback from a prior one-byte peek.
    if let Some(byte) = self.pushback.take() {
      out.push(byte);
    }
    let mut chunk = [0u8; 64 * 1024];
    while out.len() < n {
      let want = cmp::min(chunk.len(), n - out.len());
      match self.rw.read(&mut chunk[..want])? {
        0 => anyhow::bail!(Signal::Disconnected),
        read => out.extend_from_slice(&chunk[..read]),
      }
    }
    Ok(out)
  }

  fn peek(&mut self) -> anyhow::Result<u8> {
    if let Some(byte) = self.pushback {
      return Ok(byte);
    }
    let byte = self.read_byte()?;
    self.pushback = Some(byte);
    Ok(byte)
  }

  fn expect_byte(&mut self, want: u8) -> anyhow::Result<()> {
    let got = self.read_byte()?;
    if got != want {
      anyhow::bail!(Signal::Malformed(format!(
        "expected {:?}, got {:?}",
        want as char, got as char
      )));
    }
    Ok(())
  }

  /// Parses exactly one object starting at the current position, driven by a one-byte lookahead.
  /// `in_list` controls whether an unescaped `)` terminates a bare atom (it does inside a list,
  /// it's an ordinary atom character everywhere else per the grammar this client accepts).
  pub fn parse_object(&mut self, in_list: bool) -> anyhow::Result<Object> {
    match self.peek()? {
      b'(' => self.parse_list(),
      b'{' => self.parse_literal(),
      b'"' => self.parse_quoted(),
      b' ' => {
        self.expect_byte(b' ')?;
        Ok(Object::Sp)
      }
      b'\r' => {
        self.expect_byte(b'\r')?;
        self.expect_byte(b'\n')?;
        Ok(Object::Crlf)
      }
      _ => self.parse_atom(in_list),
    }
  }

  fn parse_list(&mut self) -> anyhow::Result<Object> {
    self.expect_byte(b'(')?;
    let mut items = Vec::new();
    loop {
      if self.peek()? == b')' {
        self.expect_byte(b')')?;
        break;
      }
      items.push(self.parse_object(true)?);
      if self.peek()? == b' ' {
        self.expect_byte(b' ')?;
      }
    }
    Ok(if items.is_empty() {
      Object::Nil
    } else {
      Object::List(items)
    })
  }

  fn parse_literal(&mut self) -> anyhow::Result<Object> {
    self.expect_byte(b'{')?;
    let mut digits = Vec::new();
    loop {
      let byte = self.read_byte()?;
      if byte == b'}' {
        break;
      }
      if !byte.is_ascii_digit() {
        anyhow::bail!(Signal::Malformed("non-digit in literal octet count".into()));
      }
      digits.push(byte);
    }
    self.expect_byte(b'\r')?;
    self.expect_byte(b'\n')?;
    let n: u64 = std::str::from_utf8(&digits)
      .ok()
      .and_then(|s| s.parse().ok())
      .ok_or_else(|| anyhow::anyhow!(Signal::Malformed("bad literal octet count".into())))?;
    if n > MAX_LITERAL {
      anyhow::bail!(Signal::Malformed(format!(
        "literal of {n} octets exceeds the {MAX_LITERAL} octet cap"
      )));
    }
    if n == 0 {
      return Ok(Object::Nil);
    }
    let bytes = self.read_exact(n)?;
    Ok(Object::Str(bytes))
  }

  fn parse_quoted(&mut self) -> anyhow::Result<Object> {
    self.expect_byte(b'"')?;
    let mut bytes = Vec::new();
    loop {
      let byte = self.read_byte()?;
      if byte == b'"' {
        break;
      }
      if is_forbidden(byte) {
        anyhow::bail!(Signal::Malformed(format!(
          "forbidden byte {:?} in quoted string",
          byte as char
        )));
      }
      bytes.push(byte);
    }
    if bytes.is_empty() {
      Ok(Object::Nil)
    } else {
      Ok(Object::Str(bytes))
    }
  }

  fn parse_atom(&mut self, in_list: bool) -> anyhow::Result<Object> {
    let mut bytes = Vec::new();
    loop {
      let byte = self.peek()?;
      if byte == b' ' || byte == b'\r' || (in_list && byte == b')') {
        break;
      }
      if is_forbidden(byte) {
        anyhow::bail!(Signal::Malformed(format!(
          "forbidden byte {:?} in atom",
          byte as char
        )));
      }
      bytes.push(byte);
      self.read_byte()?;
    }
    if bytes.is_empty() {
      anyhow::bail!(Signal::Malformed("empty atom".into()));
    }
    if bytes.eq_ignore_ascii_case(b"NIL") {
      Ok(Object::Nil)
    } else {
      Ok(Object::Str(bytes))
    }
  }

  pub fn expect_space(&mut self) -> anyhow::Result<()> {
    match self.parse_object(false)? {
      Object::Sp => Ok(()),
      other => anyhow::bail!(Signal::Malformed(format!("expected SP, got {other:?}"))),
    }
  }

  pub fn expect_string(&mut self) -> anyhow::Result<Vec<u8>> {
    match self.parse_object(false)? {
      Object::Str(bytes) => Ok(bytes),
      other => anyhow::bail!(Signal::Malformed(format!("expected a string, got {other:?}"))),
    }
  }

  pub fn expect_list(&mut self) -> anyhow::Result<Vec<Object>> {
    match self.parse_object(false)? {
      Object::List(items) => Ok(items),
      Object::Nil => Ok(Vec::new()),
      other => anyhow::bail!(Signal::Malformed(format!("expected a list, got {other:?}"))),
    }
  }

  /// Consumes and discards objects up to and including the next CRLF.
  pub fn skip_line(&mut self) -> anyhow::Result<()> {
    loop {
      if self.peek()? == b'\r' {
        self.expect_byte(b'\r')?;
        self.expect_byte(b'\n')?;
        return Ok(());
      }
      self.skip_one()?;
      if self.peek()? == b' ' {
        self.expect_byte(b' ')?;
      }
    }
  }

  /// Consumes and discards exactly one object (used between tag/command-name tokens).
  pub fn skip_one(&mut self) -> anyhow::Result<()> {
    self.parse_object(false)?;
    Ok(())
  }

  /// Like `skip_line` but renders everything through `writer` (used to surface NO/BAD text).
  pub fn echo_line(&mut self, writer: &mut dyn fmt::Write) -> anyhow::Result<()> {
    loop {
      if self.peek()? == b'\r' {
        self.expect_byte(b'\r')?;
        self.expect_byte(b'\n')?;
        return Ok(());
      }
      match self.parse_object(false)? {
        Object::Str(bytes) => {
          let _ = write!(writer, "{}", String::from_utf8_lossy(&bytes));
        }
        Object::List(_) | Object::Nil => (),
        Object::Sp | Object::Crlf => (),
      }
      if self.peek()? == b' ' {
        self.expect_byte(b' ')?;
        let _ = write!(writer, " ");
      }
    }
  }
}

/// Typed error kinds distinguished at the type level, following the spec's error-handling design:
/// a small `std::error::Error` enum wrapped by `anyhow`, downcast at the one or two call sites
/// that need to branch on it instead of just propagating. The two non-error control signals the
/// spec also names, `Retry` (LOGIN/SELECT got NO) and `Quit` (user asked to log out), are modeled
/// separately by `session::Outcome` and `repl::Command::Logout` respectively, since both are
/// expected outcomes of a successful round trip rather than failures of the wire layer.
#[derive(Debug)]
pub enum Signal {
  Malformed(String),
  Disconnected,
  CommandRejected(String),
}

impl fmt::Display for Signal {
  fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Signal::Malformed(text) => write!(formatter, "malformed response: {text}"),
      Signal::Disconnected => write!(formatter, "disconnected"),
      Signal::CommandRejected(text) => write!(formatter, "command rejected: {text}"),
    }
  }
}

impl std::error::Error for Signal {}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io;

  fn stream(input: &[u8]) -> Stream<io::Cursor<Vec<u8>>> {
    Stream::new(io::Cursor::new(input.to_vec()))
  }

  #[test]
  fn empty_quoted_is_nil() {
    let mut s = stream(br#""""#);
    assert_eq!(Object::Nil, s.parse_object(false).unwrap());
  }

  #[test]
  fn empty_list_is_nil() {
    let mut s = stream(b"()");
    assert_eq!(Object::Nil, s.parse_object(false).unwrap());
  }

  #[test]
  fn empty_literal_is_nil() {
    let mut s = stream(b"{0}\r\n");
    assert_eq!(Object::Nil, s.parse_object(false).unwrap());
  }

  #[test]
  fn literal_carries_crlf_bytes_verbatim() {
    let mut s = stream(b"{7}\r\nhi\r\nyo");
    assert_eq!(Object::Str(b"hi\r\nyo".to_vec()), s.parse_object(false).unwrap());
  }

  #[test]
  fn nested_list_of_nils() {
    let mut s = stream(b"((NIL \"\" ()) NIL)");
    assert_eq!(
      Object::List(vec![
        Object::List(vec![Object::Nil, Object::Nil, Object::Nil]),
        Object::Nil,
      ]),
      s.parse_object(false).unwrap()
    );
  }

  #[test]
  fn forbidden_byte_in_atom_is_malformed() {
    let mut s = stream(b"fo%o ");
    let error = s.parse_object(false).unwrap_err();
    assert!(error.downcast_ref::<Signal>().is_some());
  }

  #[test]
  fn literal_over_cap_is_malformed() {
    let mut s = stream(format!("{{{}}}\r\n", MAX_LITERAL + 1).as_bytes());
    let error = s.parse_object(false).unwrap_err();
    match error.downcast_ref::<Signal>() {
      Some(Signal::Malformed(_)) => (),
      other => panic!("expected Malformed, got {other:?}"),
    }
  }

  #[test]
  fn early_eof_is_disconnected_not_malformed() {
    let mut s = stream(b"{5}\r\nhi");
    let error = s.parse_object(false).unwrap_err();
    match error.downcast_ref::<Signal>() {
      Some(Signal::Disconnected) => (),
      other => panic!("expected Disconnected, got {other:?}"),
    }
  }

  #[test]
  fn quoted_string_backslash_is_not_an_escape() {
    let mut s = stream(b"\"a\\\"bc\"");
    assert_eq!(Object::Str(b"a\\".to_vec()), s.parse_object(false).unwrap());
  }

  #[test]
  fn atom_becomes_str() {
    let mut s = stream(b"FETCH ");
    assert_eq!(Object::Str(b"FETCH".to_vec()), s.parse_object(false).unwrap());
  }
}
