// Classifies one untagged ("*") response and applies its effect to the cache. Grounded on
// original_source/src/untagged.c, with the C original's unchecked-tag assumptions replaced by
// explicit checks that surface Malformed instead of crashing.

use crate::{address, cache, mime, wire};
use std::fmt::Write as _;

/// Mirrors NO_CONTEXT/IN_SELECT/IN_LIST from the C original: some untagged shapes (LIST) are
/// only meaningful, or only safe to act on, while a specific command is outstanding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Context {
  None,
  Select,
  List,
}

fn parse_u64(bytes: &[u8]) -> anyhow::Result<u64> {
  std::str::from_utf8(bytes)
    .ok()
    .and_then(|s| s.parse().ok())
    .ok_or_else(|| anyhow::anyhow!(wire::Signal::Malformed("expected a decimal number".into())))
}

fn parse_flags(object: &wire::Object) -> anyhow::Result<u32> {
  let items = match object {
    wire::Object::Nil => return Ok(0),
    wire::Object::List(items) => items,
    other => anyhow::bail!(wire::Signal::Malformed(format!(
      "FLAGS value is not a list: {other:?}"
    ))),
  };
  let mut flags = 0;
  for item in items {
    let bytes = item
      .as_str()
      .ok_or_else(|| anyhow::anyhow!(wire::Signal::Malformed(format!("flag is not a string: {item:?}"))))?;
    flags |= match bytes.to_ascii_uppercase().as_slice() {
      b"\\SEEN" => cache::SEEN,
      b"\\RECENT" => cache::RECENT,
      b"\\ANSWERED" => cache::ANSWERED,
      b"\\DELETED" => cache::DELETED,
      b"\\FLAGGED" => cache::FLAGGED,
      _ => 0, // unrecognized flags (keywords, \Draft, ...) are ignored, not an error
    };
  }
  Ok(flags)
}

fn parse_envelope(object: &wire::Object) -> anyhow::Result<cache::Envelope> {
  let fields = object
    .as_list()
    .ok_or_else(|| anyhow::anyhow!(wire::Signal::Malformed(format!("ENVELOPE is not a list: {object:?}"))))?;
  anyhow::ensure!(
    fields.len() == 10,
    "{}",
    wire::Signal::Malformed(format!("ENVELOPE has {} fields, expected 10", fields.len()))
  );
  let subject = match &fields[1] {
    wire::Object::Nil => None,
    wire::Object::Str(bytes) => Some(mime::decode(&String::from_utf8_lossy(bytes))),
    other => anyhow::bail!(wire::Signal::Malformed(format!(
      "ENVELOPE subject is not a string: {other:?}"
    ))),
  };
  Ok(cache::Envelope {
    subject,
    from: address::decode_list(&fields[2])?,
    to: address::decode_list(&fields[5])?,
    cc: address::decode_list(&fields[6])?,
  })
}

/// Applies a FETCH/STORE attribute list to the message at `position`, creating the slot if
/// absent.
fn apply_fetch(cache: &mut cache::Cache, position: usize, attrs: &[wire::Object]) -> anyhow::Result<()> {
  anyhow::ensure!(
    attrs.len() % 2 == 0,
    "{}",
    wire::Signal::Malformed("FETCH attribute list has an odd number of elements".into())
  );
  let pairs: Vec<(&wire::Object, &wire::Object)> = attrs
    .chunks_exact(2)
    .map(|pair| (&pair[0], &pair[1]))
    .collect();
  let mut error = None;
  cache
    .merge(position, |message| {
      for (key, value) in &pairs {
        let key = match key.as_str() {
          Some(bytes) => bytes.to_ascii_uppercase(),
          None => {
            error = Some(anyhow::anyhow!(wire::Signal::Malformed(format!(
              "FETCH key is not a string: {key:?}"
            ))));
            return;
          }
        };
        let result = (|| -> anyhow::Result<()> {
          match key.as_slice() {
            b"RFC822.TEXT" => {
              message.body_text = match value {
                wire::Object::Nil => None,
                wire::Object::Str(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                other => anyhow::bail!(wire::Signal::Malformed(format!(
                  "RFC822.TEXT is not a string: {other:?}"
                ))),
              };
            }
            b"FLAGS" => message.flags = parse_flags(value)?,
            b"INTERNALDATE" => {
              message.internal_date = match value {
                wire::Object::Nil => None,
                wire::Object::Str(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                other => anyhow::bail!(wire::Signal::Malformed(format!(
                  "INTERNALDATE is not a string: {other:?}"
                ))),
              };
            }
            b"RFC822.SIZE" => {
              message.size_octets = Some(parse_u64(
                value
                  .as_str()
                  .ok_or_else(|| anyhow::anyhow!(wire::Signal::Malformed("RFC822.SIZE is not a string".into())))?,
              )?)
            }
            b"ENVELOPE" => message.envelope = parse_envelope(value)?,
            _ => (), // ignore attributes this client doesn't consume
          }
          Ok(())
        })();
        if let Err(e) = result {
          error = Some(e);
          return;
        }
      }
    })
    .map_err(|e| anyhow::anyhow!(wire::Signal::Malformed(e.to_string())))?;
  if let Some(error) = error {
    return Err(error);
  }
  Ok(())
}

/// Reads one untagged response (the bytes after "* " have already been consumed up to the first
/// token) and applies its effect. `stderr` receives any server-supplied NO/BAD text.
pub fn interpret<RW>(
  stream: &mut wire::Stream<RW>,
  cache: &mut cache::Cache,
  context: Context,
  stderr: &mut dyn std::fmt::Write,
) -> anyhow::Result<()>
where
  RW: std::io::Read + std::io::Write,
{
  let head = stream.expect_string()?;
  if let Ok(n) = std::str::from_utf8(&head).unwrap_or("").parse::<usize>() {
    stream.expect_space()?;
    let what = stream.expect_string()?;
    match what.to_ascii_uppercase().as_slice() {
      b"RECENT" => {
        cache.set_recent(n as u32);
        stream.skip_line()
      }
      b"EXPUNGE" => {
        cache.remove(n).map_err(|e| anyhow::anyhow!(wire::Signal::Malformed(e.to_string())))?;
        stream.skip_line()
      }
      b"EXISTS" => {
        if context == Context::Select {
          cache.reset();
        }
        cache.resize(n);
        stream.skip_line()
      }
      b"FETCH" | b"STORE" => {
        stream.expect_space()?;
        let attrs = stream.expect_list()?;
        apply_fetch(cache, n, &attrs)?;
        stream.skip_line()
      }
      _ => stream.skip_line(),
    }
  } else {
    match head.to_ascii_uppercase().as_slice() {
      b"LIST" if context == Context::List => {
        stream.expect_space()?;
        let _attrs = stream.expect_list()?;
        stream.expect_space()?;
        stream.skip_one()?;
        stream.expect_space()?;
        let name = stream.expect_string()?;
        println!("> {}", String::from_utf8_lossy(&name));
        stream.skip_line()
      }
      b"NO" => {
        let _ = write!(stderr, "server: ");
        stream.echo_line(stderr)
      }
      b"BAD" => {
        let _ = write!(stderr, "server: ");
        let mut text = String::new();
        stream.echo_line(&mut text)?;
        anyhow::bail!(wire::Signal::CommandRejected(text))
      }
      _ => stream.skip_line(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io;

  fn interpret_str(input: &str, cache: &mut cache::Cache, context: Context) -> anyhow::Result<String> {
    let mut stream = wire::Stream::new(io::Cursor::new(input.as_bytes().to_vec()));
    let mut stderr = String::new();
    interpret(&mut stream, cache, context, &mut stderr)?;
    Ok(stderr)
  }

  #[test]
  fn exists_outside_select_resizes_without_reset() {
    let mut cache = cache::Cache::new();
    cache.resize(1);
    cache.mark_synced();
    interpret_str("3 EXISTS\r\n", &mut cache, Context::None).unwrap();
    assert_eq!(3, cache.size());
    assert_eq!(1, cache.prev_size());
  }

  #[test]
  fn exists_in_select_resets_first() {
    let mut cache = cache::Cache::new();
    cache.resize(5);
    cache.mark_synced();
    interpret_str("3 EXISTS\r\n", &mut cache, Context::Select).unwrap();
    assert_eq!(3, cache.size());
    assert_eq!(0, cache.prev_size());
  }

  #[test]
  fn recent_sets_counter() {
    let mut cache = cache::Cache::new();
    interpret_str("1 RECENT\r\n", &mut cache, Context::None).unwrap();
    assert_eq!(1, cache.recent());
  }

  #[test]
  fn expunge_removes_and_shifts() {
    let mut cache = cache::Cache::new();
    cache.resize(3);
    interpret_str("2 EXPUNGE\r\n", &mut cache, Context::None).unwrap();
    assert_eq!(2, cache.size());
  }

  #[test]
  fn fetch_merges_flags_and_size() {
    let mut cache = cache::Cache::new();
    cache.resize(1);
    interpret_str(
      "1 FETCH (FLAGS (\\Seen \\Deleted) RFC822.SIZE 42)\r\n",
      &mut cache,
      Context::None,
    )
    .unwrap();
    let message = cache.get(1).unwrap();
    assert_eq!(cache::SEEN | cache::DELETED, message.flags);
    assert_eq!(Some(42), message.size_octets);
  }

  #[test]
  fn bad_is_fatal_and_echoed() {
    let mut cache = cache::Cache::new();
    let error = interpret_str("BAD unknown command\r\n", &mut cache, Context::None).unwrap_err();
    match error.downcast_ref::<wire::Signal>() {
      Some(wire::Signal::CommandRejected(text)) => assert!(text.contains("unknown command")),
      other => panic!("expected CommandRejected, got {other:?}"),
    }
  }

  #[test]
  fn no_is_non_fatal_and_echoed_to_stderr() {
    let mut cache = cache::Cache::new();
    let stderr = interpret_str("NO mailbox busy\r\n", &mut cache, Context::None).unwrap();
    assert!(stderr.contains("mailbox busy"));
  }

  #[test]
  fn unrecognized_line_is_skipped() {
    let mut cache = cache::Cache::new();
    interpret_str("OK something unrelated\r\n", &mut cache, Context::None).unwrap();
  }
}
