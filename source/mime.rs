// https://www.rfc-editor.org/rfc/rfc2047 - MIME encoded words
//
// Only decodes what the source material actually sends: Base64-encoded UTF-8. Anything else
// (quoted-printable, other charsets) is left as a readable placeholder rather than guessed at.

use base64::Engine as _;

const PLACEHOLDER: &str = "\u{fffd}";

fn decode_word(word: &str) -> Option<String> {
  let rest = word.strip_prefix("=?")?;
  let rest = rest.strip_suffix("?=")?;
  let mut parts = rest.splitn(3, '?');
  let charset = parts.next()?;
  let encoding = parts.next()?;
  let payload = parts.next()?;
  if !charset.eq_ignore_ascii_case("utf-8") || !encoding.eq_ignore_ascii_case("b") {
    return None;
  }
  let engine = base64::engine::GeneralPurpose::new(
    &base64::alphabet::STANDARD,
    base64::engine::general_purpose::PAD,
  );
  let bytes = engine.decode(payload).ok()?;
  String::from_utf8(bytes).ok()
}

/// Decodes a header field that may contain any number of RFC 2047 encoded words separated by
/// whitespace. Plain ASCII runs pass through untouched; an encoded word this client can't
/// handle (wrong charset/encoding, or malformed) is replaced with a placeholder rather than
/// propagating an error, since a single unreadable header field shouldn't abort a FETCH.
pub fn decode(input: &str) -> String {
  let mut output = String::new();
  for (i, word) in input.split(' ').enumerate() {
    if i > 0 {
      output.push(' ');
    }
    if word.starts_with("=?") && word.ends_with("?=") {
      output.push_str(&decode_word(word).unwrap_or_else(|| PLACEHOLDER.to_string()));
    } else {
      output.push_str(word);
    }
  }
  output
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn passes_through_ascii() {
    assert_eq!("hello world", decode("hello world"));
  }

  #[test]
  fn decodes_utf8_base64_word() {
    // "café" in UTF-8, base64-encoded.
    assert_eq!("café", decode("=?utf-8?B?Y2Fmw6k=?="));
  }

  #[test]
  fn placeholders_unsupported_charset() {
    assert_eq!(PLACEHOLDER, decode("=?iso-8859-1?Q?caf=E9?="));
  }

  #[test]
  fn placeholders_malformed_word() {
    assert_eq!(PLACEHOLDER, decode("=?utf-8?B?not-base64!!?="));
  }

  #[test]
  fn mixed_ascii_and_encoded() {
    assert_eq!("Re: café", decode("Re: =?utf-8?B?Y2Fmw6k=?="));
  }
}
