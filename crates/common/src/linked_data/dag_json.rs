//! Canonical DAG-JSON text, the form UCAN signing payloads take.
//!
//! Map keys come out in bytewise order (the order `BTreeMap<String, _>`
//! already keeps), links as `{"/": "<cid>"}` and bytes as
//! `{"/": {"bytes": "<base64>"}}`.

use std::fmt::Write;

use ipld_core::ipld::Ipld;

use super::multibase::{self, Base};

/// Encode `ipld` as compact DAG-JSON.
pub fn encode(ipld: &Ipld) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    write_ipld(ipld, &mut out)?;
    Ok(out)
}

/// Multibase without its prefix character.
pub(crate) fn base_encode(base: Base, data: &[u8]) -> String {
    let mut encoded = multibase::encode(base, data);
    encoded.remove(0);
    encoded
}

fn write_ipld(ipld: &Ipld, out: &mut String) -> Result<(), serde_json::Error> {
    match ipld {
        Ipld::Null => out.push_str("null"),
        Ipld::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Ipld::Integer(i) => {
            let _ = write!(out, "{i}");
        }
        Ipld::Float(f) => out.push_str(&serde_json::to_string(f)?),
        Ipld::String(s) => out.push_str(&serde_json::to_string(s)?),
        Ipld::Bytes(bytes) => {
            out.push_str(r#"{"/":{"bytes":"#);
            out.push_str(&serde_json::to_string(&base_encode(Base::Base64, bytes))?);
            out.push_str("}}");
        }
        Ipld::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_ipld(item, out)?;
            }
            out.push(']');
        }
        Ipld::Map(map) => {
            out.push('{');
            for (i, (key, value)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_ipld(value, out)?;
            }
            out.push('}');
        }
        Ipld::Link(cid) => {
            out.push_str(r#"{"/":"#);
            out.push_str(&serde_json::to_string(&cid.to_string())?);
            out.push('}');
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::linked_data::{cid_for, RAW_CODEC};

    #[test]
    fn test_keys_are_sorted_and_compact() {
        let map = BTreeMap::from([
            ("with".to_string(), Ipld::String("did:key:z6Mk".into())),
            ("can".to_string(), Ipld::String("store/add".into())),
            ("nb".to_string(), Ipld::Map(BTreeMap::from([("size".to_string(), Ipld::Integer(5))]))),
        ]);
        assert_eq!(
            encode(&Ipld::Map(map)).unwrap(),
            r#"{"can":"store/add","nb":{"size":5},"with":"did:key:z6Mk"}"#
        );
    }

    #[test]
    fn test_links_and_bytes() {
        let link = cid_for(RAW_CODEC, b"Hello");
        let list = Ipld::List(vec![Ipld::Link(link), Ipld::Bytes(b"Hello".to_vec()), Ipld::Null]);
        assert_eq!(
            encode(&list).unwrap(),
            format!(r#"[{{"/":"{link}"}},{{"/":{{"bytes":"SGVsbG8"}}}},null]"#)
        );
    }

    #[test]
    fn test_strings_are_escaped() {
        assert_eq!(
            encode(&Ipld::String("say \"hi\"\n".into())).unwrap(),
            r#""say \"hi\"\n""#
        );
    }
}
