use courier_core::PayloadFormat;
use serde_json::Value;

use crate::error::BrokerError;

/// Root element used by the XML formatter.
const XML_ROOT: &str = "message";

/// Serialize `payload` into a message body.
///
/// JSON strings are passed through verbatim (they are assumed to already be
/// encoded); every other value is stringified.
pub fn format_payload(payload: &Value, format: PayloadFormat) -> Result<Vec<u8>, BrokerError> {
    match format {
        PayloadFormat::Json => match payload {
            Value::String(raw) => Ok(raw.clone().into_bytes()),
            other => serde_json::to_vec(other).map_err(|e| BrokerError::Format(e.to_string())),
        },
        PayloadFormat::Text => Ok(text(payload).into_bytes()),
        PayloadFormat::Xml => Ok(to_xml(payload).into_bytes()),
    }
}

/// MIME type matching [`format_payload`]'s output.
pub fn content_type(format: PayloadFormat) -> &'static str {
    match format {
        PayloadFormat::Json => "application/json",
        PayloadFormat::Text => "text/plain",
        PayloadFormat::Xml => "application/xml",
    }
}

fn text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Render `payload` as an XML document rooted at `<message>`.
pub fn to_xml(payload: &Value) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    write_element(&mut out, XML_ROOT, payload);
    out
}

fn write_element(out: &mut String, tag: &str, value: &Value) {
    match value {
        Value::Array(items) => {
            out.push('<');
            out.push_str(tag);
            out.push('>');
            let item_tag = singularize(tag);
            for item in items {
                write_element(out, &item_tag, item);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        Value::Object(map) => {
            out.push('<');
            out.push_str(tag);
            out.push('>');
            for (key, item) in map {
                write_element(out, &sanitize_tag(key), item);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        Value::Null => {
            out.push('<');
            out.push_str(tag);
            out.push_str("/>");
        }
        scalar => {
            out.push('<');
            out.push_str(tag);
            out.push('>');
            out.push_str(&escape(&text(scalar)));
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}

/// Element name for the members of a list called `tag`.
fn singularize(tag: &str) -> String {
    if let Some(stem) = tag.strip_suffix("ies")
        && !stem.is_empty()
    {
        return format!("{stem}y");
    }
    if let Some(stem) = tag.strip_suffix('s')
        && !stem.is_empty()
        && !stem.ends_with('s')
    {
        return stem.to_owned();
    }
    "item".to_owned()
}

/// Turn an arbitrary object key into a valid XML element name.
fn sanitize_tag(key: &str) -> String {
    let mut tag: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let valid_start = tag
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || tag.to_ascii_lowercase().starts_with("xml") {
        tag.insert(0, '_');
    }
    tag
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_strings_pass_through() {
        let raw = json!(r#"{"already":"encoded"}"#);
        assert_eq!(
            format_payload(&raw, PayloadFormat::Json).unwrap(),
            br#"{"already":"encoded"}"#
        );
        assert_eq!(
            format_payload(&json!({"a": 1}), PayloadFormat::Json).unwrap(),
            br#"{"a":1}"#
        );
    }

    #[test]
    fn text_stringifies() {
        assert_eq!(format_payload(&json!("hi"), PayloadFormat::Text).unwrap(), b"hi");
        assert_eq!(format_payload(&json!(42), PayloadFormat::Text).unwrap(), b"42");
    }

    #[test]
    fn xml_nests_objects_and_singularizes_arrays() {
        let payload = json!({
            "order": {"id": 7, "note": "Fish & <Chips>"},
            "items": ["a", "b"],
            "categories": [1],
            "empty": null
        });
        let xml = to_xml(&payload);
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><message>"));
        assert!(xml.contains("<order><id>7</id><note>Fish &amp; &lt;Chips&gt;</note></order>"));
        assert!(xml.contains("<items><item>a</item><item>b</item></items>"));
        assert!(xml.contains("<categories><category>1</category></categories>"));
        assert!(xml.contains("<empty/>"));
        assert!(xml.ends_with("</message>"));
    }

    #[test]
    fn xml_escapes_quotes_and_sanitizes_keys() {
        let xml = to_xml(&json!({"1st key": "it's \"quoted\""}));
        assert!(xml.contains("<_1st_key>it&apos;s &quot;quoted&quot;</_1st_key>"));
    }

    #[test]
    fn singular_forms() {
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("entries"), "entry");
        assert_eq!(singularize("address"), "item");
        assert_eq!(singularize("data"), "item");
    }
}
