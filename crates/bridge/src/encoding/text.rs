use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use super::{ContentCodec, EncodedContent};

pub const TEXT_CONTENT_TYPE: &str = "xmtp.org/text:1.0";

/// Plain UTF-8 text.
pub struct TextCodec;

impl ContentCodec for TextCodec {
    fn content_type(&self) -> &str {
        TEXT_CONTENT_TYPE
    }

    fn encode(&self, value: &Value) -> Result<EncodedContent> {
        let Some(text) = value.as_str() else {
            bail!("text content must be a string");
        };
        Ok(EncodedContent {
            content_type: TEXT_CONTENT_TYPE.to_string(),
            parameters: BTreeMap::from([("encoding".to_string(), "UTF-8".to_string())]),
            fallback: None,
            content: text.as_bytes().to_vec(),
        })
    }

    fn decode(&self, content: &EncodedContent) -> Result<Value> {
        if let Some(encoding) = content.parameters.get("encoding") {
            if !encoding.eq_ignore_ascii_case("utf-8") {
                bail!("unsupported text encoding {encoding}");
            }
        }
        let text = std::str::from_utf8(&content.content).context("text content is not UTF-8")?;
        Ok(Value::String(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_with_utf8_parameter() {
        let encoded = TextCodec.encode(&json!("gm")).unwrap();
        assert_eq!(encoded.content, b"gm");
        assert_eq!(encoded.parameters.get("encoding").map(String::as_str), Some("UTF-8"));
    }

    #[test]
    fn rejects_non_string_values() {
        assert!(TextCodec.encode(&json!({"text": "gm"})).is_err());
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut encoded = TextCodec.encode(&json!("x")).unwrap();
        encoded.content = vec![0xff, 0xfe];
        assert!(TextCodec.decode(&encoded).is_err());
    }

    #[test]
    fn rejects_foreign_charset() {
        let mut encoded = TextCodec.encode(&json!("x")).unwrap();
        encoded.parameters.insert("encoding".into(), "latin1".into());
        assert!(TextCodec.decode(&encoded).is_err());
    }
}
