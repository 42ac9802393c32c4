pub mod chatgpt;
pub mod claude;
pub mod deepseek;
mod time;

use serde_json::Value;
use tracing::info;
use zebra_common::{Conversation, Error, Result, Source};

/// Parse an export file from `source`. Accepts a single conversation object or an
/// array of them.
pub fn parse_export(source: &Source, json: &str) -> Result<Vec<Conversation>> {
    let normalize: fn(Value) -> Result<Conversation> = match source {
        Source::ChatGpt => chatgpt::normalize,
        Source::Claude => claude::normalize,
        Source::DeepSeek => deepseek::normalize,
        Source::Other(other) => {
            return Err(Error::Other(format!("no importer for source `{other}`")));
        }
    };

    let conversations = match serde_json::from_str::<Value>(json)? {
        Value::Array(items) => items
            .into_iter()
            .map(normalize)
            .collect::<Result<Vec<_>>>()?,
        single @ Value::Object(_) => vec![normalize(single)?],
        other => {
            return Err(Error::Other(format!(
                "expected a conversation object or array, found {}",
                kind_of(&other)
            )));
        }
    };

    info!("parsed {} {source} conversations", conversations.len());
    Ok(conversations)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::parse_export;
    use zebra_common::Source;

    #[test]
    fn single_object_and_array_are_both_accepted() {
        let one = r#"{"uuid": "a", "name": "One", "chat_messages": []}"#;
        let many = r#"[{"uuid": "a"}, {"uuid": "b"}]"#;

        assert_eq!(parse_export(&Source::Claude, one).expect("object").len(), 1);
        let parsed = parse_export(&Source::Claude, many).expect("array");
        let ids: Vec<&str> = parsed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn unknown_source_and_bad_payloads_are_rejected() {
        assert!(parse_export(&Source::Other("bard".into()), "[]").is_err());
        assert!(parse_export(&Source::ChatGpt, "42").is_err());
        assert!(parse_export(&Source::ChatGpt, "{not json").is_err());
    }

    #[test]
    fn empty_array_is_fine() {
        assert!(parse_export(&Source::DeepSeek, "[]").expect("empty").is_empty());
    }
}
