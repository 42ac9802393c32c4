use serde::{Deserialize, Serialize};
use std::fmt;

/// Origin system of a conversation.
///
/// Known sites get their own variant; anything else is kept verbatim (lowercased)
/// so new adapters can be added without touching the schema.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Source {
    ChatGpt,
    Claude,
    DeepSeek,
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ChatGpt => "chatgpt",
            Self::Claude => "claude",
            Self::DeepSeek => "deepseek",
            Self::Other(other) => other,
        }
    }

    /// Parse a user supplied filter. Blank input means "no filter".
    pub fn parse_filter(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Self::from(s.to_string()))
    }
}

impl From<String> for Source {
    fn from(value: String) -> Self {
        let normalized = value.trim().to_lowercase();
        match normalized.as_str() {
            "chatgpt" => Self::ChatGpt,
            "claude" => Self::Claude,
            "deepseek" => Self::DeepSeek,
            _ => Self::Other(normalized),
        }
    }
}

impl From<Source> for String {
    fn from(value: Source) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
