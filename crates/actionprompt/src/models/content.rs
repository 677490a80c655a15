use base64::Engine;
use serde::{Deserialize, Serialize};

/// Declared category of a message body; decides how the body is serialized for a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ContentType {
    Text,
    ImageUrl,
    MultipartMixed,
    ApplicationJson,
    /// Anything the formatters do not know how to send
    Other(String),
}

impl ContentType {
    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Text => "text",
            ContentType::ImageUrl => "image_url",
            ContentType::MultipartMixed => "multipart/mixed",
            ContentType::ApplicationJson => "application/json",
            ContentType::Other(other) => other,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "text" | "text/plain" => ContentType::Text,
            "image_url" => ContentType::ImageUrl,
            "multipart/mixed" => ContentType::MultipartMixed,
            "application/json" => ContentType::ApplicationJson,
            other => ContentType::Other(other.to_string()),
        }
    }
}

impl Default for ContentType {
    fn default() -> Self {
        ContentType::Text
    }
}

impl From<String> for ContentType {
    fn from(value: String) -> Self {
        ContentType::parse(&value)
    }
}

impl From<ContentType> for String {
    fn from(value: ContentType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the bytes of an image or file live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaSource {
    Url { url: String },
    Base64 { media_type: String, data: String },
}

impl MediaSource {
    /// The source as something usable in a `url` field: the url itself or a data uri
    pub fn to_url(&self) -> String {
        match self {
            MediaSource::Url { url } => url.clone(),
            MediaSource::Base64 { media_type, data } => {
                format!("data:{};base64,{}", media_type, data)
            }
        }
    }

    /// Parse `data:<mime>;base64,<payload>` into an inline source, anything else is a url
    pub fn from_url<S: Into<String>>(url: S) -> Self {
        let url = url.into();
        if let Some(rest) = url.strip_prefix("data:") {
            if let Some((media_type, data)) = rest.split_once(";base64,") {
                return MediaSource::Base64 {
                    media_type: media_type.to_string(),
                    data: data.to_string(),
                };
            }
        }
        MediaSource::Url { url }
    }
}

/// One typed element of a multimodal message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        source: MediaSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    File {
        source: MediaSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    Audio {
        data: String,
        format: String,
    },
}

impl ContentPart {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image_url<S: Into<String>>(url: S) -> Self {
        ContentPart::Image {
            source: MediaSource::from_url(url),
            detail: None,
        }
    }

    pub fn image_base64<S: Into<String>, T: Into<String>>(media_type: S, data: T) -> Self {
        ContentPart::Image {
            source: MediaSource::Base64 {
                media_type: media_type.into(),
                data: data.into(),
            },
            detail: None,
        }
    }

    /// Inline a file from raw bytes
    pub fn file_bytes<S: Into<String>, T: Into<String>>(
        filename: S,
        media_type: T,
        bytes: &[u8],
    ) -> Self {
        ContentPart::File {
            source: MediaSource::Base64 {
                media_type: media_type.into(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            },
            filename: Some(filename.into()),
        }
    }

    pub fn file_url<S: Into<String>>(url: S) -> Self {
        ContentPart::File {
            source: MediaSource::from_url(url),
            filename: None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Short name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            ContentPart::Text { .. } => "text",
            ContentPart::Image { .. } => "image",
            ContentPart::File { .. } => "file",
            ContentPart::Audio { .. } => "audio",
        }
    }
}

/// The body of a message: a bare string or an ordered list of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Parts(_) => None,
        }
    }

    /// All text in the body, parts joined by newlines
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(ContentPart::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_multimodal(&self) -> bool {
        matches!(self, MessageContent::Parts(_))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }

    /// The body as a part list, wrapping a bare string in a single text part
    pub fn into_parts(self) -> Vec<ContentPart> {
        match self {
            MessageContent::Text(text) if text.is_empty() => Vec::new(),
            MessageContent::Text(text) => vec![ContentPart::text(text)],
            MessageContent::Parts(parts) => parts,
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        MessageContent::Text(value.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        MessageContent::Text(value)
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(value: Vec<ContentPart>) -> Self {
        MessageContent::Parts(value)
    }
}
