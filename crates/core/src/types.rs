use serde::{Deserialize, Serialize};

/// Separator for utterances that carry their own speaker id (`speaker||text`).
const COMPOSITE_SEPARATOR: &str = "||";

/// One inbound utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Speaker id supplied by the caller; a composite utterance overrides it.
    pub speaker: Option<String>,
    pub text: String,
    pub language: String,
    pub conversation_id: Option<String>,
}

impl TurnRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            speaker: None,
            text: text.into(),
            language: "en".into(),
            conversation_id: None,
        }
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Decode speaker and text.
    ///
    /// A text of exactly two `||`-separated parts names its own speaker.
    /// One trailing period is stripped from the text.
    pub fn resolve(&self, default_speaker: &str) -> Utterance {
        let parts: Vec<&str> = self.text.split(COMPOSITE_SEPARATOR).collect();
        let (speaker, text) = match parts.as_slice() {
            [speaker, text] => (speaker.to_string(), text.to_string()),
            _ => (
                self.speaker
                    .clone()
                    .unwrap_or_else(|| default_speaker.to_string()),
                self.text.clone(),
            ),
        };
        let text = text.strip_suffix('.').map(str::to_string).unwrap_or(text);
        Utterance { speaker, text }
    }
}

/// A decoded utterance: who spoke and what they said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub speaker: String,
    pub text: String,
}

/// Where a reply's speech came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Model,
    Cache,
    /// The turn is handed to another agent; speech is the utterance verbatim.
    HandOff,
    /// Reset acknowledgements and apologies.
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unknown,
    RateLimited,
    ContentFiltered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyError {
    pub code: ErrorCode,
    pub message: String,
}

/// The result of one turn. Always produced, even when the turn failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub speech: String,
    pub kind: ReplyKind,
    pub language: String,
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl Reply {
    pub fn new(speech: impl Into<String>, kind: ReplyKind, request: &TurnRequest) -> Self {
        Self {
            speech: speech.into(),
            kind,
            language: request.language.clone(),
            conversation_id: request.conversation_id.clone(),
            error: None,
        }
    }

    pub fn apology(
        speech: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
        request: &TurnRequest,
    ) -> Self {
        Self {
            error: Some(ReplyError { code, message: message.into() }),
            ..Self::new(speech, ReplyKind::Neutral, request)
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
