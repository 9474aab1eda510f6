use std::{fmt, str::FromStr, sync::Arc, sync::OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct RawAiRequest {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionTag {
    AnalyzeReceipt,
    ParseScreenshot,
    SuggestGap,
    SuggestTransport,
    BatchParse,
    SuggestBriefing,
}

impl ActionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionTag::AnalyzeReceipt => "analyze-receipt",
            ActionTag::ParseScreenshot => "parse-screenshot",
            ActionTag::SuggestGap => "suggest-gap",
            ActionTag::SuggestTransport => "suggest-transport",
            ActionTag::BatchParse => "batch-parse",
            ActionTag::SuggestBriefing => "suggest-briefing",
        }
    }

    pub fn is_extraction(&self) -> bool {
        !matches!(self, ActionTag::SuggestTransport | ActionTag::SuggestBriefing)
    }
}

impl fmt::Display for ActionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionTag {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "analyze-receipt" => Ok(ActionTag::AnalyzeReceipt),
            "parse-screenshot" => Ok(ActionTag::ParseScreenshot),
            "suggest-gap" => Ok(ActionTag::SuggestGap),
            "suggest-transport" => Ok(ActionTag::SuggestTransport),
            "batch-parse" => Ok(ActionTag::BatchParse),
            "suggest-briefing" => Ok(ActionTag::SuggestBriefing),
            other => Err(AppError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotKind {
    Flight,
    Hotel,
    #[default]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GapAnchor {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiRequest {
    AnalyzeReceipt {
        image_base64: String,
    },
    ParseScreenshot {
        image_base64: String,
        kind: ScreenshotKind,
    },
    SuggestGap {
        prev: GapAnchor,
        next: GapAnchor,
    },
    SuggestTransport {
        prev_location: Option<String>,
        prev_title: Option<String>,
        current_location: String,
        current_title: String,
    },
    BatchParse {
        date: String,
        text: String,
    },
    SuggestBriefing {
        text: String,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagePayload {
    image_base64: String,
    #[serde(default, rename = "type")]
    kind: ScreenshotKind,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GapPayload {
    prev_item: GapAnchor,
    next_item: GapAnchor,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransportPayload {
    prev_location: Option<String>,
    prev_title: Option<String>,
    current_location: String,
    current_title: String,
}

#[derive(Deserialize)]
struct BatchPayload {
    date: String,
    text: String,
}

#[derive(Deserialize)]
struct TextPayload {
    text: String,
}

fn payload<T: serde::de::DeserializeOwned>(tag: ActionTag, value: Value) -> Result<T, AppError> {
    serde_json::from_value(value)
        .map_err(|err| AppError::BadRequest(format!("invalid payload for {tag}: {err}")))
}

impl TryFrom<RawAiRequest> for AiRequest {
    type Error = AppError;

    fn try_from(raw: RawAiRequest) -> Result<Self, Self::Error> {
        let tag: ActionTag = raw.action.parse()?;
        let request = match tag {
            ActionTag::AnalyzeReceipt => {
                let p: ImagePayload = payload(tag, raw.payload)?;
                AiRequest::AnalyzeReceipt {
                    image_base64: p.image_base64,
                }
            }
            ActionTag::ParseScreenshot => {
                let p: ImagePayload = payload(tag, raw.payload)?;
                AiRequest::ParseScreenshot {
                    image_base64: p.image_base64,
                    kind: p.kind,
                }
            }
            ActionTag::SuggestGap => {
                let p: GapPayload = payload(tag, raw.payload)?;
                AiRequest::SuggestGap {
                    prev: p.prev_item,
                    next: p.next_item,
                }
            }
            ActionTag::SuggestTransport => {
                let p: TransportPayload = payload(tag, raw.payload)?;
                AiRequest::SuggestTransport {
                    prev_location: p.prev_location,
                    prev_title: p.prev_title,
                    current_location: p.current_location,
                    current_title: p.current_title,
                }
            }
            ActionTag::BatchParse => {
                let p: BatchPayload = payload(tag, raw.payload)?;
                AiRequest::BatchParse {
                    date: p.date,
                    text: p.text,
                }
            }
            ActionTag::SuggestBriefing => {
                let p: TextPayload = payload(tag, raw.payload)?;
                AiRequest::SuggestBriefing { text: p.text }
            }
        };
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn from_base64(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("data:") {
            if let Some((mime, data)) = rest.split_once(";base64,") {
                return Self {
                    mime_type: mime.to_string(),
                    data: data.to_string(),
                };
            }
        }
        Self {
            mime_type: "image/jpeg".into(),
            data: raw.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub image: Option<InlineImage>,
}

impl AiRequest {
    pub fn tag(&self) -> ActionTag {
        match self {
            AiRequest::AnalyzeReceipt { .. } => ActionTag::AnalyzeReceipt,
            AiRequest::ParseScreenshot { .. } => ActionTag::ParseScreenshot,
            AiRequest::SuggestGap { .. } => ActionTag::SuggestGap,
            AiRequest::SuggestTransport { .. } => ActionTag::SuggestTransport,
            AiRequest::BatchParse { .. } => ActionTag::BatchParse,
            AiRequest::SuggestBriefing { .. } => ActionTag::SuggestBriefing,
        }
    }

    pub fn prompt(&self) -> Prompt {
        match self {
            AiRequest::AnalyzeReceipt { image_base64 } => Prompt {
                text: "Read this receipt. Reply with one JSON object with the keys \
                       storeName, title, date (YYYY-MM-DD), amount (number), currency \
                       (ISO code), paymentMethod, category and items (array of \
                       {name, price})."
                    .into(),
                image: Some(InlineImage::from_base64(image_base64)),
            },
            AiRequest::ParseScreenshot { image_base64, kind } => {
                let fields = match kind {
                    ScreenshotKind::Flight => {
                        "title, date, flightNo, depIata, arrIata, depTime, arrTime, \
                         duration, confirmationNo"
                    }
                    ScreenshotKind::Hotel => {
                        "title, date, endDate, location, nights, confirmationNo, website"
                    }
                    ScreenshotKind::Other => "title, date, location, confirmationNo, note",
                };
                Prompt {
                    text: format!(
                        "Extract the travel booking shown in this screenshot. Reply with \
                         one JSON object with the keys {fields}. Dates use YYYY-MM-DD, \
                         times use HH:mm."
                    ),
                    image: Some(InlineImage::from_base64(image_base64)),
                }
            }
            AiRequest::SuggestGap { prev, next } => Prompt {
                text: format!(
                    "A traveller has free time between \"{}\" at {} ({}) and \"{}\" at {} ({}). \
                     Suggest one activity that fits in between. Reply with one JSON object \
                     with the keys time (HH:mm), title, location, category (sightseeing, \
                     food, transport or hotel) and note.",
                    prev.title, prev.time, prev.location, next.title, next.time, next.location
                ),
                image: None,
            },
            AiRequest::SuggestTransport {
                prev_location,
                prev_title,
                current_location,
                current_title,
            } => {
                let from = match (prev_title, prev_location) {
                    (Some(title), Some(location)) => format!("\"{title}\" ({location})"),
                    (None, Some(location)) => location.clone(),
                    (Some(title), None) => format!("\"{title}\""),
                    (None, None) => "the previous stop".to_string(),
                };
                Prompt {
                    text: format!(
                        "How should a traveller get from {from} to \"{current_title}\" \
                         ({current_location})? Answer in plain text, under 100 characters."
                    ),
                    image: None,
                }
            }
            AiRequest::BatchParse { date, text } => Prompt {
                text: format!(
                    "Turn this itinerary for {date} into a JSON array of schedule entries, \
                     each with the keys time (HH:mm), endTime, title, location, category \
                     (sightseeing, food, transport or hotel) and note.\n\n{text}"
                ),
                image: None,
            },
            AiRequest::SuggestBriefing { text } => Prompt {
                text: format!(
                    "Write a short travel briefing for the following plan. Plain text only.\n\n{text}"
                ),
                image: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AiReply {
    Structured(Value),
    Text { text: String },
}

fn code_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("code fence regex is valid")
    })
}

// Prose brackets like `[note]` are skipped; a candidate that breaks past its
// first token ends the scan.
pub fn extract_json(raw: &str) -> Result<Option<Value>, AppError> {
    let body = code_fence()
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);

    let mut first_error = None;
    for (start, ch) in body.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        let candidate = &body[start..];
        let mut values = serde_json::Deserializer::from_str(candidate).into_iter::<Value>();
        match values.next() {
            Some(Ok(value)) => return Ok(Some(value)),
            Some(Err(err)) if err.is_eof() || failed_past_opening(candidate, &err) => {
                return Err(malformed(err));
            }
            Some(Err(err)) => {
                first_error.get_or_insert(err);
            }
            None => {}
        }
    }
    match first_error {
        Some(err) => Err(malformed(err)),
        None => Ok(None),
    }
}

fn malformed(err: serde_json::Error) -> AppError {
    AppError::Upstream(format!("malformed JSON in model reply: {err}"))
}

fn failed_past_opening(candidate: &str, err: &serde_json::Error) -> bool {
    let after = &candidate[1..];
    let word = after.trim_start();
    let word_len = word
        .find(|c: char| !c.is_alphanumeric())
        .unwrap_or(word.len());
    let first_token_end = 1 + after.len() - word.len() + word_len;
    let line_start: usize = candidate
        .split_inclusive('\n')
        .take(err.line().saturating_sub(1))
        .map(str::len)
        .sum();
    // serde_json columns are 1-based
    line_start + err.column() > first_token_end + 1
}

pub fn normalize_reply(tag: ActionTag, raw: &str) -> Result<AiReply, AppError> {
    let text = raw.trim();
    if !tag.is_extraction() {
        return Ok(AiReply::Text {
            text: text.to_string(),
        });
    }
    match extract_json(text)? {
        Some(value) => Ok(AiReply::Structured(value)),
        None => Ok(AiReply::Text {
            text: text.to_string(),
        }),
    }
}

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String, AppError>;
}

#[derive(Clone, Default)]
pub struct AiGateway {
    backend: Option<Arc<dyn GenerativeBackend>>,
}

impl AiGateway {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn dispatch(&self, raw: RawAiRequest) -> Result<AiReply, AppError> {
        let request = AiRequest::try_from(raw)?;
        let tag = request.tag();
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| AppError::Upstream("AI backend is not configured".into()))?;
        let prompt = request.prompt();
        debug!(action = %tag, with_image = prompt.image.is_some(), "dispatching AI request");
        let reply = backend.generate(&prompt).await.map_err(|err| {
            warn!(action = %tag, "AI backend call failed: {err}");
            match err {
                AppError::Upstream(_) => err,
                other => AppError::Upstream(other.to_string()),
            }
        })?;
        normalize_reply(tag, &reply).map_err(|err| {
            warn!(action = %tag, "{err}");
            err
        })
    }
}
