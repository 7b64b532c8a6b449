//! Wire types for the OpenAI-compatible chat-completions endpoint plus the
//! parsed paper metadata the service's reply is shaped into.

use serde::{Deserialize, Serialize};

use super::error::ExtractError;

/// Request body for `/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
}

/// Response body for `/chat/completions`. Only the fields the pipeline
/// consumes are modeled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

/// The JSON object the model is prompted to emit, before shaping.
/// Every field is defaulted: a partially filled reply is still usable.
#[derive(Debug, Clone, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<RawAuthor>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAuthor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub affiliation: Option<String>,
    #[serde(default)]
    pub is_first_author: bool,
    #[serde(default)]
    pub is_corresponding_author: bool,
    #[serde(default)]
    pub email: Option<String>,
}

/// A de-duplicated institution referenced by one or more authors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affiliation {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// 1-based reading-order position.
    pub order: u32,
    pub name: String,
    pub affiliation_ids: Vec<String>,
    pub email: Option<String>,
    pub is_first_author: bool,
    pub is_corresponding_author: bool,
}

/// Structured metadata of one paper's first page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperMeta {
    pub title: String,
    pub abstract_text: Option<String>,
    pub keywords: Vec<String>,
    pub authors: Vec<Author>,
    pub affiliations: Vec<Affiliation>,
    pub emails: Vec<String>,
    pub confidence: f64,
}

impl PaperMeta {
    /// Shape a raw reply into domain metadata, de-duplicating affiliations
    /// into an id-referenced list.
    pub fn from_raw(raw: RawExtraction) -> Self {
        let mut affiliations: Vec<Affiliation> = Vec::new();
        let mut authors = Vec::with_capacity(raw.authors.len());

        for (i, a) in raw.authors.into_iter().enumerate() {
            let affiliation_ids = match a.affiliation.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => {
                    let id = match affiliations.iter().find(|aff| aff.name == name) {
                        Some(existing) => existing.id.clone(),
                        None => {
                            let id = (affiliations.len() + 1).to_string();
                            affiliations.push(Affiliation {
                                id: id.clone(),
                                name: name.to_string(),
                            });
                            id
                        }
                    };
                    vec![id]
                }
                _ => Vec::new(),
            };

            let order = if a.order > 0 { a.order } else { i as u32 + 1 };
            authors.push(Author {
                order,
                name: a.name,
                affiliation_ids,
                email: a.email,
                is_first_author: a.is_first_author,
                is_corresponding_author: a.is_corresponding_author,
            });
        }

        Self {
            title: raw.title,
            abstract_text: raw.abstract_text,
            keywords: raw.keywords,
            authors,
            affiliations,
            emails: raw.emails,
            confidence: raw.confidence,
        }
    }

    /// Parse a model reply into metadata. The model sometimes wraps the
    /// JSON in prose, so the outermost `{ … }` span is taken.
    pub fn parse_reply(content: &str) -> Result<Self, ExtractError> {
        let start = content.find('{');
        let end = content.rfind('}');
        let span = match (start, end) {
            (Some(i), Some(j)) if i < j => &content[i..=j],
            _ => {
                return Err(ExtractError::Malformed(
                    "reply contains no JSON object".into(),
                ));
            }
        };
        let raw: RawExtraction = serde_json::from_str(span)
            .map_err(|e| ExtractError::Malformed(format!("invalid extraction JSON: {e}")))?;
        Ok(Self::from_raw(raw))
    }

    /// The corresponding author, falling back to the first author when
    /// none is flagged.
    pub fn corresponding_author(&self) -> Option<&Author> {
        self.authors
            .iter()
            .find(|a| a.is_corresponding_author)
            .or_else(|| self.authors.first())
    }

    /// First affiliation name for the given author, if any.
    pub fn affiliation_of(&self, author: &Author) -> Option<&str> {
        author.affiliation_ids.iter().find_map(|id| {
            self.affiliations
                .iter()
                .find(|aff| &aff.id == id)
                .map(|aff| aff.name.as_str())
        })
    }
}
