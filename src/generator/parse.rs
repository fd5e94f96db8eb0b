//! Strict validation of the article JSON returned by the model

use super::GenerationError;
use crate::state_machine::Draft;
use serde::Deserialize;
use serde_json::Value;

/// Shape the article prompt asks for
#[derive(Debug, Deserialize)]
struct ArticleJson {
    title: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
}

/// Turn raw model output into a draft, or explain why it is unusable.
///
/// Tolerates a Markdown code fence around the object and the HTML-escaped
/// quotes some models emit; everything else must match the schema exactly.
pub fn parse_article(raw: &str) -> Result<Draft, GenerationError> {
    let cleaned = clean(raw);
    if cleaned.is_empty() {
        return Err(GenerationError::malformed("Model returned no text"));
    }

    let value: Value = serde_json::from_str(&cleaned).map_err(|e| {
        GenerationError::malformed(format!("Model did not return valid article JSON: {e}"))
    })?;
    // Derived struct impls also accept a positional array
    if !value.is_object() {
        return Err(GenerationError::malformed("Model did not return a JSON object"));
    }
    let article: ArticleJson = serde_json::from_value(value).map_err(|e| {
        GenerationError::malformed(format!("Article JSON does not match the schema: {e}"))
    })?;

    let title = article.title.trim();
    if title.is_empty() {
        return Err(GenerationError::malformed("Article has an empty title"));
    }
    if article.content.trim().is_empty() {
        return Err(GenerationError::malformed("Article has an empty body"));
    }

    Ok(Draft::new(title, article.content, article.tags))
}

fn clean(raw: &str) -> String {
    let text = raw.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .trim()
        .to_string()
}
