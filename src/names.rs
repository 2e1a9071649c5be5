//! LLM-driven character name discovery.
//!
//! One call over a bounded prefix of the book (reference: the first 35
//! windows, ~35,000 characters). The prefix bound controls token cost:
//! main characters are overwhelmingly introduced early, and minor
//! characters first appearing in late chapters are an accepted miss.

use crate::error::PipelineError;
use crate::llm::ChatModel;

const SYSTEM_PROMPT: &str = "You are a literary analysis expert. You extract character names \
from book excerpts and respond with nothing but a JSON array of strings.";

/// Extract up to `limit` character names from a text prefix,
/// most-mentioned first.
///
/// Quota errors are fatal to the ingest (there is exactly one extraction
/// call per book); an unparseable response fails with
/// [`PipelineError::ExtractionParse`].
pub async fn extract_names(
    llm: &dyn ChatModel,
    text: &str,
    limit: usize,
) -> Result<Vec<String>, PipelineError> {
    let user = format!(
        "List the character names appearing in this book excerpt, most-mentioned first.\n\
         \n\
         - Use FULL NAMES (first and last) when the text provides them\n\
         - Include only actual characters, not places or objects\n\
         - At most {} names\n\
         - Use the exact names as they appear in the text\n\
         - Return ONLY a valid JSON array of strings, nothing else\n\
         \n\
         Excerpt:\n\
         {}\n\
         \n\
         JSON array of character names:",
        limit, text
    );

    let raw = llm.complete(SYSTEM_PROMPT, &user).await.map_err(PipelineError::from)?;
    let mut names = parse_name_array(&raw)?;
    names.truncate(limit);
    Ok(names)
}

/// Parse the LLM's reply tolerantly: strip any code-fence wrapper, then
/// require a top-level JSON array of strings.
pub fn parse_name_array(raw: &str) -> Result<Vec<String>, PipelineError> {
    let stripped = strip_code_fence(raw);

    let value: serde_json::Value = serde_json::from_str(stripped)
        .map_err(|e| PipelineError::ExtractionParse(e.to_string()))?;

    let array = value
        .as_array()
        .ok_or_else(|| PipelineError::ExtractionParse("top-level value is not an array".to_string()))?;

    let mut names = Vec::with_capacity(array.len());
    for item in array {
        let name = item.as_str().ok_or_else(|| {
            PipelineError::ExtractionParse("array contains a non-string element".to_string())
        })?;
        let normalized = normalize_name(name);
        if !normalized.is_empty() {
            names.push(normalized);
        }
    }

    Ok(names)
}

/// Trim and collapse internal whitespace; case is preserved for display.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove a surrounding Markdown code fence (with or without a language
/// tag) if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}
