//! RAG-grounded canonical profile synthesis.
//!
//! For each canonical name: retrieve the k nearest windows from the
//! source's embedding index, then run one LLM call that condenses those
//! mentions into a single-paragraph canonical visual description. The
//! mention count is the number of retrieved windows literally containing
//! the whole-word name; retrieval nearness alone does not count.

use crate::embedder::Embedder;
use crate::error::PipelineError;
use crate::index::{EmbeddingIndex, SearchHit};
use crate::llm::ChatModel;
use crate::models::CharacterProfile;
use crate::seed::character_seed;

/// Retrieved-context budget fed to the synthesis call.
const MAX_CONTEXT_CHARS: usize = 10_000;

const SYSTEM_PROMPT: &str = "You are a literary analyst. You write canonical character \
descriptions grounded strictly in the provided text mentions.";

/// Synthesize a canonical profile for one character.
///
/// Fails with [`PipelineError::RetrievalEmpty`] when no usable window is
/// retrieved; LLM quota and transport failures propagate so the
/// orchestrator can skip the character and continue.
pub async fn synthesize_profile(
    llm: &dyn ChatModel,
    embedder: &dyn Embedder,
    index: &EmbeddingIndex,
    name: &str,
    k: usize,
) -> Result<CharacterProfile, PipelineError> {
    println!("  creating canonical profile for: {}", name);

    println!("    1. retrieving {} windows", k);
    let hits = index.search(embedder, name, k).await?;
    if hits.is_empty() {
        return Err(PipelineError::RetrievalEmpty(name.to_string()));
    }

    let mention_count = hits
        .iter()
        .filter(|hit| contains_whole_word(&hit.text, name))
        .count() as i64;

    println!(
        "    2. synthesizing canonical description ({} windows, {} literal mentions)",
        hits.len(),
        mention_count
    );
    let context = build_context(&hits);
    let user = format!(
        "Character: {}\n\
         \n\
         Text mentions:\n\
         {}\n\
         \n\
         Write one paragraph describing this character's canonical appearance:\n\
         - Emphasize enduring physical traits: hair, build, distinguishing \
           features, habitual dress\n\
         - De-emphasize plot-transient states (injuries, momentary emotions)\n\
         - Use present tense\n\
         - Stay accurate to the text; no speculation\n\
         \n\
         Canonical description:",
        name, context
    );

    let description = llm
        .complete(SYSTEM_PROMPT, &user)
        .await
        .map_err(PipelineError::from)?
        .trim()
        .to_string();

    let seed = character_seed(name);
    println!("    3. deterministic seed: {}", seed);

    Ok(CharacterProfile {
        name: name.to_string(),
        description,
        seed,
        mention_count,
    })
}

/// Number the retrieved windows into a bounded context block.
fn build_context(hits: &[SearchHit]) -> String {
    let mut context = String::new();
    for (i, hit) in hits.iter().enumerate() {
        let block = format!("[Mention {}]\n{}\n\n", i + 1, hit.text);
        if context.len() + block.len() > MAX_CONTEXT_CHARS {
            break;
        }
        context.push_str(&block);
    }
    if context.is_empty() {
        // The nearest window alone exceeds the budget; truncate it.
        let first = &hits[0].text;
        let cut = first
            .char_indices()
            .take_while(|(i, _)| *i < MAX_CONTEXT_CHARS)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(first.len());
        context = format!("[Mention 1]\n{}", &first[..cut]);
    }
    context.trim_end().to_string()
}

/// Case-insensitive whole-word containment: the name occurs with
/// non-alphanumeric characters (or text edges) on both sides.
pub fn contains_whole_word(text: &str, name: &str) -> bool {
    let text = text.to_lowercase();
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return false;
    }

    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find(&name) {
        let start = search_from + rel;
        let end = start + name.len();
        let before_ok = start == 0
            || text[..start]
                .chars()
                .next_back()
                .is_some_and(|c| !c.is_alphanumeric());
        let after_ok = end == text.len()
            || text[end..].chars().next().is_some_and(|c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        search_from = start + name.len().max(1);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_word_matches() {
        assert!(contains_whole_word("Harry Potter lived under the stairs.", "Harry Potter"));
        assert!(contains_whole_word("\"HARRY!\" shouted Hagrid.", "Harry"));
        assert!(contains_whole_word("Ron, Harry and Hermione", "Hermione"));
    }

    #[test]
    fn partial_word_does_not_match() {
        assert!(!contains_whole_word("The harrying wind blew on.", "Harry"));
        assert!(!contains_whole_word("Ronald spoke first.", "Ron"));
    }

    #[test]
    fn absent_name_does_not_match() {
        assert!(!contains_whole_word("Nobody here at all.", "Dumbledore"));
        assert!(!contains_whole_word("", "Harry"));
    }

    #[test]
    fn context_blocks_are_numbered() {
        let hits = vec![
            SearchHit {
                text: "First window.".to_string(),
                distance: 0.1,
                position: 0,
            },
            SearchHit {
                text: "Second window.".to_string(),
                distance: 0.2,
                position: 1,
            },
        ];
        let ctx = build_context(&hits);
        assert!(ctx.contains("[Mention 1]\nFirst window."));
        assert!(ctx.contains("[Mention 2]\nSecond window."));
    }

    #[test]
    fn context_respects_char_budget() {
        let hits: Vec<SearchHit> = (0..20)
            .map(|i| SearchHit {
                text: "x".repeat(2000),
                distance: i as f32,
                position: i,
            })
            .collect();
        let ctx = build_context(&hits);
        assert!(ctx.len() <= MAX_CONTEXT_CHARS + 32);
    }
}
