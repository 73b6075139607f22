//! Prompt composition for seed, continuation, and micro-extend requests
//!
//! The overlay/system text a job carries is opaque to the engine; this
//! module only decides the user-side message for each step of the loop.

use quill_core::{build_continuation_prompt, ChatMessage, ChatRequest, RunSpec};

/// Fixed seed marker opening a run
pub const SEED_PROMPT: &str = "BEGIN";

const COVERAGE_HAMMER: &str = "COVERAGE HAMMER: no wrap-up; continue to target depth.";

const EXTEND_SUFFIX: &str = "Fill to the per-response output limit within this same subtopic. \
     Do not reintroduce or restart; continue exactly. \
     Do not write a NEXT line yet; do not conclude.";

/// User prompt for a full chunk
///
/// Chunk 0 is the seed; later chunks continue from the anchor. Operator
/// steering overrides the derived prompt for exactly this one chunk.
pub fn chunk_prompt(
    chunk: usize,
    anchor: &str,
    steer: Option<String>,
    source_segment: Option<&str>,
    coverage_hammer: bool,
) -> String {
    let mut prompt = match steer {
        Some(text) => text,
        None if chunk == 0 => SEED_PROMPT.to_string(),
        None => build_continuation_prompt(anchor),
    };

    if chunk > 0 && coverage_hammer {
        prompt.push('\n');
        prompt.push_str(COVERAGE_HAMMER);
    }

    if let Some(segment) = source_segment {
        prompt.push_str("\nSOURCE:\n<<<SOURCE\n");
        prompt.push_str(segment);
        prompt.push_str("\nSOURCE>>>\nGround this chunk in the source segment above.");
    }

    prompt
}

/// User prompt for a micro-extend pass within the current chunk
pub fn extend_prompt(local_anchor: &str, steer: Option<String>) -> String {
    match steer {
        Some(text) => text,
        None => format!("{}\n{}", build_continuation_prompt(local_anchor), EXTEND_SUFFIX),
    }
}

/// Assemble the full request: system text (when present) plus user prompt
pub fn chat_request(spec: &RunSpec, user_prompt: String) -> ChatRequest {
    let mut request = ChatRequest::new(spec.model.clone());
    if !spec.system_text.is_empty() {
        request = request.with_message(ChatMessage::system(spec.system_text.clone()));
    }
    request.with_message(ChatMessage::user(user_prompt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_chunk_uses_begin() {
        let prompt = chunk_prompt(0, "", None, None, true);
        assert_eq!(prompt, "BEGIN");
    }

    #[test]
    fn test_continuation_embeds_anchor_and_hammer() {
        let prompt = chunk_prompt(3, "last sentence.", None, None, true);
        assert!(prompt.contains("<<<ANCHOR\nlast sentence.\nANCHOR>>>"));
        assert!(prompt.contains("COVERAGE HAMMER"));

        let without = chunk_prompt(3, "last sentence.", None, None, false);
        assert!(!without.contains("COVERAGE HAMMER"));
    }

    #[test]
    fn test_steer_overrides_derived_prompt() {
        let prompt = chunk_prompt(3, "anchor text.", Some("cover the famine years".into()), None, false);
        assert!(prompt.starts_with("cover the famine years"));
        assert!(!prompt.contains("ANCHOR"));
    }

    #[test]
    fn test_source_segment_appended() {
        let prompt = chunk_prompt(1, "a.", None, Some("raw source material"), false);
        assert!(prompt.contains("<<<SOURCE\nraw source material\nSOURCE>>>"));
    }

    #[test]
    fn test_extend_prompt_forbids_conclusion() {
        let prompt = extend_prompt("tail.", None);
        assert!(prompt.contains("ANCHOR"));
        assert!(prompt.contains("do not conclude"));
    }

    #[test]
    fn test_request_includes_system_text() {
        let mut spec = RunSpec::new("subject");
        spec.system_text = "You are a book author.".to_string();
        let request = chat_request(&spec, "BEGIN".to_string());
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].content, "You are a book author.");

        let bare = chat_request(&RunSpec::new("subject"), "BEGIN".to_string());
        assert_eq!(bare.messages.len(), 1);
    }
}
