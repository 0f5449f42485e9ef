//! Prompt builders for every chat op.
//!
//! Each builder returns a complete [`LlmRequest`]. Classifier, grader, and
//! safety prompts ask for a single-word reply that the parsers in
//! [`careguide_core::agent`] understand.

use careguide_core::models::ChatMessage;
use careguide_core::provider::{GenerationParams, LlmRequest};

/// A retrieved chunk as shown to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextPassage {
    pub chunk_id: String,
    pub procedure_tag: Option<String>,
    pub text: String,
}

pub const CLASSIFY_SYSTEM: &str = "You route questions for a patient procedure guidance assistant. \
Reply with exactly one word: RETRIEVE if answering needs the hospital's procedure documents, \
or DIRECT if it is a greeting, thanks, or small talk that needs no documents.";

pub const GRADE_SYSTEM: &str = "You judge whether retrieved passages can answer a patient's question. \
Reply with exactly one word: RELEVANT or IRRELEVANT.";

pub const REWRITE_SYSTEM: &str = "You rewrite patient questions into clear search queries for \
procedure documents. Keep the same language as the question. Reply with the rewritten query only.";

pub const GENERATE_SYSTEM: &str = "You answer patient questions about medical procedures using only \
the provided passages. Be concise and plain-spoken. Never give diagnoses or change medication \
instructions. If the passages do not contain the answer, say that you do not have enough \
information and suggest contacting the care team.";

pub const DIRECT_SYSTEM: &str = "You are a polite assistant for patient procedure guidance. Reply briefly. \
Do not give medical advice without documents; offer to answer questions about procedures.";

pub const SAFETY_SYSTEM: &str = "You review answers written for patients. Reply SAFE if the answer \
contains no diagnosis, no dosage changes, no advice to skip care, and nothing harmful. \
Otherwise reply UNSAFE followed by a short reason.";

/// Instruction appended to the generation prompt after a failed safety check.
pub const CORRECTIVE_INSTRUCTION: &str = "Your previous answer failed a safety review. \
Answer again using only the passages, without diagnoses, dosage advice, or advice to skip care.";

fn deterministic() -> GenerationParams {
    GenerationParams {
        temperature: 0.0,
        max_tokens: 16,
    }
}

pub fn classify(query: &str) -> LlmRequest {
    LlmRequest::new(
        vec![ChatMessage::system(CLASSIFY_SYSTEM), ChatMessage::user(query)],
        deterministic(),
    )
}

pub fn grade(query: &str, passages: &[ContextPassage]) -> LlmRequest {
    let user = format!(
        "Question:\n{}\n\nPassages:\n{}",
        query,
        format_passages(passages)
    );
    LlmRequest::new(
        vec![ChatMessage::system(GRADE_SYSTEM), ChatMessage::user(user)],
        deterministic(),
    )
}

pub fn rewrite(original: &str, current: &str, params: GenerationParams) -> LlmRequest {
    let user = if original == current {
        format!("Question: {}", original)
    } else {
        format!(
            "Original question: {}\nPrevious search query (found nothing useful): {}",
            original, current
        )
    };
    LlmRequest::new(
        vec![ChatMessage::system(REWRITE_SYSTEM), ChatMessage::user(user)],
        params,
    )
}

/// Grounded generation. An empty passage list tells the model to admit it
/// lacks the information.
pub fn generate(
    query: &str,
    passages: &[ContextPassage],
    corrective: bool,
    params: GenerationParams,
) -> LlmRequest {
    let context = if passages.is_empty() {
        "(no passages were found for this question; state that you do not have enough information)"
            .to_string()
    } else {
        format_passages(passages)
    };
    let mut messages = vec![
        ChatMessage::system(GENERATE_SYSTEM),
        ChatMessage::user(format!("Passages:\n{}\n\nQuestion: {}", context, query)),
    ];
    if corrective {
        messages.push(ChatMessage::user(CORRECTIVE_INSTRUCTION));
    }
    LlmRequest::new(messages, params)
}

/// Ungrounded reply for greetings and small talk.
pub fn direct(query: &str, corrective: bool, params: GenerationParams) -> LlmRequest {
    let mut messages = vec![ChatMessage::system(DIRECT_SYSTEM), ChatMessage::user(query)];
    if corrective {
        messages.push(ChatMessage::user(CORRECTIVE_INSTRUCTION));
    }
    LlmRequest::new(messages, params)
}

pub fn safety_check(query: &str, answer: &str) -> LlmRequest {
    let user = format!("Patient question:\n{}\n\nAnswer to review:\n{}", query, answer);
    LlmRequest::new(
        vec![ChatMessage::system(SAFETY_SYSTEM), ChatMessage::user(user)],
        GenerationParams {
            temperature: 0.0,
            max_tokens: 64,
        },
    )
}

fn format_passages(passages: &[ContextPassage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| match &p.procedure_tag {
            Some(tag) => format!("[{}] ({}; {})\n{}", i + 1, p.chunk_id, tag, p.text),
            None => format!("[{}] ({})\n{}", i + 1, p.chunk_id, p.text),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
