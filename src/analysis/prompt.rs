//! Prompt templates for the analyzers.

use crate::events::format_clock;

/// Shared system prompt. `language` controls the language of generated
/// artifacts, independent of the lecture language.
pub fn system_prompt(language: &str) -> String {
    format!(
        "You are a lecture assistant helping a student follow a live class. \
You receive real-time transcript excerpts and must analyze them quickly and \
precisely. Be concise and accurate. Reply in {language}."
    )
}

/// Ask whether the window contains a question requiring an answer.
/// Expects a strict JSON object back.
pub fn question_detection(transcript: &str) -> String {
    format!(
        "Analyze this lecture transcript excerpt and decide whether the \
speaker is asking a question that deserves an answer.\n\
\n\
Transcript (most recent lines):\n---\n{transcript}\n---\n\
\n\
Reply with ONLY a JSON object, no other text:\n\
{{\n\
  \"is_question\": true or false,\n\
  \"question_text\": \"the question as asked\",\n\
  \"kind\": \"direct\" | \"rhetorical\" | \"implicit\",\n\
  \"confidence\": 0.0 to 1.0\n\
}}\n\
\n\
kind: \"direct\" expects an answer from the audience, \"rhetorical\" does \
not, \"implicit\" is a guiding question embedded in the lecture flow. Set \
is_question only when you are confident the speaker is asking one."
    )
}

/// Generate an answer to a detected question.
pub fn answer(question: &str, transcript: &str, materials: &str) -> String {
    let materials_block = if materials.is_empty() {
        String::new()
    } else {
        format!("\nCourse materials for reference:\n---\n{materials}\n---\n")
    };
    format!(
        "The lecturer asked:\n{question}\n\
\n\
Recent lecture transcript for context:\n---\n{transcript}\n---\n\
{materials_block}\
Give the best complete, accurate, concise answer. Reply with the answer \
text only."
    )
}

/// Summarize one transcript window.
pub fn summary(transcript: &str, materials: &str, start_ms: u64, end_ms: u64) -> String {
    let materials_block = if materials.is_empty() {
        String::new()
    } else {
        format!("\nCourse materials for reference:\n---\n{materials}\n---\n")
    };
    format!(
        "Summarize the key points of this lecture window ({} - {}).\n\
\n\
Transcript:\n---\n{transcript}\n---\n\
{materials_block}\
Cover the main topic, key points, and anything the lecturer emphasized. \
Reply with a short plain-text summary.",
        format_clock(start_ms),
        format_clock(end_ms),
    )
}

/// Suggest a good question the listener could ask.
pub fn suggestion(transcript: &str, materials: &str) -> String {
    let materials_block = if materials.is_empty() {
        String::new()
    } else {
        format!("\nCourse materials for reference:\n---\n{materials}\n---\n")
    };
    format!(
        "Based on this lecture so far, propose one thoughtful question the \
student could ask in class. It should show understanding and invite \
discussion.\n\
\n\
Transcript:\n---\n{transcript}\n---\n\
{materials_block}\
Reply with the question and one sentence on why it is worth asking."
    )
}

/// Creative ideas and follow-up study directions.
pub fn ideas(transcript: &str, materials: &str) -> String {
    let materials_block = if materials.is_empty() {
        String::new()
    } else {
        format!("\nCourse materials for reference:\n---\n{materials}\n---\n")
    };
    format!(
        "Based on this lecture, propose a few creative ideas and directions \
for deeper study: connections to other fields, projects worth trying, and \
topics worth reading up on.\n\
\n\
Transcript:\n---\n{transcript}\n---\n\
{materials_block}\
Reply with a short plain-text list."
    )
}
