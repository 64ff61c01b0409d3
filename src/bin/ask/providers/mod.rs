mod openai;

pub use openai::OpenAiChat;

/// Prompt shared by the chat providers: retrieved contents, blank-line separated, then the question.
pub fn build_prompt(question: &str, context: &[gridrag::RetrievedDocument]) -> String {
    let context_block = context
        .iter()
        .map(|hit| hit.document.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Answer the question based on the following context:\n{context_block}\n\nQuestion: {question}")
}
