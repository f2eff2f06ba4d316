//! Prompt Assembler (C9, §4.3): turns retrieved context + history into the
//! message list handed to C6, with token-budget-aware trimming.

use crate::models::{ChatMessage, ChatRole, Message, RetrievedChunk, Role};

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

fn system_prompt(language: &str) -> String {
    format!(
        "You are a retrieval-augmented assistant. Answer the user's question using ONLY the \
         context provided below. If the context is insufficient to answer, say so explicitly \
         rather than guessing. Reply in {language}. Use clear, well-formatted prose."
    )
}

fn estimate_tokens(text: &str) -> usize {
    use tiktoken_rs::cl100k_base;
    cl100k_base()
        .map(|bpe| bpe.encode_ordinary(text).len())
        .unwrap_or_else(|_| text.len() / 4)
}

fn role_to_chat_role(role: Role) -> ChatRole {
    match role {
        Role::User => ChatRole::User,
        Role::Assistant => ChatRole::Assistant,
        Role::System => ChatRole::System,
    }
}

/// `build(query, contexts, history, language)` (§4.3). Drops the
/// lowest-ranked context entries first, then truncates history, and never
/// drops the current query, until the assembled message list fits
/// `max_tokens`.
pub fn build(
    query: &str,
    contexts: &[RetrievedChunk],
    history: &[Message],
    language: &str,
    max_tokens: usize,
    history_limit: usize,
) -> Vec<ChatMessage> {
    let system = ChatMessage { role: ChatRole::System, content: system_prompt(language) };

    let mut history_messages: Vec<ChatMessage> = history
        .iter()
        .rev()
        .take(history_limit)
        .rev()
        .map(|m| ChatMessage { role: role_to_chat_role(m.role), content: m.content.clone() })
        .collect();

    let mut included_contexts: Vec<&RetrievedChunk> = contexts.iter().collect();

    loop {
        let user_message = synthesize_user_message(&included_contexts, query);
        let total: usize = estimate_tokens(&system.content)
            + history_messages.iter().map(|m| estimate_tokens(&m.content)).sum::<usize>()
            + estimate_tokens(&user_message);

        if total <= max_tokens || (included_contexts.is_empty() && history_messages.is_empty()) {
            let mut out = vec![system.clone()];
            out.extend(history_messages.clone());
            out.push(ChatMessage { role: ChatRole::User, content: user_message });
            return out;
        }

        if !included_contexts.is_empty() {
            included_contexts.pop();
        } else if !history_messages.is_empty() {
            history_messages.remove(0);
        } else {
            unreachable!("loop guard above covers the empty/empty case");
        }
    }
}

fn synthesize_user_message(contexts: &[&RetrievedChunk], query: &str) -> String {
    if contexts.is_empty() {
        return query.to_string();
    }
    let joined = contexts.iter().map(|c| c.content.as_str()).collect::<Vec<_>>().join(CONTEXT_SEPARATOR);
    format!("{joined}{CONTEXT_SEPARATOR}{query}")
}
