//! System prompt x user message matrix.
//!
//! Expands two ordered input lists into every two-turn conversation, in
//! nested order (system prompts outer, messages inner), and keeps a reverse
//! index from each history back to the pair that produced it.

use crate::models::{ConversationHistory, PromptPair};
use std::collections::HashMap;
use tracing::debug;

/// Reverse lookup from a history to its originating prompt pair.
///
/// Keys are compared structurally. Inserting an existing key replaces the
/// stored pair (last write wins).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryIndex {
    entries: HashMap<ConversationHistory, PromptPair>,
}

impl HistoryIndex {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Insert or overwrite; returns the displaced pair, if any.
    pub fn insert(&mut self, history: ConversationHistory, pair: PromptPair) -> Option<PromptPair> {
        self.entries.insert(history, pair)
    }

    pub fn get(&self, history: &ConversationHistory) -> Option<&PromptPair> {
        self.entries.get(history)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The expanded matrix: histories in nested order plus the reverse index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptMatrix {
    histories: Vec<ConversationHistory>,
    index: HistoryIndex,
}

impl PromptMatrix {
    /// Build the full cross product.
    ///
    /// The history for `system_prompts[i]` and `human_messages[j]` lands at
    /// position `i * human_messages.len() + j`. Either list being empty
    /// yields an empty matrix. Content is not validated.
    pub fn build<S: AsRef<str>>(system_prompts: &[S], human_messages: &[S]) -> Self {
        let capacity = system_prompts.len() * human_messages.len();
        let mut histories = Vec::with_capacity(capacity);
        let mut index = HistoryIndex::with_capacity(capacity);

        for system_prompt in system_prompts {
            let system_prompt = system_prompt.as_ref();
            for message in human_messages {
                let message = message.as_ref();
                let history = ConversationHistory::new(system_prompt, message);
                histories.push(history.clone());

                let pair = PromptPair::new(system_prompt, message);
                if let Some(previous) = index.insert(history, pair) {
                    debug!(
                        system_prompt = %previous.system_prompt,
                        user_input = %previous.user_input,
                        "Duplicate history, index entry replaced"
                    );
                }
            }
        }

        Self { histories, index }
    }

    pub fn histories(&self) -> &[ConversationHistory] {
        &self.histories
    }

    pub fn index(&self) -> &HistoryIndex {
        &self.index
    }

    pub fn into_parts(self) -> (Vec<ConversationHistory>, HistoryIndex) {
        (self.histories, self.index)
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}
