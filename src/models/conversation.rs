//! Conversation types shared by the matrix builder and the chat client.
//!
//! A history is a plain ordered list of turns. It derives `Eq + Hash` so the
//! structure itself can key the reverse index.

use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instruction text establishing assistant behavior
    System,
    /// User-authored message
    User,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
        }
    }
}

/// A single role/content pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationTurn {
    role: Role,
    content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Ordered turns submitted as one chat-completion trial.
///
/// Serializes as a bare JSON array of `{role, content}` objects, which is
/// exactly the `messages` field of a chat completion request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory(Vec<ConversationTurn>);

impl ConversationHistory {
    /// Two-turn history: system prompt followed by the user message.
    pub fn new(system_prompt: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self(vec![
            ConversationTurn::system(system_prompt),
            ConversationTurn::user(user_message),
        ])
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Content of the first system turn, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.first_with_role(Role::System)
    }

    /// Content of the first user turn, if any.
    pub fn user_message(&self) -> Option<&str> {
        self.first_with_role(Role::User)
    }

    fn first_with_role(&self, role: Role) -> Option<&str> {
        self.0
            .iter()
            .find(|t| t.role == role)
            .map(|t| t.content.as_str())
    }
}

/// The (system prompt, user message) pair that produced a history.
///
/// Field names match the pivot columns used in result rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptPair {
    pub system_prompt: String,
    pub user_input: String,
}

impl PromptPair {
    pub fn new(system_prompt: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_input: user_input.into(),
        }
    }
}

/// Column names identifying the input side of a result row.
pub const PIVOT_COLUMNS: [&str; 2] = ["system_prompt", "user_input"];
