//! Interactive chat session: commands, conversation history and transcript

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

use docrag_core::{
    ConversationTurn, Error, ExpertiseLevel, FeedbackType, QueryResult, Result, UserContext,
};
use docrag_rag::RagSystem;

/// Turns kept in memory; the engines only read the most recent ones
const MAX_HISTORY: usize = 20;

/// A line typed in the chat loop
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Ask(String),
    Expertise(ExpertiseLevel),
    Feedback(FeedbackType),
    Stats,
    Clear,
    Help,
    Exit,
    Empty,
    Unknown(String),
}

impl ChatCommand {
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            return ChatCommand::Empty;
        }

        let (head, rest) = input.split_once(' ').unwrap_or((input, ""));
        let rest = rest.trim();
        match head.to_lowercase().as_str() {
            "exit" | "quit" => ChatCommand::Exit,
            "help" => ChatCommand::Help,
            "clear" => ChatCommand::Clear,
            "stats" => ChatCommand::Stats,
            "expertise" => match ExpertiseLevel::parse(rest) {
                Some(level) => ChatCommand::Expertise(level),
                None => ChatCommand::Unknown(input.to_string()),
            },
            "feedback" => match rest {
                "+" | "positive" => ChatCommand::Feedback(FeedbackType::Positive),
                "-" | "negative" => ChatCommand::Feedback(FeedbackType::Negative),
                _ => ChatCommand::Unknown(input.to_string()),
            },
            _ => ChatCommand::Ask(input.to_string()),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Transcript {
    user: UserContext,
    turns: Vec<ConversationTurn>,
}

/// Conversation state of one interactive user
#[derive(Debug, Default)]
pub struct ChatSession {
    user: UserContext,
    history: Vec<ConversationTurn>,
    last: Option<QueryResult>,
}

impl ChatSession {
    pub fn new(user: UserContext) -> Self {
        Self {
            user,
            history: Vec::new(),
            last: None,
        }
    }

    pub fn user(&self) -> &UserContext {
        &self.user
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn set_expertise(&mut self, expertise: ExpertiseLevel) {
        self.user.expertise = expertise;
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.last = None;
    }

    /// Append an exchange, keeping at most the last `MAX_HISTORY` turns
    pub fn record(&mut self, question: &str, result: &QueryResult) {
        self.history.push(ConversationTurn {
            question: question.to_string(),
            answer: result.answer.clone(),
        });
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.last = Some(result.clone());
    }

    /// Ask through the router with this session's expertise and history
    pub async fn ask(&mut self, system: &RagSystem, question: &str) -> QueryResult {
        let result = system.ask_as(question, &self.user, &self.history).await;
        if result.metadata.error.is_none() {
            self.record(question, &result);
        }
        result
    }

    /// Rate the last answer; returns the feedback id when it was recorded
    pub fn feedback(&self, system: &RagSystem, feedback_type: FeedbackType) -> Option<String> {
        let last = self.last.as_ref()?;
        let rating = match feedback_type {
            FeedbackType::Positive => Some(5),
            FeedbackType::Negative => Some(1),
            _ => None,
        };
        system.router().simple().submit_feedback(
            &last.query,
            &last.answer,
            feedback_type,
            rating,
            None,
            self.user.user_id.as_deref(),
        )
    }

    /// Write user context and turns as JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        let transcript = Transcript {
            user: self.user.clone(),
            turns: self.history.clone(),
        };
        let json = serde_json::to_string_pretty(&transcript)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(path, json).await?;
        Ok(())
    }

    /// Restore a saved session; a missing or unreadable file gives a fresh one
    pub async fn load(path: &Path, user: UserContext) -> Self {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(_) => return Self::new(user),
        };

        match serde_json::from_str::<Transcript>(&content) {
            Ok(transcript) => Self {
                user: transcript.user,
                history: transcript.turns,
                last: None,
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable chat transcript");
                Self::new(user)
            }
        }
    }
}
