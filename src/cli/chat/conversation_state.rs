use chrono::{DateTime, Local};

use super::attachment::Attachment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(u64);

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub exchange: ExchangeId,
    pub role: Role,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub sent_at: DateTime<Local>,
}

impl Message {
    pub fn new(exchange: ExchangeId, role: Role, text: &str, attachment: Option<Attachment>) -> Self {
        Self {
            exchange,
            role,
            text: text.to_string(),
            attachment,
            sent_at: Local::now(),
        }
    }
}

/// One row of the history panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSummary {
    pub id: ExchangeId,
    pub question: String,
    /// File name and size of the attachment sent with the question.
    pub attachment: Option<String>,
    pub asked_at: DateTime<Local>,
    pub answered: bool,
}

/// Ordered log of the messages exchanged in this session.
///
/// Messages are grouped into exchanges by id, so removal never depends on
/// user and assistant messages strictly alternating.
pub struct ConversationState {
    messages: Vec<Message>,
    next_exchange: u64,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_exchange: 0,
        }
    }

    pub fn begin_exchange(&mut self) -> ExchangeId {
        let id = ExchangeId(self.next_exchange);
        self.next_exchange += 1;
        id
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_user(&mut self, exchange: ExchangeId, text: &str, attachment: Option<Attachment>) {
        self.append(Message::new(exchange, Role::User, text, attachment));
    }

    pub fn push_assistant(&mut self, exchange: ExchangeId, text: &str) {
        self.append(Message::new(exchange, Role::Assistant, text, None));
    }

    pub fn list(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn exchanges(&self) -> Vec<ExchangeSummary> {
        let mut summaries: Vec<ExchangeSummary> = Vec::new();

        for message in &self.messages {
            match message.role {
                Role::User => summaries.push(ExchangeSummary {
                    id: message.exchange,
                    question: message.text.clone(),
                    attachment: message
                        .attachment
                        .as_ref()
                        .map(|a| format!("{}, {} bytes", a.filename, a.size)),
                    asked_at: message.sent_at,
                    answered: false,
                }),
                Role::Assistant => {
                    if let Some(summary) = summaries.iter_mut().rev().find(|s| s.id == message.exchange) {
                        summary.answered = true;
                    }
                }
            }
        }

        summaries
    }

    /// Remove every message of `id`. Returns how many were removed.
    pub fn remove_exchange(&mut self, id: ExchangeId) -> Option<usize> {
        let before = self.messages.len();
        self.messages.retain(|m| m.exchange != id);
        let removed = before - self.messages.len();
        (removed > 0).then_some(removed)
    }

    /// Remove the `index`-th exchange of the history panel.
    pub fn remove_exchange_at(&mut self, index: usize) -> Option<ExchangeId> {
        let id = self.exchanges().get(index)?.id;
        self.remove_exchange(id).map(|_| id)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answered(state: &mut ConversationState, question: &str, answer: &str) -> ExchangeId {
        let id = state.begin_exchange();
        state.push_user(id, question, None);
        state.push_assistant(id, answer);
        id
    }

    fn texts(state: &ConversationState) -> Vec<(Role, &str)> {
        state.list().iter().map(|m| (m.role, m.text.as_str())).collect()
    }

    #[test]
    fn appends_keep_order() {
        let mut state = ConversationState::new();
        answered(&mut state, "a?", "A");
        answered(&mut state, "b?", "B");

        assert_eq!(
            texts(&state),
            vec![
                (Role::User, "a?"),
                (Role::Assistant, "A"),
                (Role::User, "b?"),
                (Role::Assistant, "B"),
            ]
        );
        assert_eq!(state.exchanges().len(), 2);
    }

    #[test]
    fn removing_an_exchange_takes_both_messages() {
        let mut state = ConversationState::new();
        answered(&mut state, "a?", "A");
        let b = answered(&mut state, "b?", "B");
        answered(&mut state, "c?", "C");

        assert_eq!(state.remove_exchange(b), Some(2));
        assert_eq!(
            texts(&state),
            vec![
                (Role::User, "a?"),
                (Role::Assistant, "A"),
                (Role::User, "c?"),
                (Role::Assistant, "C"),
            ]
        );
    }

    #[test]
    fn unanswered_exchange_removes_only_the_question() {
        let mut state = ConversationState::new();
        answered(&mut state, "a?", "A");
        let pending = state.begin_exchange();
        state.push_user(pending, "b?", None);

        assert!(!state.exchanges()[1].answered);
        assert_eq!(state.remove_exchange_at(1), Some(pending));
        assert_eq!(texts(&state), vec![(Role::User, "a?"), (Role::Assistant, "A")]);
    }

    #[test]
    fn repeated_removal_at_same_index_is_safe() {
        let mut state = ConversationState::new();
        let a = answered(&mut state, "a?", "A");
        let b = answered(&mut state, "b?", "B");

        assert_eq!(state.remove_exchange_at(0), Some(a));
        assert_eq!(state.remove_exchange_at(0), Some(b));
        assert_eq!(state.remove_exchange_at(0), None);
        assert!(state.is_empty());
    }

    #[test]
    fn out_of_range_index_is_a_no_op() {
        let mut state = ConversationState::new();
        answered(&mut state, "a?", "A");

        assert_eq!(state.remove_exchange_at(5), None);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn removal_ignores_broken_alternation() {
        let mut state = ConversationState::new();
        let a = state.begin_exchange();
        state.push_user(a, "a?", None);
        state.push_assistant(a, "first try failed");
        state.push_assistant(a, "second reply");
        let b = answered(&mut state, "b?", "B");

        assert_eq!(state.remove_exchange(a), Some(3));
        assert_eq!(state.exchanges()[0].id, b);
        assert_eq!(texts(&state), vec![(Role::User, "b?"), (Role::Assistant, "B")]);
    }

    #[test]
    fn history_mentions_the_attachment() {
        let mut state = ConversationState::new();
        let id = state.begin_exchange();
        let attachment = Attachment {
            filename: "a.txt".to_string(),
            mime_type: "text/plain".to_string(),
            data: "aGk=".to_string(),
            size: 2,
        };
        state.push_user(id, "[Attached: a.txt] read", Some(attachment));

        let summary = &state.exchanges()[0];
        assert_eq!(summary.attachment.as_deref(), Some("a.txt, 2 bytes"));
        assert!(!summary.answered);
    }

    #[test]
    fn ids_are_not_reused_after_removal() {
        let mut state = ConversationState::new();
        let a = answered(&mut state, "a?", "A");
        state.remove_exchange(a);
        let b = state.begin_exchange();

        assert_ne!(a, b);
        assert_eq!(state.remove_exchange(a), None);
    }
}
