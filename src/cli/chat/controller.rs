use tracing::{debug, info, warn};

use super::attachment::{self, Attachment};
use super::conversation_state::{ConversationState, ExchangeId};
use super::theme::Theme;
use crate::gemini_client::AnswerClient;

/// Assistant text recorded when a request fails.
pub const FAILURE_NOTICE: &str = "An error occurred while generating the answer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Submitting,
    DisplayingError,
}

/// Transient, per-session UI state.
#[derive(Debug, Default)]
pub struct SessionState {
    pub draft: String,
    pub attachment: Option<Attachment>,
    pub theme: Theme,
    pub loading: bool,
    pub error: Option<String>,
    pub phase: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing to send.
    Ignored,
    /// A request is already in flight.
    Busy,
    Answered(ExchangeId),
    Failed(ExchangeId),
}

pub type RemovalHook = Box<dyn FnMut(ExchangeId) + Send>;

pub struct ViewController<C: AnswerClient> {
    client: C,
    session: SessionState,
    store: ConversationState,
    on_removed: Option<RemovalHook>,
}

impl<C: AnswerClient> ViewController<C> {
    pub fn new(client: C, theme: Theme) -> Self {
        Self {
            client,
            session: SessionState {
                theme,
                ..SessionState::default()
            },
            store: ConversationState::new(),
            on_removed: None,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn store(&self) -> &ConversationState {
        &self.store
    }

    /// Append `text` to the draft, separated by a space.
    pub fn push_draft(&mut self, text: &str) {
        if !self.session.draft.is_empty() && !self.session.draft.ends_with(' ') {
            self.session.draft.push(' ');
        }
        self.session.draft.push_str(text);
    }

    pub async fn submit(&mut self) -> SubmitOutcome {
        if self.session.phase == Phase::Submitting {
            warn!("Submit ignored, a request is already in flight");
            return SubmitOutcome::Busy;
        }

        if self.session.draft.trim().is_empty() && self.session.attachment.is_none() {
            return SubmitOutcome::Ignored;
        }

        self.session.error = None;
        self.session.loading = true;
        self.session.phase = Phase::Submitting;

        let question = self.session.draft.clone();
        let attachment = self.session.attachment.take();
        let result = self.client.ask(&question, attachment.as_ref()).await;

        let exchange = self.store.begin_exchange();
        self.store.push_user(exchange, &question, attachment);
        self.session.draft.clear();
        self.session.loading = false;

        match result {
            Ok(answer) => {
                self.store.push_assistant(exchange, &answer);
                self.session.phase = Phase::Idle;
                debug!("Exchange {} answered", exchange);
                SubmitOutcome::Answered(exchange)
            }
            Err(err) => {
                warn!("Exchange {} failed: {}", exchange, err);
                self.store.push_assistant(exchange, FAILURE_NOTICE);
                self.session.error = Some(err.to_string());
                self.session.phase = Phase::DisplayingError;
                SubmitOutcome::Failed(exchange)
            }
        }
    }

    /// Encode the file at `path` and put its marker in front of the draft.
    ///
    /// On failure only the error is set.
    pub async fn select_attachment(&mut self, path: &str) -> bool {
        match attachment::encode_file(path).await {
            Ok(attachment) => {
                self.clear_attachment();
                let marker = attachment.marker();
                self.session.draft = if self.session.draft.is_empty() {
                    marker
                } else {
                    format!("{} {}", marker, self.session.draft)
                };
                info!("Attached {} ({} bytes)", attachment.filename, attachment.size);
                self.session.attachment = Some(attachment);
                true
            }
            Err(err) => {
                warn!("Attachment rejected: {}", err);
                self.session.error = Some(err.to_string());
                false
            }
        }
    }

    pub fn clear_attachment(&mut self) -> Option<Attachment> {
        let attachment = self.session.attachment.take()?;
        let marker = attachment.marker();
        if let Some(rest) = self.session.draft.strip_prefix(&marker) {
            self.session.draft = rest.trim_start().to_string();
        }
        Some(attachment)
    }

    pub fn toggle_theme(&mut self) -> Theme {
        self.session.theme = self.session.theme.toggled();
        self.session.theme
    }

    pub fn set_removal_hook(&mut self, hook: RemovalHook) {
        self.on_removed = Some(hook);
    }

    /// Remove the `index`-th entry of the history panel.
    pub fn remove_exchange_at(&mut self, index: usize) -> Option<ExchangeId> {
        let id = self.store.remove_exchange_at(index)?;
        if let Some(hook) = self.on_removed.as_mut() {
            hook(id);
        }
        Some(id)
    }

    /// The banner has been rendered. The error text stays until the next submit.
    pub fn error_shown(&mut self) {
        if self.session.phase == Phase::DisplayingError {
            self.session.phase = Phase::Idle;
        }
    }

    pub fn clear_history(&mut self) {
        self.store.clear();
    }
}
