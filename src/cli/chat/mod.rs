pub mod attachment;
pub mod command;
pub mod controller;
pub mod conversation_state;
pub mod prompt;
pub mod theme;

use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

use color_print::cstr;
use command::Command;
use controller::{SubmitOutcome, ViewController};
use conversation_state::{ExchangeId, Role};
use crossterm::cursor::MoveToColumn;
use crossterm::{QueueableCommand, queue};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType};
use eyre::Result;
use prompt::generate_prompt;
use rustyline::error::ReadlineError;
use tracing::{debug, error, warn};

use crate::gemini_client::AnswerClient;

const WELCOME_TEXT: &str = cstr!(
    "
<bold>SABOT AI</bold>. Ask me anything.

<dim>/attach <<path></dim>    Attach a file (up to 5 MiB) to your next question
<dim>/history</dim>         List earlier questions
<dim>/help</dim>            Show the help dialogue
<dim>/quit</dim>            Quit the application
"
);

const HELP_TEXT: &str = cstr!(
    "
<bold>SABOT Chat</bold>

/attach <<path>    Attach a file (up to 5 MiB) to the next question
/detach          Drop the pending attachment
/send            Send the draft as it is (e.g. an attachment alone)
/theme           Toggle between the light and dark theme
/history         List earlier questions
/delete <<n>       Delete question n and its answer from the history
/clear           Clear the conversation history
/help            Show this help dialogue
/quit            Quit the application
"
);

const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

pub struct ChatContext<C: AnswerClient> {
    output: Box<dyn Write>,
    input: Option<String>,
    attach: Option<String>,
    interactive: bool,
    controller: ViewController<C>,
}

impl<C: AnswerClient> ChatContext<C> {
    pub fn new(
        output: Box<dyn Write>,
        input: Option<String>,
        attach: Option<String>,
        interactive: bool,
        mut controller: ViewController<C>,
    ) -> Self {
        controller.set_removal_hook(Box::new(|id: ExchangeId| debug!("Exchange {} removed from history", id)));
        Self {
            output,
            input,
            attach,
            interactive,
            controller,
        }
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        // One-shot mode
        if self.input.is_some() || self.attach.is_some() {
            let answered = self.run_once().await?;
            return Ok(if answered { ExitCode::SUCCESS } else { ExitCode::FAILURE });
        }

        if self.interactive {
            self.print_welcome()?;
            self.run_interactive().await?;
        }

        Ok(ExitCode::SUCCESS)
    }

    fn print_welcome(&mut self) -> Result<()> {
        writeln!(self.output, "{}", WELCOME_TEXT)?;
        Ok(())
    }

    async fn run_once(&mut self) -> Result<bool> {
        if let Some(path) = self.attach.take() {
            if !self.controller.select_attachment(&path).await {
                self.render_error()?;
                return Ok(false);
            }
        }
        if let Some(input) = self.input.take() {
            self.controller.push_draft(&input);
        }

        let outcome = self.submit_and_render().await?;
        Ok(matches!(outcome, SubmitOutcome::Answered(_)))
    }

    async fn run_interactive(&mut self) -> Result<()> {
        let mut rl = prompt::rl()?;

        loop {
            let pending = self.controller.session().attachment.as_ref().map(|a| a.filename.clone());
            let prompt_text = generate_prompt(pending.as_deref());

            match rl.readline(&prompt_text) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    rl.add_history_entry(line.as_str());

                    match Command::parse(&line) {
                        Ok(Command::Quit) => break,
                        Ok(command) => {
                            if let Err(e) = self.handle_command(command).await {
                                error!("Command failed: {}", e);
                                writeln!(self.output, "Error: {}", e)?;
                            }
                        }
                        Err(e) => writeln!(self.output, "{}", e)?,
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Ask(text) => {
                self.controller.push_draft(&text);
                self.submit_and_render().await?;
            }
            Command::Send => {
                if self.submit_and_render().await? == SubmitOutcome::Ignored {
                    writeln!(self.output, "Nothing to send.")?;
                }
            }
            Command::Attach(path) => {
                if self.controller.select_attachment(&path).await {
                    let session = self.controller.session();
                    let muted = session.theme.palette().muted;
                    let line = session.attachment.as_ref().map(|a| {
                        format!(
                            "Attached {} ({}, {} bytes). Type your question or /send.",
                            a.filename, a.mime_type, a.size
                        )
                    });
                    if let Some(line) = line {
                        self.print_colored(&line, muted)?;
                    }
                } else {
                    self.render_error()?;
                    self.controller.error_shown();
                }
            }
            Command::Detach => match self.controller.clear_attachment() {
                Some(attachment) => writeln!(self.output, "Removed {}.", attachment.filename)?,
                None => writeln!(self.output, "No file attached.")?,
            },
            Command::Theme => {
                let theme = self.controller.toggle_theme();
                writeln!(self.output, "Switched to the {} theme.", theme.name())?;
            }
            Command::History => self.render_history()?,
            Command::Delete(n) => match self.controller.remove_exchange_at(n - 1) {
                Some(_) => writeln!(self.output, "Deleted question {}.", n)?,
                None => writeln!(self.output, "There is no question {}.", n)?,
            },
            Command::Clear => {
                if self.controller.store().is_empty() {
                    writeln!(self.output, "Nothing to clear.")?;
                } else {
                    let count = self.controller.store().len();
                    self.controller.clear_history();
                    writeln!(self.output, "Conversation cleared ({} messages).", count)?;
                }
            }
            Command::Help => writeln!(self.output, "{}", HELP_TEXT)?,
            Command::Quit => {}
        }

        Ok(())
    }

    async fn submit_and_render(&mut self) -> Result<SubmitOutcome> {
        let outcome = self.submit_with_spinner().await?;

        match outcome {
            SubmitOutcome::Ignored => {}
            SubmitOutcome::Busy => writeln!(self.output, "A request is already in flight.")?,
            SubmitOutcome::Answered(_) => self.render_last_answer()?,
            SubmitOutcome::Failed(_) => {
                self.render_error()?;
                self.controller.error_shown();
                self.render_last_answer()?;
            }
        }

        Ok(outcome)
    }

    /// Drive the submit to completion while animating a spinner.
    ///
    /// A failed spinner write stops the animation but never the request.
    async fn submit_with_spinner(&mut self) -> Result<SubmitOutcome> {
        let muted = self.controller.session().theme.palette().muted;
        let submit = self.controller.submit();
        tokio::pin!(submit);

        let mut ticker = tokio::time::interval(Duration::from_millis(120));
        let mut frame = 0;
        let mut draw_error: Option<io::Error> = None;

        let outcome = loop {
            tokio::select! {
                outcome = &mut submit => break outcome,
                _ = ticker.tick(), if self.interactive && draw_error.is_none() => {
                    match draw_spinner(&mut self.output, muted, frame) {
                        Ok(()) => frame += 1,
                        Err(e) => {
                            warn!("Spinner stopped: {}", e);
                            draw_error = Some(e);
                        }
                    }
                }
            }
        };

        if let Some(e) = draw_error {
            return Err(e.into());
        }
        if frame > 0 {
            queue!(self.output, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
        }
        Ok(outcome)
    }

    fn render_last_answer(&mut self) -> Result<()> {
        let answer = self
            .controller
            .store()
            .list()
            .last()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.text.clone());

        if let Some(answer) = answer {
            let palette = self.controller.session().theme.palette();
            self.print_colored(&answer, palette.answer)?;
        }
        Ok(())
    }

    fn render_error(&mut self) -> Result<()> {
        if let Some(message) = self.controller.session().error.clone() {
            let palette = self.controller.session().theme.palette();
            self.print_colored(&format!("Error: {}", message), palette.error)?;
        }
        Ok(())
    }

    fn render_history(&mut self) -> Result<()> {
        let exchanges = self.controller.store().exchanges();
        if exchanges.is_empty() {
            writeln!(self.output, "No questions yet.")?;
            return Ok(());
        }

        let palette = self.controller.session().theme.palette();
        self.print_colored(&format!("Earlier questions ({}):", exchanges.len()), palette.accent)?;
        for (i, exchange) in exchanges.iter().enumerate() {
            let mut line = format!("{:>3}. {}  {}", i + 1, exchange.asked_at.format("%H:%M"), exchange.question);
            if let Some(attachment) = &exchange.attachment {
                line.push_str(&format!("  ({})", attachment));
            }
            if !exchange.answered {
                line.push_str("  (no answer)");
            }
            self.print_colored(&line, palette.fg)?;
        }
        Ok(())
    }

    fn print_colored(&mut self, text: &str, fg: Color) -> Result<()> {
        let bg = self.controller.session().theme.palette().bg;
        for line in text.lines() {
            queue!(
                self.output,
                SetBackgroundColor(bg),
                SetForegroundColor(fg),
                Print(line),
                ResetColor,
                Print("\n")
            )?;
        }
        self.output.flush()?;
        Ok(())
    }
}

fn draw_spinner(output: &mut dyn Write, color: Color, frame: usize) -> io::Result<()> {
    output
        .queue(MoveToColumn(0))?
        .queue(SetForegroundColor(color))?
        .queue(Print(format!("{} Thinking...", SPINNER[frame % SPINNER.len()])))?
        .queue(ResetColor)?
        .flush()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::cli::chat::attachment::Attachment;
    use crate::cli::chat::theme::Theme;
    use crate::gemini_client::AnswerError;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct EchoClient;

    #[async_trait]
    impl AnswerClient for EchoClient {
        async fn ask(&self, question: &str, _attachment: Option<&Attachment>) -> Result<String, AnswerError> {
            if question.contains("fail") {
                return Err(AnswerError::Transport {
                    status: 503,
                    status_text: "Service Unavailable".to_string(),
                    detail: None,
                });
            }
            Ok(format!("echo: {}", question))
        }
    }

    fn context(input: Option<&str>) -> (ChatContext<EchoClient>, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let context = ChatContext::new(
            Box::new(buffer.clone()),
            input.map(str::to_string),
            None,
            false,
            ViewController::new(EchoClient, Theme::Dark),
        );
        (context, buffer)
    }

    #[tokio::test]
    async fn one_shot_prints_the_answer() {
        let (mut context, buffer) = context(Some("2+2?"));
        assert!(context.run_once().await.unwrap());

        assert!(buffer.contents().contains("echo: 2+2?"));
    }

    #[tokio::test]
    async fn one_shot_failure_shows_banner_and_notice() {
        let (mut context, buffer) = context(Some("please fail"));
        assert!(!context.run_once().await.unwrap());

        let out = buffer.contents();
        assert!(out.contains("503"));
        assert!(out.contains(controller::FAILURE_NOTICE));
    }

    #[tokio::test]
    async fn history_and_delete_commands() {
        let (mut context, buffer) = context(None);
        context.handle_command(Command::Ask("first".to_string())).await.unwrap();
        context.handle_command(Command::Ask("second".to_string())).await.unwrap();
        context.handle_command(Command::Delete(1)).await.unwrap();
        context.handle_command(Command::History).await.unwrap();

        let out = buffer.contents();
        assert!(out.contains("Deleted question 1."));
        assert!(out.contains("1. "));
        assert_eq!(context.controller.store().exchanges().len(), 1);
        assert_eq!(context.controller.store().exchanges()[0].question, "second");
    }

    #[tokio::test]
    async fn theme_toggle_leaves_history_alone() {
        let (mut context, _buffer) = context(None);
        context.handle_command(Command::Ask("hi".to_string())).await.unwrap();
        context.handle_command(Command::Theme).await.unwrap();

        assert_eq!(context.controller.session().theme, Theme::Light);
        assert_eq!(context.controller.store().len(), 2);
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
        }
    }

    struct SlowClient;

    #[async_trait]
    impl AnswerClient for SlowClient {
        async fn ask(&self, question: &str, _attachment: Option<&Attachment>) -> Result<String, AnswerError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(format!("slow: {}", question))
        }
    }

    #[tokio::test]
    async fn broken_output_does_not_abandon_the_request() {
        let mut context = ChatContext::new(
            Box::new(BrokenWriter),
            None,
            None,
            true,
            ViewController::new(SlowClient, Theme::Light),
        );

        let err = context.handle_command(Command::Ask("one".to_string())).await.unwrap_err();
        assert!(err.to_string().contains("gone"));

        let session = context.controller.session();
        assert_eq!(session.phase, controller::Phase::Idle);
        assert!(!session.loading);
        assert_eq!(context.controller.store().len(), 2);
        assert_eq!(context.controller.store().list()[1].text, "slow: one");

        context.controller.push_draft("two");
        assert!(matches!(context.controller.submit().await, SubmitOutcome::Answered(_)));
    }

    #[tokio::test]
    async fn rendered_failure_returns_controller_to_idle() {
        let (mut context, _buffer) = context(None);
        context.handle_command(Command::Ask("please fail".to_string())).await.unwrap();

        let session = context.controller.session();
        assert_eq!(session.phase, controller::Phase::Idle);
        assert!(session.error.as_deref().unwrap_or_default().contains("503"));
    }

    #[tokio::test]
    async fn rejected_attachment_is_reported_and_state_stays_idle() {
        let (mut context, buffer) = context(None);
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");

        context
            .handle_command(Command::Attach(missing.to_str().unwrap().to_string()))
            .await
            .unwrap();

        assert!(buffer.contents().contains("Error: cannot read"));
        assert_eq!(context.controller.session().phase, controller::Phase::Idle);
        assert!(context.controller.session().attachment.is_none());
    }

    #[tokio::test]
    async fn history_shows_attachment_and_clear_counts_messages() {
        let (mut context, buffer) = context(None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hi").unwrap();

        context
            .handle_command(Command::Attach(path.to_str().unwrap().to_string()))
            .await
            .unwrap();
        context.handle_command(Command::Ask("read it".to_string())).await.unwrap();
        context.handle_command(Command::History).await.unwrap();
        context.handle_command(Command::Clear).await.unwrap();
        context.handle_command(Command::Clear).await.unwrap();

        let out = buffer.contents();
        assert!(out.contains("Earlier questions (1):"));
        assert!(out.contains("(notes.txt, 2 bytes)"));
        assert!(out.contains("Conversation cleared (2 messages)."));
        assert!(out.contains("Nothing to clear."));
    }

    #[tokio::test]
    async fn send_with_empty_draft_reports_nothing_to_send() {
        let (mut context, buffer) = context(None);
        context.handle_command(Command::Send).await.unwrap();

        assert!(buffer.contents().contains("Nothing to send."));
        assert!(context.controller.store().is_empty());
    }
}
