mod cli;
mod config;
mod gemini_client;

use std::io;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use eyre::Result;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use crate::cli::chat::ChatContext;
use crate::cli::chat::controller::ViewController;
use crate::cli::chat::theme::Theme;
use crate::config::Config;
use crate::gemini_client::GeminiClient;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    chat: ChatArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chat session
    Chat(ChatArgs),
}

#[derive(Args, Clone)]
struct ChatArgs {
    /// Question to send; prints the answer and exits
    #[arg(short, long)]
    input: Option<String>,

    /// File (up to 5 MiB) to send along with the question
    #[arg(short, long)]
    attach: Option<String>,

    /// Gemini model to use instead of GEMINI_MODEL or the default
    #[arg(short, long)]
    model: Option<String>,

    /// Color theme
    #[arg(long, value_enum, default_value_t = Theme::Light)]
    theme: Theme,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl ChatArgs {
    /// One-shot runs (`--input` / `--attach`) print plain output only.
    fn is_interactive(&self) -> bool {
        self.input.is_none() && self.attach.is_none()
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();
    let args = match cli.command {
        Some(Commands::Chat(args)) => args,
        None => cli.chat,
    };

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting SABOT Chat");

    let config = match Config::from_env(args.model.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to initialize Gemini client: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    let client = GeminiClient::new(&config);
    info!("Using model {}", client.model());

    let interactive = args.is_interactive();
    let controller = ViewController::new(client, args.theme);
    let mut chat_context = ChatContext::new(
        Box::new(io::stdout()),
        args.input,
        args.attach,
        interactive,
        controller,
    );
    chat_context.run().await
}
