//! unconstrained - terminal chat client for hosted assistants

mod commands;
mod config;

use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use unconstrained_api::{AssistantsApi, OpenAIProvider, Role, RunStatus};
use unconstrained_chat::{
    AssistantPreset, AttachOutcome, ChatEvent, ChatSession, Error, PollStep, TranscriptEntry,
    UploadedFile, find_preset,
};

use commands::{AssistantCommand, CommandResult};
use config::Config;

/// unconstrained - chat with hosted assistants from the terminal
#[derive(Parser, Debug)]
#[command(name = "unconstrained")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Assistant preset to start with
    #[arg(short, long)]
    assistant: Option<String>,

    /// File to attach to the first prompt
    #[arg(short, long)]
    file: Option<String>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Override the API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// List assistant presets
    #[arg(long)]
    list_assistants: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("unconstrained=debug,unconstrained_api=debug,unconstrained_chat=debug")
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let config = Config::load();
    let presets = config.presets();

    if args.list_assistants {
        println!("{}", AssistantCommand::list_text(&presets, None));
        return Ok(());
    }

    let api_key = match config.get_api_key() {
        Ok(key) => key,
        Err(_) => {
            eprintln!("Error: No API key found. Set OPENAI_API_KEY or add api_key to the config file.");
            eprintln!("Config path: {}", Config::config_path().display());
            std::process::exit(1);
        }
    };

    let mut provider = OpenAIProvider::new(api_key);
    if let Some(url) = args.base_url.clone().or_else(|| config.base_url.clone()) {
        provider = provider.with_base_url(url);
    }
    let api: Arc<dyn AssistantsApi> = Arc::new(provider);

    let mut app = App::new(config, presets, api);

    // Pick the starting assistant: flag, then config, then the first preset
    let starting = match args.assistant.as_deref() {
        Some(name) => AssistantCommand::find(name, &app.presets).cloned(),
        None => match app.config.default_assistant.as_deref() {
            Some(name) => find_preset(&app.presets, name).ok().cloned(),
            None => app.presets.first().cloned(),
        },
    };

    let non_interactive = args.command.is_some();
    match starting {
        Some(preset) => {
            if let Err(e) = app.select(&preset).await {
                if non_interactive {
                    anyhow::bail!(describe_error(&e));
                }
                eprintln!("Warning: {}", describe_error(&e));
            }
        }
        None if non_interactive => anyhow::bail!(Error::NoAssistant),
        None => eprintln!("Warning: No assistant selected. Use /assistant to pick one."),
    }

    if let Some(ref path) = args.file {
        if let Err(e) = app.upload(Path::new(path)).await {
            if non_interactive {
                anyhow::bail!(describe_error(&e));
            }
            eprintln!("Error: {}", describe_error(&e));
        }
    }

    // Non-interactive mode
    if let Some(command) = args.command {
        return run_command(&mut app, &command).await;
    }

    run_interactive(&mut app).await
}

/// One terminal client: the active session plus what outlives it
struct App {
    config: Config,
    presets: Vec<AssistantPreset>,
    api: Arc<dyn AssistantsApi>,
    session: ChatSession,
    printer: JoinHandle<()>,
    /// JSON produced by the last table upload
    last_json: Option<String>,
}

impl App {
    fn new(config: Config, presets: Vec<AssistantPreset>, api: Arc<dyn AssistantsApi>) -> Self {
        let session = ChatSession::new(config.chat_config(), Arc::clone(&api));
        let printer = spawn_printer(session.subscribe(), false);
        Self {
            config,
            presets,
            api,
            session,
            printer,
            last_json: None,
        }
    }

    async fn select(&mut self, preset: &AssistantPreset) -> unconstrained_chat::Result<()> {
        let selected = self.session.select_assistant(preset).await?;
        println!(
            "Assistant: {} ({})",
            selected.preset,
            selected.assistant.display_name()
        );
        Ok(())
    }

    /// Replace the session with a fresh one using the same assistant
    async fn new_session(&mut self) -> unconstrained_chat::Result<()> {
        let current = self.session.assistant().map(|a| a.preset.clone());

        self.printer.abort();
        self.session = ChatSession::new(self.config.chat_config(), Arc::clone(&self.api));
        self.printer = spawn_printer(self.session.subscribe(), false);
        self.last_json = None;

        if let Some(preset) = current.and_then(|name| find_preset(&self.presets, &name).ok().cloned()) {
            self.select(&preset).await?;
        }
        Ok(())
    }

    async fn upload(&mut self, path: &Path) -> unconstrained_chat::Result<()> {
        let file = UploadedFile::from_path(path).await?;
        match self.session.attach_file(file).await? {
            AttachOutcome::Converted {
                json,
                rows,
                columns,
                file,
            } => {
                println!(
                    "Converted {} to JSON: {} rows, columns: {}",
                    path.display(),
                    rows,
                    columns.join(", ")
                );
                println!("{}", preview(&json, 20));
                println!("Stored as {}; it will be attached to your next message.", file.filename);
                self.last_json = Some(json);
            }
            AttachOutcome::Uploaded { kind, file } => {
                println!(
                    "Uploaded {} {}; it will be attached to your next message.",
                    kind.label(),
                    file.filename
                );
            }
            AttachOutcome::Displayed {
                kind,
                file_name,
                bytes,
            } => {
                println!(
                    "Received {} {} ({} bytes). It is not sent to the assistant.",
                    kind.label(),
                    file_name,
                    bytes
                );
            }
        }
        Ok(())
    }
}

async fn run_command(app: &mut App, command: &str) -> anyhow::Result<()> {
    println!("> {}", command);
    println!();

    // Swap in a printer that exits once the turn's final event is out
    app.printer.abort();
    let printer = spawn_printer(app.session.subscribe(), true);

    let step = match app.session.prompt(command).await {
        Ok(step) => step,
        Err(e) => anyhow::bail!(describe_error(&e)),
    };
    if let Err(e) = printer.await {
        tracing::debug!("Printer task ended early: {}", e);
    }
    print_outcome(&step);

    match step {
        PollStep::Failed { message } => anyhow::bail!(message),
        PollStep::Stalled { status } => anyhow::bail!("Stopped waiting for a reply (run {})", status),
        _ => Ok(()),
    }
}

async fn run_interactive(app: &mut App) -> anyhow::Result<()> {
    use std::io::{self, Write};

    // Show minimal startup info (only if TTY)
    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        let id = app.session.id().to_string();
        eprintln!("{} session: {}", app.config.title, &id[..8]);
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    let (line_tx, mut lines) = mpsc::unbounded_channel();
    tokio::spawn(read_lines(line_tx));

    loop {
        print!("> ");
        io::stdout().flush()?;

        let input = tokio::select! {
            line = lines.recv() => match line {
                Some(line) => line,
                // EOF
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        // Handle slash commands
        if let Some(result) = commands::parse_command(input) {
            match result {
                CommandResult::Exit => break,
                CommandResult::Message(msg) => println!("{}", msg),
                CommandResult::ListAssistants => {
                    let current = app.session.assistant().map(|a| a.preset.as_str());
                    println!("{}", AssistantCommand::list_text(&app.presets, current));
                }
                CommandResult::SelectAssistant(name) => {
                    match AssistantCommand::find(&name, &app.presets).cloned() {
                        Some(preset) => {
                            if let Err(e) = app.select(&preset).await {
                                println!("Could not switch assistant: {}", describe_error(&e));
                            }
                        }
                        None => {
                            println!("No assistant found matching '{}'", name);
                            println!("Use /assistant to list available assistants");
                        }
                    }
                }
                CommandResult::Upload(path) => {
                    if let Err(e) = app.upload(&path).await {
                        println!("Upload failed: {}", describe_error(&e));
                    }
                }
                CommandResult::SaveJson(path) => match app.last_json {
                    Some(ref json) => match tokio::fs::write(&path, json).await {
                        Ok(()) => println!("Saved JSON to {}", path.display()),
                        Err(e) => println!("Failed to save {}: {}", path.display(), e),
                    },
                    None => println!("No converted table yet. Upload a CSV or Excel file first."),
                },
                CommandResult::ShowTranscript => {
                    let transcript = app.session.transcript();
                    if transcript.is_empty() {
                        println!("No messages yet.");
                    }
                    for entry in transcript {
                        println!("{}", format_entry(entry));
                    }
                }
                CommandResult::NewSession => match app.new_session().await {
                    Ok(()) => println!("Started a new conversation."),
                    Err(e) => println!("Started a new conversation without an assistant: {}", e),
                },
                CommandResult::Cancel => println!("Nothing to cancel."),
                CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            println!();
            continue;
        }

        println!();
        match run_turn(&mut app.session, input, &mut lines).await {
            Ok(step) => print_outcome(&step),
            Err(e) => eprintln!("Error: {}", describe_error(&e)),
        }
        println!();
    }

    Ok(())
}

/// Submit a prompt and wait for it, cancelling on `/cancel` or Ctrl-C
async fn run_turn(
    session: &mut ChatSession,
    text: &str,
    lines: &mut mpsc::UnboundedReceiver<String>,
) -> unconstrained_chat::Result<PollStep> {
    let handle = session.handle();
    let turn = session.prompt(text);
    tokio::pin!(turn);

    let mut stdin_open = true;
    loop {
        tokio::select! {
            result = &mut turn => return result,
            line = lines.recv(), if stdin_open => match line {
                Some(line) if line.trim() == "/cancel" => handle.cancel(),
                Some(line) if line.trim().is_empty() => {}
                Some(_) => println!("[{}]", Error::Busy),
                None => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n[Cancelling...]");
                handle.cancel();
            }
        }
    }
}

async fn read_lines(tx: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

/// Print progress while a reply is pending.
///
/// With `stop_on_terminal` the task ends after the first event that closes a
/// turn; otherwise it runs until the session is dropped.
fn spawn_printer(
    mut receiver: broadcast::Receiver<ChatEvent>,
    stop_on_terminal: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut thinking_shown = false;
        let mut last_waiting: Option<RunStatus> = None;

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Printer fell behind; skipped {} events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let terminal = event.is_terminal();

            match event {
                ChatEvent::UserMessage { .. } => {
                    thinking_shown = false;
                    last_waiting = None;
                }
                ChatEvent::Working { .. } => {
                    if !thinking_shown {
                        println!("Thinking ......");
                        thinking_shown = true;
                    }
                }
                ChatEvent::Retrying { attempt, ceiling } => {
                    println!("Run failed, retrying ({}/{}) ......", attempt, ceiling);
                }
                ChatEvent::Waiting { status } => {
                    if last_waiting != Some(status) {
                        println!("[Run is {}; still waiting]", status);
                        last_waiting = Some(status);
                    }
                }
                ChatEvent::FileAttached {
                    file_name,
                    file_id: Some(file_id),
                } => {
                    tracing::debug!("Attached {} as {}", file_name, file_id);
                }
                _ => {}
            }

            if terminal && stop_on_terminal {
                break;
            }
        }
    })
}

/// Error text for the terminal, with a hint when the user can act on it
fn describe_error(e: &Error) -> String {
    match e {
        Error::Api(api) if api.is_not_found() => format!(
            "{}. Check the assistant ids in {}, or start over with /new.",
            e,
            Config::config_path().display()
        ),
        Error::Busy => e.to_string(),
        _ if e.is_retryable() => format!("{}. Try again in a moment.", e),
        _ => e.to_string(),
    }
}

fn print_outcome(step: &PollStep) {
    match step {
        PollStep::Completed {
            transcript,
            partial,
        } => {
            for entry in latest_reply(transcript) {
                println!("{}", entry.text);
            }
            if *partial {
                println!("[The reply was cut short]");
            }
        }
        PollStep::Failed { message } => println!("{}", message),
        PollStep::Stalled { status } => {
            println!("Stopped waiting for a reply (run {}). Try again later.", status)
        }
        PollStep::Cancelled => println!("[Cancelled]"),
        PollStep::Idle
        | PollStep::Working { .. }
        | PollStep::Retrying { .. }
        | PollStep::Waiting { .. } => {}
    }
}

/// Entries after the last user message
fn latest_reply(transcript: &[TranscriptEntry]) -> &[TranscriptEntry] {
    let start = transcript
        .iter()
        .rposition(|e| e.role == Role::User)
        .map(|i| i + 1)
        .unwrap_or(0);
    &transcript[start..]
}

fn format_entry(entry: &TranscriptEntry) -> String {
    let label = match entry.role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::Other => "other",
    };
    format!("[{}] {}", label, entry.text)
}

/// First `max_lines` lines of `text`
fn preview(text: &str, max_lines: usize) -> String {
    let mut lines: Vec<&str> = text.lines().take(max_lines + 1).collect();
    if lines.len() > max_lines {
        lines.truncate(max_lines);
        lines.push("...");
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(role: Role, text: &str) -> TranscriptEntry {
        TranscriptEntry {
            role,
            text: text.to_string(),
            message_id: None,
            timestamp: 0,
        }
    }

    #[test]
    fn test_latest_reply_follows_last_user_entry() {
        let transcript = vec![
            entry(Role::User, "q1"),
            entry(Role::Assistant, "a1"),
            entry(Role::User, "q2"),
            entry(Role::Assistant, "a2"),
            entry(Role::Assistant, "a2 continued"),
        ];
        let reply: Vec<&str> = latest_reply(&transcript)
            .iter()
            .map(|e| e.text.as_str())
            .collect();
        assert_eq!(reply, vec!["a2", "a2 continued"]);
    }

    #[test]
    fn test_latest_reply_empty_when_unanswered() {
        let transcript = vec![entry(Role::User, "q1")];
        assert!(latest_reply(&transcript).is_empty());
    }

    #[test]
    fn test_describe_error_hints() {
        let missing = Error::Api(unconstrained_api::Error::api(404, "invalid_request_error", "No assistant found"));
        assert!(describe_error(&missing).contains("Check the assistant ids"));

        let overloaded = Error::Api(unconstrained_api::Error::api(503, "server_error", "Overloaded"));
        assert!(describe_error(&overloaded).ends_with("Try again in a moment."));

        assert_eq!(describe_error(&Error::Busy), Error::Busy.to_string());
        assert_eq!(describe_error(&Error::NoAssistant), "No assistant selected");
    }

    #[tokio::test]
    async fn test_printer_survives_lag_and_stops_on_terminal() {
        let (tx, rx) = broadcast::channel(2);
        for _ in 0..5 {
            tx.send(ChatEvent::Working {
                status: RunStatus::InProgress,
            })
            .unwrap();
        }

        let printer = spawn_printer(rx, true);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!printer.is_finished());

        tx.send(ChatEvent::Cancelled).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), printer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_printer_keeps_running_between_turns() {
        let (tx, rx) = broadcast::channel(8);
        let printer = spawn_printer(rx, false);
        tx.send(ChatEvent::Cancelled).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!printer.is_finished());

        drop(tx);
        tokio::time::timeout(std::time::Duration::from_secs(5), printer)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("a\nb\nc", 2), "a\nb\n...");
        assert_eq!(preview("a\nb", 2), "a\nb");
    }
}
