//! Slash commands for interactive mode

mod assistant;

pub use assistant::AssistantCommand;

use std::path::PathBuf;

/// Result of parsing a slash command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the assistant)
    Message(String),
    /// List the assistant presets
    ListAssistants,
    /// Switch to the named preset
    SelectAssistant(String),
    /// Attach a file to the next prompt
    Upload(PathBuf),
    /// Write the last converted table to a file
    SaveJson(PathBuf),
    /// Print the whole transcript
    ShowTranscript,
    /// Start over with a fresh session
    NewSession,
    /// Cancel the reply in flight
    Cancel,
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command; `None` if the input is a plain prompt
pub fn parse_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "assistant" | "a" => AssistantCommand::execute(args),

        "upload" | "u" => match required_path(args, "upload") {
            Ok(path) => CommandResult::Upload(path),
            Err(usage) => usage,
        },

        "save-json" | "save" => match required_path(args, "save-json") {
            Ok(path) => CommandResult::SaveJson(path),
            Err(usage) => usage,
        },

        "transcript" | "t" => CommandResult::ShowTranscript,

        "new" | "n" => CommandResult::NewSession,

        "cancel" => CommandResult::Cancel,

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn required_path(args: &str, command: &str) -> Result<PathBuf, CommandResult> {
    if args.is_empty() {
        Err(CommandResult::Message(format!("Usage: /{} <path>", command)))
    } else {
        Ok(PathBuf::from(args))
    }
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?            Show this help message
  /assistant, /a [name]    List assistants or switch to one
  /upload, /u <path>       Attach a CSV, Excel, PDF or image file
  /save-json <path>        Save the last converted table as JSON
  /transcript, /t          Show the whole conversation
  /new, /n                 Start a fresh conversation
  /cancel                  Stop waiting for the current reply (or press Ctrl-C)
  /quit, /exit, /q         Exit

Examples:
  /assistant               List available assistants
  /assistant 3ps           Switch to the first assistant matching "3ps"
  /upload ~/grades.xlsx    Convert a spreadsheet and attach it to your next message"#
        .to_string()
}
