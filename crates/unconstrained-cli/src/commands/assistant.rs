//! /assistant command - list and switch assistant presets

use super::CommandResult;
use unconstrained_chat::AssistantPreset;

pub struct AssistantCommand;

impl AssistantCommand {
    /// Execute /assistant command - lists presets if no args, or switches
    pub fn execute(args: &str) -> CommandResult {
        if args.is_empty() {
            CommandResult::ListAssistants
        } else {
            CommandResult::SelectAssistant(args.to_string())
        }
    }

    /// List presets as text, marking the current one
    pub fn list_text(presets: &[AssistantPreset], current: Option<&str>) -> String {
        if presets.is_empty() {
            return "No assistants configured".to_string();
        }

        let mut output = String::from("Available assistants:\n");
        for preset in presets {
            let marker = if current == Some(preset.name.as_str()) {
                " *"
            } else {
                ""
            };
            let missing = if preset.resolve_id().is_err() {
                " (no id configured)"
            } else {
                ""
            };
            output.push_str(&format!("  {}{}{}\n", preset.name, marker, missing));
        }

        output.push_str("\nSwitch with: /assistant <name>");
        output
    }

    /// Find a preset by exact name, then by prefix
    pub fn find<'a>(query: &str, presets: &'a [AssistantPreset]) -> Option<&'a AssistantPreset> {
        let query_lower = query.to_lowercase();

        presets
            .iter()
            .find(|p| p.name.to_lowercase() == query_lower)
            .or_else(|| {
                presets
                    .iter()
                    .find(|p| p.name.to_lowercase().starts_with(&query_lower))
            })
    }
}
