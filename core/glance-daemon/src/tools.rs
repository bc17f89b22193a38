//! Tool name → status and label mapping for pre/post tool events.

use glance_protocol::HookData;
use std::path::Path;

use crate::session::SessionStatus;

const COMMAND_PREVIEW_CHARS: usize = 40;

pub fn status_for_tool(tool: &str) -> SessionStatus {
    match tool {
        "Read" | "Glob" | "Grep" | "WebFetch" | "WebSearch" => SessionStatus::Reading,
        "Write" | "Edit" | "NotebookEdit" => SessionStatus::Writing,
        _ => SessionStatus::Thinking,
    }
}

/// Human-readable phrase for what the tool is doing.
pub fn action_label(tool: &str, data: &HookData) -> String {
    let label = match tool {
        "Read" => "Reading file",
        "Write" => "Writing file",
        "Edit" => "Editing file",
        "Bash" => match data.input_str("description") {
            Some(description) if !description.is_empty() => return description.to_string(),
            _ => "Running command",
        },
        "Glob" => "Searching files",
        "Grep" => "Searching content",
        "Task" => match data.input_str("subagent_type") {
            Some(subtype) => return format!("Agent: {}", subtype),
            None => "Spawning agent",
        },
        "WebFetch" => "Fetching web",
        "WebSearch" => "Searching web",
        "TodoWrite" => "Updating todos",
        "NotebookEdit" => "Editing notebook",
        other => other,
    };
    label.to_string()
}

/// Short detail shown next to the action: file name, command preview,
/// search pattern or sub-agent name.
pub fn metadata_label(tool: &str, data: &HookData) -> String {
    let detail = match tool {
        "Read" | "Write" | "Edit" => data.input_str("file_path").map(file_name),
        "Bash" => data.input_str("command").map(truncate_command),
        "Glob" | "Grep" => data.input_str("pattern").map(str::to_string),
        "Task" => data.input_str("subagent_type").map(str::to_string),
        _ => None,
    };
    detail.unwrap_or_default()
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn truncate_command(command: &str) -> String {
    if command.chars().count() <= COMMAND_PREVIEW_CHARS {
        return command.to_string();
    }
    let preview: String = command.chars().take(COMMAND_PREVIEW_CHARS).collect();
    format!("{}...", preview)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glance_protocol::{ToolInput, ToolInputValue};

    fn data_with(pairs: &[(&str, &str)]) -> HookData {
        let input: ToolInput = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), ToolInputValue::String(value.to_string())))
            .collect();
        HookData {
            tool_input: Some(input),
            ..HookData::default()
        }
    }

    #[test]
    fn maps_tools_to_status() {
        assert_eq!(status_for_tool("Grep"), SessionStatus::Reading);
        assert_eq!(status_for_tool("WebSearch"), SessionStatus::Reading);
        assert_eq!(status_for_tool("NotebookEdit"), SessionStatus::Writing);
        assert_eq!(status_for_tool("Bash"), SessionStatus::Thinking);
        assert_eq!(status_for_tool("mcp__custom__tool"), SessionStatus::Thinking);
    }

    #[test]
    fn bash_prefers_description_for_action() {
        let data = data_with(&[("command", "npm test"), ("description", "Run tests")]);
        assert_eq!(action_label("Bash", &data), "Run tests");
        assert_eq!(action_label("Bash", &HookData::default()), "Running command");
    }

    #[test]
    fn task_uses_subagent_name() {
        let data = data_with(&[("subagent_type", "code-reviewer")]);
        assert_eq!(action_label("Task", &data), "Agent: code-reviewer");
        assert_eq!(metadata_label("Task", &data), "code-reviewer");
        assert_eq!(action_label("Task", &HookData::default()), "Spawning agent");
    }

    #[test]
    fn unknown_tool_uses_its_own_name() {
        assert_eq!(action_label("LSP", &HookData::default()), "LSP");
        assert_eq!(metadata_label("LSP", &HookData::default()), "");
    }

    #[test]
    fn file_tools_show_file_name() {
        let data = data_with(&[("file_path", "/repo/src/session.rs")]);
        assert_eq!(metadata_label("Edit", &data), "session.rs");
    }

    #[test]
    fn long_commands_are_truncated() {
        let long = "cargo test --workspace --all-features -- --nocapture --test-threads=1";
        let data = data_with(&[("command", long)]);
        let label = metadata_label("Bash", &data);
        assert!(label.ends_with("..."));
        assert_eq!(label.chars().count(), COMMAND_PREVIEW_CHARS + 3);

        let short = data_with(&[("command", "npm test")]);
        assert_eq!(metadata_label("Bash", &short), "npm test");
    }

    #[test]
    fn search_tools_show_pattern() {
        let data = data_with(&[("pattern", "**/*.rs")]);
        assert_eq!(metadata_label("Glob", &data), "**/*.rs");
        assert_eq!(metadata_label("Grep", &data), "**/*.rs");
    }
}
