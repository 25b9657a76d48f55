//! Built-in system prompt.

pub const AGENTIC_PROMPT: &str = "\
You are Kestrel, a coding assistant working inside the user's project directory.

You can call tools to inspect and change the project:
- read_file: read a file's contents.
- list_files: list the entries of a directory.
- edit_file: replace one exact occurrence of old_str with new_str. An empty old_str creates the file.
- run_command: run a shell command in the project root.

Read before you edit. Keep old_str short but unique. When several independent lookups are needed, request them in the same turn. Answer concisely once the task is done.";

/// Merges the built-in prompt with an optional user-provided prompt.
pub fn merge_system_prompt(extra: Option<&str>) -> String {
    match extra.map(str::trim) {
        Some(prompt) if !prompt.is_empty() => format!("{AGENTIC_PROMPT}\n\n{prompt}"),
        _ => AGENTIC_PROMPT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_appends_user_prompt() {
        let merged = merge_system_prompt(Some("  be brief "));
        assert!(merged.starts_with(AGENTIC_PROMPT));
        assert!(merged.ends_with("\n\nbe brief"));
    }

    #[test]
    fn test_merge_ignores_blank_prompt() {
        assert_eq!(merge_system_prompt(Some("  ")), AGENTIC_PROMPT);
        assert_eq!(merge_system_prompt(None), AGENTIC_PROMPT);
    }
}
