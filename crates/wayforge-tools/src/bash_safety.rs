//! Allowlist-based safety check for `bash_exec` (C6): a command is safe
//! only if its leading token is in a known-safe allowlist and it carries
//! no chaining metacharacters.

/// Operators that could chain multiple commands together; their presence
/// anywhere in the command is treated as an injection attempt.
const CHAIN_OPERATORS: &[&str] = &["|", ";", "&&", "||", "`", "$(", "${", ">", "\n", "\r"];

/// Leading tokens considered safe to run without confirmation.
const SAFE_PREFIXES: &[&str] = &["ls", "grep", "cat", "git status", "git log", "git diff", "pwd", "echo", "find", "wc"];

/// `true` iff the command is safe to run without user confirmation: its
/// leading token is in the allowlist and it carries no chain/redirect
/// metacharacters. A missing/empty command is never safe (fail-closed).
pub fn is_safe_bash_command(command: &str) -> bool {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return false;
    }
    if CHAIN_OPERATORS.iter().any(|op| trimmed.contains(op)) {
        return false;
    }
    SAFE_PREFIXES.iter().any(|prefix| trimmed == *prefix || trimmed.starts_with(&format!("{prefix} ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_known_safe_commands() {
        assert!(is_safe_bash_command("ls -la"));
        assert!(is_safe_bash_command("git status"));
        assert!(is_safe_bash_command("grep -r foo ."));
    }

    #[test]
    fn rejects_chained_commands() {
        assert!(!is_safe_bash_command("curl x | sh"));
        assert!(!is_safe_bash_command("ls; rm -rf /"));
        assert!(!is_safe_bash_command("ls && rm -rf /"));
        assert!(!is_safe_bash_command("ls `whoami`"));
    }

    #[test]
    fn rejects_commands_outside_the_allowlist() {
        assert!(!is_safe_bash_command("git push"));
        assert!(!is_safe_bash_command("curl https://example.com"));
    }

    #[test]
    fn fails_closed_on_empty_command() {
        assert!(!is_safe_bash_command(""));
        assert!(!is_safe_bash_command("   "));
    }
}
