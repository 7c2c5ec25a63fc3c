//! Shell command plumbing shared by executors, the publisher and the deploy
//! session

use serde::{Deserialize, Serialize};
use sluice_core::domain::log::LogEntry;

/// Variables carrying secret values; only injected into steps that need them
pub const SECRET_VARS: [&str; 3] = ["REGISTRY_USERNAME", "REGISTRY_TOKEN", "SSH_PRIVATE_KEY"];

/// Captured output of one command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn from_output(output: &std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        }
    }

    /// Output lines as log entries: stdout at info, stderr at warning
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(LogEntry::info)
            .chain(
                self.stderr
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(LogEntry::warning),
            )
            .collect()
    }
}

/// Quotes a word for a POSIX shell
pub fn quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@=+,%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Quotes a path, leaving a leading `~/` unquoted so the remote shell
/// still expands it
pub fn quote_path(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) if rest.is_empty() => "~".to_string(),
        Some(rest) => format!("~/{}", quote(rest)),
        None if path == "~" => "~".to_string(),
        None => quote(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("main"), "main");
        assert_eq!(quote("git@github.com:acme/app.git"), "git@github.com:acme/app.git");
        assert_eq!(quote("two words"), "'two words'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn test_quote_path_keeps_home_expansion() {
        assert_eq!(quote_path("~/app"), "~/app");
        assert_eq!(quote_path("~/my app"), "~/'my app'");
        assert_eq!(quote_path("~"), "~");
        assert_eq!(quote_path("/srv/app"), "/srv/app");
    }

    #[test]
    fn test_log_entries_split_streams() {
        let output = CommandOutput {
            stdout: "one\n\ntwo\n".to_string(),
            stderr: "warn\n".to_string(),
            exit_code: 0,
        };
        let entries = output.log_entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].message, "warn");
    }
}
