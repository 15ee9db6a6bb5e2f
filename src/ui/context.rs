//! Output mode detection
//!
//! keel runs from an operator's terminal, from the `post-receive` hook and
//! from CI. Only the terminal gets colors and symbols. Git relays hook output
//! to the pusher as `remote:` lines, where escape codes show up as garbage.
//! A push over a local path can hand the hook the pusher's terminal, so a
//! TTY alone does not mean interactive.

use std::io::IsTerminal;

/// Set by the installed hook. The hook unsets `GIT_DIR` before calling keel,
/// so git's own variables cannot be relied on there.
pub const HOOK_ENV: &str = "KEEL_HOOK";

/// Variables that mark a run started by git or a hand-written hook
const HOOK_VARS: &[&str] = &[HOOK_ENV, "GIT_DIR"];

const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "JENKINS_URL",
    "BUILDKITE",
];

/// Decides how much decoration output gets
#[derive(Debug, Clone)]
pub struct UiContext {
    interactive: bool,
}

impl UiContext {
    pub fn detect() -> Self {
        Self {
            interactive: interactive_for(std::io::stdout().is_terminal(), |var| {
                std::env::var_os(var).is_some()
            }),
        }
    }

    pub fn non_interactive() -> Self {
        Self { interactive: false }
    }

    /// Colors and status symbols
    ///
    /// Off in hooks and CI, where lines are read as plain text in push
    /// output or logs.
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }
}

/// A TTY on stdout with no hook or CI marker set
fn interactive_for(stdout_tty: bool, is_set: impl Fn(&str) -> bool) -> bool {
    stdout_tty && !HOOK_VARS.iter().chain(CI_VARS).any(|var| is_set(var))
}
