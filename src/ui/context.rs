//! UI context for detecting interactive vs CI environments

use std::io::IsTerminal;

const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "JENKINS_URL",
    "BUILDKITE",
    "TF_BUILD",
];

/// Decides how output is rendered
#[derive(Debug, Clone)]
pub struct UiContext {
    /// Stdout is a terminal outside CI
    interactive: bool,
    /// Machine-readable output requested; human output is suppressed
    quiet: bool,
}

impl UiContext {
    pub fn detect() -> Self {
        Self {
            interactive: Self::detect_interactive(),
            quiet: false,
        }
    }

    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            quiet: false,
        }
    }

    /// Suppress progress and step output, e.g. when printing JSON
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Progress bars and glyphs
    pub fn use_fancy_output(&self) -> bool {
        self.interactive && !self.quiet
    }

    fn detect_interactive() -> bool {
        std::io::stdout().is_terminal() && !CI_VARS.iter().any(|var| std::env::var(var).is_ok())
    }
}
