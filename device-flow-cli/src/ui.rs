//! Terminal display for device flow prompts.

use std::io::{self, BufRead, Write};

use oidc_device_flow::{FlowEvents, FlowFailure, FlowSuccess};
use serde::Serialize;
use tracing::warn;

use crate::config::{ConfigError, Prompter};

/// How the display interacts with the user.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayOptions {
    /// Skip the "press Enter" confirmation.
    pub assume_yes: bool,
    /// Print the verification URI instead of launching a browser.
    pub no_browser: bool,
}

/// Terminal-based display for the device flow.
///
/// Prompts and failures go to stderr; the token dump goes to stdout. The
/// Enter confirmation blocks in place, so a multi-threaded runtime is required.
pub struct TerminalDisplay {
    options: DisplayOptions,
}

impl TerminalDisplay {
    pub fn new(options: DisplayOptions) -> Self {
        Self { options }
    }

    fn wait_for_enter(&self) {
        if let Err(e) = read_confirmation(io::stdin().lock()) {
            warn!(error = %e, "Could not read confirmation from stdin");
        }
    }
}

/// Block until one line is read, letting the runtime move other tasks
/// (the Ctrl-C watcher) off this worker meanwhile.
fn read_confirmation<R: BufRead>(mut reader: R) -> io::Result<String> {
    tokio::task::block_in_place(|| {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        Ok(line)
    })
}

impl FlowEvents for TerminalDisplay {
    fn show_code(&self, user_code: &str, verification_uri: Option<&str>, expires_in: u64) {
        let confirm = !self.options.assume_yes && !self.options.no_browser;
        eprintln!();
        eprintln!("{}", code_prompt(user_code, expires_in, confirm));
        if let Some(uri) = verification_uri {
            eprintln!("You can also visit {} and enter the code by hand.", uri);
        }
        if confirm {
            self.wait_for_enter();
        }
    }

    fn open_browser(&self, uri: &str) {
        if self.options.no_browser {
            eprintln!("Open this URL to log in: {}", uri);
            return;
        }
        if let Err(e) = webbrowser::open(uri) {
            warn!(error = %e, "Failed to open browser");
            eprintln!("Could not open a browser. Open this URL to log in: {}", uri);
        }
    }

    fn pending_notice(&self) {
        println!("\n\nauthorization pending ...");
    }

    fn success(&self, result: &FlowSuccess) {
        println!("{}", render_success(result));
    }

    fn failure(&self, failure: &FlowFailure) {
        eprintln!("\n\n{}", failure_message(failure));
    }
}

/// Human-readable lifetime: whole minutes when evenly divisible, else seconds.
pub fn format_expiry(expires_in: u64) -> String {
    if expires_in % 60 == 0 {
        format!("{} minutes", expires_in / 60)
    } else {
        format!("{} seconds", expires_in)
    }
}

pub fn code_prompt(user_code: &str, expires_in: u64, confirm: bool) -> String {
    let code = format!(
        "You should see the following code: {}. It expires in {}.",
        user_code,
        format_expiry(expires_in)
    );
    if confirm {
        format!(
            "Press Enter to open the browser to log in, or Ctrl-C to abort. {}",
            code
        )
    } else {
        code
    }
}

pub fn failure_message(failure: &FlowFailure) -> String {
    match failure {
        FlowFailure::Denied => "cancelled interaction".to_string(),
        FlowFailure::Expired => "device flow expired".to_string(),
        FlowFailure::Protocol { code, description } => format!(
            "error = {}; error_description = {}",
            code,
            description.as_deref().unwrap_or("")
        ),
    }
}

pub fn render_success(result: &FlowSuccess) -> String {
    let claims = match &result.claims {
        Some(claims) => pretty(claims),
        None => "none (no ID token issued)".to_string(),
    };
    let userinfo = match &result.userinfo {
        Some(userinfo) => pretty(userinfo),
        None => "unavailable".to_string(),
    };
    format!(
        "\n\nresult tokens {}\n\nID Token Claims {}\n\nUserInfo response {}",
        pretty(&result.tokens),
        claims,
        userinfo
    )
}

fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unprintable: {}>", e))
}

/// Reads answers line by line from stdin.
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn ask(&self, question: &str, initial: Option<&str>) -> Result<String, ConfigError> {
        match initial {
            Some(initial) => eprint!("{} [{}] ", question, initial),
            None => eprint!("{} ", question),
        }
        io::stderr().flush().map_err(ConfigError::Prompt)?;

        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(ConfigError::Prompt)?;

        let answer = line.trim();
        if answer.is_empty() {
            Ok(initial.unwrap_or_default().to_string())
        } else {
            Ok(answer.to_string())
        }
    }
}
