//! Permission prompt handling for user interaction
//!
//! Provides trait-based prompt handling so embedders can swap the terminal
//! prompt for their own UI.

use permit_api::{Decision, PermissionRequest, PermissionState};
use serde::Serialize;
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Error type for prompt operations
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Non-interactive environment")]
    NonInteractive,

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Timeout waiting for user response")]
    Timeout,
}

/// What the user is being asked about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptRequest {
    pub request: PermissionRequest,
    /// Human-readable description, e.g. `network access to "0.0.0.0:8000"`
    pub description: String,
}

impl PromptRequest {
    pub fn new(request: PermissionRequest) -> Self {
        let description = request.describe();
        Self {
            request,
            description,
        }
    }
}

/// Answer to a permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptAnswer {
    /// Allow this request only
    AllowOnce,
    /// Allow this key for the rest of the run
    AllowAlways,
    /// Deny this request only
    #[default]
    DenyOnce,
    /// Deny this key for the rest of the run
    DenyAlways,
}

impl PromptAnswer {
    /// Decision for the request that triggered the prompt
    pub fn decision(&self) -> Decision {
        if self.is_allowed() {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }

    /// State to cache for the key, if the answer persists
    pub fn persisted_state(&self) -> Option<PermissionState> {
        match self {
            Self::AllowAlways => Some(PermissionState::Granted),
            Self::DenyAlways => Some(PermissionState::Denied),
            Self::AllowOnce | Self::DenyOnce => None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::AllowOnce | Self::AllowAlways)
    }

    /// Parse a typed answer; anything unrecognised is `DenyOnce`
    pub fn parse(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "y" | "yes" => Self::AllowOnce,
            "a" | "always" => Self::AllowAlways,
            "d" | "never" => Self::DenyAlways,
            _ => Self::DenyOnce,
        }
    }
}

/// Trait for handling permission prompts
///
/// The broker calls `prompt` at most once at a time; implementations do not
/// need their own serialization.
///
/// # Example
///
/// ```rust
/// use permit_broker::permission::{PromptAnswer, PromptError, PromptHandler, PromptRequest};
///
/// struct DialogPromptHandler;
///
/// impl PromptHandler for DialogPromptHandler {
///     fn prompt(&self, request: &PromptRequest) -> Result<PromptAnswer, PromptError> {
///         // Show a dialog describing `request.description`
///         let _ = request;
///         Ok(PromptAnswer::AllowOnce)
///     }
///
///     fn is_interactive(&self) -> bool {
///         true
///     }
/// }
/// ```
pub trait PromptHandler: Send + Sync {
    /// Present a permission prompt and return the user's answer
    fn prompt(&self, request: &PromptRequest) -> Result<PromptAnswer, PromptError>;

    /// Whether a prompt channel is currently available
    fn is_interactive(&self) -> bool;
}

// ============================================================================
// Terminal Prompt Handler
// ============================================================================

/// Lines from one input, read by a single long-lived thread
///
/// Lines that arrive while no prompt is waiting are discarded before the
/// next prompt, so a late answer never answers a different question.
#[derive(Debug)]
struct LineReader {
    lines: Mutex<mpsc::Receiver<io::Result<String>>>,
}

impl LineReader {
    fn spawn<R: BufRead + Send + 'static>(mut reader: R) -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        });
        Self {
            lines: Mutex::new(rx),
        }
    }

    /// Wait for the next fresh line; end of input reads as an empty line
    fn next_line(&self, timeout: Option<Duration>) -> Result<String, PromptError> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        while lines.try_recv().is_ok() {}

        let received = match timeout {
            Some(timeout) => match lines.recv_timeout(timeout) {
                Ok(line) => line,
                Err(mpsc::RecvTimeoutError::Timeout) => return Err(PromptError::Timeout),
                Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(String::new()),
            },
            None => match lines.recv() {
                Ok(line) => line,
                Err(_) => return Ok(String::new()),
            },
        };
        Ok(received?)
    }
}

/// Terminal-based prompt handler
///
/// Writes the prompt to stderr and reads one line from stdin.
#[derive(Debug)]
pub struct TerminalPromptHandler {
    timeout: Option<Duration>,
    input: OnceLock<LineReader>,
    /// Only prompt when stdin and stderr are a terminal
    require_tty: bool,
}

impl Default for TerminalPromptHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalPromptHandler {
    pub fn new() -> Self {
        Self {
            timeout: None,
            input: OnceLock::new(),
            require_tty: true,
        }
    }

    /// Give up (and deny) when no answer arrives within `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::new()
        }
    }

    /// Read answers from `reader` instead of stdin
    ///
    /// No terminal is required; the prompt text still goes to stderr.
    pub fn with_reader<R: BufRead + Send + 'static>(reader: R, timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            input: OnceLock::from(LineReader::spawn(reader)),
            require_tty: false,
        }
    }

    fn format_prompt(request: &PromptRequest) -> String {
        format!(
            "permit: script requests {}.\n  (rerun with --allow-{} to skip this prompt)\nAllow? [y]es / [a]lways / [n]o / [d]eny always: ",
            request.description,
            request.request.kind.flag_name()
        )
    }

    fn read_answer(&self) -> Result<String, PromptError> {
        self.input
            .get_or_init(|| LineReader::spawn(io::BufReader::new(io::stdin())))
            .next_line(self.timeout)
    }

    fn has_channel(&self) -> bool {
        !self.require_tty || atty_check()
    }
}

impl PromptHandler for TerminalPromptHandler {
    fn prompt(&self, request: &PromptRequest) -> Result<PromptAnswer, PromptError> {
        if !self.has_channel() {
            return Err(PromptError::NonInteractive);
        }

        let mut stderr = io::stderr();
        writeln!(stderr)?;
        write!(stderr, "{}", Self::format_prompt(request))?;
        stderr.flush()?;

        let answer = PromptAnswer::parse(&self.read_answer()?);
        let verdict = match answer {
            PromptAnswer::AllowOnce => "Granted once",
            PromptAnswer::AllowAlways => "Granted for this run",
            PromptAnswer::DenyOnce => "Denied once",
            PromptAnswer::DenyAlways => "Denied for this run",
        };
        writeln!(stderr, "{} {}.", verdict, request.description)?;
        Ok(answer)
    }

    fn is_interactive(&self) -> bool {
        self.has_channel()
    }
}

// ============================================================================
// Auto Handler
// ============================================================================

/// Handler that answers every prompt with a fixed response
#[derive(Debug)]
pub struct AutoPromptHandler {
    answer: PromptAnswer,
}

impl AutoPromptHandler {
    /// Allow every prompted key for the rest of the run
    pub fn always_allow() -> Self {
        Self {
            answer: PromptAnswer::AllowAlways,
        }
    }

    /// Deny every prompted key for the rest of the run
    pub fn always_deny() -> Self {
        Self {
            answer: PromptAnswer::DenyAlways,
        }
    }

    pub fn with_answer(answer: PromptAnswer) -> Self {
        Self { answer }
    }
}

impl PromptHandler for AutoPromptHandler {
    fn prompt(&self, _request: &PromptRequest) -> Result<PromptAnswer, PromptError> {
        Ok(self.answer)
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

// ============================================================================
// Scripted Handler (for testing)
// ============================================================================

/// Handler that plays back queued answers and records every prompt shown
///
/// Once the queue is empty every prompt is answered `DenyOnce`.
#[derive(Debug)]
pub struct ScriptedPromptHandler {
    answers: Mutex<VecDeque<PromptAnswer>>,
    prompts: Mutex<Vec<PromptRequest>>,
    delay: Option<Duration>,
    interactive: bool,
}

impl ScriptedPromptHandler {
    pub fn new(answers: impl IntoIterator<Item = PromptAnswer>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
            interactive: true,
        }
    }

    /// Sleep before answering, to hold a prompt open
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report no prompt channel
    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    /// Prompts presented so far
    pub fn prompts(&self) -> Vec<PromptRequest> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl PromptHandler for ScriptedPromptHandler {
    fn prompt(&self, request: &PromptRequest) -> Result<PromptAnswer, PromptError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        Ok(self
            .answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default())
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Check if stdin and stderr are connected to a terminal
fn atty_check() -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: isatty is safe to call with any file descriptor
        unsafe {
            libc::isatty(io::stdin().as_raw_fd()) != 0
                && libc::isatty(io::stderr().as_raw_fd()) != 0
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::System::Console::{GetConsoleMode, CONSOLE_MODE};
        let console = |handle: std::os::windows::io::RawHandle| {
            let mut mode: CONSOLE_MODE = 0;
            // SAFETY: GetConsoleMode is safe with valid handle
            unsafe { GetConsoleMode(handle as _, &mut mode) != 0 }
        };
        console(io::stdin().as_raw_handle()) && console(io::stderr().as_raw_handle())
    }

    #[cfg(not(any(unix, windows)))]
    {
        false
    }
}
