//! Timed operator prompts.
//!
//! A prompt blocks the single execution thread for at most its timeout and
//! always yields a value: a timeout, end of input or an empty line all
//! resolve to the caller's default. Timing out is normal flow, not an error.
//!
//! `TerminalPrompter` reads stdin without buffering so that each call is
//! independent of earlier ones (no read-ahead is carried between prompts).
//! `ScriptedPrompter` answers from a queue and is what tests use to drive the
//! non-interactive path deterministically.

use crossterm::style::Stylize;
use crossterm::tty::IsTty;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest single `poll` slice in milliseconds.
const POLL_SLICE_MS: u16 = 500;

/// Wait used when `now + timeout` is not representable.
const FALLBACK_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Source of operator input.
pub trait Prompter {
    /// Ask `prompt`, waiting at most `timeout`; returns `default` on timeout
    /// or empty input. Answers are never logged (prompts may ask for keys).
    fn ask(&self, prompt: &str, default: &str, timeout: Duration) -> String;
}

/// Reads answers from the controlling terminal (or whatever stdin is).
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter {
    non_interactive: bool,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every prompt resolves to its default without reading stdin.
    pub fn non_interactive() -> Self {
        Self {
            non_interactive: true,
        }
    }
}

impl Prompter for TerminalPrompter {
    fn ask(&self, prompt: &str, default: &str, timeout: Duration) -> String {
        if self.non_interactive || timeout.is_zero() {
            debug!(prompt, "non-interactive, using default");
            return default.to_string();
        }

        let shown_default = if default.is_empty() { "none" } else { default };
        let mut stderr = std::io::stderr();
        let text = format!(
            "{} [{}] ({}s): ",
            prompt,
            shown_default,
            timeout.as_secs()
        );
        let _ = if stderr.is_tty() {
            write!(stderr, "{}", text.bold())
        } else {
            write!(stderr, "{}", text)
        };
        let _ = stderr.flush();

        match read_line_with_timeout(timeout) {
            Some(line) if !line.trim().is_empty() => line.trim().to_string(),
            Some(_) => default.to_string(),
            None => {
                let _ = writeln!(stderr);
                info!(prompt, "no answer within {}s, using default", timeout.as_secs());
                default.to_string()
            }
        }
    }
}

/// Read one line from stdin, giving up at `timeout`.
///
/// `Some(line)` for a complete line or a partial line cut by end of input,
/// `None` on timeout or when stdin is unusable.
fn read_line_with_timeout(timeout: Duration) -> Option<String> {
    // A dup'd descriptor wrapped in a File reads unbuffered
    let owned = match std::io::stdin().as_fd().try_clone_to_owned() {
        Ok(fd) => fd,
        Err(e) => {
            warn!(error = %e, "cannot read stdin, using default");
            return None;
        }
    };
    let mut input = File::from(owned);

    let deadline = deadline_after(Instant::now(), timeout);
    let mut line = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let slice_ms = remaining.as_millis().min(u128::from(POLL_SLICE_MS)) as u16;

        let mut fds = [PollFd::new(input.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(slice_ms.max(1))) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                warn!(error = %e, "poll on stdin failed, using default");
                return None;
            }
        }

        let mut byte = [0u8; 1];
        match input.read(&mut byte) {
            Ok(0) => {
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
            Ok(_) if byte[0] == b'\n' => {
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
            Ok(_) => line.push(byte[0]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "read from stdin failed, using default");
                return None;
            }
        }
    }
}

fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FALLBACK_WAIT))
        .unwrap_or(now)
}

/// Answers prompts from a fixed script.
///
/// Each queued `Some(answer)` is returned verbatim (empty answers fall back
/// to the default); `None` simulates a timeout. Once the queue is empty every
/// prompt times out. Asked prompts are recorded for assertions.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: RefCell<VecDeque<Option<String>>>,
    asked: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    /// A prompter on which every prompt times out.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            answers: RefCell::new(answers.into_iter().map(|a| a.map(Into::into)).collect()),
            asked: RefCell::new(Vec::new()),
        }
    }

    /// Prompts asked so far, in order.
    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&self, prompt: &str, default: &str, _timeout: Duration) -> String {
        self.asked.borrow_mut().push(prompt.to_string());
        match self.answers.borrow_mut().pop_front().flatten() {
            Some(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
            _ => default.to_string(),
        }
    }
}
