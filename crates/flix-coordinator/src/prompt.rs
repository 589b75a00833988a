use crate::abort::AbortSignal;
use crate::playback::ReplayPrompt;
use crate::selection::{Candidate, Chooser};
use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};

/// Asks on stderr, reads answers from stdin. A raised abort ends any
/// pending question as a refusal.
pub struct TerminalPrompt {
    abort: AbortSignal,
    poll: Duration,
}

impl TerminalPrompt {
    pub fn new(abort: AbortSignal) -> Self {
        Self {
            abort,
            poll: Duration::from_millis(100),
        }
    }

    fn ask(&self, question: &str) -> Option<String> {
        let mut stderr = io::stderr();
        let _ = write!(stderr, "{question}");
        let _ = stderr.flush();
        read_line_until_abort(read_stdin_line, &self.abort, self.poll)
    }
}

impl Chooser for TerminalPrompt {
    fn choose(&self, candidates: &[Candidate]) -> Option<usize> {
        for (index, candidate) in candidates.iter().enumerate() {
            eprintln!("{:>3}) {}", index + 1, candidate.display_label());
        }
        let answer = self.ask("select a source (empty to cancel): ")?;
        parse_choice(&answer, candidates.len())
    }
}

impl ReplayPrompt for TerminalPrompt {
    fn confirm(&self, identity: &str, path: &str) -> bool {
        self.ask(&format!(
            "{identity} was last played from {path}. Play it again? [y/N] "
        ))
        .is_some_and(|answer| is_yes(&answer))
    }
}

fn read_stdin_line() -> Option<String> {
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

fn parse_choice(answer: &str, count: usize) -> Option<usize> {
    let picked = answer.trim().parse::<usize>().ok()?;
    (1..=count).contains(&picked).then(|| picked - 1)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Runs `read` on its own thread and waits for its line, giving up once
/// `abort` is raised. An abandoned reader stays blocked until it returns.
pub fn read_line_until_abort<F>(read: F, abort: &AbortSignal, poll: Duration) -> Option<String>
where
    F: FnOnce() -> Option<String> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("flix-prompt".to_string())
        .spawn(move || {
            let _ = tx.send(read());
        });
    if let Err(err) = spawned {
        warn!(event = "prompt_thread_failed", error = %err);
        return None;
    }

    let wait = || loop {
        if abort.is_aborted() {
            debug!(event = "prompt_aborted");
            return None;
        }
        match rx.recv_timeout(poll) {
            Ok(line) => return line,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => return None,
        }
    };

    // block_in_place panics on a current-thread runtime.
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(wait)
        }
        _ => wait(),
    }
}
