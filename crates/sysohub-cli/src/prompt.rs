//! Interactive confirmation on the controlling terminal

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use tracing::warn;

use sysohub_core::{ConfirmationStrategy, SubsystemKind};

/// Asks on stdout and reads the answer from stdin; anything but yes is no
#[derive(Debug, Clone, Copy, Default)]
pub struct InteractivePrompt;

#[async_trait]
impl ConfirmationStrategy for InteractivePrompt {
    async fn confirm(&self, subsystem: SubsystemKind, question: &str) -> bool {
        let prompt = format!("[{subsystem}] {question} [y/N] ");
        match tokio::task::spawn_blocking(move || ask(&prompt)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                warn!(error = %e, "cannot read answer, assuming no");
                false
            }
            Err(e) => {
                warn!(error = %e, "prompt task failed, assuming no");
                false
            }
        }
    }
}

/// Ask a yes/no question outside the reconciler (e.g. before purge)
pub fn ask(prompt: &str) -> io::Result<bool> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(prompt.as_bytes())?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(is_yes(&line))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
