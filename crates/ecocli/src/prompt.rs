//! Terminal confirmation for the PIN step.

use async_trait::async_trait;
use pin_auth::{AuthError, AuthResult, PinPrompt, UserConfirmation};
use std::io::{self, BufRead, Write};

/// Shows the PIN and waits for Enter on stdin.
pub struct StdinConfirmation;

#[async_trait]
impl UserConfirmation for StdinConfirmation {
    async fn confirm(&self, prompt: &PinPrompt) -> AuthResult<()> {
        let instructions = prompt.instructions.clone();
        let expires_at = prompt.expires_at;

        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut stderr = io::stderr();
            writeln!(stderr)?;
            writeln!(stderr, "{}", instructions)?;
            writeln!(
                stderr,
                "The PIN expires at {}.",
                expires_at.format("%H:%M:%S UTC")
            )?;
            write!(stderr, "Press Enter once the application has been authorized... ")?;
            stderr.flush()?;

            let mut line = String::new();
            let read = io::stdin().lock().read_line(&mut line)?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stdin closed",
                ));
            }
            Ok(())
        })
        .await
        .map_err(|e| AuthError::ConfirmationAborted(e.to_string()))?
        .map_err(|e| AuthError::ConfirmationAborted(e.to_string()))
    }
}
