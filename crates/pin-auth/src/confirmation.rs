//! User confirmation of a displayed PIN.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::{AuthError, AuthResult, PinPrompt};

/// Waits for the user to register the PIN out of band.
///
/// Implementations show `prompt` and resolve once the user says they are done.
/// Returning an error aborts the authorization. The session manager bounds the
/// wait by the PIN lifetime.
#[async_trait]
pub trait UserConfirmation: Send + Sync {
    async fn confirm(&self, prompt: &PinPrompt) -> AuthResult<()>;
}

/// Confirmation driven by a oneshot channel.
///
/// Sending `true` confirms, `false` aborts. Dropping the sender aborts too.
pub struct ChannelConfirmation {
    receiver: tokio::sync::Mutex<Option<oneshot::Receiver<bool>>>,
    prompts: tokio::sync::Mutex<Vec<PinPrompt>>,
}

impl ChannelConfirmation {
    pub fn new() -> (oneshot::Sender<bool>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                receiver: tokio::sync::Mutex::new(Some(rx)),
                prompts: tokio::sync::Mutex::new(Vec::new()),
            },
        )
    }

    /// Prompts shown so far.
    pub async fn prompts(&self) -> Vec<PinPrompt> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl UserConfirmation for ChannelConfirmation {
    async fn confirm(&self, prompt: &PinPrompt) -> AuthResult<()> {
        self.prompts.lock().await.push(prompt.clone());

        let receiver = self.receiver.lock().await.take().ok_or_else(|| {
            AuthError::ConfirmationAborted("confirmation channel already used".to_string())
        })?;

        match receiver.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AuthError::ConfirmationAborted(
                "declined by user".to_string(),
            )),
            Err(_) => Err(AuthError::ConfirmationAborted(
                "confirmation channel closed".to_string(),
            )),
        }
    }
}
