use async_trait::async_trait;
use log::info;

/// Dialogs the session needs from whatever front end hosts it.
#[async_trait]
pub trait UserPrompt: Send + Sync {
    /// Shows a message; resolves once it has been shown.
    async fn alert(&self, message: &str);

    /// Asks a yes/no question.
    async fn confirm(&self, message: &str) -> bool;
}

/// Headless prompt: alerts go to the log and every question is answered yes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPrompt;

#[async_trait]
impl UserPrompt for LogPrompt {
    async fn alert(&self, message: &str) {
        info!("[alert] {message}");
    }

    async fn confirm(&self, message: &str) -> bool {
        info!("[confirm] {message} -> yes");
        true
    }
}
