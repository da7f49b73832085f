use async_trait::async_trait;
use step_sync::milestones::Notifier;

/// Prints notifications to the terminal.
pub struct ConsoleNotifier {
    pub enabled: bool,
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn notifications_enabled(&self) -> bool {
        self.enabled
    }

    async fn notify(&self, server: &str, message: &str) {
        log::info!("Notification for {server}: {message}");
        println!("🔔 {server}: {message}");
    }
}
