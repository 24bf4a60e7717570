use log::{error, info};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::path::PathBuf;
use tokio::process::Command;

/// Best-effort delivery of user facing notifications
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait Notifier {
    fn notify(&self, title: &str, body: &str);
}

/// Notifier that only writes to the process log
#[derive(Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!("notification: {title}: {body}");
    }
}

/// Notifier running an external program with title and body as arguments
///
/// The program is spawned and not awaited; e.g. `notify-send` on Linux
/// desktops.
#[derive(Clone)]
pub struct CommandNotifier {
    program: PathBuf,
}

impl CommandNotifier {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!("notification: {title}: {body}");

        match Command::new(&self.program)
            .arg(title)
            .arg(body)
            .spawn()
        {
            Ok(mut child) => {
                tokio::spawn(async move {
                    if let Err(e) = child.wait().await {
                        error!("notification command failed: {e}");
                    }
                });
            }
            Err(e) => error!("failed to spawn notification command {:?}: {e}", self.program),
        }
    }
}
