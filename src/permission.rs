//! Notification permission gate.
//!
//! The gate mirrors a platform-level "may this app notify the user" permission.
//! It starts from whatever the platform reports, moves out of `Undetermined` only
//! through an explicit, user-initiated request, and publishes every change on a
//! `watch` channel so the dispatch loop can follow it.
//!
//! For the CLI the "platform" is [`FilePermissionProvider`]: the decision lives in
//! `permissions.json` in the data directory and a request asks on the terminal.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{Result, TaskError};

/// Whether dispatched reminders may be shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    #[default]
    Undetermined,
    Granted,
    Denied,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PermissionState::Undetermined => "undetermined",
            PermissionState::Granted => "granted",
            PermissionState::Denied => "denied",
        })
    }
}

/// The underlying platform permission.
pub trait PermissionProvider: Send + Sync {
    /// Current platform value, without prompting.
    fn query(&self) -> Result<PermissionState>;

    /// Ask the user. Only called while the gate is `Undetermined`.
    fn request(&self) -> Result<PermissionState>;
}

/// Tracks the notification permission and publishes changes.
pub struct PermissionGate {
    provider: Arc<dyn PermissionProvider>,
    state_tx: watch::Sender<PermissionState>,
}

impl PermissionGate {
    /// Build a gate seeded from the provider's current value.
    pub fn new(provider: Arc<dyn PermissionProvider>) -> Result<Self> {
        let initial = provider.query()?;
        info!(state = %initial, "notification permission loaded");
        let (state_tx, _) = watch::channel(initial);
        Ok(PermissionGate { provider, state_tx })
    }

    pub fn state(&self) -> PermissionState {
        *self.state_tx.borrow()
    }

    pub fn is_granted(&self) -> bool {
        self.state() == PermissionState::Granted
    }

    pub fn subscribe(&self) -> watch::Receiver<PermissionState> {
        self.state_tx.subscribe()
    }

    /// User-initiated grant request. A decided gate is returned as is, without prompting.
    pub fn request(&self) -> Result<PermissionState> {
        let current = self.state();
        if current != PermissionState::Undetermined {
            return Ok(current);
        }
        let decided = self.provider.request()?;
        self.publish(decided);
        Ok(decided)
    }

    /// Re-read the platform value; the user may have changed it elsewhere.
    pub fn refresh(&self) -> Result<PermissionState> {
        let latest = self.provider.query()?;
        self.publish(latest);
        Ok(latest)
    }

    fn publish(&self, next: PermissionState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            info!(state = %next, "notification permission changed");
        }
    }
}

/// Interactive consent callback used by [`FilePermissionProvider::request`].
pub type ConsentPrompt = Box<dyn Fn() -> Result<bool> + Send + Sync>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PermissionFile {
    #[serde(default)]
    notifications: PermissionState,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Permission persisted as JSON next to the task database.
pub struct FilePermissionProvider {
    path: PathBuf,
    prompt: ConsentPrompt,
}

impl FilePermissionProvider {
    /// Provider that asks on stdin when a request is made.
    pub fn new(path: &Path) -> Self {
        Self::with_prompt(path, Box::new(ask_on_terminal))
    }

    pub fn with_prompt(path: &Path, prompt: ConsentPrompt) -> Self {
        FilePermissionProvider {
            path: path.to_path_buf(),
            prompt,
        }
    }

    /// Overwrite the stored decision (used by `permission revoke`).
    pub fn store(&self, state: PermissionState) -> Result<()> {
        let file = PermissionFile {
            notifications: state,
            updated_at: Some(Utc::now()),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}

impl PermissionProvider for FilePermissionProvider {
    fn query(&self) -> Result<PermissionState> {
        if !self.path.exists() {
            return Ok(PermissionState::Undetermined);
        }
        let content = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str::<PermissionFile>(&content) {
            Ok(file) => Ok(file.notifications),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable permission file, treating as undetermined");
                Ok(PermissionState::Undetermined)
            }
        }
    }

    fn request(&self) -> Result<PermissionState> {
        let state = if (self.prompt)()? {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        };
        self.store(state)?;
        Ok(state)
    }
}

fn ask_on_terminal() -> Result<bool> {
    print!("Allow taskbell to show due-date reminders? [y/N] ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| TaskError::Delivery(format!("could not read answer: {e}")))?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakePlatform {
        current: Mutex<PermissionState>,
        answer: PermissionState,
        prompts: AtomicUsize,
    }

    impl FakePlatform {
        fn new(current: PermissionState, answer: PermissionState) -> Arc<Self> {
            Arc::new(FakePlatform {
                current: Mutex::new(current),
                answer,
                prompts: AtomicUsize::new(0),
            })
        }

        fn set(&self, state: PermissionState) {
            *self.current.lock().unwrap() = state;
        }
    }

    impl PermissionProvider for FakePlatform {
        fn query(&self) -> Result<PermissionState> {
            Ok(*self.current.lock().unwrap())
        }

        fn request(&self) -> Result<PermissionState> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            self.set(self.answer);
            Ok(self.answer)
        }
    }

    #[test]
    fn starts_from_platform_value() {
        let platform = FakePlatform::new(PermissionState::Granted, PermissionState::Granted);
        let gate = PermissionGate::new(platform).unwrap();
        assert!(gate.is_granted());
    }

    #[test]
    fn request_moves_out_of_undetermined_once() {
        let platform = FakePlatform::new(PermissionState::Undetermined, PermissionState::Denied);
        let gate = PermissionGate::new(platform.clone()).unwrap();
        assert_eq!(gate.state(), PermissionState::Undetermined);

        assert_eq!(gate.request().unwrap(), PermissionState::Denied);
        assert_eq!(gate.request().unwrap(), PermissionState::Denied);
        assert_eq!(platform.prompts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_automatic_prompt_on_refresh() {
        let platform = FakePlatform::new(PermissionState::Undetermined, PermissionState::Granted);
        let gate = PermissionGate::new(platform.clone()).unwrap();
        gate.refresh().unwrap();
        assert_eq!(gate.state(), PermissionState::Undetermined);
        assert_eq!(platform.prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_publishes_external_changes() {
        let platform = FakePlatform::new(PermissionState::Granted, PermissionState::Granted);
        let gate = PermissionGate::new(platform.clone()).unwrap();
        let mut rx = gate.subscribe();

        gate.refresh().unwrap();
        assert!(!rx.has_changed().unwrap(), "same value is not a change");

        platform.set(PermissionState::Denied);
        gate.refresh().unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), PermissionState::Denied);
    }

    #[test]
    fn file_provider_persists_decision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        let provider = FilePermissionProvider::with_prompt(&path, Box::new(|| Ok(true)));
        assert_eq!(provider.query().unwrap(), PermissionState::Undetermined);

        let gate = PermissionGate::new(Arc::new(provider)).unwrap();
        assert_eq!(gate.request().unwrap(), PermissionState::Granted);

        // A fresh process re-reads the stored value.
        let reread = FilePermissionProvider::with_prompt(&path, Box::new(|| Ok(false)));
        assert_eq!(reread.query().unwrap(), PermissionState::Granted);

        reread.store(PermissionState::Denied).unwrap();
        assert_eq!(gate.refresh().unwrap(), PermissionState::Denied);
    }

    #[test]
    fn file_provider_denies_on_no() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        let provider = FilePermissionProvider::with_prompt(&path, Box::new(|| Ok(false)));
        assert_eq!(provider.request().unwrap(), PermissionState::Denied);
        assert_eq!(provider.query().unwrap(), PermissionState::Denied);
    }

    #[test]
    fn corrupt_permission_file_reads_as_undetermined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        std::fs::write(&path, "granted?").unwrap();
        let provider = FilePermissionProvider::with_prompt(&path, Box::new(|| Ok(true)));
        assert_eq!(provider.query().unwrap(), PermissionState::Undetermined);
    }
}
