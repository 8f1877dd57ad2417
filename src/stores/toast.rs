//! Transient notification with auto-hide

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::Store;

pub const DEFAULT_DURATION: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub message: String,
    pub visible: bool,
}

/// Shows one message at a time; each show restarts the hide timer
///
/// Must be used inside a tokio runtime.
pub struct ToastStore {
    toast: Store<Toast>,
    duration: Duration,
    hide_timer: Mutex<Option<JoinHandle<()>>>,
}

impl ToastStore {
    pub fn new() -> Self {
        Self::with_duration(DEFAULT_DURATION)
    }

    pub fn with_duration(duration: Duration) -> Self {
        Self {
            toast: Store::create(Toast::default()),
            duration,
            hide_timer: Mutex::new(None),
        }
    }

    pub fn show(&self, message: impl Into<String>) {
        self.toast.set(Toast {
            message: message.into(),
            visible: true,
        });

        let toast = self.toast.clone();
        let duration = self.duration;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            toast.update(|t| t.visible = false);
        });

        if let Some(previous) = self.hide_timer.lock().replace(timer) {
            previous.abort();
        }
    }

    /// Show a string, or the `message` field of an object
    ///
    /// Returns false when `value` carries nothing to show.
    pub fn show_value(&self, value: &Value) -> bool {
        let text = match value {
            Value::String(s) => s.as_str(),
            Value::Object(map) => match map.get("message").and_then(Value::as_str) {
                Some(s) => s,
                None => return false,
            },
            _ => return false,
        };
        self.show(text);
        true
    }

    pub fn current(&self) -> Toast {
        self.toast.get()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Toast> {
        self.toast.subscribe()
    }
}

impl Default for ToastStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ToastStore {
    fn drop(&mut self) {
        if let Some(timer) = self.hide_timer.get_mut().take() {
            timer.abort();
        }
    }
}
