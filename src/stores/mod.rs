//! Application state stores that sit beside the event stream
//!
//! Each store is an explicit value the application creates and passes
//! around; nothing here is a process-wide singleton.
//!
//! - `auth`: login state, credential persistence and authenticated requests
//! - `i18n`: locale tables with English fallback
//! - `theme`: light/dark/dracula class switching
//! - `toast`: transient notification with auto-hide

pub mod auth;
pub mod i18n;
pub mod theme;
pub mod toast;

use std::sync::Arc;

use tokio::sync::watch;

pub use auth::{AuthError, AuthState, AuthStore, CredentialStore, LoginResponse, MemoryCredentials};
pub use i18n::{I18n, I18nError, Language};
pub use theme::{
    ClassList, MemoryClassList, MemoryThemePersistence, Theme, ThemePersistence, ThemeStore,
};
pub use toast::{Toast, ToastStore};

/// Observable value shared between owners
///
/// Clones share the same value. Subscribers see the latest value and are
/// woken on every change.
#[derive(Debug)]
pub struct Store<T> {
    sender: Arc<watch::Sender<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T: Clone> Store<T> {
    pub fn create(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Replace the value and notify subscribers
    pub fn set(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// Modify the value in place and notify subscribers
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        self.sender.send_modify(f);
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Drop this owner's reference
    ///
    /// Once every clone is disposed, subscribers observe the channel closing.
    pub fn dispose(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_update() {
        let store = Store::create(1u32);
        assert_eq!(store.get(), 1);

        store.set(5);
        assert_eq!(store.get(), 5);

        store.update(|v| *v += 2);
        assert_eq!(store.get(), 7);
    }

    #[test]
    fn test_clones_share_value() {
        let a = Store::create(String::from("light"));
        let b = a.clone();
        b.set("dark".to_string());
        assert_eq!(a.get(), "dark");
    }

    #[tokio::test]
    async fn test_subscriber_sees_changes() {
        let store = Store::create(0u8);
        let mut rx = store.subscribe();
        assert_eq!(store.subscriber_count(), 1);

        store.set(3);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 3);
    }

    #[tokio::test]
    async fn test_dispose_closes_channel() {
        let store = Store::create(0u8);
        let mut rx = store.subscribe();
        store.dispose();
        assert!(rx.changed().await.is_err());
    }
}
