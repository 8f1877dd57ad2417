//! Colour theme switching

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::Store;

const THEME_CLASSES: [&str; 2] = ["dark", "dracula"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    Dracula,
    /// Follow the platform's dark-mode preference
    #[default]
    System,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::Dracula => "dracula",
            Theme::System => "system",
        }
    }

    /// Class to add to the root element, if any
    pub fn class(self, prefers_dark: bool) -> Option<&'static str> {
        match self {
            Theme::Light => None,
            Theme::Dark => Some("dark"),
            Theme::Dracula => Some("dracula"),
            Theme::System if prefers_dark => Some("dark"),
            Theme::System => None,
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "dracula" => Ok(Theme::Dracula),
            "system" => Ok(Theme::System),
            other => Err(format!("unknown theme: {}", other)),
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class list of the element the theme is applied to
pub trait ClassList: Send + Sync {
    fn add(&self, class: &str);
    fn remove(&self, class: &str);
}

/// Class list kept in memory, for headless use and tests
#[derive(Debug, Default)]
pub struct MemoryClassList {
    classes: Mutex<Vec<String>>,
}

impl MemoryClassList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classes(&self) -> Vec<String> {
        self.classes.lock().clone()
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.lock().iter().any(|c| c == class)
    }
}

impl ClassList for MemoryClassList {
    fn add(&self, class: &str) {
        let mut classes = self.classes.lock();
        if !classes.iter().any(|c| c == class) {
            classes.push(class.to_string());
        }
    }

    fn remove(&self, class: &str) {
        self.classes.lock().retain(|c| c != class);
    }
}

/// Where the chosen theme survives between runs
pub trait ThemePersistence: Send + Sync {
    fn load(&self) -> Option<Theme>;
    fn save(&self, theme: Theme);
}

/// In-memory theme persistence
#[derive(Debug, Default)]
pub struct MemoryThemePersistence {
    saved: Mutex<Option<Theme>>,
}

impl MemoryThemePersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(theme: Theme) -> Self {
        Self {
            saved: Mutex::new(Some(theme)),
        }
    }
}

impl ThemePersistence for MemoryThemePersistence {
    fn load(&self) -> Option<Theme> {
        *self.saved.lock()
    }

    fn save(&self, theme: Theme) {
        *self.saved.lock() = Some(theme);
    }
}

/// Current theme, applied to a class list on every change
pub struct ThemeStore<C: ClassList> {
    classes: C,
    prefers_dark: bool,
    theme: Store<Theme>,
    persistence: Option<Arc<dyn ThemePersistence>>,
}

impl<C: ClassList> ThemeStore<C> {
    /// Create the store and apply `initial` right away
    pub fn new(classes: C, initial: Theme, prefers_dark: bool) -> Self {
        let store = Self {
            classes,
            prefers_dark,
            theme: Store::create(initial),
            persistence: None,
        };
        store.apply(initial);
        store
    }

    /// Restore the saved theme (or [`Theme::System`]) and save every change
    pub fn persisted(
        classes: C,
        persistence: Arc<dyn ThemePersistence>,
        prefers_dark: bool,
    ) -> Self {
        let initial = persistence.load().unwrap_or_default();
        let mut store = Self::new(classes, initial, prefers_dark);
        store.persistence = Some(persistence);
        store
    }

    pub fn get(&self) -> Theme {
        self.theme.get()
    }

    pub fn set(&self, theme: Theme) {
        self.theme.set(theme);
        if let Some(persistence) = &self.persistence {
            persistence.save(theme);
        }
        self.apply(theme);
    }

    /// Update the platform preference; only matters for [`Theme::System`]
    pub fn set_prefers_dark(&mut self, prefers_dark: bool) {
        self.prefers_dark = prefers_dark;
        self.apply(self.theme.get());
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Theme> {
        self.theme.subscribe()
    }

    pub fn class_list(&self) -> &C {
        &self.classes
    }

    fn apply(&self, theme: Theme) {
        for class in THEME_CLASSES {
            self.classes.remove(class);
        }
        if let Some(class) = theme.class(self.prefers_dark) {
            self.classes.add(class);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_theme_is_applied() {
        let store = ThemeStore::new(MemoryClassList::new(), Theme::Dracula, false);
        assert_eq!(store.class_list().classes(), vec!["dracula"]);
    }

    #[test]
    fn test_switching_removes_previous_class() {
        let store = ThemeStore::new(MemoryClassList::new(), Theme::Dark, false);
        store.set(Theme::Dracula);
        assert_eq!(store.class_list().classes(), vec!["dracula"]);

        store.set(Theme::Light);
        assert!(store.class_list().classes().is_empty());
        assert_eq!(store.get(), Theme::Light);
    }

    #[test]
    fn test_system_follows_preference() {
        let mut store = ThemeStore::new(MemoryClassList::new(), Theme::System, true);
        assert!(store.class_list().contains("dark"));

        store.set_prefers_dark(false);
        assert!(!store.class_list().contains("dark"));
    }

    #[test]
    fn test_unrelated_classes_survive() {
        let classes = MemoryClassList::new();
        classes.add("compact");
        let store = ThemeStore::new(classes, Theme::Dark, false);
        store.set(Theme::Light);
        assert_eq!(store.class_list().classes(), vec!["compact"]);
    }

    #[test]
    fn test_saved_theme_is_restored_and_updated() {
        let saved = Arc::new(MemoryThemePersistence::with(Theme::Dracula));
        let store = ThemeStore::persisted(MemoryClassList::new(), saved.clone(), false);
        assert_eq!(store.get(), Theme::Dracula);
        assert_eq!(store.class_list().classes(), vec!["dracula"]);

        store.set(Theme::Light);
        assert_eq!(saved.load(), Some(Theme::Light));

        let reopened = ThemeStore::persisted(MemoryClassList::new(), saved, false);
        assert_eq!(reopened.get(), Theme::Light);
    }

    #[test]
    fn test_nothing_saved_defaults_to_system() {
        let saved = Arc::new(MemoryThemePersistence::new());
        let store = ThemeStore::persisted(MemoryClassList::new(), saved.clone(), true);
        assert_eq!(store.get(), Theme::System);
        assert!(store.class_list().contains("dark"));
        assert_eq!(saved.load(), None);
    }

    #[test]
    fn test_parse_round_trip() {
        for theme in [Theme::Light, Theme::Dark, Theme::Dracula, Theme::System] {
            assert_eq!(theme.as_str().parse::<Theme>().unwrap(), theme);
        }
        assert!("solarized".parse::<Theme>().is_err());
    }
}
