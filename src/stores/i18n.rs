//! Translations served by `/api/locales/{lang}.json`

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, warn};

use super::Store;
use crate::config::{ConfigError, StreamConfig};

#[derive(Debug, Error)]
pub enum I18nError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not load {lang}.json: {reason}")]
    Load { lang: Language, reason: String },

    #[error("unsupported language: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    #[default]
    En,
    Ko,
}

impl Language {
    pub const SUPPORTED: [Language; 2] = [Language::En, Language::Ko];

    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ko => "ko",
        }
    }

    /// Pick a supported language from a tag like `ko-KR`, defaulting to English
    pub fn negotiate(tag: &str) -> Self {
        let primary = tag.split(['-', '_']).next().unwrap_or_default();
        primary.parse().unwrap_or_default()
    }
}

impl FromStr for Language {
    type Err = I18nError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "ko" => Ok(Language::Ko),
            other => Err(I18nError::Unsupported(other.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// English text for keys the UI cannot do without
fn builtin(key: &str) -> Option<&'static str> {
    let text = match key {
        "no_downloads_message" => "No downloads yet. Please add a URL to download.",
        "title" => "OC-Proxy",
        "table_header_file_name" => "File Name",
        "table_header_status" => "Status",
        "table_header_size" => "Size",
        "table_header_requested_at" => "Requested At",
        "table_header_actions" => "Actions",
        "url_placeholder" => "Download URL",
        "password_placeholder" => "Password (optional)",
        "add_download" => "Add Download",
        "pagination_previous" => "Previous",
        "pagination_next" => "Next",
        "pagination_page_info" => "Page {currentPage} of {totalPages}",
        "action_pause" => "Pause",
        "action_resume" => "Resume",
        "action_retry" => "Retry",
        "action_delete" => "Delete",
        "delete_confirm" => "Are you sure you want to delete this download?",
        _ => return None,
    };
    Some(text)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Table {
    locale: Language,
    entries: HashMap<String, String>,
    loading: bool,
}

/// Locale table plus lookup
#[derive(Clone)]
pub struct I18n {
    http: reqwest::Client,
    config: StreamConfig,
    table: Store<Table>,
}

impl I18n {
    pub fn new(http: reqwest::Client, config: StreamConfig) -> Self {
        Self {
            http,
            config,
            table: Store::create(Table {
                loading: true,
                ..Table::default()
            }),
        }
    }

    /// Translations from an in-memory table
    pub fn with_entries(locale: Language, entries: HashMap<String, String>) -> Self {
        let mut i18n = Self::new(reqwest::Client::new(), StreamConfig::default());
        i18n.table = Store::create(Table {
            locale,
            entries,
            loading: false,
        });
        i18n
    }

    /// Load the language matching `preferred` (e.g. `ko-KR`)
    pub async fn initialize(&self, preferred: &str) -> Language {
        self.load(Language::negotiate(preferred)).await
    }

    /// Load `lang`, falling back to English and then to an empty table
    ///
    /// Returns the language actually in effect.
    pub async fn load(&self, lang: Language) -> Language {
        self.table.update(|t| t.loading = true);

        let mut attempt = lang;
        let (locale, entries) = loop {
            match self.fetch(attempt).await {
                Ok(entries) => break (attempt, entries),
                Err(e) if attempt != Language::En => {
                    warn!(error = %e, "Falling back to English translations");
                    attempt = Language::En;
                }
                Err(e) => {
                    warn!(error = %e, "No translations available");
                    break (Language::En, HashMap::new());
                }
            }
        };

        debug!(locale = %locale, keys = entries.len(), "Translations loaded");
        self.table.set(Table {
            locale,
            entries,
            loading: false,
        });
        locale
    }

    async fn fetch(&self, lang: Language) -> Result<HashMap<String, String>, I18nError> {
        let url = self.config.endpoint(&format!("/api/locales/{}.json", lang.code()))?;
        let load_error = |reason: String| I18nError::Load { lang, reason };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| load_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(load_error(format!("status {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|e| load_error(e.to_string()))
    }

    pub fn locale(&self) -> Language {
        self.table.get().locale
    }

    pub fn is_loading(&self) -> bool {
        self.table.get().loading
    }

    /// Translate `key`, replacing every `{name}` with its value from `vars`
    pub fn t(&self, key: &str, vars: &[(&str, &str)]) -> String {
        let table = self.table.get();
        let mut text = table
            .entries
            .get(key)
            .cloned()
            .or_else(|| builtin(key).map(str::to_string))
            .unwrap_or_else(|| key.to_string());

        for (name, value) in vars {
            text = text.replace(&format!("{{{}}}", name), value);
        }
        text
    }
}
