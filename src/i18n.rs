//! Translation catalogs and per-request language selection.
//!
//! Catalogs are flat JSON objects stored as `<lang_dir>/<code>.json`. They are
//! read once at startup and handed to the request handlers through the app
//! state.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Key/value translations for one language.
pub type Messages = HashMap<String, String>;

/// Cookie holding the visitor's chosen language.
pub const LANG_COOKIE: &str = "lang";

#[derive(Debug, Clone)]
pub struct Catalog {
    default: String,
    languages: BTreeMap<String, Messages>,
}

impl Catalog {
    /// Loads every `<code>.json` in `dir`.
    ///
    /// When `allowed` is non-empty only those languages are kept. The default
    /// language must be among the loaded catalogs.
    pub fn load(dir: &Path, allowed: &[String], default: &str) -> Result<Self> {
        let read_err = |source| Error::CatalogRead {
            path: dir.to_path_buf(),
            source,
        };

        let mut languages = BTreeMap::new();
        for entry in fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(code) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let code = code.to_ascii_lowercase();
            if !allowed.is_empty() && !allowed.contains(&code) {
                continue;
            }

            let raw = fs::read_to_string(&path).map_err(|source| Error::CatalogRead {
                path: path.clone(),
                source,
            })?;
            let messages: Messages = serde_json::from_str(&raw)
                .map_err(|source| Error::CatalogParse { path, source })?;
            languages.insert(code, messages);
        }

        for lang in allowed {
            if !languages.contains_key(lang) {
                tracing::warn!(lang = %lang, dir = %dir.display(), "configured language has no catalog");
            }
        }

        Self::from_messages(default, languages)
    }

    pub fn from_messages<I>(default: &str, languages: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Messages)>,
    {
        let languages: BTreeMap<_, _> = languages.into_iter().collect();
        let default = default.to_ascii_lowercase();
        if !languages.contains_key(&default) {
            return Err(Error::MissingLanguage(default));
        }
        Ok(Self { default, languages })
    }

    pub fn default_language(&self) -> &str {
        &self.default
    }

    /// Supported language codes in sorted order.
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(String::as_str)
    }

    fn supported(&self, code: &str) -> Option<&str> {
        let code = code.trim().to_ascii_lowercase();
        self.languages
            .get_key_value(&code)
            .map(|(k, _)| k.as_str())
    }

    /// Looks `key` up in `lang`, then in the default language, then gives back
    /// the key itself.
    pub fn text<'a>(&'a self, lang: &str, key: &'a str) -> &'a str {
        self.languages
            .get(lang)
            .and_then(|m| m.get(key))
            .or_else(|| self.languages.get(&self.default).and_then(|m| m.get(key)))
            .map(String::as_str)
            .unwrap_or(key)
    }

    /// Picks the best supported language from an `Accept-Language` header.
    ///
    /// Ranges are ordered by q-value and matched on their primary subtag.
    pub fn negotiate(&self, accept_language: &str) -> Option<&str> {
        let mut ranges: Vec<(&str, f32)> = accept_language
            .split(',')
            .filter_map(|item| {
                let mut parts = item.split(';');
                let tag = parts.next()?.trim();
                if tag.is_empty() || tag == "*" {
                    return None;
                }
                let q = parts
                    .filter_map(|p| p.trim().strip_prefix("q="))
                    .find_map(|q| q.trim().parse::<f32>().ok())
                    .unwrap_or(1.0);
                (q > 0.0).then_some((tag, q))
            })
            .collect();
        ranges.sort_by(|a, b| b.1.total_cmp(&a.1));

        ranges
            .into_iter()
            .find_map(|(tag, _)| self.supported(tag.split('-').next().unwrap_or(tag)))
    }

    /// Chooses the language for a request.
    ///
    /// An explicit `?lang=` choice wins, then the `lang` cookie, then the
    /// `Accept-Language` header, then the default language. Unsupported codes
    /// are ignored at every step.
    pub fn resolve(
        &self,
        explicit: Option<&str>,
        cookie: Option<&str>,
        accept_language: Option<&str>,
    ) -> &str {
        explicit
            .and_then(|l| self.supported(l))
            .or_else(|| cookie.and_then(|l| self.supported(l)))
            .or_else(|| accept_language.and_then(|h| self.negotiate(h)))
            .unwrap_or(self.default.as_str())
    }
}

/// Extracts the value of cookie `name` from a `Cookie` request header.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"'))
    })
}
