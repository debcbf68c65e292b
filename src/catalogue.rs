//! Language and compiler catalogue
//!
//! Two JSON-backed tables kept in memory: language → source/executable file
//! name templates, and compiler → image/compile/execute command templates.
//! Templates are rendered by straight placeholder substitution; the session
//! can replace the on-disk tables (`declare.language` / `declare.compiler`)
//! and reload them (`declare.load`) without a restart.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{COMPILERS_FILE, LANGUAGES_FILE};
use crate::error::{AppError, AppResult};

/// Language entry: file name templates with an `{id}` placeholder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    pub file: String,
    pub executable: String,
}

/// Compiler entry: image and command templates.
///
/// Placeholders: `{version}` in `image`; `{source}`, `{executable}`,
/// `{version}` in `compile`; `{executable}` in `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compiler {
    pub image: String,
    pub compile: String,
    pub execute: String,
}

/// In-memory catalogue backed by two JSON files
pub struct Catalogue {
    dir: PathBuf,
    pretty: bool,
    languages: RwLock<HashMap<String, Language>>,
    compilers: RwLock<HashMap<String, Compiler>>,
}

impl Catalogue {
    /// Load the catalogue from `<dir>/languages.json` and `<dir>/compilers.json`
    pub fn load(dir: &Path, pretty: bool) -> AppResult<Self> {
        let catalogue = Self {
            dir: dir.to_path_buf(),
            pretty,
            languages: RwLock::new(HashMap::new()),
            compilers: RwLock::new(HashMap::new()),
        };
        catalogue.reload()?;
        Ok(catalogue)
    }

    /// Re-read both tables from disk
    pub fn reload(&self) -> AppResult<()> {
        *self.languages.write().unwrap() = read_table(&self.dir.join(LANGUAGES_FILE))?;
        *self.compilers.write().unwrap() = read_table(&self.dir.join(COMPILERS_FILE))?;

        tracing::debug!(
            languages = self.languages.read().unwrap().len(),
            compilers = self.compilers.read().unwrap().len(),
            "Catalogue loaded"
        );
        Ok(())
    }

    /// Look up a language entry by name
    pub fn language(&self, name: &str) -> AppResult<Language> {
        self.languages
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::System(format!("language not found: {name}")))
    }

    /// Look up a compiler entry by name
    pub fn compiler(&self, name: &str) -> AppResult<Compiler> {
        self.compilers
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::System(format!("compiler not found: {name}")))
    }

    /// Replace the on-disk language table (does not touch memory; see `reload`)
    pub fn replace_languages(&self, table: &Value) -> AppResult<()> {
        serde_json::from_value::<HashMap<String, Language>>(table.clone())
            .map_err(|_| AppError::InvalidField("language table".to_string()))?;
        self.write_table(&self.dir.join(LANGUAGES_FILE), table)
    }

    /// Replace the on-disk compiler table (does not touch memory; see `reload`)
    pub fn replace_compilers(&self, table: &Value) -> AppResult<()> {
        serde_json::from_value::<HashMap<String, Compiler>>(table.clone())
            .map_err(|_| AppError::InvalidField("compiler table".to_string()))?;
        self.write_table(&self.dir.join(COMPILERS_FILE), table)
    }

    fn write_table(&self, path: &Path, table: &Value) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = if self.pretty {
            serde_json::to_string_pretty(table)
        } else {
            serde_json::to_string(table)
        }
        .map_err(|e| AppError::System(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }
}

fn read_table<T: serde::de::DeserializeOwned>(path: &Path) -> AppResult<HashMap<String, T>> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "Catalogue file missing, using empty table");
        return Ok(HashMap::new());
    }
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| AppError::System(format!("malformed catalogue {}: {e}", path.display())))
}

/// Render a template by substituting `{key}` placeholders
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in vars {
        rendered = rendered.replace(&format!("{{{key}}}"), value);
    }
    rendered
}
