//! Template discovery.
//!
//! Recursively scans a directory for `*.template.json` files and loads them
//! as [`Template`]s. The template id defaults to the file name without the
//! `.template.json` suffix.

use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{Config, Template};
use crate::error::{CompileError, Result};
use crate::validate::{validate, ValidatedInput};

const TEMPLATE_SUFFIX: &str = ".template.json";

/// On-disk shape; everything but the entry is optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateFile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    entry: Value,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    width_auto: Option<bool>,
}

/// Loads every template below `dir`, ordered by path. A missing directory
/// yields no templates; an unreadable or invalid file is an error.
pub fn discover_templates(dir: &Path) -> Result<Vec<Template>> {
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "template directory does not exist");
        return Ok(vec![]);
    }

    find_template_files(dir)?
        .iter()
        .map(|path| parse_template_file(path))
        .collect()
}

fn find_template_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| discovery_error(dir, e))?;
        let path = entry.path();
        let is_template = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(TEMPLATE_SUFFIX));
        if path.is_file() && is_template {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}

fn parse_template_file(path: &Path) -> Result<Template> {
    let source = fs::read_to_string(path).map_err(|e| discovery_error(path, e))?;
    let file: TemplateFile =
        serde_json::from_str(&source).map_err(|e| discovery_error(path, e))?;

    let result = validate(&file.entry);
    if !matches!(result.input, Some(ValidatedInput::Entry(_))) {
        let reason = result
            .reason
            .unwrap_or_else(|| "template entry is empty".to_string());
        return Err(discovery_error(path, reason));
    }

    let id = match file.id {
        Some(id) => id,
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(TEMPLATE_SUFFIX))
            .map(str::to_string)
            .ok_or_else(|| discovery_error(path, "invalid file name"))?,
    };

    tracing::debug!(template = %id, path = %path.display(), "discovered template");

    Ok(Template {
        id,
        label: file.label,
        thumbnail: file.thumbnail,
        entry: file.entry,
        is_user_defined: false,
        width: file.width,
        width_auto: file.width_auto,
    })
}

fn discovery_error(path: &Path, message: impl ToString) -> CompileError {
    CompileError::Discovery {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

impl Config {
    /// Adds the templates found below `dir`. Templates already in the config
    /// keep precedence over discovered ones with the same id.
    pub fn with_discovered_templates(mut self, dir: &Path) -> Result<Self> {
        for template in discover_templates(dir)? {
            if self.templates.iter().any(|t| t.id == template.id) {
                tracing::debug!(template = %template.id, "template already configured; skipping");
                continue;
            }
            self.templates.push(template);
        }
        Ok(self)
    }
}
