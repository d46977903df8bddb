use crate::calendar;
use crate::config;
use crate::metrics;
use crate::model::AggregateStore;
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// The single JSON file holding the aggregate store.
#[derive(Debug, Clone)]
pub struct StoreFile {
    path: PathBuf,
}

impl StoreFile {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store file inside the configured data directory.
    pub fn default_location() -> Result<Self> {
        Ok(Self::at(config::store_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Always returns a complete store. A missing file is created with
    /// defaults, damaged or outdated content is repaired in memory.
    pub fn load(&self) -> Result<AggregateStore> {
        if !self.path.exists() {
            let store = AggregateStore::with_timestamp(calendar::now_epoch_ms());
            self.save(&store)?;
            log::info!("created new stats store at {}", self.path.display());
            return Ok(store);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                log::warn!(
                    "{} is not valid JSON ({err}), starting from defaults",
                    self.path.display()
                );
                let corrupt = self.path.with_extension("json.corrupt");
                if let Err(err) = fs::copy(&self.path, &corrupt) {
                    log::warn!("could not preserve {}: {err}", corrupt.display());
                }
                Value::Null
            }
        };

        Ok(repair(parsed))
    }

    pub fn save(&self, store: &AggregateStore) -> Result<()> {
        self.ensure_parent()?;
        if self.path.exists() {
            let backup = self.path.with_extension("json.bak");
            let _ = fs::copy(&self.path, &backup);
        }
        let json = serde_json::to_string_pretty(store)?;
        self.write_atomic(&json)
    }

    /// Replaces the file with a fresh default store, skipping the backup
    /// and merge steps of the regular save path.
    pub fn clear(&self) -> Result<AggregateStore> {
        let store = AggregateStore::with_timestamp(calendar::now_epoch_ms());
        self.ensure_parent()?;
        let json = serde_json::to_string_pretty(&store)?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(store)
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Ok(())
    }

    fn write_atomic(&self, contents: &str) -> Result<()> {
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, contents)
            .with_context(|| format!("failed to write {}", staging.display()))?;
        fs::rename(&staging, &self.path).with_context(|| {
            format!(
                "failed to move {} into {}",
                staging.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }
}

/// Merges persisted JSON over the default template one top-level field at a
/// time. A keyed collection that fails to decode keeps every entry that still
/// decodes on its own; any other field that fails falls back to its default.
pub fn repair(persisted: Value) -> AggregateStore {
    let template = match serde_json::to_value(AggregateStore::default()) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let loaded = match persisted {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            log::warn!("stats store root is {}, expected an object", kind(&other));
            Map::new()
        }
    };

    let mut merged = template.clone();
    for (key, value) in loaded {
        let Some(current) = merged.get(&key).cloned() else {
            log::debug!("dropping unknown stats field {key}");
            continue;
        };
        let mut candidate = merged.clone();
        candidate.insert(key.clone(), merge_value(current, value.clone()));
        if decodes(candidate.clone()) {
            merged = candidate;
            continue;
        }
        match salvage_entries(&template, &key, value) {
            Some(kept) => {
                merged.insert(key, kept);
            }
            None => log::warn!("stats field {key} is malformed, resetting it to defaults"),
        }
    }

    let mut store: AggregateStore =
        serde_json::from_value(Value::Object(merged)).unwrap_or_default();
    store.normalize_shape();
    metrics::refresh_unique_totals(&mut store);
    store
}

fn decodes(fields: Map<String, Value>) -> bool {
    serde_json::from_value::<AggregateStore>(Value::Object(fields)).is_ok()
}

/// Keeps the entries of a map or record list that decode when stored alone.
/// Only collections whose default is empty qualify; fixed-width arrays would
/// shift their buckets if an element were dropped.
fn salvage_entries(template: &Map<String, Value>, key: &str, value: Value) -> Option<Value> {
    let decodes_alone = |entry: Value| {
        let mut alone = template.clone();
        alone.insert(key.to_string(), entry);
        decodes(alone)
    };

    match (template.get(key)?, value) {
        (Value::Object(default), Value::Object(entries)) if default.is_empty() => {
            let mut kept = Map::new();
            for (id, entry) in entries {
                let single = Map::from_iter([(id.clone(), entry.clone())]);
                if decodes_alone(Value::Object(single)) {
                    kept.insert(id, entry);
                } else {
                    log::warn!("dropping malformed {key} entry {id}");
                }
            }
            Some(Value::Object(kept))
        }
        (Value::Array(default), Value::Array(items)) if default.is_empty() => {
            let mut kept = Vec::with_capacity(items.len());
            for (position, item) in items.into_iter().enumerate() {
                if decodes_alone(Value::Array(vec![item.clone()])) {
                    kept.push(item);
                } else {
                    log::warn!("dropping malformed {key} entry at position {position}");
                }
            }
            Some(Value::Array(kept))
        }
        _ => None,
    }
}

fn merge_value(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Full-store export with uniqueness sets written as plain lists.
pub fn export_value(store: &AggregateStore) -> Result<Value> {
    serde_json::to_value(store).context("failed to serialize stats store")
}

pub fn export_to(store: &AggregateStore, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&export_value(store)?)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
