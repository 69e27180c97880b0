//! Vector memory
//!
//! A note store queried by embedding distance. Texts are embedded through an
//! embedding backend, so every add and query goes through that backend's
//! queue and rate limit like any other call.

use crate::broker::{Backend, Transport};
use crate::device::{CapabilityDescriptor, Device};
use crate::error::LlmuxError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_MEMORY_SUMMARY: &str = "\
A database you can use as a note or a memo. Your context window is limited and only retains a few \
thousand words. Preserve important events and facts by recording them here.";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemoryRecord {
    text: String,
    embedding: Vec<f32>,
}

/// Squared Euclidean distance. Mismatched dimensions never match.
fn distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

pub struct VectorMemory<T>
where
    T: Transport<Payload = String, Output = Vec<f32>>,
{
    name: String,
    summary: String,
    embedder: Arc<Backend<T>>,
    storage_dir: Option<PathBuf>,
    records: RwLock<Vec<MemoryRecord>>,
}

impl<T> VectorMemory<T>
where
    T: Transport<Payload = String, Output = Vec<f32>>,
{
    pub fn new(name: impl Into<String>, embedder: Arc<Backend<T>>) -> Self {
        Self {
            name: name.into(),
            summary: DEFAULT_MEMORY_SUMMARY.to_string(),
            embedder,
            storage_dir: None,
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_storage_dir(mut self, storage_dir: impl AsRef<Path>) -> Self {
        self.storage_dir = Some(storage_dir.as_ref().to_path_buf());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn storage_path(&self) -> Option<PathBuf> {
        self.storage_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", self.name)))
    }

    pub async fn add(&self, caller: &str, text: &str) -> String {
        let embedding = self.embedder.dispatch(caller, text.to_string()).await;
        self.records.write().push(MemoryRecord {
            text: text.to_string(),
            embedding,
        });
        debug!(memory = %self.name, caller, "Added memory record");
        format!("Added a new item to {}.", self.name)
    }

    /// Up to `k` nearest texts with their distances, nearest first. An empty
    /// store answers without calling the embedder.
    pub async fn query_scored(&self, caller: &str, text: &str, k: usize) -> Vec<(f32, String)> {
        if self.is_empty() || k == 0 {
            return Vec::new();
        }
        let embedding = self.embedder.dispatch(caller, text.to_string()).await;
        let records = self.records.read();
        let mut scored: Vec<(f32, String)> = records
            .iter()
            .map(|record| (distance(&embedding, &record.embedding), record.text.clone()))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(k);
        scored
    }

    pub async fn query(&self, caller: &str, text: &str, k: usize) -> String {
        let hits = self.query_scored(caller, text, k).await;
        if hits.is_empty() {
            return format!("{} is empty.", self.name);
        }
        let texts: Vec<String> = hits.into_iter().map(|(_, text)| text).collect();
        format!(
            "Here are the top-{} most relevant items, separated by \"====\":\n{}",
            texts.len(),
            texts.join("\n====\n")
        )
    }

    /// Remove the record nearest to `text`.
    pub async fn remove(&self, caller: &str, text: &str) -> String {
        if self.is_empty() {
            return format!("{} is empty.", self.name);
        }
        let embedding = self.embedder.dispatch(caller, text.to_string()).await;
        let mut records = self.records.write();
        let nearest = records
            .iter()
            .enumerate()
            .min_by(|a, b| {
                distance(&embedding, &a.1.embedding).total_cmp(&distance(&embedding, &b.1.embedding))
            })
            .map(|(index, _)| index);
        match nearest {
            Some(index) => {
                let removed = records.remove(index);
                let sample: Vec<&str> = removed.text.split_whitespace().take(10).collect();
                format!("Removed the item \"{}...\"", sample.join(" "))
            }
            None => format!("{} is empty.", self.name),
        }
    }
}

#[async_trait]
impl<T> Device for VectorMemory<T>
where
    T: Transport<Payload = String, Output = Vec<f32>>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new(self.name.clone(), self.summary.clone())
            .command("add", &["text"], "Store text for later retrieval.")
            .command("query", &["text", "k"], "Retrieve the k stored texts most relevant to text.")
            .command("remove", &["text"], "Remove the stored text most similar to text.")
            .command("size", &[], "Number of stored texts.")
    }

    async fn invoke(&self, caller: &str, command: &str, args: &[String]) -> Result<String, LlmuxError> {
        let text = || {
            args.first()
                .map(String::as_str)
                .ok_or_else(|| LlmuxError::DeviceError(format!("{}.{} needs a text argument", self.name, command)))
        };
        match command {
            "add" => Ok(self.add(caller, text()?).await),
            "query" => {
                let k = match args.get(1) {
                    Some(raw) => raw.parse::<usize>().map_err(|_| {
                        LlmuxError::DeviceError(format!("Invalid k for {}.query: {}", self.name, raw))
                    })?,
                    None => 1,
                };
                Ok(self.query(caller, text()?, k).await)
            }
            "remove" => Ok(self.remove(caller, text()?).await),
            "size" => Ok(self.len().to_string()),
            other => Err(LlmuxError::DeviceError(format!(
                "Unknown command: {}.{}",
                self.name, other
            ))),
        }
    }

    fn load(&self) -> Result<(), LlmuxError> {
        let Some(path) = self.storage_path() else {
            return Ok(());
        };
        if !path.is_file() {
            return Ok(());
        }
        let records: Vec<MemoryRecord> = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        info!(memory = %self.name, records = records.len(), path = %path.display(), "Loaded memory");
        *self.records.write() = records;
        Ok(())
    }

    fn save(&self) -> Result<(), LlmuxError> {
        let Some(path) = self.storage_path() else {
            return Ok(());
        };
        let records = self.records.read();
        if records.is_empty() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string(&*records)?)?;
        info!(memory = %self.name, records = records.len(), path = %path.display(), "Saved memory");
        Ok(())
    }
}
