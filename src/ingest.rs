//! Knowledge-base loading.
//!
//! Walks a directory, keeps files matching the include globs (and not the
//! exclude globs), chunks them, embeds the chunks in batches and appends
//! them to the index. Files are processed in sorted path order so chunk
//! ingestion order, and with it retrieval tie-breaking, is deterministic.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use business_assistant_core::chunk::chunk_text;
use business_assistant_core::index::VectorIndex;
use business_assistant_core::models::DocumentChunk;

use crate::config::KnowledgeConfig;
use crate::embedding::Embedder;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IngestStats {
    pub documents: usize,
    pub chunks: usize,
    /// Matching files that could not be read as UTF-8 text.
    pub skipped: usize,
}

/// A matched file: path relative to the root, plus its contents.
#[derive(Debug, Clone)]
pub struct KnowledgeDocument {
    pub document_id: String,
    pub body: String,
}

/// Load every matching document under `root` into `index`.
pub async fn load_knowledge_base(
    root: &Path,
    config: &KnowledgeConfig,
    embedder: &dyn Embedder,
    batch_size: usize,
    index: &dyn VectorIndex,
) -> Result<IngestStats> {
    info!(root = %root.display(), "loading knowledge base");

    let (documents, skipped) = scan_documents(root, config)?;
    if documents.is_empty() {
        warn!(root = %root.display(), "no documents found");
        return Ok(IngestStats {
            skipped,
            ..Default::default()
        });
    }

    let mut chunks: Vec<DocumentChunk> = Vec::new();
    for doc in &documents {
        chunks.extend(chunk_text(
            &doc.document_id,
            &doc.body,
            config.chunk_chars,
            config.overlap_chars,
        ));
    }

    let total_chunks = chunks.len();
    let batch_size = batch_size.max(1);
    let mut pending = chunks.into_iter().peekable();
    while pending.peek().is_some() {
        let mut batch: Vec<DocumentChunk> = pending.by_ref().take(batch_size).collect();
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != batch.len() {
            bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            );
        }
        for (chunk, vector) in batch.iter_mut().zip(vectors) {
            chunk.embedding = vector;
        }
        index.insert(batch).await?;
    }

    let stats = IngestStats {
        documents: documents.len(),
        chunks: total_chunks,
        skipped,
    };
    info!(
        documents = stats.documents,
        chunks = stats.chunks,
        skipped = stats.skipped,
        model = embedder.model_name(),
        "knowledge base loaded"
    );
    Ok(stats)
}

/// Collect matching documents under `root`, sorted by relative path.
///
/// Returns the documents and the number of matching files skipped because
/// they were unreadable or not UTF-8.
pub fn scan_documents(root: &Path, config: &KnowledgeConfig) -> Result<(Vec<KnowledgeDocument>, usize)> {
    if !root.is_dir() {
        bail!("Knowledge root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut matched: Vec<(String, PathBuf)> = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        matched.push((rel_str, path.to_path_buf()));
    }
    matched.sort_by(|a, b| a.0.cmp(&b.0));

    let mut documents = Vec::with_capacity(matched.len());
    let mut skipped = 0;
    for (document_id, path) in matched {
        match std::fs::read_to_string(&path) {
            Ok(body) => documents.push(KnowledgeDocument { document_id, body }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable document");
                skipped += 1;
            }
        }
    }
    Ok((documents, skipped))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
