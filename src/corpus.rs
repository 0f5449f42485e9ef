//! Filesystem corpus loader.
//!
//! Walks `[corpus].root`, applies include/exclude globs, and turns each
//! UTF-8 text file into a [`Document`]. The document id is the path
//! relative to the root. Metadata comes from the `[corpus]` section and can
//! be overridden per file by a sidecar `<file>.meta.toml`:
//!
//! ```toml
//! procedure_tag = "colonoscopy"
//! language = "zh-TW"
//! ```
//!
//! `procedure_tag` defaults to the file stem.

use std::path::Path;

use anyhow::{bail, Context, Result};
use careguide_core::models::{Document, SourceMetadata};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::CorpusConfig;

const SIDECAR_SUFFIX: &str = ".meta.toml";

#[derive(Debug, Default, Deserialize)]
struct Sidecar {
    org: Option<String>,
    language: Option<String>,
    procedure_tag: Option<String>,
    region: Option<String>,
}

/// Scan the corpus directory. Documents are sorted by id.
pub fn scan_corpus(config: &CorpusConfig) -> Result<Vec<Document>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
        format!("**/*{}", SIDECAR_SUFFIX),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();

    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
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

        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };

        let metadata = file_metadata(config, path)?;
        debug!(document = %rel_str, chars = text.chars().count(), "loaded");
        documents.push(Document::new(rel_str, text).with_metadata(metadata));
    }

    documents.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(documents)
}

fn file_metadata(config: &CorpusConfig, path: &Path) -> Result<SourceMetadata> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty());

    let mut metadata = SourceMetadata {
        org: config.org.clone(),
        language: config.language.clone(),
        procedure_tag: stem,
        region: config.region.clone(),
    };

    let mut sidecar_path = path.as_os_str().to_owned();
    sidecar_path.push(SIDECAR_SUFFIX);
    let sidecar_path = Path::new(&sidecar_path);
    if sidecar_path.is_file() {
        let content = std::fs::read_to_string(sidecar_path)
            .with_context(|| format!("Failed to read {}", sidecar_path.display()))?;
        let sidecar: Sidecar = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", sidecar_path.display()))?;
        if sidecar.org.is_some() {
            metadata.org = sidecar.org;
        }
        if sidecar.language.is_some() {
            metadata.language = sidecar.language;
        }
        if sidecar.procedure_tag.is_some() {
            metadata.procedure_tag = sidecar.procedure_tag;
        }
        if sidecar.region.is_some() {
            metadata.region = sidecar.region;
        }
    }

    Ok(metadata)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
