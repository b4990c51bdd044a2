//! Semantic search over synchronized scenes.
//!
//! Embeds the query with the configured provider and asks the vector index
//! for its nearest neighbours. Only scenes that have been synchronized are
//! visible; dirty edits show up after the next `scenesync sync`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::index::{self, IndexMatch, VectorIndex};

pub const DEFAULT_LIMIT: usize = 10;

/// Embed `query` and return up to `limit` matches, best first.
///
/// Ties are broken by key so the order is deterministic.
pub async fn search_scenes(
    embedder: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    query: &str,
    limit: usize,
) -> Result<Vec<IndexMatch>> {
    if query.trim().is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let vector = embedding::embed_query(embedder, query).await?;
    let mut matches = index.query(&vector, limit).await?;

    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    matches.truncate(limit);
    Ok(matches)
}

pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let embedder = embedding::create_provider(&config.embedding)?;
    let vector_index = index::create_index(&config.index, &pool)?;

    let matches = search_scenes(
        embedder.as_ref(),
        vector_index.as_ref(),
        query,
        limit.unwrap_or(DEFAULT_LIMIT),
    )
    .await?;

    if matches.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        match &m.metadata {
            Some(meta) => {
                let title = if meta.chapter_title.is_empty() {
                    "(untitled)"
                } else {
                    meta.chapter_title.as_str()
                };
                println!("{}. [{:.2}] {} / {}", i + 1, m.score, m.id, title);
                println!(
                    "    excerpt: \"{}\"",
                    meta.digest.replace('\n', " ").trim()
                );
                if !meta.related_characters.is_empty() {
                    println!("    characters: {}", meta.related_characters.join(", "));
                }
                println!("    model: {}", meta.embedding_model);
            }
            None => println!("{}. [{:.2}] {}", i + 1, m.score, m.id),
        }
        println!();
    }

    pool.close().await;
    Ok(())
}
