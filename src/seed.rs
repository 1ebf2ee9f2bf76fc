//! Loads the static catalog files into a store.
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::models::{timestamp_now, CatalogSnapshot, Record};
use crate::store::{to_document, DocumentStore};

pub const DEFAULT_PRIMARY: &str = "public/data.json";
pub const DEFAULT_EXTRAS: [&str; 2] = ["src/app/data/movies.json", "src/data/genres.json"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub movies: usize,
    pub genres: usize,
    pub directors: usize,
}

impl fmt::Display for SeedSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} movies, {} genres, {} directors",
            self.movies, self.genres, self.directors
        )
    }
}

impl From<&CatalogSnapshot> for SeedSummary {
    fn from(snapshot: &CatalogSnapshot) -> Self {
        Self {
            movies: snapshot.movies.len(),
            genres: snapshot.genres.len(),
            directors: snapshot.directors.len(),
        }
    }
}

pub fn read_snapshot(path: &Path) -> Result<CatalogSnapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Reads the primary file (required) followed by every extra file that exists.
pub fn load_sources(primary: &Path, extras: &[PathBuf]) -> Result<Vec<CatalogSnapshot>> {
    let mut sources = vec![read_snapshot(primary)?];
    info!("Loaded {}", primary.display());
    for extra in extras {
        if !extra.exists() {
            info!("Skipping {} (not found)", extra.display());
            continue;
        }
        sources.push(read_snapshot(extra)?);
        info!("Loaded {}", extra.display());
    }
    Ok(sources)
}

fn dedupe<T: Record>(records: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| {
            if let Err(e) = r.validate() {
                warn!("Skipping {} '{}': {}", T::NOUN, r.id(), e);
                return false;
            }
            seen.insert(r.id().to_string())
        })
        .collect()
}

/// Concatenates the sources in order. The first record seen for an id wins.
/// Genre title lists are rebuilt from the merged movies.
pub fn merge(sources: impl IntoIterator<Item = CatalogSnapshot>) -> CatalogSnapshot {
    let mut all = CatalogSnapshot::default();
    for source in sources {
        all.movies.extend(source.movies);
        all.genres.extend(source.genres);
        all.directors.extend(source.directors);
    }
    let mut merged = CatalogSnapshot {
        movies: dedupe(all.movies),
        genres: dedupe(all.genres),
        directors: dedupe(all.directors),
    };
    derive_genre_titles(&mut merged);
    merged
}

pub fn derive_genre_titles(snapshot: &mut CatalogSnapshot) {
    for genre in &mut snapshot.genres {
        genre.movies = snapshot
            .movies
            .iter()
            .filter(|m| m.genre_id == genre.id)
            .map(|m| m.title.clone())
            .collect();
    }
}

async fn replace<T: Record>(store: &dyn DocumentStore, records: Vec<T>) -> Result<usize> {
    let now = timestamp_now();
    let docs = records
        .into_iter()
        .map(|mut r| {
            r.stamp(now);
            to_document(&r)
        })
        .collect::<Result<Vec<_>>>()?;
    let inserted = store
        .replace_all(T::COLLECTION, docs)
        .await
        .with_context(|| format!("Failed to seed {}", T::COLLECTION.name()))?;
    info!("Seeded {} {}", inserted, T::COLLECTION.name());
    Ok(inserted)
}

/// Clears and refills directors, genres and movies, in that order.
pub async fn seed_store(store: &dyn DocumentStore, snapshot: CatalogSnapshot) -> Result<SeedSummary> {
    let CatalogSnapshot {
        movies,
        genres,
        directors,
    } = snapshot;
    let directors = replace(store, directors).await?;
    let genres = replace(store, genres).await?;
    let movies = replace(store, movies).await?;
    Ok(SeedSummary {
        movies,
        genres,
        directors,
    })
}
