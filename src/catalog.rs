use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{
    timestamp_now, CatalogSnapshot, Director, DirectorPatch, Genre, GenrePatch, Movie, MoviePatch, Record,
    ValidationError,
};
use crate::query::{self, MovieQuery};
use crate::store::{
    from_document, to_document, Collection, Document, DocumentStore, SortBy, StoreError,
};

const MOVIE_ORDER: SortBy = SortBy::desc("createdAt");
const NAME_ORDER: SortBy = SortBy::asc("name");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { collection, id } => {
                CatalogError::Conflict(format!("A record with id '{id}' already exists in {collection}"))
            }
            StoreError::Backend(e) => CatalogError::Store(e),
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Typed catalog operations on top of a document store.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn DocumentStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    // ---- movies ----

    pub async fn list_movies(&self) -> CatalogResult<Vec<Movie>> {
        self.all(MOVIE_ORDER).await
    }

    pub async fn get_movie(&self, id: &str) -> CatalogResult<Movie> {
        self.get(id).await
    }

    pub async fn create_movie(&self, movie: Movie) -> CatalogResult<Movie> {
        movie.validate()?;
        self.check_references(&movie).await?;
        let created = self.insert(movie).await?;
        self.refresh_genre_titles(&created.genre_id).await?;
        info!("Created movie '{}' ({})", created.title, created.id);
        Ok(created)
    }

    pub async fn update_movie(&self, id: &str, patch: MoviePatch) -> CatalogResult<Movie> {
        let current: Movie = self.get(id).await?;
        let previous_genre = current.genre_id.clone();
        let mut movie = current.clone();
        movie.apply(patch);
        movie.validate()?;
        self.check_references(&movie).await?;
        let updated = self.save(&current, movie).await?;
        self.refresh_genre_titles(&updated.genre_id).await?;
        if previous_genre != updated.genre_id {
            self.refresh_genre_titles(&previous_genre).await?;
        }
        info!("Updated movie '{}' ({})", updated.title, updated.id);
        Ok(updated)
    }

    pub async fn delete_movie(&self, id: &str) -> CatalogResult<Movie> {
        let removed: Movie = self.remove(id).await?;
        self.refresh_genre_titles(&removed.genre_id).await?;
        info!("Deleted movie '{}' ({})", removed.title, removed.id);
        Ok(removed)
    }

    pub async fn search_movies(&self, query: &MovieQuery) -> CatalogResult<Vec<Movie>> {
        let (movies, genres) = tokio::try_join!(self.list_movies(), self.list_genres())?;
        Ok(query.apply(movies, &genres))
    }

    pub async fn top_rated(&self, limit: usize) -> CatalogResult<Vec<Movie>> {
        Ok(query::top_rated(self.list_movies().await?, limit))
    }

    pub async fn related_movies(&self, id: &str, limit: usize) -> CatalogResult<Vec<Movie>> {
        let movie = self.get_movie(id).await?;
        Ok(query::related(&movie, self.list_movies().await?, limit))
    }

    // ---- genres ----

    pub async fn list_genres(&self) -> CatalogResult<Vec<Genre>> {
        self.all(NAME_ORDER).await
    }

    pub async fn get_genre(&self, id: &str) -> CatalogResult<Genre> {
        self.get(id).await
    }

    pub async fn create_genre(&self, mut genre: Genre) -> CatalogResult<Genre> {
        genre.validate()?;
        genre.movies = self
            .movies_where("genreId", &genre.id)
            .await?
            .into_iter()
            .map(|m| m.title)
            .collect();
        let created = self.insert(genre).await?;
        info!("Created genre '{}' ({})", created.name, created.id);
        Ok(created)
    }

    pub async fn update_genre(&self, id: &str, patch: GenrePatch) -> CatalogResult<Genre> {
        let current: Genre = self.get(id).await?;
        let mut genre = current.clone();
        genre.apply(patch);
        let updated = self.save(&current, genre).await?;
        info!("Updated genre '{}' ({})", updated.name, updated.id);
        Ok(updated)
    }

    pub async fn delete_genre(&self, id: &str) -> CatalogResult<Genre> {
        self.ensure_unreferenced::<Genre>("genreId", id).await?;
        let removed: Genre = self.remove(id).await?;
        info!("Deleted genre '{}' ({})", removed.name, removed.id);
        Ok(removed)
    }

    pub async fn movies_in_genre(&self, id: &str) -> CatalogResult<Vec<Movie>> {
        self.get_genre(id).await?;
        self.movies_where("genreId", id).await
    }

    // ---- directors ----

    pub async fn list_directors(&self) -> CatalogResult<Vec<Director>> {
        self.all(NAME_ORDER).await
    }

    pub async fn get_director(&self, id: &str) -> CatalogResult<Director> {
        self.get(id).await
    }

    pub async fn create_director(&self, director: Director) -> CatalogResult<Director> {
        director.validate()?;
        let created = self.insert(director).await?;
        info!("Created director '{}' ({})", created.name, created.id);
        Ok(created)
    }

    pub async fn update_director(&self, id: &str, patch: DirectorPatch) -> CatalogResult<Director> {
        let current: Director = self.get(id).await?;
        let mut director = current.clone();
        director.apply(patch);
        let updated = self.save(&current, director).await?;
        info!("Updated director '{}' ({})", updated.name, updated.id);
        Ok(updated)
    }

    pub async fn delete_director(&self, id: &str) -> CatalogResult<Director> {
        self.ensure_unreferenced::<Director>("directorId", id).await?;
        let removed: Director = self.remove(id).await?;
        info!("Deleted director '{}' ({})", removed.name, removed.id);
        Ok(removed)
    }

    pub async fn movies_by_director(&self, id: &str) -> CatalogResult<Vec<Movie>> {
        self.get_director(id).await?;
        self.movies_where("directorId", id).await
    }

    /// Every record, timestamps stripped.
    pub async fn snapshot(&self) -> CatalogResult<CatalogSnapshot> {
        let (movies, genres, directors) = tokio::try_join!(
            self.list_movies(),
            self.list_genres(),
            self.list_directors()
        )?;
        Ok(CatalogSnapshot {
            movies: movies.into_iter().map(Record::without_timestamps).collect(),
            genres: genres.into_iter().map(Record::without_timestamps).collect(),
            directors: directors
                .into_iter()
                .map(Record::without_timestamps)
                .collect(),
        })
    }

    // ---- helpers ----

    async fn all<T: Record>(&self, sort: SortBy) -> CatalogResult<Vec<T>> {
        self.store
            .find_all(T::COLLECTION, sort)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    async fn get<T: Record>(&self, id: &str) -> CatalogResult<T> {
        match self.store.find_one(T::COLLECTION, "id", id).await? {
            Some(doc) => decode(doc),
            None => Err(CatalogError::NotFound(T::NOUN)),
        }
    }

    async fn exists<T: Record>(&self, id: &str) -> CatalogResult<bool> {
        Ok(self.store.find_one(T::COLLECTION, "id", id).await?.is_some())
    }

    async fn insert<T: Record>(&self, record: T) -> CatalogResult<T> {
        let mut record = record.without_timestamps();
        record.stamp(timestamp_now());
        self.store
            .insert_one(T::COLLECTION, to_document(&record)?)
            .await?;
        Ok(record)
    }

    /// Writes only the fields that differ from `current`, so maintained
    /// fields such as the genre title list are never written back stale.
    async fn save<T: Record>(&self, current: &T, mut record: T) -> CatalogResult<T> {
        record.validate()?;
        record.stamp(timestamp_now());
        let before = to_document(current)?;
        let mut changes = to_document(&record)?;
        changes.retain(|field, value| field == "updatedAt" || before.get(field) != Some(value));
        match self.store.update_one(T::COLLECTION, current.id(), changes).await? {
            Some(doc) => decode(doc),
            None => Err(CatalogError::NotFound(T::NOUN)),
        }
    }

    async fn remove<T: Record>(&self, id: &str) -> CatalogResult<T> {
        match self.store.delete_one(T::COLLECTION, id).await? {
            Some(doc) => decode(doc),
            None => Err(CatalogError::NotFound(T::NOUN)),
        }
    }

    /// Movies matching `field == value`, in listing order.
    async fn movies_where(&self, field: &str, value: &str) -> CatalogResult<Vec<Movie>> {
        let mut movies: Vec<Movie> = self
            .store
            .find_many(Collection::Movies, field, value)
            .await?
            .into_iter()
            .map(decode)
            .collect::<CatalogResult<_>>()?;
        movies.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(movies)
    }

    async fn check_references(&self, movie: &Movie) -> CatalogResult<()> {
        if !self.exists::<Genre>(&movie.genre_id).await? {
            return Err(ValidationError(format!("Unknown genreId '{}'", movie.genre_id)).into());
        }
        if !self.exists::<Director>(&movie.director_id).await? {
            return Err(
                ValidationError(format!("Unknown directorId '{}'", movie.director_id)).into(),
            );
        }
        Ok(())
    }

    async fn ensure_unreferenced<T: Record>(&self, field: &str, id: &str) -> CatalogResult<()> {
        let count = self
            .store
            .find_many(Collection::Movies, field, id)
            .await?
            .len();
        if count > 0 {
            return Err(CatalogError::Conflict(format!(
                "{} '{}' is still referenced by {} movie(s)",
                T::NOUN,
                id,
                count
            )));
        }
        Ok(())
    }

    /// Recomputes the cached title list of a genre. Missing genres are ignored.
    async fn refresh_genre_titles(&self, genre_id: &str) -> CatalogResult<()> {
        let titles: Vec<Value> = self
            .movies_where("genreId", genre_id)
            .await?
            .into_iter()
            .map(|m| Value::String(m.title))
            .collect();
        debug!("Genre {} now lists {} movie(s)", genre_id, titles.len());
        let mut set = Document::new();
        set.insert("movies".to_string(), json!(titles));
        self.store
            .update_one(Collection::Genres, genre_id, set)
            .await?;
        Ok(())
    }
}

fn decode<T: Record>(doc: Document) -> CatalogResult<T> {
    from_document(doc)
        .map_err(|e| CatalogError::Store(e.context(format!("Malformed {} document", T::NOUN))))
}
