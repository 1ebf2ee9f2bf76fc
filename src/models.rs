use chrono::{DateTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::Collection;

pub const MIN_RATING: f64 = 0.0;
pub const MAX_RATING: f64 = 10.0;

/// Current time at the precision timestamps are stored with.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Shared behaviour of the three catalog records.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;
    /// Capitalized name used in response messages ("Movie not found").
    const NOUN: &'static str;

    fn id(&self) -> &str;
    fn validate(&self) -> Result<(), ValidationError>;
    fn timestamps_mut(&mut self) -> (&mut Option<DateTime<Utc>>, &mut Option<DateTime<Utc>>);

    fn stamp(&mut self, now: DateTime<Utc>) {
        let (created, updated) = self.timestamps_mut();
        if created.is_none() {
            *created = Some(now);
        }
        *updated = Some(now);
    }

    fn without_timestamps(mut self) -> Self {
        let (created, updated) = self.timestamps_mut();
        *created = None;
        *updated = None;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub id: String,
    pub title: String,
    pub description: String,
    pub release_year: i32,
    pub rating: f64,
    pub genre_id: String,
    pub director_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genre {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Titles of the movies filed under this genre. Maintained by the catalog.
    #[serde(default)]
    pub movies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Director {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biography: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Whole catalog in one document. Used by `/api/data` and as the seed file format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub movies: Vec<Movie>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub directors: Vec<Director>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoviePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub release_year: Option<i32>,
    pub rating: Option<f64>,
    pub genre_id: Option<String>,
    pub director_id: Option<String>,
    pub url: Option<String>,
    pub poster_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenrePatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectorPatch {
    pub name: Option<String>,
    pub biography: Option<String>,
    pub url: Option<String>,
}

impl Movie {
    pub fn apply(&mut self, patch: MoviePatch) {
        let MoviePatch {
            title,
            description,
            release_year,
            rating,
            genre_id,
            director_id,
            url,
            poster_url,
        } = patch;
        if let Some(v) = title {
            self.title = v;
        }
        if let Some(v) = description {
            self.description = v;
        }
        if let Some(v) = release_year {
            self.release_year = v;
        }
        if let Some(v) = rating {
            self.rating = v;
        }
        if let Some(v) = genre_id {
            self.genre_id = v;
        }
        if let Some(v) = director_id {
            self.director_id = v;
        }
        if url.is_some() {
            self.url = url;
        }
        if poster_url.is_some() {
            self.poster_url = poster_url;
        }
    }
}

impl Genre {
    pub fn apply(&mut self, patch: GenrePatch) {
        if let Some(v) = patch.name {
            self.name = v;
        }
        if patch.description.is_some() {
            self.description = patch.description;
        }
    }
}

impl Director {
    pub fn apply(&mut self, patch: DirectorPatch) {
        if let Some(v) = patch.name {
            self.name = v;
        }
        if patch.biography.is_some() {
            self.biography = patch.biography;
        }
        if patch.url.is_some() {
            self.url = patch.url;
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError(format!("{field} is required")));
    }
    Ok(())
}

impl Record for Movie {
    const COLLECTION: Collection = Collection::Movies;
    const NOUN: &'static str = "Movie";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require("id", &self.id)?;
        require("title", &self.title)?;
        require("description", &self.description)?;
        require("genreId", &self.genre_id)?;
        require("directorId", &self.director_id)?;
        if !self.rating.is_finite() || !(MIN_RATING..=MAX_RATING).contains(&self.rating) {
            return Err(ValidationError(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}"
            )));
        }
        Ok(())
    }

    fn timestamps_mut(&mut self) -> (&mut Option<DateTime<Utc>>, &mut Option<DateTime<Utc>>) {
        (&mut self.created_at, &mut self.updated_at)
    }
}

impl Record for Genre {
    const COLLECTION: Collection = Collection::Genres;
    const NOUN: &'static str = "Genre";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require("id", &self.id)?;
        require("name", &self.name)
    }

    fn timestamps_mut(&mut self) -> (&mut Option<DateTime<Utc>>, &mut Option<DateTime<Utc>>) {
        (&mut self.created_at, &mut self.updated_at)
    }
}

impl Record for Director {
    const COLLECTION: Collection = Collection::Directors;
    const NOUN: &'static str = "Director";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require("id", &self.id)?;
        require("name", &self.name)
    }

    fn timestamps_mut(&mut self) -> (&mut Option<DateTime<Utc>>, &mut Option<DateTime<Utc>>) {
        (&mut self.created_at, &mut self.updated_at)
    }
}

/// RFC 3339 with fixed millisecond precision so stored values sort as strings.
mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn movie() -> Movie {
        serde_json::from_value(json!({
            "id": "1",
            "title": "Inception",
            "description": "Dreams within dreams",
            "releaseYear": 2010,
            "rating": 8.8,
            "genreId": "g1",
            "directorId": "d1"
        }))
        .unwrap()
    }

    #[test]
    fn deserializes_camel_case_with_optional_fields_missing() {
        let m = movie();
        assert_eq!(m.release_year, 2010);
        assert_eq!(m.genre_id, "g1");
        assert!(m.poster_url.is_none());
        assert!(m.created_at.is_none());
    }

    #[test]
    fn rejects_rating_out_of_range() {
        let mut m = movie();
        m.rating = 10.5;
        assert!(m.validate().is_err());
        m.rating = f64::NAN;
        assert!(m.validate().is_err());
        m.rating = 0.0;
        assert!(m.validate().is_ok());
        m.rating = 10.0;
        assert!(m.validate().is_ok());
    }

    #[test]
    fn rejects_blank_required_fields() {
        let mut m = movie();
        m.title = "  ".to_string();
        assert_eq!(
            m.validate(),
            Err(ValidationError("title is required".to_string()))
        );
    }

    #[test]
    fn patch_only_touches_provided_fields() {
        let mut m = movie();
        m.apply(MoviePatch {
            rating: Some(9.0),
            poster_url: Some("https://image.tmdb.org/p.jpg".to_string()),
            ..Default::default()
        });
        assert_eq!(m.rating, 9.0);
        assert_eq!(m.title, "Inception");
        assert_eq!(m.poster_url.as_deref(), Some("https://image.tmdb.org/p.jpg"));
    }

    #[test]
    fn stamp_keeps_created_and_moves_updated() {
        let mut m = movie();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        m.stamp(t0);
        m.stamp(t1);
        assert_eq!(m.created_at, Some(t0));
        assert_eq!(m.updated_at, Some(t1));
    }

    #[test]
    fn timestamps_serialize_with_millisecond_precision() {
        let mut m = movie();
        m.stamp(Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap());
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["createdAt"], json!("2024-01-01T12:30:00.000Z"));
        let back: Movie = serde_json::from_value(v).unwrap();
        assert_eq!(back.created_at, m.created_at);
    }

    #[test]
    fn genre_movies_default_to_empty() {
        let g: Genre = serde_json::from_value(json!({"id": "g1", "name": "Drama"})).unwrap();
        assert!(g.movies.is_empty());
    }
}
