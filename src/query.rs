//! Catalog browsing filters: search, genre, rating and year bounds, sort.
use serde::Deserialize;

use crate::models::{Genre, Movie};

pub const DEFAULT_TOP_RATED: usize = 3;
pub const DEFAULT_RELATED: usize = 2;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MovieSort {
    RatingDesc,
    RatingAsc,
    TitleAsc,
    YearDesc,
    /// Keep listing order (most recently added first).
    Newest,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieQuery {
    pub search: Option<String>,
    /// Genre id or genre name.
    pub genre: Option<String>,
    pub min_rating: Option<f64>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub sort: Option<MovieSort>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    pub fn or(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).min(MAX_LIMIT)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl MovieQuery {
    pub fn is_empty(&self) -> bool {
        non_blank(&self.search).is_none()
            && non_blank(&self.genre).is_none()
            && self.min_rating.is_none()
            && self.year_from.is_none()
            && self.year_to.is_none()
            && self.sort.is_none()
    }

    /// Filters and sorts `movies`, which must be in listing order.
    pub fn apply(&self, movies: Vec<Movie>, genres: &[Genre]) -> Vec<Movie> {
        let search = non_blank(&self.search).map(str::to_lowercase);
        let genre_ids: Option<Vec<&str>> = non_blank(&self.genre).map(|wanted| {
            genres
                .iter()
                .filter(|g| g.id == wanted || g.name.eq_ignore_ascii_case(wanted))
                .map(|g| g.id.as_str())
                .collect()
        });

        let mut out: Vec<Movie> = movies
            .into_iter()
            .filter(|m| {
                search.as_deref().map_or(true, |needle| {
                    m.title.to_lowercase().contains(needle)
                        || m.description.to_lowercase().contains(needle)
                })
            })
            .filter(|m| {
                genre_ids
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&m.genre_id.as_str()))
            })
            .filter(|m| self.min_rating.map_or(true, |min| m.rating >= min))
            .filter(|m| self.year_from.map_or(true, |y| m.release_year >= y))
            .filter(|m| self.year_to.map_or(true, |y| m.release_year <= y))
            .collect();

        let sort = match self.sort {
            Some(sort) => sort,
            None if self.is_empty() => MovieSort::Newest,
            None => MovieSort::RatingDesc,
        };
        sort_movies(&mut out, sort);
        out
    }
}

pub fn sort_movies(movies: &mut [Movie], sort: MovieSort) {
    match sort {
        MovieSort::RatingDesc => movies.sort_by(|a, b| b.rating.total_cmp(&a.rating)),
        MovieSort::RatingAsc => movies.sort_by(|a, b| a.rating.total_cmp(&b.rating)),
        MovieSort::TitleAsc => movies.sort_by_cached_key(|m| m.title.to_lowercase()),
        MovieSort::YearDesc => movies.sort_by(|a, b| b.release_year.cmp(&a.release_year)),
        MovieSort::Newest => {}
    }
}

pub fn top_rated(mut movies: Vec<Movie>, limit: usize) -> Vec<Movie> {
    sort_movies(&mut movies, MovieSort::RatingDesc);
    movies.truncate(limit);
    movies
}

/// Other movies in the same genre, in listing order.
pub fn related(movie: &Movie, movies: Vec<Movie>, limit: usize) -> Vec<Movie> {
    movies
        .into_iter()
        .filter(|m| m.genre_id == movie.genre_id && m.id != movie.id)
        .take(limit)
        .collect()
}
