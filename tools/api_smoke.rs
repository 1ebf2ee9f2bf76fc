//! Hits the read endpoints of a running server and prints what came back.
//! Usage: api_smoke [BASE_URL] (default http://localhost:3000/api)

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::env;

const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";

async fn get_json(client: &Client, url: &str) -> Result<Value> {
    client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to call {}", url))?
        .error_for_status()
        .with_context(|| format!("{} returned an error status", url))?
        .json()
        .await
        .with_context(|| format!("Failed to parse response from {}", url))
}

fn count(value: &Value) -> usize {
    value.as_array().map(|a| a.len()).unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let base = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let base = base.trim_end_matches('/');
    let client = Client::new();

    println!("Testing API endpoints at {}", base);

    let data = get_json(&client, &format!("{}/data", base)).await?;
    println!(
        "data: {} movies, {} genres, {} directors",
        count(&data["movies"]),
        count(&data["genres"]),
        count(&data["directors"])
    );

    let movies = get_json(&client, &format!("{}/movies", base)).await?;
    println!("movies: {}", count(&movies));

    let genres = get_json(&client, &format!("{}/genres", base)).await?;
    println!("genres: {}", count(&genres));

    let directors = get_json(&client, &format!("{}/directors", base)).await?;
    println!("directors: {}", count(&directors));

    if let Some(id) = movies.get(0).and_then(|m| m["id"].as_str()) {
        let url = format!("{}/movies/{}", base, urlencoding::encode(id));
        let movie = get_json(&client, &url).await?;
        println!("movie {}: {}", id, movie["title"].as_str().unwrap_or("<untitled>"));
    }

    println!("All endpoints responded");
    Ok(())
}
