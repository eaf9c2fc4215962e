//! Benchmark for thingspace using city data.
//!
//! Loads cities from a JSON file (or synthesizes them), imprints them into
//! a Space, settles, and compares JSON, binary and compressed snapshot sizes
//! and timings.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use thingspace::codec::{compress, uncompress};
use thingspace::json::{self, JsonOptions};
use thingspace::{
    Derivation, EncodeOptions, FieldDef, FieldKind, Schema, Space, Thing, Value, decode_snapshot, encode_snapshot,
};
use tracing_subscriber::EnvFilter;

// =============================================================================
// JSON DATA STRUCTURES
// =============================================================================

#[derive(Debug, Deserialize)]
struct City {
    id: u32,
    name: String,
    state_id: u32,
    state_code: String,
    state_name: String,
    country_code: String,
    country_name: String,
    latitude: String,
    longitude: String,
    native: Option<String>,
    population: Option<i64>,
    timezone: Option<String>,
    translations: Option<HashMap<String, String>>,
    #[serde(rename = "wikiDataId")]
    wikidata_id: Option<String>,
}

const SYNTHETIC_CITIES: u32 = 20_000;

/// Deterministic stand-in for the cities data set.
fn synthesize(count: u32) -> Vec<City> {
    (0..count)
        .map(|i| {
            let country = i % 40;
            let state = i % 400;
            City {
                id: i,
                name: format!("City {i}"),
                state_id: state,
                state_code: format!("S{state}"),
                state_name: format!("State {state}"),
                country_code: format!("C{country:02}"),
                country_name: format!("Country {country}"),
                latitude: format!("{:.5}", (i as f64 * 0.37) % 180.0 - 90.0),
                longitude: format!("{:.5}", (i as f64 * 0.73) % 360.0 - 180.0),
                native: (i % 3 == 0).then(|| format!("Cidade {i}")),
                population: (i % 5 != 0).then_some(i as i64 * 97),
                timezone: Some(format!("Zone/{}", country)),
                translations: (i % 7 == 0).then(|| HashMap::from([("fr".to_string(), format!("Ville {i}"))])),
                wikidata_id: Some(format!("Q{}", 1000 + i)),
            }
        })
        .collect()
}

// =============================================================================
// SCHEMA AND CONVERSION
// =============================================================================

fn schema() -> Schema {
    Schema::builder()
        .thing("Country", |t| t
            .field(FieldDef::text("code", 1).identifying())
            .field(FieldDef::text("name", 2)))
        .thing("State", |t| t
            .field(FieldDef::int("id", 1).identifying())
            .field(FieldDef::text("code", 2))
            .field(FieldDef::text("name", 3))
            .field(FieldDef::thing("country", "Country", 4)))
        .thing("City", |t| t
            .field(FieldDef::int("id", 1).identifying())
            .field(FieldDef::text("name", 2))
            .field(FieldDef::text("native", 3))
            .field(FieldDef::text("display_name", 4).derived(Derivation::first_available(["native", "name"])))
            .field(FieldDef::int("population", 5))
            .field(FieldDef::double("latitude", 6))
            .field(FieldDef::double("longitude", 7))
            .field(FieldDef::text("timezone", 8))
            .field(FieldDef::map("translations", FieldKind::Text, 9))
            .field(FieldDef::text("wikidata_id", 10))
            .field(FieldDef::thing("state", "State", 11)))
        .build()
        .expect("Invalid schema")
}

fn build_city(schema: &Schema, city: &City) -> Thing {
    let country = schema
        .builder_for("Country")
        .expect("Country type")
        .set("code", city.country_code.as_str())
        .set("name", city.country_name.as_str())
        .build();
    let state = schema
        .builder_for("State")
        .expect("State type")
        .set("id", i64::from(city.state_id))
        .set("code", city.state_code.as_str())
        .set("name", city.state_name.as_str())
        .set("country", country)
        .build();

    let mut builder = schema
        .builder_for("City")
        .expect("City type")
        .set("id", i64::from(city.id))
        .set("name", city.name.as_str())
        .set("state", state);

    if let Some(native) = city.native.as_deref().filter(|n| !n.is_empty()) {
        builder = builder.set("native", native);
    }
    builder = match city.population {
        Some(population) => builder.set("population", population),
        None => builder.set_null("population"),
    };
    if let (Ok(lat), Ok(lon)) = (city.latitude.parse::<f64>(), city.longitude.parse::<f64>()) {
        builder = builder.set("latitude", lat).set("longitude", lon);
    }
    if let Some(tz) = &city.timezone {
        builder = builder.set("timezone", tz.as_str());
    }
    if let Some(wiki_id) = &city.wikidata_id {
        builder = builder.set("wikidata_id", wiki_id.as_str());
    }
    if let Some(translations) = &city.translations {
        builder = builder.set("translations", Value::map(translations.iter().map(|(k, v)| (k.as_str(), v.as_str()))));
    }
    builder.build()
}

fn mb(bytes: usize) -> f64 {
    bytes as f64 / 1_000_000.0
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cities = match std::env::args().nth(1) {
        Some(path) if Path::new(&path).exists() => {
            println!("Loading cities from: {}", path);
            let json_data = fs::read_to_string(&path).expect("Failed to read cities file");
            let parse_start = Instant::now();
            let cities: Vec<City> = serde_json::from_str(&json_data).expect("Failed to parse JSON");
            println!("Loaded {} cities in {:?}", cities.len(), parse_start.elapsed());
            cities
        }
        _ => {
            println!("Synthesizing {} cities", SYNTHETIC_CITIES);
            synthesize(SYNTHETIC_CITIES)
        }
    };

    let schema = Arc::new(schema());

    // Build Things
    let convert_start = Instant::now();
    let things: Vec<Thing> = cities.iter().map(|c| build_city(&schema, c)).collect();
    println!("\nBuilt {} Things in {:?}", things.len(), convert_start.elapsed());

    // Imprint and settle
    let imprint_start = Instant::now();
    let mut space = Space::new(schema.clone());
    for thing in &things {
        let id = space.imprint(thing, None).expect("Failed to imprint");
        space.retain(id).expect("Failed to retain");
    }
    let imprint_time = imprint_start.elapsed();
    let settle_start = Instant::now();
    let diff = space.settle().expect("Failed to settle");
    println!(
        "Imprinted in {:?}, settled {} changes in {:?}",
        imprint_time,
        diff.len(),
        settle_start.elapsed()
    );
    println!(
        "  - {} nodes ({} cities, {} states, {} countries)",
        space.len(),
        space.live("City").len(),
        space.live("State").len(),
        space.live("Country").len()
    );

    // JSON
    let json_start = Instant::now();
    let json_docs: Vec<String> = things
        .iter()
        .map(|t| json::to_json(t, &JsonOptions::default()).to_string())
        .collect();
    let json_time = json_start.elapsed();
    let json_size: usize = json_docs.iter().map(String::len).sum();
    println!("\nJSON: {} bytes in {:?}", json_size, json_time);

    let json_decode_start = Instant::now();
    for doc in &json_docs {
        json::from_str(&schema, "City", doc).expect("Failed to decode JSON");
    }
    println!("  Streaming decode: {:?}", json_decode_start.elapsed());

    // Binary
    let encode_start = Instant::now();
    let encoded: Vec<Vec<u8>> = things.iter().map(|t| compress(t).expect("Failed to encode")).collect();
    let encode_time = encode_start.elapsed();
    let binary_size: usize = encoded.iter().map(Vec::len).sum();
    println!("\nBinary: {} bytes in {:?}", binary_size, encode_time);
    println!("  Throughput: {:.2} MB/s", mb(binary_size) / encode_time.as_secs_f64());

    let decode_start = Instant::now();
    for (bytes, original) in encoded.iter().zip(&things) {
        let decoded = uncompress(&schema, "City", bytes).expect("Failed to decode");
        assert_eq!(&decoded, original);
    }
    let decode_time = decode_start.elapsed();
    println!("  Decode: {:?} ({:.2} MB/s)", decode_time, mb(binary_size) / decode_time.as_secs_f64());

    // Compressed snapshots
    let snapshot_start = Instant::now();
    let snapshots: Vec<Vec<u8>> = things
        .iter()
        .map(|t| encode_snapshot(t, EncodeOptions::compressed(3)).expect("Failed to compress"))
        .collect();
    let snapshot_time = snapshot_start.elapsed();
    let snapshot_size: usize = snapshots.iter().map(Vec::len).sum();
    println!("\nSnapshots (zstd level 3): {} bytes in {:?}", snapshot_size, snapshot_time);

    let restore_start = Instant::now();
    for snapshot in &snapshots {
        decode_snapshot(&schema, snapshot).expect("Failed to decode snapshot");
    }
    println!("  Decode: {:?}", restore_start.elapsed());

    // Summary
    println!("\n=== Summary ===");
    println!("Cities: {}", things.len());
    println!("JSON size: {} bytes ({:.1} MB)", json_size, mb(json_size));
    println!("Binary size: {} bytes ({:.1} MB)", binary_size, mb(binary_size));
    println!("Snapshot size: {} bytes ({:.1} MB)", snapshot_size, mb(snapshot_size));
    println!(
        "Size vs JSON: {:.1}% (binary), {:.1}% (snapshots)",
        100.0 * binary_size as f64 / json_size as f64,
        100.0 * snapshot_size as f64 / json_size as f64
    );
}
