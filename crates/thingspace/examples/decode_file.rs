//! Simple inspector for thingspace snapshot files.
//!
//! Decodes against a small City schema. Without a path argument a sample
//! snapshot is encoded in memory first.

use std::fs;
use std::sync::Arc;

use thingspace::codec::Reader;
use thingspace::limits::{MAGIC_COMPRESSED, MAX_STRING_LEN};
use thingspace::{EncodeOptions, FieldDef, FieldKind, Schema, Thing, Value, decode_snapshot, encode_snapshot};

fn schema() -> Schema {
    Schema::builder()
        .thing("Country", |t| t
            .field(FieldDef::text("code", 1).identifying())
            .field(FieldDef::text("name", 2)))
        .thing("City", |t| t
            .field(FieldDef::text("name", 1).identifying())
            .field(FieldDef::int("population", 2))
            .field(FieldDef::double("latitude", 3))
            .field(FieldDef::double("longitude", 4))
            .field(FieldDef::map("translations", FieldKind::Text, 5))
            .field(FieldDef::thing("country", "Country", 6)))
        .build()
        .expect("Invalid schema")
}

fn sample(schema: &Schema) -> Vec<u8> {
    let country = schema
        .builder_for("Country")
        .expect("Country type")
        .set("code", "PT")
        .set("name", "Portugal")
        .build();
    let city = schema
        .builder_for("City")
        .expect("City type")
        .set("name", "Lisbon")
        .set("population", 545_000)
        .set("latitude", 38.72)
        .set("longitude", -9.14)
        .set("translations", Value::map([("fr", "Lisbonne"), ("de", "Lissabon")]))
        .set("country", country)
        .build();
    encode_snapshot(&city, EncodeOptions::compressed(3)).expect("Failed to encode")
}

fn format_value(v: &Value) -> String {
    match v {
        Value::Text(s) => {
            let preview: String = s.chars().take(80).collect();
            if s.chars().count() > 80 {
                format!("\"{}...\"", preview)
            } else {
                format!("\"{}\"", preview)
            }
        }
        Value::Int(n) => format!("{}", n),
        Value::Double(x) => format!("{:.6}", x),
        Value::Bool(b) => format!("{}", b),
        Value::Enum(e) => format!("{}({})", e.name(), e.id()),
        Value::Thing(t) => format!("{} {{{} fields}}", t.type_name(), t.declared().count()),
        Value::Unknown(u) => format!("UNKNOWN({})", u.type_name()),
        Value::List(items) => format!("LIST[{}]", items.len()),
        Value::Map(entries) => format!("MAP[{}]", entries.len()),
    }
}

fn print_thing(thing: &Thing, indent: usize) {
    let pad = " ".repeat(indent);
    for (def, field) in thing.declared() {
        match field.value() {
            None => println!("{}{} = null", pad, def.name()),
            Some(Value::Thing(nested)) => {
                println!("{}{} = {}", pad, def.name(), nested.type_name());
                print_thing(nested, indent + 4);
            }
            Some(value) => println!("{}{} = {}", pad, def.name(), format_value(value)),
        }
    }
}

fn main() {
    let schema = Arc::new(schema());

    let data = match std::env::args().nth(1) {
        Some(path) => {
            println!("Reading: {}", path);
            fs::read(&path).expect("Failed to read file")
        }
        None => {
            println!("No file given, using an in-memory sample");
            sample(&schema)
        }
    };
    println!("File size: {} bytes", data.len());

    println!("\n=== Envelope ===");
    if data.starts_with(MAGIC_COMPRESSED) {
        let mut reader = Reader::new(&data[MAGIC_COMPRESSED.len()..]);
        let size = reader.read_varint("uncompressed_size").expect("Failed to read size");
        println!("Compressed: yes (zstd, {} bytes uncompressed)", size);
    } else {
        let mut reader = Reader::new(&data);
        let _magic = reader.read_bytes(4, "magic").expect("Failed to read magic");
        let version = reader.read_byte("version").expect("Failed to read version");
        let type_name = reader.read_string(MAX_STRING_LEN, "type_name").expect("Failed to read type");
        println!("Compressed: no");
        println!("Version: {}", version);
        println!("Type: {}", type_name);
    }

    let thing = decode_snapshot(&schema, &data).expect("Failed to decode");

    println!("\n=== {} ===", thing.type_name());
    if thing.type_def().is_identifiable() {
        println!("Idkey: {}", thing.idkey().to_hex());
    }
    print_thing(&thing, 2);
}
