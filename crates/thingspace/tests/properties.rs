//! # Property-Based Tests
//!
//! Round trips through the binary, JSON and redaction paths, identity
//! hashing, and compatibility between two versions of a schema.

use std::sync::Arc;

use proptest::collection::vec;
use proptest::option;
use proptest::prelude::*;
use thingspace::codec::{compress, uncompress};
use thingspace::json::{self, JsonOptions};
use thingspace::{
    EncodeOptions, EnumValue, Equality, FieldDef, FieldKind, KeyedRedactor, Schema, Thing, ThingBuilder, Value,
    decode_snapshot, encode_snapshot,
};

// =============================================================================
// FIXTURES
// =============================================================================

fn schema_v1() -> Arc<Schema> {
    Arc::new(
        Schema::builder()
            .enumeration("Mood", [(1, "CALM"), (2, "BUSY")])
            .thing("Pet", |t| t
                .field(FieldDef::text("name", 1).identifying())
                .field(FieldDef::int("age", 2)))
            .thing("Person", |t| t
                .field(FieldDef::int("id", 1).identifying())
                .field(FieldDef::text("name", 2))
                .field(FieldDef::text("email", 3).dangerous())
                .field(FieldDef::double("score", 4))
                .field(FieldDef::boolean("active", 5))
                .field(FieldDef::enumeration("mood", "Mood", 6))
                .field(FieldDef::list("tags", FieldKind::Text, 7))
                .field(FieldDef::map("counts", FieldKind::Int, 8))
                .field(FieldDef::thing("pet", "Pet", 9)))
            .build()
            .expect("valid schema"),
    )
}

/// Adds two trailing fields to Person.
fn schema_v2() -> Arc<Schema> {
    Arc::new(
        Schema::builder()
            .enumeration("Mood", [(1, "CALM"), (2, "BUSY")])
            .thing("Pet", |t| t
                .field(FieldDef::text("name", 1).identifying())
                .field(FieldDef::int("age", 2)))
            .thing("Person", |t| t
                .field(FieldDef::int("id", 1).identifying())
                .field(FieldDef::text("name", 2))
                .field(FieldDef::text("email", 3).dangerous())
                .field(FieldDef::double("score", 4))
                .field(FieldDef::boolean("active", 5))
                .field(FieldDef::enumeration("mood", "Mood", 6))
                .field(FieldDef::list("tags", FieldKind::Text, 7))
                .field(FieldDef::map("counts", FieldKind::Int, 8))
                .field(FieldDef::thing("pet", "Pet", 9))
                .field(FieldDef::text("nickname", 10))
                .field(FieldDef::list("scores", FieldKind::Int, 11)))
            .build()
            .expect("valid schema"),
    )
}

/// Absent, null or a value.
type Slot<T> = Option<Option<T>>;

fn slot<S: Strategy>(strategy: S) -> impl Strategy<Value = Slot<S::Value>> {
    option::of(option::of(strategy))
}

fn apply(builder: ThingBuilder, name: &str, slot: Slot<Value>) -> ThingBuilder {
    match slot {
        None => builder,
        Some(None) => builder.set_null(name),
        Some(Some(value)) => builder.set(name, value),
    }
}

/// Doubles that print and parse back exactly.
fn double() -> impl Strategy<Value = f64> {
    (-1_000_000i64..1_000_000).prop_map(|n| n as f64 / 4.0)
}

fn mood() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Enum(EnumValue::known(1, "CALM"))),
        Just(Value::Enum(EnumValue::known(2, "BUSY"))),
    ]
}

fn tags() -> impl Strategy<Value = Value> {
    vec(option::of("[a-z]{0,8}"), 0..5)
        .prop_map(|items| Value::List(items.into_iter().map(|item| item.map(Value::from)).collect()))
}

fn counts() -> impl Strategy<Value = Value> {
    proptest::collection::btree_map("[a-z]{1,4}", option::of(any::<i64>()), 0..4)
        .prop_map(|entries| Value::Map(entries.into_iter().map(|(k, v)| (k, v.map(Value::from))).collect()))
}

#[derive(Debug, Clone)]
struct PersonInput {
    id: i64,
    name: Slot<String>,
    email: Slot<String>,
    score: Slot<f64>,
    active: Slot<bool>,
    mood: Slot<Value>,
    tags: Slot<Value>,
    counts: Slot<Value>,
    pet: Slot<(String, Option<i64>)>,
}

fn person_input() -> impl Strategy<Value = PersonInput> {
    (
        any::<i64>(),
        slot("\\PC{0,12}"),
        slot("[a-z]{1,6}@[a-z]{1,6}\\.org"),
        slot(double()),
        slot(any::<bool>()),
        slot(mood()),
        slot(tags()),
        slot(counts()),
        slot(("[a-z]{1,6}", option::of(0i64..30))),
    )
        .prop_map(|(id, name, email, score, active, mood, tags, counts, pet)| PersonInput {
            id,
            name,
            email,
            score,
            active,
            mood,
            tags,
            counts,
            pet,
        })
}

fn person(schema: &Schema, input: &PersonInput) -> Thing {
    let pet = input.pet.clone().map(|pet| {
        pet.map(|(name, age)| {
            let builder = schema.builder_for("Pet").expect("Pet type").set("name", name);
            let builder = match age {
                Some(age) => builder.set("age", age),
                None => builder,
            };
            Value::Thing(builder.build())
        })
    });

    let builder = schema
        .builder_for("Person")
        .expect("Person type")
        .set("id", input.id);
    let builder = apply(builder, "name", input.name.clone().map(|v| v.map(Value::from)));
    let builder = apply(builder, "email", input.email.clone().map(|v| v.map(Value::from)));
    let builder = apply(builder, "score", input.score.map(|v| v.map(Value::from)));
    let builder = apply(builder, "active", input.active.map(|v| v.map(Value::from)));
    let builder = apply(builder, "mood", input.mood.clone());
    let builder = apply(builder, "tags", input.tags.clone());
    let builder = apply(builder, "counts", input.counts.clone());
    apply(builder, "pet", pet).build()
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Identity projection is idempotent and drives the idkey.
    #[test]
    fn identity_is_idempotent(input in person_input()) {
        let schema = schema_v1();
        let thing = person(&schema, &input);
        let identity = thing.identity();

        prop_assert_eq!(identity.identity(), identity.clone());
        prop_assert_eq!(identity.idkey(), thing.idkey());
        prop_assert!(identity.equals(&thing, Equality::Identity));
    }

    /// Things differing only in non-identifying fields share an idkey.
    #[test]
    fn idkey_ignores_state(a in person_input(), b in person_input()) {
        let schema = schema_v1();
        let b = PersonInput { id: a.id, ..b };
        prop_assert_eq!(person(&schema, &a).idkey(), person(&schema, &b).idkey());
    }

    /// Distinct identifying values give distinct idkeys.
    #[test]
    fn idkey_separates_identities(input in person_input(), other in any::<i64>()) {
        prop_assume!(other != input.id);
        let schema = schema_v1();
        let a = person(&schema, &input);
        let b = person(&schema, &PersonInput { id: other, ..input.clone() });
        prop_assert_ne!(a.idkey(), b.idkey());
    }

    /// Bare and enveloped binary forms decode to the same Thing.
    #[test]
    fn binary_round_trip(input in person_input(), level in option::of(1i32..6)) {
        let schema = schema_v1();
        let thing = person(&schema, &input);

        let bytes = compress(&thing).expect("encode");
        prop_assert_eq!(uncompress(&schema, "Person", &bytes).expect("decode"), thing.clone());

        let options = EncodeOptions { compression_level: level };
        let snapshot = encode_snapshot(&thing, options).expect("encode snapshot");
        prop_assert_eq!(decode_snapshot(&schema, &snapshot).expect("decode snapshot"), thing);
    }

    /// Decoding preserves the absent/null distinction exactly.
    #[test]
    fn binary_keeps_presence(input in person_input()) {
        let schema = schema_v1();
        let thing = person(&schema, &input);
        let decoded = uncompress(&schema, "Person", &compress(&thing).expect("encode")).expect("decode");
        for name in ["name", "email", "score", "active", "mood", "tags", "counts", "pet"] {
            prop_assert_eq!(decoded.field(name).is_absent(), thing.field(name).is_absent());
            prop_assert_eq!(decoded.field(name).is_null(), thing.field(name).is_null());
        }
    }

    /// Both JSON decoders rebuild the emitted Thing.
    #[test]
    fn json_round_trip(input in person_input()) {
        let schema = schema_v1();
        let thing = person(&schema, &input);
        let emitted = json::to_json(&thing, &JsonOptions::canonical());

        let from_tree = json::from_value(&schema, "Person", &emitted).expect("tree decode");
        let from_text = json::from_str(&schema, "Person", &emitted.to_string()).expect("stream decode");

        prop_assert_eq!(&from_tree, &thing);
        prop_assert_eq!(&from_text, &thing);
        prop_assert_eq!(json::to_json(&from_text, &JsonOptions::canonical()), emitted);
    }

    /// Default emission never carries dangerous values.
    #[test]
    fn json_hides_dangerous(input in person_input()) {
        let schema = schema_v1();
        let thing = person(&schema, &input);
        let emitted = json::to_json(&thing, &JsonOptions::default());
        prop_assert!(emitted.get("email").is_none());
    }

    /// Redaction with the same key is reversible.
    #[test]
    fn redaction_round_trip(input in person_input(), secret in "[a-z]{1,16}") {
        let schema = schema_v1();
        let thing = person(&schema, &input);
        let key = KeyedRedactor::new(&secret);

        let redacted = thing.redact(&key);
        prop_assert_eq!(redacted.get("name"), thing.get("name"));
        prop_assert_eq!(redacted.unredact(&key), thing);
    }

    /// A newer writer's extra fields are skipped by an older reader.
    #[test]
    fn older_reader_skips_new_fields(
        input in person_input(),
        nickname in option::of("[a-z]{0,8}"),
        scores in vec(any::<i64>(), 0..4),
    ) {
        let v1 = schema_v1();
        let v2 = schema_v2();
        let newer = person(&v2, &input)
            .builder()
            .set("nickname", Value::from(nickname.unwrap_or_default()))
            .set("scores", Value::list(scores))
            .build();

        let decoded = uncompress(&v1, "Person", &compress(&newer).expect("encode")).expect("decode");
        prop_assert_eq!(decoded, person(&v1, &input));
    }

    /// An older writer's Things read back with the new fields absent.
    #[test]
    fn newer_reader_sees_missing_fields_absent(input in person_input()) {
        let v1 = schema_v1();
        let v2 = schema_v2();
        let older = person(&v1, &input);

        let decoded = uncompress(&v2, "Person", &compress(&older).expect("encode")).expect("decode");
        prop_assert!(decoded.field("nickname").is_absent());
        prop_assert!(decoded.field("scores").is_absent());
        prop_assert_eq!(decoded, person(&v2, &input));
    }
}
