//! Shared fixture schema for unit tests.

use std::sync::Arc;

use crate::derive::{DeriveContext, Derivation};
use crate::model::{EnumValue, Field, Thing, Value};
use crate::reaction::Trigger;
use crate::schema::{FieldDef, FieldKind, Priority, Schema};

pub(crate) fn schema() -> Arc<Schema> {
    let schema = Schema::builder()
        .thing("Item", |t| t
            .field(FieldDef::text("id", 1).identifying())
            .field(FieldDef::text("val", 2))
            .field(FieldDef::text("derived_first_available", 3).derived(Derivation::first_available(["val", "id"])))
            .field(FieldDef::text("id_derived", 4).derived(Derivation::first_available(["id", "val"])))
            .field(FieldDef::text("secret", 5).dangerous())
            .field(FieldDef::int("count", 6))
            .field(FieldDef::double("score", 7))
            .field(FieldDef::boolean("flag", 8))
            .field(FieldDef::list("tags", FieldKind::Text, 9))
            .field(FieldDef::enumeration("status", "Status", 10))
            .field(FieldDef::thing("author", "Author", 11))
            .field(FieldDef::map("attrs", FieldKind::Int, 12))
            .field(FieldDef::list("related", FieldKind::Thing("Item".into()), 13))
            .field(FieldDef::open("attachment", "Attachment", 14))
            .field(FieldDef::list("notes", FieldKind::Thing("Note".into()), 15)))
        .thing("Author", |t| t
            .field(FieldDef::text("name", 1).identifying())
            .field(FieldDef::text("bio", 2))
            .field(FieldDef::text("email", 3).dangerous()))
        .thing("Note", |t| t
            .field(FieldDef::text("text", 1))
            .field(FieldDef::thing("by", "Author", 2)))
        .thing("Image", |t| t
            .field(FieldDef::text("url", 1).identifying())
            .field(FieldDef::int("width", 2)))
        .thing("Link", |t| t.field(FieldDef::text("href", 1).identifying()))
        .interface("Attachment", ["Image", "Link"])
        .enumeration("Status", [(1, "ACTIVE"), (2, "ARCHIVED")])
        .thing("Badge", |t| t.field(FieldDef::text("code", 1).identifying().dangerous()))
        .thing("A", |t| t
            .field(FieldDef::text("id", 1).identifying())
            .field(FieldDef::text("val", 2)))
        .thing("B", |t| t
            .field(FieldDef::text("id", 1).identifying())
            .field(FieldDef::int("reactive_to_type_field", 2)
                .derived(Derivation::contextual(count_declared_vals))
                .reactive(Trigger::changed(["val"]).on("A"))))
        .thing("Book", |t| t
            .field(FieldDef::text("isbn", 1).identifying())
            .field(FieldDef::text("title", 2)))
        .thing("Shelf", |t| t
            .field(FieldDef::text("id", 1).identifying())
            .field(FieldDef::text("title", 2))
            .field(FieldDef::text("label", 3))
            .field(FieldDef::list("books", FieldKind::Thing("Book".into()), 4))
            .field(FieldDef::text("title_upper", 5)
                .derived(Derivation::contextual(upper_title))
                .reactive(Trigger::changed(["title"])))
            .field(FieldDef::text("label_seen", 6)
                .derived(Derivation::contextual(|ctx: &DeriveContext<'_>| ctx.current.field("label").clone()))
                .reactive(Trigger::unchanged(["label"])))
            .field(FieldDef::list("book_titles", FieldKind::Text, 7)
                .derived(Derivation::contextual(book_titles))
                .reactive(Trigger::element_changed(["books"], ["title"]))))
        .enumeration("Clearance", [(1, "PUBLIC"), (2, "TOP_SECRET")])
        .thing("Dossier", |t| t
            .field(FieldDef::text("id", 1).identifying())
            .field(FieldDef::text("codename", 2))
            .field(FieldDef::enumeration("clearance", "Clearance", 3).dangerous())
            .field(FieldDef::list("levels", FieldKind::Enum("Clearance".into()), 4).dangerous()))
        .thing("User", |t| t
            .field(FieldDef::text("handle", 1).identifying())
            .field(FieldDef::text("display", 2)))
        .thing("Membership", |t| t
            .field(FieldDef::thing("user", "User", 1).identifying())
            .field(FieldDef::text("group", 2).identifying())
            .field(FieldDef::int("rank", 3)))
        .thing("Empty", |t| t)
        .thing("Plain", |t| t
            .field(FieldDef::text("label", 1))
            .field(FieldDef::int("size", 2)))
        .action("Save", Priority::Soon, |t| t.field(FieldDef::thing("item", "Item", 1)))
        .build();
    match schema {
        Ok(schema) => Arc::new(schema),
        Err(error) => panic!("fixture schema is invalid: {error}"),
    }
}

fn count_declared_vals(ctx: &DeriveContext<'_>) -> Field {
    let count = ctx
        .selector
        .all_of("A")
        .iter()
        .filter(|a| a.is_declared("val"))
        .count();
    Field::from(count as i64)
}

fn upper_title(ctx: &DeriveContext<'_>) -> Field {
    match ctx.current.get("title").and_then(Value::as_text) {
        Some(title) => Field::from(title.to_uppercase()),
        None => Field::Null,
    }
}

fn book_titles(ctx: &DeriveContext<'_>) -> Field {
    let Some(books) = ctx.current.get("books").and_then(Value::as_list) else {
        return Field::Null;
    };
    let titles = books
        .iter()
        .flatten()
        .filter_map(Value::as_thing)
        .map(|book| {
            let book = ctx.selector.find(book).unwrap_or_else(|| book.clone());
            book.get("title").cloned()
        })
        .collect();
    Field::Value(Value::List(titles))
}

/// An Item with `id` and, if given, `val`.
pub(crate) fn item(schema: &Schema, id: &str, val: Option<&str>) -> Thing {
    let builder = schema.builder_for("Item").unwrap().set("id", id);
    match val {
        Some(val) => builder.set("val", val).build(),
        None => builder.build(),
    }
}

/// An Item declaring every kind of field, with values that survive both
/// JSON and binary round trips.
pub(crate) fn rich_item(schema: &Schema) -> Thing {
    let author = schema
        .builder_for("Author")
        .unwrap()
        .set("name", "ada")
        .set("bio", "counts things")
        .set("email", "ada@example.org")
        .build();
    let note = schema
        .builder_for("Note")
        .unwrap()
        .set("text", "first")
        .set("by", author.clone())
        .build();
    let image = schema
        .builder_for("Image")
        .unwrap()
        .set("url", "https://img/1.png")
        .set("width", 640)
        .build();
    schema
        .builder_for("Item")
        .unwrap()
        .set("id", "1")
        .set("val", "value")
        .set("secret", "hunter2")
        .set("count", -42)
        .set("score", 2.5)
        .set("flag", true)
        .set("tags", Value::List(vec![Some("a".into()), None, Some("c".into())]))
        .set("status", EnumValue::known(1, "ACTIVE"))
        .set("author", author)
        .set(
            "attrs",
            Value::Map([("x".to_string(), Some(Value::Int(1))), ("y".to_string(), None)].into_iter().collect()),
        )
        .set("related", Value::list([item(schema, "2", Some("other"))]))
        .set("attachment", image)
        .set("notes", Value::List(vec![Some(note.into()), None]))
        .build()
}

/// A Dossier with dangerous enum values, one of them in a list.
pub(crate) fn dossier(schema: &Schema) -> Thing {
    schema
        .builder_for("Dossier")
        .unwrap()
        .set("id", "d1")
        .set("codename", "heron")
        .set("clearance", EnumValue::known(2, "TOP_SECRET"))
        .set(
            "levels",
            Value::List(vec![Some(EnumValue::known(1, "PUBLIC").into()), None, Some(EnumValue::dynamic("LATER").into())]),
        )
        .build()
}
