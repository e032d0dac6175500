use crate::dataset::Dataset;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical identifier field of a dataset record.
pub const ID_FIELD: &str = "id";
/// Field name used by older quiz datasets.
pub const LEGACY_ID_FIELD: &str = "quizId";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub variant: String,
    pub param: String,
}

impl Item {
    /// Placeholder item for identifiers that are not in the dataset.
    pub fn fallback(identifier: &str) -> Self {
        Self {
            id: identifier.to_string(),
            title: identifier.to_string(),
            description: String::new(),
            url: String::new(),
            variants: Vec::new(),
        }
    }

    pub fn is_openable(&self) -> bool {
        !self.url.is_empty()
    }

    pub fn find_variant(&self, name: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.variant == name)
    }
}

/// Looks items up by identifier. Integrators replace the default to plug in
/// their own lookup rules.
pub trait ItemResolver: Send + Sync {
    fn resolve_item(&self, identifier: &str, dataset: Option<&Dataset>) -> Item;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultItemResolver;

impl ItemResolver for DefaultItemResolver {
    fn resolve_item(&self, identifier: &str, dataset: Option<&Dataset>) -> Item {
        resolve_item(identifier, dataset)
    }
}

impl<F> ItemResolver for F
where
    F: Fn(&str, Option<&Dataset>) -> Item + Send + Sync,
{
    fn resolve_item(&self, identifier: &str, dataset: Option<&Dataset>) -> Item {
        self(identifier, dataset)
    }
}

pub fn resolve_item(identifier: &str, dataset: Option<&Dataset>) -> Item {
    let Some(dataset) = dataset else {
        return Item::fallback(identifier);
    };
    let direct = dataset
        .get(identifier)
        .and_then(Value::as_object)
        .map(|record| normalize_record(record, identifier));
    direct
        .or_else(|| {
            dataset
                .records()
                .filter_map(Value::as_object)
                .find(|record| record_key(record).as_deref() == Some(identifier))
                .map(|record| normalize_record(record, identifier))
        })
        .unwrap_or_else(|| Item::fallback(identifier))
}

/// Normalizes a raw record into an [`Item`]. Non-object input yields the
/// fallback item.
pub fn normalize_item(raw: &Value, identifier: &str) -> Item {
    match raw.as_object() {
        Some(record) => normalize_record(record, identifier),
        None => Item::fallback(identifier),
    }
}

fn normalize_record(record: &Map<String, Value>, identifier: &str) -> Item {
    let id = record_key(record).unwrap_or_else(|| identifier.to_string());
    let title = non_empty_text(record.get("title")).unwrap_or_else(|| id.clone());
    let description = record
        .get("description")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let url = record
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default();
    let variants = record
        .get("variants")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(normalize_variant).collect())
        .unwrap_or_default();
    Item {
        id,
        title,
        description,
        url,
        variants,
    }
}

fn normalize_variant(raw: &Value) -> Option<Variant> {
    let entry = raw.as_object()?;
    let variant = non_empty_text(entry.get("variant"))
        .or_else(|| non_empty_text(entry.get("name")))
        .unwrap_or_default();
    let param = non_empty_text(entry.get("param"))
        .or_else(|| non_empty_text(entry.get("params")))
        .unwrap_or_default();
    Some(Variant { variant, param })
}

/// Canonical-or-legacy identifier of a record; the first non-empty wins.
fn record_key(record: &Map<String, Value>) -> Option<String> {
    non_empty_text(record.get(ID_FIELD)).or_else(|| non_empty_text(record.get(LEGACY_ID_FIELD)))
}

fn non_empty_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset(value: Value) -> Dataset {
        Dataset::from_value(value).unwrap()
    }

    #[test]
    fn missing_dataset_yields_fallback() {
        let item = resolve_item("py22a", None);
        assert_eq!(item, Item::fallback("py22a"));
        assert_eq!(item.title, "py22a");
        assert!(!item.is_openable());
    }

    #[test]
    fn sequence_matches_canonical_and_legacy_fields() {
        let data = dataset(json!([
            { "id": "a1", "title": "First", "url": "https://x.test/a" },
            { "quizId": "b2", "title": "Legacy", "url": "https://x.test/b" },
        ]));
        assert_eq!(resolve_item("a1", Some(&data)).title, "First");
        let legacy = resolve_item("b2", Some(&data));
        assert_eq!(legacy.id, "b2");
        assert_eq!(legacy.title, "Legacy");
    }

    #[test]
    fn canonical_field_shadows_legacy_field() {
        let data = dataset(json!([
            { "id": "new", "quizId": "old", "title": "Shadowed" },
            { "id": "", "quizId": "old", "title": "Legacy wins on empty id" },
        ]));
        assert_eq!(
            resolve_item("old", Some(&data)).title,
            "Legacy wins on empty id"
        );
        assert_eq!(resolve_item("new", Some(&data)).title, "Shadowed");
    }

    #[test]
    fn first_match_wins_in_sequences() {
        let data = dataset(json!([
            { "id": "dup", "title": "one" },
            { "id": "dup", "title": "two" },
        ]));
        assert_eq!(resolve_item("dup", Some(&data)).title, "one");
    }

    #[test]
    fn mapping_prefers_direct_key_then_scans_values() {
        let data = dataset(json!({
            "py22a": { "title": "Keyed", "url": "https://x.test/{id}" },
            "other": { "quizId": "zz9", "title": "Scanned" },
        }));
        let keyed = resolve_item("py22a", Some(&data));
        assert_eq!(keyed.id, "py22a");
        assert_eq!(keyed.title, "Keyed");
        let scanned = resolve_item("zz9", Some(&data));
        assert_eq!(scanned.id, "zz9");
        assert_eq!(scanned.title, "Scanned");
    }

    #[test]
    fn mapping_direct_key_must_be_a_record() {
        let data = dataset(json!({
            "k1": "not a record",
            "other": { "id": "k1", "title": "Found by scan" },
        }));
        assert_eq!(resolve_item("k1", Some(&data)).title, "Found by scan");
    }

    #[test]
    fn unknown_identifier_yields_fallback() {
        let data = dataset(json!([{ "id": "a1" }]));
        assert_eq!(resolve_item("zz", Some(&data)), Item::fallback("zz"));
    }

    #[test]
    fn numeric_identifiers_match_as_text() {
        let data = dataset(json!([{ "id": 42, "title": "Answer" }]));
        let item = resolve_item("42", Some(&data));
        assert_eq!(item.id, "42");
        assert_eq!(item.title, "Answer");
    }

    #[test]
    fn normalization_fills_defaults() {
        let item = normalize_item(
            &json!({
                "title": "",
                "description": "  spaced out \n",
                "url": 17,
            }),
            "q1",
        );
        assert_eq!(item.id, "q1");
        assert_eq!(item.title, "q1");
        assert_eq!(item.description, "spaced out");
        assert_eq!(item.url, "");
        assert!(item.variants.is_empty());
    }

    #[test]
    fn normalization_maps_variant_aliases_and_drops_junk() {
        let item = normalize_item(
            &json!({
                "id": "q1",
                "url": "https://x.test/{id}",
                "variants": [
                    { "variant": "s1", "param": "lang=en" },
                    { "name": "s2", "params": "lang=ja&mode=easy" },
                    "junk",
                    null,
                    7,
                    { "variant": "s3" },
                ],
            }),
            "q1",
        );
        assert_eq!(
            item.variants,
            vec![
                Variant {
                    variant: "s1".into(),
                    param: "lang=en".into()
                },
                Variant {
                    variant: "s2".into(),
                    param: "lang=ja&mode=easy".into()
                },
                Variant {
                    variant: "s3".into(),
                    param: String::new()
                },
            ]
        );
        assert!(item.find_variant("s2").is_some());
        assert!(item.find_variant("S2").is_none());
    }

    #[test]
    fn non_array_variants_are_ignored() {
        let item = normalize_item(&json!({ "id": "q", "variants": { "s1": {} } }), "q");
        assert!(item.variants.is_empty());
    }

    #[test]
    fn closures_act_as_item_resolvers() {
        let resolver = |id: &str, _: Option<&Dataset>| Item {
            url: format!("https://override.test/{id}"),
            ..Item::fallback(id)
        };
        let item = resolver.resolve_item("x1", None);
        assert_eq!(item.url, "https://override.test/x1");
        assert_eq!(DefaultItemResolver.resolve_item("x1", None), Item::fallback("x1"));
    }
}
