//! First-generation configuration: one base URL per link type, selected
//! with `?type=<name>&id=<identifier>`.

use crate::error::OpenError;
use crate::item::Item;
use crate::link::{BuiltUrl, LinkOptions, UrlStrategy, VariantQuery, finish_url, set_query_param};
use crate::sanitize::sanitize_url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

const DEFAULT_ID_PARAM: &str = "id";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TypeDefinition {
    pub base: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Query parameter that receives the identifier (default `id`).
    pub param: Option<String>,
}

/// Default legacy strategy: set `<param>=<id>` on the type's base URL.
///
/// The item handed to a type strategy carries the validated base in `url`.
#[derive(Debug, Clone)]
pub struct QueryParamStrategy {
    pub param: String,
}

impl Default for QueryParamStrategy {
    fn default() -> Self {
        Self {
            param: DEFAULT_ID_PARAM.to_string(),
        }
    }
}

impl UrlStrategy for QueryParamStrategy {
    fn to_url(&self, item: &Item) -> Option<String> {
        let mut url = Url::parse(&item.url).ok()?;
        set_query_param(&mut url, &self.param, &item.id);
        Some(url.to_string())
    }
}

#[derive(Clone, Default)]
pub struct TypeRegistry {
    definitions: BTreeMap<String, TypeDefinition>,
    strategies: BTreeMap<String, Arc<dyn UrlStrategy>>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("definitions", &self.definitions)
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TypeRegistry {
    pub fn new(definitions: BTreeMap<String, TypeDefinition>) -> Self {
        Self {
            definitions,
            strategies: BTreeMap::new(),
        }
    }

    pub fn define(&mut self, name: impl Into<String>, definition: TypeDefinition) {
        self.definitions.insert(name.into(), definition);
    }

    /// Overrides URL construction for one type.
    pub fn set_strategy(&mut self, name: impl Into<String>, strategy: Arc<dyn UrlStrategy>) {
        self.strategies.insert(name.into(), strategy);
    }

    /// Builds the destination for `item` under type `kind`.
    ///
    /// Returns the item as presented (type title and description fill in
    /// for identifiers the dataset does not know) along with the URL.
    pub fn build(
        &self,
        kind: &str,
        item: Item,
        query: &VariantQuery,
        options: LinkOptions<'_>,
    ) -> Result<(Item, BuiltUrl), OpenError> {
        let definition = self
            .definitions
            .get(kind)
            .ok_or_else(|| OpenError::UnknownType(kind.to_string()))?;
        let base = definition
            .base
            .as_deref()
            .and_then(|base| sanitize_url(base, options.base))
            .ok_or_else(|| OpenError::NoBaseUrl(kind.to_string()))?;

        let mut presented = Item { url: base, ..item };
        if presented.title == presented.id {
            if let Some(title) = definition.title.as_deref().filter(|t| !t.is_empty()) {
                presented.title = title.to_string();
            }
        }
        if presented.description.is_empty() {
            if let Some(description) = definition.description.as_deref() {
                presented.description = description.trim().to_string();
            }
        }

        let default_strategy = QueryParamStrategy {
            param: definition
                .param
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_ID_PARAM.to_string()),
        };
        let strategy: &dyn UrlStrategy = match self.strategies.get(kind) {
            Some(custom) => custom.as_ref(),
            None => &default_strategy,
        };
        debug!(kind, id = %presented.id, "Building legacy type URL");
        let expanded = strategy
            .to_url(&presented)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| OpenError::ItemNotOpenable(presented.id.clone()))?;
        let built = finish_url(expanded, &presented.variants, query, options)?;
        Ok((presented, built))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://portal.test/open.html";

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::default();
        registry.define(
            "quiz",
            TypeDefinition {
                base: Some("https://quiz.test/start".into()),
                title: Some("Weekly quiz".into()),
                description: Some("  Ten questions. ".into()),
                param: None,
            },
        );
        registry.define(
            "form",
            TypeDefinition {
                base: Some("/forms/entry?lang=en".into()),
                param: Some("entry".into()),
                ..TypeDefinition::default()
            },
        );
        registry.define("broken", TypeDefinition::default());
        registry.define(
            "script",
            TypeDefinition {
                base: Some("javascript:alert(1)".into()),
                ..TypeDefinition::default()
            },
        );
        registry
    }

    #[test]
    fn default_strategy_sets_identifier_parameter() {
        let (item, built) = registry()
            .build(
                "quiz",
                Item::fallback("py22a"),
                &VariantQuery::default(),
                LinkOptions::new(ORIGIN),
            )
            .unwrap();
        assert_eq!(built.url, "https://quiz.test/start?id=py22a");
        assert_eq!(item.title, "Weekly quiz");
        assert_eq!(item.description, "Ten questions.");
    }

    #[test]
    fn relative_base_and_custom_param() {
        let (_, built) = registry()
            .build(
                "form",
                Item::fallback("f7"),
                &VariantQuery::new("s1"),
                LinkOptions::new(ORIGIN),
            )
            .unwrap();
        assert_eq!(
            built.url,
            "https://portal.test/forms/entry?lang=en&entry=f7&variant=s1"
        );
        assert_eq!(built.title_suffix, "（s1）");
    }

    #[test]
    fn dataset_title_is_kept() {
        let item = Item {
            title: "From dataset".into(),
            ..Item::fallback("py22a")
        };
        let (item, _) = registry()
            .build(
                "quiz",
                item,
                &VariantQuery::default(),
                LinkOptions::new(ORIGIN),
            )
            .unwrap();
        assert_eq!(item.title, "From dataset");
    }

    #[test]
    fn unknown_type_and_missing_base_are_distinct() {
        let registry = registry();
        let options = LinkOptions::new(ORIGIN);
        let none = VariantQuery::default();
        assert_eq!(
            registry.build("nope", Item::fallback("a"), &none, options),
            Err(OpenError::UnknownType("nope".into()))
        );
        assert_eq!(
            registry.build("broken", Item::fallback("a"), &none, options),
            Err(OpenError::NoBaseUrl("broken".into()))
        );
        assert_eq!(
            registry.build("script", Item::fallback("a"), &none, options),
            Err(OpenError::NoBaseUrl("script".into()))
        );
    }

    #[test]
    fn custom_strategy_overrides_default() {
        let mut registry = registry();
        registry.set_strategy(
            "quiz",
            Arc::new(|item: &Item| Some(format!("{}/{}", item.url.trim_end_matches('/'), item.id))),
        );
        let (_, built) = registry
            .build(
                "quiz",
                Item::fallback("py22a"),
                &VariantQuery::default(),
                LinkOptions::new(ORIGIN),
            )
            .unwrap();
        assert_eq!(built.url, "https://quiz.test/start/py22a");
    }

    #[test]
    fn strategy_returning_unsafe_url_is_rejected() {
        let mut registry = registry();
        registry.set_strategy("quiz", Arc::new(|_: &Item| Some("javascript:void(0)".to_string())));
        assert_eq!(
            registry
                .build(
                    "quiz",
                    Item::fallback("a"),
                    &VariantQuery::default(),
                    LinkOptions::new(ORIGIN),
                )
                .map(|(_, built)| built),
            Err(OpenError::InvalidFinalUrl)
        );
    }
}
