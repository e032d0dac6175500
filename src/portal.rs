use crate::config::PortalOptions;
use crate::dataset::{Dataset, DatasetSource, resolve_dataset, resolve_explicit};
use crate::error::OpenError;
use crate::item::{DefaultItemResolver, Item, ItemResolver};
use crate::legacy::TypeRegistry;
use crate::link::{BuildWarning, TemplateUrlStrategy, UrlStrategy, VariantQuery, build_final_url_with};
use crate::page::{
    AUTO_NAVIGATE_DELAY, Block, Deferred, ErrorPanel, FALLBACK_LINK_DELAY, HeaderBlock,
    LoadingOverlay, OpenCard, Page,
};
use crate::sanitize::sanitize_identifier;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parameters read from the page's query string.
///
/// Values are kept raw; validation happens in [`Portal::resolve`]. When a
/// key repeats, the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenQuery {
    pub id: Option<String>,
    pub variant: VariantQuery,
    pub new_tab: bool,
    pub auto: bool,
    /// Legacy `type` selector.
    pub kind: Option<String>,
}

impl OpenQuery {
    pub fn parse(query_string: &str) -> Self {
        let trimmed = query_string.trim_start_matches('?');
        let mut query = OpenQuery::default();
        let mut new_tab: Option<String> = None;
        let mut auto: Option<String> = None;
        for (key, value) in url::form_urlencoded::parse(trimmed.as_bytes()) {
            let slot = match &*key {
                "id" => &mut query.id,
                "variant" => &mut query.variant.variant,
                "v" => &mut query.variant.v,
                "type" => &mut query.kind,
                "newtab" => &mut new_tab,
                "auto" => &mut auto,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        query.new_tab = new_tab.as_deref() == Some("1");
        query.auto = auto.as_deref() == Some("1");
        query
    }
}

/// Successful pipeline result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub item: Item,
    pub card: OpenCard,
    pub warnings: Vec<BuildWarning>,
}

pub struct Portal {
    options: PortalOptions,
    source: DatasetSource,
    item_resolver: Arc<dyn ItemResolver>,
    url_strategy: Arc<dyn UrlStrategy>,
    types: TypeRegistry,
}

impl std::fmt::Debug for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Portal")
            .field("options", &self.options)
            .field("source", &self.source)
            .field("types", &self.types)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct PortalBuilder {
    options: PortalOptions,
    source: DatasetSource,
    item_resolver: Option<Arc<dyn ItemResolver>>,
    url_strategy: Option<Arc<dyn UrlStrategy>>,
    type_strategies: Vec<(String, Arc<dyn UrlStrategy>)>,
}

impl PortalBuilder {
    pub fn options(mut self, options: PortalOptions) -> Self {
        self.options = options;
        self
    }

    pub fn dataset(mut self, source: impl Into<DatasetSource>) -> Self {
        self.source = source.into();
        self
    }

    /// Replaces the default item lookup.
    pub fn item_resolver(mut self, resolver: impl ItemResolver + 'static) -> Self {
        self.item_resolver = Some(Arc::new(resolver));
        self
    }

    /// Replaces the default `{id}` template expansion.
    pub fn url_strategy(mut self, strategy: impl UrlStrategy + 'static) -> Self {
        self.url_strategy = Some(Arc::new(strategy));
        self
    }

    /// Replaces URL construction for one legacy type.
    pub fn type_strategy(
        mut self,
        kind: impl Into<String>,
        strategy: impl UrlStrategy + 'static,
    ) -> Self {
        let strategy: Arc<dyn UrlStrategy> = Arc::new(strategy);
        self.type_strategies.push((kind.into(), strategy));
        self
    }

    pub fn build(self) -> Portal {
        let mut types = TypeRegistry::new(self.options.types.clone());
        for (kind, strategy) in self.type_strategies {
            types.set_strategy(kind, strategy);
        }
        Portal {
            options: self.options,
            source: self.source,
            item_resolver: self
                .item_resolver
                .unwrap_or_else(|| Arc::new(DefaultItemResolver)),
            url_strategy: self
                .url_strategy
                .unwrap_or_else(|| Arc::new(TemplateUrlStrategy)),
            types,
        }
    }
}

impl From<Dataset> for Portal {
    fn from(value: Dataset) -> Self {
        Portal::builder().dataset(value).build()
    }
}

impl Portal {
    pub fn builder() -> PortalBuilder {
        PortalBuilder::default()
    }

    pub fn options(&self) -> &PortalOptions {
        &self.options
    }

    /// Fresh page rooted at the configured target.
    pub fn new_page(&self) -> Page {
        Page::new(self.options.target.clone())
    }

    /// Runs the resolution pipeline without touching any page.
    pub fn resolve(&self, query: &OpenQuery) -> Result<Resolution, OpenError> {
        let identifier = query
            .id
            .as_deref()
            .and_then(sanitize_identifier)
            .ok_or(OpenError::MissingIdentifier)?;

        let dataset = if self.options.ambient_fallback {
            resolve_dataset(&self.source)
        } else {
            resolve_explicit(&self.source)
        };
        if dataset.is_none() {
            debug!(id = identifier, "No dataset available; item will not be found");
        }
        let item = self
            .item_resolver
            .resolve_item(identifier, dataset.as_deref());

        let link_options = self.options.link_options();
        let (item, built) = match query.kind.as_deref() {
            Some(kind) => {
                let kind = sanitize_identifier(kind)
                    .ok_or_else(|| OpenError::UnknownType(kind.to_string()))?;
                self.types.build(kind, item, &query.variant, link_options)?
            }
            None => {
                let built = build_final_url_with(
                    self.url_strategy.as_ref(),
                    &item,
                    &query.variant,
                    link_options,
                )?;
                (item, built)
            }
        };

        let read_flags = self.options.read_flags;
        let card = OpenCard {
            title: format!("{}{}", item.title, built.title_suffix),
            description: item.description.clone(),
            url: built.url,
            open_in_new_tab: read_flags && query.new_tab,
            auto_navigate: read_flags && query.auto,
        };
        Ok(Resolution {
            item,
            card,
            warnings: built.warnings,
        })
    }

    /// Renders the outcome for `query_string` into `page`.
    ///
    /// Failures never propagate: each becomes exactly one error panel. The
    /// returned result only reports what was rendered.
    pub fn render(&self, page: &mut Page, query_string: &str) -> Result<Resolution, OpenError> {
        if self.options.header {
            let inserted = page.insert_header(HeaderBlock {
                title: self.options.header_title.clone(),
                subject: self.options.header_subject.clone(),
            });
            if !inserted {
                debug!("Header already present");
            }
        }

        let query = OpenQuery::parse(query_string);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.resolve(&query)))
            .unwrap_or_else(|payload| Err(OpenError::Unexpected(panic_message(payload.as_ref()))));

        match &outcome {
            Ok(resolution) => {
                let card = &resolution.card;
                info!(id = %resolution.item.id, url = %card.url, auto = card.auto_navigate, "Rendering open card");
                page.append(Block::Card(card.clone()));
                if card.auto_navigate {
                    page.show_loading(LoadingOverlay {
                        message: self.options.loading_message.clone(),
                        fallback_url: card.url.clone(),
                        fallback_visible: false,
                    });
                    page.schedule(Deferred::Navigate {
                        after: AUTO_NAVIGATE_DELAY,
                        url: card.url.clone(),
                        new_tab: card.open_in_new_tab,
                    });
                    page.schedule(Deferred::RevealFallback {
                        after: FALLBACK_LINK_DELAY,
                    });
                }
            }
            Err(err) => {
                warn!(code = err.code(), error = %err, "Rendering error panel");
                page.append(Block::Error(error_panel(err)));
            }
        }
        outcome
    }
}

fn error_panel(err: &OpenError) -> ErrorPanel {
    match err {
        OpenError::MissingIdentifier => ErrorPanel::trusted_html(
            "No item was specified. Open this page with <code>?id=…</code> in the address.",
        ),
        other => ErrorPanel::text(other.user_message()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "internal error".to_string())
}
