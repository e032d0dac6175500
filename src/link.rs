use crate::error::OpenError;
use crate::item::{Item, Variant};
use crate::sanitize::{is_http_url, sanitize_url};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};
use url::Url;

/// Token in an item URL that stands for the item's own identifier.
pub const ID_PLACEHOLDER: &str = "{id}";
/// Query parameter that carries the selected variant.
pub const VARIANT_PARAM: &str = "variant";

/// Characters left alone by `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// Variant override as read from the query string (`variant`, or `v`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantQuery {
    pub variant: Option<String>,
    pub v: Option<String>,
}

impl VariantQuery {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            variant: Some(value.into()),
            v: None,
        }
    }

    /// The long alias wins; empty values count as absent.
    pub fn requested(&self) -> Option<&str> {
        self.variant
            .as_deref()
            .filter(|v| !v.is_empty())
            .or_else(|| self.v.as_deref().filter(|v| !v.is_empty()))
    }
}

/// How unknown variant overrides are treated when an item lists variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantPolicy {
    /// Warn and apply the override anyway.
    #[default]
    Advisory,
    /// Refuse overrides the item does not list.
    Strict,
}

#[derive(Debug, Clone, Copy)]
pub struct LinkOptions<'a> {
    /// Page origin that relative item URLs resolve against.
    pub base: &'a str,
    pub variant_policy: VariantPolicy,
    /// Also merge the matched variant's `param` fragment into the URL.
    pub merge_variant_params: bool,
}

impl<'a> LinkOptions<'a> {
    pub fn new(base: &'a str) -> Self {
        Self {
            base,
            variant_policy: VariantPolicy::default(),
            merge_variant_params: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildWarning {
    UnknownVariant { requested: String, known: Vec<String> },
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildWarning::UnknownVariant { requested, known } => write!(
                f,
                "variant {requested:?} is not listed (known: {})",
                known.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltUrl {
    pub url: String,
    /// Appended to the display title when a variant was applied, e.g. `（s1）`.
    pub title_suffix: String,
    pub warnings: Vec<BuildWarning>,
}

/// Expands an item into a raw (possibly relative) destination.
///
/// Returning `None` marks the item as not openable.
pub trait UrlStrategy: Send + Sync {
    fn to_url(&self, item: &Item) -> Option<String>;
}

/// Default strategy: the item's own URL with `{id}` substituted.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateUrlStrategy;

impl UrlStrategy for TemplateUrlStrategy {
    fn to_url(&self, item: &Item) -> Option<String> {
        if item.url.is_empty() {
            return None;
        }
        Some(item.url.replace(ID_PLACEHOLDER, &encode_component(&item.id)))
    }
}

impl<F> UrlStrategy for F
where
    F: Fn(&Item) -> Option<String> + Send + Sync,
{
    fn to_url(&self, item: &Item) -> Option<String> {
        self(item)
    }
}

pub fn build_final_url(
    item: &Item,
    query: &VariantQuery,
    options: LinkOptions<'_>,
) -> Result<BuiltUrl, OpenError> {
    build_final_url_with(&TemplateUrlStrategy, item, query, options)
}

pub fn build_final_url_with(
    strategy: &dyn UrlStrategy,
    item: &Item,
    query: &VariantQuery,
    options: LinkOptions<'_>,
) -> Result<BuiltUrl, OpenError> {
    if !item.is_openable() {
        return Err(OpenError::ItemNotOpenable(item.id.clone()));
    }
    let expanded = strategy
        .to_url(item)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| OpenError::ItemNotOpenable(item.id.clone()))?;
    finish_url(expanded, &item.variants, query, options)
}

/// Applies the variant override to an expanded URL and validates the result.
pub(crate) fn finish_url(
    expanded: String,
    variants: &[Variant],
    query: &VariantQuery,
    options: LinkOptions<'_>,
) -> Result<BuiltUrl, OpenError> {
    let mut warnings = Vec::new();
    let mut title_suffix = String::new();
    let mut candidate = expanded;

    if let Some(requested) = query.requested() {
        let matched = variants.iter().find(|v| v.variant == requested);
        if !variants.is_empty() && matched.is_none() {
            let known: Vec<String> = variants.iter().map(|v| v.variant.clone()).collect();
            if options.variant_policy == VariantPolicy::Strict {
                return Err(OpenError::VariantNotAllowed(requested.to_string()));
            }
            warn!(variant = requested, known = ?known, "Variant not listed for item; applying anyway");
            warnings.push(BuildWarning::UnknownVariant {
                requested: requested.to_string(),
                known,
            });
        }

        let mut parsed = parse_http(&candidate, options.base).ok_or(OpenError::InvalidFinalUrl)?;
        set_query_param(&mut parsed, VARIANT_PARAM, requested);
        if options.merge_variant_params {
            if let Some(variant) = matched.filter(|v| !v.param.is_empty()) {
                merge_params_into(&mut parsed, &variant.param);
            }
        }
        candidate = parsed.to_string();
        title_suffix = format!("（{requested}）");
    }

    let url = sanitize_url(&candidate, options.base).ok_or(OpenError::InvalidFinalUrl)?;
    debug!(%url, suffix = %title_suffix, "Built final URL");
    Ok(BuiltUrl {
        url,
        title_suffix,
        warnings,
    })
}

/// Merges an ampersand-joined `key=value` fragment into `url`'s query.
///
/// Entries without `=` or with an empty key are skipped. Later keys win over
/// earlier ones and over parameters already present. Returns `None` when the
/// URL cannot be resolved to an http(s) URL.
pub fn merge_param_string(url: &str, fragment: &str, base: &str) -> Option<String> {
    let mut parsed = parse_http(url, base)?;
    merge_params_into(&mut parsed, fragment);
    Some(parsed.to_string())
}

fn merge_params_into(url: &mut Url, fragment: &str) {
    for entry in fragment.split('&') {
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        set_query_param(url, key, value);
    }
}

fn parse_http(raw: &str, base: &str) -> Option<Url> {
    let base = Url::parse(base).ok();
    let parsed = Url::options().base_url(base.as_ref()).parse(raw.trim()).ok()?;
    is_http_url(&parsed).then_some(parsed)
}

/// Sets `key` to `value`: the first existing occurrence keeps its position,
/// later duplicates are dropped, and a missing key is appended.
pub(crate) fn set_query_param(url: &mut Url, key: &str, value: &str) {
    let mut replaced = false;
    let mut pairs: Vec<(String, String)> = Vec::new();
    for (k, v) in url.query_pairs() {
        if k == key {
            if !replaced {
                pairs.push((k.into_owned(), value.to_string()));
                replaced = true;
            }
        } else {
            pairs.push((k.into_owned(), v.into_owned()));
        }
    }
    if !replaced {
        pairs.push((key.to_string(), value.to_string()));
    }
    url.query_pairs_mut().clear().extend_pairs(pairs);
}
