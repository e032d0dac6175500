//! Resolve a query-string identifier against a shared dataset of items and
//! open the item's destination safely.
//!
//! The pipeline is: [`sanitize`] the identifier, resolve the [`dataset`],
//! look the [`item`] up, build the final URL with [`link`], then render the
//! result into a [`page`]. [`Portal`] ties the steps together.

pub mod config;
pub mod dataset;
pub mod error;
pub mod item;
pub mod legacy;
pub mod link;
pub mod page;
mod portal;
pub mod sanitize;
#[cfg(feature = "web")]
pub mod web;

pub use config::PortalOptions;
pub use dataset::{Dataset, DatasetError, DatasetSource, resolve_dataset};
pub use error::OpenError;
pub use item::{Item, ItemResolver, Variant, resolve_item};
pub use link::{BuiltUrl, UrlStrategy, VariantPolicy, VariantQuery, build_final_url, merge_param_string};
pub use page::{Block, ErrorPanel, Navigator, OpenCard, Page};
pub use portal::{OpenQuery, Portal, PortalBuilder, Resolution};
pub use sanitize::{sanitize_identifier, sanitize_url};
