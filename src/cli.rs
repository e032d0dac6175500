use std::error::Error;
use std::path::{Path, PathBuf};

use atty::Stream;
use clap::{Parser, Subcommand};
use portal_open_rs::dataset::{AMBIENT_DATASET_NAME, ambient};
use portal_open_rs::page::{Deferred, Navigator};
use portal_open_rs::{
    Block, Dataset, Item, Page, Portal, PortalOptions, resolve_item, sanitize_identifier,
};
use serde_json::json;
use termimad::{FmtText, MadSkin, terminal_size};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "portal-open-rs",
    about = "Resolve item identifiers and open their destinations safely",
    version
)]
pub struct Cli {
    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a query string (`id=...&variant=...`) or full URL and render the outcome.
    Open {
        /// Query string, with or without the leading `?`, or a URL carrying one.
        query: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Report which identifiers pass validation.
    CheckId {
        #[arg(required = true)]
        raw: Vec<String>,
    },
    /// Show the normalized item for an identifier.
    Item {
        id: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Run the HTTP surface.
    #[cfg(feature = "web")]
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: std::net::SocketAddr,
        /// Page chrome: `tailwind` or `bootstrap`.
        #[arg(long, default_value = "tailwind")]
        theme: String,
        #[command(flatten)]
        source: SourceArgs,
    },
}

#[derive(clap::Args, Debug)]
struct SourceArgs {
    /// JSON dataset (array of items or object keyed by id).
    #[arg(long)]
    dataset: Option<PathBuf>,
    /// JSON portal options (camelCase keys).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Origin that relative URLs resolve against.
    #[arg(long)]
    origin: Option<String>,
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Open { query, source } => {
            init_tracing("warn");
            handle_open(&query, &source, cli.json)
        }
        Command::CheckId { raw } => handle_check_id(&raw, cli.json),
        Command::Item { id, source } => {
            init_tracing("warn");
            handle_item(&id, &source, cli.json)
        }
        #[cfg(feature = "web")]
        Command::Serve {
            addr,
            theme,
            source,
        } => {
            init_tracing("info");
            handle_serve(addr, &theme, &source)
        }
    }
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_options(source: &SourceArgs) -> Result<PortalOptions, Box<dyn Error>> {
    let mut options = match &source.config {
        Some(path) => PortalOptions::load(path)?,
        None => PortalOptions::default(),
    };
    if let Some(origin) = &source.origin {
        options.origin = origin.clone();
    }
    Ok(options)
}

/// Builds the portal. Without `--dataset`, the file named by the ambient
/// environment variable becomes the global binding.
fn build_portal(source: &SourceArgs) -> Result<Portal, Box<dyn Error>> {
    let options = load_options(source)?;
    let mut builder = Portal::builder().options(options);
    match &source.dataset {
        Some(path) => builder = builder.dataset(Dataset::load(path)?),
        None => install_ambient_from_env()?,
    }
    Ok(builder.build())
}

fn install_ambient_from_env() -> Result<(), Box<dyn Error>> {
    if let Some(path) = std::env::var_os(AMBIENT_DATASET_NAME) {
        let dataset = Dataset::load(Path::new(&path))?;
        ambient::install_global(dataset);
    }
    Ok(())
}

fn query_part(input: &str) -> String {
    if input.contains("://") {
        if let Ok(url) = url::Url::parse(input) {
            return url.query().unwrap_or_default().to_string();
        }
    }
    input.trim_start_matches('?').to_string()
}

/// Prints navigations instead of performing them.
struct PrintNavigator {
    quiet: bool,
    visited: Vec<(String, bool)>,
}

impl Navigator for PrintNavigator {
    fn navigate(&mut self, url: &str, new_tab: bool) {
        if !self.quiet {
            let target = if new_tab { "new tab" } else { "same tab" };
            println!("→ navigate ({target}): {url}");
        }
        self.visited.push((url.to_string(), new_tab));
    }
}

fn handle_open(input: &str, source: &SourceArgs, as_json: bool) -> Result<(), Box<dyn Error>> {
    let portal = build_portal(source)?;
    let mut page = portal.new_page();
    let outcome = portal.render(&mut page, &query_part(input));

    let scheduled: Vec<Deferred> = page.deferred().to_vec();
    let mut navigator = PrintNavigator {
        quiet: as_json,
        visited: Vec::new(),
    };

    if as_json {
        page.flush_deferred(&mut navigator);
        let payload = match &outcome {
            Ok(resolution) => json!({
                "ok": true,
                "resolution": resolution,
                "scheduled": scheduled,
                "navigated": navigator.visited.iter().map(|(url, new_tab)| {
                    json!({ "url": url, "new_tab": new_tab })
                }).collect::<Vec<_>>(),
                "page": page,
            }),
            Err(err) => json!({
                "ok": false,
                "code": err.code(),
                "error": err.user_message(),
                "page": page,
            }),
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_page(&page);
        if let Ok(resolution) = &outcome {
            for warning in &resolution.warnings {
                println!("warning: {warning}");
            }
        }
        page.flush_deferred(&mut navigator);
    }

    match outcome {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("could not open item ({})", err.code()).into()),
    }
}

fn print_page(page: &Page) {
    if let Some(header) = page.header() {
        match &header.subject {
            Some(subject) => println!("{} · {}", header.title, subject),
            None => println!("{}", header.title),
        }
        println!();
    }
    for block in page.blocks() {
        match block {
            Block::Card(card) => {
                println!("{}", card.title);
                println!("URL: {}", card.url);
                println!(
                    "Opens in: {}",
                    if card.open_in_new_tab {
                        "new tab"
                    } else {
                        "same tab"
                    }
                );
                render_markdown_block("Description", &card.description);
            }
            Block::Error(panel) => println!("error: {}", panel.plain_text()),
        }
    }
    if let Some(overlay) = page.loading() {
        println!("\n{}", overlay.message);
    }
}

fn handle_check_id(raw: &[String], as_json: bool) -> Result<(), Box<dyn Error>> {
    let rows: Vec<(&str, bool)> = raw
        .iter()
        .map(|value| (value.as_str(), sanitize_identifier(value).is_some()))
        .collect();

    if as_json {
        let payload: Vec<_> = rows
            .iter()
            .map(|(value, valid)| json!({ "input": value, "valid": valid }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_check_table(&rows);
    }
    Ok(())
}

fn print_check_table(rows: &[(&str, bool)]) {
    let width = rows
        .iter()
        .map(|(value, _)| value.len())
        .max()
        .unwrap_or(5)
        .max("INPUT".len());
    println!("{:<width$}  {}", "INPUT", "VALID", width = width);
    println!("{:-<width$}  {}", "", "-----", width = width);
    for (value, valid) in rows {
        let label = if *valid { "yes" } else { "no" };
        println!("{:<width$}  {}", value, label, width = width);
    }
}

fn handle_item(id: &str, source: &SourceArgs, as_json: bool) -> Result<(), Box<dyn Error>> {
    let identifier =
        sanitize_identifier(id).ok_or_else(|| format!("Invalid identifier {id:?}"))?;
    let dataset = match &source.dataset {
        Some(path) => Some(std::sync::Arc::new(Dataset::load(path)?)),
        None => {
            install_ambient_from_env()?;
            ambient::lookup()
        }
    };
    let item = resolve_item(identifier, dataset.as_deref());

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        print_item(&item);
    }
    Ok(())
}

fn print_item(item: &Item) {
    println!("Item: {} (ID {})", item.title, item.id);
    if item.is_openable() {
        println!("URL: {}", item.url);
    } else {
        println!("URL: <none, not openable>");
    }
    if !item.variants.is_empty() {
        println!("Variants:");
        for variant in &item.variants {
            if variant.param.is_empty() {
                println!("- {}", variant.variant);
            } else {
                println!("- {} ({})", variant.variant, variant.param);
            }
        }
    }
    render_markdown_block("Description", &item.description);
}

#[cfg(feature = "web")]
fn handle_serve(
    addr: std::net::SocketAddr,
    theme: &str,
    source: &SourceArgs,
) -> Result<(), Box<dyn Error>> {
    use portal_open_rs::web::{WebConfig, WebTheme, serve};

    let theme = match theme.to_ascii_lowercase().as_str() {
        "tailwind" => WebTheme::Tailwind,
        "bootstrap" => WebTheme::Bootstrap,
        other => return Err(format!("Unknown theme {other:?}").into()),
    };
    let portal = build_portal(source)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(WebConfig { addr, theme }, portal))?;
    Ok(())
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn render_markdown_block(title: &str, body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return;
    }
    println!("\n{title}:");
    if stdout_is_tty() {
        let skin = MadSkin::default();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}");
    }
}
