use crate::error::{ErrorBody, OpenError};
use crate::page::{Block, Deferred, Page};
use crate::portal::{Portal, Resolution};
use askama::Template;
use axum::{
    Json, Router,
    extract::{RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::info;

type SharedState = Arc<AppState>;

pub struct AppState {
    pub portal: Portal,
    pub theme: WebTheme,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum WebTheme {
    #[default]
    Tailwind,
    Bootstrap,
}

impl fmt::Display for WebTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebTheme::Tailwind => write!(f, "tailwind"),
            WebTheme::Bootstrap => write!(f, "bootstrap"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Chrome {
    use_tailwind: bool,
    use_bootstrap: bool,
    body_class: &'static str,
    header_class: &'static str,
    main_class: &'static str,
    card_class: &'static str,
    eyebrow_class: &'static str,
    headline_class: &'static str,
    lede_class: &'static str,
    cta_group_class: &'static str,
    button_class: &'static str,
    alert_class: &'static str,
    overlay_class: &'static str,
}

impl Chrome {
    fn new(theme: WebTheme) -> Self {
        match theme {
            WebTheme::Tailwind => Self {
                use_tailwind: true,
                use_bootstrap: false,
                body_class: "bg-slate-50 text-slate-900",
                header_class: "w-full border-b border-slate-200 bg-white px-6 py-4",
                main_class: "min-h-screen flex flex-col items-center justify-start py-10 px-4 gap-6",
                card_class: "max-w-xl w-full space-y-4 rounded-lg bg-white p-6 shadow",
                eyebrow_class: "uppercase tracking-wide text-sm text-slate-500",
                headline_class: "text-3xl font-extrabold tracking-tight",
                lede_class: "text-lg text-slate-600",
                cta_group_class: "flex flex-wrap gap-3",
                button_class: "inline-flex items-center rounded-md bg-slate-900 px-4 py-2 text-white font-semibold shadow hover:bg-slate-800 transition-colors",
                alert_class: "max-w-xl w-full rounded-lg border border-red-200 bg-red-50 p-6 text-red-900",
                overlay_class: "fixed inset-0 flex flex-col items-center justify-center gap-4 bg-white/90",
            },
            WebTheme::Bootstrap => Self {
                use_tailwind: false,
                use_bootstrap: true,
                body_class: "bg-light text-dark",
                header_class: "border-bottom bg-white px-4 py-3",
                main_class: "container py-5",
                card_class: "card card-body mx-auto col-lg-6 mb-4",
                eyebrow_class: "text-uppercase text-muted mb-2",
                headline_class: "h2 fw-bold",
                lede_class: "lead mb-4",
                cta_group_class: "d-flex flex-wrap gap-3",
                button_class: "btn btn-primary btn-lg px-4 py-2",
                alert_class: "alert alert-danger mx-auto col-lg-6",
                overlay_class: "position-fixed top-0 start-0 w-100 h-100 d-flex flex-column align-items-center justify-content-center bg-white bg-opacity-75",
            },
        }
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub theme: WebTheme,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            theme: WebTheme::default(),
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

pub async fn serve(config: WebConfig, portal: Portal) -> Result<(), WebError> {
    let origin = portal.options().origin.clone();
    let state = Arc::new(AppState {
        portal,
        theme: config.theme,
    });
    let router = build_router(state);
    info!(
        %config.addr,
        theme = %config.theme,
        origin = %origin,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<OpenError> for ApiError {
    fn from(value: OpenError) -> Self {
        Self {
            status: status_for(&value),
            body: ErrorBody::from(&value),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn status_for(err: &OpenError) -> StatusCode {
    match err {
        OpenError::MissingIdentifier => StatusCode::BAD_REQUEST,
        OpenError::UnknownType(_) | OpenError::ItemNotOpenable(_) => StatusCode::NOT_FOUND,
        OpenError::NoBaseUrl(_) | OpenError::InvalidFinalUrl | OpenError::VariantNotAllowed(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        OpenError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/open", get(open_html))
        .route("/api/open", get(api_open))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn home(State(state): State<SharedState>) -> impl IntoResponse {
    let chrome = Chrome::new(state.theme);
    let template = HomeTemplate {
        chrome,
        version: env!("CARGO_PKG_VERSION"),
    };
    Html(
        template
            .render()
            .unwrap_or_else(|err| fallback_error_html(&err.to_string())),
    )
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "portal-open-web" }))
}

async fn open_html(
    State(state): State<SharedState>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    let mut page = state.portal.new_page();
    let outcome = state
        .portal
        .render(&mut page, query.as_deref().unwrap_or_default());
    let status = match &outcome {
        Ok(_) => StatusCode::OK,
        Err(err) => status_for(err),
    };
    (status, Html(render_page(&page, state.theme)))
}

async fn api_open(
    State(state): State<SharedState>,
    RawQuery(query): RawQuery,
) -> Result<Json<Resolution>, ApiError> {
    let mut page = state.portal.new_page();
    let resolution = state
        .portal
        .render(&mut page, query.as_deref().unwrap_or_default())?;
    Ok(Json(resolution))
}

/// Renders a page the way a browser embedding would display it.
pub fn render_page(page: &Page, theme: WebTheme) -> String {
    let title = page
        .blocks()
        .iter()
        .rev()
        .find_map(|block| match block {
            Block::Card(card) => Some(card.title.clone()),
            Block::Error(_) => None,
        })
        .or_else(|| page.header().map(|header| header.title.clone()))
        .unwrap_or_else(|| "Open".to_string());
    let template = PageTemplate {
        chrome: Chrome::new(theme),
        page,
        title,
        root_id: page.target().trim_start_matches('#'),
        script: deferred_script(page),
    };
    template
        .render()
        .unwrap_or_else(|err| fallback_error_html(&err.to_string()))
}

fn deferred_script(page: &Page) -> Option<String> {
    if page.deferred().is_empty() {
        return None;
    }
    let mut script = String::new();
    for action in page.deferred() {
        let body = match action {
            Deferred::Navigate { url, new_tab, .. } => {
                if *new_tab {
                    format!("window.open({}, '_blank', 'noopener');", js_string(url))
                } else {
                    format!("window.location.assign({});", js_string(url))
                }
            }
            Deferred::RevealFallback { .. } => {
                "var link = document.getElementById('portal-fallback'); if (link) { link.hidden = false; }"
                    .to_string()
            }
        };
        script.push_str(&format!(
            "setTimeout(function () {{ {body} }}, {});\n",
            action.after().as_millis()
        ));
    }
    Some(script)
}

/// JSON string literal that cannot close the surrounding `<script>` element.
fn js_string(value: &str) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
}

fn fallback_error_html(message: &str) -> String {
    format!(
        "<!DOCTYPE html><html lang=\"en\"><body><p>{}</p></body></html>",
        crate::page::escape_html(message)
    )
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Portal Open</title>
    {% if chrome.use_tailwind %}
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
    {% endif %}
    {% if chrome.use_bootstrap %}
    <link href="https://cdn.jsdelivr.net/npm/bootstrap@5.3.8/dist/css/bootstrap.min.css" rel="stylesheet" integrity="sha384-sRIl4kxILFvY47J16cr9ZwB07vP4J8+LH7qKQnuqkuIAvNWLzeN8tE5YBujZqJLB" crossorigin="anonymous">
    {% endif %}
  </head>
  <body class="{{ chrome.body_class }}">
    <main class="{{ chrome.main_class }}">
      <div class="{{ chrome.card_class }}">
        <p class="{{ chrome.eyebrow_class }}">Portal Open v{{ version }}</p>
        <h1 class="{{ chrome.headline_class }}">Open an item by its identifier.</h1>
        <p class="{{ chrome.lede_class }}">Link to <code>/open?id=&lt;identifier&gt;</code>, optionally with <code>variant</code>, <code>newtab=1</code>, or <code>auto=1</code>.</p>
      </div>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct HomeTemplate {
    chrome: Chrome,
    version: &'static str,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <meta name="robots" content="noindex" />
    <title>{{ title }}</title>
    {% if chrome.use_tailwind %}
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
    {% endif %}
    {% if chrome.use_bootstrap %}
    <link href="https://cdn.jsdelivr.net/npm/bootstrap@5.3.8/dist/css/bootstrap.min.css" rel="stylesheet" integrity="sha384-sRIl4kxILFvY47J16cr9ZwB07vP4J8+LH7qKQnuqkuIAvNWLzeN8tE5YBujZqJLB" crossorigin="anonymous">
    {% endif %}
  </head>
  <body class="{{ chrome.body_class }}">
    {% if let Some(header) = page.header() %}
    <header data-portal-header class="{{ chrome.header_class }}">
      {% if let Some(subject) = header.subject.as_ref() %}
      <p class="{{ chrome.eyebrow_class }}">{{ subject }}</p>
      {% endif %}
      <p class="{{ chrome.headline_class }}">{{ header.title }}</p>
    </header>
    {% endif %}
    <main id="{{ root_id }}" class="{{ chrome.main_class }}">
      {% for block in page.blocks() %}
      {% match block %}
      {% when Block::Card with (card) %}
      <article class="{{ chrome.card_class }}">
        <h1 class="{{ chrome.headline_class }}">{{ card.title }}</h1>
        {% if !card.description.is_empty() %}
        <p class="{{ chrome.lede_class }}">{{ card.description }}</p>
        {% endif %}
        <div class="{{ chrome.cta_group_class }}">
          <a href="{{ card.url }}" class="{{ chrome.button_class }}"{% if card.open_in_new_tab %} target="_blank" rel="noopener noreferrer"{% endif %}>Open</a>
        </div>
      </article>
      {% when Block::Error with (panel) %}
      <div role="alert" class="{{ chrome.alert_class }}">
        <p>{{ panel.html()|safe }}</p>
      </div>
      {% endmatch %}
      {% endfor %}
    </main>
    {% if let Some(overlay) = page.loading() %}
    <div data-portal-loading class="{{ chrome.overlay_class }}" role="status">
      <p class="{{ chrome.lede_class }}">{{ overlay.message }}</p>
      <a id="portal-fallback" href="{{ overlay.fallback_url }}" class="{{ chrome.button_class }}"{% if !overlay.fallback_visible %} hidden{% endif %}>Continue manually</a>
    </div>
    {% endif %}
    {% if let Some(script) = script %}
    <script>
{{ script|safe }}
    </script>
    {% endif %}
  </body>
</html>"#,
    ext = "html"
)]
struct PageTemplate<'a> {
    chrome: Chrome,
    page: &'a Page,
    title: String,
    root_id: &'a str,
    script: Option<String>,
}
