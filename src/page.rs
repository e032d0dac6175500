//! In-memory rendering root: records the same mutations the embedding page
//! would receive (header, appended blocks, loading overlay, timed actions).

use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub const HEADER_MARKER: &str = "data-portal-header";
pub const LOADING_MARKER: &str = "data-portal-loading";

/// Lets the card paint before navigating away.
pub const AUTO_NAVIGATE_DELAY: Duration = Duration::from_millis(150);
/// Reveals the manual link in case automatic navigation stalls.
pub const FALLBACK_LINK_DELAY: Duration = Duration::from_millis(2500);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenCard {
    pub title: String,
    pub description: String,
    pub url: String,
    pub open_in_new_tab: bool,
    pub auto_navigate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PanelMessage {
    /// Plain text; escaped whenever it is rendered as HTML.
    Text(String),
    /// Markup produced by this crate from static text only.
    TrustedHtml(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPanel {
    pub message: PanelMessage,
}

impl ErrorPanel {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: PanelMessage::Text(message.into()),
        }
    }

    pub fn trusted_html(markup: impl Into<String>) -> Self {
        Self {
            message: PanelMessage::TrustedHtml(markup.into()),
        }
    }

    /// Markup that is safe to insert as-is.
    pub fn html(&self) -> String {
        match &self.message {
            PanelMessage::Text(text) => escape_html(text),
            PanelMessage::TrustedHtml(markup) => markup.clone(),
        }
    }

    /// Text with any markup stripped, for terminals and logs.
    pub fn plain_text(&self) -> String {
        match &self.message {
            PanelMessage::Text(text) => text.clone(),
            PanelMessage::TrustedHtml(markup) => strip_tags(markup),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "block", rename_all = "snake_case")]
pub enum Block {
    Card(OpenCard),
    Error(ErrorPanel),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderBlock {
    pub title: String,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadingOverlay {
    pub message: String,
    pub fallback_url: String,
    pub fallback_visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Deferred {
    Navigate {
        #[serde(with = "millis")]
        after: Duration,
        url: String,
        new_tab: bool,
    },
    RevealFallback {
        #[serde(with = "millis")]
        after: Duration,
    },
}

impl Deferred {
    pub fn after(&self) -> Duration {
        match self {
            Deferred::Navigate { after, .. } | Deferred::RevealFallback { after } => *after,
        }
    }
}

/// The single navigation capability of the host environment.
pub trait Navigator {
    fn navigate(&mut self, url: &str, new_tab: bool);
}

/// Records navigations instead of performing them.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    pub visited: Vec<(String, bool)>,
}

impl Navigator for RecordingNavigator {
    fn navigate(&mut self, url: &str, new_tab: bool) {
        self.visited.push((url.to_string(), new_tab));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    target: String,
    header: Option<HeaderBlock>,
    blocks: Vec<Block>,
    loading: Option<LoadingOverlay>,
    deferred: Vec<Deferred>,
}

impl Page {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            header: None,
            blocks: Vec::new(),
            loading: None,
            deferred: Vec::new(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn header(&self) -> Option<&HeaderBlock> {
        self.header.as_ref()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn loading(&self) -> Option<&LoadingOverlay> {
        self.loading.as_ref()
    }

    pub fn deferred(&self) -> &[Deferred] {
        &self.deferred
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        match marker {
            HEADER_MARKER => self.header.is_some(),
            LOADING_MARKER => self.loading.is_some(),
            _ => false,
        }
    }

    /// Inserts the header unless one is already present.
    pub fn insert_header(&mut self, header: HeaderBlock) -> bool {
        if self.has_marker(HEADER_MARKER) {
            return false;
        }
        self.header = Some(header);
        true
    }

    /// Appends to the target root. Earlier blocks are never cleared.
    pub fn append(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Shows the loading overlay unless one is already present.
    pub fn show_loading(&mut self, overlay: LoadingOverlay) -> bool {
        if self.has_marker(LOADING_MARKER) {
            debug!("Loading overlay already present");
            return false;
        }
        self.loading = Some(overlay);
        true
    }

    pub fn schedule(&mut self, action: Deferred) {
        self.deferred.push(action);
    }

    /// Fires every deferred action due at `elapsed` since scheduling.
    ///
    /// Fired actions are removed; there is no way to cancel a pending one.
    /// Returns how many actions fired.
    pub fn run_due(&mut self, elapsed: Duration, navigator: &mut dyn Navigator) -> usize {
        let (due, pending): (Vec<_>, Vec<_>) = self
            .deferred
            .drain(..)
            .partition(|action| action.after() <= elapsed);
        self.deferred = pending;
        for action in &due {
            match action {
                Deferred::Navigate { url, new_tab, .. } => navigator.navigate(url, *new_tab),
                Deferred::RevealFallback { .. } => {
                    if let Some(overlay) = self.loading.as_mut() {
                        overlay.fallback_visible = true;
                    }
                }
            }
        }
        due.len()
    }

    /// Fires every pending action regardless of its delay.
    pub fn flush_deferred(&mut self, navigator: &mut dyn Navigator) -> usize {
        self.run_due(Duration::MAX, navigator)
    }
}

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn strip_tags(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut in_tag = false;
    for ch in markup.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> HeaderBlock {
        HeaderBlock {
            title: "Portal".into(),
            subject: None,
        }
    }

    fn overlay() -> LoadingOverlay {
        LoadingOverlay {
            message: "Opening…".into(),
            fallback_url: "https://x.test/".into(),
            fallback_visible: false,
        }
    }

    #[test]
    fn header_is_inserted_once() {
        let mut page = Page::new("#portal-root");
        assert!(page.insert_header(header()));
        assert!(!page.insert_header(HeaderBlock {
            title: "Second".into(),
            subject: Some("ignored".into()),
        }));
        assert_eq!(page.header().unwrap().title, "Portal");
    }

    #[test]
    fn loading_overlay_is_guarded_by_marker() {
        let mut page = Page::new("#portal-root");
        assert!(!page.has_marker(LOADING_MARKER));
        assert!(page.show_loading(overlay()));
        assert!(page.has_marker(LOADING_MARKER));
        assert!(!page.show_loading(overlay()));
    }

    #[test]
    fn blocks_accumulate() {
        let mut page = Page::new("#portal-root");
        page.append(Block::Error(ErrorPanel::text("one")));
        page.append(Block::Error(ErrorPanel::text("two")));
        assert_eq!(page.blocks().len(), 2);
    }

    #[test]
    fn deferred_actions_fire_when_due_and_only_once() {
        let mut page = Page::new("#portal-root");
        page.show_loading(overlay());
        page.schedule(Deferred::Navigate {
            after: AUTO_NAVIGATE_DELAY,
            url: "https://x.test/".into(),
            new_tab: false,
        });
        page.schedule(Deferred::RevealFallback {
            after: FALLBACK_LINK_DELAY,
        });
        let mut nav = RecordingNavigator::default();

        assert_eq!(page.run_due(Duration::from_millis(10), &mut nav), 0);
        assert!(nav.visited.is_empty());

        assert_eq!(page.run_due(AUTO_NAVIGATE_DELAY, &mut nav), 1);
        assert_eq!(nav.visited, vec![("https://x.test/".to_string(), false)]);
        assert!(!page.loading().unwrap().fallback_visible);

        assert_eq!(page.run_due(Duration::from_secs(3), &mut nav), 1);
        assert!(page.loading().unwrap().fallback_visible);
        assert_eq!(nav.visited.len(), 1);
        assert!(page.deferred().is_empty());
    }

    #[test]
    fn flush_fires_everything_pending() {
        let mut page = Page::new("#portal-root");
        page.show_loading(overlay());
        page.schedule(Deferred::RevealFallback {
            after: FALLBACK_LINK_DELAY,
        });
        page.schedule(Deferred::Navigate {
            after: AUTO_NAVIGATE_DELAY,
            url: "https://x.test/".into(),
            new_tab: true,
        });
        let mut nav = RecordingNavigator::default();
        assert_eq!(page.flush_deferred(&mut nav), 2);
        assert_eq!(nav.visited, vec![("https://x.test/".to_string(), true)]);
        assert!(page.loading().unwrap().fallback_visible);
        assert_eq!(page.flush_deferred(&mut nav), 0);
    }

    #[test]
    fn panel_html_escapes_text_and_trusts_markup() {
        let text = ErrorPanel::text("<img src=x onerror=alert(1)> & more");
        assert_eq!(
            text.html(),
            "&lt;img src=x onerror=alert(1)&gt; &amp; more"
        );
        let trusted = ErrorPanel::trusted_html("Add <code>?id=</code> &amp; retry");
        assert_eq!(trusted.html(), "Add <code>?id=</code> &amp; retry");
        assert_eq!(trusted.plain_text(), "Add ?id= & retry");
    }

    #[test]
    fn deferred_serializes_delay_in_millis() {
        let value = serde_json::to_value(Deferred::RevealFallback {
            after: FALLBACK_LINK_DELAY,
        })
        .unwrap();
        assert_eq!(value["action"], "reveal_fallback");
        assert_eq!(value["after"], 2500);
    }

    #[test]
    fn oversized_delay_saturates() {
        let value = serde_json::to_value(Deferred::RevealFallback {
            after: Duration::MAX,
        })
        .unwrap();
        assert_eq!(value["after"], u64::MAX);
    }
}
