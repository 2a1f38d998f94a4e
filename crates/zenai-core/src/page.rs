//! Page context: a bounded text snapshot of the page the user is looking at.

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const MAX_CONTENT_CHARS: usize = 5000;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    pub title: String,
    pub url: String,
    /// At most [`MAX_CONTENT_CHARS`] characters.
    pub content: String,
}

impl PageContext {
    pub fn new(title: impl Into<String>, url: impl Into<String>, content: &str) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            content: truncate_content(&collapse_whitespace(content)),
        }
    }

    pub fn from_html(html: &str, url: impl Into<String>) -> Self {
        let title = extract_title(html).unwrap_or_default();
        Self::new(title, url, &extract_main_text(html))
    }
}

#[async_trait]
pub trait PageContextProvider: Send + Sync {
    async fn get(&self) -> Result<Option<PageContext>>;
}

/// Asks the provider once; any failure means the session runs without context.
pub async fn load_page_context(provider: Option<&dyn PageContextProvider>) -> Option<PageContext> {
    let provider = provider?;
    match provider.get().await {
        Ok(Some(page)) => {
            info!(title = %page.title, url = %page.url, chars = page.content.chars().count(), "loaded page context");
            Some(page)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "page context unavailable, continuing without it");
            None
        }
    }
}

/// Reads a local HTML or plain-text file.
pub struct FilePageProvider {
    path: PathBuf,
}

impl FilePageProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PageContextProvider for FilePageProvider {
    async fn get(&self) -> Result<Option<PageContext>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;

        let absolute = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        let url = format!("file://{}", absolute.display());

        if looks_like_html(&text) {
            let mut page = PageContext::from_html(&text, url);
            if page.title.is_empty() {
                page.title = file_title(&self.path);
            }
            Ok(Some(page))
        } else {
            Ok(Some(PageContext::new(file_title(&self.path), url, &text)))
        }
    }
}

/// Fetches a page over HTTP and extracts its readable text.
pub struct UrlPageProvider {
    client: Client,
    url: String,
}

impl UrlPageProvider {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl PageContextProvider for UrlPageProvider {
    async fn get(&self) -> Result<Option<PageContext>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;

        let final_url = response.url().to_string();
        let html = response.text().await?;
        Ok(Some(PageContext::from_html(&html, final_url)))
    }
}

fn file_title(path: &std::path::Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn looks_like_html(text: &str) -> bool {
    let head: String = text.chars().take(1024).collect::<String>().to_ascii_lowercase();
    head.contains("<html") || head.contains("<!doctype html") || head.contains("<body")
}

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

fn extract_title(html: &str) -> Option<String> {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    cached(&TITLE, r"(?is)<title\b[^>]*>(.*?)</title\s*>")
        .captures(html)
        .map(|caps| collapse_whitespace(&decode_entities(&caps[1])))
        .filter(|title| !title.is_empty())
}

/// The subset of CSS selectors used to pick and prune page regions.
#[derive(Debug, Clone, Copy)]
enum Selector {
    Tag(&'static str),
    Class(&'static str),
    Id(&'static str),
    Role(&'static str),
}

use Selector::{Class, Id, Role, Tag};

/// Tried in order; the first match wins, otherwise `body`.
const MAIN_SELECTORS: [Selector; 8] = [
    Tag("article"),
    Tag("main"),
    Role("main"),
    Class("content"),
    Class("post-content"),
    Class("article-content"),
    Class("entry-content"),
    Id("content"),
];

/// Raw-text elements, removed before anything else is matched.
const RAW_TEXT: [Selector; 3] = [Tag("script"), Tag("style"), Tag("noscript")];

const UNWANTED: [Selector; 11] = [
    Tag("nav"),
    Tag("header"),
    Tag("footer"),
    Tag("aside"),
    Class("sidebar"),
    Class("ads"),
    Class("advertisement"),
    Class("comments"),
    Class("social-share"),
    Tag("iframe"),
    Tag("form"),
];

const VOID_TAGS: [&str; 13] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

impl Selector {
    fn matches(self, name: &str, attrs: &str) -> bool {
        match self {
            Tag(tag) => name.eq_ignore_ascii_case(tag),
            Class(class) => attribute(attrs, "class")
                .is_some_and(|value| value.split_whitespace().any(|c| c == class)),
            Id(id) => attribute(attrs, "id").is_some_and(|value| value.trim() == id),
            Role(role) => {
                attribute(attrs, "role").is_some_and(|value| value.trim().eq_ignore_ascii_case(role))
            }
        }
    }
}

fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    static ATTR: OnceLock<Regex> = OnceLock::new();
    cached(&ATTR, r#"(?i)([a-z][a-z0-9_:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .captures_iter(attrs)
        .find(|caps| caps[1].eq_ignore_ascii_case(name))
        .and_then(|caps| caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4)))
        .map(|m| m.as_str())
}

/// Byte offsets of one element: `start..end` spans the tags, `inner` the content.
struct ElementSpan {
    start: usize,
    inner: std::ops::Range<usize>,
    end: usize,
}

/// First element in document order matching `selector`, with nesting of the
/// same tag accounted for. An unclosed element runs to the end of the input.
fn find_element(html: &str, selector: Selector) -> Option<ElementSpan> {
    static TAG_TOKEN: OnceLock<Regex> = OnceLock::new();
    let tokens = cached(&TAG_TOKEN, r"<(/?)([A-Za-z][A-Za-z0-9-]*)\b([^>]*)>");

    let mut iter = tokens.captures_iter(html);
    let (open, name) = loop {
        let caps = iter.next()?;
        if caps[1].is_empty() && selector.matches(&caps[2], &caps[3]) {
            break (caps.get(0)?, caps[2].to_ascii_lowercase());
        }
    };

    let is_void = |tag: &str, whole: &str| whole.ends_with("/>") || VOID_TAGS.contains(&tag);
    if is_void(name.as_str(), open.as_str()) {
        return Some(ElementSpan {
            start: open.start(),
            inner: open.end()..open.end(),
            end: open.end(),
        });
    }

    let mut depth = 1usize;
    for caps in iter {
        if !caps[2].eq_ignore_ascii_case(&name) {
            continue;
        }
        let Some(whole) = caps.get(0) else { continue };
        if !caps[1].is_empty() {
            depth -= 1;
            if depth == 0 {
                return Some(ElementSpan {
                    start: open.start(),
                    inner: open.end()..whole.start(),
                    end: whole.end(),
                });
            }
        } else if !is_void(name.as_str(), whole.as_str()) {
            depth += 1;
        }
    }

    Some(ElementSpan {
        start: open.start(),
        inner: open.end()..html.len(),
        end: html.len(),
    })
}

fn remove_all(mut html: String, selectors: &[Selector]) -> String {
    for &selector in selectors {
        while let Some(span) = find_element(&html, selector) {
            html.replace_range(span.start..span.end, " ");
        }
    }
    html
}

/// Picks the main region (see [`MAIN_SELECTORS`]), strips chrome and markup.
fn extract_main_text(html: &str) -> String {
    static COMMENT: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();

    let html = cached(&COMMENT, r"(?s)<!--.*?-->").replace_all(html, " ").into_owned();
    let html = remove_all(html, &RAW_TEXT);

    let section = MAIN_SELECTORS
        .iter()
        .chain(std::iter::once(&Tag("body")))
        .find_map(|&selector| find_element(&html, selector))
        .map(|span| html[span.inner].to_string())
        .unwrap_or_else(|| html.clone());

    let cleaned = remove_all(section, &UNWANTED);
    let text = cached(&TAG, r"(?s)<[^>]*>").replace_all(&cleaned, " ");
    decode_entities(&text)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_content(text: &str) -> String {
    if text.chars().count() <= MAX_CONTENT_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MAX_CONTENT_CHARS - ELLIPSIS.len()).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}
