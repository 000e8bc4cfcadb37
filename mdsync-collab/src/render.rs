//! Document source → sanitized HTML.
//!
//! The hub calls a [`Renderer`] synchronously whenever it emits an `init` or
//! `update` envelope. Rendering never fails the caller: errors degrade to an
//! empty representation and the raw source is still delivered.

use std::collections::HashSet;

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd};

/// Text-to-safe-markup collaborator.
pub trait Renderer: Send + 'static {
    fn render(&self, source: &str) -> Result<String, RenderError>;
}

/// Rendering failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderError(pub String);

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Render error: {}", self.0)
    }
}

impl std::error::Error for RenderError {}

/// CommonMark + GFM (tables, strikethrough, task lists) with hard line
/// breaks and heading anchor ids, sanitized against a user-generated-content
/// allow list.
pub struct MarkdownRenderer {
    options: Options,
    sanitizer: ammonia::Builder<'static>,
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        let options = Options::ENABLE_TABLES
            | Options::ENABLE_STRIKETHROUGH
            | Options::ENABLE_TASKLISTS;

        let mut sanitizer = ammonia::Builder::default();
        // Task list checkboxes
        sanitizer
            .add_tags(&["input"])
            .add_tag_attributes("input", &["type", "checked", "disabled"]);
        for heading in ["h1", "h2", "h3", "h4", "h5", "h6"] {
            sanitizer.add_tag_attributes(heading, &["id"]);
        }

        Self { options, sanitizer }
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for MarkdownRenderer {
    fn render(&self, source: &str) -> Result<String, RenderError> {
        let mut events: Vec<Event<'_>> = Parser::new_ext(source, self.options)
            .map(|event| match event {
                Event::SoftBreak => Event::HardBreak,
                other => other,
            })
            .collect();
        assign_heading_ids(&mut events);

        let mut raw = String::with_capacity(source.len() * 3 / 2);
        html::push_html(&mut raw, events.into_iter());

        Ok(self.sanitizer.clean(&raw).to_string())
    }
}

/// Give every heading an anchor id derived from its text. Repeated ids get
/// `-1`, `-2`, ... appended, in document order.
fn assign_heading_ids(events: &mut [Event<'_>]) {
    let mut taken = HashSet::new();
    let mut i = 0;
    while i < events.len() {
        if let Event::Start(Tag::Heading { id: None, .. }) = &events[i] {
            let mut text = String::new();
            let mut end = i + 1;
            while end < events.len() {
                match &events[end] {
                    Event::End(TagEnd::Heading(_)) => break,
                    Event::Text(t) | Event::Code(t) => text.push_str(t),
                    _ => {}
                }
                end += 1;
            }

            let slug = unique_slug(heading_slug(&text), &mut taken);
            if let Event::Start(Tag::Heading { id, .. }) = &mut events[i] {
                *id = Some(CowStr::from(slug));
            }
            i = end;
        }
        i += 1;
    }
}

/// ASCII letters and digits lowercased; whitespace, `-` and `_` become `-`;
/// everything else is dropped. Falls back to `heading`.
fn heading_slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if c.is_ascii_whitespace() || c == '-' || c == '_' {
            slug.push('-');
        }
    }
    if slug.is_empty() {
        slug.push_str("heading");
    }
    slug
}

fn unique_slug(slug: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(slug.clone()) {
        return slug;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{slug}-{n}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Remembers the last rendered document.
///
/// Every registration re-renders the current document; with the cache an
/// unchanged document costs one string comparison.
pub struct RenderCache<R> {
    renderer: R,
    last: Option<(String, String)>,
}

impl<R: Renderer> RenderCache<R> {
    pub fn new(renderer: R) -> Self {
        Self { renderer, last: None }
    }

    /// Render `source`, or return the empty string if the renderer fails.
    /// Failures are not cached.
    pub fn render(&mut self, source: &str) -> String {
        if let Some((cached_source, cached_html)) = &self.last {
            if cached_source == source {
                return cached_html.clone();
            }
        }

        match self.renderer.render(source) {
            Ok(rendered) => {
                self.last = Some((source.to_owned(), rendered.clone()));
                rendered
            }
            Err(e) => {
                log::warn!("{e}; delivering empty rendered form");
                String::new()
            }
        }
    }
}
