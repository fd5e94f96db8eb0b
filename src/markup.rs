//! Generator rich text to Telegram HTML
//!
//! The generator writes a small HTML vocabulary (bold, italic, headings,
//! lists, line breaks, links). Telegram's HTML parse mode accepts only a
//! subset of tags and rejects unbalanced markup, so everything is re-emitted
//! through a tag stack. The transform is total: unknown tags are stripped,
//! stray closers dropped and anything left open is closed at the end.

use crate::state_machine::Draft;
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Telegram's limit on message text after entity parsing, in UTF-16 code units
pub const MAX_MESSAGE_LEN: usize = 4096;

const ELLIPSIS: char = '…';

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(/?)([A-Za-z][A-Za-z0-9]*)([^<>]*)>").unwrap());

static ANY_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<>]*>").unwrap());

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z]+);").unwrap());

static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});

// ============================================================================
// Public API
// ============================================================================

/// Convert generator rich text into Telegram HTML
pub fn to_telegram_html(body: &str) -> String {
    let mut renderer = Renderer::new(None);
    renderer.feed_html(body);
    renderer.finish()
}

/// Article message shown under a draft: heading, bold title, converted body.
/// Truncated with an ellipsis to fit in a single Telegram message.
pub fn render_article(heading: &str, draft: &Draft) -> String {
    let mut renderer = Renderer::new(Some(MAX_MESSAGE_LEN));
    renderer.text(heading);
    renderer.text("\n\n");
    renderer.open(Style::Bold);
    renderer.text("Title:");
    renderer.close(Style::Bold);
    renderer.text(" ");
    renderer.text(&draft.title);
    renderer.text("\n\n");
    renderer.feed_html(&draft.body);
    renderer.finish()
}

/// Generator rich text as plain text, with list bullets and heading breaks kept
pub fn to_plain_text(body: &str) -> String {
    strip_markup(&to_telegram_html(body))
}

/// Remove all tags and decode entities, leaving the plain text
pub fn strip_markup(html: &str) -> String {
    decode_entities(&ANY_TAG_RE.replace_all(html, ""))
}

/// Escape text for Telegram's HTML parse mode
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode named and numeric character references; unknown ones are kept verbatim
pub fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            let decoded = if let Some(num) = name.strip_prefix("#x").or(name.strip_prefix("#X")) {
                u32::from_str_radix(num, 16).ok().and_then(char::from_u32)
            } else if let Some(num) = name.strip_prefix('#') {
                num.parse().ok().and_then(char::from_u32)
            } else {
                named_entity(name)
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        // Rendered as a plain space
        "nbsp" => ' ',
        "ndash" => '–',
        "mdash" => '—',
        "hellip" => '…',
        "laquo" => '«',
        "raquo" => '»',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "copy" => '©',
        _ => return None,
    })
}

// ============================================================================
// Renderer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Bold,
    Italic,
    Heading,
    Link,
}

impl Style {
    fn from_tag(name: &str) -> Option<Style> {
        match name {
            "b" | "strong" => Some(Style::Bold),
            "i" | "em" => Some(Style::Italic),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Some(Style::Heading),
            "a" => Some(Style::Link),
            _ => None,
        }
    }

    fn closing_tag(self) -> &'static str {
        match self {
            Style::Bold | Style::Heading => "</b>",
            Style::Italic => "</i>",
            Style::Link => "</a>",
        }
    }
}

struct Renderer {
    out: String,
    open: Vec<Style>,
    /// Remaining visible length, in UTF-16 code units
    budget: Option<usize>,
    truncated: bool,
}

impl Renderer {
    fn new(limit: Option<usize>) -> Self {
        Self {
            out: String::new(),
            open: Vec::new(),
            budget: limit,
            truncated: false,
        }
    }

    fn feed_html(&mut self, html: &str) {
        let mut last = 0;
        for caps in TAG_RE.captures_iter(html) {
            let Some(whole) = caps.get(0) else { continue };
            self.text(&decode_entities(html.get(last..whole.start()).unwrap_or_default()));
            last = whole.end();

            let name = caps[2].to_ascii_lowercase();
            if &caps[1] == "/" {
                self.end_tag(&name);
            } else {
                self.start_tag(&name, &caps[3]);
            }
        }
        self.text(&decode_entities(html.get(last..).unwrap_or_default()));
    }

    fn start_tag(&mut self, name: &str, attrs: &str) {
        match name {
            "br" => self.text("\n"),
            "li" => self.text("\n• "),
            "a" => {
                let href = HREF_RE.captures(attrs).and_then(|c| {
                    c.get(1)
                        .or_else(|| c.get(2))
                        .or_else(|| c.get(3))
                        .map(|m| decode_entities(m.as_str().trim()))
                });
                // Anchors without a target are plain text
                if let Some(href) = href.filter(|h| !h.is_empty()) {
                    self.open_link(&href);
                }
            }
            _ => {
                if let Some(style) = Style::from_tag(name) {
                    self.open(style);
                }
            }
        }
    }

    fn end_tag(&mut self, name: &str) {
        if let Some(style) = Style::from_tag(name) {
            let was_heading = style == Style::Heading && self.open.contains(&Style::Heading);
            self.close(style);
            if was_heading {
                self.text("\n");
            }
        }
    }

    fn open(&mut self, style: Style) {
        if self.truncated {
            return;
        }
        let tag = match style {
            Style::Bold | Style::Heading => "<b>",
            Style::Italic => "<i>",
            // Links need a target, see `open_link`
            Style::Link => return,
        };
        self.out.push_str(tag);
        self.open.push(style);
    }

    fn open_link(&mut self, href: &str) {
        if self.truncated {
            return;
        }
        self.out.push_str("<a href=\"");
        self.out.push_str(&escape_html(href));
        self.out.push_str("\">");
        self.open.push(Style::Link);
    }

    /// Close `style` and anything opened after it; a closer with no opener is dropped
    fn close(&mut self, style: Style) {
        let Some(pos) = self.open.iter().rposition(|s| *s == style) else {
            return;
        };
        for open in self.open.drain(pos..).rev() {
            self.out.push_str(open.closing_tag());
        }
    }

    fn text(&mut self, text: &str) {
        if self.truncated || text.is_empty() {
            return;
        }
        let Some(budget) = self.budget else {
            self.out.push_str(&escape_html(text));
            return;
        };

        let needed: usize = text.chars().map(char::len_utf16).sum();
        if needed <= budget {
            self.out.push_str(&escape_html(text));
            self.budget = Some(budget - needed);
            return;
        }

        // Leave room for the ellipsis
        let mut room = budget.saturating_sub(ELLIPSIS.len_utf16());
        let mut kept = String::new();
        for c in text.chars() {
            let width = c.len_utf16();
            if width > room {
                break;
            }
            room -= width;
            kept.push(c);
        }
        kept.push(ELLIPSIS);
        self.out.push_str(&escape_html(&kept));
        self.budget = Some(0);
        self.truncated = true;
    }

    fn finish(mut self) -> String {
        for open in self.open.drain(..).rev() {
            self.out.push_str(open.closing_tag());
        }
        self.out
    }
}
