//! HTML → readable text for `static_url` sources.
//!
//! Walks the parsed document, skipping non-content elements, and emits one
//! paragraph per block-level element so the chunker can split on `\n\n`.

use anyhow::{bail, Result};
use scraper::{ElementRef, Html};

/// Pages with fewer words than this are treated as fetch failures
/// (error pages, JS-only shells).
pub const MIN_WORD_COUNT: usize = 10;

const EXCLUDED: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "svg", "template", "iframe", "head",
];

const BLOCKS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "br",
    "dd",
    "div",
    "dl",
    "dt",
    "figcaption",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hr",
    "li",
    "main",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "td",
    "th",
    "tr",
    "ul",
];

pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = Paragraphs::default();
    walk(&document.root_element(), &mut out);
    out.finish()
}

pub fn check_word_count(text: &str) -> Result<()> {
    let words = text.split_whitespace().count();
    if words < MIN_WORD_COUNT {
        bail!(
            "page has too little text ({} words, need at least {})",
            words,
            MIN_WORD_COUNT
        );
    }
    Ok(())
}

#[derive(Default)]
struct Paragraphs {
    done: Vec<String>,
    current: String,
}

impl Paragraphs {
    fn push_text(&mut self, text: &str) {
        self.current.push_str(text);
    }

    fn break_paragraph(&mut self) {
        let para = self.current.split_whitespace().collect::<Vec<_>>().join(" ");
        if !para.is_empty() {
            self.done.push(para);
        }
        self.current.clear();
    }

    fn finish(mut self) -> String {
        self.break_paragraph();
        self.done.join("\n\n")
    }
}

fn walk(element: &ElementRef<'_>, out: &mut Paragraphs) {
    let name = element.value().name();
    if EXCLUDED.contains(&name) {
        return;
    }

    let block = BLOCKS.contains(&name);
    if block {
        out.break_paragraph();
    }

    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_text(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            walk(&child, out);
        }
    }

    if block {
        out.break_paragraph();
    }
}
