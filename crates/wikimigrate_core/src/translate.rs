use std::panic::{self, AssertUnwindSafe};

use crate::config::{Dialect, EngineConfig, PostProcessKind};
use crate::error::{MigrationError, Result};
use crate::model::Page;
use crate::render::HtmlDocument;

/// Turns the intermediate HTML form into target-dialect text.
pub trait Translator {
    fn translate(&self, html: &HtmlDocument) -> Result<String>;
}

/// Picks the translator writing the target engine's dialect.
pub fn translator_for(config: &EngineConfig) -> Result<Box<dyn Translator>> {
    match config.dialect() {
        Dialect::Markdown => Ok(Box::new(Html2MdTranslator)),
        Dialect::JspWiki => Err(MigrationError::configuration(
            "no HTML translator available for jspwiki target pages",
        )),
    }
}

/// HTML to Markdown through `html2md`. Markdown metacharacters in text
/// (`* _ < > ~ \`, and `= > + - #` at the start of a line) come out
/// backslash-escaped, so text equality with the source holds once those
/// escapes are removed. A prose line starting with `1. ` is not escaped and
/// reads as an ordered list item in Markdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct Html2MdTranslator;

impl Translator for Html2MdTranslator {
    fn translate(&self, html: &HtmlDocument) -> Result<String> {
        let source = html.as_str();
        let markdown = panic::catch_unwind(AssertUnwindSafe(|| html2md::parse_html(source)))
            .map_err(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|value| (*value).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                MigrationError::translation(format!(
                    "html2md failed on intermediate document: {reason}"
                ))
            })?;

        if markdown.trim().is_empty() && html.has_visible_text() {
            return Err(MigrationError::translation(
                "translator produced no output for a document with text",
            ));
        }
        Ok(markdown)
    }
}

/// Hook applied to translated text before it is saved.
pub trait PostProcess {
    fn apply(&self, page: &Page, text: String) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityPostProcess;

impl PostProcess for IdentityPostProcess {
    fn apply(&self, _page: &Page, text: String) -> String {
        text
    }
}

/// Strips trailing whitespace, collapses runs of blank lines and ends the
/// text with exactly one newline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TidyPostProcess;

impl PostProcess for TidyPostProcess {
    fn apply(&self, _page: &Page, text: String) -> String {
        let mut out = String::with_capacity(text.len() + 1);
        let mut blank_run = 0usize;
        for line in text.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                blank_run += 1;
                if blank_run > 1 || out.is_empty() {
                    continue;
                }
            } else {
                blank_run = 0;
            }
            out.push_str(line);
            out.push('\n');
        }
        while out.ends_with("\n\n") {
            out.pop();
        }
        out
    }
}

pub fn post_processor_for(kind: PostProcessKind) -> Box<dyn PostProcess> {
    match kind {
        PostProcessKind::Identity => Box::new(IdentityPostProcess),
        PostProcessKind::Tidy => Box::new(TidyPostProcess),
    }
}
