use tracing::debug;

use crate::config::{EngineConfig, ParserKind};
use crate::error::{MigrationError, Result};
use crate::filesystem::mangle_name;
use crate::model::RenderContext;

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];
const EXTERNAL_PREFIXES: &[&str] = &["http://", "https://", "ftp://", "mailto:"];

/// Intermediate representation handed from a renderer to a translator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlDocument(String);

impl HtmlDocument {
    pub fn new(html: impl Into<String>) -> Self {
        Self(html.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the document has character data outside of tags.
    pub fn has_visible_text(&self) -> bool {
        let mut in_tag = false;
        for c in self.0.chars() {
            match c {
                '<' => in_tag = true,
                '>' => in_tag = false,
                c if !in_tag && !c.is_whitespace() => return true,
                _ => {}
            }
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderFlags {
    pub execute_plugins: bool,
}

impl RenderFlags {
    /// Migration never runs side-effecting extensions.
    pub fn migration() -> Self {
        Self {
            execute_plugins: false,
        }
    }
}

pub trait Renderer {
    fn render(
        &self,
        context: &RenderContext<'_>,
        text: &str,
        flags: RenderFlags,
    ) -> Result<HtmlDocument>;
}

/// Picks the renderer for a source engine's parser.
pub fn renderer_for(config: &EngineConfig) -> Result<Box<dyn Renderer>> {
    match config.parser() {
        ParserKind::JspWiki | ParserKind::JspWikiToMarkdown => {
            Ok(Box::new(JspWikiRenderer::new(config.parser())))
        }
        ParserKind::Markdown => Err(MigrationError::configuration(format!(
            "no renderer available for {} source pages",
            config.dialect().as_str()
        ))),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JspWikiRenderer {
    parser: ParserKind,
}

impl JspWikiRenderer {
    pub fn new(parser: ParserKind) -> Self {
        Self { parser }
    }
}

impl Renderer for JspWikiRenderer {
    fn render(
        &self,
        context: &RenderContext<'_>,
        text: &str,
        flags: RenderFlags,
    ) -> Result<HtmlDocument> {
        let mut state = BlockRenderer {
            inline: InlineRenderer {
                parser: self.parser,
                context,
                flags,
            },
            out: Vec::new(),
            paragraph: Vec::new(),
            lists: Vec::new(),
            in_table: false,
        };
        let lines: Vec<&str> = text.lines().collect();
        let mut index = 0;
        while index < lines.len() {
            index = state.line(&lines, index)?;
        }
        state.flush_all()?;
        Ok(HtmlDocument::new(state.out.join("\n")))
    }
}

struct BlockRenderer<'a, 'c> {
    inline: InlineRenderer<'a, 'c>,
    out: Vec<String>,
    paragraph: Vec<&'a str>,
    lists: Vec<char>,
    in_table: bool,
}

impl<'a> BlockRenderer<'a, '_> {
    /// Renders the block starting at `lines[index]`; returns the next index.
    fn line(&mut self, lines: &[&'a str], index: usize) -> Result<usize> {
        let line = lines[index];

        if let Some(rest) = line.strip_prefix("{{{")
            && !rest.contains("}}}")
        {
            self.flush_all()?;
            return self.preformatted(lines, index, rest);
        }
        if line.trim().is_empty() {
            self.flush_all()?;
            return Ok(index + 1);
        }
        if line.starts_with('!') {
            self.flush_all()?;
            self.heading(line)?;
            return Ok(index + 1);
        }
        if line.starts_with("----") {
            self.flush_all()?;
            self.out.push("<hr />".to_string());
            return Ok(index + 1);
        }
        if line.starts_with('*') || line.starts_with('#') {
            self.flush_paragraph()?;
            self.close_table();
            self.list_item(line)?;
            return Ok(index + 1);
        }
        if let Some(rest) = line.strip_prefix(';') {
            self.flush_all()?;
            let (term, definition) = rest.split_once(':').unwrap_or((rest, ""));
            self.out.push(format!(
                "<dl><dt>{}</dt><dd>{}</dd></dl>",
                self.inline.render(term.trim())?,
                self.inline.render(definition.trim())?
            ));
            return Ok(index + 1);
        }
        if line.starts_with('|') {
            self.flush_paragraph()?;
            self.close_lists();
            self.table_row(line)?;
            return Ok(index + 1);
        }

        self.close_lists();
        self.close_table();
        self.paragraph.push(line);
        Ok(index + 1)
    }

    fn preformatted(&mut self, lines: &[&'a str], start: usize, first: &str) -> Result<usize> {
        let mut body: Vec<&str> = Vec::new();
        if !first.trim().is_empty() {
            body.push(first);
        }
        for index in start + 1..lines.len() {
            let line: &'a str = lines[index];
            if let Some((before, tail)) = line.split_once("}}}") {
                if !before.is_empty() {
                    body.push(before);
                }
                self.out
                    .push(format!("<pre>{}</pre>", escape_html(&body.join("\n"))));
                // Text after the closing braces starts a new paragraph.
                let tail = tail.trim_start();
                if !tail.is_empty() {
                    self.paragraph.push(tail);
                }
                return Ok(index + 1);
            }
            body.push(line);
        }
        Err(MigrationError::translation(format!(
            "unterminated {{{{{{ block starting at line {} of {}",
            start + 1,
            self.inline.context.page().name()
        )))
    }

    fn heading(&mut self, line: &str) -> Result<()> {
        let marks = line.chars().take_while(|c| *c == '!').count().min(3);
        let level = 5 - marks;
        let title = line[marks..].trim();
        let body = self.inline.render(title)?;
        if self.inline.context.suppresses_navigation() {
            self.out.push(format!("<h{level}>{body}</h{level}>"));
        } else {
            let anchor = section_anchor(self.inline.context.page().name(), title);
            self.out.push(format!(
                "<h{level} id=\"{anchor}\">{body}<a class=\"hashlink\" href=\"#{anchor}\">#</a></h{level}>"
            ));
        }
        Ok(())
    }

    fn list_item(&mut self, line: &str) -> Result<()> {
        let markers: Vec<char> = line.chars().take_while(|c| *c == '*' || *c == '#').collect();
        let content = line[markers.len()..].trim();
        let common = self
            .lists
            .iter()
            .zip(&markers)
            .take_while(|(open, wanted)| open == wanted)
            .count();

        let mut html = String::new();
        while self.lists.len() > common {
            if let Some(marker) = self.lists.pop() {
                html.push_str("</li>");
                html.push_str(list_close(marker));
            }
        }
        if markers.len() == self.lists.len() {
            html.push_str("</li><li>");
        } else {
            for marker in &markers[self.lists.len()..] {
                html.push_str(list_open(*marker));
                html.push_str("<li>");
                self.lists.push(*marker);
            }
        }
        html.push_str(&self.inline.render(content)?);
        self.out.push(html);
        Ok(())
    }

    fn table_row(&mut self, line: &str) -> Result<()> {
        if !self.in_table {
            self.out.push("<table>".to_string());
            self.in_table = true;
        }
        let mut row = String::from("<tr>");
        for (header, cell) in split_table_cells(line) {
            let tag = if header { "th" } else { "td" };
            row.push_str(&format!("<{tag}>{}</{tag}>", self.inline.render(cell.trim())?));
        }
        row.push_str("</tr>");
        self.out.push(row);
        Ok(())
    }

    fn flush_paragraph(&mut self) -> Result<()> {
        if self.paragraph.is_empty() {
            return Ok(());
        }
        let text = self.paragraph.join("\n");
        self.paragraph.clear();
        let body = self.inline.render(&text)?;
        self.out.push(format!("<p>{body}</p>"));
        Ok(())
    }

    fn close_lists(&mut self) {
        if self.lists.is_empty() {
            return;
        }
        let mut html = String::new();
        while let Some(marker) = self.lists.pop() {
            html.push_str("</li>");
            html.push_str(list_close(marker));
        }
        self.out.push(html);
    }

    fn close_table(&mut self) {
        if self.in_table {
            self.out.push("</table>".to_string());
            self.in_table = false;
        }
    }

    fn flush_all(&mut self) -> Result<()> {
        self.flush_paragraph()?;
        self.close_lists();
        self.close_table();
        Ok(())
    }
}

struct InlineRenderer<'a, 'c> {
    parser: ParserKind,
    context: &'a RenderContext<'c>,
    flags: RenderFlags,
}

impl InlineRenderer<'_, '_> {
    fn render(&self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len() + 16);
        let mut bold = false;
        let mut italic = false;
        let mut styles = 0usize;
        let mut rest = text;

        while let Some(c) = rest.chars().next() {
            if let Some(after) = rest.strip_prefix('~') {
                if let Some(escaped) = after.chars().next() {
                    push_escaped(&mut out, escaped);
                    rest = &after[escaped.len_utf8()..];
                } else {
                    rest = after;
                }
            } else if let Some(after) = rest.strip_prefix("\\\\") {
                out.push_str("<br />");
                rest = after;
            } else if let Some(after) = rest.strip_prefix("[[") {
                out.push('[');
                rest = after;
            } else if let Some(after) = rest.strip_prefix("[{") {
                let Some((body, tail)) = after.split_once("}]") else {
                    return Err(MigrationError::translation(format!(
                        "unterminated plugin invocation on page {}",
                        self.context.page().name()
                    )));
                };
                self.plugin(body.trim(), &mut out)?;
                rest = tail;
            } else if let Some(after) = rest.strip_prefix('[') {
                match after.split_once(']') {
                    Some((body, tail)) => {
                        self.link(body, &mut out);
                        rest = tail;
                    }
                    None => {
                        out.push('[');
                        rest = after;
                    }
                }
            } else if let Some(after) = rest.strip_prefix("{{{") {
                let Some((body, tail)) = after.split_once("}}}") else {
                    return Err(MigrationError::translation(format!(
                        "unterminated {{{{{{ block on page {}",
                        self.context.page().name()
                    )));
                };
                out.push_str(&format!("<code>{}</code>", escape_html(body)));
                rest = tail;
            } else if let Some(after) = rest.strip_prefix("{{") {
                match after.split_once("}}") {
                    Some((body, tail)) => {
                        out.push_str(&format!("<code>{}</code>", escape_html(body)));
                        rest = tail;
                    }
                    None => {
                        out.push_str("{{");
                        rest = after;
                    }
                }
            } else if let Some(after) = rest.strip_prefix("__") {
                out.push_str(if bold { "</strong>" } else { "<strong>" });
                bold = !bold;
                rest = after;
            } else if let Some(after) = rest.strip_prefix("''") {
                out.push_str(if italic { "</em>" } else { "<em>" });
                italic = !italic;
                rest = after;
            } else if let Some(body) = rest.strip_prefix("%%").and_then(style_block_body) {
                // Style markers are dropped; the styled text is kept.
                styles += 1;
                rest = body;
            } else if styles > 0
                && let Some(after) = rest.strip_prefix("/%")
            {
                styles -= 1;
                rest = after;
            } else {
                push_escaped(&mut out, c);
                rest = &rest[c.len_utf8()..];
            }
        }

        if italic {
            out.push_str("</em>");
        }
        if bold {
            out.push_str("</strong>");
        }
        Ok(out)
    }

    fn plugin(&self, body: &str, out: &mut String) -> Result<()> {
        if let Some(variable) = body.strip_prefix('$') {
            match variable.trim().to_ascii_lowercase().as_str() {
                "pagename" => out.push_str(&escape_html(self.context.page().name())),
                "version" => out.push_str(&self.context.page().version().to_string()),
                other => debug!(
                    page = self.context.page().name(),
                    variable = other,
                    "dropping unresolved wiki variable"
                ),
            }
            return Ok(());
        }

        let name = body.split_whitespace().next().unwrap_or_default();
        if matches!(name, "SET" | "ALLOW" | "INSERT" | "TableOfContents") && !self.flags.execute_plugins {
            debug!(page = self.context.page().name(), directive = name, "dropping directive");
            return Ok(());
        }
        if self.flags.execute_plugins {
            return Err(MigrationError::translation(format!(
                "plugin {name} cannot be executed outside a running wiki"
            )));
        }
        match self.parser {
            ParserKind::JspWikiToMarkdown => {
                out.push_str(&format!("<code>[{{{}}}]</code>", escape_html(body)));
            }
            _ => debug!(page = self.context.page().name(), plugin = name, "dropping plugin"),
        }
        Ok(())
    }

    fn link(&self, body: &str, out: &mut String) {
        let (label, target) = match body.split_once('|') {
            Some((label, target)) => (Some(label.trim()), target.trim()),
            None => (None, body.trim()),
        };
        let text = escape_html(label.unwrap_or(target));
        let lower = target.to_ascii_lowercase();

        if EXTERNAL_PREFIXES.iter().any(|prefix| lower.starts_with(prefix)) {
            if label.is_none() && IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
                out.push_str(&format!(
                    "<img src=\"{}\" alt=\"{}\" />",
                    escape_html(target),
                    escape_html(target)
                ));
            } else {
                out.push_str(&format!(
                    "<a class=\"external\" href=\"{}\">{text}</a>",
                    escape_html(target)
                ));
            }
            return;
        }
        if let Some(anchor) = target.strip_prefix('#') {
            out.push_str(&format!("<a href=\"#{}\">{text}</a>", escape_html(anchor)));
            return;
        }

        let href = if self.context.suppresses_navigation() {
            target.to_string()
        } else {
            format!("Wiki.jsp?page={}", mangle_name(target))
        };
        out.push_str(&format!(
            "<a class=\"wikipage\" href=\"{}\">{text}</a>",
            escape_html(&href)
        ));
    }
}

/// For the text after a `%%` marker, returns the styled body when the marker
/// opens a `%%class` or `%%(css)` block closed by a later `/%`.
fn style_block_body(after: &str) -> Option<&str> {
    let body = if let Some(css) = after.strip_prefix('(') {
        let (_, body) = css.split_once(')')?;
        body
    } else {
        let end = after.find(char::is_whitespace)?;
        let class = &after[..end];
        if class.is_empty()
            || !class
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return None;
        }
        &after[end..]
    };
    if !body.contains("/%") {
        return None;
    }
    Some(body.strip_prefix(' ').unwrap_or(body))
}

/// Splits `||head|cell` rows into `(is_header, text)` cells. Pipes inside
/// `[...]` links are not separators.
fn split_table_cells(line: &str) -> Vec<(bool, String)> {
    let mut cells: Vec<(bool, String)> = Vec::new();
    let mut depth = 0usize;
    let mut rest = line;
    while let Some(c) = rest.chars().next() {
        if depth == 0 {
            if let Some(after) = rest.strip_prefix("||") {
                cells.push((true, String::new()));
                rest = after;
                continue;
            }
            if let Some(after) = rest.strip_prefix('|') {
                cells.push((false, String::new()));
                rest = after;
                continue;
            }
        }
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if let Some((_, cell)) = cells.last_mut() {
            cell.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    cells
}

fn section_anchor(page: &str, title: &str) -> String {
    let clean = |value: &str| -> String { value.chars().filter(|c| c.is_alphanumeric()).collect() };
    format!("section-{}-{}", clean(page), clean(title))
}

fn list_open(marker: char) -> &'static str {
    if marker == '#' { "<ol>" } else { "<ul>" }
}

fn list_close(marker: char) -> &'static str {
    if marker == '#' { "</ol>" } else { "</ul>" }
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        _ => out.push(c),
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        push_escaped(&mut out, c);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::EngineOptions;
    use crate::error::ErrorKind;
    use crate::model::{Page, RequestContext};

    fn config(parser: &str) -> EngineConfig {
        EngineConfig::build(&EngineOptions {
            syntax: "jspwiki".to_string(),
            page_dir: PathBuf::from("/wiki/pages"),
            work_dir: PathBuf::from("/wiki/work"),
            log_path: PathBuf::from("/wiki/wiki.log"),
            cache_enabled: false,
            parser_override: Some(parser.to_string()),
        })
        .expect("build config")
    }

    fn render_with(parser: &str, text: &str) -> Result<HtmlDocument> {
        let config = config(parser);
        let page = Page::new("Main", 1);
        let context = RenderContext::for_migration(&page, &config);
        JspWikiRenderer::new(config.parser()).render(&context, text, RenderFlags::migration())
    }

    fn render(text: &str) -> String {
        render_with("jspwiki", text).expect("render").as_str().to_string()
    }

    #[test]
    fn plain_prose_becomes_paragraphs() {
        assert_eq!(
            render("The quick brown fox\njumps over\n\nthe lazy dog"),
            "<p>The quick brown fox\njumps over</p>\n<p>the lazy dog</p>"
        );
    }

    #[test]
    fn headings_map_bang_count_to_levels() {
        assert_eq!(
            render("!!! Big\n!! Medium\n! Small"),
            "<h2>Big</h2>\n<h3>Medium</h3>\n<h4>Small</h4>"
        );
    }

    #[test]
    fn headings_carry_permalinks_in_view_mode() {
        let config = config("jspwiki");
        let page = Page::new("Main", 1);
        let context = RenderContext::new(&page, &config).with_request(RequestContext::View);
        let html = JspWikiRenderer::new(config.parser())
            .render(&context, "!! Intro", RenderFlags::migration())
            .expect("render");
        assert!(html.as_str().contains("id=\"section-Main-Intro\""));
        assert!(html.as_str().contains("class=\"hashlink\""));
    }

    #[test]
    fn inline_markup_is_translated_and_escaped() {
        assert_eq!(
            render("__bold__ ''italic'' {{mono}} a<b & ~__not bold"),
            "<p><strong>bold</strong> <em>italic</em> <code>mono</code> a&lt;b &amp; __not bold</p>"
        );
    }

    #[test]
    fn nested_lists_open_and_close_in_order() {
        assert_eq!(
            render("* one\n** one.a\n* two\n# first"),
            "<ul><li>one\n<ul><li>one.a\n</li></ul></li><li>two\n</li></ul><ol><li>first\n</li></ol>"
        );
    }

    #[test]
    fn links_resolve_wiki_external_and_images() {
        let html = render("[Main Page] [docs|https://example.org] [https://example.org/logo.png]");
        assert!(html.contains("<a class=\"wikipage\" href=\"Main Page\">Main Page</a>"));
        assert!(html.contains("<a class=\"external\" href=\"https://example.org\">docs</a>"));
        assert!(html.contains("<img src=\"https://example.org/logo.png\""));
    }

    #[test]
    fn view_mode_links_point_at_wiki_jsp() {
        let config = config("jspwiki");
        let page = Page::new("Main", 1);
        let context = RenderContext::new(&page, &config);
        let html = JspWikiRenderer::new(config.parser())
            .render(&context, "[Main Page]", RenderFlags::migration())
            .expect("render");
        assert!(html.as_str().contains("href=\"Wiki.jsp?page=Main+Page\""));
    }

    #[test]
    fn preformatted_block_is_kept_verbatim() {
        assert_eq!(
            render("{{{\nfn main() {}\n  <x>\n}}}\nafter"),
            "<pre>fn main() {}\n  &lt;x&gt;</pre>\n<p>after</p>"
        );
    }

    #[test]
    fn text_after_closing_braces_becomes_paragraph() {
        assert_eq!(
            render("{{{\ncode\n}}} and the rest of the sentence"),
            "<pre>code</pre>\n<p>and the rest of the sentence</p>"
        );
        assert_eq!(
            render("{{{\ncode\n}}} tail\nmore"),
            "<pre>code</pre>\n<p>tail\nmore</p>"
        );
    }

    #[test]
    fn style_blocks_drop_markers_and_keep_text() {
        assert_eq!(
            render("%%small tiny text/% after"),
            "<p>tiny text after</p>"
        );
        assert_eq!(
            render("%%(color:red) warm /% and %%information note/%"),
            "<p>warm  and note</p>"
        );
    }

    #[test]
    fn unmatched_style_markers_stay_literal() {
        assert_eq!(
            render("see a/%b and 100%%done"),
            "<p>see a/%b and 100%%done</p>"
        );
        assert_eq!(render("50%% off"), "<p>50%% off</p>");
    }

    #[test]
    fn unterminated_preformatted_block_is_translation_error() {
        let error = render_with("jspwiki", "intro\n{{{\nnever closed").expect_err("must fail");
        assert_eq!(error.kind(), ErrorKind::Translation);
        assert!(error.to_string().contains("unterminated"));
    }

    #[test]
    fn unterminated_plugin_is_translation_error() {
        let error = render_with("jspwiki", "see [{TableOfContents").expect_err("must fail");
        assert_eq!(error.kind(), ErrorKind::Translation);
    }

    #[test]
    fn plugins_are_dropped_or_kept_by_parser() {
        assert_eq!(render("a [{CurrentTimePlugin}] b"), "<p>a  b</p>");
        let kept = render_with("jspwiki-to-markdown", "a [{CurrentTimePlugin}] b").expect("render");
        assert_eq!(
            kept.as_str(),
            "<p>a <code>[{CurrentTimePlugin}]</code> b</p>"
        );
    }

    #[test]
    fn plugin_execution_is_refused() {
        let config = config("jspwiki");
        let page = Page::new("Main", 1);
        let context = RenderContext::for_migration(&page, &config);
        let error = JspWikiRenderer::new(config.parser())
            .render(
                &context,
                "[{CurrentTimePlugin}]",
                RenderFlags {
                    execute_plugins: true,
                },
            )
            .expect_err("must fail");
        assert_eq!(error.kind(), ErrorKind::Translation);
    }

    #[test]
    fn variables_resolve_page_name() {
        assert_eq!(render("This is [{$pagename}]"), "<p>This is Main</p>");
    }

    #[test]
    fn tables_split_header_and_data_cells() {
        assert_eq!(
            render("|| Name || Link\n| a | [x|Y]"),
            "<table>\n<tr><th>Name</th><th>Link</th></tr>\n<tr><td>a</td><td><a class=\"wikipage\" href=\"Y\">x</a></td></tr>\n</table>"
        );
    }

    #[test]
    fn markdown_source_has_no_renderer() {
        let config = EngineConfig::build(&EngineOptions {
            syntax: "markdown".to_string(),
            page_dir: PathBuf::from("/wiki/md"),
            work_dir: PathBuf::from("/wiki/work"),
            log_path: PathBuf::from("/wiki/md.log"),
            cache_enabled: false,
            parser_override: None,
        })
        .expect("build config");
        let error = renderer_for(&config).err().expect("must fail");
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn visible_text_detection_ignores_tags() {
        assert!(!HtmlDocument::new("<hr />\n<p> </p>").has_visible_text());
        assert!(HtmlDocument::new("<p>x</p>").has_visible_text());
    }
}
