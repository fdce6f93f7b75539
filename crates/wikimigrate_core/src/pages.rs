use tracing::debug;

use crate::error::Result;
use crate::model::{Page, RenderContext};
use crate::render::{RenderFlags, Renderer};
use crate::store::Engine;
use crate::translate::{PostProcess, Translator};

/// Translates one page from the source dialect into the target dialect and
/// stores the result.
pub struct PageTranslator {
    renderer: Box<dyn Renderer>,
    translator: Box<dyn Translator>,
    post_process: Box<dyn PostProcess>,
}

impl PageTranslator {
    pub fn new(
        renderer: Box<dyn Renderer>,
        translator: Box<dyn Translator>,
        post_process: Box<dyn PostProcess>,
    ) -> Self {
        Self {
            renderer,
            translator,
            post_process,
        }
    }

    /// Returns the text written to the target store. Nothing is written
    /// unless reading, rendering, translating and post-processing all
    /// succeeded.
    pub fn translate(&self, page: &Page, source: &Engine, target: &Engine) -> Result<String> {
        let raw = source.pages().get_raw_text(page.name(), page.version())?;

        let source_context = RenderContext::for_migration(page, source.config());
        let html = self
            .renderer
            .render(&source_context, &raw, RenderFlags::migration())?;
        debug!(page = page.name(), html = html.as_str(), "rendered intermediate html");

        let translated = self.translator.translate(&html)?;
        let text = self.post_process.apply(page, translated);

        let target_context = RenderContext::for_migration(page, target.config());
        target.pages().save_text(&target_context, &text)?;
        Ok(text)
    }
}

impl std::fmt::Debug for PageTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageTranslator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;
    use crate::config::{EngineConfig, EngineOptions, ParserKind};
    use crate::error::ErrorKind;
    use crate::render::JspWikiRenderer;
    use crate::translate::{Html2MdTranslator, IdentityPostProcess, TidyPostProcess};

    fn engine(syntax: &str, dir: &Path) -> Engine {
        Engine::open(
            EngineConfig::build(&EngineOptions {
                syntax: syntax.to_string(),
                page_dir: dir.to_path_buf(),
                work_dir: dir.join("work"),
                log_path: dir.join("wiki.log"),
                cache_enabled: false,
                parser_override: None,
            })
            .expect("build config"),
        )
    }

    fn translator(post_process: Box<dyn PostProcess>) -> PageTranslator {
        PageTranslator::new(
            Box::new(JspWikiRenderer::new(ParserKind::JspWiki)),
            Box::new(Html2MdTranslator),
            post_process,
        )
    }

    #[test]
    fn translate_writes_target_page() {
        let temp = tempdir().expect("tempdir");
        let source_dir = temp.path().join("jspwiki");
        let target_dir = temp.path().join("markdown");
        fs::create_dir_all(&source_dir).expect("create source");
        fs::write(source_dir.join("Main.txt"), "__Welcome__ to the wiki").expect("write");

        let source = engine("jspwiki", &source_dir);
        let target = engine("markdown", &target_dir);
        let text = translator(Box::new(IdentityPostProcess))
            .translate(&Page::new("Main", 1), &source, &target)
            .expect("translate");

        assert!(text.contains("**Welcome**"));
        assert_eq!(
            fs::read_to_string(target_dir.join("Main.md")).expect("read target"),
            text
        );
    }

    #[test]
    fn render_failure_leaves_no_target_file() {
        let temp = tempdir().expect("tempdir");
        let source_dir = temp.path().join("jspwiki");
        let target_dir = temp.path().join("markdown");
        fs::create_dir_all(&source_dir).expect("create source");
        fs::write(source_dir.join("Broken.txt"), "{{{\nnever closed").expect("write");

        let source = engine("jspwiki", &source_dir);
        let target = engine("markdown", &target_dir);
        let error = translator(Box::new(IdentityPostProcess))
            .translate(&Page::new("Broken", 1), &source, &target)
            .expect_err("must fail");

        assert_eq!(error.kind(), ErrorKind::Translation);
        assert!(!target_dir.join("Broken.md").exists());
    }

    #[test]
    fn missing_source_text_is_storage_error() {
        let temp = tempdir().expect("tempdir");
        let source = engine("jspwiki", &temp.path().join("jspwiki"));
        let target = engine("markdown", &temp.path().join("markdown"));
        let error = translator(Box::new(IdentityPostProcess))
            .translate(&Page::new("Ghost", 1), &source, &target)
            .expect_err("must fail");
        assert_eq!(error.kind(), ErrorKind::Storage);
    }

    #[test]
    fn post_processing_runs_before_save() {
        let temp = tempdir().expect("tempdir");
        let source_dir = temp.path().join("jspwiki");
        let target_dir = temp.path().join("markdown");
        fs::create_dir_all(&source_dir).expect("create source");
        fs::write(source_dir.join("Main.txt"), "hello world").expect("write");

        let source = engine("jspwiki", &source_dir);
        let target = engine("markdown", &target_dir);
        translator(Box::new(TidyPostProcess))
            .translate(&Page::new("Main", 1), &source, &target)
            .expect("translate");

        assert_eq!(
            fs::read_to_string(target_dir.join("Main.md")).expect("read target"),
            "hello world\n"
        );
    }
}
