use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, info, warn};

use crate::attachments::AttachmentMigrator;
use crate::config::{EngineConfig, TargetPolicy};
use crate::enumerate::PageEnumerator;
use crate::error::{MigrationError, Result};
use crate::model::Page;
use crate::pages::PageTranslator;
use crate::render::renderer_for;
use crate::report::{MigrationReport, PageOutcome};
use crate::runtime::{RunPlan, normalize_for_display, prepare_target};
use crate::store::Engine;
use crate::translate::{post_processor_for, translator_for};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Enumerating,
    ProcessingPage(usize),
    Reporting,
    Done,
    Aborted,
}

/// Drives one migration run over every page of the source engine.
#[derive(Debug)]
pub struct MigrationRunner {
    source: Engine,
    target: Engine,
    translator: PageTranslator,
    attachments: AttachmentMigrator,
    lang: String,
    target_policy: TargetPolicy,
    state: RunState,
}

impl MigrationRunner {
    /// Builds both engine configurations and their collaborators. Every
    /// error returned here is a configuration error.
    pub fn from_plan(plan: &RunPlan) -> Result<Self> {
        let source_config = EngineConfig::build(&plan.source)?;
        let target_config = EngineConfig::build(&plan.target)?;
        let translator = PageTranslator::new(
            renderer_for(&source_config)?,
            translator_for(&target_config)?,
            post_processor_for(plan.post_process),
        );
        Ok(Self::new(
            Engine::open(source_config),
            Engine::open(target_config),
            translator,
            &plan.lang,
            plan.target_policy,
        ))
    }

    pub fn new(
        source: Engine,
        target: Engine,
        translator: PageTranslator,
        lang: &str,
        target_policy: TargetPolicy,
    ) -> Self {
        Self {
            source,
            target,
            translator,
            attachments: AttachmentMigrator,
            lang: lang.to_string(),
            target_policy,
            state: RunState::Initializing,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn source(&self) -> &EngineConfig {
        self.source.config()
    }

    pub fn target(&self) -> &EngineConfig {
        self.target.config()
    }

    /// Runs to completion. Progress lines and the final summary go to `out`.
    /// Only configuration failures are returned as errors, whether raised
    /// during initialization or by a page; other page failures are recorded
    /// in the report.
    pub fn run(&mut self, out: &mut dyn Write) -> Result<MigrationReport> {
        if let Err(error) = self.initialize() {
            self.transition(RunState::Aborted);
            return Err(error);
        }

        self.transition(RunState::Enumerating);
        let mut report = MigrationReport::new(
            &self.lang,
            self.source.config().dialect().as_str(),
            self.target.config().dialect().as_str(),
        );
        let pages = match PageEnumerator.list(&self.source) {
            Ok(pages) => pages,
            Err(error) => {
                error!(
                    kind = %error.kind(),
                    cause = %error.chain(),
                    "failed to enumerate source pages"
                );
                report.record_enumeration_error(&error);
                Vec::new()
            }
        };

        for (index, page) in pages.iter().enumerate() {
            self.transition(RunState::ProcessingPage(index));
            emit(out, &format!("Processing page: {}", page.name()));
            let outcome = match self.process_page(page) {
                Ok(attachments) => {
                    info!(page = page.name(), attachments, "page migrated");
                    PageOutcome::Success {
                        page: page.name().to_string(),
                        attachments,
                    }
                }
                Err(error) if error.kind().is_fatal() => {
                    error!(
                        page = page.name(),
                        cause = %error.chain(),
                        "configuration failure while migrating page; aborting run"
                    );
                    self.transition(RunState::Aborted);
                    return Err(error);
                }
                Err(error) => {
                    error!(
                        page = page.name(),
                        kind = %error.kind(),
                        message = error.message(),
                        cause = %error.chain(),
                        "page migration failed"
                    );
                    PageOutcome::failure(page.name(), &error)
                }
            };
            report.record(outcome);
        }

        self.transition(RunState::Reporting);
        if let Err(error) = report.write_manifest(self.target.config().work_dir()) {
            warn!(cause = %error.chain(), "failed to write migration report");
        }
        emit(out, &report.render_summary());

        self.transition(RunState::Done);
        Ok(report)
    }

    fn initialize(&self) -> Result<()> {
        let source_dir = self.source.config().page_dir();
        if !source_dir.is_dir() {
            return Err(MigrationError::configuration(format!(
                "source directory does not exist: {}",
                normalize_for_display(source_dir)
            )));
        }
        prepare_target(
            source_dir,
            self.target.config().page_dir(),
            self.target_policy,
        )
    }

    /// Text translation and attachment copy share one failure boundary.
    /// A panic inside a collaborator is contained to the page as well.
    fn process_page(&self, page: &Page) -> Result<usize> {
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| -> Result<usize> {
            self.translator.translate(page, &self.source, &self.target)?;
            self.attachments.migrate(page, &self.source, &self.target)
        }));
        match attempt {
            Ok(result) => result,
            Err(_) => Err(MigrationError::translation(format!(
                "panicked while processing page {}",
                page.name()
            ))),
        }
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "runner state");
        self.state = next;
    }
}

fn emit(out: &mut dyn Write, line: &str) {
    if let Err(error) = writeln!(out, "{line}") {
        warn!(%error, "failed to write progress output");
    }
}
