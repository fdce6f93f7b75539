use std::io::Read;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::filesystem::{FileSystemAttachmentStore, FileSystemPageStore};
use crate::model::{Attachment, Page, RenderContext};

/// Persists page text keyed by name and version.
pub trait PageStore {
    /// Lists the current version of every page. Order is provider-defined.
    fn list_all_pages(&self) -> Result<Vec<Page>>;

    fn get_raw_text(&self, name: &str, version: u32) -> Result<String>;

    /// Writes `text` as the current version of `context.page()`.
    fn save_text(&self, context: &RenderContext<'_>, text: &str) -> Result<()>;
}

/// Persists binary files associated with a page.
pub trait AttachmentStore {
    fn list_attachments(&self, page: &Page) -> Result<Vec<Attachment>>;

    /// Opens a read stream for one attachment. The stream is released when
    /// the returned reader is dropped.
    fn open_stream(&self, page: &Page, attachment: &Attachment) -> Result<Box<dyn Read>>;

    /// Stores the full content of `stream` under the attachment's filename and
    /// owning page. Returns the number of bytes written.
    fn store(&self, attachment: &Attachment, stream: &mut dyn Read) -> Result<u64>;
}

/// One dialect's configuration bound to its page and attachment stores.
pub struct Engine {
    config: EngineConfig,
    pages: Box<dyn PageStore>,
    attachments: Box<dyn AttachmentStore>,
}

impl Engine {
    /// Engine backed by the on-disk store under `config.page_dir()`.
    pub fn open(config: EngineConfig) -> Self {
        let pages = Box::new(FileSystemPageStore::new(config.clone()));
        let attachments = Box::new(FileSystemAttachmentStore::new(config.clone()));
        Self {
            config,
            pages,
            attachments,
        }
    }

    pub fn with_stores(
        config: EngineConfig,
        pages: Box<dyn PageStore>,
        attachments: Box<dyn AttachmentStore>,
    ) -> Self {
        Self {
            config,
            pages,
            attachments,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pages(&self) -> &dyn PageStore {
        self.pages.as_ref()
    }

    pub fn attachments(&self) -> &dyn AttachmentStore {
        self.attachments.as_ref()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("config", &self.config).finish_non_exhaustive()
    }
}
