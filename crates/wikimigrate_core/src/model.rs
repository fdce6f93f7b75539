use serde::Serialize;

use crate::config::EngineConfig;

/// A page handle as listed by a page store. Identity is `(name, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Page {
    name: String,
    version: u32,
}

impl Page {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

/// An attachment handle, scoped to its owning page by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Attachment {
    page: String,
    filename: String,
    version: u32,
    size: u64,
}

impl Attachment {
    pub fn new(page: impl Into<String>, filename: impl Into<String>, version: u32, size: u64) -> Self {
        Self {
            page: page.into(),
            filename: filename.into(),
            version,
            size,
        }
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestContext {
    /// Regular page view with history and navigation links.
    View,
    /// No request history; the page is rendered outside any navigation.
    PageNone,
}

/// Per-operation rendering context. Built fresh for each page and dropped
/// once that page's operation completes.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    page: &'a Page,
    config: &'a EngineConfig,
    request: RequestContext,
    editor_mode: bool,
}

impl<'a> RenderContext<'a> {
    pub fn new(page: &'a Page, config: &'a EngineConfig) -> Self {
        Self {
            page,
            config,
            request: RequestContext::View,
            editor_mode: false,
        }
    }

    /// Context used by the migration: no page history and editor-preview
    /// semantics, so editor-only UI elements are never resolved.
    pub fn for_migration(page: &'a Page, config: &'a EngineConfig) -> Self {
        Self::new(page, config)
            .with_request(RequestContext::PageNone)
            .with_editor_mode(true)
    }

    pub fn with_request(mut self, request: RequestContext) -> Self {
        self.request = request;
        self
    }

    pub fn with_editor_mode(mut self, editor_mode: bool) -> Self {
        self.editor_mode = editor_mode;
        self
    }

    pub fn page(&self) -> &'a Page {
        self.page
    }

    pub fn config(&self) -> &'a EngineConfig {
        self.config
    }

    /// True when navigation chrome (view links, heading permalinks) must be
    /// left out of rendered output.
    pub fn suppresses_navigation(&self) -> bool {
        self.editor_mode || self.request == RequestContext::PageNone
    }
}
