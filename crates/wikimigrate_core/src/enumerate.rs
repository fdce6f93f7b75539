use tracing::info;

use crate::error::Result;
use crate::model::Page;
use crate::store::Engine;

/// Lists the pages currently present in a source store.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageEnumerator;

impl PageEnumerator {
    /// Re-reads storage on every call. The order is whatever the store
    /// reports; callers must not assume it is sorted or stable.
    pub fn list(&self, source: &Engine) -> Result<Vec<Page>> {
        let pages = source.pages().list_all_pages()?;
        info!(
            syntax = source.config().dialect().as_str(),
            page_dir = %source.config().page_dir().display(),
            pages = pages.len(),
            "enumerated source pages"
        );
        Ok(pages)
    }
}
