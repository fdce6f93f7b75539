use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, trace};
use url::form_urlencoded;
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::error::{MigrationError, Result, ResultExt};
use crate::model::{Attachment, Page, RenderContext};
use crate::store::{AttachmentStore, PageStore};

const HISTORY_DIR: &str = "OLD";
const ATTACHMENT_DIR_SUFFIX: &str = "-att";
const ATTACHMENT_FILE_SUFFIX: &str = "-dir";
const DEFAULT_ATTACHMENT_EXTENSION: &str = "bin";

/// Page store over a flat directory of `<mangled name><ext>` files, with old
/// versions under `OLD/<mangled name>/<n><ext>`.
#[derive(Debug)]
pub struct FileSystemPageStore {
    config: EngineConfig,
    cache: Option<RefCell<HashMap<(String, u32), String>>>,
    /// File stems seen by the last listing, keyed by page name.
    stems: RefCell<HashMap<String, String>>,
}

impl FileSystemPageStore {
    pub fn new(config: EngineConfig) -> Self {
        let cache = config.cache_enabled().then(|| RefCell::new(HashMap::new()));
        Self {
            config,
            cache,
            stems: RefCell::new(HashMap::new()),
        }
    }

    fn stem(&self, name: &str) -> String {
        if let Some(stem) = self.stems.borrow().get(name) {
            return stem.clone();
        }
        resolve_stem(
            self.config.page_dir(),
            name,
            self.config.dialect().page_extension(),
        )
    }

    fn page_path(&self, name: &str) -> PathBuf {
        self.config.page_dir().join(format!(
            "{}{}",
            self.stem(name),
            self.config.dialect().page_extension()
        ))
    }

    fn history_dir(&self, name: &str) -> PathBuf {
        self.config.page_dir().join(HISTORY_DIR).join(self.stem(name))
    }

    fn current_version(&self, name: &str) -> Result<u32> {
        let history = self.history_dir(name);
        if !history.is_dir() {
            return Ok(1);
        }
        let extension = self.config.dialect().page_extension();
        let mut latest = 0u32;
        for entry in WalkDir::new(&history).min_depth(1).max_depth(1) {
            let entry = entry.storage_context(|| format!("failed to walk {}", history.display()))?;
            let file_name = entry.file_name().to_string_lossy();
            if let Some(version) = file_name
                .strip_suffix(extension)
                .and_then(|stem| stem.parse::<u32>().ok())
            {
                latest = latest.max(version);
            }
        }
        Ok(latest + 1)
    }
}

impl PageStore for FileSystemPageStore {
    fn list_all_pages(&self) -> Result<Vec<Page>> {
        let page_dir = self.config.page_dir();
        if !page_dir.is_dir() {
            return Err(MigrationError::storage(format!(
                "page directory is missing or not a directory: {}",
                page_dir.display()
            )));
        }

        let extension = self.config.dialect().page_extension();
        let mut pages = Vec::new();
        for entry in WalkDir::new(page_dir).min_depth(1).max_depth(1) {
            let entry = entry.storage_context(|| format!("failed to walk {}", page_dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            let Some(stem) = file_name.strip_suffix(extension) else {
                continue;
            };
            if stem.is_empty() {
                continue;
            }
            let name = unmangle_name(stem);
            self.stems
                .borrow_mut()
                .insert(name.clone(), stem.to_string());
            let version = self.current_version(&name)?;
            pages.push(Page::new(name, version));
        }
        debug!(
            page_dir = %page_dir.display(),
            pages = pages.len(),
            "listed pages"
        );
        Ok(pages)
    }

    fn get_raw_text(&self, name: &str, version: u32) -> Result<String> {
        let key = (name.to_string(), version);
        if let Some(cache) = &self.cache
            && let Some(text) = cache.borrow().get(&key)
        {
            trace!(page = name, version, "page text served from cache");
            return Ok(text.clone());
        }

        let current = self.current_version(name)?;
        let path = if version == current {
            self.page_path(name)
        } else {
            self.history_dir(name).join(format!(
                "{version}{}",
                self.config.dialect().page_extension()
            ))
        };
        let text = fs::read_to_string(&path)
            .storage_context(|| format!("failed to read page {name} v{version} from {}", path.display()))?;

        if let Some(cache) = &self.cache {
            cache.borrow_mut().insert(key, text.clone());
        }
        Ok(text)
    }

    fn save_text(&self, context: &RenderContext<'_>, text: &str) -> Result<()> {
        let name = context.page().name();
        let path = self.page_path(name);
        write_atomically(self.config.page_dir(), &path, |file| {
            file.write_all(text.as_bytes())
        })?;
        if let Some(cache) = &self.cache {
            cache.borrow_mut().retain(|(cached, _), _| cached != name);
        }
        debug!(page = name, path = %path.display(), bytes = text.len(), "saved page text");
        Ok(())
    }
}

/// Attachment store laid out as
/// `<page dir>/<mangled page>-att/<mangled file>-dir/<n>.<ext>`.
#[derive(Debug)]
pub struct FileSystemAttachmentStore {
    config: EngineConfig,
}

impl FileSystemAttachmentStore {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn page_attachment_dir(&self, page: &str) -> PathBuf {
        let dir = self.config.page_dir();
        dir.join(format!(
            "{}{ATTACHMENT_DIR_SUFFIX}",
            resolve_stem(dir, page, ATTACHMENT_DIR_SUFFIX)
        ))
    }

    fn attachment_dir(&self, page: &str, filename: &str) -> PathBuf {
        let base = self.page_attachment_dir(page);
        let stem = resolve_stem(&base, filename, ATTACHMENT_FILE_SUFFIX);
        base.join(format!("{stem}{ATTACHMENT_FILE_SUFFIX}"))
    }

    fn attachment_path(&self, attachment: &Attachment) -> PathBuf {
        self.attachment_dir(attachment.page(), attachment.filename())
            .join(format!(
                "{}.{}",
                attachment.version(),
                attachment_extension(attachment.filename())
            ))
    }
}

impl AttachmentStore for FileSystemAttachmentStore {
    fn list_attachments(&self, page: &Page) -> Result<Vec<Attachment>> {
        let base = self.page_attachment_dir(page.name());
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let mut attachments = Vec::new();
        for entry in WalkDir::new(&base).min_depth(1).max_depth(1) {
            let entry = entry.storage_context(|| format!("failed to walk {}", base.display()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy();
            let Some(mangled) = dir_name.strip_suffix(ATTACHMENT_FILE_SUFFIX) else {
                continue;
            };
            let filename = unmangle_name(mangled);
            if let Some((version, size)) = latest_attachment_version(entry.path())? {
                attachments.push(Attachment::new(page.name(), filename, version, size));
            }
        }
        Ok(attachments)
    }

    fn open_stream(&self, page: &Page, attachment: &Attachment) -> Result<Box<dyn Read>> {
        let path = self.attachment_path(attachment);
        let file = File::open(&path).resource_context(|| {
            format!(
                "failed to open stream for attachment {}/{} at {}",
                page.name(),
                attachment.filename(),
                path.display()
            )
        })?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn store(&self, attachment: &Attachment, stream: &mut dyn Read) -> Result<u64> {
        let dir = self.attachment_dir(attachment.page(), attachment.filename());
        let path = dir.join(format!("1.{}", attachment_extension(attachment.filename())));
        let mut written = 0u64;
        write_atomically(&dir, &path, |file| {
            written = io::copy(stream, file)?;
            Ok(())
        })?;
        debug!(
            page = attachment.page(),
            attachment = attachment.filename(),
            bytes = written,
            "stored attachment"
        );
        Ok(written)
    }
}

/// Writes into a temp file in `dir` and renames it over `path`, so readers
/// never observe a partially written file.
fn write_atomically<F>(dir: &Path, path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    fs::create_dir_all(dir).storage_context(|| format!("failed to create {}", dir.display()))?;
    let mut temp = NamedTempFile::new_in(dir)
        .resource_context(|| format!("failed to create temp file in {}", dir.display()))?;
    fill(temp.as_file_mut())
        .and_then(|()| temp.as_file_mut().flush())
        .and_then(|()| temp.as_file_mut().sync_all())
        .storage_context(|| format!("failed to write {}", path.display()))?;
    temp.persist(path)
        .storage_context(|| format!("failed to move temp file to {}", path.display()))?;
    Ok(())
}

fn latest_attachment_version(dir: &Path) -> Result<Option<(u32, u64)>> {
    let mut latest: Option<(u32, u64)> = None;
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.storage_context(|| format!("failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        let Some(version) = file_name
            .split_once('.')
            .and_then(|(stem, _)| stem.parse::<u32>().ok())
        else {
            continue;
        };
        if latest.is_some_and(|(current, _)| current >= version) {
            continue;
        }
        let size = entry
            .metadata()
            .storage_context(|| format!("failed to stat {}", entry.path().display()))?
            .len();
        latest = Some((version, size));
    }
    Ok(latest)
}

/// Extension used for stored attachment versions; `bin` when the filename
/// has none or it is not plain alphanumeric.
fn attachment_extension(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, extension))
            if !stem.is_empty()
                && !extension.is_empty()
                && extension.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            extension.to_ascii_lowercase()
        }
        _ => DEFAULT_ATTACHMENT_EXTENSION.to_string(),
    }
}

/// Picks the on-disk stem for `name` under `dir`: the mangled form, unless
/// only a file written with the literal name exists.
fn resolve_stem(dir: &Path, name: &str, suffix: &str) -> String {
    let mangled = mangle_name(name);
    if mangled == name || name.contains(['/', '\\']) {
        return mangled;
    }
    if !dir.join(format!("{mangled}{suffix}")).exists()
        && dir.join(format!("{name}{suffix}")).exists()
    {
        return name.to_string();
    }
    mangled
}

/// UTF-8 form-urlencoding of a page or attachment name.
pub fn mangle_name(name: &str) -> String {
    form_urlencoded::byte_serialize(name.as_bytes()).collect()
}

pub fn unmangle_name(value: &str) -> String {
    form_urlencoded::parse(value.as_bytes())
        .map(|(key, val)| {
            if val.is_empty() {
                key.into_owned()
            } else {
                format!("{key}={val}")
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}
