use std::io::{self, Read};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::Page;
use crate::store::Engine;

/// Copies every attachment of a page from the source store to the target
/// store.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttachmentMigrator;

impl AttachmentMigrator {
    /// Returns the number of attachments copied. The first failing copy
    /// aborts the remaining attachments of this page.
    pub fn migrate(&self, page: &Page, source: &Engine, target: &Engine) -> Result<usize> {
        let attachments = source.attachments().list_attachments(page)?;
        let mut copied = 0usize;
        for attachment in &attachments {
            let stream = source.attachments().open_stream(page, attachment)?;
            let mut reader = HashingReader::new(stream);
            let bytes = target.attachments().store(attachment, &mut reader)?;
            if bytes != attachment.size() {
                warn!(
                    page = page.name(),
                    attachment = attachment.filename(),
                    listed = attachment.size(),
                    copied = bytes,
                    "attachment size changed while copying"
                );
            }
            debug!(
                page = page.name(),
                attachment = attachment.filename(),
                bytes,
                sha256 = %reader.hex_digest(),
                "copied attachment"
            );
            copied += 1;
        }
        Ok(copied)
    }
}

/// Pass-through reader that hashes what flows through it. Owns the source
/// stream, so dropping it releases the stream.
struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn hex_digest(&self) -> String {
        self.hasher
            .clone()
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;
    use crate::config::{EngineConfig, EngineOptions};

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

    #[test]
    fn hashing_reader_matches_direct_digest() {
        let data = b"attachment payload".to_vec();
        let mut reader = HashingReader::new(data.as_slice());
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).expect("read");
        let expected: String = Sha256::digest(&data)
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();
        assert_eq!(reader.hex_digest(), expected);
        assert_eq!(sink, data);
    }

    #[test]
    fn migrate_copies_every_attachment() {
        let temp = tempdir().expect("tempdir");
        let source_dir = temp.path().join("jspwiki");
        let target_dir = temp.path().join("markdown");
        for (file, bytes) in [("a.png", &b"png bytes"[..]), ("b.pdf", &b"pdf bytes"[..])] {
            let dir = source_dir.join(format!("Main-att/{file}-dir"));
            fs::create_dir_all(&dir).expect("create att dir");
            let extension = file.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("bin");
            fs::write(dir.join(format!("1.{extension}")), bytes).expect("write");
        }

        let source = engine("jspwiki", &source_dir);
        let target = engine("markdown", &target_dir);
        let copied = AttachmentMigrator
            .migrate(&Page::new("Main", 1), &source, &target)
            .expect("migrate");

        assert_eq!(copied, 2);
        assert_eq!(
            fs::read(target_dir.join("Main-att/a.png-dir/1.png")).expect("read"),
            b"png bytes"
        );
        assert_eq!(
            fs::read(target_dir.join("Main-att/b.pdf-dir/1.pdf")).expect("read"),
            b"pdf bytes"
        );
    }

    #[test]
    fn page_without_attachments_copies_nothing() {
        let temp = tempdir().expect("tempdir");
        let source = engine("jspwiki", &temp.path().join("jspwiki"));
        let target = engine("markdown", &temp.path().join("markdown"));
        let copied = AttachmentMigrator
            .migrate(&Page::new("Main", 1), &source, &target)
            .expect("migrate");
        assert_eq!(copied, 0);
        assert!(!temp.path().join("markdown").exists());
    }
}
