use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

pub const DEFAULT_SETTINGS_FILENAME: &str = "wikimigrate.toml";
pub const DEFAULT_WORK_DIR: &str = "./target";
pub const DEFAULT_SOURCE_SYNTAX: &str = "jspwiki";
pub const DEFAULT_TARGET_SYNTAX: &str = "markdown";
pub const DEFAULT_MIGRATION_PARSER: &str = "jspwiki-to-markdown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    JspWiki,
    Markdown,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JspWiki => "jspwiki",
            Self::Markdown => "markdown",
        }
    }

    /// Extension of a page file in a store of this dialect.
    pub fn page_extension(self) -> &'static str {
        match self {
            Self::JspWiki => ".txt",
            Self::Markdown => ".md",
        }
    }

    pub fn default_parser(self) -> ParserKind {
        match self {
            Self::JspWiki => ParserKind::JspWiki,
            Self::Markdown => ParserKind::Markdown,
        }
    }
}

impl FromStr for Dialect {
    type Err = MigrationError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jspwiki" => Ok(Self::JspWiki),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(MigrationError::configuration(format!(
                "unrecognized wiki syntax `{other}` (expected jspwiki or markdown)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserKind {
    /// Stock JSPWiki markup parser.
    JspWiki,
    /// JSPWiki parser variant that keeps plugin invocations as literal markup.
    JspWikiToMarkdown,
    /// Markdown dialect parser; no renderer ships for it.
    Markdown,
}

impl ParserKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JspWiki => "jspwiki",
            Self::JspWikiToMarkdown => "jspwiki-to-markdown",
            Self::Markdown => "markdown",
        }
    }

    fn dialect(self) -> Dialect {
        match self {
            Self::JspWiki | Self::JspWikiToMarkdown => Dialect::JspWiki,
            Self::Markdown => Dialect::Markdown,
        }
    }
}

impl FromStr for ParserKind {
    type Err = MigrationError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jspwiki" => Ok(Self::JspWiki),
            "jspwiki-to-markdown" => Ok(Self::JspWikiToMarkdown),
            "markdown" => Ok(Self::Markdown),
            other => Err(MigrationError::configuration(format!(
                "unrecognized markup parser `{other}`"
            ))),
        }
    }
}

/// Raw inputs for [`EngineConfig::build`].
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub syntax: String,
    pub page_dir: PathBuf,
    pub work_dir: PathBuf,
    pub log_path: PathBuf,
    pub cache_enabled: bool,
    pub parser_override: Option<String>,
}

/// Immutable per-dialect engine configuration, shared read-only by every
/// per-page operation of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    dialect: Dialect,
    parser: ParserKind,
    page_dir: PathBuf,
    work_dir: PathBuf,
    log_path: PathBuf,
    cache_enabled: bool,
}

impl EngineConfig {
    /// Validates and records configuration. Never touches the disk beyond
    /// reading the process working directory for relative paths.
    pub fn build(options: &EngineOptions) -> Result<Self> {
        let dialect = options.syntax.parse::<Dialect>()?;
        let parser = match options.parser_override.as_deref() {
            Some(value) if !value.trim().is_empty() => {
                let parser = value.parse::<ParserKind>()?;
                // A markdown engine always uses its own parser.
                if parser.dialect() == dialect {
                    parser
                } else {
                    dialect.default_parser()
                }
            }
            _ => dialect.default_parser(),
        };

        Ok(Self {
            dialect,
            parser,
            page_dir: resolve_dir("pageDir", &options.page_dir)?,
            work_dir: resolve_dir("workDir", &options.work_dir)?,
            log_path: resolve_dir("logPath", &options.log_path)?,
            cache_enabled: options.cache_enabled,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn parser(&self) -> ParserKind {
        self.parser
    }

    pub fn page_dir(&self) -> &Path {
        &self.page_dir
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }
}

fn resolve_dir(option: &str, path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(MigrationError::configuration(format!(
            "{option} is empty"
        )));
    }
    std::path::absolute(path).map_err(|error| {
        MigrationError::configuration(format!("failed to resolve {option} {}", path.display()))
            .with_source(error)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPolicy {
    /// Leave existing target content in place.
    #[default]
    Keep,
    /// Recursively remove target content before the run.
    Clear,
}

impl TargetPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Clear => "clear",
        }
    }
}

impl FromStr for TargetPolicy {
    type Err = MigrationError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "clear" => Ok(Self::Clear),
            other => Err(MigrationError::configuration(format!(
                "unrecognized target policy `{other}` (expected keep or clear)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostProcessKind {
    #[default]
    Identity,
    Tidy,
}

impl FromStr for PostProcessKind {
    type Err = MigrationError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "identity" => Ok(Self::Identity),
            "tidy" => Ok(Self::Tidy),
            other => Err(MigrationError::configuration(format!(
                "unrecognized post-processor `{other}` (expected identity or tidy)"
            ))),
        }
    }
}

/// Contents of `wikimigrate.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationSettings {
    #[serde(default)]
    pub source: DialectSection,
    #[serde(default)]
    pub target: DialectSection,
    #[serde(default)]
    pub run: RunSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DialectSection {
    pub syntax: Option<String>,
    pub parser: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RunSection {
    pub work_dir: Option<PathBuf>,
    pub target_policy: Option<TargetPolicy>,
    pub post_process: Option<PostProcessKind>,
    #[serde(default)]
    pub cache_enabled: bool,
}

impl MigrationSettings {
    pub fn source_syntax(&self) -> &str {
        self.source.syntax.as_deref().unwrap_or(DEFAULT_SOURCE_SYNTAX)
    }

    pub fn target_syntax(&self) -> &str {
        self.target.syntax.as_deref().unwrap_or(DEFAULT_TARGET_SYNTAX)
    }

    /// Parser used for both engines unless a section names its own.
    pub fn source_parser(&self) -> &str {
        self.source.parser.as_deref().unwrap_or(DEFAULT_MIGRATION_PARSER)
    }

    pub fn target_parser(&self) -> &str {
        self.target.parser.as_deref().unwrap_or(DEFAULT_MIGRATION_PARSER)
    }
}

/// Load settings from a TOML file. Returns defaults if the file doesn't exist.
pub fn load_settings(path: &Path) -> Result<MigrationSettings> {
    if !path.exists() {
        return Ok(MigrationSettings::default());
    }
    let content = fs::read_to_string(path).map_err(|error| {
        MigrationError::configuration(format!("failed to read {}", path.display()))
            .with_source(error)
    })?;
    toml::from_str(&content).map_err(|error| {
        MigrationError::configuration(format!("failed to parse {}", path.display()))
            .with_source(error)
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::error::ErrorKind;

    fn options(syntax: &str) -> EngineOptions {
        EngineOptions {
            syntax: syntax.to_string(),
            page_dir: PathBuf::from("/srv/wiki/pages"),
            work_dir: PathBuf::from("/srv/wiki/work"),
            log_path: PathBuf::from("/srv/wiki/wiki.log"),
            cache_enabled: false,
            parser_override: None,
        }
    }

    #[test]
    fn build_records_dialect_and_paths() {
        let config = EngineConfig::build(&options("jspwiki")).expect("build");
        assert_eq!(config.dialect(), Dialect::JspWiki);
        assert_eq!(config.parser(), ParserKind::JspWiki);
        assert_eq!(config.page_dir(), Path::new("/srv/wiki/pages"));
        assert!(!config.cache_enabled());
    }

    #[test]
    fn build_rejects_unknown_dialect() {
        let error = EngineConfig::build(&options("creole")).expect_err("must fail");
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert!(error.to_string().contains("creole"));
    }

    #[test]
    fn build_rejects_empty_page_dir() {
        let mut options = options("markdown");
        options.page_dir = PathBuf::new();
        let error = EngineConfig::build(&options).expect_err("must fail");
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert!(error.to_string().contains("pageDir"));
    }

    #[test]
    fn build_resolves_relative_paths() {
        let mut options = options("markdown");
        options.page_dir = PathBuf::from("relative/pages");
        let config = EngineConfig::build(&options).expect("build");
        assert!(config.page_dir().is_absolute());
        assert!(config.page_dir().ends_with("relative/pages"));
    }

    #[test]
    fn parser_override_applies_to_matching_dialect() {
        let mut options = options("jspwiki");
        options.parser_override = Some("jspwiki-to-markdown".to_string());
        let config = EngineConfig::build(&options).expect("build");
        assert_eq!(config.parser(), ParserKind::JspWikiToMarkdown);
    }

    #[test]
    fn markdown_dialect_ignores_jspwiki_parser_override() {
        let mut options = options("markdown");
        options.parser_override = Some("jspwiki-to-markdown".to_string());
        let config = EngineConfig::build(&options).expect("build");
        assert_eq!(config.parser(), ParserKind::Markdown);
    }

    #[test]
    fn unknown_parser_override_is_configuration_error() {
        let mut options = options("jspwiki");
        options.parser_override = Some("wikicreole".to_string());
        let error = EngineConfig::build(&options).expect_err("must fail");
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn load_settings_returns_default_for_missing_file() {
        let settings = load_settings(Path::new("/nonexistent/wikimigrate.toml")).expect("load");
        assert_eq!(settings, MigrationSettings::default());
        assert_eq!(settings.source_syntax(), "jspwiki");
        assert_eq!(settings.target_syntax(), "markdown");
        assert_eq!(settings.source_parser(), "jspwiki-to-markdown");
    }

    #[test]
    fn load_settings_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("wikimigrate.toml");
        fs::write(
            &path,
            r#"
[source]
syntax = "jspwiki"
parser = "jspwiki"

[run]
work_dir = "/tmp/migration"
target_policy = "clear"
post_process = "tidy"
"#,
        )
        .expect("write settings");

        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.source_parser(), "jspwiki");
        assert_eq!(settings.run.work_dir, Some(PathBuf::from("/tmp/migration")));
        assert_eq!(settings.run.target_policy, Some(TargetPolicy::Clear));
        assert_eq!(settings.run.post_process, Some(PostProcessKind::Tidy));
        assert!(!settings.run.cache_enabled);
    }

    #[test]
    fn load_settings_reports_invalid_toml_as_configuration_error() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("wikimigrate.toml");
        fs::write(&path, "[run\nwork_dir = 1").expect("write settings");
        let error = load_settings(&path).expect_err("must fail");
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn target_policy_parses_case_insensitively() {
        assert_eq!("CLEAR".parse::<TargetPolicy>().expect("parse"), TargetPolicy::Clear);
        assert!("wipe".parse::<TargetPolicy>().is_err());
    }
}
