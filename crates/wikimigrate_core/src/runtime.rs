use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::info;

use crate::config::{
    EngineOptions, MigrationSettings, PostProcessKind, TargetPolicy, DEFAULT_WORK_DIR,
};
use crate::error::{ErrorKind, MigrationError, Result, ResultExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    File,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::File => "file",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().map_err(|error| {
            MigrationError::configuration("failed to read current directory").with_source(error)
        })?;
        Ok(Self { cwd })
    }
}

/// Command-line inputs; `None` means "not given on the command line".
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub lang: String,
    pub source_syntax: Option<String>,
    pub target_syntax: Option<String>,
    pub parser: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub clear_target: bool,
    pub post_process: Option<PostProcessKind>,
}

/// Fully resolved inputs for one migration run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub lang: String,
    pub source: EngineOptions,
    pub target: EngineOptions,
    pub work_dir: PathBuf,
    pub work_source: ValueSource,
    pub target_policy: TargetPolicy,
    pub policy_source: ValueSource,
    pub post_process: PostProcessKind,
}

impl RunPlan {
    pub fn diagnostics(&self) -> String {
        format!(
            "lang={}\nsource_dir={} ({})\ntarget_dir={} ({})\nwork_dir={} ({})\ntarget_policy={} ({})",
            self.lang,
            normalize_for_display(&self.source.page_dir),
            self.source.syntax,
            normalize_for_display(&self.target.page_dir),
            self.target.syntax,
            normalize_for_display(&self.work_dir),
            self.work_source.as_str(),
            self.target_policy.as_str(),
            self.policy_source.as_str(),
        )
    }
}

pub fn resolve_plan(
    context: &ResolutionContext,
    overrides: &RunOverrides,
    settings: &MigrationSettings,
) -> Result<RunPlan> {
    resolve_plan_with_lookup(context, overrides, settings, |key| env::var(key).ok())
}

fn resolve_plan_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &RunOverrides,
    settings: &MigrationSettings,
    lookup_env: F,
) -> Result<RunPlan>
where
    F: Fn(&str) -> Option<String>,
{
    let lang = validate_lang(&overrides.lang)?;

    let (work_dir, work_source) = if let Some(path) = overrides.work_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("WIKIMIGRATE_WORK_DIR")) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else if let Some(path) = settings.run.work_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::File)
    } else {
        (
            absolutize(Path::new(DEFAULT_WORK_DIR), &context.cwd),
            ValueSource::Default,
        )
    };

    let (target_policy, policy_source) = if overrides.clear_target {
        (TargetPolicy::Clear, ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("WIKIMIGRATE_TARGET_POLICY")) {
        (value.parse::<TargetPolicy>()?, ValueSource::Env)
    } else if let Some(policy) = settings.run.target_policy {
        (policy, ValueSource::File)
    } else {
        (TargetPolicy::default(), ValueSource::Default)
    };

    let post_process = overrides
        .post_process
        .or(settings.run.post_process)
        .unwrap_or_default();

    let source_syntax = overrides
        .source_syntax
        .clone()
        .unwrap_or_else(|| settings.source_syntax().to_string());
    let target_syntax = overrides
        .target_syntax
        .clone()
        .unwrap_or_else(|| settings.target_syntax().to_string());

    let source = EngineOptions {
        page_dir: absolutize(&overrides.source_dir, &context.cwd),
        work_dir: work_dir.join(format!("workDir-{source_syntax}-{lang}")),
        log_path: work_dir.join(format!("wiki-{source_syntax}-{lang}.log")),
        cache_enabled: settings.run.cache_enabled,
        parser_override: Some(
            overrides
                .parser
                .clone()
                .unwrap_or_else(|| settings.source_parser().to_string()),
        ),
        syntax: source_syntax,
    };
    let target = EngineOptions {
        page_dir: absolutize(&overrides.target_dir, &context.cwd),
        work_dir: work_dir.join(format!("workDir-{target_syntax}-{lang}")),
        log_path: work_dir.join(format!("wiki-{target_syntax}-{lang}.log")),
        cache_enabled: settings.run.cache_enabled,
        parser_override: Some(
            overrides
                .parser
                .clone()
                .unwrap_or_else(|| settings.target_parser().to_string()),
        ),
        syntax: target_syntax,
    };

    Ok(RunPlan {
        lang,
        source,
        target,
        work_dir,
        work_source,
        target_policy,
        policy_source,
        post_process,
    })
}

/// Accepts `de`, `en`, `pt_BR`, `zh_CN` style codes.
pub fn validate_lang(lang: &str) -> Result<String> {
    let trimmed = lang.trim();
    let mut parts = trimmed.splitn(2, '_');
    let language = parts.next().unwrap_or_default();
    let region = parts.next();

    let language_ok =
        (2..=3).contains(&language.len()) && language.chars().all(|c| c.is_ascii_alphabetic());
    let region_ok = region.is_none_or(|value| {
        (2..=3).contains(&value.len()) && value.chars().all(|c| c.is_ascii_alphanumeric())
    });
    if !language_ok || !region_ok {
        return Err(MigrationError::configuration(format!(
            "invalid language code `{trimmed}` (expected e.g. `de`, `en`, `pt_BR`)"
        )));
    }
    Ok(trimmed.to_string())
}

/// Apply the target policy before enumeration. Any failure here is fatal to
/// the run and therefore reported as a configuration error.
pub fn prepare_target(source_dir: &Path, target_dir: &Path, policy: TargetPolicy) -> Result<()> {
    match policy {
        TargetPolicy::Keep => {
            if target_dir.exists() {
                info!(
                    target_dir = %normalize_for_display(target_dir),
                    "target directory exists; existing content is kept"
                );
            }
            Ok(())
        }
        TargetPolicy::Clear => {
            let source = normalize_pathbuf(source_dir);
            let target = normalize_pathbuf(target_dir);
            if source.starts_with(&target) {
                return Err(MigrationError::configuration(format!(
                    "refusing to clear {}: it contains the source directory {}",
                    normalize_for_display(&target),
                    normalize_for_display(&source)
                )));
            }
            clear_directory(&target).map_err(|error| error.reclassify(ErrorKind::Configuration))
        }
    }
}

/// Removes everything inside `dir`, keeping `dir` itself.
pub fn clear_directory(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let entries = fs::read_dir(dir).storage_context(|| format!("failed to list {}", dir.display()))?;
    let mut removed = 0usize;
    for entry in entries {
        let entry = entry.storage_context(|| format!("failed to list {}", dir.display()))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .storage_context(|| format!("failed to inspect {}", path.display()))?;
        let removal = if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removal.storage_context(|| format!("failed to remove {}", path.display()))?;
        removed += 1;
    }
    info!(
        target_dir = %normalize_for_display(dir),
        removed,
        "cleared target directory"
    );
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn normalize_pathbuf(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Path::new(std::path::MAIN_SEPARATOR_STR)),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
