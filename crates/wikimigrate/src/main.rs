mod logging;

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind as ClapErrorKind;
use tracing::{info, warn};
use wikimigrate_core::config::{DEFAULT_SETTINGS_FILENAME, PostProcessKind, load_settings};
use wikimigrate_core::runner::MigrationRunner;
use wikimigrate_core::runtime::{
    ResolutionContext, RunOverrides, RunPlan, normalize_for_display, resolve_plan,
};

const USAGE: &str = "Usage: wikimigrate <sourceDir> <targetDir> <lang>";

#[derive(Debug, Parser)]
#[command(
    name = "wikimigrate",
    version,
    about = "Migrate a JSPWiki page store into Markdown pages"
)]
struct Cli {
    /// Directory holding the source wiki pages
    #[arg(value_name = "SOURCE_DIR")]
    source_dir: PathBuf,
    /// Directory receiving the translated pages
    #[arg(value_name = "TARGET_DIR")]
    target_dir: PathBuf,
    /// Language code of the wiki content, e.g. `de` or `pt_BR`
    #[arg(value_name = "LANG")]
    lang: String,
    #[arg(long, value_name = "PATH", help = "Settings file (default: ./wikimigrate.toml)")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "SYNTAX")]
    source_syntax: Option<String>,
    #[arg(long, value_name = "SYNTAX")]
    target_syntax: Option<String>,
    #[arg(long, value_name = "PARSER", help = "Parser used to render source pages")]
    parser: Option<String>,
    #[arg(long, value_name = "PATH")]
    work_dir: Option<PathBuf>,
    #[arg(long, help = "Remove existing target content before migrating")]
    clear_target: bool,
    #[arg(long, value_name = "MODE", help = "identity | tidy")]
    post_process: Option<PostProcessKind>,
    #[arg(long, help = "Print the run report as JSON after the summary")]
    json: bool,
    #[arg(long, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            source_dir: self.source_dir.clone(),
            target_dir: self.target_dir.clone(),
            lang: self.lang.clone(),
            source_syntax: self.source_syntax.clone(),
            target_syntax: self.target_syntax.clone(),
            parser: self.parser.clone(),
            work_dir: self.work_dir.clone(),
            clear_target: self.clear_target,
            post_process: self.post_process,
        }
    }
}

enum Invocation {
    Run(Box<Cli>),
    Exit(i32),
}

/// Help and version requests exit 0. Any other argument error, including
/// fewer than three positional arguments, prints the usage line and exits 1.
fn parse_invocation<I, T>(args: I, out: &mut dyn Write, err: &mut dyn Write) -> Invocation
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => Invocation::Run(Box::new(cli)),
        Err(error)
            if matches!(
                error.kind(),
                ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion
            ) =>
        {
            let _ = write!(out, "{}", error.render());
            Invocation::Exit(0)
        }
        Err(error) => {
            let _ = writeln!(out, "{USAGE}");
            let _ = write!(err, "{}", error.render());
            Invocation::Exit(1)
        }
    }
}

fn main() -> Result<()> {
    let cli = match parse_invocation(std::env::args_os(), &mut io::stdout(), &mut io::stderr()) {
        Invocation::Run(cli) => cli,
        Invocation::Exit(code) => std::process::exit(code),
    };

    dotenvy::dotenv().ok();
    let context = ResolutionContext::from_process()?;
    let settings_path = cli
        .config
        .clone()
        .unwrap_or_else(|| context.cwd.join(DEFAULT_SETTINGS_FILENAME));
    let settings = load_settings(&settings_path)?;
    let plan = resolve_plan(&context, &cli.overrides(), &settings)?;
    run_migration(&cli, &plan)
}

fn run_migration(cli: &Cli, plan: &RunPlan) -> Result<()> {
    let mut runner = MigrationRunner::from_plan(plan)?;
    let skipped = logging::init(
        cli.verbose,
        &[runner.source().log_path(), runner.target().log_path()],
    )?;
    for reason in skipped {
        warn!("log file disabled: {reason}");
    }

    let source = normalize_for_display(&plan.source.page_dir);
    let target = normalize_for_display(&plan.target.page_dir);
    println!("Source directory: {source}");
    println!("Target directory: {target}");
    if cli.diagnostics {
        println!("\n[diagnostics]\n{}\n", plan.diagnostics());
    }
    info!(
        lang = %plan.lang,
        source_syntax = %plan.source.syntax,
        target_syntax = %plan.target.syntax,
        "starting migration"
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let report = runner.run(&mut out)?;

    if cli.json {
        writeln!(out, "{}", report.to_json()?)?;
    }
    writeln!(
        out,
        "Successfully converted {source} to {target} for language: {}",
        report.lang()
    )?;
    writeln!(out, "Conversion process completed.")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    fn invoke(args: &[&str]) -> (Option<i32>, String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = match parse_invocation(args.iter().copied(), &mut out, &mut err) {
            Invocation::Run(_) => None,
            Invocation::Exit(code) => Some(code),
        };
        (
            code,
            String::from_utf8(out).expect("utf8 stdout"),
            String::from_utf8(err).expect("utf8 stderr"),
        )
    }

    #[test]
    fn too_few_arguments_print_usage_and_exit_one() {
        for args in [
            &["wikimigrate"][..],
            &["wikimigrate", "/wiki/jspwiki"][..],
            &["wikimigrate", "/wiki/jspwiki", "/wiki/md"][..],
        ] {
            let (code, out, err) = invoke(args);
            assert_eq!(code, Some(1));
            assert_eq!(out, format!("{USAGE}\n"));
            assert!(!err.is_empty());
        }
    }

    #[test]
    fn three_arguments_start_a_run() {
        let (code, out, _) = invoke(&["wikimigrate", "/wiki/jspwiki", "/wiki/md", "en"]);
        assert_eq!(code, None);
        assert!(out.is_empty());
    }

    #[test]
    fn help_exits_zero_on_stdout() {
        let (code, out, err) = invoke(&["wikimigrate", "--help"]);
        assert_eq!(code, Some(0));
        assert!(out.contains("SOURCE_DIR"));
        assert!(err.is_empty());
    }

    #[test]
    fn positional_arguments_are_required() {
        let error = Cli::try_parse_from(["wikimigrate", "/wiki/jspwiki", "/wiki/md"])
            .expect_err("lang is required");
        assert_eq!(error.kind(), ClapErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn flags_flow_into_overrides() {
        let cli = Cli::try_parse_from([
            "wikimigrate",
            "/wiki/jspwiki",
            "/wiki/md",
            "pt_BR",
            "--clear-target",
            "--post-process",
            "tidy",
            "--work-dir",
            "/tmp/work",
            "-vv",
        ])
        .expect("parse");
        let overrides = cli.overrides();
        assert_eq!(overrides.lang, "pt_BR");
        assert!(overrides.clear_target);
        assert_eq!(overrides.post_process, Some(PostProcessKind::Tidy));
        assert_eq!(overrides.work_dir, Some(PathBuf::from("/tmp/work")));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn unknown_post_process_is_rejected() {
        let error = Cli::try_parse_from([
            "wikimigrate",
            "/wiki/jspwiki",
            "/wiki/md",
            "en",
            "--post-process",
            "prettier",
        ])
        .expect_err("must fail");
        assert_eq!(error.kind(), ClapErrorKind::ValueValidation);
    }
}
