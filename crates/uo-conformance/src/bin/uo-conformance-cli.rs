#![forbid(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use uo_conformance::{
    HarnessConfig, HarnessError, SuiteEvent, append_run_history, render_case_detail,
    render_status, run_conformance, select_fixtures, write_json_report,
};
use uo_fingerprint::DigestAlgorithm;

#[derive(Debug, Clone, Default)]
struct CliArgs {
    fixtures: Vec<String>,
    verbose: bool,
    list: bool,
    repo_root: Option<PathBuf>,
    fixture_root: Option<PathBuf>,
    subject: Option<PathBuf>,
    subject_config: Option<PathBuf>,
    no_subject_config: bool,
    digest: Option<DigestAlgorithm>,
    keep_failed: bool,
    json_report: Option<PathBuf>,
    history: Option<PathBuf>,
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(error) => {
            eprintln!("uo-conformance-cli error: {error}");
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args = parse_args()?;
    let config = build_config(&args)?;

    if args.list {
        for fixture in select_fixtures(&config, &args.fixtures)? {
            println!("{} {}", fixture.name, fixture.path.display());
        }
        return Ok(true);
    }

    let verbose = args.verbose;
    let report = run_conformance(config, &args.fixtures, |event| match event {
        SuiteEvent::Started(fixture) => {
            announce(&mut std::io::stdout(), &fixture.name);
        }
        SuiteEvent::Finished(result) => {
            println!("{}", render_status(result));
            if verbose && let Some(detail) = render_case_detail(result) {
                println!("{detail}");
            }
        }
    })?;

    println!(
        "fixtures={} passed={} failed={} all_passed={}",
        report.fixture_count,
        report.passed,
        report.failed,
        report.all_passed()
    );

    if let Some(path) = args.json_report.as_deref() {
        write_json_report(path, &report)?;
        println!("wrote report={}", path.display());
    }
    if let Some(path) = args.history.as_deref() {
        let entry = append_run_history(path, &report)?;
        println!("wrote history={} hash={}", path.display(), entry.report_hash);
    }

    Ok(report.all_passed())
}

/// Print the unterminated `Testing <name>...` prefix. The verdict finishes
/// the line once the fixture completes.
fn announce(out: &mut impl Write, name: &str) -> bool {
    match write!(out, "Testing {name}...").and_then(|()| out.flush()) {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(%error, fixture = name, "failed to write progress line");
            false
        }
    }
}

/// Defaults, then `harness.yaml`, then command-line flags.
fn build_config(args: &CliArgs) -> Result<HarnessConfig, HarnessError> {
    let repo_root = match &args.repo_root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let mut config = match &args.fixture_root {
        Some(fixture_root) => HarnessConfig::with_fixture_root(repo_root, fixture_root),
        None => HarnessConfig::default_paths(repo_root),
    };
    config.load_settings()?;

    if let Some(subject) = &args.subject {
        config.subject = Some(subject.clone());
    }
    if let Some(template) = &args.subject_config {
        config.subject_config = Some(template.clone());
    }
    if args.no_subject_config {
        config.subject_config = None;
    }
    if let Some(digest) = args.digest {
        config.digest = digest;
    }
    if args.keep_failed {
        config.keep_failed = true;
    }
    Ok(config)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    if let Err(err) = builder.try_init() {
        eprintln!("failed to install tracing subscriber: {err}");
    }
}

fn parse_args() -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--verbose" | "-v" => parsed.verbose = true,
            "--list" => parsed.list = true,
            "--repo-root" => parsed.repo_root = Some(path_value(&mut args, &arg)?),
            "--fixture-root" => parsed.fixture_root = Some(path_value(&mut args, &arg)?),
            "--subject" => parsed.subject = Some(path_value(&mut args, &arg)?),
            "--subject-config" => parsed.subject_config = Some(path_value(&mut args, &arg)?),
            "--no-subject-config" => parsed.no_subject_config = true,
            "--keep-failed" => parsed.keep_failed = true,
            "--json-report" => parsed.json_report = Some(path_value(&mut args, &arg)?),
            "--history" => parsed.history = Some(path_value(&mut args, &arg)?),
            "--digest" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--digest requires blake2b or sha256".to_owned())?;
                parsed.digest = Some(
                    DigestAlgorithm::parse(&value)
                        .ok_or_else(|| format!("unsupported digest: {value}"))?,
                );
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with('-') => return Err(format!("unknown argument: {other}")),
            other => parsed.fixtures.push(other.to_owned()),
        }
    }

    if parsed.subject_config.is_some() && parsed.no_subject_config {
        return Err("--subject-config and --no-subject-config are exclusive".to_owned());
    }
    Ok(parsed)
}

fn path_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<PathBuf, String> {
    args.next()
        .map(PathBuf::from)
        .ok_or_else(|| format!("{flag} requires a path"))
}

fn print_help() {
    println!(
        "uo-conformance-cli\n\
         Usage:\n\
         \tuo-conformance-cli [FIXTURE ...] [-v] [--fixture-root DIR] [--subject PATH] [--json-report PATH]\n\
         Options:\n\
         \tFIXTURE                 Fixture name or directory (default: every fixture under the root)\n\
         \t-v, --verbose           Print subject output or the actual fingerprint for failures\n\
         \t--list                  List the selected fixtures and exit\n\
         \t--repo-root <dir>       Subject project root (default: current directory)\n\
         \t--fixture-root <dir>    Fixture directory (default: <repo-root>/integration)\n\
         \t--subject <path>        Use this executable instead of building the subject\n\
         \t--subject-config <p>    Config template copied and passed to the subject as -c\n\
         \t--no-subject-config     Do not pass a config file to the subject\n\
         \t--digest <algo>         blake2b (default) or sha256\n\
         \t--keep-failed           Keep scratch workspaces of failed fixtures\n\
         \t--json-report <path>    Write the full run report as JSON\n\
         \t--history <path>        Append a run summary row to a JSONL file\n\
         \t-h, --help              Show this help"
    );
}
