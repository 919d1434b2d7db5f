#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use uo_fingerprint::{
    DigestAlgorithm, EXPECTATION_FILE, FingerprintMode, describe_fixture, write_expectation,
};

#[derive(Debug, Clone)]
struct CliArgs {
    root: PathBuf,
    mode: FingerprintMode,
    output: Option<PathBuf>,
    stdout: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("uo-describe error: {error}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<(), String> {
    let args = parse_args()?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.root.join(EXPECTATION_FILE));

    let description =
        describe_fixture(&args.root, args.mode).map_err(|error| error.to_string())?;

    if args.stdout {
        let body = description
            .to_json_pretty()
            .map_err(|error| error.to_string())?;
        println!("{body}");
    } else {
        write_expectation(&output, &description).map_err(|error| error.to_string())?;
        println!(
            "wrote {} files={}",
            output.display(),
            description.file_count()
        );
    }
    Ok(())
}

fn parse_args() -> Result<CliArgs, String> {
    let mut root = None;
    let mut mode_name = "content".to_owned();
    let mut algorithm = DigestAlgorithm::default();
    let mut output = None;
    let mut stdout = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--mode" => {
                mode_name = args
                    .next()
                    .ok_or_else(|| "--mode requires size or content".to_owned())?;
            }
            "--digest" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--digest requires blake2b or sha256".to_owned())?;
                algorithm = DigestAlgorithm::parse(&value)
                    .ok_or_else(|| format!("unsupported digest: {value}"))?;
            }
            "--output" | "-o" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--output requires a path".to_owned())?;
                output = Some(PathBuf::from(value));
            }
            "--stdout" => {
                stdout = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with('-') => return Err(format!("unknown argument: {other}")),
            other => {
                if root.replace(PathBuf::from(other)).is_some() {
                    return Err("only one directory may be described".to_owned());
                }
            }
        }
    }

    let mode = match mode_name.as_str() {
        "size" => FingerprintMode::Size,
        "content" => FingerprintMode::Content(algorithm),
        other => return Err(format!("unsupported mode: {other}")),
    };

    Ok(CliArgs {
        root: root.unwrap_or_else(|| PathBuf::from(".")),
        mode,
        output,
        stdout,
    })
}

fn print_help() {
    println!(
        "uo-describe\n\
         Usage:\n\
         \tuo-describe [DIR] [--mode size|content] [--digest blake2b|sha256] [--output PATH] [--stdout]\n\
         Options:\n\
         \t--mode <mode>      content (default) or size\n\
         \t--digest <algo>    blake2b (default) or sha256, content mode only\n\
         \t-o, --output <p>   Write the document here instead of DIR/description.json\n\
         \t--stdout           Print the document instead of writing it\n\
         \t-h, --help         Show this help"
    );
}
