mod assemble;
mod backend;
mod classpath;
mod decode;
mod descriptor;
mod element;
mod extract;
mod introspect;
mod ir;
mod opcodes;
mod pool;
mod resources;
mod scan;
mod schema;
mod signature;
mod simulate;
#[cfg(test)]
mod test_classes;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::backend::BackendKind;
use crate::classpath::ClassIndex;
use crate::extract::extract_resources;
use crate::pool::MethodPool;
use crate::resources::Project;
use crate::scan::scan_inputs;

/// CLI arguments for restmap execution.
#[derive(Parser, Debug)]
#[command(
    name = "restmap",
    about = "Static REST API surface extraction from JVM class files and JAR files.",
    version
)]
struct Cli {
    #[arg(
        long,
        value_name = "PATH",
        required = true,
        num_args = 1..,
        help = "Project class/JAR/directory paths. Use @file to read paths (one per line)."
    )]
    input: Vec<String>,
    #[arg(
        long,
        value_name = "PATH",
        num_args = 1..,
        help = "Classpath entries. Use @file to read paths (one per line)."
    )]
    classpath: Vec<String>,
    #[arg(long, value_name = "NAME", default_value = "project")]
    project_name: String,
    #[arg(long, value_name = "VERSION", default_value = "0.1-SNAPSHOT")]
    project_version: String,
    #[arg(long, value_name = "DOMAIN", default_value = "example.com")]
    domain: String,
    #[arg(long, value_enum, default_value = "swagger")]
    backend: BackendKind,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

fn main() -> std::process::ExitCode {
    init_logging();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            std::process::ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let input = expand_path_args(&cli.input, &base_dir).context("failed to expand --input arguments")?;
    let input = require_paths("project path", input)?;
    let classpath =
        expand_path_args(&cli.classpath, &base_dir).context("failed to expand --classpath arguments")?;

    let scan = scan_inputs(&input, &classpath)?;
    let index = ClassIndex::build(scan.classes);
    info!(
        "parsed {} classes; index holds {} unique names",
        scan.class_count,
        index.len()
    );

    let pool = MethodPool::new();
    let extracted = extract_resources(&index, &pool);
    let resources = assemble::assemble(extracted, &index);

    if resources.is_empty() {
        info!("empty analysis result, omitting output");
        return Ok(());
    }

    let project = Project {
        name: cli.project_name,
        version: cli.project_version,
        domain: cli.domain,
        resources,
    };
    let rendered = cli.backend.create().render(&project);

    if let Err(err) = write_output(cli.output.as_deref(), &rendered) {
        error!("could not write output: {err:#}");
    }
    Ok(())
}

fn write_output(output: Option<&Path>, rendered: &str) -> Result<()> {
    let mut writer = output_writer(output)?;
    writer
        .write_all(rendered.as_bytes())
        .context("failed to write output")?;
    writer.write_all(b"\n").context("failed to write output")?;
    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Route diagnostics to stderr through the tracing facade. A `RUST_LOG`
/// setting overrides the built-in filter; a second init (tests) is a no-op.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("restmap=info,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn expand_path_args(args: &[String], base_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut expanded = Vec::new();
    let mut stack = Vec::new();
    for arg in args {
        expanded.extend(expand_path_arg(arg, base_dir, &mut stack)?);
    }
    Ok(expanded)
}

fn expand_path_arg(arg: &str, base_dir: &Path, stack: &mut Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let Some(path_str) = arg.strip_prefix('@') else {
        return Ok(vec![PathBuf::from(arg)]);
    };
    if path_str.is_empty() {
        anyhow::bail!("empty @file reference");
    }
    let file_path = PathBuf::from(path_str);
    let resolved = if file_path.is_absolute() {
        file_path
    } else {
        base_dir.join(file_path)
    };
    let canonical = resolved
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", resolved.display()))?;
    if stack.contains(&canonical) {
        anyhow::bail!("circular @file reference: {}", canonical.display());
    }
    let content = fs::read_to_string(&canonical)
        .with_context(|| format!("failed to read {}", canonical.display()))?;
    stack.push(canonical.clone());
    let file_dir = canonical.parent().unwrap_or_else(|| Path::new(""));
    let mut paths = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('@') {
            paths.extend(expand_path_arg(line, file_dir, stack)?);
            continue;
        }
        let entry = PathBuf::from(line);
        let resolved_entry = if entry.is_absolute() {
            entry
        } else {
            file_dir.join(entry)
        };
        paths.push(resolved_entry);
    }
    stack.pop();
    Ok(paths)
}

/// Project paths are mandatory and must exist; anything less is a usage
/// error.
fn require_paths(label: &str, paths: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    if paths.is_empty() {
        anyhow::bail!("no {label} provided");
    }
    for path in &paths {
        if !path.exists() {
            anyhow::bail!("{label} not found: {}", path.display());
        }
    }
    Ok(paths)
}
