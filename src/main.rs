mod arena;
mod class_table;
mod classpath;
mod config;
mod dataflow;
mod decoder;
mod descriptor;
mod fault;
mod fullinfo;
mod ir;
mod lattice;
mod opcodes;
mod report;
mod scan;
mod telemetry;
#[cfg(test)]
mod test_harness;
mod verifier;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use rayon::prelude::*;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, PropertyBag, Run, SCHEMA_URL, Sarif, Tool, ToolComponent,
};
use tracing::{debug, info};

use crate::classpath::ClassPath;
use crate::config::Config;
use crate::fault::VerifyOutcome;
use crate::report::{ClassVerdict, rule_descriptors, verdict_results};
use crate::scan::scan_inputs;
use crate::telemetry::init_logging;
use crate::verifier::{VerifyOptions, verify_class};

/// CLI arguments for jverify execution.
#[derive(Parser, Debug)]
#[command(
    name = "jverify",
    about = "Bytecode verification for JVM class files and JAR files with SARIF output.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Cap on diagnostic message length in bytes.
    #[arg(long, value_name = "N")]
    message_limit: Option<usize>,
    /// Arena budget per method in bytes; exceeding it reports OUT_OF_MEMORY.
    #[arg(long, value_name = "BYTES")]
    arena_limit: Option<usize>,
    /// Exit with a non-zero status when any class fails verification.
    #[arg(long)]
    fail_on_error: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    run(cli)
}

fn run(cli: Cli) -> Result<ExitCode> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let options = config.options(cli.message_limit, cli.arena_limit);

    let started_at = Instant::now();
    let analysis = verify_inputs(&cli.input, &cli.classpath, &config, &options)?;
    let failed_count = analysis.failed_count();
    let invocation = build_invocation(&analysis.stats(failed_count));
    let results = verdict_results(&analysis.verdicts, &analysis.artifacts);
    let sarif = build_sarif(analysis.artifacts, invocation, results);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    info!(
        verified = analysis.verdicts.len(),
        failed = failed_count,
        "verification finished"
    );
    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} verify_ms={} classes={} verified={}",
            started_at.elapsed().as_millis(),
            analysis.scan_duration_ms,
            analysis.verify_duration_ms,
            analysis.class_count,
            analysis.verdicts.len()
        );
    }

    if cli.fail_on_error && failed_count > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Everything the report needs from one run.
struct Analysis {
    artifacts: Vec<Artifact>,
    verdicts: Vec<ClassVerdict>,
    class_count: usize,
    scan_duration_ms: u128,
    verify_duration_ms: u128,
}

impl Analysis {
    fn failed_count(&self) -> usize {
        self.verdicts
            .iter()
            .filter(|verdict| !verdict.outcome.is_ok())
            .count()
    }

    fn stats(&self, failed_count: usize) -> InvocationStats {
        InvocationStats {
            scan_duration_ms: self.scan_duration_ms,
            verify_duration_ms: self.verify_duration_ms,
            class_count: self.class_count,
            verified_count: self.verdicts.len(),
            failed_count,
            artifact_count: self.artifacts.len(),
        }
    }
}

/// Load the input and classpath, then verify every input class not excluded by `config`.
fn verify_inputs(
    input: &Path,
    classpath: &[PathBuf],
    config: &Config,
    options: &VerifyOptions,
) -> Result<Analysis> {
    let scan_started_at = Instant::now();
    let scan = scan_inputs(input, classpath)?;
    let scan_duration_ms = scan_started_at.elapsed().as_millis();
    let class_count = scan.class_count();
    debug!(
        classes = class_count,
        targets = scan.target_count(),
        failures = scan.failures.len(),
        "scanned inputs"
    );

    let mut targets = Vec::new();
    let mut models = Vec::with_capacity(scan.classes.len());
    for class in scan.classes {
        if class.target && !config.is_excluded(&class.model.name) {
            targets.push((class.model.name.clone(), class.artifact_index));
        }
        models.push(class.model);
    }
    let class_path = ClassPath::new(models).context("build class path")?;
    debug!(visible = class_path.len(), "class path ready");

    let verify_started_at = Instant::now();
    let mut verdicts: Vec<ClassVerdict> = targets
        .into_par_iter()
        .map(|(class_name, artifact_index)| {
            let outcome = match class_path.lookup(&class_name) {
                Some(handle) => verify_class(&class_path, handle, options),
                None => VerifyOutcome::ClassFormatError(format!("Cannot find class {class_name}")),
            };
            ClassVerdict {
                class_name,
                artifact_index,
                outcome,
            }
        })
        .collect();
    let verify_duration_ms = verify_started_at.elapsed().as_millis();

    verdicts.extend(scan.failures.into_iter().map(|failure| ClassVerdict {
        class_name: failure.source,
        artifact_index: failure.artifact_index,
        outcome: VerifyOutcome::ClassFormatError(failure.message),
    }));

    Ok(Analysis {
        artifacts: scan.artifacts,
        verdicts,
        class_count,
        scan_duration_ms,
        verify_duration_ms,
    })
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

/// Metadata captured for SARIF invocation properties.
struct InvocationStats {
    scan_duration_ms: u128,
    verify_duration_ms: u128,
    class_count: usize,
    verified_count: usize,
    failed_count: usize,
    artifact_count: usize,
}

fn build_invocation(stats: &InvocationStats) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let mut properties = BTreeMap::new();
    properties.insert("jverify.scan_ms".to_string(), json!(stats.scan_duration_ms));
    properties.insert(
        "jverify.verify_ms".to_string(),
        json!(stats.verify_duration_ms),
    );
    properties.insert("jverify.class_count".to_string(), json!(stats.class_count));
    properties.insert(
        "jverify.verified_count".to_string(),
        json!(stats.verified_count),
    );
    properties.insert("jverify.failed_count".to_string(), json!(stats.failed_count));
    properties.insert(
        "jverify.artifact_count".to_string(),
        json!(stats.artifact_count),
    );

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .properties(PropertyBag::builder().additional_properties(properties).build())
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    results: Vec<serde_sarif::sarif::Result>,
) -> Sarif {
    let driver = ToolComponent::builder()
        .name("jverify")
        .rules(rule_descriptors())
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::opcodes::*;
    use crate::test_harness::{ClassBuilder, MethodBuilder};

    fn empty_stats() -> InvocationStats {
        InvocationStats {
            scan_duration_ms: 0,
            verify_duration_ms: 0,
            class_count: 0,
            verified_count: 0,
            failed_count: 0,
            artifact_count: 0,
        }
    }

    fn good_class(name: &str) -> Vec<u8> {
        let mut class = ClassBuilder::new(name);
        let init = class.method_ref("java/lang/Object", "<init>", "()V");
        let [high, low] = init.to_be_bytes();
        class.method(
            MethodBuilder::new("<init>", "()V").code(&[ALOAD_0, INVOKESPECIAL, high, low, RETURN]),
        );
        class.to_bytes()
    }

    fn bad_class(name: &str) -> Vec<u8> {
        let mut class = ClassBuilder::new(name);
        class.method(
            MethodBuilder::new("answer", "()V")
                .static_method()
                .code(&[ICONST_0, IRETURN]),
        );
        class.to_bytes()
    }

    #[test]
    fn sarif_is_minimal_and_valid_shape() {
        let invocation = build_invocation(&empty_stats());
        let sarif = build_sarif(Vec::new(), invocation, Vec::new());
        let value = serde_json::to_value(&sarif).expect("serialize SARIF");

        assert_eq!(value["version"], "2.1.0");
        assert_eq!(value["$schema"], SCHEMA_URL);
        assert_eq!(value["runs"][0]["tool"]["driver"]["name"], "jverify");
        assert_eq!(
            value["runs"][0]["tool"]["driver"]["rules"]
                .as_array()
                .expect("rules array")
                .len(),
            3
        );
        assert!(value["runs"][0]["results"]
            .as_array()
            .expect("results array")
            .is_empty());
        assert_eq!(
            value["runs"][0]["invocations"][0]["executionSuccessful"],
            true
        );
    }

    #[test]
    fn pipeline_reports_only_failing_classes() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("Good.class"), good_class("Good")).expect("write Good");
        fs::write(dir.path().join("Bad.class"), bad_class("Bad")).expect("write Bad");

        let analysis = verify_inputs(
            dir.path(),
            &[],
            &Config::default(),
            &VerifyOptions::default(),
        )
        .expect("verify");

        assert_eq!(analysis.class_count, 2);
        assert_eq!(analysis.verdicts.len(), 2);
        assert_eq!(analysis.failed_count(), 1);
        let results = verdict_results(&analysis.verdicts, &analysis.artifacts);
        let value = serde_json::to_value(&results).expect("serialize results");
        assert_eq!(value[0]["ruleId"], "VERIFY_ERROR");
        assert_eq!(
            value[0]["message"]["text"],
            "(class: Bad, method: answer signature: ()V) Wrong return type in function"
        );
    }

    #[test]
    fn excluded_classes_are_not_verified() {
        let dir = tempfile::tempdir().expect("temp dir");
        let generated = dir.path().join("gen");
        fs::create_dir_all(&generated).expect("create gen");
        fs::write(generated.join("Bad.class"), bad_class("gen/Bad")).expect("write Bad");
        let config = Config {
            exclude: vec!["gen/".to_string()],
            ..Config::default()
        };

        let analysis =
            verify_inputs(dir.path(), &[], &config, &VerifyOptions::default()).expect("verify");

        assert_eq!(analysis.class_count, 1);
        assert!(analysis.verdicts.is_empty());
    }

    #[test]
    fn classpath_classes_resolve_but_are_not_verified() {
        let dir = tempfile::tempdir().expect("temp dir");
        let lib = dir.path().join("lib");
        fs::create_dir_all(&lib).expect("create lib");
        fs::write(lib.join("Bad.class"), bad_class("Bad")).expect("write lib class");
        let input = dir.path().join("Good.class");
        fs::write(&input, good_class("Good")).expect("write input");

        let analysis = verify_inputs(
            &input,
            &[lib],
            &Config::default(),
            &VerifyOptions::default(),
        )
        .expect("verify");

        assert_eq!(analysis.verdicts.len(), 1);
        assert_eq!(analysis.failed_count(), 0);
    }

    #[test]
    fn unreadable_input_class_is_a_format_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("Broken.class"), b"\xCA\xFE").expect("write broken");

        let analysis = verify_inputs(
            dir.path(),
            &[],
            &Config::default(),
            &VerifyOptions::default(),
        )
        .expect("verify");

        assert_eq!(analysis.verdicts.len(), 1);
        assert_eq!(analysis.verdicts[0].outcome.code(), 3);
    }
}
