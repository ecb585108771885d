use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use flow_spec::{
    CheckReport, ComputedFieldEngine, Context, EngineConfig, FormSchema, TransitionEngine,
    VisibilityController, check,
};
use serde_json::{Value, json};
use tracing::debug;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Form flow inspection CLI",
    long_about = "Loads a form flow schema and a data snapshot and prints the decisions the flow engines make for them"
)]
struct Cli {
    /// JSON file with engine configuration overrides.
    #[arg(long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,
    /// Log engine decisions to stderr.
    #[arg(long, alias = "debug", global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Inputs {
    /// Path to the form schema JSON.
    #[arg(long, value_name = "SCHEMA")]
    schema: PathBuf,
    /// Path to the data snapshot JSON (defaults to an empty object).
    #[arg(long, value_name = "DATA")]
    data: Option<PathBuf>,
    /// JSON object with values reachable through `@` references.
    #[arg(long, value_name = "CONTEXT")]
    context: Option<PathBuf>,
    /// Environment name reported by `@env`.
    #[arg(long, value_name = "ENV")]
    env: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// List the visible steps.
    Steps {
        #[command(flatten)]
        inputs: Inputs,
    },
    /// List the visible fields of one step.
    Fields {
        #[command(flatten)]
        inputs: Inputs,
        #[arg(long, value_name = "STEP")]
        step: String,
    },
    /// Resolve the step that follows the given one.
    Next {
        #[command(flatten)]
        inputs: Inputs,
        #[arg(long, value_name = "STEP")]
        step: String,
        /// Let review steps continue to their outgoing transition.
        #[arg(long)]
        no_review_terminal: bool,
    },
    /// Resolve the visible step before the given one.
    Prev {
        #[command(flatten)]
        inputs: Inputs,
        #[arg(long, value_name = "STEP")]
        step: String,
    },
    /// Plan the forward path between two steps.
    Path {
        #[command(flatten)]
        inputs: Inputs,
        #[arg(long, value_name = "STEP")]
        from: String,
        #[arg(long, value_name = "STEP")]
        to: String,
        /// Hop bound (defaults to the configured `max_path_steps`).
        #[arg(long, value_name = "N")]
        max_steps: Option<usize>,
    },
    /// Evaluate computed fields and print the updated data.
    Compute {
        #[command(flatten)]
        inputs: Inputs,
        /// Only re-run the fields downstream of this data path.
        #[arg(long, value_name = "PATH")]
        changed: Option<String>,
        /// Write the updated snapshot back to the data file.
        #[arg(long, requires = "data")]
        write: bool,
    },
    /// Lint a schema for authoring mistakes.
    Check {
        #[arg(long, value_name = "SCHEMA")]
        schema: PathBuf,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the JSON Schema describing form schemas.
    Schema,
}

struct Loaded {
    schema: FormSchema,
    data: Value,
    context: Context,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Steps { inputs } => run_steps(&config, &inputs),
        Command::Fields { inputs, step } => run_fields(&config, &inputs, &step),
        Command::Next {
            inputs,
            step,
            no_review_terminal,
        } => run_next(&config, &inputs, &step, no_review_terminal),
        Command::Prev { inputs, step } => run_prev(&config, &inputs, &step),
        Command::Path {
            inputs,
            from,
            to,
            max_steps,
        } => run_path(&config, &inputs, &from, &to, max_steps),
        Command::Compute {
            inputs,
            changed,
            write,
        } => run_compute(&inputs, changed.as_deref(), write),
        Command::Check { schema, json } => run_check(&schema, json),
        Command::Schema => run_schema(),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    match path {
        Some(path) => {
            let config = EngineConfig::from_json(&fs::read_to_string(path)?)?;
            debug!(?config, "loaded engine configuration");
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn read_json(path: &Path) -> CliResult<Value> {
    let text = fs::read_to_string(path)
        .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    Ok(serde_json::from_str(&text)
        .map_err(|err| format!("invalid JSON in {}: {err}", path.display()))?)
}

fn load(inputs: &Inputs) -> CliResult<Loaded> {
    let schema: FormSchema = serde_json::from_value(read_json(&inputs.schema)?)?;
    let data = match &inputs.data {
        Some(path) => read_json(path)?,
        None => json!({}),
    };

    let mut context = Context::new();
    if let Some(path) = &inputs.context {
        match read_json(path)? {
            Value::Object(values) => context = context.with_values(values),
            _ => return Err(format!("{} must contain a JSON object", path.display()).into()),
        }
    }
    if let Some(env) = &inputs.env {
        context = context.with_environment(env.clone());
    }

    Ok(Loaded {
        schema,
        data,
        context,
    })
}

fn run_steps(config: &EngineConfig, inputs: &Inputs) -> CliResult<()> {
    let loaded = load(inputs)?;
    let mut visibility = VisibilityController::with_config(config);
    for step in visibility.get_visible_steps(&loaded.schema, &loaded.data, &loaded.context) {
        println!("{step}");
    }
    Ok(())
}

fn run_fields(config: &EngineConfig, inputs: &Inputs, step: &str) -> CliResult<()> {
    let loaded = load(inputs)?;
    if loaded.schema.step(step).is_none() {
        return Err(format!("unknown step '{step}'").into());
    }
    let mut visibility = VisibilityController::with_config(config);
    let fields =
        visibility.get_visible_fields(&loaded.schema, step, &loaded.data, &loaded.context)?;
    for field in fields {
        println!("{field}");
    }
    Ok(())
}

fn run_next(
    config: &EngineConfig,
    inputs: &Inputs,
    step: &str,
    no_review_terminal: bool,
) -> CliResult<()> {
    let mut loaded = load(inputs)?;
    if no_review_terminal {
        loaded.context = loaded.context.with_review_terminal(false);
    }
    let mut engine = TransitionEngine::with_config(config);
    let next = engine.get_next_step(&loaded.schema, step, &loaded.data, &loaded.context)?;
    println!("next: {}", next.as_deref().unwrap_or("none"));
    Ok(())
}

fn run_prev(config: &EngineConfig, inputs: &Inputs, step: &str) -> CliResult<()> {
    let loaded = load(inputs)?;
    let mut engine = TransitionEngine::with_config(config);
    let previous = engine.get_previous_step(&loaded.schema, step, &loaded.data, &loaded.context);
    println!("previous: {}", previous.as_deref().unwrap_or("none"));
    Ok(())
}

fn run_path(
    config: &EngineConfig,
    inputs: &Inputs,
    from: &str,
    to: &str,
    max_steps: Option<usize>,
) -> CliResult<()> {
    let loaded = load(inputs)?;
    let mut engine = TransitionEngine::with_config(config);
    let path = engine.get_transition_path(
        &loaded.schema,
        from,
        to,
        &loaded.data,
        max_steps,
        &loaded.context,
    )?;
    if path.is_empty() {
        println!(
            "no path from {from} to {to} within {} steps",
            max_steps.unwrap_or(config.max_path_steps)
        );
    } else {
        println!("{}", path.join(" -> "));
    }
    Ok(())
}

fn run_compute(inputs: &Inputs, changed: Option<&str>, write: bool) -> CliResult<()> {
    let mut loaded = load(inputs)?;
    let mut engine = ComputedFieldEngine::new();
    if let Some(user) = loaded.context.value("user") {
        engine.set_user_context(user.clone());
    }

    let results = match changed {
        Some(path) => {
            for field in &loaded.schema.computed {
                engine.register_computed_field(field);
            }
            engine.evaluate_affected(path, &mut loaded.data)?
        }
        None => engine.evaluate_all(&loaded.schema.computed, &mut loaded.data)?,
    };

    let failed = results.iter().filter(|result| result.error.is_some()).count();
    if failed > 0 {
        eprintln!("{failed} computed field(s) fell back to their default value");
    }

    if write && let Some(path) = &inputs.data {
        fs::write(path, serde_json::to_string_pretty(&loaded.data)?)?;
        debug!(path = %path.display(), "wrote updated data snapshot");
    }

    let output = json!({ "results": results, "data": loaded.data });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_check(schema_path: &Path, as_json: bool) -> CliResult<()> {
    let schema: FormSchema = serde_json::from_value(read_json(schema_path)?)?;
    let report = check(&schema);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        describe_report(&report);
    }

    if report.ok {
        Ok(())
    } else {
        Err("schema check failed".into())
    }
}

fn describe_report(report: &CheckReport) {
    if report.ok {
        println!("Schema check: ok");
        return;
    }
    println!("Schema check: {} issue(s)", report.issues.len());
    for issue in &report.issues {
        let location = issue
            .step_id
            .as_deref()
            .or(issue.path.as_deref())
            .unwrap_or("<schema>");
        println!("  [{}] {} - {}", issue.code, location, issue.message);
    }
}

fn run_schema() -> CliResult<()> {
    let schema = schemars::schema_for!(FormSchema);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
