mod config;
mod state;

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::debug;
use similar::{ChangeTag, TextDiff};

use azrm_core::differ::{create_plan, destroy_plan};
use azrm_core::effect::Effect;
use azrm_core::interpreter::{EffectOutcome, Interpreter};
use azrm_core::plan::Plan;
use azrm_core::provider::Provider;
use azrm_core::resource::{Resource, ResourceId, State, Value};
use azrm_core::schema::ResourceSchema;
use azrm_provider::{AzureProvider, ProviderConfig, parse_identifier, schemas};

use config::ConfigFile;
use state::{LocalState, StateFile, carry_unread};

#[derive(Parser)]
#[command(name = "azrm")]
#[command(
    about = "Declarative management of Azure API Management and Private DNS resources",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file
    Validate {
        /// Path to configuration file
        #[arg(default_value = "azrm.json")]
        file: PathBuf,
    },
    /// Show execution plan without applying changes
    Plan {
        /// Path to configuration file
        #[arg(default_value = "azrm.json")]
        file: PathBuf,
    },
    /// Apply changes to reach the desired state
    Apply {
        /// Path to configuration file
        #[arg(default_value = "azrm.json")]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Destroy every resource recorded in state
    Destroy {
        /// Path to configuration file
        #[arg(default_value = "azrm.json")]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Bring an existing remote resource under management
    Import {
        /// Configuration address (e.g. azurerm_private_dns_zone.main)
        address: String,
        /// ARM resource ID
        id: String,
        /// Path to configuration file
        #[arg(default_value = "azrm.json")]
        file: PathBuf,
    },
    /// Re-read every resource in state, dropping those that no longer exist
    Refresh {
        /// Path to configuration file
        #[arg(default_value = "azrm.json")]
        file: PathBuf,
    },
    /// Print resource schemas
    Schema {
        /// Resource type (all types when omitted)
        resource_type: Option<String>,
    },
    /// Parse an ARM resource ID with the parser of a resource type
    ParseId {
        resource_type: String,
        id: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { file } => run_validate(&file),
        Commands::Plan { file } => run_plan(&file).await,
        Commands::Apply { file, auto_approve } => run_apply(&file, auto_approve).await,
        Commands::Destroy { file, auto_approve } => run_destroy(&file, auto_approve).await,
        Commands::Import { address, id, file } => run_import(&file, &address, &id).await,
        Commands::Refresh { file } => run_refresh(&file).await,
        Commands::Schema { resource_type } => run_schema(resource_type.as_deref()),
        Commands::ParseId { resource_type, id } => run_parse_id(&resource_type, &id),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

// =============================================================================
// Shared Steps
// =============================================================================

fn validate_resources(
    resources: &[Resource],
    schemas: &HashMap<String, ResourceSchema>,
) -> Result<(), String> {
    let mut all_errors = Vec::new();

    for resource in resources {
        if let Some(schema) = schemas.get(&resource.id.resource_type)
            && let Err(errors) = schema.validate(&resource.attributes)
        {
            for error in errors {
                all_errors.push(format!("{}: {}", resource.id, error));
            }
        }
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors.join("\n"))
    }
}

/// Load, default and validate the configured resources
fn load_resources(
    file: &Path,
    schemas: &HashMap<String, ResourceSchema>,
) -> Result<(ConfigFile, Vec<Resource>), String> {
    let config = ConfigFile::load(file)?;
    let resources = config.resources(schemas)?;
    validate_resources(&resources, schemas)?;
    Ok((config, resources))
}

fn provider_for(config: &ConfigFile) -> Result<AzureProvider, String> {
    let settings = ProviderConfig::from_env(config.provider.as_ref())
        .map_err(|e| format!("Provider configuration error: {}", e))?;
    AzureProvider::new(&settings).map_err(|e| e.to_string())
}

/// Run `work` while holding the state lock; the lock is released even if it fails
async fn locked<T>(
    backend: &LocalState,
    operation: &str,
    work: impl Future<Output = Result<T, String>>,
) -> Result<T, String> {
    let lock = backend.acquire_lock(operation).map_err(|e| e.to_string())?;
    let result = work.await;
    let released = backend.release_lock(&lock).map_err(|e| e.to_string());
    // A failed operation is reported before any lock release problem
    let value = result?;
    released?;
    Ok(value)
}

/// Read every resource recorded in state from Azure
async fn refresh_states(
    provider: &AzureProvider,
    state_file: &StateFile,
) -> Result<Vec<State>, String> {
    let mut states = Vec::with_capacity(state_file.resources.len());
    for entry in &state_file.resources {
        let id = entry.id();
        debug!("refreshing {} ({})", id, entry.identifier);
        let mut current = provider
            .read(&id, Some(entry.identifier.as_str()))
            .await
            .map_err(|e| format!("Failed to read state: {}", e))?;
        carry_unread(&mut current, &entry.attributes);
        states.push(current);
    }
    Ok(states)
}

/// Refresh `state_file` in memory and diff it against the configuration
async fn plan_changes(
    provider: &AzureProvider,
    state_file: &mut StateFile,
    resources: &[Resource],
    schemas: &HashMap<String, ResourceSchema>,
) -> Result<Plan, String> {
    let refreshed = refresh_states(provider, state_file).await?;
    for state in &refreshed {
        state_file.record(state);
    }

    Ok(create_plan(resources, &refreshed, schemas))
}

fn confirm(question: &str, hint: &str) -> Result<bool, String> {
    println!("{}", question.yellow().bold());
    println!("  {}", hint.yellow());
    print!("\n  Enter a value: ");
    std::io::Write::flush(&mut std::io::stdout()).map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    println!();

    Ok(input.trim() == "yes")
}

/// Execute effects in order, persisting state after each one; stops at the first failure
async fn execute_plan<P: Provider>(
    interpreter: &Interpreter<P>,
    plan: &Plan,
    backend: &LocalState,
    state_file: &mut StateFile,
) -> Result<(usize, usize), String> {
    let mut success_count = 0;

    for effect in plan.effects() {
        match interpreter.execute(effect).await {
            Ok(outcome) => {
                println!("  {} {}", "✓".green(), format_effect(effect));
                success_count += 1;
                record_outcome(state_file, effect, outcome);
                state_file.increment_serial();
                backend.write(state_file).map_err(|e| e.to_string())?;
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), format_effect(effect), e);
                return Ok((success_count, 1));
            }
        }
    }

    Ok((success_count, 0))
}

fn record_outcome(state_file: &mut StateFile, effect: &Effect, outcome: EffectOutcome) {
    match outcome {
        EffectOutcome::Created { mut state }
        | EffectOutcome::Updated { mut state }
        | EffectOutcome::Replaced { mut state } => {
            if let Some(desired) = desired_of(effect) {
                carry_unread(&mut state, &desired.attributes);
            }
            state_file.record(&state);
        }
        EffectOutcome::Deleted { id } => {
            state_file.remove(&id);
        }
        EffectOutcome::Skipped { .. } => {}
    }
}

fn desired_of(effect: &Effect) -> Option<&Resource> {
    match effect {
        Effect::Create(resource) => Some(resource),
        Effect::Update { to, .. } | Effect::Replace { to, .. } => Some(to),
        Effect::Delete { .. } => None,
    }
}

fn print_outcome(verb: &str, success_count: usize, failure_count: usize) {
    println!();
    if failure_count == 0 {
        println!(
            "{}",
            format!("{} complete! {} changes applied.", verb, success_count)
                .green()
                .bold()
        );
    } else {
        println!(
            "{}",
            format!(
                "{} failed. {} succeeded, {} failed.",
                verb, success_count, failure_count
            )
            .red()
            .bold()
        );
    }
}

// =============================================================================
// Commands
// =============================================================================

fn run_validate(file: &Path) -> Result<(), String> {
    let schemas = schemas();

    println!("{}", "Validating...".cyan());

    let (_, resources) = load_resources(file, &schemas)?;

    println!(
        "{}",
        format!("✓ {} resources validated successfully.", resources.len())
            .green()
            .bold()
    );

    for resource in &resources {
        println!("  • {}", resource.id);
    }

    Ok(())
}

async fn run_plan(file: &Path) -> Result<(), String> {
    let schemas = schemas();
    let (config, resources) = load_resources(file, &schemas)?;
    let provider = provider_for(&config)?;
    let mut state_file = LocalState::beside(file)
        .read()
        .map_err(|e| e.to_string())?;

    let plan = plan_changes(&provider, &mut state_file, &resources, &schemas).await?;
    print_plan(&plan, &schemas);
    Ok(())
}

async fn run_apply(file: &Path, auto_approve: bool) -> Result<(), String> {
    let schemas = schemas();
    let (config, resources) = load_resources(file, &schemas)?;
    let provider = provider_for(&config)?;
    let backend = LocalState::beside(file);

    locked(&backend, "apply", async {
        let mut state_file = backend.read().map_err(|e| e.to_string())?;
        let plan = plan_changes(&provider, &mut state_file, &resources, &schemas).await?;

        if plan.is_empty() {
            println!("{}", "No changes needed.".green());
            return Ok(());
        }

        print_plan(&plan, &schemas);
        println!();

        if !auto_approve
            && !confirm(
                "Do you want to perform these actions?",
                "Only 'yes' will be accepted to approve.",
            )?
        {
            println!("{}", "Apply cancelled.".yellow());
            return Ok(());
        }

        println!("{}", "Applying changes...".cyan().bold());
        println!();

        let interpreter = Interpreter::new(provider);
        let (success_count, failure_count) =
            execute_plan(&interpreter, &plan, &backend, &mut state_file).await?;
        print_outcome("Apply", success_count, failure_count);
        Ok(())
    })
    .await
}

async fn run_destroy(file: &Path, auto_approve: bool) -> Result<(), String> {
    let config = ConfigFile::load(file)?;
    let provider = provider_for(&config)?;
    let backend = LocalState::beside(file);

    locked(&backend, "destroy", async {
        let mut state_file = backend.read().map_err(|e| e.to_string())?;
        let refreshed = refresh_states(&provider, &state_file).await?;
        for state in &refreshed {
            state_file.record(state);
        }

        let plan = destroy_plan(&refreshed);
        if plan.is_empty() {
            println!("{}", "No resources to destroy.".green());
            return Ok(());
        }

        println!("{}", "Destroy Plan:".red().bold());
        println!();
        for effect in plan.effects() {
            println!("  {} {}", "-".red().bold(), effect.resource_id());
        }
        println!();
        println!(
            "Plan: {} to destroy.",
            plan.effects().len().to_string().red()
        );
        println!();

        if !auto_approve
            && !confirm(
                "Do you really want to destroy all resources?",
                "This action cannot be undone. Type 'yes' to confirm.",
            )?
        {
            println!("{}", "Destroy cancelled.".yellow());
            return Ok(());
        }

        println!("{}", "Destroying resources...".red().bold());
        println!();

        let interpreter = Interpreter::new(provider);
        let (success_count, failure_count) =
            execute_plan(&interpreter, &plan, &backend, &mut state_file).await?;
        print_outcome("Destroy", success_count, failure_count);
        Ok(())
    })
    .await
}

async fn run_import(file: &Path, address: &str, identifier: &str) -> Result<(), String> {
    let schemas = schemas();
    let (config, resources) = load_resources(file, &schemas)?;

    let id = ResourceId::parse_address(address)
        .ok_or_else(|| format!("Invalid address '{}': expected <type>.<name>", address))?;
    if !resources.iter().any(|r| r.id == id) {
        return Err(format!("{} is not declared in {}", id, file.display()));
    }

    let provider = provider_for(&config)?;
    let backend = LocalState::beside(file);

    locked(&backend, "import", async {
        let mut state_file = backend.read().map_err(|e| e.to_string())?;
        if let Some(existing) = state_file.find(&id) {
            return Err(format!(
                "{} is already managed as {}",
                id, existing.identifier
            ));
        }

        println!("{}", format!("Importing {}...", id).cyan());
        let state = provider
            .import(&id, identifier)
            .await
            .map_err(|e| e.to_string())?;

        state_file.record(&state);
        state_file.increment_serial();
        backend.write(&state_file).map_err(|e| e.to_string())?;

        println!(
            "{}",
            format!("✓ Imported {} from {}", id, identifier)
                .green()
                .bold()
        );
        Ok(())
    })
    .await
}

async fn run_refresh(file: &Path) -> Result<(), String> {
    let config = ConfigFile::load(file)?;
    let provider = provider_for(&config)?;
    let backend = LocalState::beside(file);

    locked(&backend, "refresh", async {
        let mut state_file = backend.read().map_err(|e| e.to_string())?;
        println!("{}", "Refreshing state...".cyan());

        for state in refresh_states(&provider, &state_file).await? {
            if state.exists {
                println!("  {} {}", "✓".green(), state.id);
            } else {
                println!(
                    "  {} {} no longer exists, removed from state",
                    "-".yellow(),
                    state.id
                );
            }
            state_file.record(&state);
        }

        state_file.increment_serial();
        backend.write(&state_file).map_err(|e| e.to_string())?;

        println!(
            "{}",
            format!(
                "Refresh complete! {} resources in state.",
                state_file.resources.len()
            )
            .green()
            .bold()
        );
        Ok(())
    })
    .await
}

fn run_schema(resource_type: Option<&str>) -> Result<(), String> {
    let schemas = schemas();

    let mut selected: Vec<&ResourceSchema> = match resource_type {
        Some(name) => vec![
            schemas
                .get(name)
                .ok_or_else(|| format!("Unknown resource type: {}", name))?,
        ],
        None => schemas.values().collect(),
    };
    selected.sort_by(|a, b| a.resource_type.cmp(&b.resource_type));

    for (i, schema) in selected.into_iter().enumerate() {
        if i > 0 {
            println!();
        }
        print_schema(schema);
    }
    Ok(())
}

fn run_parse_id(resource_type: &str, identifier: &str) -> Result<(), String> {
    let segments = parse_identifier(resource_type, identifier).map_err(|e| e.to_string())?;

    println!("{}", format!("✓ Valid {} ID", resource_type).green().bold());
    for (name, value) in segments {
        println!("  {} = {}", name.bold(), value);
    }
    Ok(())
}

// =============================================================================
// Output
// =============================================================================

fn format_effect(effect: &Effect) -> String {
    match effect {
        Effect::Create(r) => format!("Create {}", r.id),
        Effect::Update { id, .. } => format!("Update {}", id),
        Effect::Replace { id, .. } => format!("Replace {}", id),
        Effect::Delete { id, .. } => format!("Delete {}", id),
    }
}

fn print_plan(plan: &Plan, schemas: &HashMap<String, ResourceSchema>) {
    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        let schema = schemas.get(&effect.resource_id().resource_type);
        match effect {
            Effect::Create(resource) => {
                println!("  {} {}", "+".green().bold(), resource.id);
                let mut keys: Vec<&String> = resource.attributes.keys().collect();
                keys.sort();
                for key in keys {
                    println!(
                        "      {} = {}",
                        key,
                        display_value(schema, key, &resource.attributes[key])
                    );
                }
            }
            Effect::Update {
                id,
                from,
                to,
                changed_attributes,
            } => {
                println!("  {} {}", "~".yellow().bold(), id);
                for key in changed_attributes {
                    print_change(schema, key, from.attributes.get(key), &to.attributes[key]);
                }
            }
            Effect::Replace {
                id,
                from,
                to,
                changed_attributes,
            } => {
                println!("  {} {}", "-/+".magenta().bold(), id);
                for key in changed_attributes {
                    print_change(schema, key, from.attributes.get(key), &to.attributes[key]);
                }
            }
            Effect::Delete { id, identifier } => {
                println!("  {} {}", "-".red().bold(), id);
                println!("      {}", identifier.dimmed());
            }
        }
    }

    println!();
    println!("{}", plan.summary().to_string().bold());
}

fn is_sensitive(schema: Option<&ResourceSchema>, key: &str) -> bool {
    schema
        .and_then(|s| s.attributes.get(key))
        .is_some_and(|a| a.sensitive)
}

fn display_value(schema: Option<&ResourceSchema>, key: &str, value: &Value) -> String {
    if is_sensitive(schema, key) {
        "(sensitive)".to_string()
    } else {
        value.to_string()
    }
}

fn print_change(schema: Option<&ResourceSchema>, key: &str, from: Option<&Value>, to: &Value) {
    let forces_new = schema
        .and_then(|s| s.attributes.get(key))
        .is_some_and(|a| a.force_new);
    let note = if forces_new {
        format!(" {}", "(forces replacement)".red())
    } else {
        String::new()
    };

    if let (Some(Value::String(old)), Value::String(new)) = (from, to)
        && !is_sensitive(schema, key)
        && (old.contains('\n') || new.contains('\n'))
    {
        println!("      {}:{}", key, note);
        print_text_diff(old, new);
        return;
    }

    let old = from
        .map(|v| display_value(schema, key, v))
        .unwrap_or_else(|| "(none)".to_string());
    println!(
        "      {} = {} => {}{}",
        key,
        old.red(),
        display_value(schema, key, to).green(),
        note
    );
}

fn print_text_diff(old: &str, new: &str) {
    let diff = TextDiff::from_lines(old, new);
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-".red(),
            ChangeTag::Insert => "+".green(),
            ChangeTag::Equal => " ".normal(),
        };
        print!("        {}{}", sign, change);
        if change.missing_newline() {
            println!();
        }
    }
}

fn print_schema(schema: &ResourceSchema) {
    println!("{}", schema.resource_type.cyan().bold());
    if let Some(description) = &schema.description {
        println!("  {}", description);
    }

    for name in schema.attribute_names() {
        let attr = &schema.attributes[name];
        let mut flags = Vec::new();
        if attr.required {
            flags.push("required");
        } else if attr.is_read_only() {
            flags.push("read-only");
        } else {
            flags.push("optional");
            if attr.computed {
                flags.push("computed");
            }
        }
        if attr.force_new {
            flags.push("forces new");
        }
        if attr.sensitive {
            flags.push("sensitive");
        }

        println!("  {}: {} ({})", name.bold(), attr.attr_type, flags.join(", "));
        if let Some(default) = &attr.default {
            println!("      default {}", default);
        }
        if let Some(description) = &attr.description {
            println!("      {}", description.dimmed());
        }
    }

    let t = &schema.timeouts;
    println!(
        "  timeouts: create {}m, read {}m, update {}m, delete {}m",
        t.create.as_secs() / 60,
        t.read.as_secs() / 60,
        t.update.as_secs() / 60,
        t.delete.as_secs() / 60
    );
}
