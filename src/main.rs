//! wfkit - packet-filtering engine client
//!
//! Command-line front end for inspecting and changing the objects held by a
//! packet-filtering engine: layers, providers, sublayers and rules.
//!
//! Every invocation opens one session, begins a transaction (read-only for
//! listing commands), runs the command and commits. Any failure aborts the
//! transaction, so a command either applies completely or not at all.
//!
//! The engine here is the in-process [`MemoryEngine`]; its persistent objects
//! are loaded from and saved to a checksummed state file between runs.
//!
//! # Usage
//!
//! ```bash
//! wfkit layers                                   # List filtering layers
//! wfkit add-provider "Example Corp"              # Register a provider
//! wfkit add-rule "Block telnet" --action block --remote-port 23
//! wfkit add-rule "Ephemeral" --action permit --remote-ports 49152-65535
//! wfkit rules --sorted                           # Rules in arbitration order
//! wfkit rules --json                             # Machine-readable output
//! wfkit --dynamic add-rule "Temp" --action permit  # Removed when the run ends
//! wfkit config --transaction-timeout 60          # Change a saved setting
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use ipnetwork::IpNetwork;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use wfkit::audit::{AuditEvent, AuditLog, EventType};
use wfkit::config::{CliConfig, ConfigUpdate};
use wfkit::core::error::{Error, Result};
use wfkit::core::layers::{
    FIELD_IP_REMOTE_ADDRESS, FIELD_IP_REMOTE_PORT, LAYER_ALE_AUTH_CONNECT_V4,
    LAYER_ALE_AUTH_CONNECT_V6, LAYER_ALE_AUTH_RECV_ACCEPT_V4, LAYER_ALE_AUTH_RECV_ACCEPT_V6,
    LAYER_STREAM_V4_DISCARD, field_name,
};
use wfkit::core::memory::MemoryEngine;
use wfkit::core::session::Session;
use wfkit::core::state;
use wfkit::core::types::{
    Action, FilterEnumFlags, FilterEnumType, LayerId, Match, MatchType, MatchValue, Provider,
    ProviderId, Rule, RuleId, Sublayer, SublayerId, TransactionFlags,
};
use wfkit::{config, utils, validators};

#[derive(Parser)]
#[command(name = "wfkit")]
#[command(about = "Sessions, transactions and rule enumeration for a packet-filtering engine", long_about = None)]
struct Cli {
    /// Engine state file (default: platform state directory)
    #[arg(long, global = true, value_name = "PATH")]
    state: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    /// Use a dynamic session; everything it adds is removed when it closes
    #[arg(long, global = true)]
    dynamic: bool,
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List filtering layers and their condition fields
    Layers,
    /// List providers
    Providers,
    /// Register a provider
    AddProvider {
        #[arg(value_parser = validators::validate_display_name)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Provider key (default: generated)
        #[arg(long, value_parser = parse_id::<ProviderId>)]
        id: Option<ProviderId>,
    },
    /// Delete a provider
    DeleteProvider {
        #[arg(value_parser = parse_id::<ProviderId>)]
        id: ProviderId,
    },
    /// List sublayers
    Sublayers {
        /// Only sublayers owned by this provider
        #[arg(long, value_parser = parse_id::<ProviderId>)]
        provider: Option<ProviderId>,
    },
    /// Add a sublayer
    AddSublayer {
        #[arg(value_parser = validators::validate_display_name)]
        name: String,
        #[arg(long, default_value_t = 0)]
        weight: u16,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, value_parser = parse_id::<ProviderId>)]
        provider: Option<ProviderId>,
        /// Sublayer key (default: generated)
        #[arg(long, value_parser = parse_id::<SublayerId>)]
        id: Option<SublayerId>,
    },
    /// Delete a sublayer
    DeleteSublayer {
        #[arg(value_parser = parse_id::<SublayerId>)]
        id: SublayerId,
    },
    /// List rules
    Rules {
        /// Layer alias (connect-v4, connect-v6, recv-accept-v4, recv-accept-v6, stream-v4-discard) or key
        #[arg(long, value_parser = parse_layer)]
        layer: Option<LayerId>,
        #[arg(long, value_parser = parse_id::<ProviderId>)]
        provider: Option<ProviderId>,
        /// Order by sublayer weight, then rule weight, highest first
        #[arg(long)]
        sorted: bool,
        /// Only the highest-weight terminating rule per layer and sublayer
        #[arg(long)]
        best_match: bool,
    },
    /// Add a rule
    AddRule {
        #[arg(value_parser = validators::validate_display_name)]
        name: String,
        /// block, permit, callout_terminating, callout_inspection or callout_unknown
        #[arg(long, default_value = "block")]
        action: Action,
        #[arg(long, default_value = "connect-v4", value_parser = parse_layer)]
        layer: LayerId,
        #[arg(long, default_value_t = 0)]
        weight: u64,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, value_parser = parse_port)]
        remote_port: Option<u16>,
        /// Remote port range, START-END
        #[arg(long, value_parser = validators::parse_port_range, conflicts_with = "remote_port")]
        remote_ports: Option<(u16, u16)>,
        /// Remote address or CIDR network
        #[arg(long, value_parser = validators::validate_cidr)]
        remote: Option<IpNetwork>,
        #[arg(long, value_parser = parse_id::<SublayerId>)]
        sublayer: Option<SublayerId>,
        #[arg(long, value_parser = parse_id::<ProviderId>)]
        provider: Option<ProviderId>,
        /// Add the rule disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Delete a rule
    DeleteRule {
        #[arg(value_parser = parse_id::<RuleId>)]
        id: RuleId,
    },
    /// Show or change CLI settings (config.json)
    Config(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, value_parser = validators::validate_display_name)]
    session_name: Option<String>,
    #[arg(long)]
    session_description: Option<String>,
    /// Open dynamic sessions by default
    #[arg(long)]
    default_dynamic: Option<bool>,
    /// Seconds to wait for the transaction lock (0 = library default)
    #[arg(long, value_name = "SECS")]
    transaction_timeout: Option<u64>,
    /// Engine state file used when --state is not given
    #[arg(long, value_name = "PATH")]
    state_file: Option<PathBuf>,
}

impl From<ConfigArgs> for ConfigUpdate {
    fn from(args: ConfigArgs) -> Self {
        Self {
            session_name: args.session_name,
            session_description: args.session_description,
            dynamic: args.default_dynamic,
            transaction_start_timeout_secs: args.transaction_timeout,
            state_path: args.state_file,
        }
    }
}

impl Commands {
    fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Commands::Layers
                | Commands::Providers
                | Commands::Sublayers { .. }
                | Commands::Rules { .. }
        )
    }
}

fn parse_id<T: From<uuid::Uuid>>(s: &str) -> std::result::Result<T, String> {
    validators::validate_guid(s).map(T::from)
}

fn parse_layer(s: &str) -> std::result::Result<LayerId, String> {
    match s {
        "connect-v4" => Ok(LAYER_ALE_AUTH_CONNECT_V4),
        "connect-v6" => Ok(LAYER_ALE_AUTH_CONNECT_V6),
        "recv-accept-v4" => Ok(LAYER_ALE_AUTH_RECV_ACCEPT_V4),
        "recv-accept-v6" => Ok(LAYER_ALE_AUTH_RECV_ACCEPT_V6),
        "stream-v4-discard" => Ok(LAYER_STREAM_V4_DISCARD),
        other => parse_id(other),
    }
}

fn parse_port(s: &str) -> std::result::Result<u16, String> {
    let port: u16 = s.parse().map_err(|e| format!("Invalid port '{s}': {e}"))?;
    validators::validate_port(port)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn report(error: &Error) {
    eprintln!("Error: {error}");
    if let Some(code) = error.engine_code() {
        let translation = code.translate();
        eprintln!("{}", translation.user_message);
        for suggestion in &translation.suggestions {
            eprintln!("  - {suggestion}");
        }
        if let Some(url) = &translation.help_url {
            eprintln!("See: {url}");
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = config::load_config();
    let command = match cli.command {
        Commands::Config(args) => return configure(config, args.into(), cli.json),
        command => command,
    };
    let state_path = match cli.state.or_else(|| config.state_path.clone()) {
        Some(path) => path,
        None => {
            if let Err(e) = utils::ensure_dirs() {
                tracing::warn!("failed to create wfkit directories: {e}");
            }
            utils::default_state_path()
                .ok_or_else(|| Error::Internal("no state directory on this platform".to_string()))?
        }
    };

    let engine = Arc::new(MemoryEngine::from_snapshot(state::load(&state_path)?)?);
    let audit = AuditLog::at(state_path.with_file_name("audit.log"));
    let mutation = command.is_mutation();
    let flags = if mutation {
        TransactionFlags::ReadWrite
    } else {
        TransactionFlags::ReadOnly
    };

    let mut session = Session::open(engine.clone(), config.session_options(cli.dynamic, flags))?;
    tracing::debug!(state = %state_path.display(), %flags, "session ready");

    let details = serde_json::json!({ "session": session.name(), "dynamic": session.is_dynamic() });
    match execute(&mut session, command, cli.json, &audit) {
        Ok(()) => {
            let committed = session.commit_transaction();
            if mutation {
                audit.record(&AuditEvent::from_result(
                    EventType::CommitTransaction,
                    details,
                    &committed,
                ));
            }
            committed?;
        }
        Err(e) => {
            let aborted = session.abort_transaction();
            if mutation {
                audit.record(&AuditEvent::from_result(
                    EventType::AbortTransaction,
                    details,
                    &aborted,
                ));
            }
            return Err(e);
        }
    }
    session.close()?;

    if mutation {
        state::save(&state_path, &engine.snapshot())?;
    }
    Ok(())
}

fn configure(mut config: CliConfig, update: ConfigUpdate, json: bool) -> Result<()> {
    if config.apply(update) {
        config::save_config(&config)?;
        tracing::info!("configuration saved");
    }
    if json {
        return print_json(&config);
    }
    if let Some(path) = config::config_path() {
        println!("# {}", path.display());
    }
    println!("session_name         {}", config.session_name);
    println!("session_description  {}", config.session_description);
    println!("dynamic              {}", config.dynamic);
    println!("transaction_timeout  {}s", config.transaction_start_timeout_secs);
    match &config.state_path {
        Some(path) => println!("state_file           {}", path.display()),
        None => println!("state_file           (platform default)"),
    }
    Ok(())
}

fn execute(session: &mut Session, command: Commands, json: bool, audit: &AuditLog) -> Result<()> {
    let persistent = !session.is_dynamic();
    match command {
        Commands::Layers => {
            let layers = session.layers()?;
            if json {
                return print_json(&layers);
            }
            for layer in layers {
                println!("{}  {}", layer.id, layer.name);
                for field in &layer.fields {
                    let name = field_name(field.id).unwrap_or("unknown");
                    println!("    {:<22} {}", name, field.data_type);
                }
            }
        }
        Commands::Providers => {
            let providers = session.providers()?;
            if json {
                return print_json(&providers);
            }
            for provider in providers {
                println!(
                    "{}  {}{}",
                    provider.id,
                    provider.name,
                    if provider.persistent { "" } else { "  (dynamic)" }
                );
            }
        }
        Commands::AddProvider {
            name,
            description,
            id,
        } => {
            let provider = Provider {
                id: id.unwrap_or_else(ProviderId::new_v4),
                name,
                description,
                persistent,
                ..Provider::default()
            };
            let result = session.add_provider(&provider);
            audit.record(&AuditEvent::from_result(
                EventType::AddProvider,
                serde_json::json!({ "id": provider.id, "name": provider.name }),
                &result,
            ));
            result?;
            println!("{}", provider.id);
        }
        Commands::DeleteProvider { id } => {
            let result = session.delete_provider(id);
            audit.record(&AuditEvent::from_result(
                EventType::DeleteProvider,
                serde_json::json!({ "id": id }),
                &result,
            ));
            result?;
        }
        Commands::Sublayers { provider } => {
            let sublayers = session.sublayers(provider)?;
            if json {
                return print_json(&sublayers);
            }
            for sublayer in sublayers {
                println!(
                    "{}  weight={:<5}  {}",
                    sublayer.id, sublayer.weight, sublayer.name
                );
            }
        }
        Commands::AddSublayer {
            name,
            weight,
            description,
            provider,
            id,
        } => {
            let sublayer = Sublayer {
                id: id.unwrap_or_else(SublayerId::new_v4),
                name,
                description,
                persistent,
                provider,
                weight,
                ..Sublayer::default()
            };
            let result = session.add_sublayer(&sublayer);
            audit.record(&AuditEvent::from_result(
                EventType::AddSublayer,
                serde_json::json!({ "id": sublayer.id, "name": sublayer.name, "weight": weight }),
                &result,
            ));
            result?;
            println!("{}", sublayer.id);
        }
        Commands::DeleteSublayer { id } => {
            let result = session.delete_sublayer(id);
            audit.record(&AuditEvent::from_result(
                EventType::DeleteSublayer,
                serde_json::json!({ "id": id }),
                &result,
            ));
            result?;
        }
        Commands::Rules {
            layer,
            provider,
            sorted,
            best_match,
        } => {
            let mut flags = FilterEnumFlags::INCLUDE_DISABLED | FilterEnumFlags::INCLUDE_BOOT_TIME;
            if sorted {
                flags = flags | FilterEnumFlags::SORTED;
            }
            if best_match {
                flags = flags | FilterEnumFlags::BEST_TERMINATING_MATCH;
            }
            let mut enumerator = session
                .enumerate_rules(FilterEnumType::Overlapping, layer.unwrap_or(LayerId::NIL))
                .with_flags(flags);
            if let Some(provider) = provider {
                enumerator = enumerator.with_provider(provider);
            }
            let rules = enumerator.execute()?;
            if json {
                return print_json(&rules);
            }
            for rule in &rules {
                print_rule(rule);
            }
        }
        Commands::AddRule {
            name,
            action,
            layer,
            weight,
            description,
            remote_port,
            remote_ports,
            remote,
            sublayer,
            provider,
            disabled,
        } => {
            let mut conditions = Vec::new();
            if let Some(port) = remote_port {
                if let Some(note) = validators::check_well_known_port(port) {
                    tracing::info!("{note}");
                }
                conditions.push(Match {
                    field: FIELD_IP_REMOTE_PORT,
                    op: MatchType::Equal,
                    value: MatchValue::U16(port),
                });
            }
            if let Some((low, high)) = remote_ports {
                conditions.push(Match {
                    field: FIELD_IP_REMOTE_PORT,
                    op: MatchType::Range,
                    value: MatchValue::range(low, high),
                });
            }
            if let Some(net) = remote {
                if let Some(note) = validators::check_reserved_ip(net) {
                    tracing::info!("{note}");
                }
                conditions.push(Match {
                    field: FIELD_IP_REMOTE_ADDRESS,
                    op: MatchType::Equal,
                    value: MatchValue::Network(net),
                });
            }

            let mut rule = Rule {
                id: RuleId::new_v4(),
                name,
                description,
                layer,
                sublayer: sublayer.unwrap_or(SublayerId::NIL),
                weight,
                conditions,
                action,
                persistent,
                provider,
                disabled,
                ..Rule::default()
            };
            let result = session.add_rule(&mut rule);
            audit.record(&AuditEvent::from_result(
                EventType::AddRule,
                serde_json::json!({
                    "id": rule.id,
                    "name": rule.name,
                    "layer": rule.layer,
                    "action": rule.action,
                    "weight": rule.weight,
                }),
                &result,
            ));
            result?;
            println!("{}", rule.id);
        }
        Commands::DeleteRule { id } => {
            let result = session.delete_rule(id);
            audit.record(&AuditEvent::from_result(
                EventType::DeleteRule,
                serde_json::json!({ "id": id }),
                &result,
            ));
            result?;
        }
        Commands::Config(_) => {
            return Err(Error::Internal("config is handled before a session opens".to_string()));
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_rule(rule: &Rule) {
    let conditions: Vec<String> = rule.conditions.iter().map(ToString::to_string).collect();
    println!(
        "{}  #{:<5} weight={:<8} {:<8} {}{}",
        rule.id,
        rule.kernel_id,
        rule.weight,
        rule.action,
        utils::truncate_string(&rule.name, 40),
        if rule.disabled { "  (disabled)" } else { "" }
    );
    if !conditions.is_empty() {
        println!("    {}", conditions.join(" && "));
    }
}
