//! TRAM CLI
//!
//! Thin command-line wrappers over the core engine operations. Exit codes:
//! 0 success, 1 invalid input, 2 internal error, 3 resource unavailable.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use directories::ProjectDirs;
use tram_core::{
    Config, Engine, ForgetTarget, ListFilter, LocalEmbedder, ProfileScope, RecallOptions,
    SortKey, StoreInput, StoreOutcome, Tier, TuneRequest, RequestContext,
};

/// TRAM - tiered associative memory for AI agents
#[derive(Parser)]
#[command(name = "tram")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local memory engine: store, recall, and tune tiered memories")]
struct Cli {
    /// Database file path (defaults to the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file path (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a new memory
    Store {
        /// Memory text
        text: String,
        /// Explicit tier (HOT, WARM, COLD, ARCHIVE)
        #[arg(long)]
        tier: Option<String>,
        /// Memory type (procedural, factual, project, episodic)
        #[arg(long, default_value = "factual")]
        memory_type: String,
        /// Importance in [0, 1]
        #[arg(long, default_value = "0.5")]
        importance: f64,
        /// Pin against decay
        #[arg(long)]
        pinned: bool,
        /// Free-form category
        #[arg(long)]
        category: Option<String>,
        /// Provenance
        #[arg(long)]
        source: Option<String>,
        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// Rank memories against a query
    Recall {
        query: String,
        #[arg(long, default_value = "5")]
        limit: usize,
        /// Restrict to one tier
        #[arg(long)]
        tier: Option<String>,
        /// Include ARCHIVE memories
        #[arg(long)]
        include_archive: bool,
        /// Include forgotten memories
        #[arg(long)]
        include_forgotten: bool,
        #[arg(long)]
        json: bool,
    },

    /// Lexical full-text search only
    Search {
        query: String,
        #[arg(long, default_value = "10")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },

    /// List memories
    List {
        #[arg(long)]
        tier: Option<String>,
        /// Only forgotten memories
        #[arg(long)]
        forgotten: bool,
        /// Only pinned memories
        #[arg(long)]
        pinned: bool,
        /// Sort key: created, accessed, use-count, importance
        #[arg(long, default_value = "created")]
        sort: String,
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },

    /// Show engine statistics
    Stats {
        /// Include tier percentages and feedback metrics
        #[arg(long)]
        metrics: bool,
        #[arg(long)]
        json: bool,
    },

    /// Forget a memory by id or best query match
    Forget {
        /// Memory id or search query
        target: String,
        /// Hard-delete the row instead of hiding it
        #[arg(long)]
        hard: bool,
    },

    /// Restore a forgotten memory
    Restore { id: String },

    /// Pin a memory (COLD/ARCHIVE pins promote to WARM)
    Pin { id: String },

    /// Unpin a memory
    Unpin { id: String },

    /// Show the scoring breakdown for a memory
    Explain {
        id: String,
        /// Score against this query
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Manage the active-task context note
    Context {
        #[command(subcommand)]
        command: ContextCommands,
    },

    /// Select retrieval/decay/promotion profiles
    Tune {
        #[arg(long)]
        retrieval: Option<String>,
        #[arg(long)]
        decay: Option<String>,
        #[arg(long)]
        promotion: Option<String>,
        /// Scope: session, agent, global
        #[arg(long, default_value = "session")]
        scope: String,
        /// Agent id for agent scope
        #[arg(long)]
        agent: Option<String>,
        /// Persist the selection
        #[arg(long)]
        persist: bool,
    },

    /// Decay engine operations
    Decay {
        #[command(subcommand)]
        command: DecayCommands,
    },

    /// Rebuild the lexical index, optionally ingesting memory files first
    Index {
        /// Ingest .md/.txt files from this directory through the store path
        #[arg(long)]
        from_dir: Option<PathBuf>,
    },

    /// Apply pending schema migrations
    Migrate,

    /// Lock a tuning parameter against auto-adjustment
    Lock {
        /// Parameter name (importanceThreshold)
        parameter: String,
        /// Lock duration in hours
        #[arg(long, default_value = "168")]
        hours: i64,
    },

    /// Release a tuning parameter lock
    Unlock { parameter: String },
}

#[derive(Subcommand)]
enum ContextCommands {
    /// Set the active context
    Set {
        text: String,
        /// Time to live in hours
        #[arg(long, default_value = "4")]
        ttl_hours: u64,
    },
    /// Clear the active context
    Clear,
}

#[derive(Subcommand)]
enum DecayCommands {
    /// Run one decay pass now
    Run,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(e.exit_code());
    }
}

fn load_config(cli: &Cli) -> tram_core::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => {
            let default_path = ProjectDirs::from("com", "tram", "tram")
                .map(|dirs| dirs.config_dir().join("config.toml"));
            match default_path {
                Some(path) if path.exists() => Config::load(&path)?,
                _ => Config::default(),
            }
        }
    };
    if cli.db.is_some() {
        config.db_path = cli.db.clone();
    }
    Ok(config)
}

fn open_engine(cli: &Cli) -> tram_core::Result<Engine> {
    let config = load_config(cli)?;
    Engine::new(config, Arc::new(LocalEmbedder::new()))
}

fn run(cli: Cli) -> tram_core::Result<()> {
    match &cli.command {
        Commands::Store {
            text,
            tier,
            memory_type,
            importance,
            pinned,
            category,
            source,
            json,
        } => {
            let engine = open_engine(&cli)?;
            let input = StoreInput {
                tier: tier.as_deref().map(Tier::parse_name).transpose()?,
                memory_type: tram_core::MemoryType::parse_name(memory_type)?,
                importance: *importance,
                pinned: *pinned,
                category: category.clone(),
                source: source.clone(),
                ..StoreInput::new(text.clone())
            };
            let outcome = engine.store_memory(input)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&outcome).expect("serializable"));
            } else {
                match &outcome {
                    StoreOutcome::Created { id, tier, memory_type } => {
                        println!(
                            "{} {id} ({tier}, {memory_type})",
                            "stored".green().bold()
                        );
                    }
                    StoreOutcome::Existing { id, similarity } => {
                        println!(
                            "{} {id} (similarity {similarity:.2})",
                            "duplicate of".yellow().bold()
                        );
                    }
                }
            }
            Ok(())
        }

        Commands::Recall {
            query,
            limit,
            tier,
            include_archive,
            include_forgotten,
            json,
        } => {
            let engine = open_engine(&cli)?;
            let options = RecallOptions {
                limit: *limit,
                tier: tier.as_deref().map(Tier::parse_name).transpose()?,
                include_archive: *include_archive,
                include_forgotten: *include_forgotten,
            };
            let results = engine.recall(query, &options)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&results).expect("serializable"));
            } else if results.is_empty() {
                println!("{}", "no memories matched".dimmed());
            } else {
                for memory in &results {
                    let flags = format!(
                        "{}{}",
                        if memory.pinned { " [pinned]" } else { "" },
                        if memory.forgotten { " [forgotten]" } else { "" },
                    );
                    println!(
                        "{:.3} {} {}{} {}",
                        memory.score,
                        memory.tier.as_str().cyan(),
                        memory.id.dimmed(),
                        flags.yellow(),
                        memory.text,
                    );
                }
            }
            Ok(())
        }

        Commands::Search { query, limit, json } => {
            let engine = open_engine(&cli)?;
            let hits = engine.store().search_lexical(query, *limit)?;
            if *json {
                let rows: Vec<serde_json::Value> = hits
                    .iter()
                    .map(|h| {
                        serde_json::json!({ "id": h.id, "score": h.score, "text": h.text })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows).expect("serializable"));
            } else {
                for hit in &hits {
                    println!("{:.3} {} {}", hit.score, hit.id.dimmed(), hit.text);
                }
            }
            Ok(())
        }

        Commands::List {
            tier,
            forgotten,
            pinned,
            sort,
            limit,
            json,
        } => {
            let engine = open_engine(&cli)?;
            let filter = ListFilter {
                tier: tier.as_deref().map(Tier::parse_name).transpose()?,
                pinned: (*pinned).then_some(true),
                forgotten: (*forgotten).then_some(true),
                sort: SortKey::parse_name(sort)?,
                limit: Some(*limit),
            };
            let memories = engine.list(&filter)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&memories).expect("serializable"));
            } else if memories.is_empty() {
                println!("{}", "no memories".dimmed());
            } else {
                for memory in &memories {
                    println!(
                        "{} {} {} uses:{} {}",
                        memory.tier.as_str().cyan(),
                        memory.id.dimmed(),
                        memory.created_at.format("%Y-%m-%d"),
                        memory.use_count,
                        memory.text,
                    );
                }
            }
            Ok(())
        }

        Commands::Stats { metrics, json } => {
            let engine = open_engine(&cli)?;
            let stats = engine.stats()?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&stats).expect("serializable"));
                return Ok(());
            }

            println!("{}", "=== TRAM Memory Statistics ===".cyan().bold());
            println!("{}: {}", "Total".white().bold(), stats.total_memories);
            println!(
                "{}: HOT {} | WARM {} | COLD {} | ARCHIVE {}",
                "Tiers".white().bold(),
                stats.tier_counts.hot,
                stats.tier_counts.warm,
                stats.tier_counts.cold,
                stats.tier_counts.archive,
            );
            println!("{}: {}", "Pinned".white().bold(), stats.pinned);
            println!("{}: {}", "Forgotten".white().bold(), stats.forgotten);
            println!(
                "{}: {:.2}",
                "Importance threshold".white().bold(),
                stats.importance_threshold
            );
            if let Some(last) = stats.last_decay_run {
                println!(
                    "{}: {}",
                    "Last decay run".white().bold(),
                    last.format("%Y-%m-%d %H:%M:%S")
                );
            }

            if *metrics {
                println!();
                println!("{}", "=== Metrics ===".yellow().bold());
                let total = stats.tier_counts.total().max(1);
                for (label, count) in [
                    ("HOT", stats.tier_counts.hot),
                    ("WARM", stats.tier_counts.warm),
                    ("COLD", stats.tier_counts.cold),
                    ("ARCHIVE", stats.tier_counts.archive),
                ] {
                    println!("{label:>8}: {:5.1}%", count as f64 * 100.0 / total as f64);
                }
                println!("{}: {}", "Vectors".white().bold(), stats.vectors);
                println!("{}: {}", "Feedback rows".white().bold(), stats.feedback_rows);
            }
            Ok(())
        }

        Commands::Forget { target, hard } => {
            let engine = open_engine(&cli)?;
            let target = if looks_like_id(target) {
                ForgetTarget::Id(target.clone())
            } else {
                ForgetTarget::Query(target.clone())
            };
            let id = engine.forget(target, *hard)?;
            let verb = if *hard { "deleted" } else { "forgot" };
            println!("{} {id}", verb.green().bold());
            Ok(())
        }

        Commands::Restore { id } => {
            let engine = open_engine(&cli)?;
            engine.restore(id)?;
            println!("{} {id}", "restored".green().bold());
            Ok(())
        }

        Commands::Pin { id } => {
            let engine = open_engine(&cli)?;
            let memory = engine.pin(id)?;
            println!("{} {id} ({})", "pinned".green().bold(), memory.tier);
            Ok(())
        }

        Commands::Unpin { id } => {
            let engine = open_engine(&cli)?;
            engine.unpin(id)?;
            println!("{} {id}", "unpinned".green().bold());
            Ok(())
        }

        Commands::Explain { id, query, json } => {
            let engine = open_engine(&cli)?;
            let explanation = engine.explain(id, query.as_deref())?;
            if *json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&explanation).expect("serializable")
                );
                return Ok(());
            }
            let b = &explanation.breakdown;
            println!("{}: {}", "Memory".white().bold(), explanation.memory_id);
            println!("{}: {}", "Text".white().bold(), explanation.text);
            println!("{}: {:.3}", "Score".white().bold(), b.score);
            println!(
                "  similarity {:.3} | recency {:.3} | frequency {:.3}",
                b.similarity_component, b.recency_component, b.frequency_component
            );
            println!(
                "  age {:.1}d, half-life {:.0}d, tier {}",
                b.age_days, b.half_life_days, b.tier
            );
            let eligibility = if b.eligible {
                "eligible for injection".green()
            } else {
                "not eligible for injection".red()
            };
            println!("{}: {eligibility}", "Status".white().bold());
            Ok(())
        }

        Commands::Context { command } => {
            let engine = open_engine(&cli)?;
            match command {
                ContextCommands::Set { text, ttl_hours } => {
                    engine.set_context(text, *ttl_hours)?;
                    println!("{} (ttl {ttl_hours}h)", "context set".green().bold());
                }
                ContextCommands::Clear => {
                    let cleared = engine.clear_context()?;
                    if cleared {
                        println!("{}", "context cleared".green().bold());
                    } else {
                        println!("{}", "no active context".dimmed());
                    }
                }
            }
            Ok(())
        }

        Commands::Tune {
            retrieval,
            decay,
            promotion,
            scope,
            agent,
            persist,
        } => {
            let engine = open_engine(&cli)?;
            let scope = match scope.as_str() {
                "session" => ProfileScope::Session,
                "agent" => ProfileScope::Agent,
                "global" => ProfileScope::Global,
                other => {
                    return Err(tram_core::Error::InvalidInput(format!(
                        "unknown scope: {other:?}"
                    )))
                }
            };
            let ctx = RequestContext {
                agent_id: agent.clone(),
                ..Default::default()
            };
            let applied = engine.tune(
                &TuneRequest {
                    retrieval: retrieval.clone(),
                    decay: decay.clone(),
                    promotion: promotion.clone(),
                    scope,
                    persist: *persist,
                },
                &ctx,
            )?;
            for profile in applied {
                println!(
                    "{} {} profile {} at {} scope",
                    "applied".green().bold(),
                    profile.kind.as_str(),
                    profile.name.cyan(),
                    profile.scope.as_str(),
                );
            }
            Ok(())
        }

        Commands::Decay { command } => {
            let engine = open_engine(&cli)?;
            match command {
                DecayCommands::Run => {
                    let outcome = engine.decay_engine().run(Utc::now())?;
                    println!(
                        "{}: examined {}, demoted {}",
                        "decay complete".green().bold(),
                        outcome.examined,
                        outcome.demoted,
                    );
                }
            }
            Ok(())
        }

        Commands::Index { from_dir } => {
            let engine = open_engine(&cli)?;
            if let Some(dir) = from_dir {
                let ingested = ingest_dir(&engine, dir)?;
                println!("{} {ingested} file(s)", "ingested".green().bold());
            }
            let indexed = engine.rebuild_lexical_index()?;
            println!("{}: {indexed} memories indexed", "index rebuilt".green().bold());
            Ok(())
        }

        Commands::Migrate => {
            let engine = open_engine(&cli)?;
            let applied = engine.store().migrate()?;
            if applied == 0 {
                println!("{}", "schema up to date".dimmed());
            } else {
                println!("{} {applied} migration(s)", "applied".green().bold());
            }
            Ok(())
        }

        Commands::Lock { parameter, hours } => {
            let engine = open_engine(&cli)?;
            let until = Utc::now() + Duration::hours(*hours);
            engine.tuning_engine().lock(parameter, until)?;
            println!(
                "{} {parameter} until {}",
                "locked".green().bold(),
                until.format("%Y-%m-%d %H:%M:%S"),
            );
            Ok(())
        }

        Commands::Unlock { parameter } => {
            let engine = open_engine(&cli)?;
            engine.tuning_engine().unlock(parameter, Utc::now())?;
            println!("{} {parameter}", "unlocked".green().bold());
            Ok(())
        }
    }
}

/// Heuristic: UUID-shaped arguments are ids, anything else is a query
fn looks_like_id(target: &str) -> bool {
    target.len() == 36
        && target
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '-')
        && target.chars().filter(|&c| c == '-').count() == 4
}

/// Ingest .md/.txt files under `dir` through the normal store path
fn ingest_dir(engine: &Engine, dir: &PathBuf) -> tram_core::Result<usize> {
    let mut ingested = 0;
    let mut stack = vec![dir.clone()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let is_memory_file = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("md") | Some("txt")
            );
            if !is_memory_file {
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                continue;
            }
            let input = StoreInput {
                memory_type: tram_core::MemoryType::Project,
                source: Some(path.display().to_string()),
                ..StoreInput::new(text)
            };
            match engine.store_memory(input) {
                Ok(StoreOutcome::Created { .. }) => ingested += 1,
                Ok(StoreOutcome::Existing { .. }) => {
                    tracing::debug!("{} already stored, skipping", path.display());
                }
                Err(e) => tracing::warn!("failed to ingest {}: {e}", path.display()),
            }
        }
    }
    Ok(ingested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_id() {
        assert!(looks_like_id("4f9c2d1e-8a3b-4c5d-9e6f-1a2b3c4d5e6f"));
        assert!(!looks_like_id("staging database"));
        assert!(!looks_like_id("4f9c2d1e"));
    }
}
