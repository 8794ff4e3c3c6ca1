use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use issuetree::config::{locate_state_dir, Workspace};
use issuetree::reorganize::{Disassociation, DropPayload, DropReport};
use issuetree::structure::StructureState;
use issuetree::types::{StructureNode, ViewKind, ViewNodeId};
use issuetree::views::{DisplayItem, RecentGrouping, RecentSort};
use issuetree::watch::{run_event_loop, DocumentWatcher};
use issuetree::Engine;
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Environment variable holding the log filter
const LOG_ENV: &str = "ITREE_LOG";

#[derive(Parser)]
#[command(name = "itree", about = "issuetree - a curated tree of markdown issues", version)]
struct Cli {
    /// Path to the .issuetree directory (supports ISSUETREE_DIR env var)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Output JSON format
    #[arg(long, global = true)]
    json: bool,

    /// More log output (-v info, -vv debug); ITREE_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileSource {
    Isolated,
    Recent,
    External,
}

impl std::str::FromStr for FileSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isolated" => Ok(FileSource::Isolated),
            "recent" => Ok(FileSource::Recent),
            "external" => Ok(FileSource::External),
            _ => Err(anyhow::anyhow!(
                "Invalid source: '{}'. Valid values are: isolated, recent, external",
                s
            )),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize issuetree in a directory
    Init {
        /// Directory to initialize (defaults to the current directory)
        path: Option<PathBuf>,
    },

    /// Show the curated tree
    Overview,

    /// Show the focus roots and their subtrees
    Focused,

    /// List documents by recency
    Recent {
        /// Bucket by day, week or month
        #[arg(long)]
        group: Option<RecentGrouping>,

        /// Maximum number of documents (defaults to recent-limit from config)
        #[arg(long)]
        limit: Option<usize>,

        /// Sort by modified or created time
        #[arg(long, default_value = "modified")]
        by: RecentSort,
    },

    /// List documents that are not in the tree
    Untracked,

    /// Show the frontmatter-declared structure of a document
    Structure {
        /// Document path relative to the document root
        doc: String,
    },

    /// Move nodes under another node
    Move {
        /// Node keys or ids to move
        #[arg(required = true)]
        keys: Vec<String>,

        /// Target node key (omit to move to the top level)
        #[arg(long)]
        to: Option<String>,

        /// View the drag starts in
        #[arg(long, default_value = "overview")]
        view: ViewKind,
    },

    /// Add documents to the tree
    Add {
        /// Document paths
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Target node key (omit to add at the top level)
        #[arg(long)]
        to: Option<String>,

        /// Where the files come from
        #[arg(long, default_value = "isolated")]
        source: FileSource,

        /// View the drop happens in
        #[arg(long, default_value = "overview")]
        view: ViewKind,
    },

    /// Expand or collapse a node (flips it by default)
    Toggle {
        key: String,

        #[arg(long, conflicts_with = "collapse")]
        expand: bool,

        #[arg(long)]
        collapse: bool,
    },

    /// Remove a node from the tree (documents are kept)
    Remove {
        key: String,

        /// Also remove a node that has children
        #[arg(long)]
        force: bool,
    },

    /// Manage focus roots
    Focus {
        #[command(subcommand)]
        command: FocusCommands,
    },

    /// Watch documents and print structure updates
    Watch {
        /// Document whose structure to follow
        #[arg(long)]
        active: Option<String>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum FocusCommands {
    /// Pin a node as a focus root
    Add { key: String },
    /// Unpin a focus root
    Remove { key: String },
    /// Move a focus root to the top
    Promote { key: String },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { path } => {
            let dir = match path {
                Some(path) => path,
                None => env::current_dir()?,
            };
            let workspace = Workspace::init(&dir)?;
            if !cli.json {
                println!("Initialized issuetree in {}", workspace.state_dir().display());
            }
            Ok(())
        }

        Commands::Overview => {
            let mut engine = open_engine(&cli.dir)?;
            let items = engine.overview_items();
            print_items(&items, cli.json)
        }

        Commands::Focused => {
            let mut engine = open_engine(&cli.dir)?;
            let items = engine.focused_items();
            print_items(&items, cli.json)
        }

        Commands::Recent { group, limit, by } => {
            let mut engine = open_engine(&cli.dir)?;
            require_root(&engine)?;
            match group {
                Some(grouping) => {
                    let groups = engine.recent_groups(grouping, by, limit);
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&groups)?);
                    } else {
                        for group in groups {
                            println!("{}", group.label);
                            for entry in group.entries {
                                let title = engine.title(&entry.file_path);
                                println!("  {} ({})", title, entry.file_path);
                            }
                        }
                    }
                }
                None => {
                    let entries = engine.recent(by, limit);
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    } else {
                        for entry in entries {
                            let title = engine.title(&entry.file_path);
                            println!(
                                "{}  {} ({})",
                                entry.modified.format("%Y-%m-%d %H:%M"),
                                title,
                                entry.file_path
                            );
                        }
                    }
                }
            }
            Ok(())
        }

        Commands::Untracked => {
            let mut engine = open_engine(&cli.dir)?;
            require_root(&engine)?;
            let files = engine.untracked();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else {
                for file in files {
                    let title = engine.title(&file);
                    println!("{} ({})", title, file);
                }
            }
            Ok(())
        }

        Commands::Structure { doc } => {
            let mut engine = open_engine(&cli.dir)?;
            let state = engine.activate(&doc);
            print_structure(state, cli.json);
            Ok(())
        }

        Commands::Move { keys, to, view } => {
            let mut engine = open_engine(&cli.dir)?;
            let target = to.as_deref().map(ViewNodeId::parse_key);
            let dragged: Vec<ViewNodeId> = keys.iter().map(|k| ViewNodeId::parse_key(k)).collect();
            let report = match view {
                ViewKind::Focused => engine.handle_drop(
                    view,
                    target.as_ref(),
                    &DropPayload::Focused(dragged),
                )?,
                _ => engine.move_nodes(&dragged, target.as_ref())?,
            };
            print_report(&report, cli.json)
        }

        Commands::Add {
            files,
            to,
            source,
            view,
        } => {
            let mut engine = open_engine(&cli.dir)?;
            let target = to.as_deref().map(ViewNodeId::parse_key);
            let payload = match source {
                FileSource::Isolated => DropPayload::Isolated(files),
                FileSource::Recent => DropPayload::Recent(files),
                FileSource::External => DropPayload::External(files),
            };
            let report = engine.handle_drop(view, target.as_ref(), &payload)?;
            print_report(&report, cli.json)
        }

        Commands::Toggle {
            key,
            expand,
            collapse,
        } => {
            let mut engine = open_engine(&cli.dir)?;
            let value = match (expand, collapse) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let changed = engine.toggle_expanded(&ViewNodeId::parse_key(&key), value)?;
            if !cli.json {
                println!("{}", if changed { "Updated" } else { "Unchanged" });
            }
            Ok(())
        }

        Commands::Remove { key, force } => {
            let mut engine = open_engine(&cli.dir)?;
            let outcome = engine.disassociate(&ViewNodeId::parse_key(&key), force)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                return Ok(());
            }
            match outcome {
                Disassociation::Removed { removed } => {
                    println!("Removed {} node(s) from the tree", removed)
                }
                Disassociation::NeedsConfirmation { descendants } => {
                    anyhow::bail!(
                        "{} has {} descendant(s); pass --force to remove the whole subtree",
                        key,
                        descendants
                    )
                }
            }
            Ok(())
        }

        Commands::Focus { command } => {
            let mut engine = open_engine(&cli.dir)?;
            let (changed, verb) = match command {
                FocusCommands::Add { key } => {
                    (engine.add_focus(&ViewNodeId::parse_key(&key))?, "Pinned")
                }
                FocusCommands::Remove { key } => {
                    (engine.remove_focus(&ViewNodeId::parse_key(&key))?, "Unpinned")
                }
                FocusCommands::Promote { key } => {
                    (engine.promote_focus(&ViewNodeId::parse_key(&key))?, "Promoted")
                }
            };
            if !cli.json {
                println!("{}", if changed { verb } else { "Unchanged" });
            }
            Ok(())
        }

        Commands::Watch { active } => {
            let mut engine = open_engine(&cli.dir)?;
            let root = require_root(&engine)?.to_path_buf();
            let json = cli.json;

            engine
                .structure_mut()
                .subscribe(move |state| print_structure(state, json));
            engine.subscribe(|request| tracing::info!(?request, "refresh requested"));
            if let Some(doc) = active {
                engine.activate(&doc);
            }

            let (_watcher, mut events) = DocumentWatcher::start(&root)?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .enable_io()
                .build()
                .context("Failed to start event loop")?;
            runtime.block_on(run_event_loop(&mut engine, &mut events, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            }));
            Ok(())
        }

        Commands::Version => {
            let commit = built_info::GIT_COMMIT_HASH_SHORT.unwrap_or("unknown");
            println!(
                "itree version {} ({}) built {}",
                built_info::PKG_VERSION,
                commit,
                env!("BUILD_DATE")
            );
            Ok(())
        }
    }
}

fn open_engine(dir: &Option<PathBuf>) -> Result<Engine> {
    let state_dir = locate_state_dir(dir.as_deref())?;
    let workspace = Workspace::open(state_dir).context("Failed to open workspace")?;
    Ok(Engine::open(&workspace))
}

fn require_root(engine: &Engine) -> Result<&Path> {
    engine.document_root().ok_or_else(|| {
        anyhow::anyhow!("No document root configured. Set document-root in .issuetree/config.yaml.")
    })
}

fn print_items(items: &[DisplayItem], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
        return Ok(());
    }
    for item in items {
        let marker = match (item.has_children, item.expanded) {
            (false, _) => ' ',
            (true, true) => '-',
            (true, false) => '+',
        };
        let indent = "  ".repeat(item.depth);
        match &item.description {
            Some(description) => println!(
                "{}{} {}  [{}]  ({})",
                indent, marker, item.title, item.key, description
            ),
            None => println!("{}{} {}  [{}]", indent, marker, item.title, item.key),
        }
    }
    Ok(())
}

fn print_report(report: &DropReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for id in &report.moved {
        println!("Moved {}", id);
    }
    for created in &report.created {
        println!("Added {} as {}", created.file_path, created.id);
    }
    for rejected in &report.rejected {
        println!("Skipped {}: {}", rejected.item, rejected.reason);
    }
    Ok(())
}

fn print_structure(state: &StructureState, json: bool) {
    match state {
        StructureState::Unconfigured => println!("No document root configured"),
        StructureState::Placeholder(hint) => println!("{}", hint),
        StructureState::Tree(tree) if json => match serde_json::to_string_pretty(tree) {
            Ok(text) => println!("{}", text),
            Err(e) => tracing::warn!(error = %e, "failed to serialize structure"),
        },
        StructureState::Tree(tree) => print_structure_node(tree, 0),
    }
}

fn print_structure_node(node: &StructureNode, depth: usize) {
    let indent = "  ".repeat(depth);
    match &node.error_message {
        Some(message) if node.has_error => {
            println!("{}! {} ({}): {}", indent, node.title, node.file_path, message)
        }
        _ => println!("{}{} ({})", indent, node.title, node.file_path),
    }
    for child in &node.children {
        print_structure_node(child, depth + 1);
    }
}
