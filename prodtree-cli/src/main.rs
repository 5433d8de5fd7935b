use clap::{Parser, Subcommand, ValueEnum};
use prodtree::{DbPath, NodeRecord, Resolution, Tree};
use std::path::PathBuf;
use std::process;

/// prodtree CLI — inspect and edit a production asset tree from the command line
#[derive(Parser)]
#[command(name = "prodtree", version, about)]
struct Cli {
    /// Path to the tree database
    #[arg(long, default_value = "prodtree.db")]
    db: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List project nodes
    Projects,

    /// Show the node(s) a logical path resolves to
    Show {
        /// Logical path, wildcards allowed (e.g. /prj/sq.*/sq.*_0010)
        path: String,
    },

    /// List the children of a logical path
    Ls {
        /// Logical path
        path: String,
    },

    /// Print the logical subtree below a path
    Tree {
        /// Logical path
        path: String,
    },

    /// Create a project bound to named hierarchy and storage configs
    CreateProject {
        /// Project name
        name: String,
        /// Hierarchy config name
        #[arg(long)]
        hierarchy: String,
        /// Storage config name
        #[arg(long)]
        storage: String,
    },

    /// Create a chain of child nodes below a logical path
    Create {
        /// Logical path of the parent (must resolve to one node)
        path: String,
        /// Short names, outermost first
        names: Vec<String>,
    },

    /// Soft-delete a node and its subtree
    Deactivate {
        /// Logical path (must resolve to one node)
        path: String,
    },

    /// Physical path of a node for a storage area
    DiskPath {
        /// Logical path (must resolve to one node)
        path: String,
        /// Storage area
        #[arg(long, default_value = "publish")]
        area: String,
        /// Platform key; defaults to the running host
        #[arg(long)]
        platform: Option<String>,
    },

    /// Find the node(s) a physical path points at
    Locate {
        /// Physical path
        disk_path: String,
        /// Storage area the path belongs to
        #[arg(long, default_value = "publish")]
        area: String,
    },

    /// Rewrite a physical path onto another platform's storage root
    ToPlatform {
        /// Physical path
        disk_path: String,
        /// Target platform key (linux, darwin, win32)
        platform: String,
    },

    /// Load config presets from a directory into the store
    ImportPresets {
        /// Directory holding hierarchy/, storage/ and decision/ presets
        dir: PathBuf,
    },

    /// Snapshot a node's publish disk contents into the store
    Rescan {
        /// Logical path (must resolve to one node)
        path: String,
    },

    /// Classify a node's sub-filesystem with a decision config
    Classify {
        /// Logical path (must resolve to one node)
        path: String,
        /// Decision config name
        decision: String,
    },

    /// Union the sub-level contents of a version and its older siblings
    Flatten {
        /// Logical path of the version (must resolve to one node)
        path: String,
        /// Print absolute physical paths instead of relative ones
        #[arg(long)]
        absolute: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let tree = Tree::open(&cli.db)?;

    match cli.command {
        Command::Projects => {
            let projects = tree.projects()?;
            print_output(&serde_json::to_value(&projects)?, &cli.format);
        }

        Command::Show { path } => {
            let resolution = DbPath::new(&path).resolve(&tree, true)?;
            match resolution {
                Resolution::One(node) => print_output(&serde_json::to_value(&node)?, &cli.format),
                Resolution::Many(nodes) => {
                    print_output(&serde_json::to_value(&nodes)?, &cli.format)
                }
            }
        }

        Command::Ls { path } => {
            for child in DbPath::new(&path).listdir(&tree)? {
                println!("{child}");
            }
        }

        Command::Tree { path } => {
            for descendant in DbPath::new(&path).walk(&tree)? {
                println!("{descendant}");
            }
        }

        Command::CreateProject {
            name,
            hierarchy,
            storage,
        } => {
            let project = tree.create_project(&name, &hierarchy, &storage)?;
            print_output(&serde_json::to_value(&project)?, &cli.format);
        }

        Command::Create { path, names } => {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let made = DbPath::new(&path).create(&tree, &names)?;
            println!("{made}");
        }

        Command::Deactivate { path } => {
            let node = resolve_one(&tree, &path)?;
            let count = tree.deactivate(&node)?;
            print_output(
                &serde_json::json!({ "ok": true, "deactivated": count }),
                &cli.format,
            );
        }

        Command::DiskPath {
            path,
            area,
            platform,
        } => {
            let node = resolve_one(&tree, &path)?;
            let disk = match platform {
                Some(platform) => tree.disk_path(&node, &area, &platform, true)?,
                None => tree.disk_path_local(&node, &area, true)?,
            };
            println!("{disk}");
        }

        Command::Locate { disk_path, area } => {
            let resolution = tree.node_from_disk(&disk_path, &area)?;
            let nodes = resolution.into_nodes();
            print_output(&serde_json::to_value(&nodes)?, &cli.format);
        }

        Command::ToPlatform {
            disk_path,
            platform,
        } => {
            println!("{}", tree.to_platform(&disk_path, &platform)?);
        }

        Command::ImportPresets { dir } => {
            let mut tree = tree;
            let count = tree.import_presets(&dir)?;
            print_output(
                &serde_json::json!({ "ok": true, "imported": count }),
                &cli.format,
            );
        }

        Command::Rescan { path } => {
            let node = resolve_one(&tree, &path)?;
            let found = tree.rescan(&node)?;
            print_output(&serde_json::json!({ "ok": true, "found": found }), &cli.format);
        }

        Command::Classify { path, decision } => {
            let node = resolve_one(&tree, &path)?;
            let classified = tree.classify(&node, &decision)?;
            print_output(&serde_json::to_value(&classified)?, &cli.format);
        }

        Command::Flatten { path, absolute } => {
            let node = resolve_one(&tree, &path)?;
            let entries = tree.flatten(&node, !absolute)?;
            print_output(&serde_json::to_value(&entries)?, &cli.format);
        }
    }

    Ok(())
}

fn resolve_one(tree: &Tree, path: &str) -> Result<NodeRecord, Box<dyn std::error::Error>> {
    let resolution = DbPath::new(path).resolve(tree, true)?;
    match resolution {
        Resolution::One(node) => Ok(node),
        Resolution::Many(nodes) => {
            Err(format!("'{path}' resolved to {} nodes, expected one", nodes.len()).into())
        }
    }
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).unwrap());
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value).unwrap());
        }
    }
}
