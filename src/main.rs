use arbor::{Config, Database, TrendingWindow};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;

#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(author, version, about = "Skill-tree authoring and discovery backend")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the .arbor directory and database in the current directory
    Init,

    /// Start the JSON API server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// User management
    User {
        #[command(subcommand)]
        command: UserCommand,
    },

    /// Skill tree management
    Tree {
        #[command(subcommand)]
        command: TreeCommand,
    },

    /// Show trending trees
    Trending {
        /// Time window: d, w, or m
        #[arg(short, long, default_value = "w")]
        window: String,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Register a new user
    Add {
        username: String,
        email: String,
        password: String,
    },
}

#[derive(Subcommand, Debug)]
enum TreeCommand {
    /// List all trees, optionally filtered by tag
    List {
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Create an empty tree
    Create {
        name: String,

        /// Creator username
        #[arg(short, long)]
        creator: String,

        #[arg(short, long)]
        description: Option<String>,

        /// Tags, repeatable
        #[arg(short = 'g', long = "tag")]
        tags: Vec<String>,
    },

    /// Delete a tree and all its skills
    Delete { id: i32 },

    /// Show a tree's full detail as JSON
    Show { id: i32 },
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Command::Init => {
            std::fs::create_dir_all(".arbor")?;
            let path = std::path::Path::new(".arbor/arbor.db");
            Database::open_at(path)?;
            eprintln!("{} initialized database at {}", "✓".green(), path.display());
            Ok(())
        }

        Command::Serve { port } => {
            let config = Config::load();
            let port = port.unwrap_or(config.server.port);
            let db = Database::open()?;
            arbor::serve::start_server(db, port)?;
            Ok(())
        }

        Command::User { command } => {
            let db = Database::open()?;
            match command {
                UserCommand::Add {
                    username,
                    email,
                    password,
                } => {
                    let user = db.create_user(&username, &email, &password)?;
                    eprintln!("{} registered user {} (id {})", "✓".green(), user.username.bold(), user.id);
                }
            }
            Ok(())
        }

        Command::Tree { command } => {
            let db = Database::open()?;
            match command {
                TreeCommand::List { tag } => {
                    let trees = db.list_skill_trees(tag.as_deref())?;
                    if trees.is_empty() {
                        eprintln!("No skill trees found.");
                    }
                    for tree in trees {
                        let tags = if tree.tags.is_empty() {
                            String::new()
                        } else {
                            format!("  [{}]", tree.tags.join(", "))
                        };
                        println!(
                            "{:>4}  {}  by {}{}",
                            tree.id,
                            tree.name.bold(),
                            tree.creator_username,
                            tags.dimmed()
                        );
                    }
                }
                TreeCommand::Create {
                    name,
                    creator,
                    description,
                    tags,
                } => {
                    let tree = db.create_skill_tree(&name, description.as_deref(), &creator, &tags)?;
                    eprintln!("{} created tree {} (id {})", "✓".green(), tree.name.bold(), tree.id);
                }
                TreeCommand::Delete { id } => {
                    db.delete_skill_tree(id)?;
                    eprintln!("{} deleted tree {}", "✓".green(), id);
                }
                TreeCommand::Show { id } => {
                    let detail = db.get_tree_detail(id)?;
                    println!("{}", serde_json::to_string_pretty(&detail)?);
                }
            }
            Ok(())
        }

        Command::Trending { window } => {
            let db = Database::open()?;
            let trees = db.trending(TrendingWindow::from_code(&window))?;
            if trees.is_empty() {
                eprintln!("Nothing trending in this window.");
            }
            for tree in trees {
                println!("{:>4}  {}  (score {})", tree.id, tree.name.bold(), tree.score);
            }
            Ok(())
        }

        Command::Completion { shell } => {
            let mut cmd = Args::command();
            generate(shell, &mut cmd, "arbor", &mut std::io::stdout());
            Ok(())
        }
    }
}
