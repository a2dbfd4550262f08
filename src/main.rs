//! sqlhub - command-line interface for the SQLite hosting core

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use sqlhub::diff::{DiffOptions, MergeStrategy};
use sqlhub::graph::CommitOrder;
use sqlhub::hub::{CommitRef, Hub, HubConfig};
use sqlhub::storage::{BranchRef, CommitId, DatabaseRef, Signature, TagKind};

#[derive(Parser)]
#[command(name = "sqlhub")]
#[command(version)]
#[command(about = "Version control for hosted SQLite databases")]
#[command(long_about = r#"
sqlhub keeps every uploaded SQLite file as a commit, with branches, tags,
releases, row-level diffs and fast-forward merge requests.

Databases are named owner/name, branches owner/name:branch and commits
owner/name@commit.

Example usage:
  sqlhub create alice/stats.sqlite --file stats.sqlite --author Alice --email alice@example.org
  sqlhub branch create alice/stats.sqlite cleanup --commit 3fa4...
  sqlhub diff alice/stats.sqlite@3fa4... alice/stats.sqlite@91bc... --data
"#)]
struct Cli {
    /// Data directory (overrides the config file)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and stores
    Init,

    /// Create a database from a SQLite file
    Create {
        /// owner/name
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,

        #[command(flatten)]
        upload: Upload,
    },

    /// Commit a new version of a database to a branch
    Commit {
        /// owner/name:branch
        #[arg(value_parser = parse_branch)]
        branch: BranchRef,

        #[command(flatten)]
        upload: Upload,
    },

    /// Copy a database under another owner
    Fork {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,

        /// Owner of the fork
        #[arg(short, long)]
        owner: String,
    },

    /// Show the history of a branch
    Log {
        /// owner/name:branch
        #[arg(value_parser = parse_branch)]
        branch: BranchRef,

        /// Print JSON instead of one line per commit
        #[arg(long)]
        json: bool,
    },

    /// Manage branches
    #[command(subcommand)]
    Branch(BranchCommand),

    /// Manage tags and releases
    #[command(subcommand)]
    Tag(TagCommand),

    /// List the commits a fast-forward of DESTINATION to SOURCE would apply
    Compare {
        #[arg(value_parser = parse_branch)]
        source: BranchRef,

        #[arg(value_parser = parse_branch)]
        destination: BranchRef,
    },

    /// Diff two commits
    Diff {
        /// owner/name@commit
        #[arg(value_parser = parse_commit)]
        from: CommitRef,

        /// owner/name@commit
        #[arg(value_parser = parse_commit)]
        to: CommitRef,

        /// Include row changes
        #[arg(long)]
        data: bool,

        /// Attach SQL that replays the changes
        #[arg(long)]
        merge: bool,
    },

    /// Manage merge requests
    #[command(subcommand)]
    Mr(MrCommand),
}

#[derive(clap::Args)]
struct Upload {
    /// SQLite file to upload
    #[arg(short, long)]
    file: PathBuf,

    /// Licence text file
    #[arg(short, long)]
    licence: Option<PathBuf>,

    #[arg(long)]
    author: String,

    #[arg(long)]
    email: String,

    #[arg(short, long, default_value = "Upload")]
    message: String,
}

#[derive(Subcommand)]
enum BranchCommand {
    List {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
    },
    Create {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        name: String,
        /// Commit the branch starts at
        #[arg(long)]
        commit: String,
        #[arg(long)]
        description: Option<String>,
    },
    Update {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        name: String,
        #[arg(long)]
        new_name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        name: String,
    },
    /// Make a branch the default
    Default {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        name: String,
    },
    /// Move a branch back to an earlier commit of its history
    Reset {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        name: String,
        #[arg(long)]
        commit: String,
    },
}

#[derive(Subcommand)]
enum TagCommand {
    List {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        #[arg(long)]
        release: bool,
    },
    Create {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        name: String,
        #[arg(long)]
        commit: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        tagger: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        release: bool,
    },
    Update {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        name: String,
        #[arg(long)]
        new_name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        release: bool,
    },
    Delete {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        name: String,
        #[arg(long)]
        release: bool,
    },
}

#[derive(Subcommand)]
enum MrCommand {
    Create {
        #[arg(value_parser = parse_branch)]
        source: BranchRef,
        #[arg(value_parser = parse_branch)]
        destination: BranchRef,
        #[arg(short, long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        creator: String,
    },
    Show {
        /// Destination database
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        id: u64,
    },
    Merge {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        id: u64,
        #[arg(short, long)]
        user: String,
    },
    Close {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        id: u64,
        #[arg(short, long)]
        user: String,
    },
    Reopen {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        id: u64,
        #[arg(short, long)]
        user: String,
    },
    /// Add a comment to the discussion
    Comment {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        id: u64,
        #[arg(short, long)]
        user: String,
        body: String,
    },
    /// Print the discussion, state changes included
    Comments {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        id: u64,
    },
    EditComment {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        id: u64,
        comment: u64,
        body: String,
    },
    DeleteComment {
        #[arg(value_parser = parse_database)]
        database: DatabaseRef,
        id: u64,
        comment: u64,
    },
}

fn parse_database(s: &str) -> Result<DatabaseRef, String> {
    let (owner, name) = s
        .split_once('/')
        .ok_or_else(|| format!("expected owner/name, got '{}'", s))?;
    DatabaseRef::new(owner, name).map_err(|e| e.to_string())
}

fn parse_branch(s: &str) -> Result<BranchRef, String> {
    let (db, branch) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected owner/name:branch, got '{}'", s))?;
    Ok(BranchRef::new(parse_database(db)?, branch))
}

fn parse_commit(s: &str) -> Result<CommitRef, String> {
    let (db, commit) = s
        .rsplit_once('@')
        .ok_or_else(|| format!("expected owner/name@commit, got '{}'", s))?;
    let commit = CommitId::from_hex(commit).map_err(|e| e.to_string())?;
    Ok(CommitRef::new(parse_database(db)?, commit))
}

fn tag_kind(release: bool) -> TagKind {
    if release {
        TagKind::Release
    } else {
        TagKind::Tag
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<HubConfig> {
    let mut config = match &cli.config {
        Some(path) => HubConfig::load(path)?,
        None => HubConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if cli.verbose {
        config.log_filter = "debug".to_string();
    }
    Ok(config)
}

fn read_upload(upload: &Upload) -> Result<(Vec<u8>, Option<Vec<u8>>, Signature)> {
    let bytes = std::fs::read(&upload.file).with_context(|| format!("reading {}", upload.file.display()))?;
    let licence = match &upload.licence {
        Some(path) => Some(std::fs::read(path).with_context(|| format!("reading {}", path.display()))?),
        None => None,
    };
    Ok((bytes, licence, Signature::new(&upload.author, &upload.email)))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    sqlhub::logging::init(&config.log_filter).map_err(|e| anyhow!("cannot install logger: {}", e))?;

    let hub = Hub::open(config).context("opening hub")?;

    match cli.command {
        Commands::Init => {
            println!("Initialised {}", hub.config().data_dir.display());
        }

        Commands::Create { database, upload } => {
            let (bytes, licence, author) = read_upload(&upload)?;
            let commit = hub.create_database(&database, &bytes, licence.as_deref(), author, &upload.message)?;
            println!("{} {}", database, commit.id);
        }

        Commands::Commit { branch, upload } => {
            let (bytes, licence, author) = read_upload(&upload)?;
            let commit = hub.commit_snapshot(
                &branch.database,
                &branch.branch,
                &bytes,
                licence.as_deref(),
                author,
                &upload.message,
            )?;
            println!("{} {}", branch, commit.id);
        }

        Commands::Fork { database, owner } => {
            let fork = hub.fork_database(&database, &owner)?;
            println!("{}", fork);
        }

        Commands::Log { branch, json } => {
            if json {
                print_json(&hub.decorated_history(&branch.database, &branch.branch)?)?;
            } else {
                for commit in hub.branch_history(&branch.database, &branch.branch)? {
                    let marker = if commit.is_merge() { "M" } else { " " };
                    println!(
                        "{} {} {} {} {}",
                        marker,
                        commit.id.short(),
                        commit.timestamp.to_rfc3339(),
                        commit.author.name,
                        commit.summary()
                    );
                }
            }
        }

        Commands::Branch(command) => run_branch(&hub, command)?,
        Commands::Tag(command) => run_tag(&hub, command)?,

        Commands::Compare { source, destination } => {
            let found = hub.common_ancestor_commits(&source, &destination, CommitOrder::NewestFirst)?;
            println!("ancestor {}", found.ancestor);
            for commit in &found.commits {
                println!("{} {}", commit.id, commit.summary());
            }
        }

        Commands::Diff { from, to, data, merge } => {
            let strategy = if merge { MergeStrategy::PreservePk } else { MergeStrategy::NoMerge };
            let options = DiffOptions::new().include_data(data).merge(strategy);
            print_json(&hub.diff(&from, &to, None, options)?)?;
        }

        Commands::Mr(command) => run_mr(&hub, command)?,
    }

    Ok(())
}

fn run_branch(hub: &Hub, command: BranchCommand) -> Result<()> {
    match command {
        BranchCommand::List { database } => {
            let default = hub.default_branch(&database)?;
            for (name, entry) in hub.get_branches(&database)? {
                let marker = if name == default { "*" } else { " " };
                println!("{} {} {} ({} commits)", marker, name, entry.commit.short(), entry.commit_count);
            }
        }
        BranchCommand::Create {
            database,
            name,
            commit,
            description,
        } => {
            let commit = CommitId::from_hex(&commit)?;
            hub.create_branch(&database, &name, &commit, description.as_deref())?;
        }
        BranchCommand::Update {
            database,
            name,
            new_name,
            description,
        } => {
            if new_name.is_none() && description.is_none() {
                bail!("nothing to update: pass --new-name or --description");
            }
            hub.update_branch(&database, &name, new_name.as_deref(), description.as_deref())?;
        }
        BranchCommand::Delete { database, name } => hub.delete_branch(&database, &name)?,
        BranchCommand::Default { database, name } => hub.set_default_branch(&database, &name)?,
        BranchCommand::Reset { database, name, commit } => {
            let commit = CommitId::from_hex(&commit)?;
            hub.reset_branch(&database, &name, &commit)?;
        }
    }
    Ok(())
}

fn run_tag(hub: &Hub, command: TagCommand) -> Result<()> {
    match command {
        TagCommand::List { database, release } => {
            let tags = if release {
                hub.get_releases(&database)?
            } else {
                hub.get_tags(&database)?
            };
            print_json(&tags)?;
        }
        TagCommand::Create {
            database,
            name,
            commit,
            description,
            tagger,
            email,
            release,
        } => {
            let commit = CommitId::from_hex(&commit)?;
            let entry = hub.create_tag(
                &database,
                tag_kind(release),
                &name,
                &commit,
                description.as_deref(),
                Signature::new(tagger, email),
            )?;
            print_json(&entry)?;
        }
        TagCommand::Update {
            database,
            name,
            new_name,
            description,
            release,
        } => {
            hub.update_tag(
                &database,
                tag_kind(release),
                &name,
                new_name.as_deref(),
                description.as_deref(),
            )?;
        }
        TagCommand::Delete {
            database,
            name,
            release,
        } => hub.delete_tag(&database, tag_kind(release), &name)?,
    }
    Ok(())
}

fn run_mr(hub: &Hub, command: MrCommand) -> Result<()> {
    match command {
        MrCommand::Create {
            source,
            destination,
            title,
            description,
            creator,
        } => {
            let mr = hub.create_merge_request(&title, description.as_deref(), &creator, source, destination)?;
            println!("{} #{}", mr.destination.database, mr.id);
        }
        MrCommand::Show { database, id } => print_json(&hub.refresh_merge_request(&database, id)?)?,
        MrCommand::Merge { database, id, user } => print_json(&hub.merge(&database, id, &user)?)?,
        MrCommand::Close { database, id, user } => print_json(&hub.close_merge_request(&database, id, &user)?)?,
        MrCommand::Reopen { database, id, user } => {
            print_json(&hub.reopen_merge_request(&database, id, &user)?)?
        }
        MrCommand::Comment {
            database,
            id,
            user,
            body,
        } => {
            let comment = hub.add_comment(&database, id, &user, &body)?;
            println!("{} #{} comment {}", database, id, comment.id);
        }
        MrCommand::Comments { database, id } => print_json(&hub.merge_request_comments(&database, id)?)?,
        MrCommand::EditComment {
            database,
            id,
            comment,
            body,
        } => print_json(&hub.update_comment(&database, id, comment, &body)?)?,
        MrCommand::DeleteComment { database, id, comment } => hub.delete_comment(&database, id, comment)?,
    }
    Ok(())
}
