mod app;
mod event;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use std::path::PathBuf;
use std::time::Duration;

use fieldops::backend::{Account, Collection, ListQuery, Space, User};
use fieldops::config::Config;

#[derive(Parser, Debug)]
#[command(name = "fieldops")]
#[command(about = "Field operations console for pest-control service data")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fieldops/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Mirror logs to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Keep cached query results in memory only
  #[arg(long, global = true)]
  no_cache: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Sign in with FIELDOPS_EMAIL and FIELDOPS_PASSWORD
  Login,
  /// Sign out and drop cached data
  Logout,
  /// Show session state and backend reachability
  Status,
  /// List rows of an entity
  List {
    entity: EntityKind,
    /// Zero-based page number
    #[arg(long, default_value_t = 0)]
    page: u32,
    /// Equality filter, repeatable (e.g. --filter account_id=a1)
    #[arg(long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, String)>,
    /// Column to order by, optionally suffixed ".desc"
    #[arg(long)]
    order: Option<String>,
  },
  /// Show one row as JSON
  Get { entity: EntityKind, id: String },
  /// Insert a row from a JSON object
  Create {
    entity: EntityKind,
    #[arg(long)]
    json: String,
  },
  /// Patch a row with a JSON object
  Update {
    entity: EntityKind,
    id: String,
    #[arg(long)]
    json: String,
  },
  /// Delete a row
  Delete { entity: EntityKind, id: String },
  /// Keep a list on screen, revalidating in the background (Ctrl-C to stop)
  Watch {
    entity: EntityKind,
    #[arg(long, default_value_t = 30)]
    interval_secs: u64,
    #[arg(long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, String)>,
  },
  /// Inspect or maintain the local cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Remove every cached entry
  Clear,
  /// Remove expired entries now
  Sweep,
  /// Show the raw entry stored under a key
  Inspect { key: String },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum EntityKind {
  Accounts,
  Spaces,
  Collections,
  Users,
}

/// Run `$body` with `$T` bound to the row type of `$kind`.
macro_rules! with_entity {
  ($kind:expr, $T:ident => $body:expr) => {
    match $kind {
      EntityKind::Accounts => {
        type $T = Account;
        $body
      }
      EntityKind::Spaces => {
        type $T = Space;
        $body
      }
      EntityKind::Collections => {
        type $T = Collection;
        $body
      }
      EntityKind::Users => {
        type $T = User;
        $body
      }
    }
  };
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
  match raw.split_once('=') {
    Some((column, value)) if !column.is_empty() => Ok((column.to_string(), value.to_string())),
    _ => Err(format!("expected COLUMN=VALUE, got '{}'", raw)),
  }
}

fn list_query(filters: Vec<(String, String)>) -> ListQuery {
  filters
    .into_iter()
    .fold(ListQuery::new(), |query, (column, value)| query.filter(column, value))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = fieldops::logging::init(args.verbose)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let app = app::App::new(config, args.no_cache)?;

  match args.command {
    Command::Login => app.login().await,
    Command::Logout => app.logout().await,
    Command::Status => app.status().await,
    Command::List {
      entity,
      page,
      filters,
      order,
    } => {
      let mut query = list_query(filters).page(page);
      if let Some(order) = order {
        query = query.order(order);
      }
      with_entity!(entity, T => app.list::<T>(&query).await)
    }
    Command::Get { entity, id } => with_entity!(entity, T => app.get::<T>(&id).await),
    Command::Create { entity, json } => with_entity!(entity, T => app.create::<T>(&json).await),
    Command::Update { entity, id, json } => {
      with_entity!(entity, T => app.update::<T>(&id, &json).await)
    }
    Command::Delete { entity, id } => with_entity!(entity, T => app.delete::<T>(&id).await),
    Command::Watch {
      entity,
      interval_secs,
      filters,
    } => {
      let every = Duration::from_secs(interval_secs.max(1));
      with_entity!(entity, T => app.watch::<T>(list_query(filters), every).await)
    }
    Command::Cache { action } => match action {
      CacheAction::Clear => app.cache_clear(),
      CacheAction::Sweep => app.cache_sweep(),
      CacheAction::Inspect { key } => app.cache_inspect(&key),
    },
  }
}
