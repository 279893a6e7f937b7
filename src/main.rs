//! Litestore CLI - inspect litestore databases and run the demo scenario

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use litestore::config::{self, StoreConfig};
use litestore::storage::MEMORY_PATH;
use litestore::ui::{self, Icons};
use litestore::{EntityType, FieldType, QuerySpec, Store, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "litestore")]
#[command(version = "0.1.0")]
#[command(about = "Small SQLite object store - inspect databases and try the store out")]
#[command(long_about = r#"
Litestore maps plain records onto SQLite tables:
  • Tables are created and extended from entity declarations
  • One live instance per stored row
  • Filters and aggregates compile to parameterized SQL

Example usage:
  litestore init --database data/app.db
  litestore tables
  litestore describe Person
  litestore dump Person --format json
  litestore demo --debug
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ./litestore.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(short, long, global = true)]
    database: Option<String>,

    /// Print every statement with its parameters
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a litestore.toml
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,

        /// Bound on cached instances
        #[arg(long)]
        cache_capacity: Option<usize>,

        /// Run VACUUM when the store closes
        #[arg(long)]
        vacuum: bool,
    },

    /// List tables and their row counts
    Tables,

    /// Show the columns of a table
    Describe {
        table: String,
    },

    /// Print the rows of a table
    Dump {
        table: String,

        /// Maximum number of rows
        #[arg(short, long)]
        limit: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Store eleven people and run a few queries against them
    Demo,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

const PERSON: &[(&str, FieldType)] = &[
    ("name", FieldType::Text),
    ("email", FieldType::Text),
    ("age", FieldType::Integer),
];

const DEMO_AGES: [i64; 11] = [99, 10, 13, 16, 19, 22, 25, 28, 31, 34, 37];

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(&cli) {
        ui::error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Init {
            force,
            cache_capacity,
            vacuum,
        } => run_init(cli, *force, *cache_capacity, *vacuum),
        Commands::Tables => run_tables(&open_store(cli)?),
        Commands::Describe { table } => run_describe(&open_store(cli)?, table),
        Commands::Dump {
            table,
            limit,
            format,
        } => run_dump(&open_store(cli)?, table, *limit, *format),
        Commands::Demo => run_demo(&open_store(cli)?),
    }
}

/// Config file merged with command-line overrides
fn resolve_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    if let Some(database) = &cli.database {
        config.database = Some(database.clone());
    }
    config.debug |= cli.debug;
    Ok(config)
}

fn open_store(cli: &Cli) -> anyhow::Result<Store> {
    let config = resolve_config(cli)?;
    if let Some(database) = config.database.as_deref().filter(|d| *d != MEMORY_PATH) {
        config::ensure_db_dir(Path::new(database))?;
    }
    let store = Store::from_config(&config)
        .with_context(|| format!("opening {}", config.database.as_deref().unwrap_or(MEMORY_PATH)))?;
    tracing::debug!(?store, "store opened");
    Ok(store)
}

fn run_init(cli: &Cli, force: bool, cache_capacity: Option<usize>, vacuum: bool) -> anyhow::Result<()> {
    let path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let database = match &cli.database {
        Some(database) => database.clone(),
        None => {
            let cwd = std::env::current_dir()?;
            config::default_database_path_in(&cwd).display().to_string()
        }
    };

    let config = StoreConfig {
        database: Some(database.clone()),
        debug: cli.debug,
        cache_capacity,
        vacuum_on_close: vacuum,
        auto_register: false,
    };
    config::write_config(&path, &config, force)?;
    if database != MEMORY_PATH {
        config::ensure_db_dir(Path::new(&database))?;
    }

    ui::success(&format!("Wrote {}", path.display()));
    ui::status(Icons::DATABASE, "Database", &database);
    Ok(())
}

fn run_tables(store: &Store) -> anyhow::Result<()> {
    let tables = store.tables()?;
    if tables.is_empty() {
        ui::info("Tables", "none");
        return Ok(());
    }

    let mut builder = ui::TableBuilder::new();
    for table in &tables {
        let count = match EntityType::reflect(store, table) {
            Ok(entity) => {
                let row = entity
                    .query(store, entity.select(entity.id_column().count()))?
                    .first()?;
                row.and_then(|r| r.get(0).and_then(Value::as_i64))
                    .map(|n| n.to_string())
                    .unwrap_or_default()
            }
            // not an entity table (no integer id)
            Err(_) => "-".to_string(),
        };
        builder.add_row(table, &count);
    }

    ui::section(&format!(" {} Tables ", Icons::TABLE));
    println!("{}", builder.build());
    store.close()?;
    Ok(())
}

fn run_describe(store: &Store, table: &str) -> anyhow::Result<()> {
    let columns = store.table_columns(table)?;
    if columns.is_empty() {
        anyhow::bail!("no such table: {}", table);
    }
    ui::section(&format!(" {} {} ", Icons::TABLE, table));
    println!("{}", ui::columns_table(&columns));
    store.close()?;
    Ok(())
}

fn run_dump(store: &Store, table: &str, limit: Option<u64>, format: Format) -> anyhow::Result<()> {
    let entity = EntityType::reflect(store, table)?;
    let spec = match limit {
        Some(limit) => QuerySpec::new(&entity).limit(limit),
        None => QuerySpec::new(&entity),
    };
    let cursor = entity.query(store, spec)?;
    let columns = cursor.columns().to_vec();
    let rows = cursor.fetch_all()?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        Format::Text => {
            ui::section(&format!(" {} {} ", Icons::TABLE, table));
            println!("{}", ui::rows_table(&columns, &rows));
            println!("{}", ui::dim(&format!("{} row(s)", rows.len())));
        }
    }
    store.close()?;
    Ok(())
}

fn run_demo(store: &Store) -> anyhow::Result<()> {
    let person = EntityType::from_fields("Person", PERSON)?;
    let change = person.register(store)?;
    ui::header("Litestore demo");
    ui::info("Person table", &format!("{:?}", change));

    let mut people = Vec::with_capacity(DEMO_AGES.len());
    for (i, age) in DEMO_AGES.iter().enumerate() {
        let name = format!("Person {}", i + 1);
        let email = format!("person{}@example.com", i + 1);
        let record = person.record_with(&[
            ("name", name.into()),
            ("email", email.into()),
            ("age", (*age).into()),
        ])?;
        people.push(record.save(store)?);
    }
    store.commit()?;
    ui::success(&format!("Saved {} people", people.len()));

    ui::section(&format!(" {} Aged 16 to 50 ", Icons::PERSON));
    let in_range = person
        .load(store, Some(person.c("age").ge(16) & person.c("age").le(50)))?
        .fetch_all()?;
    for entity in &in_range {
        println!("  {:?}", entity);
    }

    ui::section(&format!(" {} Aggregates ", Icons::STATS));
    let bounds = person
        .query(store, person.select(person.c("age").min().then(person.c("age").max())))?
        .first()?;
    if let Some(row) = bounds {
        ui::info("min // max", &format!("({}, {})", row[0], row[1]));
    }
    let youngest = person
        .query(store, person.select(person.c("age").min().alias("minimum_age")))?
        .first()?;
    if let Some(row) = youngest {
        ui::info("minimum_age", &row.field("minimum_age")?.to_string());
    }

    let first_id = people[0].id()?;
    let same = person.get(store, &[("id", first_id.into())])?;
    ui::info(
        "Reloaded first person is the saved instance",
        &(same == Some(people[0])).to_string(),
    );

    store.close()?;
    Ok(())
}
