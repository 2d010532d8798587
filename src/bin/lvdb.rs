//! Operator CLI for the LocalVibe database core.
//!
//! Everything the admin database page offers, driveable from a shell:
//! statistics, backup download, upload analysis, in-place restore, and
//! connection configuration.

use anyhow::Result;
use std::path::PathBuf;

use localvibe_core::config::Config;
use localvibe_core::db::Database;
use localvibe_core::{backup, connection, logging, restore};

enum Command {
    Info,
    Backup { out: Option<PathBuf> },
    Analyze { file: PathBuf },
    Restore { file: PathBuf, confirm: bool },
    TestConnection { url: String },
    UseSqlite { path: PathBuf },
    UsePostgres { url: String },
}

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut command = None;
    let mut positionals: Vec<String> = Vec::new();
    let mut confirm = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("lvdb {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--confirm" => {
                confirm = true;
            }
            "info" | "backup" | "analyze" | "restore" | "test-connection" | "use-sqlite"
            | "use-postgres"
                if command.is_none() =>
            {
                command = Some(args[i].clone());
            }
            other if command.is_some() && !other.starts_with('-') => {
                positionals.push(other.to_string());
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let require_one = |what: &str| -> String {
        match positionals.first() {
            Some(v) => v.clone(),
            None => {
                eprintln!("Error: {what} required");
                std::process::exit(1);
            }
        }
    };

    let command = match command.as_deref() {
        Some("info") => Command::Info,
        Some("backup") => Command::Backup {
            out: positionals.first().map(PathBuf::from),
        },
        Some("analyze") => Command::Analyze {
            file: PathBuf::from(require_one("backup file")),
        },
        Some("restore") => Command::Restore {
            file: PathBuf::from(require_one("backup file")),
            confirm,
        },
        Some("test-connection") => Command::TestConnection {
            url: require_one("connection URI"),
        },
        Some("use-sqlite") => Command::UseSqlite {
            path: PathBuf::from(require_one("database path")),
        },
        Some("use-postgres") => Command::UsePostgres {
            url: require_one("connection URI"),
        },
        _ => {
            print_help();
            std::process::exit(1);
        }
    };

    Args {
        config_path,
        command,
    }
}

fn print_help() {
    println!(
        r#"lvdb - LocalVibe database management

USAGE:
    lvdb [OPTIONS] <COMMAND>

COMMANDS:
    info                      Show database statistics and recent activity
    backup [DIR]              Capture a backup of the live database
    analyze FILE              Check a backup file against the live schema
    restore FILE --confirm    Replace the live database with a backup file
    test-connection URI       Probe an external PostgreSQL target
    use-sqlite PATH           Stage the embedded backend (restart required)
    use-postgres URI          Stage an external backend (restart required)

OPTIONS:
    --config, -c PATH   Path to config file
    --confirm           Acknowledge that restore overwrites the live database
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    LOCALVIBE_LOG       Log level (trace, debug, info, warn, error)
    DATABASE_URI        Overrides the configured connection target

Config file location: $XDG_CONFIG_HOME/localvibe/config.toml"#
    );
}

fn open_live(config: &Config) -> Result<Database> {
    let target = connection::startup_target(config);
    let mut db_config = config.database.clone();
    target.apply(&mut db_config);
    let db = Database::open(&db_config)?;
    db.initialize()?;
    Ok(db)
}

fn main() -> Result<()> {
    let args = parse_args();

    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let mut config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match args.command {
        Command::Info => {
            let db = open_live(&config)?;
            let info = db.db_info()?;
            println!("Backend:  {}", info.backend);
            println!("Location: {}", info.url_safe);
            println!("Size:     {}", info.size_human);
            println!("Tables:   {} ({} rows total)", info.table_count, info.total_rows);
            for table in &info.tables {
                println!("    {:<24} {:>8}", table.name, table.rows);
            }
            println!("Audit activity (14 days):");
            for day in db.audit_activity(14)? {
                println!("    {:<8} {}", day.date, day.count);
            }
        }

        Command::Backup { out } => {
            let db = open_live(&config)?;
            let dest = out.unwrap_or_else(|| config.backup.dir.clone());
            let artifact = backup::capture_live(&db, &dest)?;
            println!("Backup written to {}", artifact.path.display());
            println!("  size:   {}", localvibe_core::db::human_size(artifact.size_bytes));
            println!("  sha256: {}", artifact.sha256);
        }

        Command::Analyze { file } => {
            let db = open_live(&config)?;
            let report = restore::analyze_upload(&db, &file)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Restore { file, confirm } => {
            let db = open_live(&config)?;
            let success = restore::restore_upload(db, &file, confirm)?;
            println!("Restore committed.");
            println!("  analysis:    {}", success.analysis.summary);
            println!("  safety copy: {}", success.safety_copy.display());
        }

        Command::TestConnection { url } => {
            #[cfg(feature = "postgres")]
            match connection::validate_external(&url) {
                Ok(()) => println!("Connection successful!"),
                Err(e) => {
                    eprintln!("Connection failed: {e:#}");
                    std::process::exit(1);
                }
            }
            #[cfg(not(feature = "postgres"))]
            {
                let _ = url;
                eprintln!("This build has no PostgreSQL support");
                std::process::exit(1);
            }
        }

        Command::UseSqlite { path } => {
            let db = open_live(&config)?;
            let target = connection::ConnectionTarget::Embedded { path };
            let outcome = connection::save_target(&db, &mut config, &target)?;
            config.save()?;
            print_save_outcome(&outcome);
        }

        Command::UsePostgres { url } => {
            let db = open_live(&config)?;
            let target = connection::ConnectionTarget::External { url };
            let outcome = connection::save_target(&db, &mut config, &target)?;
            config.save()?;
            print_save_outcome(&outcome);
        }
    }

    Ok(())
}

fn print_save_outcome(outcome: &connection::SaveOutcome) {
    if outcome.env_updated {
        println!("Configuration saved and .env updated.");
    } else {
        println!("Configuration saved. Update DATABASE_URI in your .env file manually.");
    }
    println!("Restart the server to apply the new database connection.");
}
