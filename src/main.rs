// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::Read;
use tevra::deps::DepKind;
use tevra::db::SqliteHeaderStore;
use tevra::header::Header;
use tevra::transaction::{Disposition, Transaction};
use tracing::info;

#[derive(Parser)]
#[command(name = "tevra")]
#[command(author, version, about = "Package transaction engine with a header database", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the header database
    Init {
        /// Database path (default: /var/lib/tevra/tevra.db)
        #[arg(short, long, default_value = "/var/lib/tevra/tevra.db")]
        db_path: String,
    },
    /// Import a package header into the database
    Import {
        /// Path to the package file
        package_path: String,
        /// Database path (default: /var/lib/tevra/tevra.db)
        #[arg(short, long, default_value = "/var/lib/tevra/tevra.db")]
        db_path: String,
    },
    /// List imported headers
    List {
        /// Database path (default: /var/lib/tevra/tevra.db)
        #[arg(short, long, default_value = "/var/lib/tevra/tevra.db")]
        db_path: String,
    },
    /// Show what a transaction element built from a package looks like
    Inspect {
        /// Path to the package file
        package_path: String,
    },
}

/// Check the file really is a package before handing it to the parser.
fn verify_package_magic(path: &str) -> Result<()> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;

    if magic != [0xED, 0xAB, 0xEE, 0xDB] {
        return Err(anyhow::anyhow!("not a package file: {}", path));
    }
    Ok(())
}

/// Parse the package and run it through element construction, so import
/// and inspect reject anything the transaction engine would reject.
fn load_element(package_path: &str) -> Result<(Transaction, Header)> {
    verify_package_magic(package_path)?;
    let mut h = Header::from_rpm_file(std::path::Path::new(package_path))?;

    let mut ts = Transaction::new();
    ts.add(&mut h, Disposition::Added, Some(package_path.to_string()), None)?;
    Ok((ts, h))
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { db_path }) => {
            info!("Initializing header database at: {}", db_path);
            SqliteHeaderStore::init(&db_path)?;
            println!("Database initialized successfully at: {}", db_path);
            Ok(())
        }
        Some(Commands::Import {
            package_path,
            db_path,
        }) => {
            info!("Importing package: {}", package_path);

            let (ts, mut h) = load_element(&package_path)?;
            let te = ts.element(0).unwrap();
            let nevra = te.nevra().to_string();

            let store = SqliteHeaderStore::open(&db_path)?;
            let instance = store.insert(&mut h, &nevra)?;

            println!("Imported {} as instance {}", nevra, instance);
            Ok(())
        }
        Some(Commands::List { db_path }) => {
            let store = SqliteHeaderStore::open(&db_path)?;
            let rows = store.list()?;

            if rows.is_empty() {
                println!("No headers imported.");
            } else {
                println!("Imported headers:");
                for (instance, nevra) in &rows {
                    println!("  [{}] {}", instance, nevra);
                }
                println!("\nTotal: {} header(s)", rows.len());
            }
            Ok(())
        }
        Some(Commands::Inspect { package_path }) => {
            let (ts, _h) = load_element(&package_path)?;
            let te = ts.element(0).unwrap();

            println!("{}", te.nevra());
            println!("  Type: {}", te.type_str());
            if let Some(arch) = te.arch() {
                println!("  Architecture: {}", arch);
            }
            if te.is_source() {
                println!("  Source package");
            }
            println!("  Color: {:#x}", te.color());
            if te.trans_scripts() != 0 {
                println!("  Trans scripts: {:#06b}", te.trans_scripts());
            }
            println!("  Estimated file size: {} bytes", te.pkg_file_size());
            if let Some(files) = te.files() {
                println!("  Files: {}", files.len());
            }
            for kind in DepKind::ALL {
                let ds = te.ds(kind);
                if !ds.is_empty() {
                    println!("  {:?}: {}", kind, ds.len());
                }
            }
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("tevra v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'tevra --help' for usage information");
            Ok(())
        }
    }
}
