// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("tevra")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Package transaction engine with a header database")
        .subcommand_required(false)
        .subcommand(
            Command::new("init")
                .about("Initialize the header database")
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .value_name("PATH")
                        .default_value("/var/lib/tevra/tevra.db")
                        .help("Database path"),
                ),
        )
        .subcommand(
            Command::new("import")
                .about("Import a package header into the database")
                .arg(
                    Arg::new("package_path")
                        .required(true)
                        .help("Path to the package file"),
                )
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("/var/lib/tevra/tevra.db"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List imported headers")
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("/var/lib/tevra/tevra.db"),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("Show what a transaction element built from a package looks like")
                .arg(
                    Arg::new("package_path")
                        .required(true)
                        .help("Path to the package file"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("tevra.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
