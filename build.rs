// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: configuration file
fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("PATH")
        .help("Configuration file")
}

fn build_cli() -> Command {
    Command::new("majordomo")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Declarative community management for ejabberd")
        .subcommand(
            Command::new("run")
                .about("Run the reconciliation daemon")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("sync")
                .about("Run one reconciliation pass and exit")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate a document file")
                .arg(Arg::new("file").value_name("FILE").help("Document to validate"))
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("status")
                .about("Show document, tracking, and lock status")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("init")
                .about("Create the database folder and seed the default document")
                .arg(config_arg()),
        )
}

fn main() -> std::io::Result<()> {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));

    let man = Man::new(build_cli());
    let mut buffer: Vec<u8> = Vec::new();
    man.render(&mut buffer)?;
    fs::write(out_dir.join("majordomo.1"), buffer)?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
