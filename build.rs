// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("romsync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Keep a pristine directory of torrentzip archives synchronized with a dat file")
        .subcommand_required(true)
        .subcommand(
            Command::new("sync")
                .about("Synchronize a target directory against the dat file read on standard input")
                .arg(Arg::new("target").required(true).help("Target directory"))
                .arg(
                    Arg::new("source")
                        .num_args(0..)
                        .help("Additional source files or directories to scan"),
                )
                .arg(
                    Arg::new("workers")
                        .short('w')
                        .long("workers")
                        .value_name("N")
                        .help("Number of worker threads (defaults to the CPU count)"),
                )
                .arg(
                    Arg::new("dry_run")
                        .short('n')
                        .long("dry-run")
                        .action(clap::ArgAction::SetTrue)
                        .help("Log what would happen without touching the target directory"),
                )
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .action(clap::ArgAction::SetTrue)
                        .help("Log progress to standard error"),
                )
                .arg(
                    Arg::new("algorithm")
                        .short('a')
                        .long("algorithm")
                        .value_parser(["crc32", "md5", "sha1"])
                        .default_value("crc32")
                        .help("Checksum algorithm used to match ROMs"),
                )
                .arg(
                    Arg::new("mia")
                        .long("mia")
                        .value_name("PATH")
                        .help("File listing games known to be missing, one name per line"),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Print the members and checksums of one or more archives")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .num_args(1..)
                        .help("Archive, directory or file to inspect"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("romsync.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
