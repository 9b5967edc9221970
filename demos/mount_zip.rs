use std::cell::RefCell;
use std::fs::File;
use std::rc::Rc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use zipfs_core::{ArchiveSource, Cli, Options, Tree, ZipArchiveSource};

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = run(&cli) {
        eprintln!("mount-zip: {e}");
        // Shift ZIP-layer codes past 10 to avoid colliding with the exit
        // codes a real FUSE mount loop would use for its own failures.
        let code = match e.zip_error_code() {
            Some(code) => 10 + code,
            None => 1,
        };
        std::process::exit(code);
    }
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: &Cli) -> zipfs_core::Result<()> {
    let options = Options::from(cli);

    let file = File::open(&cli.archive)?;
    let source = ZipArchiveSource::open(file)?;
    let archive: Rc<RefCell<dyn ArchiveSource>> = Rc::new(RefCell::new(source));

    let tree = Tree::build(archive, &options)?;
    let query = tree.query();

    println!("archive:     {}", cli.archive.display());
    println!("nodes:       {}", query.node_count());
    println!("512B blocks: {}", query.block_count());
    if let Some(mount_point) = &cli.mount_point {
        println!("mount point: {} (not mounted; this demo only builds the tree)", mount_point.display());
    }

    Ok(())
}
