#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use reproxy::server;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "reproxy",
    version,
    about = "Configuration-driven HTTP reverse proxy and request router"
)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "config/config.yaml")]
    config: PathBuf,
}

fn print_banner() {
    println!(
        r#"
  _____  ______ _____  _____   ______   ____     __
 |  __ \|  ____|  __ \|  __ \ / __ \ \ / /\ \   / /
 | |__) | |__  | |__) | |__) | |  | \ V /  \ \_/ /
 |  _  /|  __| |  ___/|  _  /| |  | |> <    \   /
 | | \ \| |____| |    | | \ \| |__| / . \    | |
 |_|  \_\______|_|    |_|  \_\\____/_/ \_\   |_|"#
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    print_banner();

    let worker_threads = server::runtime::worker_thread_count();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
    }))
}
