//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

fn main() -> eyre::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    geoload_cli::run()?;
    Ok(())
}
