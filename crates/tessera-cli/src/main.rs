use anyhow::Context;
use tessera_cli::{register_builtin_commands, CommandRegistry};
use tessera_core::logging::setup_logging;
use tessera_core::settings_loader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut registry = CommandRegistry::new();
    register_builtin_commands(&mut registry);
    let matches = registry.build_cli().get_matches();

    let settings = match matches.get_one::<String>("settings") {
        Some(path) => settings_loader::from_file_with_env(path)
            .with_context(|| format!("loading settings from {path}"))?,
        None => settings_loader::from_env().context("loading settings from the environment")?,
    };
    setup_logging(&settings);

    registry.execute(&matches, &settings).await?;
    Ok(())
}
