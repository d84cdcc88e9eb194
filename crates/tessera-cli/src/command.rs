//! Management command framework for tessera.
//!
//! [`ManagementCommand`] defines one CLI subcommand; [`CommandRegistry`]
//! collects commands, builds the `clap` parser and dispatches to them.
//!
//! ## Defining a Custom Command
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use tessera_cli::command::ManagementCommand;
//! use tessera_core::{Settings, TesseraResult};
//!
//! struct VersionCommand;
//!
//! #[async_trait]
//! impl ManagementCommand for VersionCommand {
//!     fn name(&self) -> &str { "version" }
//!     fn help(&self) -> &str { "Print the version" }
//!
//!     async fn handle(&self, _matches: &clap::ArgMatches, _settings: &Settings) -> TesseraResult<()> {
//!         println!("{}", env!("CARGO_PKG_VERSION"));
//!         Ok(())
//!     }
//! }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use tessera_core::{Settings, TesseraError, TesseraResult};

/// A subcommand of the `tessera` binary.
#[async_trait]
pub trait ManagementCommand: Send + Sync {
    /// The name used to invoke the command.
    fn name(&self) -> &str;

    fn help(&self) -> &str;

    /// Adds arguments to the subcommand. The default adds none.
    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd
    }

    async fn handle(&self, matches: &clap::ArgMatches, settings: &Settings) -> TesseraResult<()>;
}

/// Commands by name.
pub struct CommandRegistry {
    commands: HashMap<String, Box<dyn ManagementCommand>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Registers a command, replacing any with the same name.
    pub fn register(&mut self, command: Box<dyn ManagementCommand>) {
        let name = command.name().to_string();
        self.commands.insert(name, command);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ManagementCommand> {
        self.commands.get(name).map(AsRef::as_ref)
    }

    /// Registered names, sorted.
    pub fn list_commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Builds the top-level parser with one subcommand per registered
    /// command and the global `--settings` option.
    pub fn build_cli(&self) -> clap::Command {
        let mut app = clap::Command::new("tessera")
            .about("tessera management utility")
            .version(env!("CARGO_PKG_VERSION"))
            .subcommand_required(true)
            .arg(
                clap::Arg::new("settings")
                    .long("settings")
                    .global(true)
                    .value_name("FILE")
                    .help("Settings file (TOML or JSON)"),
            );

        let mut entries: Vec<_> = self.commands.iter().collect();
        entries.sort_by_key(|(name, _)| (*name).clone());

        for (name, cmd) in entries {
            // clap wants &'static names; commands are registered once at startup.
            let static_name: &'static str = Box::leak(name.clone().into_boxed_str());
            let subcmd = clap::Command::new(static_name).about(cmd.help().to_string());
            app = app.subcommand(cmd.add_arguments(subcmd));
        }
        app
    }

    /// Dispatches to the subcommand named in `matches`.
    pub async fn execute(&self, matches: &clap::ArgMatches, settings: &Settings) -> TesseraResult<()> {
        let (name, sub_matches) = matches.subcommand().ok_or_else(|| {
            TesseraError::ConfigurationError("No subcommand specified".to_string())
        })?;
        let cmd = self
            .get(name)
            .ok_or_else(|| TesseraError::ConfigurationError(format!("Unknown command: {name}")))?;
        cmd.handle(sub_matches, settings).await
    }
}
