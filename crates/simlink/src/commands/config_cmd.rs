//! Config subcommand handlers.

use std::path::Path;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

/// Serialize config to TOML and write it to `path`.
fn save_config(cfg: &Config, path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config::config_path(global);

    match args.command {
        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config(&path)?;
            let format = config::output_format(global, &cfg)?;
            let text = toml::to_string_pretty(&cfg)?;
            let out = output::render_single(format, &cfg, |_| text.trim_end().to_owned())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            save_config(&Config::default(), &path)?;
            if !global.quiet {
                eprintln!("✓ Configuration written to {}", path.display());
            }
            Ok(())
        }
    }
}
