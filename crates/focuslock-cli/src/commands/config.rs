use std::collections::BTreeMap;

use clap::Subcommand;
use focuslock_core::Config;

use crate::host::print_json;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print one value by dotted key (e.g. "session.focus_minutes")
    Get { key: String },
    /// Validate and save one value by dotted key
    Set { key: String, value: String },
    /// Print every key with its value as JSON
    List,
    /// Overwrite the config file with defaults
    Reset,
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Get { key } => match Config::load()?.get(&key) {
            Some(value) => println!("{value}"),
            None => {
                eprintln!("unknown key: {key}");
                std::process::exit(1);
            }
        },
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            tracing::info!(%key, %value, "config updated");
            let stored = config.get(&key).unwrap_or(value);
            print_json(&BTreeMap::from([(key, stored)]))?;
        }
        ConfigAction::List => {
            let entries: BTreeMap<String, String> = Config::load()?.entries().into_iter().collect();
            print_json(&entries)?;
        }
        ConfigAction::Reset => {
            let config = Config::default();
            config.save()?;
            print_json(&config)?;
        }
    }
    Ok(())
}
