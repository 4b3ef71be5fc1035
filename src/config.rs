// ⚙️ Import Configuration
//
// Sources, later ones win:
//   1. built-in defaults
//   2. config/postcode-import.{toml,yaml,json} (optional)
//   3. environment, prefix PLZ:
//        PLZ_IMPORT_PATH          directory of the .gz import files
//        PLZ_DATABASE_PATH        SQLite database file
//        PLZ_LOG_LEVEL            fallback when RUST_LOG is unset
//        PLZ_PRICE_WINDOW_MONTHS  trailing aggregation window
//        PLZ_LATEST_PRICES_ONLY   newest observation per station only

use crate::aggregation::AggregationSettings;
use crate::error::{ImportError, Result};
use crate::prices::WindowUnit;
use crate::source::ImportSource;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const CONFIG_FILE: &str = "config/postcode-import";
const ENV_PREFIX: &str = "PLZ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    pub import_path: PathBuf,
    pub database_path: PathBuf,
    /// trace, debug, info, warn, error
    pub log_level: String,
    pub price_window_months: u32,
    pub latest_prices_only: bool,
}

impl From<ConfigError> for ImportError {
    fn from(e: ConfigError) -> Self {
        ImportError::Config(e.to_string())
    }
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("import_path", ".")?
        .set_default("database_path", "postcode.db")?
        .set_default("log_level", "info")?
        .set_default("price_window_months", 1)?
        .set_default("latest_prices_only", false)
}

impl ImportConfig {
    /// Load configuration from defaults, config file and environment
    pub fn load() -> Result<Self> {
        let builder = with_defaults(config::Config::builder())?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            // PLZ_IMPORT_PATH -> import_path
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true),
            );

        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: ImportConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.price_window_months == 0 {
            return Err(ImportError::Config(
                "price_window_months must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn import_source(&self) -> ImportSource {
        ImportSource::new(&self.import_path)
    }

    pub fn aggregation_settings(&self) -> AggregationSettings {
        AggregationSettings {
            window_size: self.price_window_months,
            window_unit: WindowUnit::Month,
            latest_only: self.latest_prices_only,
        }
    }
}
