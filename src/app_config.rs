use std::path::PathBuf;

use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: Option<String>,
}

impl SmtpConfig {
    pub fn sender(&self) -> &str {
        self.from.as_deref().unwrap_or(&self.user)
    }
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Palette {
    pub primary: String,
    pub background: String,
    pub text: String,
    pub line_soft: String,
    pub line_strong: String,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            primary: "#001847".to_string(),
            background: "#F9FAFB".to_string(),
            text: "#111827".to_string(),
            line_soft: "#93C5FD".to_string(),
            line_strong: "#1E3A8A".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub table: String,
    pub utc_offset_hours: i32,
    pub logo_path: Option<PathBuf>,
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub palette: Palette,
}

impl AppConfig {
    /// Defaults, then an optional `pendency-report` config file, then
    /// `REPORT_*` environment variables (`__` separates nested keys).
    pub fn load() -> anyhow::Result<Self> {
        let settings = Config::builder()
            .set_default("table", "cubo_documentos")?
            .set_default("utc_offset_hours", -3)?
            .add_source(File::with_name("pendency-report").required(false))
            .add_source(
                Environment::with_prefix("REPORT")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("failed to read configuration")?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("invalid configuration")?;
        validate_table_name(&config.table)?;
        Ok(config)
    }

    pub fn smtp(&self) -> anyhow::Result<&SmtpConfig> {
        self.smtp
            .as_ref()
            .context("SMTP settings missing; set REPORT_SMTP__SERVER, REPORT_SMTP__USER and REPORT_SMTP__PASSWORD")
    }
}

/// The table name is interpolated into SQL text, so only dotted plain
/// identifiers are accepted.
pub fn validate_table_name(table: &str) -> anyhow::Result<()> {
    let valid = !table.is_empty()
        && table.split('.').all(|part| {
            !part.is_empty()
                && !part.starts_with(|c: char| c.is_ascii_digit())
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if !valid {
        anyhow::bail!("invalid warehouse table name {table:?}");
    }
    Ok(())
}
