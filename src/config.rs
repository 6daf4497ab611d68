//! Environment-backed configuration and the static table registry.
//!
//! Everything the tool needs at runtime is read once at startup into an
//! immutable [`AppConfig`]; components receive it by reference and never
//! touch the environment themselves.

use anyhow::{Context, Result};
use dotenv::dotenv;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

// ────────────────────────────────────────────────────────────────
// Runtime configuration
// ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// OpenAI API key used for image generation.
    pub openai_api_key: String,
    /// Path to the SQLite database file holding the gallery tables.
    pub db_path: PathBuf,

    pub ssh_host: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    pub ssh_user: String,
    pub ssh_password: String,

    /// Physical directory on the remote host that receives uploads.
    #[serde(default = "default_server_image_path")]
    pub server_image_path: String,
    /// URL prefix written back to the database, decoupled from the
    /// physical remote path.
    #[serde(default = "default_image_url_base")]
    pub image_url_base: String,

    #[serde(default = "default_image_size")]
    pub image_size: String,
    #[serde(default = "default_image_quality")]
    pub image_quality: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub default_generation_limit: Option<usize>,

    /// Local directory for generated images before upload.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_server_image_path() -> String {
    "/data/images".to_string()
}

fn default_image_url_base() -> String {
    "/images".to_string()
}

fn default_image_size() -> String {
    "512x512".to_string()
}

fn default_image_quality() -> String {
    "standard".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("generated_images")
}

impl AppConfig {
    /// Load `.env` plus the process environment into an `AppConfig`.
    ///
    /// A missing required variable is fatal here, before any pipeline
    /// work has started.
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let config: AppConfig = envy::from_env().context(
            "incomplete environment configuration \
             (OPENAI_API_KEY, DB_PATH, SSH_HOST, SSH_USER and SSH_PASSWORD are required)",
        )?;

        fs::create_dir_all(&config.output_dir).context(format!(
            "failed to create output directory {:?}",
            config.output_dir
        ))?;

        Ok(config)
    }
}

// ────────────────────────────────────────────────────────────────
// Table registry
// ────────────────────────────────────────────────────────────────

/// Selects the opening boilerplate sentence and field-rendering ruleset
/// used when building a prompt for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    WeddingDress,
    WeddingDressShop,
    WeddingHall,
    MakeupShop,
}

/// Static description of one supported table. The field list is ordered;
/// it fixes the order of sentences in the generated prompt.
#[derive(Debug, Clone, Copy)]
pub struct TableDescriptor {
    pub table: &'static str,
    pub prompt_fields: &'static [&'static str],
    pub template: PromptTemplate,
}

/// The closed set of tables this tool knows how to enrich.
pub const TABLES: &[TableDescriptor] = &[
    TableDescriptor {
        table: "tb_dress",
        prompt_fields: &[
            "name",
            "type",
            "color",
            "shape",
            "mood",
            "neck_line",
            "fabric",
            "features",
        ],
        template: PromptTemplate::WeddingDress,
    },
    TableDescriptor {
        table: "tb_dress_shop",
        prompt_fields: &["shop_name", "description", "features", "specialty"],
        template: PromptTemplate::WeddingDressShop,
    },
    TableDescriptor {
        table: "tb_wedding_hall",
        prompt_fields: &["name", "venue_type", "parking"],
        template: PromptTemplate::WeddingHall,
    },
    TableDescriptor {
        table: "tb_makeup_shop",
        prompt_fields: &["shop_name", "description", "features", "specialty"],
        template: PromptTemplate::MakeupShop,
    },
];

pub fn descriptor_for(table_name: &str) -> Option<&'static TableDescriptor> {
    TABLES.iter().find(|descriptor| descriptor.table == table_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_known_tables() {
        for descriptor in TABLES {
            let found = descriptor_for(descriptor.table).unwrap();
            assert_eq!(found.table, descriptor.table);
        }
    }

    #[test]
    fn registry_rejects_unknown_table() {
        assert!(descriptor_for("tb_florist").is_none());
    }

    #[test]
    fn dress_field_order_is_declared_order() {
        let dress = descriptor_for("tb_dress").unwrap();
        assert_eq!(dress.prompt_fields[0], "name");
        assert_eq!(dress.prompt_fields[1], "type");
        assert_eq!(dress.prompt_fields.last(), Some(&"features"));
    }
}
