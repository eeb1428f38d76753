//! Init command implementation
//!
//! This module implements the `init` command, which writes a sample
//! `veil.toml` and a starter rule file.

use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "veil.toml";
const RULES_FILE: &str = "rules.json";

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to write the files into
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Overwrite existing files
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        tracing::info!(output = %self.output.display(), "Initializing configuration files");

        println!("📝 Initializing Veil configuration");
        println!();

        let config_path = self.output.join(CONFIG_FILE);
        let rules_path = self.output.join(RULES_FILE);

        for path in [&config_path, &rules_path] {
            if path.exists() && !self.force {
                println!("❌ File already exists: {}", path.display());
                println!("   Use --force to overwrite");
                return Ok(2);
            }
        }

        if let Err(e) = write_files(&self.output, &config_path, &rules_path) {
            println!("❌ Failed to write configuration files");
            println!("   Error: {e}");
            return Ok(5);
        }

        println!("✅ Configuration file created: {}", config_path.display());
        println!("✅ Rule file created: {}", rules_path.display());
        println!();
        println!("Next steps:");
        println!("  1. Edit {} to match your data", rules_path.display());
        println!("  2. Set VEIL_CRYPTO_HASH_KEY, VEIL_ENCRYPT_KEY and VEIL_DATE_SHIFT_KEY");
        println!("     (a .env file next to the binary is loaded automatically)");
        println!("  3. Validate: veil --config {} validate-config", config_path.display());
        println!("  4. Run: veil bulk --input ./input --output ./output");
        println!();
        Ok(0)
    }
}

fn write_files(dir: &Path, config_path: &Path, rules_path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(config_path, sample_config())?;
    fs::write(rules_path, sample_rules())?;
    Ok(())
}

/// Sample application configuration
fn sample_config() -> &'static str {
    r#"# Veil Configuration File
# Rule-driven de-identification of FHIR and imaging-metadata records

[application]
# Log level: trace, debug, info, warn, error
log_level = "info"

[anonymization]
# Rule file, JSON or TOML
rules_file = "./rules.json"

[anonymization.audit]
enabled = false
log_path = "./audit/anonymization.log"
json_format = true

[pipeline]
# Worker tasks; defaults to the number of CPUs
# workers = 4
batch_size = 100
channel_capacity = 4
io_timeout_seconds = 30
max_retries = 3
retry_delay_ms = 1000

[logging]
local_enabled = false
local_path = "./logs"
# Rotation: daily, hourly, never
local_rotation = "daily"
"#
}

/// Sample rule file
fn sample_rules() -> &'static str {
    r#"{
  "rules": [
    {"path": "Resource.id", "method": "cryptoHash"},
    {"type": "Reference", "method": "cryptoHash"},
    {"type": "Identifier", "method": "cryptoHash"},
    {"type": "HumanName", "method": "redact"},
    {"type": "Address", "method": "redact"},
    {"type": "ContactPoint", "method": "redact"},
    {"type": "date", "method": "dateShift"},
    {"type": "dateTime", "method": "dateShift"},
    {"type": "instant", "method": "dateShift"},
    {"path": "Patient.extension", "method": "redact"},
    {"path": "Resource.text", "method": "redact"}
  ],
  "parameters": {
    "cryptoHashKey": "${VEIL_CRYPTO_HASH_KEY}",
    "encryptKey": "${VEIL_ENCRYPT_KEY}",
    "dateShiftKey": "${VEIL_DATE_SHIFT_KEY}",
    "dateShiftRange": 50,
    "enablePartialDatesForRedact": true,
    "addSecurityLabels": true
  },
  "processingError": "raise"
}
"#
}
