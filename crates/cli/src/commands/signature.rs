// Config signature command

use std::path::Path;

use anyhow::{Context, Result};
use crawlfleet_pool::WorkerConfig;
use serde::Serialize;

use crate::output::{print_field, OutputFormat};

#[derive(Debug, Serialize)]
struct SignatureReport {
    signature: String,
    config: WorkerConfig,
}

/// Read a worker config from a JSON or YAML file
pub fn load_config(path: &Path) -> Result<WorkerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    if is_yaml {
        serde_yaml::from_str(&content).context("Failed to parse YAML worker config")
    } else {
        serde_json::from_str(&content).context("Failed to parse JSON worker config")
    }
}

pub fn run(file: &Path, output: OutputFormat) -> Result<()> {
    let config = load_config(file)?;
    let report = SignatureReport {
        signature: config.signature().to_string(),
        config,
    };

    if !output.is_text() {
        return output.print_value(&report);
    }

    print_field("Signature", &report.signature);
    print_field("Browser", &report.config.browser_type);
    print_field("Headless", &report.config.headless.to_string());
    if let Some(user_agent) = &report.config.user_agent {
        print_field("User agent", user_agent);
    }
    if let Some(proxy) = &report.config.proxy {
        print_field("Proxy", proxy);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_and_yaml_agree() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("worker.json");
        let yaml_path = dir.path().join("worker.yaml");

        std::fs::write(
            &json_path,
            r#"{"user_agent": "bot/1.0", "env": {"B": "2", "A": "1"}}"#,
        )
        .unwrap();
        std::fs::write(&yaml_path, "env:\n  A: \"1\"\n  B: \"2\"\nuser_agent: bot/1.0\n").unwrap();

        let from_json = load_config(&json_path).unwrap();
        let from_yaml = load_config(&yaml_path).unwrap();
        assert_eq!(from_json.signature(), from_yaml.signature());
        assert_eq!(from_json.browser_type, "chromium");
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = load_config(Path::new("/nonexistent/worker.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read file"));
    }
}
