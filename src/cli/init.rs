//! `broadside init`: a starter configuration, optionally with a `.env`.

use anyhow::Result;
use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::cli::secrets::{SECRETS_FILE, SECRET_REF_PREFIX};

const DEFAULT_CONFIG: &str = r#"{
  "baseUrl": "https://httpbin.org",
  "peakUsers": 10,
  "requests": [
    {
      "name": "Get anything",
      "method": "GET",
      "endpoint": "/get",
      "testTypes": ["smoke", "load"],
      "queryParams": { "source": "broadside" },
      "expectedStatus": 200,
      "thresholds": {
        "http_req_duration": ["p(95)<500"],
        "http_req_failed": ["rate<0.01"]
      }
    },
    {
      "name": "Post payload",
      "method": "POST",
      "endpoint": "/post",
      "testTypes": ["smoke"],
      "payload": { "hello": "world" },
      "headers": { "X-Request-Source": "broadside" }
    }
  ]
}
"#;

/// Secret the starter config references when a `.env` is written with it.
const STARTER_SECRET: &str = "API_TOKEN";

const DEFAULT_SECRETS: &str = r#"# Secrets for authToken values of the form "env:NAME".
# Variables already set in the environment take precedence.
API_TOKEN=change-me
"#;

/// The starter config only references a secret when the `.env` defining it
/// is written too, so it loads either way.
fn starter_config(with_secrets: bool) -> Result<String> {
    let mut config: Value = serde_json::from_str(DEFAULT_CONFIG)?;
    if with_secrets {
        if let Some(request) = config.pointer_mut("/requests/1").and_then(Value::as_object_mut) {
            request.insert(
                "authToken".to_string(),
                Value::from(format!("{}{}", SECRET_REF_PREFIX, STARTER_SECRET)),
            );
        }
    }
    Ok(serde_json::to_string_pretty(&config)? + "\n")
}

/// Write a starter configuration, and optionally a `.env` next to it.
pub fn run_init(output: Option<&Path>, with_secrets: bool) -> Result<()> {
    let config_path = output.unwrap_or(Path::new("config.json"));

    if config_path.exists() {
        anyhow::bail!(
            "File already exists: {:?}. Remove it first or choose a different output path.",
            config_path
        );
    }

    // Create parent directories if needed
    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    fs::write(config_path, starter_config(with_secrets)?)?;
    println!("✓ Created {}", config_path.display());

    if with_secrets {
        let secrets_path = config_path
            .parent()
            .unwrap_or(Path::new(""))
            .join(SECRETS_FILE);
        if !secrets_path.exists() {
            fs::write(&secrets_path, DEFAULT_SECRETS)?;
            println!("✓ Created {}", secrets_path.display());
        }
    }

    println!("\nRun your tests with:");
    println!("  broadside run {}", config_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::{self, LoadOptions};
    use tempfile::TempDir;

    #[test]
    fn test_run_init_creates_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        run_init(Some(&config_path), false).unwrap();

        assert!(config_path.exists());
        assert!(!temp_dir.path().join(SECRETS_FILE).exists());
        let content = fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("\"baseUrl\""));
    }

    #[test]
    fn test_run_init_with_secrets() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.json");

        run_init(Some(&config_path), true).unwrap();

        assert!(config_path.exists());
        assert!(temp_dir.path().join("nested").join(SECRETS_FILE).exists());
    }

    #[test]
    fn test_run_init_fails_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        fs::write(&config_path, "existing content").unwrap();

        let result = run_init(Some(&config_path), false);
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&config_path).unwrap(), "existing content");
    }

    #[test]
    fn test_starter_config_loads_without_secrets_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        run_init(Some(&config_path), false).unwrap();

        let loaded = config::load(&config_path, LoadOptions { strict: true }).unwrap();
        assert_eq!(loaded.config.requests.len(), 2);
        assert!(loaded.warnings.is_empty());
        assert!(loaded.config.requests.iter().all(|r| r.auth_token.is_empty()));
    }

    #[test]
    fn test_starter_config_with_secrets_references_env_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        run_init(Some(&config_path), true).unwrap();

        let loaded = config::load(&config_path, LoadOptions { strict: true }).unwrap();
        assert_eq!(loaded.config.requests[1].auth_token, "env:API_TOKEN");
        assert!(loaded.secrets.get(STARTER_SECRET).is_some());
    }
}
