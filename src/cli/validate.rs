use anyhow::Result;
use std::path::Path;

use crate::cli::config::{self, LoadOptions};
use crate::engine::executor::tool_env;
use crate::engine::plan::{self, Plan};

const MASK: &str = "********";

/// Validate a configuration file and show what would run, without running it.
/// Checks for:
/// - well-formed JSON/YAML
/// - schema problems (all of them, not just the first)
/// - unresolved `env:` auth tokens
/// - artifact name collisions between runs
pub fn run_validate(config_path: &Path, strict: bool) -> Result<Plan> {
    println!("Validating {}...", config_path.display());

    let loaded = match config::load(config_path, LoadOptions { strict }) {
        Ok(loaded) => loaded,
        Err(e) => {
            println!("  ✗ {}", e);
            return Err(e.into());
        }
    };
    println!("  ✓ Configuration parsed");
    println!("    baseUrl: {}", loaded.config.base_url);
    println!("    peakUsers: {}", loaded.config.peak_users);
    println!("    requests: {}", loaded.config.requests.len());
    if !loaded.secrets.is_empty() {
        println!("    secrets available: {}", loaded.secrets.len());
    }
    for warning in &loaded.warnings {
        println!("  ⚠ {}", warning);
    }

    let plan = match plan::plan(&loaded.config, &loaded.secrets) {
        Ok(plan) => plan,
        Err(e) => {
            println!("  ✗ {}", e);
            return Err(e.into());
        }
    };
    println!("  ✓ Plan: {} run(s)", plan.runs.len());
    for (i, spec) in plan.runs.iter().enumerate() {
        println!("    {:>3}. {:<40} -> {}", i + 1, spec.label(), spec.base_name);
    }
    for skipped in &plan.skipped {
        println!("  ⚠ skipped '{}': {}", skipped.request_name, skipped.reason);
    }

    Ok(plan)
}

/// Print the parameter mapping each run hands to the load generator.
/// Auth tokens are masked.
pub fn run_plan(config_path: &Path, strict: bool, results_dir: &str) -> Result<()> {
    let loaded = config::load(config_path, LoadOptions { strict })?;
    let plan = plan::plan(&loaded.config, &loaded.secrets)?;

    for spec in &plan.runs {
        println!("# {}", spec.label());
        for (key, value) in masked_env(&tool_env(spec, results_dir)) {
            println!("{}={}", key, value);
        }
        println!();
    }
    Ok(())
}

fn masked_env(env: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
    env.iter()
        .map(|(key, value)| {
            if *key == "AUTH_TOKEN" && !value.is_empty() {
                (*key, MASK.to_string())
            } else {
                (*key, value.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const VALID_CONFIG: &str = r#"{
    "baseUrl": "https://api.example.com",
    "peakUsers": 10,
    "requests": [
        { "name": "Users", "method": "GET", "endpoint": "/users", "testTypes": ["smoke", "load"] },
        { "name": "Orders", "method": "POST", "endpoint": "/orders", "authToken": "env:API_TOKEN" }
    ]
}"#;

    #[test]
    fn test_validate_valid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(&config_path, VALID_CONFIG).unwrap();
        fs::write(temp_dir.path().join(".env"), "API_TOKEN=secret\n").unwrap();

        let plan = run_validate(&config_path, false).unwrap();
        assert_eq!(plan.runs.len(), 3);
        assert_eq!(plan.runs[2].resolved_auth_token, "secret");
    }

    #[test]
    fn test_validate_missing_file() {
        let path = Path::new("/nonexistent/config.json");
        assert!(run_validate(path, false).is_err());
    }

    #[test]
    fn test_validate_yaml_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            "baseUrl: https://api.example.com\npeakUsers: 5\nrequests:\n  - name: Health\n    method: GET\n    endpoint: /health\n",
        )
        .unwrap();

        let plan = run_validate(&config_path, false).unwrap();
        assert_eq!(plan.runs[0].base_name, "health-get-smoke");
    }

    #[test]
    fn test_validate_strict_rejects_unknown_test_type() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(
            &config_path,
            r#"{ "baseUrl": "https://x.io", "peakUsers": 1,
                 "requests": [{ "name": "A", "method": "GET", "endpoint": "/a", "testTypes": ["smoke", "chaos"] }] }"#,
        )
        .unwrap();

        assert_eq!(run_validate(&config_path, false).unwrap().runs.len(), 1);
        assert!(run_validate(&config_path, true).is_err());
    }

    #[test]
    fn test_validate_detects_collisions() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(
            &config_path,
            r#"{ "baseUrl": "https://x.io", "peakUsers": 1, "requests": [
                 { "name": "List users", "method": "GET", "endpoint": "/a" },
                 { "name": "List  Users!", "method": "GET", "endpoint": "/b" } ] }"#,
        )
        .unwrap();

        let err = run_validate(&config_path, false).unwrap_err();
        assert!(err.to_string().contains("list_users-get-smoke"));
    }

    #[test]
    fn test_masked_env_hides_token_only() {
        let env = vec![
            ("AUTH_TOKEN", "secret".to_string()),
            ("BASE_URL", "https://x.io".to_string()),
        ];
        let masked = masked_env(&env);
        assert_eq!(masked[0].1, MASK);
        assert_eq!(masked[1].1, "https://x.io");
        assert_eq!(masked_env(&[("AUTH_TOKEN", String::new())])[0].1, "");
    }
}
