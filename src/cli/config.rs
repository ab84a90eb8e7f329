//! Request catalogue: the configuration file, its schema and validation.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::cli::secrets::{Secrets, SECRET_REF_PREFIX};
use crate::error::{Error, Result};

/// Test profiles understood by the load generator. Each one implies its own
/// virtual-user ramp, owned by the load-test script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Smoke,
    Load,
    Stress,
    Spike,
    Soak,
}

impl TestType {
    pub const ALL: [TestType; 5] = [
        TestType::Smoke,
        TestType::Load,
        TestType::Stress,
        TestType::Spike,
        TestType::Soak,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Smoke => "smoke",
            TestType::Load => "load",
            TestType::Stress => "stress",
            TestType::Spike => "spike",
            TestType::Soak => "soak",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(token))
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 5] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(token))
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One API request to put under load.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestDef {
    /// Human-readable name, also used to derive artifact file names
    pub name: String,
    /// HTTP method (GET, POST, PUT, DELETE, PATCH)
    pub method: HttpMethod,
    /// Path appended to the base URL
    pub endpoint: String,
    /// Test profiles to run, in order (smoke, load, stress, spike, soak)
    #[serde(default = "default_test_types")]
    pub test_types: Vec<String>,
    /// Request body fields
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    /// Literal bearer token, or `env:NAME` to read it from the secrets
    #[serde(default)]
    pub auth_token: String,
    /// Pass/fail thresholds forwarded to the load generator (metric -> expressions)
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,
    /// Optional data file forwarded to the load generator
    #[serde(default)]
    pub data_file: String,
}

impl RequestDef {
    /// Known test types in declaration order (first occurrence wins) and the
    /// tokens that were not recognised.
    pub fn resolve_test_types(&self) -> (Vec<TestType>, Vec<String>) {
        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for token in &self.test_types {
            match TestType::parse(token) {
                Some(t) if !known.contains(&t) => known.push(t),
                Some(_) => {}
                None => unknown.push(token.clone()),
            }
        }
        (known, unknown)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// API base URL, e.g. https://test-api.k6.io
    pub base_url: String,
    /// Expected peak of concurrent users; test profiles scale from it
    pub peak_users: u32,
    pub requests: Vec<RequestDef>,
}

fn default_test_types() -> Vec<String> {
    vec![TestType::Smoke.as_str().to_string()]
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_expected_status() -> u16 {
    200
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ConfigFormat::Yaml
            }
            _ => ConfigFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Reject unknown test types instead of dropping them with a warning
    pub strict: bool,
}

/// A validated configuration together with the secrets it was checked against.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: Configuration,
    pub secrets: Secrets,
    pub warnings: Vec<String>,
}

/// Read, parse and validate a configuration file.
///
/// The secrets file is read from the configuration's directory before
/// validation so `env:` token references can be checked.
pub fn load(path: &Path, options: LoadOptions) -> Result<LoadedConfig> {
    if !path.is_file() {
        return Err(Error::ConfigNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let secrets = Secrets::load(dir)?;

    let (config, warnings) = parse(&content, ConfigFormat::from_path(path), &secrets, options)
        .map_err(|e| match e {
            Error::ConfigMalformed { reason, .. } => Error::ConfigMalformed {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;

    for warning in &warnings {
        tracing::warn!(config = %path.display(), "{}", warning);
    }

    Ok(LoadedConfig {
        path: path.to_path_buf(),
        config,
        secrets,
        warnings,
    })
}

/// Parse and validate configuration text. Returns the configuration and any
/// non-fatal warnings.
pub fn parse(
    content: &str,
    format: ConfigFormat,
    secrets: &Secrets,
    options: LoadOptions,
) -> Result<(Configuration, Vec<String>)> {
    let mut raw: Value = match format {
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
    }
    .map_err(|reason| Error::ConfigMalformed {
        path: PathBuf::new(),
        reason,
    })?;

    let mut problems = Vec::new();
    check_schema(&mut raw, &mut problems);
    if !problems.is_empty() {
        return Err(Error::ConfigInvalid(problems));
    }

    let config: Configuration =
        serde_json::from_value(raw).map_err(|e| Error::ConfigInvalid(vec![e.to_string()]))?;

    let mut warnings = Vec::new();
    for (idx, request) in config.requests.iter().enumerate() {
        let (known, unknown) = request.resolve_test_types();
        for token in &unknown {
            let msg = format!(
                "requests[{}] '{}': unknown test type '{}' (expected one of smoke, load, stress, spike, soak)",
                idx, request.name, token
            );
            if options.strict {
                problems.push(msg);
            } else {
                warnings.push(format!("{}; dropped", msg));
            }
        }
        if known.is_empty() {
            let msg = format!(
                "requests[{}] '{}': no valid test types; the request will be skipped",
                idx, request.name
            );
            if options.strict {
                problems.push(msg);
            } else {
                warnings.push(msg);
            }
        }
        if let Some(name) = request.auth_token.strip_prefix(SECRET_REF_PREFIX) {
            if secrets.get(name).is_none() {
                problems.push(format!(
                    "requests[{}] '{}': authToken references secret '{}' which is not defined in .env or the environment",
                    idx, request.name, name
                ));
            }
        }
    }

    if !problems.is_empty() {
        return Err(Error::ConfigInvalid(problems));
    }
    Ok((config, warnings))
}

fn check_schema(raw: &mut Value, problems: &mut Vec<String>) {
    let Some(root) = raw.as_object_mut() else {
        problems.push("top level must be an object".to_string());
        return;
    };

    match root.get("baseUrl") {
        None => problems.push("missing required field 'baseUrl'".to_string()),
        Some(Value::String(url)) => {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                problems.push(format!("baseUrl '{}' must start with http:// or https://", url));
            }
        }
        Some(_) => problems.push("'baseUrl' must be a string".to_string()),
    }

    match root.get("peakUsers") {
        None => problems.push("missing required field 'peakUsers'".to_string()),
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 && n <= u32::MAX as u64 => {}
            _ => problems.push(format!("'peakUsers' must be an integer >= 1, got {}", v)),
        },
    }

    match root.get_mut("requests") {
        None => problems.push("missing required field 'requests'".to_string()),
        Some(Value::Array(requests)) if requests.is_empty() => {
            problems.push("'requests' must contain at least one request".to_string())
        }
        Some(Value::Array(requests)) => {
            for (idx, request) in requests.iter_mut().enumerate() {
                check_request(idx, request, problems);
            }
        }
        Some(_) => problems.push("'requests' must be an array".to_string()),
    }
}

fn check_request(idx: usize, raw: &mut Value, problems: &mut Vec<String>) {
    let Some(request) = raw.as_object_mut() else {
        problems.push(format!("requests[{}] must be an object", idx));
        return;
    };

    for field in ["name", "endpoint"] {
        match request.get(field) {
            None => problems.push(format!("requests[{}]: missing required field '{}'", idx, field)),
            Some(Value::String(s)) if s.trim().is_empty() => {
                problems.push(format!("requests[{}]: '{}' must not be empty", idx, field))
            }
            Some(Value::String(_)) => {}
            Some(_) => problems.push(format!("requests[{}]: '{}' must be a string", idx, field)),
        }
    }

    match request.get("method").cloned() {
        None => problems.push(format!("requests[{}]: missing required field 'method'", idx)),
        Some(Value::String(method)) => match HttpMethod::parse(&method) {
            Some(m) => {
                request.insert("method".to_string(), Value::String(m.as_str().to_string()));
            }
            None => problems.push(format!(
                "requests[{}]: unsupported method '{}' (expected GET, POST, PUT, DELETE or PATCH)",
                idx, method
            )),
        },
        Some(_) => problems.push(format!("requests[{}]: 'method' must be a string", idx)),
    }

    if let Some(types) = request.get("testTypes") {
        match types.as_array() {
            Some(items) if items.iter().all(Value::is_string) => {}
            _ => problems.push(format!(
                "requests[{}]: 'testTypes' must be an array of strings",
                idx
            )),
        }
    }

    if let Some(payload) = request.get("payload") {
        if !payload.is_object() {
            problems.push(format!("requests[{}]: 'payload' must be an object", idx));
        }
    }

    for field in ["headers", "queryParams"] {
        if let Some(map) = request.get_mut(field) {
            match map.as_object_mut() {
                Some(entries) => {
                    for (key, value) in entries.iter_mut() {
                        match value {
                            Value::String(_) => {}
                            Value::Number(_) | Value::Bool(_) => {
                                *value = Value::String(value.to_string());
                            }
                            _ => problems.push(format!(
                                "requests[{}]: {}.{} must be a string",
                                idx, field, key
                            )),
                        }
                    }
                }
                None => problems.push(format!("requests[{}]: '{}' must be an object", idx, field)),
            }
        }
    }

    for field in ["contentType", "authToken", "dataFile"] {
        if let Some(value) = request.get(field) {
            if !value.is_string() {
                problems.push(format!("requests[{}]: '{}' must be a string", idx, field));
            }
        }
    }

    if let Some(status) = request.get("expectedStatus") {
        match status.as_u64() {
            Some(code) if (100..=599).contains(&code) => {}
            _ => problems.push(format!(
                "requests[{}]: 'expectedStatus' must be an HTTP status code, got {}",
                idx, status
            )),
        }
    }

    if let Some(thresholds) = request.get("thresholds") {
        let valid = thresholds.as_object().is_some_and(|rules| {
            rules.values().all(|exprs| {
                exprs
                    .as_array()
                    .is_some_and(|items| items.iter().all(Value::is_string))
            })
        });
        if !valid {
            problems.push(format!(
                "requests[{}]: 'thresholds' must map metric names to arrays of expressions",
                idx
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::schema_for;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"{
        "baseUrl": "https://test-api.k6.io",
        "peakUsers": 20,
        "requests": [
            { "name": "List crocodiles", "method": "GET", "endpoint": "/public/crocodiles/" }
        ]
    }"#;

    fn no_secrets() -> Secrets {
        Secrets::default()
    }

    fn parse_json(content: &str) -> Result<(Configuration, Vec<String>)> {
        parse(content, ConfigFormat::Json, &no_secrets(), LoadOptions::default())
    }

    fn problems_of(err: Error) -> Vec<String> {
        match err {
            Error::ConfigInvalid(problems) => problems,
            other => panic!("expected ConfigInvalid, got {:?}", other),
        }
    }

    #[test]
    fn test_config_schema() {
        let schema = schema_for!(Configuration);
        let schema_json = serde_json::to_string(&schema).unwrap();
        assert!(schema_json.contains("baseUrl"));
        assert!(schema_json.contains("peakUsers"));
        assert!(schema_json.contains("testTypes"));
    }

    #[test]
    fn test_config_defaults() {
        let (config, warnings) = parse_json(MINIMAL).unwrap();
        assert!(warnings.is_empty());
        let request = &config.requests[0];
        assert_eq!(config.peak_users, 20);
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.test_types, vec!["smoke".to_string()]);
        assert_eq!(request.content_type, "application/json");
        assert_eq!(request.expected_status, 200);
        assert!(request.payload.is_empty());
        assert!(request.headers.is_empty());
        assert!(request.auth_token.is_empty());
    }

    #[test]
    fn test_config_all_fields() {
        let json = r#"{
            "baseUrl": "https://api.example.com",
            "peakUsers": 50,
            "requests": [{
                "name": "Create order",
                "method": "post",
                "endpoint": "/orders",
                "testTypes": ["load", "stress"],
                "payload": { "sku": "A-1", "qty": 2 },
                "contentType": "application/x-www-form-urlencoded",
                "headers": { "X-Tenant": "acme", "X-Retry": 3 },
                "queryParams": { "dryRun": "true" },
                "expectedStatus": 201,
                "authToken": "literal-token",
                "thresholds": { "http_req_duration": ["p(95)<500"] },
                "dataFile": "orders.csv"
            }]
        }"#;
        let (config, _) = parse_json(json).unwrap();
        let request = &config.requests[0];
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.payload["qty"], 2);
        assert_eq!(request.headers["X-Retry"], "3");
        assert_eq!(request.query_params["dryRun"], "true");
        assert_eq!(request.expected_status, 201);
        assert_eq!(request.thresholds["http_req_duration"], vec!["p(95)<500"]);
        assert_eq!(request.data_file, "orders.csv");
        assert_eq!(
            request.resolve_test_types().0,
            vec![TestType::Load, TestType::Stress]
        );
    }

    #[test]
    fn test_config_yaml() {
        let yaml = r#"
baseUrl: https://api.example.com
peakUsers: 5
requests:
  - name: health
    method: GET
    endpoint: /health
    testTypes: [smoke, soak]
"#;
        let (config, _) =
            parse(yaml, ConfigFormat::Yaml, &no_secrets(), LoadOptions::default()).unwrap();
        assert_eq!(config.requests[0].test_types, vec!["smoke", "soak"]);
    }

    #[test]
    fn test_malformed_json() {
        let err = parse_json("{ \"baseUrl\": ").unwrap_err();
        assert!(matches!(err, Error::ConfigMalformed { .. }));
    }

    #[test]
    fn test_missing_requests_is_invalid() {
        let err = parse_json(r#"{ "baseUrl": "https://x.io", "peakUsers": 1 }"#).unwrap_err();
        let problems = problems_of(err);
        assert!(problems.iter().any(|p| p.contains("'requests'")));
    }

    #[test]
    fn test_all_problems_collected() {
        let json = r#"{
            "peakUsers": 0,
            "requests": [
                { "name": "a", "method": "TRACE" },
                { "method": "GET", "endpoint": "/b", "expectedStatus": 42 }
            ]
        }"#;
        let problems = problems_of(parse_json(json).unwrap_err());
        assert!(problems.iter().any(|p| p.contains("baseUrl")));
        assert!(problems.iter().any(|p| p.contains("peakUsers")));
        assert!(problems.iter().any(|p| p.contains("TRACE")));
        assert!(problems.iter().any(|p| p.contains("requests[0]: missing required field 'endpoint'")));
        assert!(problems.iter().any(|p| p.contains("requests[1]: missing required field 'name'")));
        assert!(problems.iter().any(|p| p.contains("expectedStatus")));
    }

    #[test]
    fn test_wrong_types_rejected() {
        let json = r#"{
            "baseUrl": "https://x.io",
            "peakUsers": "many",
            "requests": [{ "name": "a", "method": "GET", "endpoint": "/", "testTypes": "smoke", "payload": [1] }]
        }"#;
        let problems = problems_of(parse_json(json).unwrap_err());
        assert!(problems.iter().any(|p| p.contains("peakUsers")));
        assert!(problems.iter().any(|p| p.contains("testTypes")));
        assert!(problems.iter().any(|p| p.contains("payload")));
    }

    #[test]
    fn test_unknown_test_types_dropped_with_warning() {
        let json = r#"{
            "baseUrl": "https://x.io",
            "peakUsers": 3,
            "requests": [{ "name": "a", "method": "GET", "endpoint": "/", "testTypes": ["smoke", "chaos", "Load", "smoke"] }]
        }"#;
        let (config, warnings) = parse_json(json).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("chaos"));
        let (known, unknown) = config.requests[0].resolve_test_types();
        assert_eq!(known, vec![TestType::Smoke, TestType::Load]);
        assert_eq!(unknown, vec!["chaos".to_string()]);
    }

    #[test]
    fn test_unknown_test_types_strict() {
        let json = r#"{
            "baseUrl": "https://x.io",
            "peakUsers": 3,
            "requests": [{ "name": "a", "method": "GET", "endpoint": "/", "testTypes": ["chaos"] }]
        }"#;
        let err = parse(
            json,
            ConfigFormat::Json,
            &no_secrets(),
            LoadOptions { strict: true },
        )
        .unwrap_err();
        assert_eq!(problems_of(err).len(), 2);
    }

    #[test]
    fn test_request_without_valid_types_warns() {
        let json = r#"{
            "baseUrl": "https://x.io",
            "peakUsers": 3,
            "requests": [{ "name": "a", "method": "GET", "endpoint": "/", "testTypes": [] }]
        }"#;
        let (_, warnings) = parse_json(json).unwrap();
        assert!(warnings.iter().any(|w| w.contains("will be skipped")));
    }

    #[test]
    fn test_secret_reference_must_exist() {
        let json = r#"{
            "baseUrl": "https://x.io",
            "peakUsers": 3,
            "requests": [{ "name": "a", "method": "GET", "endpoint": "/", "authToken": "env:STAGING_TOKEN" }]
        }"#;
        let problems = problems_of(parse_json(json).unwrap_err());
        assert!(problems[0].contains("STAGING_TOKEN"));

        let secrets = Secrets::new(HashMap::from([(
            "STAGING_TOKEN".to_string(),
            "s3cr3t".to_string(),
        )]));
        assert!(parse(json, ConfigFormat::Json, &secrets, LoadOptions::default()).is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/config.json"), LoadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(_)));
    }

    #[test]
    fn test_load_reads_secrets_next_to_config() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(dir.path().join(".env"), "BROADSIDE_LOAD_TOKEN='abc'\n").unwrap();
        std::fs::write(
            &config_path,
            r#"{
                "baseUrl": "https://x.io",
                "peakUsers": 1,
                "requests": [{ "name": "a", "method": "GET", "endpoint": "/", "authToken": "env:BROADSIDE_LOAD_TOKEN" }]
            }"#,
        )
        .unwrap();
        let loaded = load(&config_path, LoadOptions::default()).unwrap();
        assert_eq!(loaded.secrets.get("BROADSIDE_LOAD_TOKEN"), Some("abc"));
    }

    #[test]
    fn test_load_malformed_reports_path() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "not json").unwrap();
        match load(&config_path, LoadOptions::default()).unwrap_err() {
            Error::ConfigMalformed { path, .. } => assert_eq!(path, config_path),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("c.yaml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("c.YML")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("c.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("config")), ConfigFormat::Json);
    }
}
