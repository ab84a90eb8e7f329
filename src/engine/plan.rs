//! Expands a validated configuration into the ordered list of runs.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::cli::config::{Configuration, HttpMethod, TestType};
use crate::cli::secrets::{Secrets, SECRET_REF_PREFIX};
use crate::error::{Error, Result};
use crate::utils::slugify;

/// One fully parameterised unit of work: a request under one test type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSpec {
    pub request_name: String,
    pub method: HttpMethod,
    pub base_url: String,
    pub endpoint: String,
    #[serde(skip)]
    pub resolved_auth_token: String,
    pub payload: Map<String, Value>,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    pub expected_status: u16,
    pub thresholds: BTreeMap<String, Vec<String>>,
    pub data_file: String,
    pub test_type: TestType,
    pub peak_users: u32,
    /// Artifact file stem, unique within a plan
    pub base_name: String,
}

impl RunSpec {
    pub fn label(&self) -> String {
        format!("{} ({} {})", self.request_name, self.method, self.test_type)
    }

    pub fn results_file_name(&self) -> String {
        format!("{}-results.csv", self.base_name)
    }

    pub fn metadata_file_name(&self) -> String {
        format!("{}-metadata.json", self.base_name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRequest {
    pub request_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub runs: Vec<RunSpec>,
    pub skipped: Vec<SkippedRequest>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

/// Artifact stem for a run: `<name-slug>-<method>-<test type>`.
pub fn derive_base_name(request_name: &str, method: HttpMethod, test_type: TestType) -> String {
    let mut name = slugify(request_name);
    if name.is_empty() {
        name = "request".to_string();
    }
    format!(
        "{}-{}-{}",
        name,
        method.as_str().to_ascii_lowercase(),
        test_type.as_str()
    )
}

/// `env:NAME` reads NAME from the secrets; any other value is a literal token.
pub fn resolve_auth_token(token: &str, secrets: &Secrets) -> Result<String> {
    match token.strip_prefix(SECRET_REF_PREFIX) {
        Some(name) => secrets
            .get(name)
            .map(str::to_string)
            .ok_or_else(|| Error::ConfigInvalid(vec![format!("secret '{}' is not defined", name)])),
        None => Ok(token.to_string()),
    }
}

/// One run per request and test type, in declaration order. Fails with
/// `PlanAmbiguous` when two runs would write the same artifact files.
pub fn plan(config: &Configuration, secrets: &Secrets) -> Result<Plan> {
    let mut out = Plan::default();
    let mut seen: HashMap<String, String> = HashMap::new();

    for request in &config.requests {
        let (test_types, unknown) = request.resolve_test_types();
        for token in &unknown {
            tracing::warn!(request = %request.name, token = %token, "dropping unknown test type");
        }
        if test_types.is_empty() {
            tracing::warn!(request = %request.name, "no valid test types, skipping request");
            out.skipped.push(SkippedRequest {
                request_name: request.name.clone(),
                reason: "no valid test types".to_string(),
            });
            continue;
        }

        let auth_token = resolve_auth_token(&request.auth_token, secrets)?;

        for test_type in test_types {
            let spec = RunSpec {
                request_name: request.name.clone(),
                method: request.method,
                base_url: config.base_url.clone(),
                endpoint: request.endpoint.clone(),
                resolved_auth_token: auth_token.clone(),
                payload: request.payload.clone(),
                content_type: request.content_type.clone(),
                headers: request.headers.clone(),
                query_params: request.query_params.clone(),
                expected_status: request.expected_status,
                thresholds: request.thresholds.clone(),
                data_file: request.data_file.clone(),
                test_type,
                peak_users: config.peak_users,
                base_name: derive_base_name(&request.name, request.method, test_type),
            };

            if let Some(first) = seen.get(&spec.base_name) {
                return Err(Error::PlanAmbiguous {
                    base_name: spec.base_name.clone(),
                    first: first.clone(),
                    second: spec.label(),
                });
            }
            seen.insert(spec.base_name.clone(), spec.label());
            out.runs.push(spec);
        }
    }

    Ok(out)
}
