//! `.env`-style secrets, loaded once and passed around as an immutable map.
//!
//! The process environment is only read, never written. Entries that are
//! already set in the process environment win over the file.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

/// File name looked up next to the configuration file.
pub const SECRETS_FILE: &str = ".env";

/// Prefix that marks an auth token as a secret reference (`env:API_TOKEN`).
pub const SECRET_REF_PREFIX: &str = "env:";

#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: HashMap<String, String>,
}

impl Secrets {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Secrets file from `dir` (if any) overlaid with the current process environment.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SECRETS_FILE);
        let mut values = if path.is_file() {
            let contents = std::fs::read_to_string(&path)?;
            let parsed = parse_secrets(&contents);
            tracing::debug!(path = %path.display(), entries = parsed.len(), "loaded secrets file");
            parsed
        } else {
            HashMap::new()
        };
        values.extend(process_env());
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Unicode entries of the process environment. Anything else can never be
/// referenced from a config file, so it is skipped.
fn process_env() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
}

/// Parse `KEY=VALUE` lines. Comments, blank lines and lines without `=` are
/// skipped; a later key overwrites an earlier one.
pub fn parse_secrets(contents: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let key = key.strip_prefix("export ").map(str::trim).unwrap_or(key);
        if key.is_empty() {
            continue;
        }
        values.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    values
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_skips_comments_and_bare_lines() {
        let parsed = parse_secrets("# token for staging\nAPI_TOKEN=abc\nnot a pair\n\n=orphan\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["API_TOKEN"], "abc");
    }

    #[test]
    fn test_parse_strips_quotes() {
        let parsed = parse_secrets("A=\"double\"\nB='single'\nC=\"unbalanced\nD=x=y\n");
        assert_eq!(parsed["A"], "double");
        assert_eq!(parsed["B"], "single");
        assert_eq!(parsed["C"], "\"unbalanced");
        assert_eq!(parsed["D"], "x=y");
    }

    #[test]
    fn test_later_keys_overwrite() {
        let parsed = parse_secrets("TOKEN=first\nTOKEN=second\n");
        assert_eq!(parsed["TOKEN"], "second");
    }

    #[test]
    fn test_export_prefix_accepted() {
        let parsed = parse_secrets("export TOKEN=abc\n");
        assert_eq!(parsed["TOKEN"], "abc");
    }

    #[test]
    fn test_load_reads_file_next_to_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SECRETS_FILE),
            "BROADSIDE_TEST_ONLY_SECRET=from-file\n",
        )
        .unwrap();
        let secrets = Secrets::load(dir.path()).unwrap();
        assert_eq!(secrets.get("BROADSIDE_TEST_ONLY_SECRET"), Some("from-file"));
    }

    #[cfg(unix)]
    #[test]
    fn test_load_skips_non_unicode_env() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        std::env::set_var(
            "BROADSIDE_TEST_ONLY_NON_UNICODE",
            OsStr::from_bytes(&[0xff, 0xfe]),
        );
        let dir = TempDir::new().unwrap();
        let secrets = Secrets::load(dir.path());
        std::env::remove_var("BROADSIDE_TEST_ONLY_NON_UNICODE");

        let secrets = secrets.unwrap();
        assert_eq!(secrets.get("BROADSIDE_TEST_ONLY_NON_UNICODE"), None);
    }

    #[test]
    fn test_load_without_file_still_sees_process_env() {
        let dir = TempDir::new().unwrap();
        let secrets = Secrets::load(dir.path()).unwrap();
        if let Ok(path) = std::env::var("PATH") {
            assert_eq!(secrets.get("PATH"), Some(path.as_str()));
        }
    }
}
