//! Loading enforcement policy configs from disk.

use serde::Deserialize;
use std::path::Path;

use warden_core::{types::PolicyConfig, Error, Result};
use warden_governance::PolicyMatcher;

/// Accepted document shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PolicyDocument {
    List(Vec<PolicyConfig>),
    Wrapped { policies: Vec<PolicyConfig> },
}

impl PolicyDocument {
    fn into_configs(self) -> Vec<PolicyConfig> {
        match self {
            PolicyDocument::List(configs) => configs,
            PolicyDocument::Wrapped { policies } => policies,
        }
    }
}

/// Serialization of a policy source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Json,
    Yaml,
}

impl SourceFormat {
    /// YAML for `.yaml`/`.yml` files, JSON otherwise.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                SourceFormat::Yaml
            }
            _ => SourceFormat::Json,
        }
    }
}

/// Parse and validate policy configs.
///
/// Each policy must pass [`Policy::validate`](warden_core::types::Policy::validate)
/// and every url/verb pattern must compile.
pub fn parse_policies(text: &str, format: SourceFormat) -> Result<Vec<PolicyConfig>> {
    let document: PolicyDocument = match format {
        SourceFormat::Json => serde_json::from_str(text)
            .map_err(|e| Error::config(format!("invalid policy JSON: {}", e)))?,
        SourceFormat::Yaml => serde_yaml::from_str(text)
            .map_err(|e| Error::config(format!("invalid policy YAML: {}", e)))?,
    };
    let configs = document.into_configs();

    for config in &configs {
        config.policy.validate()?;
    }
    PolicyMatcher::build(&configs)?;

    Ok(configs)
}

/// Read and validate the policy source at `path`.
pub fn load_policies(path: impl AsRef<Path>) -> Result<Vec<PolicyConfig>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("cannot read policy source {}: {}", path.display(), e)))?;

    let configs = parse_policies(&text, SourceFormat::from_path(path))?;
    tracing::info!(path = %path.display(), policies = configs.len(), "Policy source loaded");
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ENTRY: &str = r#"{
        "url": "/v1/metrics.*",
        "verb": "GET",
        "service": "argus",
        "name": "reads",
        "users": ["hpotter"],
        "triggerType": "GREATER_THAN",
        "aggregator": "ZIMSUM",
        "threshold": [100],
        "timeUnit": "1h",
        "defaultValue": 0,
        "cronEntry": "*/5 * * * *",
        "levels": [{ "levelNumber": 1, "infractionCount": 1, "suspensionTime": 60000 }]
    }"#;

    #[test]
    fn test_bare_array() {
        let configs = parse_policies(&format!("[{}]", ENTRY), SourceFormat::Json).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].key(), "/v1/metrics.*:GET");
        assert_eq!(configs[0].policy.time_unit.to_string(), "1h");
    }

    #[test]
    fn test_wrapped_document() {
        let text = format!(r#"{{ "policies": [{}] }}"#, ENTRY);
        let configs = parse_policies(&text, SourceFormat::Json).unwrap();
        assert_eq!(configs[0].policy.name, "reads");
    }

    #[test]
    fn test_bad_time_window_fails() {
        let text = format!("[{}]", ENTRY.replace("\"1h\"", "\"1fortnight\""));
        assert!(parse_policies(&text, SourceFormat::Json).is_err());
    }

    #[test]
    fn test_bad_pattern_fails() {
        let text = format!("[{}]", ENTRY.replace("/v1/metrics.*", "/v1/(metrics"));
        assert!(matches!(
            parse_policies(&text, SourceFormat::Json),
            Err(Error::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
policies:
  - url: "/v1/alerts"
    verb: "PUT|POST"
    service: argus
    name: alert-writes
    users: [hpotter]
    triggerType: ABOVE
    aggregator: SUM
    threshold: [5]
    timeUnit: 10m
    levels:
      - {{ levelNumber: 1, infractionCount: 2, suspensionTime: -1 }}
"#
        )
        .unwrap();

        let configs = load_policies(file.path()).unwrap();
        assert_eq!(configs.len(), 1);
        assert!(configs[0].policy.levels[0].is_permanent());
    }

    #[test]
    fn test_load_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[{}]", ENTRY).unwrap();

        assert_eq!(load_policies(file.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_policies("/nonexistent/policies.json"),
            Err(Error::Config(_))
        ));
    }
}
