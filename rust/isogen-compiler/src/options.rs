//! Lowering options and the runtime library description.
//!
//! Options can be built in code or loaded from a TOML file:
//!
//! ```toml
//! actor-data-race-checks = true
//! deployment-target = "13.0"
//! ```

use isogen_core::availability::{AvailabilityRange, Version};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid lowering options{}: {source}", in_path(.path))]
    Parse {
        path: Option<String>,
        #[source]
        source: toml::de::Error,
    },
}

fn in_path(path: &Option<String>) -> String {
    match path {
        Some(p) => format!(" in '{}'", p),
        None => String::new(),
    }
}

/// Options that change what the prolog emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LowerOptions {
    /// Check at entry of every synchronous isolated function that it runs
    /// on its actor. Default: `false`.
    pub actor_data_race_checks: bool,
    /// Check closures the type checker marked as needing a dynamic
    /// isolation check. Default: `true`.
    pub dynamic_actor_isolation_checking: bool,
    /// Assume every runtime entry point is available. Default: `false`.
    pub disable_availability_checking: bool,
    /// Oldest platform version the output must run on. `None` means no
    /// lower bound is known.
    pub deployment_target: Option<Version>,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            actor_data_race_checks: false,
            dynamic_actor_isolation_checking: true,
            disable_availability_checking: false,
            deployment_target: None,
        }
    }
}

impl LowerOptions {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|source| ConfigError::Parse { path: None, source })
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: Some(path.display().to_string()),
            source,
        })
    }

    /// Versions the output will run on.
    pub fn deployment_availability(&self) -> AvailabilityRange {
        match self.deployment_target {
            Some(v) => AvailabilityRange::from_version(v),
            None => AvailabilityRange::always(),
        }
    }
}

/// A runtime library entry point the lowering calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrinsicDecl {
    pub name: String,
    /// Versions on which the entry point exists.
    pub availability: AvailabilityRange,
}

/// What the runtime library provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeIntrinsics {
    /// `_checkExpectedExecutor`; checks are omitted when absent.
    pub check_expected_executor: Option<IntrinsicDecl>,
}

impl Default for RuntimeIntrinsics {
    fn default() -> Self {
        Self {
            check_expected_executor: Some(IntrinsicDecl {
                name: "_checkExpectedExecutor".to_string(),
                availability: AvailabilityRange::always(),
            }),
        }
    }
}

impl RuntimeIntrinsics {
    /// A runtime without any of the entry points.
    pub fn none() -> Self {
        Self {
            check_expected_executor: None,
        }
    }

    /// The default runtime, with the check intrinsic introduced in `version`.
    pub fn with_check_introduced_in(version: Version) -> Self {
        let mut intrinsics = Self::default();
        if let Some(check) = intrinsics.check_expected_executor.as_mut() {
            check.availability = AvailabilityRange::from_version(version);
        }
        intrinsics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = LowerOptions::default();
        assert!(!opts.actor_data_race_checks);
        assert!(opts.dynamic_actor_isolation_checking);
        assert!(!opts.disable_availability_checking);
        assert_eq!(opts.deployment_target, None);
        assert_eq!(opts.deployment_availability(), AvailabilityRange::Always);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        assert_eq!(LowerOptions::from_toml_str("").unwrap(), LowerOptions::default());
    }

    #[test]
    fn parse_kebab_case_keys() {
        let opts = LowerOptions::from_toml_str(
            r#"
actor-data-race-checks = true
dynamic-actor-isolation-checking = false
deployment-target = "13.4"
"#,
        )
        .unwrap();
        assert!(opts.actor_data_race_checks);
        assert!(!opts.dynamic_actor_isolation_checking);
        assert_eq!(opts.deployment_target, Some(Version::new(13, 4, 0)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = LowerOptions::from_toml_str("[broken").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: None, .. }));
        assert!(err.to_string().starts_with("invalid lowering options:"));
    }

    #[test]
    fn bad_version_is_rejected() {
        assert!(LowerOptions::from_toml_str("deployment-target = \"x.y\"").is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = LowerOptions::load_from(Path::new("/nonexistent/isogen.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn check_intrinsic_introduced_later() {
        let intrinsics = RuntimeIntrinsics::with_check_introduced_in(Version::new(14, 0, 0));
        let check = intrinsics.check_expected_executor.unwrap();
        assert_eq!(check.name, "_checkExpectedExecutor");
        assert_eq!(check.availability, AvailabilityRange::From(Version::new(14, 0, 0)));
        assert!(RuntimeIntrinsics::none().check_expected_executor.is_none());
    }
}
