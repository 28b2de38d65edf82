//! Watch profiles
//!
//! A profile is a TOML file holding any subset of the command-line options,
//! so a recurring watch can be saved once and reused. Flags given on the
//! command line override the profile.
//!
//! ```toml
//! command = ["cargo", "build", "--release"]
//! success = "Finished"
//! error = "error(\\[E\\d+\\])?:"
//! idle-timeout = "2m"
//! exit-codes = "success-failure"
//! ```

use super::ConfigError;
use crate::watch::ExitConvention;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Profile {
    pub command: Vec<String>,
    pub pattern: Option<String>,
    pub success: Option<String>,
    pub error: Option<String>,
    pub exclude: Vec<String>,
    pub invert_match: bool,
    pub ignore_case: bool,
    pub word_regexp: bool,
    pub line_regexp: bool,
    pub max_count: Option<usize>,

    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub first_output_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub stderr_idle_timeout: Option<Duration>,

    pub stuck: Option<usize>,
    pub normalize_timestamps: bool,

    pub after_context: Option<usize>,
    #[serde(with = "humantime_serde")]
    pub delay_exit: Option<Duration>,

    pub detach: bool,
    pub detach_on_timeout: bool,
    pub detach_group: bool,
    #[serde(with = "humantime_serde")]
    pub grace: Option<Duration>,

    pub exit_codes: Option<ExitConvention>,
    pub pipe: bool,
    pub fd: Vec<i32>,
    pub log_file: Option<PathBuf>,
    pub learn: bool,
    pub quiet: bool,
}

impl Profile {
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::ParseProfile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadProfile {
            path: path.to_path_buf(),
            source,
        })?;
        let profile = Self::from_toml(&content, path)?;
        debug!("Loaded profile from {}", path.display());
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_profile() {
        let profile = Profile::from_toml(
            r#"
            command = ["make", "test"]
            success = "PASS"
            error = "FAIL"
            exclude = ["FAIL_OK"]
            idle-timeout = "30s"
            timeout = "10m"
            stuck = 4
            exit-codes = "success-failure"
            fd = [3]
            "#,
            Path::new("profile.toml"),
        )
        .unwrap();

        assert_eq!(profile.command, vec!["make", "test"]);
        assert_eq!(profile.success.as_deref(), Some("PASS"));
        assert_eq!(profile.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(profile.timeout, Some(Duration::from_secs(600)));
        assert_eq!(profile.first_output_timeout, None);
        assert_eq!(profile.stuck, Some(4));
        assert_eq!(profile.exit_codes, Some(ExitConvention::SuccessFailure));
        assert_eq!(profile.fd, vec![3]);
        assert!(!profile.detach);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let result = Profile::from_toml("patern = \"typo\"", Path::new("p.toml"));
        assert!(matches!(result, Err(ConfigError::ParseProfile { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "pattern = \"ready\"\nquiet = true").unwrap();
        let profile = Profile::load(file.path()).unwrap();
        assert_eq!(profile.pattern.as_deref(), Some("ready"));
        assert!(profile.quiet);

        let missing = Profile::load(Path::new("/nonexistent/lookout.toml"));
        assert!(matches!(missing, Err(ConfigError::ReadProfile { .. })));
    }
}
