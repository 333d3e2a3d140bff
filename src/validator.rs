use std::fmt;
use std::path::{Path, PathBuf};

/// The sole authorization check: only commands in this family may run.
pub const TOOLKIT_COMMAND_PREFIX: &str = "shotgun";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    CommandFamily { name: String },
    PipelineConfigNotFound { path: PathBuf },
    ToolkitCommandNotFound { path: PathBuf },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandFamily { name } => write!(
                f,
                "command `{name}` is not a recognized command family (needs to be a {TOOLKIT_COMMAND_PREFIX} command)"
            ),
            Self::PipelineConfigNotFound { path } => write!(
                f,
                "could not find the pipeline configuration on disk: {}",
                path.display()
            ),
            Self::ToolkitCommandNotFound { path } => write!(
                f,
                "could not find the toolkit command on disk: {}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Resolves the toolkit entry point inside a pipeline configuration.
/// The primary script name wins; the fallback is only probed when the
/// primary file is absent. The returned path may not exist.
pub fn resolve_toolkit_script(
    pipeline_config_path: &Path,
    primary: &str,
    fallback: &str,
) -> PathBuf {
    let candidate = pipeline_config_path.join(primary);
    if candidate.is_file() {
        candidate
    } else {
        pipeline_config_path.join(fallback)
    }
}

/// Checks a toolkit command against policy, in order, first failure wins:
/// command family prefix, then pipeline configuration directory, then the
/// script files on disk. Returns the resolved executable path.
pub fn validate(
    pipeline_config_path: &Path,
    command: &str,
    primary: &str,
    fallback: &str,
) -> Result<PathBuf, ValidationError> {
    if !command.starts_with(TOOLKIT_COMMAND_PREFIX) {
        return Err(ValidationError::CommandFamily {
            name: command.to_owned(),
        });
    }

    if !pipeline_config_path.is_dir() {
        return Err(ValidationError::PipelineConfigNotFound {
            path: pipeline_config_path.to_path_buf(),
        });
    }

    let resolved = resolve_toolkit_script(pipeline_config_path, primary, fallback);
    if !resolved.is_file() {
        return Err(ValidationError::ToolkitCommandNotFound { path: resolved });
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{validate, ValidationError};

    fn temp_dir(tag: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("shotgun-bridge-validator-{tag}-{stamp}"));
        std::fs::create_dir_all(&path).expect("create scratch dir");
        path
    }

    #[test]
    fn wrong_command_family_fails_regardless_of_path() {
        let err = validate(
            &PathBuf::from("/definitely/not/there"),
            "rm -rf /",
            "shotgun",
            "tank",
        )
        .expect_err("bad family");
        assert!(matches!(err, ValidationError::CommandFamily { .. }));

        let dir = temp_dir("family");
        std::fs::write(dir.join("shotgun"), "#!/bin/sh\n").expect("write script");
        let err = validate(&dir, "tank_update", "shotgun", "tank").expect_err("bad family");
        assert!(matches!(err, ValidationError::CommandFamily { .. }));
    }

    #[test]
    fn missing_pipeline_config_fails_after_family_check() {
        let missing = std::env::temp_dir().join("shotgun-bridge-validator-nowhere");
        let err = validate(&missing, "shotgun_publish", "shotgun", "tank")
            .expect_err("missing config dir");
        match err {
            ValidationError::PipelineConfigNotFound { path } => assert_eq!(path, missing),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_pipeline_config_reports_missing_toolkit_command() {
        let dir = temp_dir("empty");
        let err = validate(&dir, "shotgun_publish", "shotgun", "tank").expect_err("no scripts");
        match err {
            ValidationError::ToolkitCommandNotFound { path } => {
                assert_eq!(path, dir.join("tank"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn fallback_script_is_selected_when_primary_absent() {
        let dir = temp_dir("fallback");
        std::fs::write(dir.join("tank"), "#!/bin/sh\n").expect("write script");
        let resolved = validate(&dir, "shotgun_publish", "shotgun", "tank").expect("resolves");
        assert_eq!(resolved, dir.join("tank"));
    }

    #[test]
    fn primary_script_wins_when_both_exist() {
        let dir = temp_dir("both");
        std::fs::write(dir.join("shotgun"), "#!/bin/sh\n").expect("write script");
        std::fs::write(dir.join("tank"), "#!/bin/sh\n").expect("write script");
        let resolved = validate(&dir, "shotgun_publish", "shotgun", "tank").expect("resolves");
        assert_eq!(resolved, dir.join("shotgun"));
    }

    #[test]
    fn bare_prefix_is_a_valid_command_name() {
        let dir = temp_dir("bare");
        std::fs::write(dir.join("shotgun"), "#!/bin/sh\n").expect("write script");
        assert!(validate(&dir, "shotgun", "shotgun", "tank").is_ok());
    }
}
