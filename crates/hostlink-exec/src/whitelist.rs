//! Pre-authorization for remote command execution.
//!
//! Two allow paths: an exact (whitespace-normalized, case-sensitive) match
//! against the configured command list, or a script file resolving
//! strictly inside the scripts directory. Everything else is rejected
//! before any side effect.

use hostlink_core::util::clean_path;
use hostlink_core::{Error, Result};
use std::path::{Path, PathBuf};

const SCRIPT_EXTENSION: &str = "ps1";

/// An authorized command, ready to hand to the shell runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedCommand {
    /// A literal whitelist entry; executed as given.
    Literal(String),
    /// A script resolved inside the scripts directory.
    Script(PathBuf),
}

impl AllowedCommand {
    /// The command line passed to the host shell.
    pub fn command_line(&self) -> String {
        match self {
            AllowedCommand::Literal(command) => command.clone(),
            AllowedCommand::Script(path) => path.display().to_string(),
        }
    }
}

/// Authorize a requested command against the whitelist and scripts
/// directory. Rejects by default.
pub fn authorize(
    command: &str,
    allowed_commands: &[String],
    scripts_dir: Option<&Path>,
) -> Result<AllowedCommand> {
    let normalized = normalize_whitespace(command);
    for allowed in allowed_commands {
        if normalized == normalize_whitespace(allowed) {
            return Ok(AllowedCommand::Literal(command.to_string()));
        }
    }

    if let Some(dir) = scripts_dir {
        if is_script(command) {
            if let Some(path) = resolve_script(command, dir) {
                return Ok(AllowedCommand::Script(path));
            }
        }
    }

    Err(Error::CommandNotAllowed)
}

/// Collapse runs of whitespace to single spaces and trim the ends.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A command names a script when its final path segment has the script
/// extension.
fn is_script(command: &str) -> bool {
    Path::new(command)
        .file_name()
        .map(|name| {
            Path::new(name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(SCRIPT_EXTENSION))
        })
        .unwrap_or(false)
}

/// Resolve a script reference to a regular file inside `scripts_dir`.
///
/// Only the file name of the request is honored, so separators in the
/// request cannot point outside the directory; the containment check on
/// the cleaned path guards the remaining edge cases.
fn resolve_script(command: &str, scripts_dir: &Path) -> Option<PathBuf> {
    let clean_dir = clean_path(scripts_dir);
    let file_name = Path::new(command).file_name()?;

    let candidate = clean_path(&clean_dir.join(file_name));
    if !candidate.starts_with(&clean_dir) || candidate == clean_dir {
        return None;
    }

    let metadata = std::fs::metadata(&candidate).ok()?;
    if !metadata.is_file() {
        return None;
    }

    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn allowed() -> Vec<String> {
        vec!["Get-Process | Sort".to_string()]
    }

    #[test]
    fn exact_match_passes() {
        let result = authorize("Get-Process | Sort", &allowed(), None).unwrap();
        assert_eq!(
            result,
            AllowedCommand::Literal("Get-Process | Sort".to_string())
        );
    }

    #[test]
    fn whitespace_is_normalized_before_matching() {
        // Tabs and runs of spaces collapse, so this matches.
        let result = authorize("  Get-Process \t |  Sort  ", &allowed(), None).unwrap();
        assert!(matches!(result, AllowedCommand::Literal(_)));
    }

    #[test]
    fn partial_command_is_rejected() {
        let err = authorize("Get-Process", &allowed(), None).unwrap_err();
        assert!(matches!(err, Error::CommandNotAllowed));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let err = authorize("get-process | sort", &allowed(), None).unwrap_err();
        assert!(matches!(err, Error::CommandNotAllowed));
    }

    #[test]
    fn pipe_variant_without_spaces_matches_after_normalization() {
        // "Get-Process|Sort" normalizes to itself and does not match
        // "Get-Process | Sort": token boundaries are preserved.
        let err = authorize("Get-Process|Sort", &allowed(), None).unwrap_err();
        assert!(matches!(err, Error::CommandNotAllowed));
    }

    struct ScriptsDir(PathBuf);

    impl ScriptsDir {
        fn new(tag: &str) -> Self {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos();
            let dir = std::env::temp_dir().join(format!("hostlink-scripts-{tag}-{nanos}"));
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn add(&self, name: &str) -> PathBuf {
            let path = self.0.join(name);
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(b"Write-Output 'ok'\n").unwrap();
            path
        }
    }

    impl Drop for ScriptsDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn script_in_directory_is_authorized() {
        let dir = ScriptsDir::new("ok");
        let expected = dir.add("restart-iis.ps1");

        let result = authorize("restart-iis.ps1", &[], Some(&dir.0)).unwrap();
        assert_eq!(result, AllowedCommand::Script(clean_path(&expected)));
    }

    #[test]
    fn missing_script_is_rejected() {
        let dir = ScriptsDir::new("missing");
        let err = authorize("ghost.ps1", &[], Some(&dir.0)).unwrap_err();
        assert!(matches!(err, Error::CommandNotAllowed));
    }

    #[test]
    fn traversal_outside_scripts_dir_is_rejected() {
        let dir = ScriptsDir::new("traverse");
        dir.add("good.ps1");

        // A script that exists outside the directory must stay unreachable.
        let outside = std::env::temp_dir().join("hostlink-evil.ps1");
        std::fs::write(&outside, "Write-Output 'evil'\n").unwrap();

        for sneaky in [
            "../hostlink-evil.ps1",
            "..\\..\\hostlink-evil.ps1",
            "/../hostlink-evil.ps1",
        ] {
            let result = authorize(sneaky, &[], Some(&dir.0));
            assert!(result.is_err(), "{sneaky} must be rejected");
        }

        let _ = std::fs::remove_file(outside);
    }

    #[test]
    fn directory_named_like_script_is_rejected() {
        let dir = ScriptsDir::new("dirscript");
        std::fs::create_dir_all(dir.0.join("fake.ps1")).unwrap();

        let err = authorize("fake.ps1", &[], Some(&dir.0)).unwrap_err();
        assert!(matches!(err, Error::CommandNotAllowed));
    }

    #[test]
    fn non_script_extension_is_not_resolved() {
        let dir = ScriptsDir::new("ext");
        dir.add("tool.sh");

        let err = authorize("tool.sh", &[], Some(&dir.0)).unwrap_err();
        assert!(matches!(err, Error::CommandNotAllowed));
    }

    #[test]
    fn script_path_with_directory_prefix_uses_only_the_file_name() {
        let dir = ScriptsDir::new("prefix");
        let expected = dir.add("deploy.ps1");

        let result = authorize("C:/unrelated/elsewhere/deploy.ps1", &[], Some(&dir.0)).unwrap();
        assert_eq!(result, AllowedCommand::Script(clean_path(&expected)));
    }

    #[test]
    fn scripts_disabled_without_directory() {
        let err = authorize("anything.ps1", &[], None).unwrap_err();
        assert!(matches!(err, Error::CommandNotAllowed));
    }
}
