//! Debian/Ubuntu package manager backend using `apt-get` and `dpkg-query`.

use crate::backend::PackageManager;
use crate::command::CommandRunner;
use crate::error::Result;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const NONINTERACTIVE: &[(&str, &str)] = &[("DEBIAN_FRONTEND", "noninteractive")];

pub struct Apt {
    runner: Arc<dyn CommandRunner>,
    lists_dir: PathBuf,
}

impl Apt {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            lists_dir: PathBuf::from("/var/lib/apt/lists"),
        }
    }

    /// Use a different package lists directory (for index age checks)
    pub fn with_lists_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lists_dir = dir.into();
        self
    }
}

impl PackageManager for Apt {
    fn update_index(&self) -> Result<()> {
        self.runner
            .run_checked("apt-get", &["update", "-q"], NONINTERACTIVE)?;
        Ok(())
    }

    fn index_age(&self) -> Result<Option<Duration>> {
        match fs::metadata(&self.lists_dir) {
            Ok(meta) => Ok(meta.modified().ok().and_then(|t| t.elapsed().ok())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn install(&self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut args = vec!["install", "-y", "-q", "--no-install-recommends"];
        args.extend(packages.iter().map(String::as_str));
        self.runner.run_checked("apt-get", &args, NONINTERACTIVE)?;
        Ok(())
    }

    fn is_installed(&self, package: &str) -> Result<bool> {
        let output = self
            .runner
            .run("dpkg-query", &["-W", "-f=${Status}", package], &[])?;
        // dpkg-query exits 1 for unknown packages
        Ok(output.success() && output.stdout.contains("install ok installed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use crate::error::ErrorCategory;

    #[test]
    fn test_install_builds_single_transaction() {
        let runner = Arc::new(ScriptedRunner::new());
        let apt = Apt::new(runner.clone());
        apt.install(&["curl".into(), "ca-certificates".into()]).unwrap();
        assert_eq!(
            runner.calls(),
            vec!["apt-get install -y -q --no-install-recommends curl ca-certificates"]
        );
    }

    #[test]
    fn test_install_nothing_runs_nothing() {
        let runner = Arc::new(ScriptedRunner::new());
        Apt::new(runner.clone()).install(&[]).unwrap();
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_is_installed() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .ok("install ok installed")
                .ok("deinstall ok config-files")
                .fail(1, "dpkg-query: no packages found matching nope"),
        );
        let apt = Apt::new(runner);
        assert!(apt.is_installed("curl").unwrap());
        assert!(!apt.is_installed("old").unwrap());
        assert!(!apt.is_installed("nope").unwrap());
    }

    #[test]
    fn test_update_lock_is_retryable() {
        let runner = Arc::new(ScriptedRunner::new().fail(
            100,
            "E: Could not get lock /var/lib/apt/lists/lock. It is held by process 812 (apt-get)",
        ));
        let err = Apt::new(runner).update_index().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::LockContention);
    }

    #[test]
    fn test_index_age() {
        let dir = tempfile::TempDir::new().unwrap();
        let apt = Apt::new(Arc::new(ScriptedRunner::new())).with_lists_dir(dir.path());
        assert!(apt.index_age().unwrap().unwrap() < Duration::from_secs(3600));

        let missing = Apt::new(Arc::new(ScriptedRunner::new())).with_lists_dir(dir.path().join("x"));
        assert!(missing.index_age().unwrap().is_none());
    }
}
