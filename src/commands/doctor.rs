use anyhow::{Context as _, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};

use crate::Context;
use crate::config::Config;
use crate::paths;
use crate::ui;

/// Free space the container images and volumes need at minimum
const MIN_FREE_BYTES: u64 = 10 * 1024 * 1024 * 1024;

struct Issue {
    category: &'static str,
    summary: String,
    fix: Option<String>,
}

pub fn run(ctx: &Context) -> Result<i32> {
    ui::header("Host Readiness Check");

    let mut issues: Vec<Issue> = Vec::new();

    check_privileges(&mut issues);
    let config = check_config(ctx, &mut issues);
    check_tools(&mut issues);
    if let Some(config) = &config {
        check_directories(config, &mut issues);
    }

    println!();
    if issues.is_empty() {
        ui::success("Host is ready to provision");
        return Ok(0);
    }

    let count = issues.len();
    let label = if count == 1 { "Issue" } else { "Issues" };
    ui::header(&format!("{count} {label} Found"));
    for (i, issue) in issues.iter().enumerate() {
        println!(
            "  {}  {} {}",
            format!("{}.", i + 1).bold(),
            issue.summary,
            format!("[{}]", issue.category).dimmed()
        );
        if let Some(fix) = &issue.fix {
            println!("      {} {}", "Fix:".cyan(), fix);
        }
    }
    Ok(1)
}

fn check_privileges(issues: &mut Vec<Issue>) {
    ui::section("Privileges");
    if paths::is_root() {
        println!("  {} running as root", "✓".green());
    } else {
        println!("  {} not running as root", "✗".red());
        issues.push(Issue {
            category: "Privileges",
            summary: "Provisioning changes packages, units and the firewall".into(),
            fix: Some("Run with sudo".into()),
        });
    }
}

fn check_config(ctx: &Context, issues: &mut Vec<Issue>) -> Option<Config> {
    ui::section("Configuration");
    match super::load_config(ctx) {
        Ok(config) => {
            println!(
                "  {} deployment {} ({})",
                "✓".green(),
                config.deployment.identity,
                config.deployment.domain.dimmed()
            );
            Some(config)
        }
        Err(e) => {
            println!("  {} {}", "✗".red(), format!("{e:#}").red());
            issues.push(Issue {
                category: "Configuration",
                summary: "Configuration does not load".into(),
                fix: Some(format!("{e:#}")),
            });
            None
        }
    }
}

fn check_tools(issues: &mut Vec<Issue>) {
    ui::section("Host Tools");

    let required = [
        ("apt-get", "Package manager"),
        ("systemctl", "Service manager"),
    ];
    // Installed by the install phase when missing
    let provided = [
        ("docker", "Container runtime"),
        ("ufw", "Firewall"),
        ("fail2ban-client", "Intrusion prevention"),
    ];

    for (tool, desc) in required {
        if find_on_path(tool).is_some() {
            println!("  {} {} - {}", "✓".green(), tool, desc.dimmed());
        } else {
            println!("  {} {} - {} {}", "✗".red(), tool, desc, "(missing)".red());
            issues.push(Issue {
                category: "Host Tools",
                summary: format!("{tool} is not available"),
                fix: Some("Provision a Debian or Ubuntu host with systemd".into()),
            });
        }
    }
    for (tool, desc) in provided {
        if find_on_path(tool).is_some() {
            println!("  {} {} - {}", "✓".green(), tool, desc.dimmed());
        } else {
            println!(
                "  {} {} - {} {}",
                "○".dimmed(),
                tool,
                desc,
                "(installed by the install phase)".dimmed()
            );
        }
    }
}

fn check_directories(config: &Config, issues: &mut Vec<Issue>) {
    ui::section("Storage");

    match paths::state_dir() {
        Ok(dir) => match check_writable(&dir) {
            Ok(()) => println!("  {} state {}", "✓".green(), dir.display()),
            Err(e) => {
                println!("  {} state {} {}", "✗".red(), dir.display(), "(not writable)".red());
                issues.push(Issue {
                    category: "Storage",
                    summary: format!("State directory is not writable: {e:#}"),
                    fix: Some(format!("Set {} to a writable directory", paths::ENV_STATE_DIR)),
                });
            }
        },
        Err(e) => issues.push(Issue {
            category: "Storage",
            summary: format!("{e:#}"),
            fix: Some(format!("Set {}", paths::ENV_STATE_DIR)),
        }),
    }

    let output = config.output_dir();
    let probe = existing_ancestor(&output);
    match free_space(&probe) {
        Ok(available) if available >= MIN_FREE_BYTES => println!(
            "  {} {} free under {}",
            "✓".green(),
            ui::format_size(available),
            probe.display()
        ),
        Ok(available) => {
            println!(
                "  {} {} free under {}",
                "⚠".yellow(),
                ui::format_size(available),
                probe.display()
            );
            issues.push(Issue {
                category: "Storage",
                summary: format!(
                    "Only {} free for images and volumes (need {})",
                    ui::format_size(available),
                    ui::format_size(MIN_FREE_BYTES)
                ),
                fix: Some("Free disk space or point deployment.output_dir elsewhere".into()),
            });
        }
        Err(e) => println!("  {} {}", "○".dimmed(), format!("{e:#}").dimmed()),
    }
}

/// First executable named `tool` in `PATH`
fn find_on_path(tool: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file())
}

fn check_writable(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Could not create {}", dir.display()))?;
    tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Could not write in {}", dir.display()))?;
    Ok(())
}

/// Deepest ancestor of `path` that exists
fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| p.exists())
        .unwrap_or(Path::new("/"))
        .to_path_buf()
}

/// Bytes available to unprivileged users on the filesystem holding `path`
#[cfg(unix)]
fn free_space(path: &Path) -> Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).context("Invalid path")?;

    // SAFETY: statvfs is a standard POSIX call. We check the return value
    // before reading the result.
    unsafe {
        let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
        if libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) != 0 {
            anyhow::bail!("statvfs failed for {}", path.display());
        }
        let stat = stat.assume_init();
        Ok(u64::from(stat.f_bavail) * stat.f_frsize)
    }
}

#[cfg(not(unix))]
fn free_space(_path: &Path) -> Result<u64> {
    anyhow::bail!("Disk space detection not supported on this platform")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_existing_ancestor() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("a").join("b");
        assert_eq!(existing_ancestor(&missing), dir.path());
        assert_eq!(existing_ancestor(dir.path()), dir.path());
    }

    #[test]
    fn test_check_writable_creates_directory() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("state");
        check_writable(&state).unwrap();
        assert!(state.is_dir());
        assert_eq!(std::fs::read_dir(&state).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_free_space_of_tempdir() {
        let dir = TempDir::new().unwrap();
        assert!(free_space(dir.path()).unwrap() > 0);
    }

    #[test]
    fn test_find_on_path_missing_tool() {
        assert!(find_on_path("provision-no-such-tool").is_none());
    }
}
