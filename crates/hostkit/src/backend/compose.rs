//! Container runtime backend using `docker compose` and `docker ps`.

use crate::backend::ContainerRuntime;
use crate::command::CommandRunner;
use crate::error::{Error, Result};
use crate::types::{ProbeResult, ServiceState};
use std::path::Path;
use std::sync::Arc;

pub struct DockerCompose {
    runner: Arc<dyn CommandRunner>,
}

impl DockerCompose {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// `State<TAB>Status` line for the service's container, empty if none
    fn ps_line(&self, project: &str, service: &str) -> Result<String> {
        let project_filter = format!("label=com.docker.compose.project={project}");
        let service_filter = format!("label=com.docker.compose.service={service}");
        let stdout = self.runner.run_checked(
            "docker",
            &[
                "ps",
                "--all",
                "--filter",
                &project_filter,
                "--filter",
                &service_filter,
                "--format",
                "{{.State}}\t{{.Status}}",
            ],
            &[],
        )?;
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

impl ContainerRuntime for DockerCompose {
    fn is_available(&self) -> bool {
        self.runner
            .run("docker", &["compose", "version"], &[])
            .is_ok_and(|o| o.success())
    }

    fn apply_topology(&self, compose_file: &Path, project: &str) -> Result<()> {
        let file = compose_file.to_str().ok_or_else(|| Error::Parse {
            tool: "docker".to_string(),
            message: format!("non UTF-8 path {}", compose_file.display()),
        })?;
        self.runner.run_checked(
            "docker",
            &[
                "compose",
                "--project-name",
                project,
                "--file",
                file,
                "up",
                "--detach",
                "--remove-orphans",
                "--quiet-pull",
            ],
            &[],
        )?;
        Ok(())
    }

    fn service_status(&self, project: &str, service: &str) -> Result<ServiceState> {
        Ok(parse_state(&self.ps_line(project, service)?))
    }

    fn health_probe(&self, project: &str, service: &str) -> Result<ProbeResult> {
        Ok(parse_probe(&self.ps_line(project, service)?))
    }
}

fn parse_state(line: &str) -> ServiceState {
    match line.split('\t').next().unwrap_or_default() {
        "" => ServiceState::Missing,
        "running" | "restarting" => ServiceState::Running,
        _ => ServiceState::Exited,
    }
}

fn parse_probe(line: &str) -> ProbeResult {
    let mut parts = line.splitn(2, '\t');
    let state = parts.next().unwrap_or_default();
    let status = parts.next().unwrap_or_default();

    match state {
        "" => ProbeResult::Unknown,
        "running" => {
            if status.contains("(unhealthy)") {
                ProbeResult::Unhealthy
            } else if status.contains("(health: starting)") {
                ProbeResult::Starting
            } else {
                // "(healthy)", or no health check defined
                ProbeResult::Healthy
            }
        }
        "created" | "restarting" => ProbeResult::Starting,
        _ => ProbeResult::Unhealthy,
    }
}
