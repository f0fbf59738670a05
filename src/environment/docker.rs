//! Docker-backed environment using the bollard crate.
//!
//! Each environment owns one container started from the instance image with
//! an idle `sleep` as its main process. Commands run through `docker exec`;
//! closing force-removes the container together with its volumes.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CommandOutput, Environment, EnvironmentError, EnvironmentKind, EnvironmentSettings};

/// Prefix of container names created by this crate.
pub const CONTAINER_PREFIX: &str = "swe-matrix";

/// A running container for one problem instance.
pub struct DockerEnvironment {
    docker: Docker,
    container_id: String,
    container_name: String,
    settings: EnvironmentSettings,
    closed: AtomicBool,
}

impl DockerEnvironment {
    /// Connects to the local Docker daemon and starts a container from `image`.
    pub async fn start(image: &str, settings: EnvironmentSettings) -> Result<Self, EnvironmentError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EnvironmentError::DaemonUnavailable(format!("Failed to connect: {e}")))?;
        Self::start_with(docker, image, settings).await
    }

    /// Starts a container on an existing daemon connection.
    pub async fn start_with(
        docker: Docker,
        image: &str,
        settings: EnvironmentSettings,
    ) -> Result<Self, EnvironmentError> {
        if settings.pull_image && docker.inspect_image(image).await.is_err() {
            pull_image(&docker, image).await?;
        }

        let container_name = container_name();
        let host_config = HostConfig {
            network_mode: settings.network_mode.clone(),
            memory: settings.memory_mb.map(|mb| (mb * 1024 * 1024) as i64),
            ..Default::default()
        };
        let env = settings.env_pairs();

        let config = Config::<String> {
            image: Some(image.to_string()),
            cmd: Some(vec![
                "sleep".to_string(),
                settings.container_lifetime_secs.to_string(),
            ]),
            env: if env.is_empty() { None } else { Some(env) },
            working_dir: Some(settings.cwd.clone()),
            host_config: Some(host_config),
            tty: Some(false),
            attach_stdin: Some(false),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        let response = docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| EnvironmentError::Container(format!("Failed to create container: {e}")))?;

        let environment = Self {
            docker,
            container_id: response.id,
            container_name,
            settings,
            closed: AtomicBool::new(false),
        };

        if let Err(e) = environment
            .docker
            .start_container(&environment.container_id, None::<StartContainerOptions<String>>)
            .await
        {
            environment.close().await.ok();
            return Err(EnvironmentError::Container(format!(
                "Failed to start container: {e}"
            )));
        }

        info!(
            container = %environment.container_name,
            image = image,
            "Docker environment ready"
        );

        Ok(environment)
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, EnvironmentError> {
        let env = self.settings.env_pairs();
        let exec_options = CreateExecOptions::<String> {
            cmd: Some(vec![
                "bash".to_string(),
                "-lc".to_string(),
                command.to_string(),
            ]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            working_dir: Some(self.settings.cwd.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&self.container_id, exec_options)
            .await
            .map_err(|e| EnvironmentError::Container(format!("Failed to create exec: {e}")))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| EnvironmentError::Container(format!("Failed to start exec: {e}")))?;

        let mut output = String::new();
        if let StartExecResults::Attached {
            output: mut stream, ..
        } = start_result
        {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                        output.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(EnvironmentError::Container(format!(
                            "Error reading output: {e}"
                        )));
                    }
                }
            }
        }

        let exec_info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| EnvironmentError::Container(format!("Failed to inspect exec: {e}")))?;

        Ok(CommandOutput {
            output,
            exit_code: exec_info.exit_code.unwrap_or(-1),
        })
    }
}

#[async_trait]
impl Environment for DockerEnvironment {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Docker
    }

    fn handle(&self) -> String {
        self.container_id.clone()
    }

    fn cwd(&self) -> &str {
        &self.settings.cwd
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput, EnvironmentError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EnvironmentError::Closed);
        }

        let timeout = self.settings.command_timeout();
        match tokio::time::timeout(timeout, self.exec(command)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(container = %self.container_name, "Command timed out");
                Err(EnvironmentError::Timeout(timeout))
            }
        }
    }

    async fn close(&self) -> Result<(), EnvironmentError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(&self.container_id, Some(options))
            .await
            .map_err(|e| {
                warn!(container = %self.container_name, error = %e, "Failed to remove container");
                EnvironmentError::Container(format!("Failed to remove container: {e}"))
            })?;

        debug!(container = %self.container_name, "Container removed");
        Ok(())
    }
}

async fn pull_image(docker: &Docker, image: &str) -> Result<(), EnvironmentError> {
    info!(image = image, "Pulling image");

    let options = CreateImageOptions {
        from_image: image,
        ..Default::default()
    };

    let mut stream = docker.create_image(Some(options), None, None);
    while let Some(result) = stream.next().await {
        result.map_err(|e| EnvironmentError::ImagePull {
            image: image.to_string(),
            reason: e.to_string(),
        })?;
    }

    Ok(())
}

fn container_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}", CONTAINER_PREFIX, &id[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_names_are_unique() {
        let a = container_name();
        let b = container_name();
        assert!(a.starts_with("swe-matrix-"));
        assert_eq!(a.len(), CONTAINER_PREFIX.len() + 13);
        assert_ne!(a, b);
    }
}
