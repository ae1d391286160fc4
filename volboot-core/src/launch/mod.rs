// volboot-core/src/launch/mod.rs
// Starting the inference server and deciding whether it is up.

use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, info};
use volboot_aio::create_dir_all;
use volboot_common::config::Config;
use volboot_common::error::{BootError, Result};

mod health;
mod supervisor;

pub use health::wait_healthy;
pub use supervisor::Supervisor;

/// Substitutes `{host}`, `{port}`, `{output_dir}` and `{temp_dir}` in the
/// configured argument vector.
pub fn render_args(config: &Config) -> Vec<String> {
    let output_dir = config.output_dir().to_string_lossy().to_string();
    let temp_dir = config.temp_dir().to_string_lossy().to_string();
    let port = config.server.port.to_string();
    config
        .server
        .args
        .iter()
        .map(|arg| {
            arg.replace("{host}", &config.server.host)
                .replace("{port}", &port)
                .replace("{output_dir}", &output_dir)
                .replace("{temp_dir}", &temp_dir)
        })
        .collect()
}

/// Spawns the server in the background from the application tree, with its
/// output and temp directories on the volume.
pub fn spawn_server(config: &Config) -> Result<Child> {
    let output_dir = config.output_dir();
    let temp_dir = config.temp_dir();
    create_dir_all(&output_dir)?;
    create_dir_all(&temp_dir)?;

    let args = render_args(config);
    let app_dir = config.app_dir();
    let mut cmd = Command::new(&config.server.program);
    cmd.args(&args)
        .env("COMFY_DIR", &app_dir)
        .env("VOLBOOT_OUTPUT_DIR", &output_dir)
        .env("VOLBOOT_TEMP_DIR", &temp_dir)
        .env("TMPDIR", &temp_dir)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(gpu) = &config.gpu_class {
        cmd.env("VOLBOOT_GPU_CLASS", gpu);
    }
    if app_dir.is_dir() {
        cmd.current_dir(&app_dir);
    }

    debug!("Spawning {} {:?}", config.server.program, args);
    let child = cmd.spawn().map_err(|e| {
        BootError::CommandExecError(format!(
            "failed to start {}: {}",
            config.server.program, e
        ))
    })?;
    info!(
        "Started {} (pid {}) on {}:{}",
        config.server.program,
        child.id().map_or_else(|| "?".to_string(), |p| p.to_string()),
        config.server.host,
        config.server.port
    );
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_are_rendered_from_config() {
        let mut config = Config::for_volume("/v");
        config.server.port = 9000;
        config.temp_dir = Some("/scratch".into());
        let args = render_args(&config);
        assert_eq!(
            args,
            vec![
                "main.py",
                "--listen",
                "0.0.0.0",
                "--port",
                "9000",
                "--output-directory",
                "/v/output",
                "--temp-directory",
                "/scratch",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn server_sees_the_application_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = {
            let mut config = Config::for_volume(dir.path());
            config.server.program = "sh".into();
            config.server.args = vec![
                "-c".into(),
                "printf '%s' \"$COMFY_DIR\" > {output_dir}/env.txt".into(),
            ];
            config
        };
        std::fs::create_dir_all(config.app_dir()).unwrap();

        let status = spawn_server(&config).unwrap().wait().await.unwrap();
        assert!(status.success());
        let seen = std::fs::read_to_string(config.output_dir().join("env.txt")).unwrap();
        assert_eq!(seen, config.app_dir().to_string_lossy());
    }
}
