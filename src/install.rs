//! Установка systemd сервиса

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

pub const SERVICE_NAME: &str = "xpost";
const UNIT_DIR: &str = "/etc/systemd/system";

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Бинарник для ExecStart, по умолчанию текущий
    pub bin: Option<PathBuf>,
    /// User= в юните, по умолчанию SUDO_USER, затем USER
    pub user: Option<String>,
    pub dry_run: bool,
}

/// Пишет unit файл и включает сервис
pub async fn install(config_path: &Path, opts: InstallOptions) -> Result<()> {
    if !cfg!(target_os = "linux") {
        bail!("install command is only supported on Linux");
    }
    if find_in_path("systemctl").is_none() {
        bail!("systemctl not found in PATH");
    }

    let config_path = std::path::absolute(config_path)
        .context("failed to resolve config path")?;
    let exec_path = match opts.bin.filter(|p| !p.as_os_str().is_empty()) {
        Some(bin) => bin,
        None => std::env::current_exe().context("failed to detect current executable")?,
    };
    let exec_path = std::path::absolute(&exec_path).context("failed to resolve binary path")?;
    let work_dir = exec_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));

    let user = opts
        .user
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .or_else(default_run_user);

    let unit = build_systemd_unit(
        SERVICE_NAME,
        &exec_path,
        &config_path,
        &work_dir,
        user.as_deref(),
    );
    let unit_path = Path::new(UNIT_DIR).join(format!("{}.service", SERVICE_NAME));

    if opts.dry_run {
        print!("# {}\n{}", unit_path.display(), unit);
        return Ok(());
    }

    tokio::fs::write(&unit_path, &unit)
        .await
        .with_context(|| format!("failed to write {} (hint: run with sudo)", unit_path.display()))?;
    info!("Wrote {}", unit_path.display());

    run_systemctl(&["daemon-reload"]).await?;
    let service = format!("{}.service", SERVICE_NAME);
    run_systemctl(&["enable", "--now", &service]).await?;

    println!("Installed and started {}", service);
    println!("Config: {}", config_path.display());
    Ok(())
}

pub fn build_systemd_unit(
    service: &str,
    exec_path: &Path,
    config_path: &Path,
    work_dir: &Path,
    user: Option<&str>,
) -> String {
    let mut lines = vec![
        "[Unit]".to_string(),
        format!("Description={} service", service),
        "After=network.target".to_string(),
        String::new(),
        "[Service]".to_string(),
        "Type=simple".to_string(),
        format!("WorkingDirectory={}", work_dir.display()),
        format!("Environment=XPOST_CONFIG={}", config_path.display()),
        format!("ExecStart={} serve", exec_path.display()),
        "Restart=always".to_string(),
        "RestartSec=5".to_string(),
    ];
    if let Some(user) = user.map(str::trim).filter(|u| !u.is_empty()) {
        lines.push(format!("User={}", user));
    }
    lines.extend([
        String::new(),
        "[Install]".to_string(),
        "WantedBy=multi-user.target".to_string(),
        String::new(),
    ]);
    lines.join("\n")
}

fn default_run_user() -> Option<String> {
    ["SUDO_USER", "USER"]
        .into_iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

async fn run_systemctl(args: &[&str]) -> Result<()> {
    let output = Command::new("systemctl")
        .args(args)
        .output()
        .await
        .with_context(|| format!("failed to run systemctl {}", args.join(" ")))?;

    if !output.status.success() {
        let mut msg = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if msg.is_empty() {
            msg = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        if msg.is_empty() {
            msg = output.status.to_string();
        }
        bail!("systemctl {} failed: {}", args.join(" "), msg);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_contains_service_settings() {
        let unit = build_systemd_unit(
            "xpost",
            Path::new("/usr/local/bin/xpost"),
            Path::new("/home/me/.config/xpost/config.json"),
            Path::new("/usr/local/bin"),
            Some(" me "),
        );

        assert!(unit.starts_with("[Unit]\nDescription=xpost service\n"));
        assert!(unit.contains("WorkingDirectory=/usr/local/bin\n"));
        assert!(unit.contains("Environment=XPOST_CONFIG=/home/me/.config/xpost/config.json\n"));
        assert!(unit.contains("ExecStart=/usr/local/bin/xpost serve\n"));
        assert!(unit.contains("RestartSec=5\nUser=me\n\n[Install]"));
        assert!(unit.ends_with("WantedBy=multi-user.target\n"));
    }

    #[test]
    fn unit_without_user() {
        let unit = build_systemd_unit(
            "xpost",
            Path::new("/opt/xpost"),
            Path::new("/etc/xpost.json"),
            Path::new("/opt"),
            None,
        );
        assert!(!unit.contains("User="));
        assert!(unit.contains("RestartSec=5\n\n[Install]"));
    }

    #[test]
    fn missing_program_is_not_found() {
        assert!(find_in_path("xpost-definitely-not-installed").is_none());
    }
}
