//! # Entity directory layout.
//!
//! ```text
//! {data_dir}/{id}/
//!   server.jar            provisioned artifact (start precondition)
//!   forge-installer.jar   forge only: installer fetched instead of a runnable jar
//!   eula.txt              acceptance flag written by set_precondition
//!   server.properties     defaults written after provisioning
//!   start.sh / start.bat  manual launch scripts
//!   mods/                 packages for fabric / forge
//!   plugins/              packages for paper
//!   logs/                 written by the server itself
//! ```

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::core::LaunchSpec;
use crate::entity::{Entity, ProcessKind};

pub const ARTIFACT: &str = "server.jar";
pub const FORGE_INSTALLER: &str = "forge-installer.jar";
pub const EULA: &str = "eula.txt";
pub const PROPERTIES: &str = "server.properties";
pub const START_SH: &str = "start.sh";
pub const START_BAT: &str = "start.bat";
pub const LOGS_DIR: &str = "logs";

/// Path of the runnable artifact inside `dir`.
pub fn artifact_path(dir: &Path) -> PathBuf {
    dir.join(ARTIFACT)
}

/// Package directory name for `kind`; vanilla servers host no packages.
pub fn package_dir_name(kind: ProcessKind) -> Option<&'static str> {
    match kind {
        ProcessKind::Paper => Some("plugins"),
        ProcessKind::Fabric | ProcessKind::Forge => Some("mods"),
        ProcessKind::Vanilla => None,
    }
}

/// Package directory inside `dir` for `kind`.
pub fn package_dir(dir: &Path, kind: ProcessKind) -> Option<PathBuf> {
    package_dir_name(kind).map(|name| dir.join(name))
}

/// True for a plain file name that stays inside its directory.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name().is_some_and(|f| f == name)
}

/// Default `server.properties` entries for a freshly provisioned entity.
pub fn default_properties(entity: &Entity) -> Vec<(&'static str, String)> {
    let on = || "true".to_string();
    let off = || "false".to_string();
    vec![
        ("server-port", entity.port.to_string()),
        ("motd", format!("A {} Server", entity.name)),
        ("max-players", entity.max_players.to_string()),
        ("difficulty", "normal".to_string()),
        ("gamemode", "survival".to_string()),
        ("level-name", "world".to_string()),
        ("enable-command-block", off()),
        ("spawn-protection", "16".to_string()),
        ("view-distance", "10".to_string()),
        ("simulation-distance", "10".to_string()),
        ("online-mode", off()),
        ("white-list", off()),
        ("pvp", on()),
        ("spawn-animals", on()),
        ("spawn-monsters", on()),
        ("spawn-npcs", on()),
        ("allow-flight", off()),
        ("level-type", "minecraft:normal".to_string()),
        ("enforce-secure-profile", off()),
    ]
}

fn render_properties(entries: &[(&str, String)]) -> String {
    let mut out = format!("#Minecraft server properties\n#{}\n", Utc::now().to_rfc2822());
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

fn render_command(spec: &LaunchSpec) -> String {
    let mut cmd = spec.program.display().to_string();
    for arg in &spec.args {
        cmd.push(' ');
        cmd.push_str(arg);
    }
    cmd
}

/// Writes `eula.txt` with `eula=true|false`.
pub async fn write_eula(dir: &Path, accepted: bool) -> std::io::Result<PathBuf> {
    let path = dir.join(EULA);
    let body = format!(
        "# EULA accepted via servervisor\n# https://aka.ms/MinecraftEULA\n# {}\neula={accepted}\n",
        Utc::now().to_rfc3339()
    );
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

/// Writes `server.properties` (unless one exists) and both start scripts.
pub async fn write_defaults(dir: &Path, entity: &Entity, launch: &LaunchSpec) -> std::io::Result<()> {
    let props = dir.join(PROPERTIES);
    if !tokio::fs::try_exists(&props).await? {
        tokio::fs::write(&props, render_properties(&default_properties(entity))).await?;
    }

    let command = render_command(launch);
    let sh = dir.join(START_SH);
    tokio::fs::write(&sh, format!("#!/bin/sh\ncd \"$(dirname \"$0\")\"\nexec {command}\n")).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&sh, std::fs::Permissions::from_mode(0o755)).await?;
    }
    tokio::fs::write(dir.join(START_BAT), format!("@echo off\r\n{command}\r\npause\r\n")).await?;
    Ok(())
}
