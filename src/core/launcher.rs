//! # Process launchers.
//!
//! A [`Launcher`] turns an [`Entity`] into the command line the supervisor spawns.
//! [`JavaLauncher`] is the production implementation; tests plug in their own.
//!
//! ## JavaLauncher command line
//! ```text
//! java -Xms{ram_min}M -Xmx{ram_max}M <G1 tuning flags> -jar server.jar nogui
//!      (working directory: the entity directory)
//! ```

use std::path::{Path, PathBuf};

use crate::entity::Entity;
use crate::provision::layout;

/// Fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program to execute (looked up on `PATH` when relative).
    pub program: PathBuf,
    /// Arguments after the program.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    /// Invocation of `program` with no arguments, running in `cwd`.
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    /// Appends arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Builds the invocation for an entity.
pub trait Launcher: Send + Sync + 'static {
    /// Invocation for `entity`, whose directory is `dir`.
    fn launch_spec(&self, entity: &Entity, dir: &Path) -> LaunchSpec;

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// G1 collector tuning for game servers with multi-GiB heaps.
pub const G1_FLAGS: &[&str] = &[
    "-XX:+UseG1GC",
    "-XX:+ParallelRefProcEnabled",
    "-XX:MaxGCPauseMillis=200",
    "-XX:+UnlockExperimentalVMOptions",
    "-XX:+DisableExplicitGC",
    "-XX:+AlwaysPreTouch",
    "-XX:G1NewSizePercent=30",
    "-XX:G1MaxNewSizePercent=40",
    "-XX:G1HeapRegionSize=8M",
    "-XX:G1ReservePercent=20",
    "-XX:G1HeapWastePercent=5",
    "-XX:G1MixedGCCountTarget=4",
    "-XX:InitiatingHeapOccupancyPercent=15",
    "-XX:G1MixedGCLiveThresholdPercent=90",
    "-XX:G1RSetUpdatingPauseTimePercent=5",
    "-XX:SurvivorRatio=32",
    "-XX:+PerfDisableSharedMem",
    "-XX:MaxTenuringThreshold=1",
    "-Dusing.aikars.flags=https://mcflags.emc.gs",
    "-Daikars.new.flags=true",
];

/// Runs `server.jar` on a JVM with the entity's heap bounds.
#[derive(Debug, Clone)]
pub struct JavaLauncher {
    java: PathBuf,
    tuning: bool,
}

impl JavaLauncher {
    /// Uses `java` from `PATH` with G1 tuning enabled.
    pub fn new() -> Self {
        Self {
            java: PathBuf::from("java"),
            tuning: true,
        }
    }

    /// Uses a specific JVM binary.
    pub fn with_java(mut self, java: impl Into<PathBuf>) -> Self {
        self.java = java.into();
        self
    }

    /// Enables or disables the G1 tuning flags.
    pub fn with_tuning(mut self, tuning: bool) -> Self {
        self.tuning = tuning;
        self
    }
}

impl Default for JavaLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher for JavaLauncher {
    fn launch_spec(&self, entity: &Entity, dir: &Path) -> LaunchSpec {
        let mut args = vec![
            format!("-Xms{}M", entity.ram_min),
            format!("-Xmx{}M", entity.ram_max),
        ];
        if self.tuning {
            args.extend(G1_FLAGS.iter().map(|f| (*f).to_string()));
        }
        args.extend([
            "-jar".to_string(),
            layout::ARTIFACT.to_string(),
            "nogui".to_string(),
        ]);
        LaunchSpec {
            program: self.java.clone(),
            args,
            cwd: dir.to_path_buf(),
            env: Vec::new(),
        }
    }

    fn name(&self) -> &'static str {
        "java"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityId, NewEntity, ProcessKind};

    #[test]
    fn test_java_command_line() {
        let mut req = NewEntity::new("s", ProcessKind::Paper, "1.20.1");
        req.ram_min = 512;
        req.ram_max = 4096;
        let entity = Entity::from_request(EntityId::from("e1"), req);

        let spec = JavaLauncher::new().launch_spec(&entity, Path::new("/srv/e1"));
        assert_eq!(spec.program, PathBuf::from("java"));
        assert_eq!(spec.cwd, PathBuf::from("/srv/e1"));
        assert_eq!(spec.args[..2], ["-Xms512M", "-Xmx4096M"]);
        assert!(spec.args.iter().any(|a| a == "-XX:+UseG1GC"));
        assert_eq!(spec.args[spec.args.len() - 3..], ["-jar", "server.jar", "nogui"]);

        let plain = JavaLauncher::new().with_tuning(false).launch_spec(&entity, Path::new("."));
        assert_eq!(plain.args.len(), 5);
    }
}
