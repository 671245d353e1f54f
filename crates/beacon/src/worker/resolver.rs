//! Worker executable resolution.
//!
//! Resolving is the step that turns a role into "which binary, which flags". It
//! happens once at startup for both roles so a missing binary aborts the node
//! before it sends any discovery traffic. Flag values may carry placeholders
//! (`{leader_host}`, `{leader_port}`, `{leader_url}`) that are filled in once the
//! leader is known.

use std::fmt;
use std::path::{Path, PathBuf};

use beacon_common::constants::placeholders;
use beacon_common::{BeaconError, LeaderAddress, Role};

use crate::config::WorkerProgram;

/// One command-line flag, bare (`--foo`) or valued (`--foo=bar`).
///
/// Positional arguments are not supported: every configured entry must start
/// with `-`. A value that needs its own word goes after `=` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    pub name: String,
    pub value: Option<String>,
}

impl Flag {
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn valued(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Parse `--foo` or `--foo=bar`
    pub fn parse(raw: &str) -> Result<Self, BeaconError> {
        let raw = raw.trim();
        if !raw.starts_with('-') || raw.trim_start_matches('-').is_empty() {
            return Err(BeaconError::Resolve(format!("'{raw}' is not a flag")));
        }

        Ok(match raw.split_once('=') {
            Some((name, value)) => Self::valued(name, value),
            None => Self::bare(raw),
        })
    }

    /// Render with leader placeholders substituted
    pub fn render(&self, leader: &LeaderAddress) -> String {
        match &self.value {
            None => self.name.clone(),
            Some(value) => {
                let value = value
                    .replace(placeholders::LEADER_URL, &leader.url())
                    .replace(placeholders::LEADER_HOST, &leader.host)
                    .replace(placeholders::LEADER_PORT, &leader.port.to_string());
                format!("{}={}", self.name, value)
            }
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            None => f.write_str(&self.name),
            Some(value) => write!(f, "{}={}", self.name, value),
        }
    }
}

/// A resolved executable and its flags, before placeholders are filled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub executable: PathBuf,
    pub flags: Vec<Flag>,
}

impl WorkerSpec {
    pub fn render(&self, leader: &LeaderAddress) -> WorkerCommand {
        WorkerCommand {
            executable: self.executable.clone(),
            args: self.flags.iter().map(|flag| flag.render(leader)).collect(),
        }
    }
}

/// A ready-to-run command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub executable: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
        }
    }
}

/// Maps a role to the worker that implements it
pub trait WorkerResolver {
    fn resolve(&self, role: Role) -> Result<WorkerSpec, BeaconError>;
}

/// Both roles, resolved up front
#[derive(Debug, Clone)]
pub struct ResolvedWorkers {
    pub leader: WorkerSpec,
    pub follower: WorkerSpec,
}

impl ResolvedWorkers {
    pub fn resolve(resolver: &impl WorkerResolver) -> Result<Self, BeaconError> {
        Ok(Self {
            leader: resolver.resolve(Role::Leader)?,
            follower: resolver.resolve(Role::Follower)?,
        })
    }

    pub fn for_role(&self, role: Role) -> &WorkerSpec {
        match role {
            Role::Leader => &self.leader,
            Role::Follower => &self.follower,
        }
    }
}

/// Resolver backed by the `[worker.leader]` / `[worker.follower]` config sections
pub struct ConfiguredResolver {
    leader: WorkerProgram,
    follower: WorkerProgram,
}

impl ConfiguredResolver {
    pub fn new(leader: WorkerProgram, follower: WorkerProgram) -> Self {
        Self { leader, follower }
    }
}

impl WorkerResolver for ConfiguredResolver {
    fn resolve(&self, role: Role) -> Result<WorkerSpec, BeaconError> {
        let program = match role {
            Role::Leader => &self.leader,
            Role::Follower => &self.follower,
        };

        if program.executable.trim().is_empty() {
            return Err(BeaconError::Resolve(format!(
                "no {role} executable configured"
            )));
        }

        let executable = locate_executable(Path::new(&program.executable)).ok_or_else(|| {
            BeaconError::Resolve(format!(
                "{role} executable '{}' not found or not executable",
                program.executable
            ))
        })?;

        let flags = program
            .flags
            .iter()
            .map(|raw| Flag::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(role = %role, executable = %executable.display(), flags = flags.len(), "Resolved worker");

        Ok(WorkerSpec { executable, flags })
    }
}

/// Bare names are looked up on `PATH`; anything with a separator is taken as-is
fn locate_executable(path: &Path) -> Option<PathBuf> {
    if path.components().count() > 1 || path.is_absolute() {
        return is_executable(path).then(|| path.to_path_buf());
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(path))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(executable: &str, flags: &[&str]) -> WorkerProgram {
        WorkerProgram {
            executable: executable.to_string(),
            flags: flags.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn test_flag_parse() {
        assert_eq!(Flag::parse("--verbose").unwrap(), Flag::bare("--verbose"));
        assert_eq!(
            Flag::parse("--master=spark://h:7077").unwrap(),
            Flag::valued("--master", "spark://h:7077")
        );
        assert!(Flag::parse("positional").is_err());
        assert!(Flag::parse("--").is_err());
    }

    #[test]
    fn test_render_substitutes_leader() {
        let spec = WorkerSpec {
            executable: PathBuf::from("/opt/follower"),
            flags: vec![
                Flag::bare("--quiet"),
                Flag::valued("--leader", "{leader_host}:{leader_port}"),
                Flag::valued("--ui", "{leader_url}"),
            ],
        };

        let command = spec.render(&LeaderAddress::new("10.0.0.4", 8080));
        assert_eq!(
            command.args,
            vec![
                "--quiet".to_string(),
                "--leader=10.0.0.4:8080".to_string(),
                "--ui=http://10.0.0.4:8080/".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_configured_resolver() {
        let resolver = ConfiguredResolver::new(
            program("/bin/sh", &["--port={leader_port}"]),
            program("sh", &[]),
        );

        let workers = ResolvedWorkers::resolve(&resolver).unwrap();
        assert_eq!(workers.leader.executable, PathBuf::from("/bin/sh"));
        assert_eq!(workers.for_role(Role::Leader).flags.len(), 1);
        assert!(workers.follower.executable.ends_with("sh"));
    }

    #[test]
    fn test_missing_executable_is_resolve_error() {
        let resolver = ConfiguredResolver::new(
            program("/nonexistent/leader", &[]),
            program("", &[]),
        );

        assert!(matches!(
            resolver.resolve(Role::Leader),
            Err(BeaconError::Resolve(_))
        ));
        assert!(matches!(
            resolver.resolve(Role::Follower),
            Err(BeaconError::Resolve(_))
        ));
        assert!(ResolvedWorkers::resolve(&resolver).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_bad_flag_is_resolve_error() {
        let resolver = ConfiguredResolver::new(program("/bin/sh", &["oops"]), program("sh", &[]));
        assert!(resolver.resolve(Role::Leader).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_positional_argument_is_rejected_with_its_text() {
        let resolver =
            ConfiguredResolver::new(program("/bin/sh", &["-c", "exit 0"]), program("sh", &[]));
        match resolver.resolve(Role::Leader) {
            Err(BeaconError::Resolve(msg)) => assert!(msg.contains("exit 0")),
            other => panic!("expected resolve error, got {other:?}"),
        }
    }
}
