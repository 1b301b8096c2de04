//! JS runtime discovery.
//!
//! Auto-detects installed JavaScript runtimes (Deno, Bun, Node.js) and builds
//! the invocation arguments appropriate for each kind. Discovery is a pure
//! function of PATH plus a short best-effort version probe; it never requires
//! the caller to know what is installed.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::error::{BridgeError, BridgeResult};

const TARGET: &str = "haven::runtime::discovery";

/// Hard cap on the `--version` probe of a candidate runtime.
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Supported JavaScript runtime kinds.
///
/// A closed set: argv construction dispatches on this tag, never on ad-hoc
/// string sniffing at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    Deno,
    Bun,
    Node,
}

impl RuntimeKind {
    /// Detection order, preferred first.
    pub const PREFERENCE: [RuntimeKind; 3] = [RuntimeKind::Deno, RuntimeKind::Bun, RuntimeKind::Node];

    /// Executable names tried on PATH for this kind, in order.
    pub fn executable_names(self) -> &'static [&'static str] {
        match self {
            RuntimeKind::Deno => &["deno"],
            RuntimeKind::Bun => &["bun"],
            RuntimeKind::Node => &["node", "nodejs"],
        }
    }

    /// Classify an executable path by its file name.
    ///
    /// Anything that is neither deno nor bun is treated as Node.js, matching
    /// the services entry point's own assumption.
    pub fn from_executable(executable: &Path) -> RuntimeKind {
        let name = executable
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.contains("deno") {
            RuntimeKind::Deno
        } else if name.contains("bun") {
            RuntimeKind::Bun
        } else {
            RuntimeKind::Node
        }
    }

    /// Best-effort parse of this kind's `--version` output.
    fn parse_version(self, output: &str) -> Option<String> {
        let output = output.trim();
        match self {
            // Output: "deno 1.x.x (release, ...)"
            RuntimeKind::Deno => output
                .lines()
                .find(|line| line.starts_with("deno"))
                .and_then(|line| line.split_whitespace().nth(1))
                .map(str::to_string),
            // Output: "v18.x.x"
            RuntimeKind::Node => output
                .trim_start_matches('v')
                .split_whitespace()
                .next()
                .map(str::to_string),
            // Output: "1.x.x"
            RuntimeKind::Bun => output.split_whitespace().next().map(str::to_string),
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeKind::Deno => write!(f, "Deno"),
            RuntimeKind::Bun => write!(f, "Bun"),
            RuntimeKind::Node => write!(f, "Node.js"),
        }
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deno" => Ok(RuntimeKind::Deno),
            "bun" => Ok(RuntimeKind::Bun),
            "node" | "nodejs" => Ok(RuntimeKind::Node),
            other => Err(format!(
                "unknown runtime kind '{other}' (expected deno, bun or node)"
            )),
        }
    }
}

/// Information about a discovered runtime. Immutable once returned.
#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    pub kind: RuntimeKind,
    pub executable: PathBuf,
    pub version: Option<String>,
}

impl RuntimeInfo {
    /// Display name such as "Deno v1.46.3"
    pub fn display_name(&self) -> String {
        match &self.version {
            Some(version) => format!("{} v{}", self.kind, version),
            None => self.kind.to_string(),
        }
    }
}

/// Discover an available JavaScript runtime.
///
/// Kinds are tried in [`RuntimeKind::PREFERENCE`] order, with `preferred`
/// promoted to the front when given. Fails only when no kind matches at all.
pub async fn discover_runtime(preferred: Option<RuntimeKind>) -> BridgeResult<RuntimeInfo> {
    let path = env::var_os("PATH").unwrap_or_default();
    discover_runtime_in(preferred, &path).await
}

/// Discover all installed runtimes, in preference order.
pub async fn discover_all_runtimes() -> Vec<RuntimeInfo> {
    let path = env::var_os("PATH").unwrap_or_default();
    let mut runtimes = Vec::new();
    for kind in RuntimeKind::PREFERENCE {
        if let Some(info) = detect_runtime(kind, &path).await {
            runtimes.push(info);
        }
    }
    runtimes
}

/// Discovery against an explicit PATH value.
pub(crate) async fn discover_runtime_in(
    preferred: Option<RuntimeKind>,
    path: &OsStr,
) -> BridgeResult<RuntimeInfo> {
    let mut search_order: Vec<RuntimeKind> = RuntimeKind::PREFERENCE.to_vec();
    if let Some(preferred) = preferred {
        search_order.retain(|kind| *kind != preferred);
        search_order.insert(0, preferred);
    }

    for kind in search_order {
        if let Some(info) = detect_runtime(kind, path).await {
            log::info!(target: TARGET, "Discovered runtime: {}", info.display_name());
            return Ok(info);
        }
    }

    Err(BridgeError::NoRuntimeFound)
}

/// Detect a specific runtime kind on the given PATH.
async fn detect_runtime(kind: RuntimeKind, path: &OsStr) -> Option<RuntimeInfo> {
    let executable = find_executable(kind.executable_names(), path)?;
    let version = probe_version(&executable, kind).await;
    Some(RuntimeInfo {
        kind,
        executable,
        version,
    })
}

/// Look up the first of `names` present on the given PATH value.
///
/// Pure with respect to process environment: callers supply the PATH.
pub(crate) fn find_executable(names: &[&str], path: &OsStr) -> Option<PathBuf> {
    for dir in env::split_paths(path) {
        for name in names {
            let candidate = dir.join(name);
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Query `<executable> --version` with a hard timeout.
///
/// Best-effort: a missing or unparseable version never fails discovery.
async fn probe_version(executable: &Path, kind: RuntimeKind) -> Option<String> {
    let output = tokio::time::timeout(
        VERSION_PROBE_TIMEOUT,
        Command::new(executable)
            .arg("--version")
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match output {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            kind.parse_version(&stdout)
        }
        Ok(Err(e)) => {
            log::debug!(target: TARGET, "Failed to get version for {}: {}", executable.display(), e);
            None
        }
        Err(_) => {
            log::debug!(target: TARGET, "Version probe for {} timed out", executable.display());
            None
        }
    }
}

/// Build the argv (program first) for running the services entry point.
///
/// Dispatches on the runtime kind derived from the executable name.
pub fn runtime_args(executable: &Path, entry_point: &Path, debug: bool) -> Vec<String> {
    match RuntimeKind::from_executable(executable) {
        RuntimeKind::Deno => deno_args(executable, entry_point, debug),
        RuntimeKind::Bun => bun_args(executable, entry_point, debug),
        RuntimeKind::Node => node_args(executable, entry_point, debug),
    }
}

fn deno_args(executable: &Path, entry_point: &Path, debug: bool) -> Vec<String> {
    let mut args = vec![
        executable.display().to_string(),
        "run".to_string(),
        // Permissions required for browser SDK compatibility; --allow-sys
        // covers Deno.hostname() in the browser shim.
        "--allow-read".to_string(),
        "--allow-write".to_string(),
        "--allow-net".to_string(),
        "--allow-env".to_string(),
        "--allow-sys".to_string(),
    ];
    if debug {
        args.push("--inspect".to_string());
    }
    args.push(entry_point.display().to_string());
    args
}

fn bun_args(executable: &Path, entry_point: &Path, debug: bool) -> Vec<String> {
    let mut args = vec![executable.display().to_string(), "run".to_string()];
    if debug {
        args.push("--inspect".to_string());
    }
    args.push(entry_point.display().to_string());
    args
}

fn node_args(executable: &Path, entry_point: &Path, debug: bool) -> Vec<String> {
    let mut args = vec![executable.display().to_string()];

    // Node cannot execute TypeScript natively; prefer a tsx or ts-node
    // loader from PATH and degrade with a warning when neither exists.
    if entry_point.extension().is_some_and(|ext| ext == "ts") {
        let path = env::var_os("PATH").unwrap_or_default();
        if let Some(tsx) = find_executable(&["tsx"], &path) {
            args = vec![tsx.display().to_string()];
        } else if let Some(ts_node) = find_executable(&["ts-node"], &path) {
            args = vec![ts_node.display().to_string()];
        } else {
            log::warn!(
                target: TARGET,
                "TypeScript entry point requires tsx or ts-node; install with: npm install -g tsx"
            );
        }
    }

    if debug {
        args.push("--inspect".to_string());
    }

    // Enable ES module specifier resolution
    args.push("--experimental-specifier-resolution=node".to_string());
    args.push(entry_point.display().to_string());
    args
}
