//! Shared fixture: a fake JS runtime scripted in POSIX sh.
//!
//! The script speaks the newline-delimited JSON protocol well enough to
//! exercise the bridge end to end: it emits the readiness notification,
//! answers `ping` with `"pong"`, serves a deliberately slow method in the
//! background, and fails on demand for retry tests. Request ids are pulled
//! out with sed, so no JS runtime needs to be installed on the test machine.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use haven::runtime::bridge::RuntimeConfig;
use haven::runtime::manager::ManagerConfig;
use tempfile::TempDir;

/// Readiness signal plus one unsolicited response the bridge must discard.
const PREAMBLE: &str = r#"
emit() { printf '%s\n' "$1"; }
emit '{"jsonrpc":"2.0","method":"ready","params":{}}'
emit '{"jsonrpc":"2.0","id":"unsolicited-id","result":1}'
"#;

/// Request-serving loop shared by the responsive variants.
const SERVE_LOOP: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  method=$(printf '%s' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  case "$method" in
    shutdown)
      exit 0
      ;;
    ping)
      [ -n "$id" ] && emit "{\"jsonrpc\":\"2.0\",\"id\":\"$id\",\"result\":\"pong\"}"
      ;;
    slow.op)
      ( sleep 2; [ -n "$id" ] && emit "{\"jsonrpc\":\"2.0\",\"id\":\"$id\",\"result\":\"late\"}" ) &
      ;;
    env.token)
      [ -n "$id" ] && emit "{\"jsonrpc\":\"2.0\",\"id\":\"$id\",\"result\":\"${HAVEN_TEST_TOKEN:-missing}\"}"
      ;;
    fail.once)
      if [ -f "$0.failed" ]; then
        [ -n "$id" ] && emit "{\"jsonrpc\":\"2.0\",\"id\":\"$id\",\"result\":\"recovered\"}"
      else
        : > "$0.failed"
        [ -n "$id" ] && emit "{\"jsonrpc\":\"2.0\",\"id\":\"$id\",\"error\":{\"code\":-32000,\"message\":\"transient failure\"}}"
      fi
      ;;
    fail.always)
      [ -n "$id" ] && emit "{\"jsonrpc\":\"2.0\",\"id\":\"$id\",\"error\":{\"code\":-32601,\"message\":\"Method not found\"}}"
      ;;
    *)
      [ -n "$id" ] && emit "{\"jsonrpc\":\"2.0\",\"id\":\"$id\",\"result\":{\"echo\":\"$method\"}}"
      ;;
  esac
done
"#;

/// A fake JS runtime provisioned in a temp dir.
///
/// The script is named `bun` so argv dispatch produces a plain
/// `bun run <entry>` invocation the script can ignore.
pub struct FakeRuntime {
    pub dir: TempDir,
    pub executable: PathBuf,
}

impl FakeRuntime {
    /// Fully responsive runtime.
    pub fn responsive() -> FakeRuntime {
        Self::with_script(&format!("{PREAMBLE}\n{SERVE_LOOP}"))
    }

    /// Emits one `test.event` notification after readiness, then serves.
    pub fn notifier() -> FakeRuntime {
        let notify = r#"emit '{"jsonrpc":"2.0","method":"test.event","params":{"value":7}}'"#;
        Self::with_script(&format!("{PREAMBLE}\n{notify}\n{SERVE_LOOP}"))
    }

    /// Never signals readiness.
    pub fn silent() -> FakeRuntime {
        Self::with_script("sleep 60")
    }

    /// Signals readiness but never answers any request.
    pub fn deaf() -> FakeRuntime {
        let swallow = "while IFS= read -r line; do :; done";
        Self::with_script(&format!("{PREAMBLE}\n{swallow}"))
    }

    /// Exits before readiness on the first run, serves normally afterwards.
    pub fn fails_first_start() -> FakeRuntime {
        let gate = r#"
if [ ! -f "$0.started" ]; then
  : > "$0.started"
  exit 1
fi
"#;
        Self::with_script(&format!("{gate}\n{PREAMBLE}\n{SERVE_LOOP}"))
    }

    pub fn with_script(body: &str) -> FakeRuntime {
        let dir = tempfile::tempdir().expect("create tempdir");
        let executable = dir.path().join("bun");
        fs::write(&executable, format!("#!/bin/sh\n{body}\n")).expect("write fake runtime");
        fs::set_permissions(&executable, fs::Permissions::from_mode(0o755))
            .expect("mark fake runtime executable");
        FakeRuntime { dir, executable }
    }

    /// Bridge configuration pointing at this fake runtime.
    pub fn config(&self) -> RuntimeConfig {
        let mut env_vars = HashMap::new();
        // The script needs a usable PATH for sed and sleep.
        env_vars.insert(
            "PATH".to_string(),
            std::env::var("PATH").unwrap_or_default(),
        );
        RuntimeConfig {
            services_path: Some(self.dir.path().to_path_buf()),
            runtime_executable: Some(self.executable.clone()),
            startup_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            env_vars,
            debug: false,
        }
    }

    /// Manager configuration pointing at this fake runtime.
    pub fn manager_config(&self, health_check_interval: Duration) -> ManagerConfig {
        ManagerConfig {
            services_path: Some(self.dir.path().to_path_buf()),
            runtime_executable: Some(self.executable.clone()),
            startup_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            health_check_interval,
            debug: false,
        }
    }
}
