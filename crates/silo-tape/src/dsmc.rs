//! Backup client driven as a subprocess.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::{
    parse_listing, TapeAgent, TapeListing, TapeRun, STATUS_SPAWN_FAILED, STATUS_TIMEOUT,
    STATUS_UNKNOWN,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long a terminated client gets to exit before it is killed outright
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Tape agent backed by the `dsmc` command line client
#[derive(Debug, Clone)]
pub struct DsmcAgent {
    program: PathBuf,
    /// Arguments placed before every command, e.g. `-optfile=...`
    options: Vec<OsString>,
    server: String,
    owner: Option<String>,
    default_timeout: Duration,
}

impl DsmcAgent {
    pub fn new(program: impl Into<PathBuf>, server: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            options: Vec::new(),
            server: server.into(),
            owner: None,
            default_timeout: Duration::from_secs(3600),
        }
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Restore on behalf of another node owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn server_arg(&self) -> OsString {
        format!("-servername={}", self.server).into()
    }

    fn run(&self, args: Vec<OsString>, timeout: Option<Duration>) -> TapeRun {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut all_args = self.options.clone();
        all_args.extend(args);

        let command = std::iter::once(self.program.as_os_str())
            .chain(all_args.iter().map(|a| a.as_os_str()))
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        debug!(command = command.as_str(), "running tape client");

        let mut child = match Command::new(&self.program)
            .args(&all_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return TapeRun {
                    command,
                    status: STATUS_SPAWN_FAILED,
                    output: Vec::new(),
                    errors: vec![format!("could not start {}: {}", self.program.display(), e)],
                }
            }
        };

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let (status, note) = wait_with_timeout(&mut child, timeout);

        let output = collect(stdout);
        let mut errors = collect(stderr);
        if let Some(note) = note {
            warn!(command = command.as_str(), "{}", note);
            errors.push(note);
        }

        TapeRun {
            command,
            status,
            output,
            errors,
        }
    }
}

/// Read a pipe to exhaustion on its own thread so neither pipe can fill and
/// stall the client.
fn drain<R: Read + Send + 'static>(pipe: R) -> JoinHandle<Vec<String>> {
    thread::spawn(move || BufReader::new(pipe).lines().map_while(Result::ok).collect())
}

fn collect(handle: Option<JoinHandle<Vec<String>>>) -> Vec<String> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Wait for the client, terminating it once `timeout` passes. Returns the
/// status and, when something went wrong, a line for the error log.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> (i32, Option<String>) {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return match status.code() {
                    Some(code) => (code, None),
                    None => (STATUS_UNKNOWN, Some(format!("client ended without exit code: {}", status))),
                }
            }
            Ok(None) if Instant::now() >= deadline => {
                terminate(child);
                return (
                    STATUS_TIMEOUT,
                    Some(format!("timed out after {} seconds", timeout.as_secs_f64())),
                );
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return (STATUS_UNKNOWN, Some(format!("could not wait for client: {}", e))),
        }
    }
}

/// SIGTERM, then SIGKILL if the client is still there after the grace period.
fn terminate(child: &mut Child) {
    let pid = Pid::from_raw(child.id() as i32);
    if let Err(e) = kill(pid, Signal::SIGTERM) {
        warn!(pid = child.id(), "SIGTERM failed: {}", e);
    }
    let deadline = Instant::now() + TERM_GRACE;
    while Instant::now() < deadline {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn with_trailing_slash(path: &Path) -> OsString {
    let mut s = path.as_os_str().to_os_string();
    if !path.to_string_lossy().ends_with('/') {
        s.push("/");
    }
    s
}

impl TapeAgent for DsmcAgent {
    fn save(&self, path: &Path, timeout: Option<Duration>) -> TapeRun {
        self.run(
            vec![
                "backup".into(),
                self.server_arg(),
                "-subdir=yes".into(),
                path.as_os_str().to_os_string(),
            ],
            timeout,
        )
    }

    fn list(&self, path: &Path, timeout: Option<Duration>) -> TapeListing {
        let run = self.run(
            vec![
                "query".into(),
                "backup".into(),
                "-detail".into(),
                "-inactive".into(),
                "-filesonly".into(),
                self.server_arg(),
                "-scrollprompt=no".into(),
                "-subdir=yes".into(),
                with_trailing_slash(path),
            ],
            timeout,
        );
        let files = if run.status == 0 && run.errors.is_empty() {
            parse_listing(&run.output)
        } else {
            Vec::new()
        };
        TapeListing { run, files }
    }

    fn restore(&self, source: &Path, destination: &Path, timeout: Option<Duration>) -> TapeRun {
        let mut pattern = with_trailing_slash(source);
        pattern.push("*");

        let mut args: Vec<OsString> = vec![
            "restore".into(),
            "-replace=no".into(),
            "-filesonly".into(),
            "-subdir=yes".into(),
        ];
        if let Some(owner) = &self.owner {
            args.push(format!("-fromowner={}", owner).into());
        }
        args.push(self.server_arg());
        args.push(pattern);
        args.push(with_trailing_slash(destination));
        self.run(args, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TapeOutcome;
    use tempfile::TempDir;

    /// Agent that runs a shell script in place of the real client.
    fn scripted(script: &str) -> (TempDir, DsmcAgent) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fake-dsmc.sh");
        std::fs::write(&path, script).unwrap();
        let agent = DsmcAgent::new("/bin/sh", "tsm-test").with_options([path.into_os_string()]);
        (temp, agent)
    }

    #[test]
    fn test_restore_passes_arguments_and_status() {
        let (temp, agent) = scripted("echo \"$@\"\necho restored >&2\nexit 4\n");
        let agent = agent.with_owner("daitss");
        let run = agent.restore(Path::new("/silo/abc"), temp.path(), None);

        assert_eq!(run.status, 4);
        assert_eq!(run.outcome(), TapeOutcome::Success);
        assert_eq!(run.errors, vec!["restored"]);
        let echoed = &run.output[0];
        assert!(echoed.starts_with("restore -replace=no -filesonly -subdir=yes -fromowner=daitss"));
        assert!(echoed.contains("-servername=tsm-test /silo/abc/*"));
        assert!(echoed.ends_with('/'));
    }

    #[test]
    fn test_list_parses_successful_output() {
        let script = "cat <<'EOF'\n\
              10  B  01/01/2011 00:00:00  DEFAULT  A  /silo/b/data\n\
              Modified: 01/01/2011 00:00:00  Accessed: 01/01/2011 00:00:00\n\
              20  B  01/01/2011 00:00:00  DEFAULT  A  /silo/a/data\n\
EOF\n";
        let (_temp, agent) = scripted(script);
        let listing = agent.list(Path::new("/silo"), None);

        assert_eq!(listing.run.status, 0);
        let paths: Vec<_> = listing.files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(paths, [PathBuf::from("/silo/a/data"), PathBuf::from("/silo/b/data")]);
    }

    #[test]
    fn test_list_ignores_output_of_failed_run() {
        let (_temp, agent) = scripted("echo '10 B 01/01/2011 00:00:00 X A /p'\nexit 8\n");
        let listing = agent.list(Path::new("/silo"), None);
        assert_eq!(listing.run.outcome(), TapeOutcome::Warning);
        assert!(listing.files.is_empty());
    }

    #[test]
    fn test_timeout_terminates_client() {
        let (_temp, agent) = scripted("exec sleep 30\n");
        let started = Instant::now();
        let run = agent.save(Path::new("/silo"), Some(Duration::from_millis(200)));

        assert_eq!(run.status, STATUS_TIMEOUT);
        assert_eq!(run.outcome(), TapeOutcome::Fatal);
        assert!(run.errors.iter().any(|l| l.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_client_is_spawn_failure() {
        let temp = TempDir::new().unwrap();
        let agent = DsmcAgent::new(temp.path().join("no-such-dsmc"), "tsm");
        let run = agent.save(Path::new("/silo"), None);
        assert_eq!(run.status, STATUS_SPAWN_FAILED);
        assert_eq!(run.outcome(), TapeOutcome::Fatal);
        assert!(!run.errors.is_empty());
    }

    #[test]
    fn test_large_output_does_not_deadlock() {
        let (_temp, agent) =
            scripted("i=0\nwhile [ $i -lt 20000 ]; do echo out $i; echo err $i >&2; i=$((i+1)); done\n");
        let run = agent.save(Path::new("/silo"), Some(Duration::from_secs(60)));
        assert_eq!(run.status, 0);
        assert_eq!(run.output.len(), 20000);
        assert_eq!(run.errors.len(), 20000);
    }
}
