//! nginx reload coordination.
//!
//! Reloads are serialized: a caller arriving while a reload is in flight
//! waits for it and then shares the next reload with every other caller that
//! arrived in the meantime. Every caller is therefore guaranteed that a
//! reload started after its request, without stacking one reload per caller.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use tracing::{debug, error, info};

use crate::cmd_abstraction::{CommandExecutor, RealCommandExecutor};

const SYSTEMCTL_PATH: &str = "/usr/bin/systemctl";

/// Result of a reload request. Failures are reported, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Reloaded,
    Failed,
}

#[derive(Debug)]
struct ReloadState {
    /// Number of reloads started so far.
    started: u64,
    /// Number of reloads finished so far.
    finished: u64,
    in_flight: bool,
    last: ReloadOutcome,
}

/// Invokes the service manager to reload nginx.
pub struct NginxReloader {
    command: Vec<String>,
    user_account: String,
    executor: Arc<dyn CommandExecutor>,
    state: Mutex<ReloadState>,
    done: Condvar,
}

impl NginxReloader {
    /// Create a reloader running `command` (argv, first element is the program).
    pub fn new(command: Vec<String>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            command,
            user_account: current_user(),
            executor,
            state: Mutex::new(ReloadState {
                started: 0,
                finished: 0,
                in_flight: false,
                last: ReloadOutcome::Reloaded,
            }),
            done: Condvar::new(),
        }
    }

    /// Create a reloader for the configured command, falling back to
    /// [`default_reload_command`] when none is configured.
    pub fn from_command(command: &[String]) -> Self {
        let command = if command.is_empty() {
            default_reload_command(is_root())
        } else {
            command.to_vec()
        };
        Self::new(command, Arc::new(RealCommandExecutor::new()))
    }

    /// Reload nginx, waiting for any reload already in flight.
    pub fn reload(&self) -> ReloadOutcome {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // A reload that is already running may predate our request.
        let target = state.started + 1;

        loop {
            if state.finished >= target {
                debug!("Reload already performed by a concurrent caller");
                return state.last;
            }

            if !state.in_flight {
                state.started += 1;
                state.in_flight = true;
                drop(state);

                let outcome = self.run_command();

                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                state.finished = state.started;
                state.in_flight = false;
                state.last = outcome;
                self.done.notify_all();
                return outcome;
            }

            state = self
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn run_command(&self) -> ReloadOutcome {
        let Some((program, args)) = self.command.split_first() else {
            error!("No reload command configured, nginx not reloaded");
            return ReloadOutcome::Failed;
        };

        info!(command = %self.command.join(" "), "Reloading nginx");
        match self.executor.execute(program, args) {
            Ok(output) if output.success => {
                info!("Nginx reloaded");
                ReloadOutcome::Reloaded
            }
            Ok(output) => {
                error!(
                    code = ?output.code,
                    stderr = %output.stderr.trim(),
                    "{}",
                    self.remediation()
                );
                ReloadOutcome::Failed
            }
            Err(e) => {
                error!(error = %e, "{}", self.remediation());
                ReloadOutcome::Failed
            }
        }
    }

    /// Operator guidance logged when the reload command fails.
    pub fn remediation(&self) -> String {
        let user = &self.user_account;
        format!(
            "Couldn't reload nginx, either:\n\
             Nginx isn't installed\n\
             or\n\
             Sudoers rule not created for this user ({user})\n\
             Create and edit a sudoers file\n \
             visudo /etc/sudoers.d/{user}\n\
             And insert the text: {user} ALL=(root) NOPASSWD: {SYSTEMCTL_PATH} reload nginx"
        )
    }
}

/// The reload argv: `systemctl reload nginx`, prefixed with `sudo` when not
/// running as root.
pub fn default_reload_command(root: bool) -> Vec<String> {
    let mut command = Vec::with_capacity(4);
    if !root {
        command.push("sudo".to_string());
    }
    command.extend([SYSTEMCTL_PATH, "reload", "nginx"].map(String::from));
    command
}

/// Check if running as root (effective UID == 0)
pub fn is_root() -> bool {
    // SAFETY: geteuid() is a simple syscall that reads the effective user ID.
    // It has no preconditions, never fails, and doesn't modify any state.
    unsafe { libc::geteuid() == 0 }
}

/// Name of the account running the process, for remediation messages.
fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| {
            // SAFETY: see is_root
            let uid = unsafe { libc::geteuid() };
            format!("uid {}", uid)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_abstraction::{CommandOutput, MockCommandExecutor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn success_output() -> CommandOutput {
        CommandOutput {
            success: true,
            code: Some(0),
            ..Default::default()
        }
    }

    fn failure_output(stderr: &str) -> CommandOutput {
        CommandOutput {
            stderr: stderr.to_string(),
            success: false,
            code: Some(1),
            ..Default::default()
        }
    }

    /// Executor that sleeps to keep a reload in flight and counts calls.
    struct SlowExecutor {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CommandExecutor for SlowExecutor {
        fn execute(&self, _cmd: &str, _args: &[String]) -> anyhow::Result<CommandOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Ok(success_output())
        }
    }

    #[test]
    fn test_default_command_as_root() {
        assert_eq!(
            default_reload_command(true),
            vec!["/usr/bin/systemctl", "reload", "nginx"]
        );
    }

    #[test]
    fn test_default_command_unprivileged_uses_sudo() {
        assert_eq!(
            default_reload_command(false),
            vec!["sudo", "/usr/bin/systemctl", "reload", "nginx"]
        );
    }

    #[test]
    fn test_reload_success() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|cmd, args| cmd == "systemctl" && args == ["reload".to_string(), "nginx".to_string()])
            .times(1)
            .returning(|_, _| Ok(success_output()));

        let reloader = NginxReloader::new(
            vec!["systemctl".into(), "reload".into(), "nginx".into()],
            Arc::new(mock),
        );
        assert_eq!(reloader.reload(), ReloadOutcome::Reloaded);
    }

    #[test]
    fn test_reload_failure_is_not_fatal() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .times(2)
            .returning(|_, _| Ok(failure_output("Job for nginx.service failed")));

        let reloader = NginxReloader::new(vec!["systemctl".into()], Arc::new(mock));
        assert_eq!(reloader.reload(), ReloadOutcome::Failed);
        // A later reload still runs
        assert_eq!(reloader.reload(), ReloadOutcome::Failed);
    }

    #[test]
    fn test_reload_spawn_error_is_failure() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("No such file or directory")));

        let reloader = NginxReloader::new(vec!["systemctl".into()], Arc::new(mock));
        assert_eq!(reloader.reload(), ReloadOutcome::Failed);
    }

    #[test]
    fn test_empty_command_fails() {
        let mock = MockCommandExecutor::new();
        let reloader = NginxReloader::new(Vec::new(), Arc::new(mock));
        assert_eq!(reloader.reload(), ReloadOutcome::Failed);
    }

    #[test]
    fn test_remediation_mentions_sudoers_rule() {
        let reloader = NginxReloader::new(vec!["true".into()], Arc::new(MockCommandExecutor::new()));
        let text = reloader.remediation();
        assert!(text.contains("Couldn't reload nginx"));
        assert!(text.contains("visudo /etc/sudoers.d/"));
        assert!(text.contains("NOPASSWD: /usr/bin/systemctl reload nginx"));
    }

    #[test]
    fn test_sequential_reloads_each_run() {
        let executor = Arc::new(SlowExecutor {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(1),
        });
        let reloader = NginxReloader::new(vec!["x".into()], executor.clone());

        reloader.reload();
        reloader.reload();
        reloader.reload();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_concurrent_reloads_are_coalesced() {
        let executor = Arc::new(SlowExecutor {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let reloader = Arc::new(NginxReloader::new(vec!["x".into()], executor.clone()));

        let first = {
            let reloader = Arc::clone(&reloader);
            thread::spawn(move || reloader.reload())
        };
        // Let the first reload get in flight
        thread::sleep(Duration::from_millis(50));

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let reloader = Arc::clone(&reloader);
                thread::spawn(move || reloader.reload())
            })
            .collect();

        assert_eq!(first.join().unwrap(), ReloadOutcome::Reloaded);
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), ReloadOutcome::Reloaded);
        }

        // One in-flight reload plus one shared follow-up
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }
}
