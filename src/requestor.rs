//! The Requestor abstraction: hands an accumulated [`Builder`](crate::builder::Builder)'s
//! commands to a submission backend and returns its raw outcome.
//!
//! The JSON boundary rule (spec §4.3) is enforced here and nowhere else in
//! the crate: `serde_json::to_string`/`serde_json::from_str` calls on the
//! wire payload live only in [`LocalRequestor::submit`]. Every other module
//! works with typed `schema`/`expr`/`stmt` values or, for decoded reply
//! items, generic `serde_json::Value`s.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::schema::Nftables;

/// The helper program invoked by [`LocalRequestor`] when no override is
/// given via [`SubmitOptions::program`].
const NFT_EXECUTABLE: &str = "nft";

/// Default submit timeout (spec §5: "synchronous with a configurable
/// timeout (default 5 seconds)").
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// What a [`Requestor::submit`] call hands back on success.
///
/// A fully empty helper reply (or one whose `nftables` array is empty)
/// collapses to `Empty`; anything else is carried as the ordered list of
/// reply items, ready for [`crate::decoder::decode`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// A write confirmation of an empty batch.
    Empty,
    /// The `nftables` array's items, metainfo and data alike.
    Reply(Vec<Value>),
}

/// Communication and kernel-rejection failures a [`Requestor`] may return.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("no requestor bound: pass one via SubmitOptions or Builder::set_requestor")]
    NoRequestor,
    #[error("submission timed out after {0:?}")]
    Timeout(Duration),
    #[error("unable to execute {program}: {inner}")]
    Execution { program: String, inner: String },
    #[error("{program}'s output contained invalid utf8: {inner}")]
    OutputEncoding { program: String, inner: String },
    #[error("got invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("{program} rejected the batch while {hint}: {detail}")]
    KernelRejected {
        program: String,
        hint: String,
        detail: String,
    },
}

/// Per-submit options: which requestor to use (overriding any bound one),
/// the timeout, and how to invoke the local helper.
#[derive(Clone, Default)]
pub struct SubmitOptions {
    /// Overrides the Builder-bound requestor for this one call. Resolution
    /// precedence (spec §4.3): this field wins if set, otherwise the
    /// Builder's own bound requestor is used; if neither exists,
    /// `RequestError::NoRequestor`.
    pub requestor: Option<Arc<dyn Requestor>>,
    /// How long to wait for the helper before returning
    /// `RequestError::Timeout`. Defaults to [`DEFAULT_TIMEOUT`].
    pub timeout: Option<Duration>,
    /// Overrides the helper program name/path (default: `nft` via `PATH`).
    pub program: Option<String>,
    /// Extra arguments forwarded ahead of the local backend's own
    /// `-j -f -` invocation, e.g. a network namespace switch.
    pub extra_args: Option<Vec<String>>,
}

impl std::fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("requestor_bound", &self.requestor.is_some())
            .field("timeout", &self.timeout)
            .field("program", &self.program)
            .field("extra_args", &self.extra_args)
            .finish()
    }
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_requestor(mut self, requestor: Arc<dyn Requestor>) -> Self {
        self.requestor = Some(requestor);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The submission backend contract: `submit(commands, options) -> outcome`.
///
/// A default "local" implementation ([`LocalRequestor`]) shells out to the
/// `nft` binary. Other implementations (remote, audit, capture) are
/// pluggable by implementing this trait; the Builder only ever holds a
/// `dyn Requestor` and never inspects which one it got.
pub trait Requestor: Send + Sync + std::fmt::Debug {
    fn submit(&self, commands: &Nftables, options: &SubmitOptions) -> Result<SubmitOutcome, RequestError>;
}

/// Default backend: serializes `commands` to the exact `{"nftables": [...]}`
/// envelope, writes it to the `nft` helper's stdin (`nft -j -f -`), and
/// parses its stdout reply.
#[derive(Debug, Clone, Default)]
pub struct LocalRequestor;

impl LocalRequestor {
    pub fn new() -> Self {
        LocalRequestor
    }
}

impl Requestor for LocalRequestor {
    fn submit(&self, commands: &Nftables, options: &SubmitOptions) -> Result<SubmitOutcome, RequestError> {
        let payload = serde_json::to_string(commands)?;
        let program = options
            .program
            .clone()
            .unwrap_or_else(|| NFT_EXECUTABLE.to_string());
        let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let extra_args = options.extra_args.clone().unwrap_or_default();

        log::debug!(
            "submitting {} command(s) to {program} (timeout {timeout:?})",
            commands.objects.len()
        );

        let mut child = Command::new(&program)
            .args(&extra_args)
            .args(["-j", "-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RequestError::Execution {
                program: program.clone(),
                inner: e.to_string(),
            })?;

        let mut stdin = child.stdin.take().expect("child stdin was piped");
        stdin
            .write_all(payload.as_bytes())
            .map_err(|e| RequestError::Execution {
                program: program.clone(),
                inner: e.to_string(),
            })?;
        drop(stdin);

        let output = wait_with_timeout(child, timeout, &program)?;

        let stdout =
            String::from_utf8(output.stdout).map_err(|e| RequestError::OutputEncoding {
                program: program.clone(),
                inner: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            log::warn!("{program} exited with a failure status: {stderr}");
            return Err(RequestError::KernelRejected {
                program,
                hint: "submitting batch".to_string(),
                detail: stderr,
            });
        }

        if stdout.trim().is_empty() {
            return Ok(SubmitOutcome::Empty);
        }

        parse_reply(&stdout, &program)
    }
}

/// Parses the helper's stdout into a [`SubmitOutcome`], or surfaces the
/// first item-level `"error"` key as a [`RequestError::KernelRejected`]
/// (spec §4.3, §6.4). Split out from [`LocalRequestor::submit`] so the
/// error-item scanning and errno humanization can be exercised without
/// spawning a process.
fn parse_reply(stdout: &str, program: &str) -> Result<SubmitOutcome, RequestError> {
    let parsed: Value = serde_json::from_str(stdout)?;
    let items = parsed
        .get("nftables")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if items.is_empty() {
        return Ok(SubmitOutcome::Empty);
    }

    // spec §4.3: "Response items containing an error key are surfaced
    // as (:error, message)." — checked here, at the one JSON boundary,
    // rather than pushed down into the Decoder. spec §6.4: an error may
    // carry either the kernel's own string message or a bare errno
    // integer, which gets humanized before it reaches the caller.
    for item in &items {
        if let Some(error) = item.get("error") {
            let detail = match error.as_i64() {
                Some(errno) => crate::validation::describe_errno(errno as i32),
                None => error
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            };
            return Err(RequestError::KernelRejected {
                program: program.to_string(),
                hint: "processing batch".to_string(),
                detail,
            });
        }
    }

    Ok(SubmitOutcome::Reply(items))
}

fn wait_with_timeout(
    mut child: std::process::Child,
    timeout: Duration,
    program: &str,
) -> Result<std::process::Output, RequestError> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = child.wait_with_output();
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(RequestError::Execution {
            program: program.to_string(),
            inner: e.to_string(),
        }),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(RequestError::Timeout(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(RequestError::Execution {
            program: program.to_string(),
            inner: "helper process watcher thread disconnected".to_string(),
        }),
    }
}

/// Test/capture backend (spec §4.3: "a capture backend may send the Builder
/// to a test collector and return `:ok`"). Records every submitted batch
/// instead of touching a real kernel, so the crate's own `builder` tests
/// (and any downstream integration test) can assert on exactly what would
/// have been sent.
#[derive(Debug, Default)]
pub struct CaptureRequestor {
    captured: Mutex<Vec<Nftables>>,
}

impl CaptureRequestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The batches submitted so far, in submission order.
    pub fn captured(&self) -> Vec<Nftables> {
        self.captured.lock().expect("capture mutex poisoned").clone()
    }
}

impl Requestor for CaptureRequestor {
    fn submit(&self, commands: &Nftables, _options: &SubmitOptions) -> Result<SubmitOutcome, RequestError> {
        self.captured
            .lock()
            .expect("capture mutex poisoned")
            .push(commands.clone());
        Ok(SubmitOutcome::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_requestor_records_submitted_batches() {
        let requestor = CaptureRequestor::new();
        let commands = Nftables { objects: vec![] };
        requestor.submit(&commands, &SubmitOptions::default()).unwrap();
        requestor.submit(&commands, &SubmitOptions::default()).unwrap();
        assert_eq!(requestor.captured().len(), 2);
    }

    #[test]
    fn no_requestor_is_not_constructible_without_binding() {
        // SubmitOptions with no requestor bound is the trigger for
        // BuilderError::NoRequestor at the Builder::submit call site; this
        // just pins the default.
        assert!(SubmitOptions::default().requestor.is_none());
    }

    #[test]
    fn parse_reply_surfaces_string_error_item() {
        let stdout = r#"{"nftables":[{"error":"Could not process rule: File exists"}]}"#;
        let err = parse_reply(stdout, "nft").unwrap_err();
        match err {
            RequestError::KernelRejected { detail, .. } => {
                assert_eq!(detail, "Could not process rule: File exists");
            }
            other => panic!("expected KernelRejected, got {other:?}"),
        }
    }

    #[test]
    fn parse_reply_humanizes_errno_error_item() {
        let stdout = r#"{"nftables":[{"error":17}]}"#;
        let err = parse_reply(stdout, "nft").unwrap_err();
        match err {
            RequestError::KernelRejected { detail, .. } => {
                assert_eq!(detail, "object already exists");
            }
            other => panic!("expected KernelRejected, got {other:?}"),
        }
    }

    #[test]
    fn parse_reply_empty_items_is_empty_outcome() {
        let stdout = r#"{"nftables":[]}"#;
        assert_eq!(parse_reply(stdout, "nft").unwrap(), SubmitOutcome::Empty);
    }

    #[test]
    fn parse_reply_data_items_pass_through_as_reply() {
        let stdout = r#"{"nftables":[{"table":{"family":"inet","name":"filter"}}]}"#;
        match parse_reply(stdout, "nft").unwrap() {
            SubmitOutcome::Reply(items) => assert_eq!(items.len(), 1),
            other => panic!("expected Reply, got {other:?}"),
        }
    }
}
