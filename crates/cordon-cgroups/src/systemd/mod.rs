//! Transient-unit managers that delegate cgroup creation to systemd.
//!
//! Instead of writing to cgroupfs directly, these managers ask the
//! init-system daemon over D-Bus to create a transient scope (for an
//! existing process) or slice (for a pure grouping container). On the
//! unified hierarchy, placement is then handed off to the
//! [`crate::fs2`] manager for the directory systemd allocated.

mod dbus;
mod legacy;
mod unified;

pub use dbus::DbusHandle;
pub use legacy::LegacyManager;
pub use unified::UnifiedManager;

use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use zbus::export::futures_core::Stream;
use zbus::zvariant::Value;

use cordon_common::constants::APP_NAME;
use cordon_common::error::{CordonError, Result};
use cordon_common::types::{CgroupSpec, PropValue};

use crate::procs::NO_PID;

/// Slice units are placed under this parent when the spec names none.
const DEFAULT_SLICE: &str = "system.slice";

/// Bound on the wait for a unit-creation job to reach a terminal state.
const START_UNIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between checks of the job-signal stream while waiting.
const JOB_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Returns the systemd unit name for the spec: slice names pass
/// through, anything else becomes a prefixed scope.
pub(crate) fn unit_name(spec: &CgroupSpec) -> String {
    if spec.name.ends_with(".slice") {
        spec.name.clone()
    } else if spec.scope_prefix.is_empty() {
        format!("{}.scope", spec.name)
    } else {
        format!("{}-{}.scope", spec.scope_prefix, spec.name)
    }
}

/// Expands a slice name into its nested cgroupfs path, e.g.
/// `machine-foo.slice` becomes `machine.slice/machine-foo.slice`.
/// `-.slice` denotes the hierarchy root.
///
/// # Errors
///
/// Returns [`CordonError::Config`] for names that are not well-formed
/// slice names.
pub(crate) fn expand_slice(slice: &str) -> Result<String> {
    const SUFFIX: &str = ".slice";

    if slice == "-.slice" {
        return Ok(String::new());
    }
    if !slice.ends_with(SUFFIX) || slice.len() <= SUFFIX.len() || slice.contains('/') {
        return Err(CordonError::Config {
            message: format!("invalid slice name: {slice}"),
        });
    }

    let base = &slice[..slice.len() - SUFFIX.len()];
    let mut path = String::new();
    let mut prefix = String::new();
    for component in base.split('-') {
        if component.is_empty() {
            return Err(CordonError::Config {
                message: format!("invalid slice name: {slice}"),
            });
        }
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(&prefix);
        path.push_str(component);
        path.push_str(SUFFIX);
        prefix.push_str(component);
        prefix.push('-');
    }
    Ok(path)
}

/// Converts a spec passthrough value into a bus variant.
fn variant(value: &PropValue) -> Value<'_> {
    match value {
        PropValue::Bool(b) => Value::from(*b),
        PropValue::U32(n) => Value::from(*n),
        PropValue::U64(n) => Value::from(*n),
        PropValue::Str(s) => Value::from(s.as_str()),
        PropValue::U32List(l) => Value::from(l.clone()),
    }
}

/// Builds the transient-unit property list for `spec`.
///
/// Accounting is enabled unconditionally so telemetry parity holds
/// regardless of controller configuration. Caller passthrough
/// properties come last; whether they override the generated ones is
/// up to systemd's property-merge semantics, which is intentionally
/// permissive.
pub(crate) fn unit_properties<'a>(
    spec: &'a CgroupSpec,
    unit: &str,
    pid: i32,
) -> Vec<(&'a str, Value<'a>)> {
    let slice = if spec.parent.is_empty() {
        DEFAULT_SLICE
    } else {
        spec.parent.as_str()
    };

    let mut properties: Vec<(&str, Value<'_>)> = vec![(
        "Description",
        Value::from(format!("{APP_NAME} container {}", spec.name)),
    )];

    if unit.ends_with(".slice") {
        // A slice's parent is defined via a Wants= relationship.
        properties.push(("Wants", Value::from(slice)));
    } else {
        // A scope is assigned to its slice and gets delegation, which
        // scopes have supported since systemd v218.
        properties.push(("Slice", Value::from(slice)));
        properties.push(("Delegate", Value::from(true)));
    }

    // The NO_PID sentinel is used for pure slice creation.
    if pid != NO_PID {
        #[allow(clippy::cast_sign_loss)]
        properties.push(("PIDs", Value::from(vec![pid as u32])));
    }

    properties.extend([
        ("MemoryAccounting", Value::from(true)),
        ("CPUAccounting", Value::from(true)),
        ("BlockIOAccounting", Value::from(true)),
        ("TasksAccounting", Value::from(true)),
        ("DefaultDependencies", Value::from(false)),
    ]);

    for prop in &spec.systemd_props {
        properties.push((prop.name.as_str(), variant(&prop.value)));
    }
    properties
}

/// Asks systemd to create a transient unit and waits for the job to
/// complete.
///
/// An "already exists" bus fault is absorbed as success. Any terminal
/// job state other than `done`, or a timeout, triggers a best-effort
/// reset of the failed unit and a descriptive error naming it.
///
/// # Errors
///
/// Returns [`CordonError::Bus`] on call failure, a non-`done` job
/// result, or timeout.
pub(crate) fn start_unit(
    handle: &DbusHandle,
    unit: &str,
    properties: &[(&str, Value<'_>)],
) -> Result<()> {
    match start_unit_attempt(handle, unit, properties) {
        Attempt::Done => Ok(()),
        Attempt::Failed(err) => Err(err),
        Attempt::Retry(cause) => {
            tracing::debug!(unit, %cause, "bus connection dropped, reconnecting");
            handle.reset();
            match start_unit_attempt(handle, unit, properties) {
                Attempt::Done => Ok(()),
                Attempt::Failed(err) => Err(err),
                Attempt::Retry(cause) => Err(CordonError::Bus {
                    message: format!("failed to start transient unit `{unit}`: {cause}"),
                }),
            }
        }
    }
}

/// Outcome of one unit-creation attempt over one connection.
enum Attempt {
    Done,
    /// The connection itself went away; the caller may reconnect and
    /// try again from scratch.
    Retry(String),
    Failed(CordonError),
}

/// One attempt: subscribe to job signals, issue the creation call, and
/// wait for this unit's terminal job state, all over the handle's one
/// cached connection. Because the subscription and the call share the
/// connection, a reconnect can never strand the subscription; the
/// retry rebuilds both.
fn start_unit_attempt(handle: &DbusHandle, unit: &str, properties: &[(&str, Value<'_>)]) -> Attempt {
    let proxy = match handle.proxy() {
        Ok(proxy) => proxy,
        Err(err) => return classify(&err, "connecting to systemd"),
    };
    // Subscribe before the call so the job result cannot be missed;
    // signals buffer in the stream until drained below.
    let jobs = match handle
        .async_proxy()
        .and_then(|signals| zbus::block_on(signals.receive_job_removed()))
    {
        Ok(jobs) => jobs,
        Err(err) => return classify(&err, "subscribing to job signals"),
    };

    match proxy.start_transient_unit(unit, "replace", properties, &[]) {
        Ok(job) => {
            tracing::debug!(unit, job = %job, "transient unit requested");
        }
        Err(err) if dbus::is_unit_exists(&err) => {
            tracing::debug!(unit, "transient unit already exists");
            return Attempt::Done;
        }
        Err(err) => {
            return classify(&err, &format!("failed to start transient unit `{unit}`"));
        }
    }

    match await_job_result(jobs, unit, START_UNIT_TIMEOUT) {
        JobWait::Done => Attempt::Done,
        JobWait::Failed(result) => {
            reset_failed_unit(handle, unit);
            Attempt::Failed(CordonError::Bus {
                message: format!("error creating systemd unit `{unit}`: got `{result}`"),
            })
        }
        JobWait::TimedOut => {
            reset_failed_unit(handle, unit);
            Attempt::Failed(CordonError::Bus {
                message: format!("timeout waiting for systemd to create `{unit}`"),
            })
        }
        JobWait::StreamClosed => Attempt::Retry("job signal stream closed".into()),
    }
}

/// Sorts a bus error into retry-on-a-fresh-connection or hard failure.
fn classify(err: &zbus::Error, context: &str) -> Attempt {
    if dbus::is_disconnect(err) {
        Attempt::Retry(err.to_string())
    } else {
        Attempt::Failed(CordonError::Bus {
            message: format!("{context}: {err}"),
        })
    }
}

/// Terminal outcome of the bounded wait for a job signal.
enum JobWait {
    Done,
    Failed(String),
    TimedOut,
    StreamClosed,
}

/// Drains the signal stream until this unit's job completes, the
/// deadline passes, or the stream ends with its connection. The stream
/// is polled with a no-op waker: the connection's executor buffers
/// incoming signals on its own thread, so each poll either yields a
/// buffered signal or reports pending, and the loop sleeps between
/// checks. Dropping the stream on return ends the subscription, so no
/// wait outlives this call.
fn await_job_result(jobs: dbus::JobRemovedStream, unit: &str, timeout: Duration) -> JobWait {
    let mut jobs = Box::pin(jobs);
    let mut cx = Context::from_waker(Waker::noop());
    let deadline = Instant::now() + timeout;
    loop {
        match jobs.as_mut().poll_next(&mut cx) {
            Poll::Ready(Some(signal)) => {
                let Ok(args) = signal.args() else { continue };
                if *args.unit() == unit {
                    if args.result().as_str() == "done" {
                        return JobWait::Done;
                    }
                    return JobWait::Failed(args.result().clone());
                }
            }
            Poll::Ready(None) => return JobWait::StreamClosed,
            Poll::Pending => {
                if Instant::now() >= deadline {
                    return JobWait::TimedOut;
                }
                std::thread::sleep(JOB_POLL_INTERVAL);
            }
        }
    }
}

/// Best-effort reset of a failed unit; failures are logged, never
/// propagated.
fn reset_failed_unit(handle: &DbusHandle, unit: &str) {
    if let Err(err) = handle.call(|proxy| proxy.reset_failed_unit(unit)) {
        tracing::warn!(unit, %err, "unable to reset failed unit");
    }
}
