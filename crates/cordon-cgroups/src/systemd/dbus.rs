//! Connection handling for the systemd D-Bus API.

use std::sync::Mutex;

use zbus::blocking::Connection;
use zbus::zvariant::{OwnedObjectPath, Value};

/// Blocking proxy for the subset of `org.freedesktop.systemd1.Manager`
/// the confinement core needs.
#[zbus::proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1"
)]
pub trait SystemdManager {
    /// Creates and starts a transient unit.
    fn start_transient_unit(
        &self,
        name: &str,
        mode: &str,
        properties: &[(&str, Value<'_>)],
        aux: &[(&str, Vec<(&str, Value<'_>)>)],
    ) -> zbus::Result<OwnedObjectPath>;

    /// Clears the failed state of a unit.
    fn reset_failed_unit(&self, name: &str) -> zbus::Result<()>;

    /// Emitted when a queued job finishes with its terminal result.
    #[zbus(signal)]
    fn job_removed(
        &self,
        id: u32,
        job: OwnedObjectPath,
        unit: String,
        result: String,
    ) -> zbus::Result<()>;
}

/// Lazily created, lock-protected handle to one bus connection.
///
/// Shared by all unit-creation calls on a manager instance; owns the
/// reconnect policy. Rootless callers talk to the session bus, the
/// rest to the system bus.
pub struct DbusHandle {
    rootless: bool,
    conn: Mutex<Option<Connection>>,
}

impl DbusHandle {
    /// Creates a handle; no connection is made until the first call.
    #[must_use]
    pub const fn new(rootless: bool) -> Self {
        Self {
            rootless,
            conn: Mutex::new(None),
        }
    }

    /// Returns the cached connection, establishing it on first use.
    fn connection(&self) -> zbus::Result<Connection> {
        let mut guard = self
            .conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = if self.rootless {
            Connection::session()?
        } else {
            Connection::system()?
        };
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Drops the cached connection so the next call reconnects.
    pub(crate) fn reset(&self) {
        *self
            .conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    /// Builds a manager proxy over the current connection.
    pub fn proxy(&self) -> zbus::Result<SystemdManagerProxyBlocking<'static>> {
        let conn = self.connection()?;
        SystemdManagerProxyBlocking::new(&conn)
    }

    /// Builds an async-typed proxy over the same cached connection,
    /// for signal subscriptions that are drained with a deadline.
    pub(crate) fn async_proxy(&self) -> zbus::Result<SystemdManagerProxy<'static>> {
        let conn = self.connection()?;
        zbus::block_on(SystemdManagerProxy::new(conn.inner()))
    }

    /// Runs `f` against the manager proxy. If the bus connection was
    /// dropped mid-call, reconnects transparently and retries exactly
    /// once; any other failure surfaces as-is.
    pub fn call<T>(
        &self,
        f: impl Fn(&SystemdManagerProxyBlocking<'static>) -> zbus::Result<T>,
    ) -> zbus::Result<T> {
        let proxy = self.proxy()?;
        match f(&proxy) {
            Err(err) if is_disconnect(&err) => {
                tracing::debug!(%err, "bus connection dropped, reconnecting");
                self.reset();
                let proxy = self.proxy()?;
                f(&proxy)
            }
            other => other,
        }
    }
}

/// Returns whether the error means the connection itself went away, as
/// opposed to the daemon rejecting the call.
pub(crate) fn is_disconnect(err: &zbus::Error) -> bool {
    match err {
        zbus::Error::InputOutput(_) => true,
        zbus::Error::MethodError(name, _, _) => matches!(
            name.as_str(),
            "org.freedesktop.DBus.Error.NoReply" | "org.freedesktop.DBus.Error.Disconnected"
        ),
        _ => false,
    }
}

/// Returns whether the error is the named bus fault for a unit that
/// already exists, which an idempotent create treats as success.
pub(crate) fn is_unit_exists(err: &zbus::Error) -> bool {
    matches!(err, zbus::Error::MethodError(name, _, _)
        if name.as_str() == "org.freedesktop.systemd1.UnitExists")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn io_failures_classify_as_disconnects() {
        let err = zbus::Error::InputOutput(Arc::new(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "peer went away",
        )));
        assert!(is_disconnect(&err));
    }

    #[test]
    fn ordinary_failures_are_not_disconnects() {
        let err = zbus::Error::Failure("no such unit".into());
        assert!(!is_disconnect(&err));
        assert!(!is_unit_exists(&err));
    }
}
