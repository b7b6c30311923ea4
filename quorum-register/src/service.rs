//! RPC-facing replica: the register plus the view it belongs to.

use tracing::debug;

use crate::message::{Request, Response};
use crate::register::{Register, VersionedValue};
use crate::view::View;

/// One replica of the register.
///
/// Owns its [`Register`] rather than sharing process-wide state, so several
/// replicas can live side by side in one process.
#[derive(Debug)]
pub struct ReplicaService {
    register: Register,
    view: View,
}

impl ReplicaService {
    pub fn new(view: View) -> Self {
        Self::with_register(view, Register::new())
    }

    pub fn with_register(view: View, register: Register) -> Self {
        Self { register, view }
    }

    pub fn read(&self) -> VersionedValue {
        self.register.read()
    }

    /// Applies a write and acknowledges it with the state now stored.
    ///
    /// Stale writes are acknowledged too; the stored timestamp is already at
    /// least as new as the one offered.
    pub fn write(&self, incoming: VersionedValue) -> VersionedValue {
        let timestamp = incoming.timestamp;
        if !self.register.write(incoming) {
            debug!(timestamp, "ignored write with stale timestamp");
        }
        self.register.read()
    }

    pub fn current_view(&self) -> View {
        self.view.clone()
    }

    pub fn register(&self) -> &Register {
        &self.register
    }

    /// Dispatches one decoded request.
    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::Read => Response::Value { value: self.read() },
            Request::Write { value } => Response::Ack {
                value: self.write(value),
            },
            Request::GetCurrentView => Response::View {
                view: self.current_view(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ReplicaService {
        ReplicaService::new(View::with_processes(["a:1", "b:2", "c:3"]).unwrap())
    }

    #[test]
    fn write_then_read_through_handle() {
        let service = service();
        let ack = service.handle(Request::Write {
            value: VersionedValue::new("v", 1),
        });
        assert_eq!(
            ack,
            Response::Ack {
                value: VersionedValue::new("v", 1)
            }
        );
        assert_eq!(
            service.handle(Request::Read),
            Response::Value {
                value: VersionedValue::new("v", 1)
            }
        );
    }

    #[test]
    fn stale_write_is_still_acknowledged() {
        let service = service();
        service.write(VersionedValue::new("new", 9));
        let ack = service.handle(Request::Write {
            value: VersionedValue::new("old", 2),
        });
        assert_eq!(
            ack,
            Response::Ack {
                value: VersionedValue::new("new", 9)
            }
        );
    }

    #[test]
    fn reports_its_view() {
        let service = service();
        match service.handle(Request::GetCurrentView) {
            Response::View { view } => assert_eq!(view.n(), 3),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
