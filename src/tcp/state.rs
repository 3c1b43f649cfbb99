//! Bookkeeping types that sit beside the predicate-driven connection FSM:
//! an `Available` bitset used by the socket-style front door to decide which
//! waiting threads to wake, and a `ConnectionPhase` used only for logging.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Available: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

/// A coarse, human-readable phase derived from the connection's predicates,
/// used only for `tracing` output. The FSM itself is driven by
/// `inbound_active`/`outbound_active`/`active`, not by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Handshake,
    Established,
    ClosingLocal,
    ClosingRemote,
    Lingering,
    Reset,
    Closed,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionPhase::Handshake => "handshake",
            ConnectionPhase::Established => "established",
            ConnectionPhase::ClosingLocal => "closing-local",
            ConnectionPhase::ClosingRemote => "closing-remote",
            ConnectionPhase::Lingering => "lingering",
            ConnectionPhase::Reset => "reset",
            ConnectionPhase::Closed => "closed",
        };
        write!(f, "{s}")
    }
}
