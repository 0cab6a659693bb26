//! Execution statuses and the per-step report.

use std::fmt;

use crate::arena::Handle;
use crate::protocol::console::ConsoleEntry;
use crate::protocol::module_path::ImportRequest;
use crate::protocol::order::{Order, OrderId};

/// Status of one `run` call across the embedding boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The engine yielded voluntarily; call `run` again.
    Continue,
    /// Top-level execution finished; the report may carry a result handle.
    Complete,
    /// Unresolved imports block execution; supply them and run again.
    NeedImports,
    /// Guest code is awaiting orders; fulfill or resolve and run again.
    Suspended,
    /// No program is active; `prepare` must be called first.
    Done,
    /// Guest code failed with an uncaught error.
    Error,
}

impl Status {
    /// Stable wire discriminant.
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            Status::Continue => 0,
            Status::Complete => 1,
            Status::NeedImports => 2,
            Status::Suspended => 3,
            Status::Done => 4,
            Status::Error => 5,
        }
    }

    /// Convert from the wire discriminant.
    #[inline]
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(Status::Continue),
            1 => Some(Status::Complete),
            2 => Some(Status::NeedImports),
            3 => Some(Status::Suspended),
            4 => Some(Status::Done),
            5 => Some(Status::Error),
            _ => None,
        }
    }

    /// True for statuses that end a run for good.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Complete | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            Status::Continue => "Continue",
            Status::Complete => "Complete",
            Status::NeedImports => "NeedImports",
            Status::Suspended => "Suspended",
            Status::Done => "Done",
            Status::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Everything one `run` call reports back to the host.
///
/// The list fields are drained from the context exactly once per call:
/// entries appear in the report for the step that produced them and never
/// again.
#[derive(Debug)]
pub struct StepReport {
    pub status: Status,
    /// Completion value; an owned handle the host must release.
    pub value: Option<Handle>,
    /// Unresolved imports reported this step.
    pub imports: Vec<ImportRequest>,
    /// Orders newly placed this step.
    pub pending: Vec<Order>,
    /// Orders abandoned this step.
    pub cancelled: Vec<OrderId>,
    /// Uncaught guest error text, set with `Status::Error`.
    pub error: Option<String>,
    /// Console output buffered since the previous step.
    pub console: Vec<ConsoleEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_round_trip() {
        for raw in 0..=5u8 {
            let status = Status::from_u8(raw).unwrap();
            assert_eq!(status.as_u8(), raw);
        }
        assert_eq!(Status::from_u8(6), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(Status::Complete.is_terminal());
        assert!(Status::Error.is_terminal());
        assert!(!Status::Suspended.is_terminal());
        assert!(!Status::NeedImports.is_terminal());
        assert!(!Status::Done.is_terminal());
    }
}
