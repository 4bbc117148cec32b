//! Change journal of the optimizer.
//!
//! Passes report what they changed as [`Event`]s in a shared [`EventLog`]. The log
//! only grows and can be appended to from several worker threads through `&self`;
//! tests and the driver query it afterwards.
//!
//! # Example
//!
//! ```rust
//! use ssaopt::compiler::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::LoopUnrolled)
//!     .at(7, 2)
//!     .pass("loop-unroll")
//!     .message("factor 4 with side exits");
//! log.record(EventKind::PassCompleted).unit(7);
//!
//! assert!(log.has(EventKind::LoopUnrolled));
//! assert_eq!(log.len(), 2);
//! assert_eq!(log.summary(), "1 loop unrolled");
//! ```

use std::{collections::BTreeMap, fmt};

/// What an [`Event`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// An instruction was removed.
    InstructionRemoved,
    /// A basic block was removed.
    BlockRemoved,
    /// Two blocks were merged into one.
    BlocksMerged,
    /// An empty block was spliced out of the CFG.
    BlockElided,
    /// A Phi was replaced by its single input or an equivalent Phi.
    PhiSimplified,
    /// A SafePoint input was dropped.
    SafePointPruned,
    /// A reference-typed value was bridged into a SafePoint.
    SafePointBridged,
    /// The first iteration of a loop was peeled.
    LoopPeeled,
    /// A loop was unrolled.
    LoopUnrolled,
    /// A loop was replaced by straight-line copies of its body.
    LoopFullyUnrolled,
    /// A loop without observable effects was removed.
    LoopRemoved,
    /// An array access was rewritten against a raw pointer.
    AccessRebased,
    /// A memory barrier flag was cleared.
    BarrierElided,

    /// A pass reported a change on a unit.
    PassCompleted,
    /// Verification after a pass failed.
    VerificationFailed,
    /// Optimizing a unit failed and the unit was restored.
    Error,
}

impl EventKind {
    /// Short lowercase description, used as the default message.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::InstructionRemoved => "instruction removed",
            Self::BlockRemoved => "block removed",
            Self::BlocksMerged => "blocks merged",
            Self::BlockElided => "block elided",
            Self::PhiSimplified => "phi simplified",
            Self::SafePointPruned => "safepoint input pruned",
            Self::SafePointBridged => "safepoint bridged",
            Self::LoopPeeled => "loop peeled",
            Self::LoopUnrolled => "loop unrolled",
            Self::LoopFullyUnrolled => "loop fully unrolled",
            Self::LoopRemoved => "loop removed",
            Self::AccessRebased => "access rebased",
            Self::BarrierElided => "barrier elided",
            Self::PassCompleted => "pass completed",
            Self::VerificationFailed => "verification failed",
            Self::Error => "error",
        }
    }

    /// True for kinds that describe an edit of a graph.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        !matches!(
            self,
            Self::PassCompleted | Self::VerificationFailed | Self::Error
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One journal entry.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Unit the event belongs to.
    pub unit: Option<u32>,
    /// Block or instruction index inside the unit.
    pub location: Option<usize>,
    /// Detail text; the kind's description when none was given.
    pub message: String,
    /// Pass that emitted the event.
    pub pass: Option<String>,
}

/// Fluent constructor returned by [`EventLog::record`].
///
/// The event is appended when the builder is dropped, so a bare
/// `log.record(kind);` statement is enough.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    event: Event,
    message: Option<String>,
}

impl EventBuilder<'_> {
    /// Attributes the event to `location` inside `unit`.
    pub fn at(mut self, unit: u32, location: usize) -> Self {
        self.event.unit = Some(unit);
        self.event.location = Some(location);
        self
    }

    /// Attributes the event to `unit` without a location.
    pub fn unit(mut self, unit: u32) -> Self {
        self.event.unit = Some(unit);
        self
    }

    /// Replaces the default message.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Names the emitting pass.
    pub fn pass(mut self, name: impl Into<String>) -> Self {
        self.event.pass = Some(name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let mut event = self.event.clone();
        if let Some(message) = self.message.take() {
            event.message = message;
        }
        self.log.events.push(event);
    }
}

/// Append-only, thread-safe event journal.
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl EventLog {
    /// Empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts an event of `kind`.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder {
            log: self,
            event: Event {
                kind,
                unit: None,
                location: None,
                message: kind.description().to_string(),
                pass: None,
            },
            message: None,
        }
    }

    /// True if at least one event of `kind` was recorded.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.iter().any(|e| e.kind == kind)
    }

    /// Number of events of `kind`.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.iter().filter(|e| e.kind == kind).count()
    }

    /// All events in append order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Failed units, in append order.
    pub fn errors(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind == EventKind::Error)
    }

    /// One-line count of the graph edits, e.g. `"1 loop peeled, 2 phi simplified"`.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut counts: BTreeMap<EventKind, usize> = BTreeMap::new();
        for event in self.iter().filter(|e| e.kind.is_transformation()) {
            *counts.entry(event.kind).or_default() += 1;
        }
        if counts.is_empty() {
            return format!("{} events", self.len());
        }

        counts
            .iter()
            .map(|(kind, count)| format!("{count} {kind}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
