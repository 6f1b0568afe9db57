//! The pending operation log.
//!
//! The log stores the kind of every pending operation in enqueue order, and the payload of each
//! operation in a side table dedicated to its kind. The i-th occurrence of a kind in the kind
//! sequence corresponds to the i-th entry of that kind's side table.
use crate::{
    command::{BlitCommand, ComputeDispatch, EventCallback, NativeCommand, Operation, OperationKind},
    pass::RenderPassDescriptor,
    render::RenderDrawState,
    resource::DrawableId,
    staging::StagingAllocation,
};
use std::{ops::Range, sync::Arc, vec};

pub(crate) struct BlitRecord {
    pub(crate) command: BlitCommand,
    /// Staging memory read by the command, released once the command buffer completes.
    pub(crate) staging: Option<StagingAllocation>,
}

pub(crate) struct RenderRecord {
    pub(crate) pass: Arc<RenderPassDescriptor>,
    pub(crate) state: Option<Arc<RenderDrawState>>,
}

/// An operation as stored in the log.
pub(crate) enum Record {
    Blit(BlitRecord),
    Compute(ComputeDispatch),
    Event(EventCallback),
    Native(NativeCommand),
    Present(DrawableId),
    Render(RenderRecord),
}

impl From<Operation> for Record {
    fn from(op: Operation) -> Record {
        match op {
            Operation::Blit(command) => Record::Blit(BlitRecord {
                command,
                staging: None,
            }),
            Operation::Compute(dispatch) => Record::Compute(dispatch),
            Operation::Event(callback) => Record::Event(callback),
            Operation::Native(command) => Record::Native(command),
            Operation::Present(drawable) => Record::Present(drawable),
            Operation::Render { pass, state } => Record::Render(RenderRecord { pass, state }),
        }
    }
}

#[derive(Default)]
pub(crate) struct PendingLog {
    kinds: Vec<OperationKind>,
    blits: Vec<BlitRecord>,
    computes: Vec<ComputeDispatch>,
    events: Vec<EventCallback>,
    natives: Vec<NativeCommand>,
    presents: Vec<DrawableId>,
    renders: Vec<RenderRecord>,
}

impl PendingLog {
    pub(crate) fn new() -> PendingLog {
        PendingLog::default()
    }

    pub(crate) fn push(&mut self, record: Record) {
        let kind = match record {
            Record::Blit(blit) => {
                self.blits.push(blit);
                OperationKind::Blit
            }
            Record::Compute(dispatch) => {
                self.computes.push(dispatch);
                OperationKind::Compute
            }
            Record::Event(callback) => {
                self.events.push(callback);
                OperationKind::Event
            }
            Record::Native(command) => {
                self.natives.push(command);
                OperationKind::Native
            }
            Record::Present(drawable) => {
                self.presents.push(drawable);
                OperationKind::Present
            }
            Record::Render(render) => {
                self.renders.push(render);
                OperationKind::Render
            }
        };
        self.kinds.push(kind);
    }

    pub(crate) fn len(&self) -> usize {
        self.kinds.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Whether the log is non-empty and contains nothing but events.
    pub(crate) fn is_events_only(&self) -> bool {
        !self.kinds.is_empty() && self.events.len() == self.kinds.len()
    }

    fn table_len(&self, kind: OperationKind) -> usize {
        match kind {
            OperationKind::Blit => self.blits.len(),
            OperationKind::Compute => self.computes.len(),
            OperationKind::Event => self.events.len(),
            OperationKind::Native => self.natives.len(),
            OperationKind::Present => self.presents.len(),
            OperationKind::Render => self.renders.len(),
        }
    }

    /// Panics if a side table does not have exactly one entry per occurrence of its kind.
    pub(crate) fn check_consistency(&self) {
        let mut counts = [0usize; 6];
        for kind in &self.kinds {
            counts[kind.index()] += 1;
        }
        for kind in OperationKind::ALL {
            let table_len = self.table_len(kind);
            assert_eq!(
                counts[kind.index()],
                table_len,
                "pending log out of sync: {} {:?} records but {} side table entries",
                counts[kind.index()],
                kind,
                table_len
            );
        }
    }

    /// Extracts the event callbacks, in enqueue order.
    pub(crate) fn into_events(self) -> Vec<EventCallback> {
        self.events
    }

    pub(crate) fn into_parts(self) -> (Vec<OperationKind>, SideTables) {
        (
            self.kinds,
            SideTables {
                blits: Cursor::new(self.blits),
                computes: Cursor::new(self.computes),
                events: Cursor::new(self.events),
                natives: Cursor::new(self.natives),
                presents: Cursor::new(self.presents),
                renders: Cursor::new(self.renders),
            },
        )
    }
}

/// Side tables of a flushed log, consumed in order by the submission engine.
pub(crate) struct SideTables {
    pub(crate) blits: Cursor<BlitRecord>,
    pub(crate) computes: Cursor<ComputeDispatch>,
    pub(crate) events: Cursor<EventCallback>,
    pub(crate) natives: Cursor<NativeCommand>,
    pub(crate) presents: Cursor<DrawableId>,
    pub(crate) renders: Cursor<RenderRecord>,
}

pub(crate) struct Cursor<T> {
    entries: vec::IntoIter<T>,
    position: usize,
}

impl<T> Cursor<T> {
    fn new(entries: Vec<T>) -> Cursor<T> {
        Cursor {
            entries: entries.into_iter(),
            position: 0,
        }
    }

    /// Takes the entries in `range`, which must start where the previous range ended.
    pub(crate) fn take(&mut self, range: Range<usize>) -> Vec<T> {
        assert_eq!(
            range.start, self.position,
            "side table consumed out of order"
        );
        assert!(
            range.len() <= self.entries.len(),
            "side table range {:?} out of bounds",
            range
        );
        self.position = range.end;
        self.entries.by_ref().take(range.len()).collect()
    }
}
