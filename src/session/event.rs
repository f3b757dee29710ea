use crate::mi::{OutputCategory, Record};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// Name of an event channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    ConsoleOutput,
    InternalsOutput,
    TargetOutput,
    CommandResponse,
    StateChange,
    Info,
    Progress,
    ProgramOutput,
    ProgramError,
    DebuggerStderr,
    Exit,
    Error,
    Disconnect,
}

impl EventKind {
    /// Fixed mapping of an output category into an event channel.
    pub fn for_category(category: OutputCategory) -> Self {
        match category {
            OutputCategory::Console => EventKind::ConsoleOutput,
            OutputCategory::Log => EventKind::InternalsOutput,
            OutputCategory::Target => EventKind::TargetOutput,
            OutputCategory::Result => EventKind::CommandResponse,
            OutputCategory::Exec => EventKind::StateChange,
            OutputCategory::Notify => EventKind::Info,
            OutputCategory::Status => EventKind::Progress,
        }
    }
}

/// Which process a lifecycle event is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ProcessRole {
    Debugger,
    Server,
}

#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// Classified record of the control channel.
    Record(Arc<Record>),
    ProgramOutput(String),
    ProgramError(String),
    DebuggerStderr(String),
    Exit {
        role: ProcessRole,
        code: Option<i32>,
        signal: Option<i32>,
    },
    Error {
        role: ProcessRole,
        message: String,
    },
    Disconnect,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Record(record) => EventKind::for_category(record.category),
            SessionEvent::ProgramOutput(_) => EventKind::ProgramOutput,
            SessionEvent::ProgramError(_) => EventKind::ProgramError,
            SessionEvent::DebuggerStderr(_) => EventKind::DebuggerStderr,
            SessionEvent::Exit { .. } => EventKind::Exit,
            SessionEvent::Error { .. } => EventKind::Error,
            SessionEvent::Disconnect => EventKind::Disconnect,
        }
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            SessionEvent::Record(record) => Some(record),
            _ => None,
        }
    }
}

pub type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Subscription handle, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Multi-subscriber publish/subscribe hub with one handler list per event kind.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove subscription, return false if it is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let mut found = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(sub_id, _)| *sub_id != id);
            found |= list.len() != before;
        }
        found
    }

    /// Call every handler of the event kind, handlers are called without holding the lock.
    pub fn emit(&self, event: &SessionEvent) {
        let handlers: Vec<Handler> = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            handlers
                .get(&event.kind())
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            handler(event);
        }
    }
}
