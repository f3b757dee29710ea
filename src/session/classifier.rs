use crate::mi::{MiParser, OutputCategory, Record, RecordKind};
use crate::session::dispatch::{Correlator, Outgoing, Resolution};
use crate::session::event::SessionEvent;
use crate::session::state::SessionState;
use crate::version::Version;
use crate::{mux_debug, mux_info, mux_warn, weak_error};
use nix::unistd::Pid;
use std::collections::VecDeque;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

/// Fixed capacity history, the oldest item is evicted first.
#[derive(Debug)]
pub struct BoundedLog<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T: Clone> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Recent records history selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum History {
    Stream,
    Exec,
    Notify,
}

/// Everything a chunk produced. Applied by the caller after the session lock is released,
/// in field order: events, resolutions, readiness, outgoing.
#[derive(Default)]
pub struct Ingested {
    pub events: Vec<SessionEvent>,
    pub resolutions: Vec<Resolution>,
    /// Debugger returned to interactive mode for the first time.
    pub first_terminator: bool,
    pub outgoing: Option<Outgoing>,
}

/// Turns raw control channel chunks into state updates, correlator input and events.
pub struct Classifier {
    parser: Box<dyn MiParser>,
    stream_log: BoundedLog<Arc<Record>>,
    exec_log: BoundedLog<Arc<Record>>,
    notify_log: BoundedLog<Arc<Record>>,
    version: Option<Version>,
    seen_terminator: bool,
}

impl Classifier {
    pub fn new(parser: Box<dyn MiParser>, history_capacity: usize) -> Self {
        Self {
            parser,
            stream_log: BoundedLog::new(history_capacity),
            exec_log: BoundedLog::new(history_capacity),
            notify_log: BoundedLog::new(history_capacity),
            version: None,
            seen_terminator: false,
        }
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn history(&self, history: History) -> Vec<Arc<Record>> {
        match history {
            History::Stream => self.stream_log.snapshot(),
            History::Exec => self.exec_log.snapshot(),
            History::Notify => self.notify_log.snapshot(),
        }
    }

    /// Process one chunk: out-of-band records in order, then the result record,
    /// then the terminator.
    pub fn ingest(
        &mut self,
        chunk: &str,
        state: &mut SessionState,
        correlator: &mut Correlator,
    ) -> Ingested {
        let parsed = self.parser.parse(chunk);
        let mut ingested = Ingested::default();

        for record in parsed.out_of_band.into_iter().chain(parsed.result) {
            self.classify(record, state, correlator, &mut ingested);
        }

        if parsed.has_terminator {
            ingested.first_terminator = !self.seen_terminator;
            self.seen_terminator = true;
            let (resolutions, outgoing) = correlator.on_terminator(state);
            ingested.resolutions.extend(resolutions);
            ingested.outgoing = outgoing;
        }

        ingested
    }

    fn classify(
        &mut self,
        record: Record,
        state: &mut SessionState,
        correlator: &mut Correlator,
        ingested: &mut Ingested,
    ) {
        let record = Arc::new(record);

        match (record.kind, record.category) {
            (RecordKind::Stream, category) => {
                if category == OutputCategory::Console && self.version.is_none() {
                    self.detect_version(&record);
                }
                self.stream_log.push(record.clone());
            }
            (RecordKind::Async, OutputCategory::Notify | OutputCategory::Status) => {
                self.track_inferiors(&record, state);
                self.notify_log.push(record.clone());
            }
            (RecordKind::Async, OutputCategory::Exec) => {
                if state.apply_exec(&record.class) {
                    mux_debug!("execution state: {}", state.execution());
                }
                self.exec_log.push(record.clone());
            }
            _ => {}
        }

        ingested
            .resolutions
            .extend(correlator.on_record(&record));
        ingested.events.push(SessionEvent::Record(record));
    }

    fn track_inferiors(&mut self, record: &Record, state: &mut SessionState) {
        let Some(group_id) = record.payload.get_str("id") else {
            return;
        };

        match record.class.as_str() {
            "thread-group-started" => {
                let pid = record
                    .payload
                    .get_str("pid")
                    .and_then(|pid| weak_error!(pid.parse::<i32>(), "invalid inferior pid:"))
                    .map(Pid::from_raw);
                mux_info!("inferior {group_id} started, pid: {pid:?}");
                state.inferior_started(group_id, pid);
            }
            "thread-group-exited" => {
                mux_info!("inferior {group_id} exited");
                if state.inferior_exited(group_id) {
                    mux_debug!("last inferior exited, session is idle");
                }
            }
            _ => {}
        }
    }

    fn detect_version(&mut self, record: &Record) {
        let Some(version) = record.text().and_then(Version::gdb_parse) else {
            return;
        };
        if !version.is_supported() {
            mux_warn!("debugger version {version} is not supported, MI2 interpreter required");
        } else {
            mux_info!("debugger version {version}");
        }
        self.version = Some(version);
    }
}
