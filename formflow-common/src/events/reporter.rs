//! Per-invocation event protocol
//!
//! A command creates one `OperationReporter` per invocation. `started` is
//! published at most once, `progress` any number of times, and the terminal
//! `completed`/`failed` methods consume the reporter, so a second terminal
//! event cannot be published.

use super::{Event, EventBus, EventData, EventDetail, EventFamily, EventPhase};
use crate::StagedError;
use tracing::{debug, warn};

pub struct OperationReporter {
    bus: EventBus,
    family: EventFamily,
    started: bool,
    finished: bool,
}

impl OperationReporter {
    pub fn new(bus: &EventBus, family: EventFamily) -> Self {
        Self {
            bus: bus.clone(),
            family,
            started: false,
            finished: false,
        }
    }

    fn publish(&self, event: Event) {
        debug_assert_eq!(event.family(), self.family, "detail family mismatch");
        debug!(event = %event.event_type, "Publishing event");
        self.bus.publish(event);
    }

    /// Publish `<family>.started`; repeated calls are ignored
    pub fn started(&mut self, detail: impl Into<EventDetail>) {
        if self.started {
            debug!(family = self.family.as_str(), "started already published");
            return;
        }
        self.started = true;
        self.publish(Event::new(EventPhase::Started, EventData::new(detail)));
    }

    /// Publish `<family>.progress` at a fixed checkpoint
    pub fn progress(
        &self,
        detail: impl Into<EventDetail>,
        percent: Option<u8>,
        message: impl Into<String>,
    ) {
        let mut data = EventData::new(detail);
        data.percent = percent;
        data.message = Some(message.into());
        self.publish(Event::new(EventPhase::Progress, data));
    }

    /// Publish `<family>.completed`
    pub fn completed(mut self, detail: impl Into<EventDetail>, percent: Option<u8>) {
        self.finished = true;
        let mut data = EventData::new(detail);
        data.percent = percent;
        self.publish(Event::new(EventPhase::Completed, data));
    }

    /// Publish `<family>.error` carrying the failing stage and the same text
    /// the caller receives from the returned error
    pub fn failed<E: StagedError + ?Sized>(mut self, detail: impl Into<EventDetail>, error: &E) {
        self.finished = true;
        let mut data = EventData::new(detail);
        data.stage = Some(error.stage().to_string());
        self.publish(Event::new(EventPhase::Error, data).with_error(error.to_string()));
    }
}

impl Drop for OperationReporter {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                family = self.family.as_str(),
                "Operation ended without a terminal event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CaseAction, CaseDetail};

    #[derive(Debug, thiserror::Error)]
    #[error("case file missing")]
    struct MissingCase;

    impl StagedError for MissingCase {
        fn stage(&self) -> &'static str {
            "load"
        }
    }

    fn detail() -> CaseDetail {
        CaseDetail {
            action: CaseAction::Save,
            ..Default::default()
        }
    }

    #[test]
    fn test_started_published_once() {
        let bus = EventBus::new(10);
        let mut sub = bus.subscribe("case.*");

        let mut reporter = OperationReporter::new(&bus, EventFamily::Case);
        reporter.started(detail());
        reporter.started(detail());
        reporter.progress(detail(), Some(50), "halfway");
        reporter.completed(detail(), Some(100));

        let types: Vec<String> = sub.drain().iter().map(Event::type_name).collect();
        assert_eq!(types, vec!["case.started", "case.progress", "case.completed"]);
    }

    #[test]
    fn test_failed_carries_stage() {
        let bus = EventBus::new(10);
        let mut sub = bus.subscribe("case.error");

        let reporter = OperationReporter::new(&bus, EventFamily::Case);
        reporter.failed(detail(), &MissingCase);

        let event = sub.try_recv().unwrap();
        assert_eq!(event.data.stage.as_deref(), Some("load"));
        assert_eq!(event.error.as_deref(), Some("case file missing"));
    }
}
