use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error};

use crate::{
    error::{ProtocolViolation, TaskFailure},
    models::{message::TaskEvent, task::PivResult},
};

/// Creates the event channel for one task.
///
/// The receiver belongs to the controller; events are only dispatched where
/// it is drained.
pub fn event_channel(task_id: u64) -> (EventEmitter, Receiver<TaskEvent>) {
    let (sender, receiver) = unbounded();
    let emitter = EventEmitter {
        task_id,
        sender,
        last_percent: None,
        closed: false,
    };
    (emitter, receiver)
}

/// Worker side of the event channel.
#[derive(Debug)]
pub struct EventEmitter {
    task_id: u64,
    sender: Sender<TaskEvent>,
    last_percent: Option<u8>,
    closed: bool,
}

impl EventEmitter {
    pub fn emit_progress(&mut self, percent: u8) -> Result<(), ProtocolViolation> {
        let violation = if self.closed {
            Some(ProtocolViolation::ProgressAfterCompletion(percent))
        } else if percent > 100 {
            Some(ProtocolViolation::OutOfRange(percent))
        } else {
            match self.last_percent {
                Some(from) if percent < from => Some(ProtocolViolation::Regressed { from, to: percent }),
                _ => None,
            }
        };
        if let Some(violation) = violation {
            return Err(self.reject(violation));
        }

        self.last_percent = Some(percent);
        self.send(TaskEvent::Progress { percent });
        Ok(())
    }

    pub fn emit_completion(&mut self, outcome: Result<PivResult, TaskFailure>) -> Result<(), ProtocolViolation> {
        if self.closed {
            return Err(self.reject(ProtocolViolation::DuplicateCompletion));
        }
        self.closed = true;
        self.send(TaskEvent::Completed(outcome));
        Ok(())
    }

    fn reject(&self, violation: ProtocolViolation) -> ProtocolViolation {
        error!("Protocol violation on task '{}': {}", self.task_id, violation);
        violation
    }

    fn send(&self, event: TaskEvent) {
        if self.sender.send(event).is_err() {
            debug!("Controller for task '{}' is gone, event dropped.", self.task_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(events: &Receiver<TaskEvent>) -> Vec<u8> {
        events
            .try_iter()
            .filter_map(|event| match event {
                TaskEvent::Progress { percent } => Some(percent),
                TaskEvent::Completed(_) => None,
            })
            .collect()
    }

    #[test]
    fn delivers_progress_in_order_and_rejects_regressions() {
        let (mut emitter, events) = event_channel(1);
        for percent in [0, 25, 25, 50] {
            emitter.emit_progress(percent).unwrap();
        }
        assert_eq!(
            emitter.emit_progress(10),
            Err(ProtocolViolation::Regressed { from: 50, to: 10 })
        );
        assert_eq!(emitter.emit_progress(101), Err(ProtocolViolation::OutOfRange(101)));
        emitter.emit_progress(100).unwrap();

        assert_eq!(progress(&events), vec![0, 25, 25, 50, 100]);
    }

    #[test]
    fn completion_is_terminal() {
        let (mut emitter, events) = event_channel(2);
        emitter.emit_progress(40).unwrap();
        emitter.emit_completion(Err(TaskFailure::Cancelled)).unwrap();

        assert_eq!(emitter.emit_progress(90), Err(ProtocolViolation::ProgressAfterCompletion(90)));
        assert_eq!(
            emitter.emit_completion(Err(TaskFailure::Cancelled)),
            Err(ProtocolViolation::DuplicateCompletion)
        );

        let delivered: Vec<TaskEvent> = events.try_iter().collect();
        assert_eq!(delivered.len(), 2);
        assert!(matches!(delivered[0], TaskEvent::Progress { percent: 40 }));
        assert!(matches!(delivered[1], TaskEvent::Completed(Err(TaskFailure::Cancelled))));
    }

    #[test]
    fn dropped_receiver_does_not_fail_the_worker() {
        let (mut emitter, events) = event_channel(3);
        drop(events);
        assert!(emitter.emit_progress(10).is_ok());
        assert!(emitter.emit_completion(Err(TaskFailure::Cancelled)).is_ok());
    }
}
