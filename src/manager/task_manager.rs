use std::{
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use log::{error, info, warn};

use crate::{
    app::surface::{ControlSurface, ResultSink},
    error::{StartError, TaskFailure},
    models::{
        message::TaskEvent,
        task::{PivResult, Task, TaskConfig, TaskState},
    },
    settings::store::SettingsStore,
    worker::{
        channel::event_channel,
        control::{ControlProtocol, ControlState},
        worker::{spawn_worker_thread, WorkerFactory},
    },
};

pub const PAUSE_LABEL: &str = "Pause";
pub const RESUME_LABEL: &str = "Resume";

struct ActiveTask {
    task: Task,
    control: Arc<ControlProtocol>,
    events: Receiver<TaskEvent>,
    handle: Option<JoinHandle<()>>,
}

/// Owns at most one running task and every control-surface update about it.
///
/// All methods run on the controller thread; worker events are only handled
/// from [`TaskManager::pump`].
pub struct TaskManager {
    surface: Box<dyn ControlSurface>,
    sink: Box<dyn ResultSink>,
    settings: SettingsStore,
    factory: Box<dyn WorkerFactory>,
    active: Option<ActiveTask>,
    last: Option<Task>,
    next_id: u64,
}

impl TaskManager {
    pub fn new(
        surface: Box<dyn ControlSurface>,
        sink: Box<dyn ResultSink>,
        settings: SettingsStore,
        factory: Box<dyn WorkerFactory>) -> Self
    {
        TaskManager {
            surface,
            sink,
            settings,
            factory,
            active: None,
            last: None,
            next_id: 0,
        }
    }

    pub fn start(&mut self, config: TaskConfig) -> Result<u64, StartError> {
        if let Some(active) = &self.active {
            warn!("Start rejected, task '{}' is still active.", active.task.id);
            return Err(StartError::AlreadyRunning { id: active.task.id });
        }
        let worker = self.factory.create(&config)?;
        self.settings.save(&config)?;

        let id = self.next_id + 1;
        let control = Arc::new(ControlProtocol::new());
        let (emitter, events) = event_channel(id);
        let handle = spawn_worker_thread(id, worker, Arc::clone(&control), emitter)
            .map_err(StartError::Spawn)?;
        self.next_id = id;

        info!("Task '{}' created ({} mode, source {}).", id, config.mode, config.source.display());
        self.active = Some(ActiveTask {
            task: Task::new(id, config),
            control,
            events,
            handle: Some(handle),
        });
        self.surface.set_start_enabled(false);
        self.surface.set_progress(0);
        self.surface.set_pause_label(PAUSE_LABEL);
        Ok(id)
    }

    pub fn pause_or_resume(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if !matches!(active.task.state, TaskState::Running | TaskState::Paused) {
            warn!("Task '{}' is {:?}, pause ignored.", active.task.id, active.task.state);
            return;
        }
        let (state, label) = if active.control.toggle_pause() {
            (TaskState::Paused, RESUME_LABEL)
        } else {
            (TaskState::Running, PAUSE_LABEL)
        };
        active.task.state = state;
        info!("Task '{}' is now {:?}.", active.task.id, state);
        self.surface.set_pause_label(label);
    }

    /// Requests a cooperative stop. The display is reset right away; teardown
    /// waits for the worker's completion event.
    pub fn stop(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.control.request_stop();
        active.task.state = TaskState::Stopping;
        active.task.progress = 0;
        info!("Sent stop signal for task '{}'.", active.task.id);
        self.surface.set_progress(0);
    }

    /// Waits up to `timeout` for one event of the active task and handles it.
    /// Returns whether an event was handled.
    pub fn pump(&mut self, timeout: Duration) -> bool {
        let Some(active) = &self.active else {
            return false;
        };
        let disconnected = || {
            TaskEvent::Completed(Err(TaskFailure::Panicked("worker exited without completing".to_string())))
        };
        let event = if timeout.is_zero() {
            match active.events.try_recv() {
                Ok(event) => Some(event),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(disconnected()),
            }
        } else {
            match active.events.recv_timeout(timeout) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(disconnected()),
            }
        };
        match event {
            Some(TaskEvent::Progress { percent }) => self.on_progress(percent),
            Some(TaskEvent::Completed(outcome)) => self.on_completion(outcome),
            None => return false,
        }
        true
    }

    pub fn on_progress(&mut self, percent: u8) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        // A stop request already reset the display.
        if active.task.state == TaskState::Stopping {
            return;
        }
        active.task.progress = percent.min(100);
        self.surface.set_progress(active.task.progress);
    }

    /// Tears the task down first, then reports. A panicking collaborator
    /// cannot leave the start controls disabled.
    pub fn on_completion(&mut self, outcome: Result<PivResult, TaskFailure>) {
        let Some(mut active) = self.active.take() else {
            error!("Completion received with no active task.");
            return;
        };
        let id = active.task.id;
        if let Some(handle) = active.handle.take() {
            if handle.join().is_err() {
                error!("Worker thread for task '{}' did not exit cleanly.", id);
            }
        }
        let failure = match outcome {
            Ok(result) => {
                active.task.state = TaskState::Finished;
                active.task.result = Some(result);
                None
            }
            Err(failure) => {
                active.task.state = TaskState::Failed;
                Some(failure)
            }
        };
        info!("Task '{}' torn down as {:?}.", id, active.task.state);
        self.last = Some(active.task);
        self.surface.set_pause_label(PAUSE_LABEL);
        self.surface.set_start_enabled(true);

        match failure {
            None => {
                let Some(task) = self.last.as_ref() else {
                    return;
                };
                if let Some(result) = task.result.as_ref() {
                    self.sink.render(result);
                }
                self.surface.notify(&format!(
                    "Averaged data saved in\n{}",
                    task.config.params.save_dir.display()
                ));
            }
            Some(TaskFailure::Cancelled) => self.surface.notify(&format!("Task {} stopped.", id)),
            // Already presented through the exception router.
            Some(TaskFailure::Panicked(message)) => error!("Task '{}' panicked: {}", id, message),
            Some(failure) => {
                error!("Task '{}' failed [{}]: {}", id, failure.as_label(), failure);
                self.surface.show_error(&failure.to_string());
            }
        }
    }

    pub fn status(&self) -> TaskState {
        self.active.as_ref().map_or(TaskState::Idle, |active| active.task.state)
    }

    pub fn active_task(&self) -> Option<&Task> {
        self.active.as_ref().map(|active| &active.task)
    }

    /// The most recently terminated task.
    pub fn last_task(&self) -> Option<&Task> {
        self.last.as_ref()
    }

    pub fn control_state(&self) -> Option<ControlState> {
        self.active.as_ref().map(|active| active.control.snapshot())
    }

    /// Stops the active task, if any, and waits until it is torn down.
    pub fn shutdown(&mut self) {
        if self.active.is_none() {
            return;
        }
        self.stop();
        while self.active.is_some() {
            self.pump(Duration::from_millis(100));
        }
    }
}
