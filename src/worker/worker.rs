use std::{
    fs::{self, File},
    io::{self, BufWriter},
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    error::{ConfigurationError, TaskFailure},
    models::task::{Grid, Mode, PivParams, PivResult, TaskConfig},
    router::exception_router::panic_message,
};

use super::{channel::EventEmitter, control::ControlProtocol};

const FRAME_EXTENSIONS: [&str; 5] = ["bmp", "jpg", "png", "tif", "tiff"];
const RESULT_FILE: &str = "averaged.json";

/// Computation body run on a worker thread.
///
/// `run` is called exactly once. Implementations report progress through the
/// emitter and must consult `control` at bounded intervals; the completion
/// event is emitted by the runner from the returned outcome.
pub trait Worker: Send {
    fn run(&mut self, control: &ControlProtocol, events: &mut EventEmitter) -> Result<PivResult, TaskFailure>;
}

pub trait WorkerFactory {
    fn create(&self, config: &TaskConfig) -> Result<Box<dyn Worker>, ConfigurationError>;
}

impl<F> WorkerFactory for F
where
    F: Fn(&TaskConfig) -> Result<Box<dyn Worker>, ConfigurationError>,
{
    fn create(&self, config: &TaskConfig) -> Result<Box<dyn Worker>, ConfigurationError> {
        self(config)
    }
}

/// Builds offline workers; online acquisition is not available.
pub struct PivWorkerFactory;

impl WorkerFactory for PivWorkerFactory {
    fn create(&self, config: &TaskConfig) -> Result<Box<dyn Worker>, ConfigurationError> {
        if config.source.as_os_str().is_empty() {
            return Err(ConfigurationError::MissingSource);
        }
        match config.mode {
            Mode::Offline => Ok(Box::new(OfflinePivWorker::new(
                config.source.clone(),
                config.params.clone(),
            ))),
            Mode::Online => Err(ConfigurationError::UnsupportedMode(Mode::Online)),
        }
    }
}

pub fn spawn_worker_thread(
    task_id: u64,
    mut worker: Box<dyn Worker>,
    control: Arc<ControlProtocol>,
    mut events: EventEmitter) -> io::Result<JoinHandle<()>>
{
    thread::Builder::new()
        .name(format!("piv-worker-{}", task_id))
        .spawn(move || {
            info!("Starting task '{}'.", task_id);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.run(&control, &mut events)))
                .unwrap_or_else(|payload| Err(TaskFailure::Panicked(panic_message(payload.as_ref()))));

            match &outcome {
                Ok(result) => info!("Task '{}' finished with a {:?} grid.", task_id, result.shape()),
                Err(failure) => info!("Task '{}' ended: {} [{}].", task_id, failure, failure.as_label()),
            }
            // Violations were already logged by the emitter.
            let _ = events.emit_completion(outcome);
        })
}

/// Averages a vector field over a directory of recorded frames.
pub struct OfflinePivWorker {
    source: PathBuf,
    params: PivParams,
}

impl OfflinePivWorker {
    pub fn new(source: PathBuf, params: PivParams) -> Self {
        Self { source, params }
    }

    fn pass_field(&self, pass: usize, rows: usize, cols: usize) -> (Grid, Grid) {
        let step = self.params.window_size.saturating_sub(self.params.overlap).max(1) as f64;
        let half = self.params.window_size as f64 / 2.0;
        let cx = self.params.frame_width as f64 / 2.0;
        let cy = self.params.frame_height as f64 / 2.0;
        let gain = 0.01 * (1.0 + 0.05 * (pass as f64).sin());

        let u = Grid::from_fn(rows, cols, |r, _| -(r as f64 * step + half - cy) * gain);
        let v = Grid::from_fn(rows, cols, |_, c| (c as f64 * step + half - cx) * gain);
        (u, v)
    }

    fn save(&self, result: &PivResult) -> Result<(), TaskFailure> {
        let dir = &self.params.save_dir;
        let path = dir.join(RESULT_FILE);
        let fail = |reason: String| TaskFailure::Save { path: path.clone(), reason };

        fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;
        let file = File::create(&path).map_err(|e| fail(e.to_string()))?;
        serde_json::to_writer(BufWriter::new(file), result).map_err(|e| fail(e.to_string()))?;
        debug!("Averaged field written to {}", path.display());
        Ok(())
    }
}

impl Worker for OfflinePivWorker {
    fn run(&mut self, control: &ControlProtocol, events: &mut EventEmitter) -> Result<PivResult, TaskFailure> {
        let frames = count_frames(&self.source)?;
        if frames < 2 {
            warn!("Only {} frame(s) in {}.", frames, self.source.display());
        } else {
            info!("Found {} frames in {}.", frames, self.source.display());
        }

        let passes = self.params.passes.max(1);
        let (rows, cols) = self.params.grid_shape();
        let mut sum_u = vec![0.0; rows * cols];
        let mut sum_v = vec![0.0; rows * cols];
        let _ = events.emit_progress(0);

        for pass in 0..passes {
            if !control.wait_while_paused() {
                return Err(TaskFailure::Cancelled);
            }
            let (u, v) = self.pass_field(pass, rows, cols);
            for (acc, value) in sum_u.iter_mut().zip(u.values()) {
                *acc += value;
            }
            for (acc, value) in sum_v.iter_mut().zip(v.values()) {
                *acc += value;
            }
            if self.params.pass_delay_ms > 0 {
                thread::sleep(Duration::from_millis(self.params.pass_delay_ms));
            }
            let _ = events.emit_progress(((pass + 1) * 100 / passes) as u8);
        }

        let step = self.params.window_size.saturating_sub(self.params.overlap).max(1) as f64;
        let half = self.params.window_size as f64 / 2.0;
        let n = passes as f64;
        let result = PivResult::new(
            Grid::from_fn(rows, cols, |_, c| c as f64 * step + half),
            Grid::from_fn(rows, cols, |r, _| r as f64 * step + half),
            Grid::from_fn(rows, cols, |r, c| sum_u[r * cols + c] / n),
            Grid::from_fn(rows, cols, |r, c| sum_v[r * cols + c] / n),
        )?;
        self.save(&result)?;
        Ok(result)
    }
}

fn count_frames(source: &Path) -> Result<usize, TaskFailure> {
    let entries = fs::read_dir(source).map_err(|e| TaskFailure::Source {
        path: source.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .count())
}

#[cfg(test)]
mod tests {
    use crate::{models::message::TaskEvent, worker::channel::event_channel};

    use super::*;

    fn params(save_dir: &Path) -> PivParams {
        PivParams {
            pass_delay_ms: 0,
            save_dir: save_dir.to_path_buf(),
            ..PivParams::default()
        }
    }

    fn config(mode: Mode, source: &Path) -> TaskConfig {
        TaskConfig {
            mode,
            source: source.to_path_buf(),
            params: PivParams::default(),
        }
    }

    #[test]
    fn offline_worker_reports_passes_and_saves_field() {
        let source = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let (mut emitter, events) = event_channel(1);
        let control = ControlProtocol::new();

        let mut worker = OfflinePivWorker::new(source.path().to_path_buf(), params(out.path()));
        let result = worker.run(&control, &mut emitter).unwrap();

        let progress: Vec<u8> = events
            .try_iter()
            .filter_map(|event| match event {
                TaskEvent::Progress { percent } => Some(percent),
                TaskEvent::Completed(_) => None,
            })
            .collect();
        assert_eq!(progress, vec![0, 25, 50, 75, 100]);
        assert_eq!(result.shape(), (64, 64));
        assert!(out.path().join(RESULT_FILE).is_file());
    }

    #[test]
    fn offline_worker_honours_stop() {
        let source = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let (mut emitter, _events) = event_channel(1);
        let control = ControlProtocol::new();
        control.request_stop();

        let mut worker = OfflinePivWorker::new(source.path().to_path_buf(), params(out.path()));
        assert_eq!(worker.run(&control, &mut emitter), Err(TaskFailure::Cancelled));
    }

    #[test]
    fn missing_source_fails_the_task() {
        let out = tempfile::tempdir().unwrap();
        let (mut emitter, _events) = event_channel(1);
        let mut worker = OfflinePivWorker::new(out.path().join("absent"), params(out.path()));

        let failure = worker.run(&ControlProtocol::new(), &mut emitter).unwrap_err();
        assert_eq!(failure.as_label(), "task_source");
    }

    #[test]
    fn factory_rejects_online_and_empty_source() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PivWorkerFactory.create(&config(Mode::Offline, dir.path())).is_ok());
        assert_eq!(
            PivWorkerFactory.create(&config(Mode::Online, dir.path())).err(),
            Some(ConfigurationError::UnsupportedMode(Mode::Online))
        );
        assert_eq!(
            PivWorkerFactory.create(&config(Mode::Offline, Path::new(""))).err(),
            Some(ConfigurationError::MissingSource)
        );
    }

    #[test]
    fn runner_turns_a_panic_into_a_failed_completion() {
        struct Exploding;
        impl Worker for Exploding {
            fn run(&mut self, _: &ControlProtocol, events: &mut EventEmitter) -> Result<PivResult, TaskFailure> {
                let _ = events.emit_progress(10);
                panic!("correlation diverged");
            }
        }

        let (emitter, events) = event_channel(9);
        let handle = spawn_worker_thread(9, Box::new(Exploding), Arc::new(ControlProtocol::new()), emitter).unwrap();
        handle.join().unwrap();

        let delivered: Vec<TaskEvent> = events.try_iter().collect();
        assert_eq!(delivered.len(), 2);
        match &delivered[1] {
            TaskEvent::Completed(Err(TaskFailure::Panicked(message))) => {
                assert!(message.contains("correlation diverged"))
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
