//! Process-wide routing of uncaught failures to the controller thread.

use std::{
    any::Any,
    backtrace::Backtrace,
    panic::{self, AssertUnwindSafe, PanicHookInfo},
    sync::{
        atomic::{AtomicBool, Ordering},
        OnceLock,
    },
    thread,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, warn};

use crate::models::message::ExceptionEvent;

static ROUTER: OnceLock<ExceptionRouter> = OnceLock::new();

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

/// Installs the panic hook once and returns the process-wide router.
///
/// Further calls return the same router. There is no uninstall.
pub fn install() -> &'static ExceptionRouter {
    ROUTER.get_or_init(|| {
        panic::set_hook(Box::new(routing_hook(panic::take_hook())));
        ExceptionRouter::new()
    })
}

// Test builds keep the previous hook so assertion messages still reach stderr.
fn routing_hook(previous: PanicHook) -> impl Fn(&PanicHookInfo<'_>) + Sync + Send + 'static {
    move |info: &PanicHookInfo<'_>| {
        if let Some(router) = ROUTER.get() {
            router.capture(info);
        }
        if cfg!(test) {
            previous(info);
        }
    }
}

/// Runs one controller step, containing a panic raised by it.
///
/// The installed hook has already queued the failure, so the caller goes on
/// to [`ExceptionRouter::dispatch_pending`] and the operator decides.
pub fn contain<T>(step: impl FnOnce() -> T) -> Option<T> {
    panic::catch_unwind(AssertUnwindSafe(step)).ok()
}

#[cfg(test)]
pub(crate) static HOOK_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Operator's answer to an error modal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModalChoice {
    Ok,
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

/// Shows an error modal and blocks until the operator answers.
pub trait ExceptionPresenter {
    fn present(&mut self, message: &str) -> ModalChoice;
}

#[derive(Debug)]
pub struct ExceptionRouter {
    sender: Sender<ExceptionEvent>,
    receiver: Receiver<ExceptionEvent>,
    controller: AtomicBool,
}

impl Default for ExceptionRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExceptionRouter {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            controller: AtomicBool::new(false),
        }
    }

    /// Marks that a controller exists to present modals.
    pub fn attach_controller(&self) {
        self.controller.store(true, Ordering::Release);
    }

    pub fn has_controller(&self) -> bool {
        self.controller.load(Ordering::Acquire)
    }

    /// Hook body. Runs on the panicking thread and must not panic itself.
    pub fn capture(&self, info: &PanicHookInfo<'_>) {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "<unknown>".to_string());
        let description = format!(
            "panicked at {} on thread '{}': {}",
            location,
            thread::current().name().unwrap_or("<unnamed>"),
            panic_message(info.payload()),
        );
        let message = format!("{}\n{}", Backtrace::force_capture(), description);
        self.forward(message);
    }

    /// Logs a formatted failure and queues it for the controller.
    pub fn forward(&self, message: String) {
        error!(target: "uncaught", "Uncaught exception:\n {}", message);
        if self.sender.send(ExceptionEvent { message }).is_err() {
            debug!("Exception channel closed.");
        }
    }

    /// Drains queued failures on the controller thread, one presentation each.
    ///
    /// Without a presenter or an attached controller, events are only logged.
    pub fn dispatch_pending(&self, mut presenter: Option<&mut dyn ExceptionPresenter>) -> Flow {
        for event in self.receiver.try_iter() {
            match presenter.as_deref_mut() {
                Some(presenter) if self.has_controller() => match presenter.present(&event.message) {
                    ModalChoice::Ok => return Flow::Terminate,
                    ModalChoice::Retry => warn!("Retry is not supported; continuing."),
                },
                _ => debug!("No controller available, exception not presented."),
            }
        }
        Flow::Continue
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::thread::ThreadId;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        shown: Vec<(ThreadId, String)>,
        answer: Option<ModalChoice>,
    }

    impl ExceptionPresenter for Recorder {
        fn present(&mut self, message: &str) -> ModalChoice {
            self.shown.push((thread::current().id(), message.to_string()));
            self.answer.unwrap_or(ModalChoice::Ok)
        }
    }

    #[test]
    fn worker_failure_is_presented_once_on_the_controller_thread() {
        let router = ExceptionRouter::new();
        router.attach_controller();

        thread::scope(|s| {
            s.spawn(|| router.forward("worker blew up".to_string()));
        });

        let mut recorder = Recorder::default();
        assert_eq!(router.dispatch_pending(Some(&mut recorder)), Flow::Terminate);
        assert_eq!(recorder.shown.len(), 1);
        assert_eq!(recorder.shown[0].0, thread::current().id());
        assert_eq!(recorder.shown[0].1, "worker blew up");

        assert_eq!(router.dispatch_pending(Some(&mut recorder)), Flow::Continue);
        assert_eq!(recorder.shown.len(), 1);
    }

    #[test]
    fn retry_keeps_the_loop_running() {
        let router = ExceptionRouter::new();
        router.attach_controller();
        router.forward("first".to_string());
        router.forward("second".to_string());

        let mut recorder = Recorder {
            answer: Some(ModalChoice::Retry),
            ..Recorder::default()
        };
        assert_eq!(router.dispatch_pending(Some(&mut recorder)), Flow::Continue);
        assert_eq!(recorder.shown.len(), 2);
    }

    #[test]
    fn without_controller_events_are_only_logged() {
        let router = ExceptionRouter::new();
        router.forward("nobody listening".to_string());

        let mut recorder = Recorder::default();
        assert_eq!(router.dispatch_pending(Some(&mut recorder)), Flow::Continue);
        assert!(recorder.shown.is_empty());
        assert_eq!(router.dispatch_pending(None), Flow::Continue);
    }

    #[test]
    fn installed_hook_routes_thread_panics() {
        let _serial = HOOK_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let router = install();
        assert!(std::ptr::eq(router, install()));
        router.attach_controller();

        let joined = thread::Builder::new()
            .name("hook-check".to_string())
            .spawn(|| panic!("hook marker 7f3a"))
            .unwrap()
            .join();
        assert!(joined.is_err());

        // Other tests may panic concurrently; count only this marker.
        let mut recorder = Recorder {
            answer: Some(ModalChoice::Retry),
            ..Recorder::default()
        };
        router.dispatch_pending(Some(&mut recorder));
        let marked: Vec<_> = recorder
            .shown
            .iter()
            .filter(|(_, message)| message.contains("hook marker 7f3a"))
            .collect();
        assert_eq!(marked.len(), 1);
        assert!(marked[0].1.contains("on thread 'hook-check'"));
    }

    #[test]
    fn routing_hook_calls_the_previous_hook() {
        use std::sync::{atomic::AtomicUsize, Arc};

        let _serial = HOOK_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let previous: PanicHook = Box::new(move |info: &PanicHookInfo<'_>| {
            if panic_message(info.payload()).contains("chained 91d0") {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let saved = panic::take_hook();
        panic::set_hook(Box::new(routing_hook(previous)));
        let joined = thread::spawn(|| panic!("chained 91d0")).join();
        panic::set_hook(saved);

        assert!(joined.is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn contain_absorbs_a_controller_panic() {
        assert_eq!(contain(|| 7), Some(7));
        assert_eq!(contain(|| -> u8 { panic!("contained step") }), None);
    }

    #[test]
    fn payload_text_is_extracted() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "Box<dyn Any>");
    }
}
