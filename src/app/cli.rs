use std::{
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    style::Stylize,
    terminal,
};
use log::info;

use crate::{
    app::surface::{print_lines, TerminalPresenter, Theme},
    manager::task_manager::TaskManager,
    models::task::{Mode, TaskConfig},
    router::exception_router::{contain, ExceptionRouter, Flow},
};

pub const EXIT_OK: i32 = 0;
pub const EXIT_AFTER_ERROR: i32 = 1;
pub const EXIT_INTERRUPTED: i32 = 130;

const KEY_POLL: Duration = Duration::from_millis(50);
const PROMPT: &str = ">>> ";
const HELP: &str = "Commands:
  start [offline|online] [DIR]  run PIV averaging over DIR
  pause                         pause or resume the running task
  stop                          stop the running task
  status                        show the task state
  exit                          stop any task and quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start { mode: Option<Mode>, source: Option<PathBuf> },
    Pause,
    Stop,
    Status,
    Help,
    Exit,
}

pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut args = line.split_whitespace();
    let command = match args.next() {
        Some(command) => command,
        None => return Ok(None),
    };
    let parsed = match command {
        "start" => {
            let mut mode = None;
            let mut source = None;
            for arg in args {
                match arg.parse::<Mode>() {
                    Ok(m) if mode.is_none() => mode = Some(m),
                    _ if source.is_none() => source = Some(PathBuf::from(arg)),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
            }
            Command::Start { mode, source }
        }
        "pause" | "resume" => Command::Pause,
        "stop" => Command::Stop,
        "status" => Command::Status,
        "help" => Command::Help,
        "exit" | "quit" => Command::Exit,
        other => return Err(format!("Unknown command: {}. Please try again.", other)),
    };
    Ok(Some(parsed))
}

#[derive(Debug, PartialEq)]
pub enum EditorAction {
    Submit(String),
    Redraw,
    Interrupt,
    Nothing,
}

/// Prompt line with command history.
#[derive(Debug, Default)]
pub struct LineEditor {
    input: String,
    history: Vec<String>,
    history_index: usize,
}

impl LineEditor {
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn handle(&mut self, key: KeyEvent) -> EditorAction {
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => EditorAction::Interrupt,
            KeyCode::Enter => {
                let line = std::mem::take(&mut self.input);
                if !line.trim().is_empty() {
                    self.history.push(line.clone());
                }
                self.history_index = self.history.len();
                EditorAction::Submit(line)
            }
            KeyCode::Up => {
                if self.history_index > 0 {
                    self.history_index -= 1;
                }
                match self.history.get(self.history_index) {
                    Some(command) => {
                        self.input = command.clone();
                        EditorAction::Redraw
                    }
                    None => EditorAction::Nothing,
                }
            }
            KeyCode::Down => {
                if self.history_index < self.history.len() {
                    self.history_index += 1;
                }
                self.input = self.history.get(self.history_index).cloned().unwrap_or_default();
                EditorAction::Redraw
            }
            KeyCode::Char(c) => {
                self.input.push(c);
                EditorAction::Redraw
            }
            KeyCode::Backspace => {
                self.input.pop();
                EditorAction::Redraw
            }
            _ => EditorAction::Nothing,
        }
    }
}

struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Controller loop. Every task event and every error modal is handled here,
/// on the calling thread; a panic in one step is shown before the next.
/// Returns the process exit code.
pub fn run_cli(
    mut manager: TaskManager,
    router: &ExceptionRouter,
    defaults: TaskConfig,
    theme: Theme) -> io::Result<i32>
{
    execute!(io::stdout(), terminal::SetTitle("PIV control"))?;
    let _raw = RawMode::enable()?;
    router.attach_controller();

    print_lines(&"PIV control started. Enter a command or 'help'.".with(theme.accent).to_string());
    let mut presenter = TerminalPresenter::new(theme);
    let mut editor = LineEditor::default();
    draw_prompt(&editor)?;

    loop {
        if router.dispatch_pending(Some(&mut presenter)) == Flow::Terminate {
            info!("Exiting after uncaught error.");
            return Ok(EXIT_AFTER_ERROR);
        }
        let mut redraw = false;
        let pumped = loop {
            match contain(|| manager.pump(Duration::ZERO)) {
                Some(true) => redraw = true,
                Some(false) => break true,
                None => break false,
            }
        };
        if !pumped {
            continue;
        }
        if redraw {
            draw_prompt(&editor)?;
        }

        if !event::poll(KEY_POLL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match editor.handle(key) {
            EditorAction::Submit(line) => {
                println!();
                match parse_command(&line) {
                    Ok(Some(Command::Exit)) => {
                        print_lines("Exiting the program...");
                        manager.shutdown();
                        return Ok(EXIT_OK);
                    }
                    Ok(Some(command)) => {
                        if contain(|| execute_command(&mut manager, command, &defaults, theme)).is_none() {
                            continue;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => print_lines(&message),
                }
                draw_prompt(&editor)?;
            }
            EditorAction::Redraw => draw_prompt(&editor)?,
            EditorAction::Interrupt => {
                println!();
                print_lines("Interrupted.");
                manager.shutdown();
                return Ok(EXIT_INTERRUPTED);
            }
            EditorAction::Nothing => {}
        }
    }
}

fn execute_command(manager: &mut TaskManager, command: Command, defaults: &TaskConfig, theme: Theme) {
    match command {
        Command::Start { mode, source } => {
            let mut config = defaults.clone();
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if let Some(source) = source {
                config.source = source;
            }
            match manager.start(config) {
                Ok(id) => print_lines(&format!("Started task with ID: {}", id)),
                Err(e) => print_lines(&format!("[{}] {}", e.as_label(), e).with(theme.error).to_string()),
            }
        }
        Command::Pause => {
            if manager.active_task().is_none() {
                print_lines("No active task.");
            }
            manager.pause_or_resume();
        }
        Command::Stop => {
            if manager.active_task().is_none() {
                print_lines("No active task.");
            }
            manager.stop();
        }
        Command::Status => print_status(manager),
        Command::Help => print_lines(HELP),
        Command::Exit => {}
    }
}

fn print_status(manager: &TaskManager) {
    match (manager.active_task(), manager.control_state()) {
        (Some(task), Some(control)) => print_lines(&format!(
            "Task {} status: {:?}, {}% (running={}, paused={})",
            task.id, task.state, task.progress, control.running, control.paused
        )),
        _ => match manager.last_task() {
            Some(task) => {
                let shape = task
                    .result
                    .as_ref()
                    .map(|result| format!(", {:?} grid", result.shape()))
                    .unwrap_or_default();
                print_lines(&format!("No active task. Last task {} ended {:?}{}.", task.id, task.state, shape));
            }
            None => print_lines("No task has run yet."),
        },
    }
}

fn draw_prompt(editor: &LineEditor) -> io::Result<()> {
    let mut stdout = io::stdout();
    execute!(stdout, cursor::MoveToColumn(0), terminal::Clear(terminal::ClearType::CurrentLine))?;
    print!("{}{}", PROMPT, editor.input());
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_line(editor: &mut LineEditor, text: &str) -> EditorAction {
        for c in text.chars() {
            editor.handle(key(KeyCode::Char(c)));
        }
        editor.handle(key(KeyCode::Enter))
    }

    #[test]
    fn parses_start_arguments_in_any_order() {
        assert_eq!(
            parse_command("start dirA offline").unwrap(),
            Some(Command::Start {
                mode: Some(Mode::Offline),
                source: Some(PathBuf::from("dirA")),
            })
        );
        assert_eq!(
            parse_command("start").unwrap(),
            Some(Command::Start { mode: None, source: None })
        );
        assert!(parse_command("start a b c").is_err());
    }

    #[test]
    fn parses_control_commands() {
        assert_eq!(parse_command("  pause ").unwrap(), Some(Command::Pause));
        assert_eq!(parse_command("resume").unwrap(), Some(Command::Pause));
        assert_eq!(parse_command("stop").unwrap(), Some(Command::Stop));
        assert_eq!(parse_command("").unwrap(), None);
        assert!(parse_command("kill 3").is_err());
    }

    #[test]
    fn history_walks_back_and_forth() {
        let mut editor = LineEditor::default();
        assert_eq!(type_line(&mut editor, "status"), EditorAction::Submit("status".to_string()));
        type_line(&mut editor, "pause");

        editor.handle(key(KeyCode::Up));
        assert_eq!(editor.input(), "pause");
        editor.handle(key(KeyCode::Up));
        assert_eq!(editor.input(), "status");
        editor.handle(key(KeyCode::Up));
        assert_eq!(editor.input(), "status");
        editor.handle(key(KeyCode::Down));
        assert_eq!(editor.input(), "pause");
        editor.handle(key(KeyCode::Down));
        assert_eq!(editor.input(), "");
    }

    #[test]
    fn backspace_and_ctrl_c() {
        let mut editor = LineEditor::default();
        editor.handle(key(KeyCode::Char('s')));
        editor.handle(key(KeyCode::Char('x')));
        editor.handle(key(KeyCode::Backspace));
        assert_eq!(editor.input(), "s");

        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(editor.handle(ctrl_c), EditorAction::Interrupt);
    }
}
