use std::io::{self, Write};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    style::{Color, Stylize},
};
use log::error;

use crate::{
    models::task::{Grid, PivResult},
    router::exception_router::{ExceptionPresenter, ModalChoice},
};

/// Visible controls the task manager drives.
pub trait ControlSurface {
    fn set_progress(&mut self, percent: u8);
    fn set_pause_label(&mut self, label: &str);
    fn set_start_enabled(&mut self, enabled: bool);
    fn notify(&mut self, message: &str);
    fn show_error(&mut self, message: &str);
}

/// Receives the averaged field of a finished task.
pub trait ResultSink {
    fn render(&mut self, result: &PivResult);
}

#[derive(Debug, Clone, Copy)]
pub struct Theme {
    pub accent: Color,
    pub notice: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            accent: Color::Cyan,
            notice: Color::Green,
            error: Color::Red,
        }
    }
}

/// Prints each line from column 0; raw mode does not return the carriage.
pub fn print_lines(text: &str) {
    for line in text.lines() {
        println!("\r{}", line);
    }
    let _ = io::stdout().flush();
}

pub struct TerminalSurface {
    theme: Theme,
    start_enabled: bool,
}

impl TerminalSurface {
    pub fn new(theme: Theme) -> Self {
        Self {
            theme,
            start_enabled: true,
        }
    }
}

impl ControlSurface for TerminalSurface {
    fn set_progress(&mut self, percent: u8) {
        let filled = usize::from(percent.min(100)) / 5;
        let bar = format!("[{}{}] {:>3}%", "#".repeat(filled), ".".repeat(20 - filled), percent);
        print_lines(&bar.with(self.theme.accent).to_string());
    }

    fn set_pause_label(&mut self, label: &str) {
        print_lines(&format!("Use `pause` to {}.", label.to_lowercase()));
    }

    fn set_start_enabled(&mut self, enabled: bool) {
        if enabled != self.start_enabled {
            self.start_enabled = enabled;
            let text = if enabled { "Ready for `start`." } else { "Running; `start` disabled." };
            print_lines(text);
        }
    }

    fn notify(&mut self, message: &str) {
        print_lines(&message.with(self.theme.notice).to_string());
    }

    fn show_error(&mut self, message: &str) {
        print_lines(&format!("Error: {}", message).with(self.theme.error).to_string());
    }
}

/// Prints a short summary of the field instead of plotting it.
pub struct SummaryRenderer {
    theme: Theme,
}

impl SummaryRenderer {
    pub fn new(theme: Theme) -> Self {
        Self { theme }
    }
}

impl ResultSink for SummaryRenderer {
    fn render(&mut self, result: &PivResult) {
        let (rows, cols) = result.shape();
        let (count, sum, max) = result
            .speed()
            .fold((0usize, 0.0, 0.0_f64), |(n, sum, max), s| (n + 1, sum + s, max.max(s)));
        let mean = if count == 0 { 0.0 } else { sum / count as f64 };
        let (x, y, u, v) = result.grids();
        let centre = (rows / 2, cols / 2);
        let sample = |grid: &Grid| grid.get(centre.0, centre.1).unwrap_or(f64::NAN);

        print_lines(&format!("Vector field {}x{}", rows, cols).with(self.theme.accent).to_string());
        print_lines(&format!("  mean |V| = {:.4}, max |V| = {:.4}", mean, max));
        print_lines(&format!(
            "  centre ({:.1}, {:.1}): u = {:.4}, v = {:.4}",
            sample(x),
            sample(y),
            sample(u),
            sample(v)
        ));
    }
}

/// Error modal drawn inline; blocks on the keyboard until answered.
pub struct TerminalPresenter {
    theme: Theme,
}

impl TerminalPresenter {
    pub fn new(theme: Theme) -> Self {
        Self { theme }
    }

    fn read_choice() -> io::Result<ModalChoice> {
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Enter | KeyCode::Char('o') | KeyCode::Char('O') => return Ok(ModalChoice::Ok),
                    KeyCode::Char('r') | KeyCode::Char('R') => return Ok(ModalChoice::Retry),
                    _ => {}
                }
            }
        }
    }
}

impl ExceptionPresenter for TerminalPresenter {
    fn present(&mut self, message: &str) -> ModalChoice {
        let rule = "=".repeat(60);
        print_lines(&rule.as_str().with(self.theme.error).to_string());
        print_lines(&"Oops. An unexpected error occurred:".with(self.theme.error).bold().to_string());
        print_lines(message);
        print_lines(&rule.as_str().with(self.theme.error).to_string());
        print_lines("[O]k quits, [R]etry continues.");

        Self::read_choice().unwrap_or_else(|e| {
            error!("Failed to read modal answer: {}", e);
            ModalChoice::Ok
        })
    }
}
