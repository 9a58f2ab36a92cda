use std::{
    fmt,
    path::PathBuf,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::ShapeMismatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Offline,
    Online,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Offline => f.write_str("offline"),
            Mode::Online => f.write_str("online"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(Mode::Offline),
            "online" => Ok(Mode::Online),
            other => Err(format!("unknown mode '{}', expected 'offline' or 'online'", other)),
        }
    }
}

/// Interrogation parameters handed to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PivParams {
    pub window_size: usize,
    pub overlap: usize,
    pub frame_width: usize,
    pub frame_height: usize,
    pub passes: usize,
    pub pass_delay_ms: u64,
    pub save_dir: PathBuf,
}

impl Default for PivParams {
    fn default() -> Self {
        Self {
            window_size: 32,
            overlap: 16,
            frame_width: 1040,
            frame_height: 1040,
            passes: 4,
            pass_delay_ms: 250,
            save_dir: PathBuf::from("piv_out"),
        }
    }
}

impl PivParams {
    /// Number of interrogation windows as `(rows, cols)`.
    pub fn grid_shape(&self) -> (usize, usize) {
        let step = self.window_size.saturating_sub(self.overlap).max(1);
        let windows = |frame: usize| frame.saturating_sub(self.window_size) / step + 1;
        (windows(self.frame_height), windows(self.frame_width))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub mode: Mode,
    pub source: PathBuf,
    pub params: PivParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Paused,
    Stopping,
    Finished,
    Failed,
}

/// Row-major 2D grid of samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grid {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Grid {
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            self.data.get(row * self.cols + col).copied()
        } else {
            None
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }
}

/// Averaged vector field: coordinates `x`, `y` and velocity components `u`, `v`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivResult {
    x: Grid,
    y: Grid,
    u: Grid,
    v: Grid,
}

impl PivResult {
    pub fn new(x: Grid, y: Grid, u: Grid, v: Grid) -> Result<Self, ShapeMismatch> {
        let expected = x.shape();
        for (name, grid) in [("y", &y), ("u", &u), ("v", &v)] {
            if grid.shape() != expected {
                return Err(ShapeMismatch {
                    grid: name,
                    expected,
                    found: grid.shape(),
                });
            }
        }
        Ok(Self { x, y, u, v })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.x.shape()
    }

    pub fn grids(&self) -> (&Grid, &Grid, &Grid, &Grid) {
        (&self.x, &self.y, &self.u, &self.v)
    }

    /// Per-window velocity magnitude.
    pub fn speed(&self) -> impl Iterator<Item = f64> + '_ {
        self.u
            .values()
            .iter()
            .zip(self.v.values())
            .map(|(u, v)| u.hypot(*v))
    }
}

#[derive(Debug)]
pub struct Task {
    pub id: u64,
    pub config: TaskConfig,
    pub state: TaskState,
    pub progress: u8,
    pub result: Option<PivResult>,
}

impl Task {
    pub fn new(id: u64, config: TaskConfig) -> Self {
        Self {
            id,
            config,
            state: TaskState::Running,
            progress: 0,
            result: None,
        }
    }
}
