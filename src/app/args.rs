use std::path::PathBuf;

use clap::Parser;

use crate::models::task::{Mode, TaskConfig};

#[derive(Parser, Debug)]
#[command(name = "piv-control", about = "Run, pause and stop PIV averaging from the terminal")]
pub struct Args {
    /// Processing mode; only `offline` is available.
    #[arg(long)]
    pub mode: Option<Mode>,

    /// Directory holding the recorded frames.
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Where the run configuration is saved before each start.
    #[arg(long, default_value = "piv_settings.json")]
    pub settings: PathBuf,

    /// Directory for the averaged field.
    #[arg(long)]
    pub save_dir: Option<PathBuf>,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Saved settings overlaid with whatever was given on the command line.
    pub fn initial_config(&self, saved: Option<TaskConfig>) -> TaskConfig {
        let mut config = saved.unwrap_or_else(|| TaskConfig {
            mode: Mode::Offline,
            source: PathBuf::new(),
            params: Default::default(),
        });
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(source) = &self.source {
            config.source = source.clone();
        }
        if let Some(save_dir) = &self.save_dir {
            config.params.save_dir = save_dir.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_saved_settings() {
        let args = Args::parse_from(["piv-control", "--source", "dirB", "-vv"]);
        let saved = TaskConfig {
            mode: Mode::Online,
            source: PathBuf::from("dirA"),
            params: Default::default(),
        };

        let config = args.initial_config(Some(saved));
        assert_eq!(config.mode, Mode::Online);
        assert_eq!(config.source, PathBuf::from("dirB"));
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn unknown_mode_is_a_usage_error() {
        assert!(Args::try_parse_from(["piv-control", "--mode", "batch"]).is_err());
    }
}
