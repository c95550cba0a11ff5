use core_rig::{AxisConfig, DrillConfig, MeltConfig, MissionConfig, PlungeConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tuning for every control subsystem, loadable from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub x_axis: AxisConfig,
    pub plunge: PlungeConfig,
    pub drill: DrillConfig,
    pub melt: MeltConfig,
    pub mission: MissionConfig,
}

impl RigConfig {
    pub fn load(path: &PathBuf) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        serde_json::from_str(&text).map_err(|e| format!("invalid config {}: {}", path.display(), e))
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub json_logs: bool,
    pub config_path: Option<PathBuf>,
    pub datalog_dir: Option<PathBuf>,
    pub max_holes: Option<usize>,
    pub drive_on_overweight: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            json_logs: false,
            config_path: None,
            datalog_dir: None,
            max_holes: None,
            drive_on_overweight: false,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    if i + 1 < args.len() {
                        cfg.config_path = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--datalog" => {
                    if i + 1 < args.len() {
                        cfg.datalog_dir = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--holes" => {
                    if i + 1 < args.len() {
                        cfg.max_holes = args[i + 1].parse::<usize>().ok();
                        i += 1;
                    }
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--drive-on-overweight" => {
                    cfg.drive_on_overweight = true;
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        cfg
    }

    pub fn print_help() {
        println!(
            r#"rig-ctl - autonomous drilling/melting rig controller (simulated hardware)

USAGE:
    rig-ctl [OPTIONS]

OPTIONS:
    --config <PATH>         Load rig tuning from a JSON file
    --holes <N>             Drill at most N of the generated hole sites
    --datalog <DIR>         Write telemetry records as JSONL under DIR
    --json-logs             Output logs in JSON format (for log aggregation)
    --drive-on-overweight   Keep driving the plunge axis while weight on bit
                            is over the limit, instead of pausing
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,core_rig=trace)

EXAMPLES:
    # Single-hole demo run
    rig-ctl --holes 1

    # Full mission with telemetry datalog
    rig-ctl --json-logs --datalog /var/log/rig-ctl
"#
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("rig-ctl")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parses_flags() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "--holes",
            "3",
            "--json-logs",
            "--datalog",
            "/tmp/rig",
        ]));
        assert_eq!(cfg.max_holes, Some(3));
        assert!(cfg.json_logs);
        assert_eq!(cfg.datalog_dir, Some(PathBuf::from("/tmp/rig")));
        assert!(!cfg.show_help);
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let cfg = RuntimeConfig::from_args(&args(&["--frobnicate", "--holes", "1"]));
        assert_eq!(cfg.max_holes, Some(1));
    }

    #[test]
    fn rig_config_round_trips_through_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mission": {{"hole_separation_mm": 75.0}}, "melt": {{"temp_min_c": 100.0}}}}"#
        )
        .unwrap();
        let cfg = RigConfig::load(&file.path().to_path_buf()).unwrap();
        assert_eq!(cfg.mission.hole_separation_mm, 75.0);
        assert_eq!(cfg.melt.temp_min_c, 100.0);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.drill.torque_max_nm, 10.0);
    }
}
