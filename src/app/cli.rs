//! Command-line argument definitions (clap) and help text.

use std::path::PathBuf;

use clap::Parser;

pub const HELP_TEXT: &str = "
Fanbridge: drive-temperature fan controller for serial PWM boards
Usage: fanbridge [OPTIONS]

Options:
  -h, --help                    Print help
  -V, --version                 Print version
Run:
  -c, --config <PATH>           Config file (default: $FANBRIDGE_CONFIG, then config.json next to the binary)
      --log-level <LOG_LEVEL>   Log level (TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL)
      --once                    Run a single control cycle and print the status snapshot
Serial:
      --ports                   List serial port candidates in discovery order
      --ping                    Open the controller and measure a PING round-trip
      --fw-version              Ask the controller for its firmware version
      --send <LINE>             Send a raw line and print the reply
      --pwm <0-100>             Send a single SET_PWM
Config:
      --show-config             Print the effective configuration
      --check-config            Load and validate the configuration
      --set-override <0-100|off>
                                Persist a manual PWM override and signal the running daemon
      --reset-curve             Restore the default fan curve and signal the running daemon
";

#[derive(Parser, Debug, Default)]
#[command(name = "fanbridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drive-temperature fan controller for serial PWM boards", long_about = None)]
pub struct Args {
    // === Run ===
    /// Config file path
    #[arg(short = 'c', long, value_name = "PATH", help_heading = "Run")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL)
    #[arg(long = "log-level", help_heading = "Run")]
    pub log_level: Option<String>,

    /// Run a single control cycle and print the status snapshot
    #[arg(long, help_heading = "Run")]
    pub once: bool,

    // === Serial ===
    /// List serial port candidates in discovery order
    #[arg(long, help_heading = "Serial")]
    pub ports: bool,

    /// Open the controller and measure a PING round-trip
    #[arg(long, help_heading = "Serial")]
    pub ping: bool,

    /// Ask the controller for its firmware version
    #[arg(long = "fw-version", help_heading = "Serial")]
    pub fw_version: bool,

    /// Send a raw line and print the reply
    #[arg(long, value_name = "LINE", help_heading = "Serial")]
    pub send: Option<String>,

    /// Send a single SET_PWM
    #[arg(long, value_name = "0-100", value_parser = clap::value_parser!(u8).range(0..=100), help_heading = "Serial")]
    pub pwm: Option<u8>,

    // === Config ===
    /// Print the effective configuration
    #[arg(long = "show-config", help_heading = "Config")]
    pub show_config: bool,

    /// Load and validate the configuration
    #[arg(long = "check-config", help_heading = "Config")]
    pub check_config: bool,

    /// Persist a manual PWM override ("off" clears it) and signal the running daemon
    #[arg(long = "set-override", value_name = "0-100|off", value_parser = parse_override, help_heading = "Config")]
    pub set_override: Option<OverrideArg>,

    /// Restore the default fan curve and signal the running daemon
    #[arg(long = "reset-curve", help_heading = "Config")]
    pub reset_curve: bool,
}

/// `--set-override` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideArg {
    Set(u8),
    Off,
}

impl OverrideArg {
    pub fn as_option(self) -> Option<u8> {
        match self {
            OverrideArg::Set(v) => Some(v),
            OverrideArg::Off => None,
        }
    }
}

fn parse_override(value: &str) -> Result<OverrideArg, String> {
    match value.trim().to_lowercase().as_str() {
        "off" | "none" | "clear" => Ok(OverrideArg::Off),
        other => match other.parse::<u8>() {
            Ok(v) if v <= 100 => Ok(OverrideArg::Set(v)),
            _ => Err(format!("expected 0-100 or \"off\", got {:?}", value)),
        },
    }
}

impl Args {
    /// One-shot commands that exit instead of starting the loop.
    pub fn is_one_shot(&self) -> bool {
        self.once
            || self.ports
            || self.ping
            || self.fw_version
            || self.send.is_some()
            || self.pwm.is_some()
            || self.show_config
            || self.check_config
            || self.set_override.is_some()
            || self.reset_curve
    }

    /// Commands that talk to the controller directly.
    pub fn is_serial_command(&self) -> bool {
        self.ports || self.ping || self.fw_version || self.send.is_some() || self.pwm.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_values() {
        assert_eq!(parse_override("45"), Ok(OverrideArg::Set(45)));
        assert_eq!(parse_override("OFF"), Ok(OverrideArg::Off));
        assert!(parse_override("101").is_err());
        assert!(parse_override("-1").is_err());
    }

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from(["fanbridge", "--config", "/tmp/c.json", "--pwm", "40", "--log-level", "debug"])
            .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/c.json")));
        assert_eq!(args.pwm, Some(40));
        assert!(args.is_one_shot());

        assert!(Args::try_parse_from(["fanbridge", "--pwm", "140"]).is_err());
        assert!(!Args::try_parse_from(["fanbridge"]).unwrap().is_one_shot());
    }

    #[test]
    fn serial_commands() {
        let args = Args::try_parse_from(["fanbridge", "--fw-version"]).unwrap();
        assert!(args.is_serial_command());
        assert!(args.is_one_shot());
        let args = Args::try_parse_from(["fanbridge", "--reset-curve"]).unwrap();
        assert!(!args.is_serial_command());
        assert!(args.is_one_shot());
    }

    #[test]
    fn set_override_off() {
        let args = Args::try_parse_from(["fanbridge", "--set-override", "off"]).unwrap();
        assert_eq!(args.set_override.map(OverrideArg::as_option), Some(None));
    }
}
