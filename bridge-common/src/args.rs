//! CLI arguments shared by all bridges.

use std::path::PathBuf;

use clap::Args;

/// Common CLI arguments, meant to be flattened into a bridge's own parser.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        common: BridgeArgs,
    }

    #[test]
    fn test_parse_common_args() {
        let cli = TestCli::parse_from(["bridge", "-c", "bridge.json5", "--log-level", "debug"]);
        assert_eq!(cli.common.config, Some(PathBuf::from("bridge.json5")));
        assert_eq!(cli.common.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_args_are_optional() {
        let cli = TestCli::parse_from(["bridge"]);
        assert_eq!(cli.common, BridgeArgs::default());
    }
}
