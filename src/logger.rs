use log::{LevelFilter, SetLoggerError};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// Diagnostics always go to stderr, stdout only carries the exported lines.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    TermLogger::init(
        level,
        ConfigBuilder::default()
            .add_filter_allow_str("gcp_clf")
            .build(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
}
