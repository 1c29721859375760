//! Logging setup shared by the CLI and tests
//!
//! `--debug` raises only the courier crates to debug; HTTP client internals
//! stay at info. `RUST_LOG` replaces the whole filter.

use std::io::Write;

use indicatif::MultiProgress;

const COURIER_TARGETS: &[&str] = &[
    "courier",
    "courier_core",
    "courier_checkpoint",
    "courier_connectors",
    "courier_pipeline",
];

/// Default filter for the given flags.
fn default_filter(quiet: bool, debug: bool) -> String {
    if debug {
        let mut filter = String::from("info");
        for target in COURIER_TARGETS {
            filter.push_str(&format!(",{target}=debug"));
        }
        filter
    } else if quiet {
        "warn".to_string()
    } else {
        "info".to_string()
    }
}

/// Fixed-width level tag, optionally colored.
fn level_tag(level: log::Level, color: bool) -> String {
    let (name, ansi) = match level {
        log::Level::Error => ("ERROR", "31"),
        log::Level::Warn => ("WARN ", "33"),
        log::Level::Info => ("INFO ", "32"),
        log::Level::Debug => ("DEBUG", "36"),
        log::Level::Trace => ("TRACE", "35"),
    };
    if color {
        format!("\x1b[{ansi}m{name}\x1b[0m")
    } else {
        name.to_string()
    }
}

/// Debug lines carry their crate so retry and checkpoint chatter can be told apart.
fn render(record: &log::Record, color: bool) -> String {
    let tag = level_tag(record.level(), color);
    if record.level() >= log::Level::Debug {
        let target = record.target().split("::").next().unwrap_or_default();
        format!("[{tag} {target}] {}", record.args())
    } else {
        format!("[{tag}] {}", record.args())
    }
}

/// Prints above the location status lines so they are not torn.
pub struct IndicatifLogger {
    filter: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(filter: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { filter, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.filter.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = render(record, true);
        self.multi.suspend(|| eprintln!("{line}"));
    }

    fn flush(&self) {}
}

/// Install the global logger once; later calls are no-ops.
///
/// With `multi` (TTY), lines are colored and routed through
/// [`IndicatifLogger`]. Without it, plain lines go to stderr.
pub fn init_logging(quiet: bool, debug: bool, multi: Option<&MultiProgress>) {
    let env = env_logger::Env::default().default_filter_or(default_filter(quiet, debug));
    let mut builder = env_logger::Builder::from_env(env);

    match multi {
        Some(multi) => {
            let filter = builder.build();
            let max_level = filter.filter();
            let logger = IndicatifLogger::new(filter, multi.clone());
            if log::set_boxed_logger(Box::new(logger)).is_ok() {
                log::set_max_level(max_level);
            }
        }
        None => {
            let _ = builder
                .format(|buf, record| writeln!(buf, "{}", render(record, false)))
                .try_init();
        }
    }
}
