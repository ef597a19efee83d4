// Logging setup for the CLI
use std::io::Write;

/// Wire up env_logger: warnings by default, info with --verbose, errors
/// only with --quiet. RUST_LOG overrides everything when set.
pub fn init_logger(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        log::LevelFilter::Error
    } else if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    let mut builder = env_logger::Builder::from_default_env();

    builder.filter_level(default_level).format(|buf, record| {
        // Level prefix only for debug noise; normal output stays bare
        if record.level() <= log::Level::Debug {
            writeln!(buf, "[{}] {}", record.level(), record.args())
        } else {
            writeln!(buf, "{}", record.args())
        }
    });

    if verbose {
        // Debug for our own modules; the HTTP stack stays at info
        builder.filter_module("cfarchive", log::LevelFilter::Debug);
        builder.filter_module("reqwest", log::LevelFilter::Info);
        builder.filter_module("hyper", log::LevelFilter::Info);
    }

    if std::env::var("RUST_LOG").is_ok() {
        return env_logger::init();
    }

    builder.init();
}
