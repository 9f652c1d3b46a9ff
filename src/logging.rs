use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Initialize the stderr logger.
///
/// Verbosity 0 shows warnings only, 1 adds progress info, 2 and above adds
/// debug output. The `GAMBIT_LOG` environment variable overrides the level.
/// Each line is stamped with seconds elapsed since startup.
pub fn init_logger(verbosity: u8) {
    START_TIME.set(Instant::now()).ok();

    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };

    env_logger::Builder::from_env(env_logger::Env::new().filter("GAMBIT_LOG"))
        .filter_level(level)
        .format(|buf, record| {
            let elapsed = START_TIME.get().unwrap().elapsed();
            writeln!(
                buf,
                "[{:7.1}s] {:5} {}",
                elapsed.as_secs_f64(),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .init();
}
