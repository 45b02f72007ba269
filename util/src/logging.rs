use std::{
    error::Error,
    fmt,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
    thread,
};

use chrono::prelude::*;
use flate2::{write::GzEncoder, Compression};
use log::*;
use log4rs::{
    append::{
        rolling_file::{
            policy::compound::{roll::Roll, trigger::size::SizeTrigger, CompoundPolicy},
            RollingFileAppender,
        },
        Append,
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::{Filter, Response},
};

#[cfg(unix)]
use termion::color;

type AppendResult<T> = anyhow::Result<T>;

const LIVE_LOG: &str = "latest.log";
const ROLL_SIZE: u64 = 32 * 1024 * 1024;

#[cfg(debug_assertions)]
const LEVEL: LevelFilter = LevelFilter::Debug;
#[cfg(not(debug_assertions))]
const LEVEL: LevelFilter = LevelFilter::Info;

/// Configures log4rs for an engine process.
///
/// Records print as `[HH:MM:SS Level]: message`, colored by level on unix terminals. Debug and
/// trace records are dropped unless they come from a module whose path starts with
/// `module_prefix`. The live log is `{log_dir}/latest.log`; once it grows past a size limit it is
/// archived to `{log_dir}/yyyy-mm-dd-N.log.gz`.
pub fn init_logger(module_prefix: &str, log_dir: &str) -> Result<(), Box<dyn Error>> {
    let log_dir = PathBuf::from(log_dir);

    let file = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("[{d(%H:%M:%S)} {l}]: {m}\n")))
        .build(
            log_dir.join(LIVE_LOG),
            Box::new(CompoundPolicy::new(
                Box::new(SizeTrigger::new(ROLL_SIZE)),
                Box::new(GzArchiver::new(log_dir.clone())),
            )),
        )?;

    let filtered = |name: &str, appender: Box<dyn Append>| {
        Appender::builder()
            .filter(Box::new(ModuleFilter(module_prefix.to_owned())))
            .build(name, appender)
    };

    let config = Config::builder()
        .appender(filtered("console", Box::new(Console)))
        .appender(filtered("file", Box::new(file)))
        .build(
            Root::builder()
                .appender("console")
                .appender("file")
                .build(LEVEL),
        )?;

    log4rs::init_config(config)?;
    Ok(())
}

/// Archives the live log in `log_dir` on the calling thread. Call this right before exiting.
pub fn cleanup(log_dir: &str) {
    let log_dir = PathBuf::from(log_dir);
    let live = log_dir.join(LIVE_LOG);
    if live.exists() {
        // Nothing left to report the failure to
        let _ = GzArchiver::new(log_dir).archive(&live, false);
    }
}

struct ModuleFilter(String);

impl Filter for ModuleFilter {
    fn filter(&self, record: &Record<'_>) -> Response {
        match record.level() {
            Level::Debug | Level::Trace => match record.module_path() {
                Some(path) if path.starts_with(&self.0) => Response::Neutral,
                _ => Response::Reject,
            },
            _ => Response::Neutral,
        }
    }
}

impl fmt::Debug for ModuleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleFilter({})", self.0)
    }
}

#[derive(Debug)]
struct Console;

impl Console {
    #[cfg(unix)]
    fn write_record(writer: &mut impl Write, record: &Record<'_>) -> io::Result<()> {
        let level = record.level();
        match level {
            Level::Error => write!(writer, "{}", color::Fg(color::Red))?,
            Level::Warn => write!(writer, "{}", color::Fg(color::LightYellow))?,
            Level::Debug | Level::Trace => write!(writer, "{}", color::Fg(color::LightCyan))?,
            Level::Info => {}
        }
        writeln!(
            writer,
            "[{} {}]: {}{}",
            Local::now().format("%H:%M:%S"),
            level,
            record.args(),
            color::Fg(color::Reset)
        )
    }

    #[cfg(not(unix))]
    fn write_record(writer: &mut impl Write, record: &Record<'_>) -> io::Result<()> {
        writeln!(
            writer,
            "[{} {}]: {}",
            Local::now().format("%H:%M:%S"),
            record.level(),
            record.args()
        )
    }
}

impl Append for Console {
    fn append(&self, record: &Record<'_>) -> AppendResult<()> {
        let stdout = io::stdout();
        Self::write_record(&mut stdout.lock(), record)?;
        Ok(())
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

/// Moves the live log aside and gzips it into a dated archive.
struct GzArchiver {
    log_dir: PathBuf,
    // (day of year, archives written that day)
    counter: Mutex<(u32, u32)>,
}

impl GzArchiver {
    fn new(log_dir: PathBuf) -> Self {
        let today = Local::now();
        let prefix = today.format("%Y-%m-%d").to_string();

        let written = fs::read_dir(&log_dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.file_name().into_string().ok())
                    .filter(|name| name.starts_with(&prefix))
                    .filter_map(|name| archive_index(&name))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);

        GzArchiver {
            log_dir,
            counter: Mutex::new((today.ordinal(), written)),
        }
    }

    fn next_archive(&self) -> PathBuf {
        let now = Local::now();
        let index = {
            let mut counter = match self.counter.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if counter.0 != now.ordinal() {
                *counter = (now.ordinal(), 0);
            }
            counter.1 += 1;
            counter.1
        };

        self.log_dir
            .join(format!("{}-{}.log.gz", now.format("%Y-%m-%d"), index))
    }

    fn archive(&self, live: &Path, background: bool) -> AppendResult<()> {
        // Free the live path first so the appender can reopen it while we compress
        let staged = self.log_dir.join("archiving.log");
        fs::rename(live, &staged)?;
        let output = self.next_archive();

        if background {
            thread::spawn(move || compress_or_log(&staged, &output));
        } else {
            compress_or_log(&staged, &output);
        }
        Ok(())
    }
}

impl Roll for GzArchiver {
    fn roll(&self, file: &Path) -> AppendResult<()> {
        self.archive(file, true)
    }
}

impl fmt::Debug for GzArchiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzArchiver")
            .field("log_dir", &self.log_dir)
            .finish()
    }
}

// Archive names look like {date}-{index}.log.gz
fn archive_index(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(".log.gz")?;
    let (_, index) = stem.rsplit_once('-')?;
    index.parse().ok()
}

fn compress_or_log(input: &Path, output: &Path) {
    if let Err(e) = compress(input, output) {
        error!("Failed to archive log file {}: {}", input.display(), e);
    }
}

fn compress(input: &Path, output: &Path) -> io::Result<()> {
    let mut source = File::open(input)?;
    let mut encoder = GzEncoder::new(File::create(output)?, Compression::default());
    io::copy(&mut source, &mut encoder)?;
    encoder.finish()?;
    // Some platforms refuse to delete open files
    drop(source);
    fs::remove_file(input)
}
