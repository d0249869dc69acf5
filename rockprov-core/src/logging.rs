use env_logger::Target;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Writes every log line to stderr and to an append-only file.
struct Tee {
    file: fs::File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn open_log(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::OpenOptions::new().create(true).append(true).open(path)
}

/// Initialise env_logger once. `RUST_LOG` still overrides the default level.
///
/// If the log file cannot be opened (permissions, readonly FS, etc.), fall back to stderr.
pub fn init(verbose: bool, log_file: Option<&Path>) {
    let target = match log_file.map(open_log) {
        Some(Ok(file)) => Target::Pipe(Box::new(Tee { file })),
        Some(Err(err)) => {
            eprintln!("rockprov: cannot open log file, logging to stderr only: {err}");
            Target::Stderr
        }
        None => Target::Stderr,
    };

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(target)
        .try_init();
}
