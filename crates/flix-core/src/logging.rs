use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

#[derive(Clone, Debug)]
pub struct LogSettings {
    /// Used as the log file prefix, e.g. `flix-bus`.
    pub component: String,
    pub instance: String,
    pub log_dir: String,
    pub debug: bool,
    pub stderr: bool,
}

pub struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stderr_enabled: bool,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

pub fn init_logging(settings: &LogSettings) -> Option<LogGuard> {
    let level = if settings.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("FLIX_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(settings) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let stderr_enabled = settings.stderr || file.is_none();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone(), stderr_enabled));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>, stderr_enabled: bool) -> Self {
        Self {
            stderr_enabled,
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stderr_enabled {
            let _ = io::stderr().write_all(buf);
        }
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stderr_enabled {
            let _ = io::stderr().flush();
        }
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = file.flush();
        }
        Ok(())
    }
}

fn open_log_file(settings: &LogSettings) -> io::Result<LogGuard> {
    if settings.log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(&settings.log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let path = dir.join(log_file_name(&settings.component, &settings.instance));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn log_file_name(component: &str, instance: &str) -> String {
    let component = sanitize_component(component);
    if instance.trim().is_empty() {
        return format!("{component}.log");
    }
    format!("{component}-{}.log", sanitize_component(instance))
}

/// Flag, then `FLIX_LOG_DIR`, then `$XDG_STATE_HOME/flix/logs`. Empty means
/// stderr only.
pub fn resolve_log_dir(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var("FLIX_LOG_DIR") {
        return value;
    }
    if let Ok(value) = std::env::var("XDG_STATE_HOME") {
        if !value.trim().is_empty() {
            return format!("{value}/flix/logs");
        }
    }
    match std::env::var("HOME") {
        Ok(home) if !home.trim().is_empty() => format!("{home}/.local/state/flix/logs"),
        _ => String::new(),
    }
}

pub fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
