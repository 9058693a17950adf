use {
    serde::Deserialize,
    std::path::PathBuf,
    tracing_appender::{
        non_blocking::WorkerGuard,
        rolling::{RollingFileAppender, Rotation},
    },
    tracing_subscriber::{fmt::writer::BoxMakeWriter, prelude::*, EnvFilter},
};

/// Fallback log level if neither an explicit filter nor [`ENV_LOG_LEVEL`] is
/// provided.
const DEFAULT_LOG_LEVEL: tracing::Level = tracing::Level::INFO;

/// The environment variable used to control the log filter.
const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Installs the global subscriber writing either into `log_file` or
    /// into a non-blocking stderr writer.
    pub fn init(format: LogFormat, filter: Option<&str>, log_file: Option<PathBuf>) -> Self {
        let filter = filter
            .map(EnvFilter::new)
            .or_else(|| EnvFilter::try_from_env(ENV_LOG_LEVEL).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_LEVEL.to_string()));

        let (writer, guard) = match log_file {
            Some(path) => (BoxMakeWriter::new(file_writer(path)), None),
            None => {
                let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
                (BoxMakeWriter::new(writer), Some(guard))
            }
        };

        let layer = match format {
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .event_format(
                    tracing_subscriber::fmt::format()
                        .json()
                        .with_span_list(true)
                        .with_current_span(false),
                )
                .fmt_fields(tracing_subscriber::fmt::format::JsonFields::default())
                .with_target(true)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),

            LogFormat::Text => tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
        };

        tracing_subscriber::registry().with(layer).init();

        Self { _guard: guard }
    }

    /// Flushes the pending records.
    pub fn stop(self) {}
}

fn file_writer(mut path: PathBuf) -> RollingFileAppender {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("zonal.log")
        .to_string();

    path.pop();

    RollingFileAppender::new(Rotation::NEVER, &path, file_name)
}
