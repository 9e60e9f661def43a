use std::io;

use once_cell::sync::OnceCell;
use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// TracingFactory 是否全局初始化完成
static IS_INIT: OnceCell<bool> = OnceCell::new();

const DEFAULT_LOG_DIR: &str = "/tmp/ultraverse/logs";

#[derive(Debug, Clone, Default)]
pub struct TracingFactory {
    options: TracingFactoryOptions,
}

#[derive(Debug, Clone)]
pub struct TracingFactoryOptions {
    debug: bool,

    output_type: OutputType,

    level: Option<Level>,

    log_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub enum OutputType {
    Stdout,

    Log,
}

impl TracingFactory {
    pub fn init_log(debug: bool) -> Self {
        TracingFactory::init_log_with_options(TracingFactoryOptions::new_with_debug(debug))
    }

    pub fn init_log_with_options(opt: TracingFactoryOptions) -> Self {
        let mut opts = opt.clone();

        let dir = match opt.log_dir {
            None => {
                let path = String::from(DEFAULT_LOG_DIR);
                opts.log_dir = Some(path.clone());

                path
            }
            Some(dir) => dir,
        };

        let level = opts.level.unwrap_or(Level::INFO);

        if IS_INIT.get().is_none() {
            let format = fmt::format()
                .with_file(false)
                .with_line_number(false)
                .with_target(false)
                .with_thread_ids(true)
                .with_thread_names(true)
                .compact();

            match opts.output_type {
                OutputType::Stdout => {
                    let _ = tracing_subscriber::fmt()
                        .with_max_level(level)
                        .event_format(format)
                        // sets this to be the default, global collector for this application.
                        .try_init();
                }
                OutputType::Log => {
                    // debug 模式下，std 与 log 同时输出。 否则只输出 file
                    let file_appender = rolling::daily(format!("{}/statelog", dir.as_str()), "file.log");
                    let merge = file_appender.and(io::stdout);

                    let _ = tracing_subscriber::fmt()
                        .with_max_level(level)
                        .event_format(format)
                        .with_writer(merge)
                        .try_init();
                }
            };

            let _ = IS_INIT.set(true);
        }

        TracingFactory { options: opts }
    }

    pub fn get_log_dir(&self) -> &str {
        self.options.get_log_dir()
    }
}

impl Default for TracingFactoryOptions {
    fn default() -> Self {
        TracingFactoryOptions::new_with_debug(false)
    }
}

impl TracingFactoryOptions {
    pub fn new_with_debug(debug: bool) -> Self {
        TracingFactoryOptions::new_with_type(debug, OutputType::Stdout)
    }

    pub fn new_with_type(debug: bool, output_type: OutputType) -> Self {
        let level = if debug { Level::DEBUG } else { Level::INFO };

        TracingFactoryOptions::new(debug, output_type, Some(level), None)
    }

    pub fn new(debug: bool, output_type: OutputType, level: Option<Level>, log_dir: Option<String>) -> Self {
        TracingFactoryOptions {
            debug,
            output_type,
            level,
            log_dir,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn get_log_dir(&self) -> &str {
        match self.log_dir.as_ref() {
            None => "",
            Some(dir) => dir.as_str(),
        }
    }
}

#[cfg(test)]
mod test {
    use tracing::{debug, error, info, warn};

    use super::TracingFactory;

    #[test]
    fn test() {
        TracingFactory::init_log(true);
        TracingFactory::init_log(true);

        debug!("TracingFactory test: {:?}", "test");
        info!("TracingFactory test: {:?}", "test");
        warn!("TracingFactory test: {:?}", "test");
        error!("TracingFactory test: {:?}", "test");
    }
}
