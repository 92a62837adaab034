/* Logger initialization */
use std::{panic, thread};

use tracing::{error, level_filters::LevelFilter};
use tracing_appender::non_blocking::WorkerGuard;

use crate::CargoEnv;

pub struct LoggerGuards {
    pub _tracing_guard: WorkerGuard,
    // option because sentry is only set up when a dsn is configured
    pub _sentry_guard: Option<sentry::ClientInitGuard>,
}

pub struct Logger {}

impl Logger {
    pub fn init(cargo_env: CargoEnv, sentry_dsn: Option<String>) -> LoggerGuards {
        // proxied embed pages are chatty, debug in development shows every forwarded request
        let max_level = match cargo_env {
            CargoEnv::Development => LevelFilter::DEBUG,
            CargoEnv::Production => LevelFilter::INFO,
        };

        // production goes to a rolling file, development stays on the terminal
        let (non_blocking, guard) = match cargo_env {
            CargoEnv::Development => tracing_appender::non_blocking(std::io::stdout()),
            CargoEnv::Production => tracing_appender::non_blocking(
                tracing_appender::rolling::daily("logs", "gateway.log"),
            ),
        };

        let sentry_guard = sentry_dsn.map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    environment: Some(Self::environment_name(cargo_env).into()),
                    attach_stacktrace: true,
                    ..Default::default()
                },
            ))
        });

        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let fmt_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);

        let registry = tracing_subscriber::registry()
            .with(max_level)
            .with(fmt_layer);

        if sentry_guard.is_some() {
            registry.with(sentry_tracing::layer()).init();
        } else {
            registry.init();
        }

        panic::set_hook(Box::new(|info| {
            let thread = thread::current();
            let thread = thread.name().unwrap_or("unknown");
            let msg = Self::panic_message(info.payload());

            // "notrace - " panics are expected enough that the backtrace is noise
            let (msg, backtrace) = match msg.strip_prefix("notrace - ") {
                Some(stripped) => (stripped, None),
                None => (msg, Some(backtrace::Backtrace::new())),
            };

            let location = info
                .location()
                .map(|l| format!(": {}:{}", l.file(), l.line()))
                .unwrap_or_default();

            match backtrace {
                Some(trace) => error!(
                    target: "panic", "thread '{}' panicked at '{}'{}\n{:?}",
                    thread, msg, location, trace
                ),
                None => error!(
                    target: "panic", "thread '{}' panicked at '{}'{}",
                    thread, msg, location
                ),
            }
        }));

        // return both guards so they're not dropped
        LoggerGuards {
            _tracing_guard: guard,
            _sentry_guard: sentry_guard,
        }
    }

    pub fn environment_name(cargo_env: CargoEnv) -> &'static str {
        match cargo_env {
            CargoEnv::Development => "development",
            CargoEnv::Production => "production",
        }
    }

    fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
        match payload.downcast_ref::<&'static str>() {
            Some(s) => *s,
            // maybe it's on the heap!
            None => match payload.downcast_ref::<String>() {
                Some(s) => s.as_str(),
                None => "Box<Any>",
            },
        }
    }
}
