use std::io::IsTerminal;
use std::sync::Arc;

use jitbridge::{BridgeError, CompilerBridge};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, Layer, Registry, filter::Directive, fmt, layer::SubscriberExt};

use crate::cli::{LogColor, Options};
use crate::demo::DemoHost;

pub fn init_tracing(opts: &Options) {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(opts.log_level))
        .from_env_lossy();

    let stdout_is_tty = std::io::stdout().is_terminal();
    let use_color = match opts.log_color {
        LogColor::Always => true,
        LogColor::Never => false,
        LogColor::Auto => stdout_is_tty,
    };

    let include_target = matches!(opts.log_level, Level::DEBUG | Level::TRACE);

    let fmt_layer = fmt::layer()
        .with_target(include_target)
        .with_ansi(use_color);

    let subscriber = Registry::default().with(fmt_layer.with_filter(log_filter));

    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {error}");
    }
}

/// Build the bridge and bring the compiler up.
pub fn init_bridge(opts: &Options) -> Result<Arc<CompilerBridge>, BridgeError> {
    let bridge = Arc::new(CompilerBridge::initialize_globals(
        opts.bridge_config(),
        Arc::new(DemoHost::default()),
    ));

    if !bridge.can_initialize() {
        return Err(BridgeError::Host(
            "module system is not ready for the compiler bridge".to_owned(),
        ));
    }

    if opts.load_library
        && let Some(library) = bridge.get_library(true)
    {
        info!(path = %library.path().display(), "Compiler library ready");
    }

    bridge.ensure_box_caches_initialized()?;
    bridge.initialize_compiler()?;
    Ok(bridge)
}
