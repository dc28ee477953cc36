use fern::colors::{Color, ColoredLevelConfig};
use log::{Level, LevelFilter};

/// Initialize the global `log` dispatcher writing colored lines to stderr.
///
/// `sqlx` is capped at `warn` so statement logging does not drown the
/// request logs.
pub fn init_logging(level: Level) -> anyhow::Result<()> {
	let colors = ColoredLevelConfig::new()
		.error(Color::Red)
		.warn(Color::Yellow)
		.info(Color::Green)
		.debug(Color::Blue)
		.trace(Color::Magenta);

	fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} {:<5} [{}] {}",
				chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
				colors.color(record.level()),
				record.target(),
				message
			))
		})
		.level(level.to_level_filter())
		.level_for("sqlx", LevelFilter::Warn)
		.level_for("hyper", LevelFilter::Warn)
		.chain(std::io::stderr())
		.apply()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn logging_initialization() {
		// The global logger can only be set once per process; a second call
		// must report an error instead of panicking.
		let _ = super::init_logging(log::Level::Debug);
		assert!(super::init_logging(log::Level::Debug).is_err());
	}
}
