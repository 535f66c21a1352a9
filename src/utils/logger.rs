use chrono::Utc;
use log::info;
use std::io::Write;

/// Logger del client di sincronizzazione
pub struct SyncLogger;

impl SyncLogger {
    /// Installs the global logger. `RUST_LOG` wins over `level` when set.
    /// Calling it twice is an error, not a panic.
    pub fn init(level: &str) -> Result<(), log::SetLoggerError> {
        let env = env_logger::Env::default().default_filter_or(level);
        env_logger::Builder::from_env(env)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{}] [{}] [{}:{}] {}",
                    Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                    record.level(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .try_init()?;

        info!("Sync logger initialized (level {})", level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_rejected() {
        let _ = SyncLogger::init("debug");
        assert!(SyncLogger::init("debug").is_err());
    }
}
