//! Инициализация env_logger для бинарника.
//!
//! Уровень из конфига (`log_level`), RUST_LOG имеет приоритет.
//! `json = true` — одна JSON-строка на запись: ts, level, target, msg.

use anyhow::{anyhow, Result};
use env_logger::{Builder, Env};
use std::io::Write;

pub fn init_logger(level: &str, json: bool) -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(level));
    builder.format_timestamp_millis();

    if json {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "ts": buf.timestamp_millis().to_string(),
                "level": record.level().to_string(),
                "target": record.target(),
                "msg": record.args().to_string(),
            });
            writeln!(buf, "{}", line)
        });
    }

    builder
        .try_init()
        .map_err(|e| anyhow!("init logger: {}", e))
}
