use anyhow::Result;

use crate::EmulatorConfig;

pub fn check_config(cfg: &EmulatorConfig) -> Result<()> {
    anyhow::ensure!(
        cfg.frame_rate >= 1.0 && cfg.frame_rate <= 120.0,
        "emulator.frame_rate should be 1..120"
    );
    anyhow::ensure!(cfg.battery_minutes > 0.0, "emulator.battery_minutes must be positive");
    anyhow::ensure!(cfg.battery_tick_ms >= 1, "emulator.battery_tick_ms must be at least 1");
    anyhow::ensure!(
        cfg.state_interval_ms >= 10 && cfg.state_interval_ms <= 5_000,
        "emulator.state_interval_ms should be 10..5000"
    );
    Ok(())
}
