//! Config command for printing the effective configuration.

use std::io::Write;

use anyhow::Result;
use serde_json::Value;

use crate::Config;

/// Flattens nested objects into `a.b.c = value` pairs.
fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, child, out);
            }
        }
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

pub fn run<W: Write>(writer: &mut W, config: &Config, json: bool) -> Result<()> {
    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(config)?)?;
        return Ok(());
    }

    let mut entries = Vec::new();
    flatten("", &serde_json::to_value(config)?, &mut entries);
    entries.sort();
    for (key, value) in entries {
        writeln!(writer, "{key} = {value}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn default_config_as_text() {
        let mut output = Vec::new();
        run(&mut output, &Config::default(), false).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        service.command_capacity = 256
        service.event_capacity = 64
        thresholds.active_state_distance_threshold_m = 200.0
        thresholds.active_state_timeout_ms = 300000
        thresholds.deep_stationary_acceleration_threshold = 1.5
        thresholds.deep_stationary_step_threshold = 10
        thresholds.deep_stationary_timeout_ms = 1800000
        thresholds.deep_stationary_to_active_step_threshold = 20
        thresholds.driving_speed_threshold_mps = 8.0
        thresholds.driving_to_active_speed_threshold_mps = 3.0
        thresholds.driving_to_active_time_threshold_ms = 120000
        thresholds.gps_timeout_ms = 60000
        thresholds.indoor_to_outdoor_step_threshold = 20
        thresholds.location_history_capacity = 32
        thresholds.max_accuracy_meters = 200.0
        thresholds.outdoor_to_active_step_threshold = 50
        thresholds.polling.active_ms = 5000
        thresholds.polling.deep_stationary_ms = 50000
        thresholds.polling.driving_ms = 2000
        thresholds.polling.indoor_ms = 30000
        thresholds.polling.outdoor_ms = 10000
        thresholds.tick_interval_ms = 5000
        thresholds.trip_end_grace_ms = 300000
        ");
    }

    #[test]
    fn json_output_round_trips() {
        let mut config = Config::default();
        config.thresholds.gps_timeout_ms = 45_000;
        let mut output = Vec::new();
        run(&mut output, &config, true).unwrap();
        let parsed: Config = serde_json::from_slice(&output).unwrap();
        assert_eq!(parsed, config);
    }
}
