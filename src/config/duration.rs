// src/config/duration.rs

use std::time::Duration;

/// Parse a duration such as `250ms`, `3s`, `5m`, `2h` or a sum of them
/// like `1m30s`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim().to_ascii_lowercase();
    if text.is_empty() {
        return Err("empty duration string".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = text.as_str();
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("duration '{input}': expected a number before '{rest}'"));
        }
        let (number, tail) = rest.split_at(digits);
        let value: u64 = number
            .parse()
            .map_err(|e| format!("duration '{input}': bad number '{number}': {e}"))?;

        let unit_len = tail.find(|c: char| c.is_ascii_digit()).unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let segment = match unit.trim() {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            "" => return Err(format!("duration '{input}' is missing a unit suffix")),
            other => {
                return Err(format!(
                    "duration '{input}': unknown unit '{other}'; expected ms, s, m or h"
                ));
            }
        };
        total = segment
            .and_then(|s| total.checked_add(s))
            .ok_or_else(|| format!("duration '{input}' is too large"))?;
        rest = next;
    }
    Ok(total)
}
