use anyhow::{anyhow, Result};
use std::time::Duration;

/// Parse human-readable duration strings into milliseconds
/// Supports formats like: "1s", "500ms", "2m", "1.5s", "30", "2h"
/// A bare number is taken as milliseconds.
pub fn parse_millis(input: &str) -> Result<u64> {
    let input = input.trim();

    if let Ok(ms) = input.parse::<u64>() {
        return Ok(ms);
    }

    let (number_part, unit_part) = split_number_and_unit(input)?;
    let value: f64 = number_part
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid number in duration: {}", number_part))?;
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("Duration must be a non-negative number: {}", input));
    }

    let multiplier = match unit_part.trim().to_ascii_lowercase().as_str() {
        "ms" | "milliseconds" | "millisecond" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => 1000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
        "" => 1.0,
        other => return Err(anyhow!("Unknown time unit: {}", other)),
    };

    Ok((value * multiplier).round() as u64)
}

/// Same as [`parse_millis`] but returns a [`Duration`].
pub fn parse_duration(input: &str) -> Result<Duration> {
    parse_millis(input).map(Duration::from_millis)
}

fn split_number_and_unit(input: &str) -> Result<(&str, &str)> {
    let split_pos = input
        .char_indices()
        .find(|(_, ch)| ch.is_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(input.len());

    let number_part = &input[..split_pos];
    let unit_part = &input[split_pos..];

    if number_part.trim().is_empty() {
        return Err(anyhow!("No numeric value in duration: {}", input));
    }

    Ok((number_part, unit_part))
}
