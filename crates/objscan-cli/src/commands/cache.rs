//! Cache command: inspect and edit the root address cache.

use std::fmt::Write as _;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use objscan_core::{RootAddressCache, RootAddressCacheEntry};

pub fn list(cache: &RootAddressCache, json: bool) -> Result<()> {
    let entries = cache.entries()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    eprintln!("Cache file: {}", cache.path().display());
    if entries.is_empty() {
        eprintln!("No cached roots");
        return Ok(());
    }
    print!("{}", format_entries(&entries, cache.ttl(), Utc::now()));
    Ok(())
}

pub fn clear(cache: &RootAddressCache) -> Result<()> {
    cache.clear()?;
    eprintln!("Removed {}", cache.path().display());
    Ok(())
}

pub fn invalidate(cache: &RootAddressCache, pid: u32) -> Result<()> {
    cache.invalidate(pid)?;
    eprintln!("Forgot cached root for PID {}", pid);
    Ok(())
}

fn format_entries(entries: &[RootAddressCacheEntry], ttl: Duration, now: DateTime<Utc>) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{:>8}  {:<16}  {:>8}  {:<7}  HINT",
        "PID", "ROOT", "AGE", "STATE"
    );
    for entry in entries {
        let age = entry
            .age(now)
            .map(format_age)
            .unwrap_or_else(|| "future".to_string());
        let state = if entry.is_fresh(ttl, now) {
            "fresh"
        } else {
            "expired"
        };
        let _ = writeln!(
            output,
            "{:>8}  0x{:<14X}  {:>8}  {:<7}  {}",
            entry.process_id,
            entry.root_address,
            age,
            state,
            entry.runtime_version_hint.as_deref().unwrap_or("-")
        );
    }
    output
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..60 => format!("{}s", secs),
        60..3600 => format!("{}m", secs / 60),
        _ => format!("{}h{:02}m", secs / 3600, secs % 3600 / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(Duration::from_secs(42)), "42s");
        assert_eq!(format_age(Duration::from_secs(125)), "2m");
        assert_eq!(format_age(Duration::from_secs(25 * 3600 + 5 * 60)), "25h05m");
    }

    #[test]
    fn test_format_entries_marks_expired() {
        let now = Utc::now();
        let entries = vec![
            RootAddressCacheEntry {
                discovered_at: now - chrono::Duration::minutes(5),
                ..RootAddressCacheEntry::new(100, 0x5500_0000_1000)
            },
            RootAddressCacheEntry {
                discovered_at: now - chrono::Duration::hours(25),
                runtime_version_hint: Some("/opt/client@1".to_string()),
                ..RootAddressCacheEntry::new(200, 0x2000)
            },
        ];
        let text = format_entries(&entries, Duration::from_secs(24 * 3600), now);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("0x550000001000"));
        assert!(lines[1].contains("fresh"));
        assert!(lines[1].ends_with('-'));
        assert!(lines[2].contains("expired"));
        assert!(lines[2].contains("25h00m"));
        assert!(lines[2].ends_with("/opt/client@1"));
    }
}
