//! Human-readable byte counts for log lines and status output.

const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

/// Render `bytes` in IEC units with at most two decimals, dropping trailing zeros.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut scaled = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if scaled < 1024.0 {
            break;
        }
        scaled /= 1024.0;
        unit = next;
    }

    let rendered = format!("{scaled:.2}");
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {unit}")
}
