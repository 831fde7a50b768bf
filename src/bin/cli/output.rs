//! Output formatting for CLI operations.

use packfs::{Entry, FormatInfo, Metadata};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

/// One line of a directory listing.
pub struct Listed {
    pub path: String,
    pub metadata: Metadata,
}

/// Outcome of an extract command.
#[derive(Default)]
pub struct ExtractSummary {
    pub files_extracted: usize,
    pub bytes_extracted: u64,
    pub failures: Vec<(String, String)>,
}

/// Trait for output formatting
pub trait OutputFormatter {
    /// Formats a directory listing
    fn format_list(&self, entries: &[Listed]) -> String;

    /// Formats a single resolved entry
    fn format_stat(&self, entry: &Entry) -> String;

    /// Formats extraction results
    fn format_extract_result(&self, result: &ExtractSummary) -> String;

    /// Formats the registered formats
    fn format_formats(&self, formats: &[FormatInfo]) -> String;
}

/// Human-readable output formatter
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn format_list(&self, entries: &[Listed]) -> String {
        let mut output = String::new();
        output.push_str(&format!("{:>12} {:>19} {}\n", "Size", "Modified", "Name"));
        output.push_str(&"-".repeat(70));
        output.push('\n');

        let mut total_size: u64 = 0;
        let mut file_count = 0;
        let mut dir_count = 0;

        for entry in entries {
            let meta = &entry.metadata;
            let size_str = if meta.is_dir() {
                dir_count += 1;
                String::new()
            } else {
                file_count += 1;
                total_size += meta.size;
                humanize_bytes(meta.size)
            };
            let mtime_str = meta
                .modified_time()
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string());
            let suffix = if meta.is_dir() {
                "/"
            } else if meta.is_symlink() {
                "@"
            } else {
                ""
            };
            output.push_str(&format!(
                "{:>12} {:>19} {}{}\n",
                size_str, mtime_str, entry.path, suffix
            ));
        }

        output.push_str(&"-".repeat(70));
        output.push('\n');
        output.push_str(&format!(
            "{} files, {} directories, {} total\n",
            file_count,
            dir_count,
            humanize_bytes(total_size)
        ));
        output
    }

    fn format_stat(&self, entry: &Entry) -> String {
        let meta = &entry.metadata;
        let mut output = String::new();
        output.push_str(&format!("  Path:      {}\n", entry.path));
        output.push_str(&format!("  Type:      {}\n", meta.file_type.as_str()));
        output.push_str(&format!("  Size:      {} ({} bytes)\n", humanize_bytes(meta.size), meta.size));
        output.push_str(&format!(
            "  Source:    {}\n",
            entry.source.as_deref().unwrap_or("(mount point)")
        ));
        for (label, time) in [
            ("Modified", meta.modified),
            ("Created", meta.created),
            ("Accessed", meta.accessed),
        ] {
            if let Some(time) = time {
                output.push_str(&format!(
                    "  {:<10} {}\n",
                    format!("{}:", label),
                    format_timestamp(time.as_system_time())
                ));
            }
        }
        output.push_str(&format!(
            "  Read-only: {}\n",
            if meta.read_only { "Yes" } else { "No" }
        ));
        output
    }

    fn format_extract_result(&self, result: &ExtractSummary) -> String {
        let mut output = format!(
            "Extracted {} files ({})\n",
            result.files_extracted,
            humanize_bytes(result.bytes_extracted)
        );
        if !result.failures.is_empty() {
            output.push_str("\nFailures:\n");
            for (path, error) in &result.failures {
                output.push_str(&format!("  {}: {}\n", path, error));
            }
        }
        output
    }

    fn format_formats(&self, formats: &[FormatInfo]) -> String {
        let mut output = format!("{:<8} {:<16} {}\n", "Format", "Extensions", "Description");
        output.push_str(&"-".repeat(70));
        output.push('\n');
        for info in formats {
            output.push_str(&format!(
                "{:<8} {:<16} {}\n",
                info.name,
                info.extensions.join(","),
                info.description
            ));
        }
        output
    }
}

/// JSON output formatter
pub struct JsonFormatter;

fn metadata_json(meta: &Metadata) -> serde_json::Value {
    json!({
        "type": meta.file_type.as_str(),
        "size": meta.size,
        "modified": meta.modified.map(|t| t.as_unix_secs()),
        "created": meta.created.map(|t| t.as_unix_secs()),
        "accessed": meta.accessed.map(|t| t.as_unix_secs()),
        "read_only": meta.read_only,
    })
}

impl OutputFormatter for JsonFormatter {
    fn format_list(&self, entries: &[Listed]) -> String {
        let items: Vec<_> = entries
            .iter()
            .map(|e| {
                let mut value = metadata_json(&e.metadata);
                value["path"] = json!(e.path);
                value
            })
            .collect();
        serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_stat(&self, entry: &Entry) -> String {
        let mut value = metadata_json(&entry.metadata);
        value["path"] = json!(entry.path.as_str());
        value["source"] = json!(entry.source);
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_extract_result(&self, result: &ExtractSummary) -> String {
        let obj = json!({
            "success": result.failures.is_empty(),
            "files_extracted": result.files_extracted,
            "bytes_extracted": result.bytes_extracted,
            "failures": result.failures.iter().map(|(p, e)| json!({"path": p, "error": e})).collect::<Vec<_>>(),
        });
        serde_json::to_string_pretty(&obj).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_formats(&self, formats: &[FormatInfo]) -> String {
        let items: Vec<_> = formats
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "extensions": f.extensions,
                    "description": f.description,
                    "supports_symlinks": f.supports_symlinks,
                })
            })
            .collect();
        serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Creates the appropriate formatter based on output format
pub fn create_formatter(format: super::OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        super::OutputFormat::Human => Box::new(HumanFormatter),
        super::OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Converts bytes to a human-readable string
pub fn humanize_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Formats a SystemTime as a UTC datetime string
pub fn format_timestamp(time: SystemTime) -> String {
    let Ok(duration) = time.duration_since(UNIX_EPOCH) else {
        return "-".to_string();
    };
    let secs = duration.as_secs();
    let (year, month, day) = civil_from_days((secs / 86400) as i64);
    let time_of_day = secs % 86400;
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year,
        month,
        day,
        time_of_day / 3600,
        (time_of_day % 3600) / 60,
        time_of_day % 60
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
