use std::io::Write;

use docsift_core::persist::ProcessedDocument;
use docsift_core::{
    BatchSummary, ObjectInfo, Outcome, ProcessingResult, ProcessingStatus, ProgressEvent,
};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

fn status_label(status: ProcessingStatus, color: ColorMode) -> String {
    let label = status.to_string().to_uppercase();
    if !color.enabled() {
        return label;
    }
    match status {
        ProcessingStatus::Success => label.green().to_string(),
        ProcessingStatus::Partial => label.yellow().to_string(),
        ProcessingStatus::Failed => label.red().to_string(),
    }
}

/// Print a real-time progress event.
pub fn print_progress(
    w: &mut dyn Write,
    event: &ProgressEvent,
    color: ColorMode,
) -> std::io::Result<()> {
    match event {
        ProgressEvent::Started { index, total, key } => {
            writeln!(w, "[{}/{}] Extracting: {}", index + 1, total, key)?;
        }
        ProgressEvent::Finished {
            index,
            total,
            status,
            elapsed,
            ..
        } => {
            writeln!(
                w,
                "[{}/{}] -> {} ({:.1}s)",
                index + 1,
                total,
                status_label(*status, color),
                elapsed.as_secs_f64()
            )?;
        }
    }
    Ok(())
}

/// Print the outcome of a single document.
pub fn print_result(
    w: &mut dyn Write,
    result: &ProcessingResult,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(
        w,
        "{} {}",
        status_label(result.status(), color),
        result.source_key
    )?;
    match &result.outcome {
        Outcome::Success {
            text_key,
            extraction,
            ..
        }
        | Outcome::Partial {
            text_key,
            extraction,
            ..
        } => {
            writeln!(
                w,
                "  {} pages, {} words, {:.1}% avg confidence via {} -> {}",
                extraction.page_count,
                extraction.word_count,
                extraction.confidence_stats.average_confidence,
                extraction.extraction_method,
                text_key
            )?;
            if let Outcome::Partial { warning, .. } = &result.outcome {
                if color.enabled() {
                    writeln!(w, "  {} {}", "WARNING:".yellow(), warning)?;
                } else {
                    writeln!(w, "  WARNING: {}", warning)?;
                }
            }
        }
        Outcome::Failed { error_key, error } => {
            let line = format!("  {}: {}", error.error_kind, error.error_message);
            if color.enabled() {
                writeln!(w, "{}", line.red())?;
            } else {
                writeln!(w, "{}", line)?;
            }
            match error_key {
                Some(key) => writeln!(w, "  error record: {}", key)?,
                None => writeln!(w, "  error record could not be written")?,
            }
        }
    }
    Ok(())
}

/// Print the per-document details and totals for a batch.
pub fn print_batch_summary(
    w: &mut dyn Write,
    summary: &BatchSummary,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    for result in summary.succeeded.iter().chain(summary.failed.iter()) {
        print_result(w, result, color)?;
    }

    let partial = summary.partial_count();
    let success = summary.succeeded.len() - partial;
    writeln!(w)?;
    writeln!(w, "{}", "=".repeat(60))?;
    if color.enabled() {
        writeln!(w, "{}", "SUMMARY".bold())?;
    } else {
        writeln!(w, "SUMMARY")?;
    }
    writeln!(w, "{}", "=".repeat(60))?;
    writeln!(w, "  Documents:  {}", summary.total())?;
    if color.enabled() {
        writeln!(w, "  Succeeded:  {}", success.to_string().green())?;
        writeln!(w, "  Partial:    {}", partial.to_string().yellow())?;
        writeln!(w, "  Failed:     {}", summary.failed.len().to_string().red())?;
    } else {
        writeln!(w, "  Succeeded:  {}", success)?;
        writeln!(w, "  Partial:    {}", partial)?;
        writeln!(w, "  Failed:     {}", summary.failed.len())?;
    }
    Ok(())
}

pub fn print_processed(
    w: &mut dyn Write,
    documents: &[ProcessedDocument],
    color: ColorMode,
) -> std::io::Result<()> {
    if documents.is_empty() {
        writeln!(w, "No processed documents")?;
        return Ok(());
    }
    for doc in documents {
        let modified = doc
            .last_modified
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        if color.enabled() {
            writeln!(
                w,
                "{:<40} {:>10}  {}  {}",
                doc.name.bold(),
                doc.size,
                modified.dimmed(),
                doc.original_key
            )?;
        } else {
            writeln!(
                w,
                "{:<40} {:>10}  {}  {}",
                doc.name, doc.size, modified, doc.original_key
            )?;
        }
    }
    writeln!(w)?;
    writeln!(w, "{} document(s)", documents.len())?;
    Ok(())
}

pub fn print_error_objects(
    w: &mut dyn Write,
    objects: &[ObjectInfo],
    color: ColorMode,
) -> std::io::Result<()> {
    if objects.is_empty() {
        writeln!(w, "No error records")?;
        return Ok(());
    }
    for obj in objects {
        if color.enabled() {
            writeln!(w, "{} ({} bytes)", obj.key.red(), obj.size)?;
        } else {
            writeln!(w, "{} ({} bytes)", obj.key, obj.size)?;
        }
    }
    writeln!(w)?;
    writeln!(w, "{} error record(s)", objects.len())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn progress_lines_are_one_based() {
        let mut buf = Vec::new();
        print_progress(
            &mut buf,
            &ProgressEvent::Started {
                index: 0,
                total: 3,
                key: "input-articles/a.pdf".into(),
            },
            ColorMode(false),
        )
        .unwrap();
        print_progress(
            &mut buf,
            &ProgressEvent::Finished {
                index: 0,
                total: 3,
                key: "input-articles/a.pdf".into(),
                status: ProcessingStatus::Partial,
                elapsed: Duration::from_millis(1500),
            },
            ColorMode(false),
        )
        .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "[1/3] Extracting: input-articles/a.pdf\n[1/3] -> PARTIAL (1.5s)\n"
        );
    }

    #[test]
    fn empty_listings() {
        let mut buf = Vec::new();
        print_processed(&mut buf, &[], ColorMode(false)).unwrap();
        print_error_objects(&mut buf, &[], ColorMode(false)).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "No processed documents\nNo error records\n"
        );
    }

    #[test]
    fn empty_batch_summary() {
        let mut buf = Vec::new();
        print_batch_summary(&mut buf, &BatchSummary::default(), ColorMode(false)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Documents:  0"));
        assert!(text.contains("Failed:     0"));
    }
}
