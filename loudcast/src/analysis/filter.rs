//! Reduction of raw analysis output to the loudnorm summary lines.

/// Field labels of the loudnorm `print_format=summary` report.
const SUMMARY_LABELS: [&str; 10] = [
    "Input Integrated",
    "Input True Peak",
    "Input LRA",
    "Input Threshold",
    "Output Integrated",
    "Output True Peak",
    "Output LRA",
    "Output Threshold",
    "Normalization Type",
    "Target Offset",
];

/// Keep only the lines carrying a recognized loudness metric.
///
/// Everything else (the ffmpeg banner, stream mappings, progress noise)
/// is dropped. Total and idempotent: no input can fail, and filtering an
/// already-filtered summary returns it unchanged.
pub fn summary(output: &str) -> String {
    let mut result = String::new();
    for line in output.lines() {
        if SUMMARY_LABELS.iter().any(|label| line.contains(label)) {
            result.push_str(line);
            result.push('\n');
        }
    }
    result
}
