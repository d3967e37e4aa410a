//! Terminal rendering for the `voxscribe` binary.
//!
//! Transcript text goes to stdout; status lines go to stderr so the
//! transcript can be piped.

use crate::language::{LANGUAGES, LanguageEstimate};
use crate::model::catalog::ModelInfo;
use crate::orchestrator::Transcription;
use crate::segment::Completion;

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Return the ANSI color code for a confidence value.
fn confidence_color(confidence: f32) -> &'static str {
    if confidence >= 0.8 {
        GREEN
    } else if confidence >= 0.6 {
        "" // default terminal color
    } else if confidence >= 0.4 {
        YELLOW
    } else {
        RED
    }
}

/// Format seconds as `HH:MM:SS.mmm`.
pub fn format_timestamp(secs: f32) -> String {
    let millis = (secs.max(0.0) * 1000.0).round() as u64;
    let (hours, rest) = (millis / 3_600_000, millis % 3_600_000);
    let (minutes, rest) = (rest / 60_000, rest % 60_000);
    let (seconds, millis) = (rest / 1000, rest % 1000);
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

/// One-word label for how a run ended.
pub fn completion_label(completion: &Completion) -> &'static str {
    match completion {
        Completion::Complete => "complete",
        Completion::Cancelled => "cancelled",
        Completion::TimedOut => "timed out",
        Completion::Failed(_) => "failed",
    }
}

/// `[zh] 97%`, or just `[zh]` for a forced language.
fn format_language(language: &LanguageEstimate) -> String {
    if language.forced {
        format!("[{}]", language.language)
    } else {
        format!("[{}] {:.0}%", language.language, language.confidence * 100.0)
    }
}

/// Status line summarizing a transcription.
pub fn format_summary(transcription: &Transcription) -> String {
    let confidence = transcription.confidence();
    let color = confidence_color(confidence);
    let mut line = format!(
        "{DIM}{} {:.1}s audio in {}ms{RESET} {color}confidence {:.0}%{RESET}",
        format_language(&transcription.language),
        transcription.duration_secs,
        transcription.elapsed.as_millis(),
        confidence * 100.0,
    );
    if transcription.low_confidence {
        line.push_str(&format!(" {YELLOW}(low confidence){RESET}"));
    }
    match &transcription.completion {
        Completion::Complete => {}
        Completion::Failed(reason) => {
            line.push_str(&format!(" {RED}partial: {reason}{RESET}"));
        }
        other => {
            line.push_str(&format!(" {YELLOW}partial: {}{RESET}", completion_label(other)));
        }
    }
    line
}

/// Print the transcript to stdout and, unless quiet, a summary to stderr.
///
/// `max_segments` adds up to that many timestamped segment lines.
pub fn print_transcription(transcription: &Transcription, max_segments: Option<usize>, quiet: bool) {
    println!("{}", transcription.text());

    if let Some(limit) = max_segments {
        for segment in transcription.segments().iter().take(limit) {
            println!(
                "[{} --> {}] {}",
                format_timestamp(segment.start),
                format_timestamp(segment.end),
                segment.text
            );
        }
    }

    if !quiet {
        eprintln!("{}", format_summary(transcription));
    }
}

pub fn format_model_info(model: &ModelInfo) -> String {
    let scope = if model.is_english_only() {
        "English only"
    } else {
        "multilingual"
    };
    format!(
        "{:<16} {:>5} MB  {:<13} {DIM}{}{RESET}",
        model.name, model.size_mb, scope, model.hf_repo
    )
}

pub fn print_models(models: &[ModelInfo], default: &str) {
    println!("Available models:");
    for model in models {
        let marker = if model.name == default { "*" } else { " " };
        println!("{marker} {}", format_model_info(model));
    }
}

pub fn print_languages() {
    for (code, name) in LANGUAGES {
        println!("{code:<4} {name}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodingResult;
    use std::time::Duration;

    fn transcription(completion: Completion, low_confidence: bool) -> Transcription {
        let mut result = DecodingResult::empty(Some("en".to_string()));
        result.text = "hello".to_string();
        result.avg_logprob = -0.1;
        result.attempts = 1;
        Transcription {
            result,
            language: crate::language::LanguageDetector::forced("en"),
            duration_secs: 2.5,
            elapsed: Duration::from_millis(120),
            completion,
            low_confidence,
        }
    }

    #[test]
    fn confidence_color_thresholds() {
        assert_eq!(confidence_color(0.95), GREEN);
        assert_eq!(confidence_color(0.7), "");
        assert_eq!(confidence_color(0.5), YELLOW);
        assert_eq!(confidence_color(0.1), RED);
    }

    #[test]
    fn timestamps_are_zero_padded() {
        assert_eq!(format_timestamp(0.0), "00:00:00.000");
        assert_eq!(format_timestamp(62.5), "00:01:02.500");
        assert_eq!(format_timestamp(3725.04), "01:02:05.040");
        assert_eq!(format_timestamp(-1.0), "00:00:00.000");
    }

    #[test]
    fn summary_mentions_partial_results() {
        let line = format_summary(&transcription(Completion::TimedOut, false));
        assert!(line.contains("partial: timed out"));
        assert!(line.contains("[en]"));

        let line = format_summary(&transcription(Completion::Complete, true));
        assert!(line.contains("low confidence"));
        assert!(!line.contains("partial"));
    }

    #[test]
    fn detected_language_shows_percentage() {
        let mut estimate = crate::language::LanguageDetector::forced("de");
        estimate.forced = false;
        estimate.confidence = 0.874;
        assert_eq!(format_language(&estimate), "[de] 87%");
    }

    #[test]
    fn model_info_marks_english_only() {
        let info = crate::model::catalog::get_model("base.en").unwrap();
        assert!(format_model_info(info).contains("English only"));
    }

    #[test]
    fn test_print_transcription_doesnt_panic() {
        print_transcription(&transcription(Completion::Complete, false), Some(3), false);
        print_transcription(&transcription(Completion::Failed("boom".into()), false), None, true);
    }
}
