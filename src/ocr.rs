//! Document-level confidence and transcript from raw OCR engine output.

use crate::error::ValidationError;
use crate::types::{OcrLine, OcrResult};
use serde::Serialize;

/// Reduced form of one engine run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    /// Word engines: mean in [0, 100]. Line engines: mean in [0, 1].
    pub confidence: f64,
    /// Reading-order transcript; only line engines produce one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

/// Mean of the strictly positive confidences; 0 when there are none.
///
/// Callers must pass arrays of equal length (see [`OcrResult::validate`]).
pub fn aggregate_wordconf(words: &[String], confidences: &[i32]) -> f64 {
    debug_assert_eq!(words.len(), confidences.len());
    let (sum, count) = confidences
        .iter()
        .filter(|&&c| c > 0)
        .fold((0i64, 0usize), |(sum, count), &c| (sum + c as i64, count + 1));
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

/// Mean line score plus the transcript, pages outer and lines inner,
/// every line terminated by `\n`.
pub fn aggregate_lines(pages: &[Vec<OcrLine>]) -> (f64, String) {
    let mut transcript = String::new();
    let mut total = 0.0;
    let mut count = 0usize;
    for line in pages.iter().flatten() {
        transcript.push_str(&line.text);
        transcript.push('\n');
        total += line.score;
        count += 1;
    }
    if count == 0 {
        (0.0, transcript)
    } else {
        (total / count as f64, transcript)
    }
}

impl OcrResult {
    /// Check the preconditions the aggregators rely on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            OcrResult::WordConf { words, confidences } => {
                if words.len() != confidences.len() {
                    return Err(ValidationError::LengthMismatch {
                        words: words.len(),
                        confidences: confidences.len(),
                    });
                }
                if let Some((index, &value)) = confidences
                    .iter()
                    .enumerate()
                    .find(|(_, c)| !(-1..=100).contains(*c))
                {
                    return Err(ValidationError::ConfidenceOutOfRange { index, value });
                }
            }
            OcrResult::Lines { pages } => {
                for (page, lines) in pages.iter().enumerate() {
                    for (line, l) in lines.iter().enumerate() {
                        if !(0.0..=1.0).contains(&l.score) {
                            return Err(ValidationError::ScoreOutOfRange {
                                page,
                                line,
                                score: l.score,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn aggregate(&self) -> Aggregate {
        match self {
            OcrResult::WordConf { words, confidences } => Aggregate {
                confidence: aggregate_wordconf(words, confidences),
                transcript: None,
            },
            OcrResult::Lines { pages } => {
                let (confidence, transcript) = aggregate_lines(pages);
                Aggregate {
                    confidence,
                    transcript: Some(transcript),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("w{}", i)).collect()
    }

    #[test]
    fn wordconf_empty_is_zero() {
        assert_eq!(aggregate_wordconf(&[], &[]), 0.0);
    }

    #[test]
    fn wordconf_without_positive_values_is_zero() {
        assert_eq!(aggregate_wordconf(&words(2), &[-1, 0]), 0.0);
    }

    #[test]
    fn wordconf_averages_positive_values() {
        assert_eq!(aggregate_wordconf(&words(2), &[50, 100]), 75.0);
    }

    #[test]
    fn wordconf_ignores_non_positive_in_denominator() {
        assert_eq!(aggregate_wordconf(&words(3), &[0, 50, 100]), 75.0);
        assert_eq!(aggregate_wordconf(&words(4), &[-1, 90, -1, 30]), 60.0);
    }

    #[test]
    fn lines_empty_is_zero_and_blank() {
        assert_eq!(aggregate_lines(&[]), (0.0, String::new()));
        assert_eq!(aggregate_lines(&[vec![], vec![]]), (0.0, String::new()));
    }

    #[test]
    fn lines_single_line_keeps_trailing_newline() {
        let pages = vec![vec![OcrLine::new("INVOICE", 0.9)]];
        assert_eq!(aggregate_lines(&pages), (0.9, "INVOICE\n".to_string()));
    }

    #[test]
    fn lines_follow_page_then_line_order() {
        let pages = vec![vec![OcrLine::new("A", 0.5)], vec![OcrLine::new("B", 1.0)]];
        assert_eq!(aggregate_lines(&pages), (0.75, "A\nB\n".to_string()));

        let pages = vec![
            vec![OcrLine::new("1", 1.0), OcrLine::new("2", 1.0)],
            vec![],
            vec![OcrLine::new("3", 0.4)],
        ];
        let (confidence, transcript) = aggregate_lines(&pages);
        assert_eq!(transcript, "1\n2\n3\n");
        assert!((confidence - 0.8).abs() < 1e-12);
    }

    #[test]
    fn dispatch_matches_direct_calls() {
        let word = OcrResult::WordConf {
            words: words(3),
            confidences: vec![0, 50, 100],
        };
        assert_eq!(
            word.aggregate(),
            Aggregate {
                confidence: 75.0,
                transcript: None
            }
        );

        let lines = OcrResult::Lines {
            pages: vec![vec![OcrLine::new("A", 0.5)], vec![OcrLine::new("B", 1.0)]],
        };
        assert_eq!(
            lines.aggregate(),
            Aggregate {
                confidence: 0.75,
                transcript: Some("A\nB\n".into())
            }
        );
    }

    #[test]
    fn aggregation_is_repeatable() {
        let result = OcrResult::Lines {
            pages: vec![vec![OcrLine::new("x", 0.3), OcrLine::new("y", 0.6)]],
        };
        assert_eq!(result.aggregate(), result.aggregate());
    }

    #[test]
    fn validate_rejects_length_mismatch() {
        let result = OcrResult::WordConf {
            words: words(2),
            confidences: vec![10],
        };
        assert!(matches!(
            result.validate(),
            Err(ValidationError::LengthMismatch {
                words: 2,
                confidences: 1
            })
        ));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let result = OcrResult::WordConf {
            words: words(2),
            confidences: vec![10, 101],
        };
        assert!(matches!(
            result.validate(),
            Err(ValidationError::ConfidenceOutOfRange { index: 1, value: 101 })
        ));

        let result = OcrResult::Lines {
            pages: vec![vec![], vec![OcrLine::new("a", 0.2), OcrLine::new("b", f64::NAN)]],
        };
        assert!(matches!(
            result.validate(),
            Err(ValidationError::ScoreOutOfRange { page: 1, line: 1, .. })
        ));
    }

    #[test]
    fn validate_accepts_well_formed_input() {
        let result = OcrResult::WordConf {
            words: words(3),
            confidences: vec![-1, 0, 100],
        };
        assert!(result.validate().is_ok());
    }
}
