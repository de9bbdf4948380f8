/// Scoring for question sets — additive rating totals, yes-counts, and
/// score band lookup.
use serde::Serialize;

use crate::schema::block::{Question, ScaleQuestionsBlock, ScoreBand, YesNoCheckBlock};
use crate::schema::response::ResponseMap;

/// Sum of ratings, or `None` until every question has an integral answer.
/// A sum that would overflow also yields `None`.
pub fn additive_total(questions: &[Question], responses: &ResponseMap) -> Option<i64> {
    questions.iter().try_fold(0i64, |total, q| {
        let rating = responses.get(&q.id).and_then(|v| v.as_integer())?;
        total.checked_add(rating)
    })
}

/// Number of statements answered `true`.
pub fn yes_count(statements: &[Question], responses: &ResponseMap) -> i64 {
    statements
        .iter()
        .filter(|s| responses.get(&s.id).and_then(|v| v.as_bool()) == Some(true))
        .count() as i64
}

/// How many of the questions have any answer.
pub fn answered_count(questions: &[Question], responses: &ResponseMap) -> usize {
    questions.iter().filter(|q| responses.contains(&q.id)).count()
}

/// The one band containing `total`. Gaps in the authored bands, and
/// ambiguous overlaps, both yield `None`.
pub fn band_for(bands: &[ScoreBand], total: i64) -> Option<&ScoreBand> {
    let mut matches = bands.iter().filter(|b| b.contains(total));
    let band = matches.next()?;
    if matches.next().is_some() {
        tracing::warn!(total, "score bands overlap; banding unavailable");
        return None;
    }
    Some(band)
}

/// Sub-ranges of `[min_total, max_total]` covered by no band.
pub fn band_gaps(bands: &[ScoreBand], min_total: i64, max_total: i64) -> Vec<(i64, i64)> {
    let mut sorted: Vec<&ScoreBand> = bands.iter().collect();
    sorted.sort_by_key(|b| b.lo());

    let mut gaps = Vec::new();
    let mut next = min_total;
    for band in sorted {
        if band.hi() < next {
            continue;
        }
        if band.lo() > max_total {
            break;
        }
        if band.lo() > next {
            gaps.push((next, band.lo() - 1));
        }
        next = band.hi().saturating_add(1);
        if next > max_total {
            return gaps;
        }
    }
    if next <= max_total {
        gaps.push((next, max_total));
    }
    gaps
}

/// Score state shown under a question set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub answered: usize,
    pub required: usize,
    /// Present once every item is answered.
    pub total: Option<i64>,
    /// Present when a total exists and exactly one band contains it.
    pub band: Option<ScoreBand>,
}

impl ScoreSummary {
    pub fn is_complete(&self) -> bool {
        self.answered >= self.required
    }
}

pub fn summarize_scale(block: &ScaleQuestionsBlock, responses: &ResponseMap) -> ScoreSummary {
    let total = additive_total(&block.questions, responses);
    ScoreSummary {
        answered: answered_count(&block.questions, responses),
        required: block.questions.len(),
        total,
        band: banded(block.scoring.as_ref().map(|s| s.bands.as_slice()), total),
    }
}

pub fn summarize_yes_no(block: &YesNoCheckBlock, responses: &ResponseMap) -> ScoreSummary {
    let answered = block
        .statements
        .iter()
        .filter(|s| responses.get(&s.id).and_then(|v| v.as_bool()).is_some())
        .count();
    let total = (answered == block.statements.len()).then(|| yes_count(&block.statements, responses));
    ScoreSummary {
        answered,
        required: block.statements.len(),
        total,
        band: banded(block.scoring.as_ref().map(|s| s.bands.as_slice()), total),
    }
}

/// Achievable total range for a rating set.
pub fn scale_range(block: &ScaleQuestionsBlock) -> (i64, i64) {
    let n = i64::try_from(block.questions.len()).unwrap_or(i64::MAX);
    (
        n.saturating_mul(block.scale.min),
        n.saturating_mul(block.scale.max),
    )
}

/// Achievable total range for a yes/no set.
pub fn yes_no_range(block: &YesNoCheckBlock) -> (i64, i64) {
    (0, block.statements.len() as i64)
}

fn banded(bands: Option<&[ScoreBand]>, total: Option<i64>) -> Option<ScoreBand> {
    band_for(bands?, total?).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::block::{Scale, Scoring};

    fn questions(ids: &[&str]) -> Vec<Question> {
        ids.iter()
            .map(|id| Question {
                id: id.to_string(),
                text: format!("Statement {}", id),
            })
            .collect()
    }

    fn band(lo: i64, hi: i64, label: &str) -> ScoreBand {
        ScoreBand {
            range: (lo, hi),
            label: label.to_string(),
            description: None,
            color: None,
        }
    }

    fn low_medium_high() -> Vec<ScoreBand> {
        vec![band(3, 9, "Low"), band(10, 15, "Medium"), band(16, 21, "High")]
    }

    #[test]
    fn additive_total_needs_every_answer() {
        let qs = questions(&["q1", "q2", "q3"]);
        let mut responses: ResponseMap = [("q1", 5i64), ("q2", 6)].into_iter().collect();
        assert_eq!(additive_total(&qs, &responses), None);
        responses.set("q3", 7i64);
        assert_eq!(additive_total(&qs, &responses), Some(18));
    }

    #[test]
    fn additive_total_ignores_foreign_ids() {
        let qs = questions(&["q1"]);
        let responses: ResponseMap = [("q1", 4i64), ("other_set_q", 100)].into_iter().collect();
        assert_eq!(additive_total(&qs, &responses), Some(4));
    }

    #[test]
    fn non_numeric_rating_counts_as_unanswered() {
        let qs = questions(&["q1"]);
        let responses: ResponseMap = [("q1", "five")].into_iter().collect();
        assert_eq!(additive_total(&qs, &responses), None);
    }

    #[test]
    fn yes_count_counts_true_only() {
        let qs = questions(&["s1", "s2", "s3"]);
        let responses: ResponseMap = [("s1", true), ("s2", false), ("s3", true)].into_iter().collect();
        assert_eq!(yes_count(&qs, &responses), 2);
        assert_eq!(yes_count(&qs, &ResponseMap::new()), 0);
    }

    #[test]
    fn partition_gives_one_band_per_total() {
        let bands = low_medium_high();
        for total in 3..=21 {
            assert!(band_for(&bands, total).is_some(), "total {}", total);
        }
        assert_eq!(band_for(&bands, 9).map(|b| b.label.as_str()), Some("Low"));
        assert_eq!(band_for(&bands, 10).map(|b| b.label.as_str()), Some("Medium"));
        assert!(band_for(&bands, 2).is_none());
        assert!(band_for(&bands, 22).is_none());
    }

    #[test]
    fn authoring_gap_means_no_band() {
        let bands = vec![band(0, 3, "Low"), band(6, 9, "High")];
        assert!(band_for(&bands, 4).is_none());
        assert_eq!(band_gaps(&bands, 0, 9), vec![(4, 5)]);
        assert_eq!(band_gaps(&bands, 0, 12), vec![(4, 5), (10, 12)]);
        assert!(band_gaps(&low_medium_high(), 3, 21).is_empty());
        assert_eq!(band_gaps(&[], 0, 2), vec![(0, 2)]);
    }

    #[test]
    fn scale_summary_end_to_end() {
        let block = ScaleQuestionsBlock {
            id: "self_check".to_string(),
            title: None,
            description: None,
            questions: questions(&["q1", "q2", "q3"]),
            scale: Scale {
                min: 1,
                max: 7,
                min_label: "Never".to_string(),
                max_label: "Always".to_string(),
            },
            scoring: Some(Scoring {
                bands: low_medium_high(),
            }),
        };
        assert_eq!(scale_range(&block), (3, 21));

        let responses: ResponseMap = [("q1", 5i64), ("q2", 6), ("q3", 7)].into_iter().collect();
        let summary = summarize_scale(&block, &responses);
        assert!(summary.is_complete());
        assert_eq!(summary.total, Some(18));
        assert_eq!(summary.band.map(|b| b.label), Some("High".to_string()));

        let partial: ResponseMap = [("q1", 5i64)].into_iter().collect();
        let summary = summarize_scale(&block, &partial);
        assert_eq!(summary.answered, 1);
        assert_eq!(summary.total, None);
        assert_eq!(summary.band, None);
    }

    #[test]
    fn yes_no_summary_waits_for_all_statements() {
        let block = YesNoCheckBlock {
            id: "check".to_string(),
            title: None,
            statements: questions(&["s1", "s2"]),
            scoring: Some(Scoring {
                bands: vec![band(0, 1, "Some"), band(2, 2, "All")],
            }),
        };
        let partial: ResponseMap = [("s1", true)].into_iter().collect();
        assert_eq!(summarize_yes_no(&block, &partial).total, None);

        let full: ResponseMap = [("s1", true), ("s2", true)].into_iter().collect();
        let summary = summarize_yes_no(&block, &full);
        assert_eq!(summary.total, Some(2));
        assert_eq!(summary.band.map(|b| b.label), Some("All".to_string()));
        assert_eq!(yes_no_range(&block), (0, 2));
    }

    #[test]
    fn oversized_ratings_give_no_total() {
        let qs = questions(&["q1", "q2"]);
        let mut responses = ResponseMap::new();
        responses.set("q1", 9e18);
        responses.set("q2", 9e18);
        assert_eq!(additive_total(&qs, &responses), None);

        let block = ScaleQuestionsBlock {
            id: "huge".to_string(),
            title: None,
            description: None,
            questions: qs,
            scale: Scale {
                min: i64::MIN,
                max: i64::MAX,
                min_label: "Low".to_string(),
                max_label: "High".to_string(),
            },
            scoring: None,
        };
        assert_eq!(scale_range(&block), (i64::MIN, i64::MAX));
        assert_eq!(summarize_scale(&block, &responses).total, None);
    }
}
