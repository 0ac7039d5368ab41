//! Rule-scoring classifier.
//!
//! Per task: any exclusion match vetoes it (score 0). Otherwise the score
//! accumulates `PRIMARY_WEIGHT` per primary keyword found, `SECONDARY_WEIGHT`
//! per secondary keyword, and `PATTERN_WEIGHT` per regex pattern, then is
//! scaled by `priority / 10`. The highest positive score wins; ties go to the
//! task registered first.

use async_trait::async_trait;
use regex::Regex;

use super::classifier::{Classification, IntentClassifier, TaskConfidence};
use super::text::normalize;
use crate::tasks::TaskKind;

const PRIMARY_WEIGHT: f32 = 10.0;
const SECONDARY_WEIGHT: f32 = 5.0;
const PATTERN_WEIGHT: f32 = 15.0;

/// Score at which diagnostic confidence saturates to 1.0.
const CONFIDENCE_SCALE: f32 = 20.0;

struct CompiledRules {
    kind: TaskKind,
    patterns: Vec<(&'static str, Regex)>,
    exclusions: Vec<Regex>,
}

/// Keyword and pattern scorer over the task catalogue.
pub struct RuleClassifier {
    rules: Vec<CompiledRules>,
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleClassifier {
    /// Compile every task's patterns once. A pattern that fails to compile
    /// is skipped with a warning.
    pub fn new() -> Self {
        let compile = |kind: TaskKind, p: &'static str| match Regex::new(&format!("(?i){p}")) {
            Ok(re) => Some((p, re)),
            Err(e) => {
                tracing::warn!(task = %kind, pattern = p, error = %e, "skipping invalid pattern");
                None
            }
        };
        let rules = TaskKind::ALL
            .into_iter()
            .map(|kind| {
                let d = kind.descriptor();
                CompiledRules {
                    kind,
                    patterns: d.patterns.iter().filter_map(|p| compile(kind, p)).collect(),
                    exclusions: d
                        .exclusions
                        .iter()
                        .filter_map(|p| compile(kind, p))
                        .map(|(_, re)| re)
                        .collect(),
                }
            })
            .collect();
        Self { rules }
    }

    /// Per-task scores in registration order.
    pub fn score_all(&self, utterance: &str) -> Vec<TaskConfidence> {
        let text = normalize(utterance);
        self.rules.iter().map(|r| score_task(r, &text)).collect()
    }

    /// Best task with a positive score; earliest registration wins ties.
    pub fn best(&self, utterance: &str) -> Option<Classification> {
        let mut best: Option<&TaskConfidence> = None;
        let scores = self.score_all(utterance);
        for candidate in &scores {
            if candidate.score <= 0.0 {
                continue;
            }
            if best.map_or(true, |b| candidate.score > b.score) {
                best = Some(candidate);
            }
        }
        let result = best.map(|b| Classification {
            task: b.task,
            confidence: b.confidence,
        });
        tracing::debug!(
            utterance,
            task = ?result.as_ref().map(|c| c.task),
            "rule classification"
        );
        result
    }
}

fn score_task(rules: &CompiledRules, text: &str) -> TaskConfidence {
    let d = rules.kind.descriptor();
    if rules.exclusions.iter().any(|re| re.is_match(text)) {
        return TaskConfidence {
            task: rules.kind,
            score: 0.0,
            confidence: 0.0,
            excluded: true,
            details: vec!["excluded by pattern".to_string()],
        };
    }

    let mut score = 0.0;
    let mut details = Vec::new();
    for kw in d.primary_keywords.iter().filter(|kw| text.contains(*kw)) {
        score += PRIMARY_WEIGHT;
        details.push(format!("primary keyword: {kw}"));
    }
    for kw in d.secondary_keywords.iter().filter(|kw| text.contains(*kw)) {
        score += SECONDARY_WEIGHT;
        details.push(format!("secondary keyword: {kw}"));
    }
    for (source, re) in &rules.patterns {
        if re.is_match(text) {
            score += PATTERN_WEIGHT;
            details.push(format!("pattern: {source}"));
        }
    }
    score *= d.priority as f32 / 10.0;

    TaskConfidence {
        task: rules.kind,
        score,
        confidence: (score / CONFIDENCE_SCALE).min(1.0),
        excluded: false,
        details,
    }
}

#[async_trait]
impl IntentClassifier for RuleClassifier {
    async fn classify(&self, utterance: &str) -> Option<Classification> {
        self.best(utterance)
    }

    async fn task_confidence(&self, utterance: &str) -> Vec<TaskConfidence> {
        self.score_all(utterance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn best(text: &str) -> Option<TaskKind> {
        RuleClassifier::new().best(text).map(|c| c.task)
    }

    #[test]
    fn technical_report_phrasings() {
        assert_eq!(best("Xem DM Technical cho S24M12345"), Some(TaskKind::DmTechnical));
        assert_eq!(best("Báo cáo DM Technical"), Some(TaskKind::DmTechnical));
        assert_eq!(best("báo cáo định mức kỹ thuật"), Some(TaskKind::DmTechnical));
    }

    #[test]
    fn exclusion_vetoes_task() {
        // "so sánh" vetoes both DM reports, leaving compare.
        assert_eq!(best("so sánh dm technical và actual S24M12345"), Some(TaskKind::Compare));
        let scores = RuleClassifier::new().score_all("compare dm technical");
        let technical = &scores[TaskKind::DmTechnical.index()];
        assert!(technical.excluded);
        assert_eq!(technical.score, 0.0);
    }

    #[test]
    fn upload_tasks_are_vetoed_by_report_wording() {
        assert_eq!(best("cập nhật trims list"), Some(TaskKind::InsertTrims));
        let scores = RuleClassifier::new().score_all("báo cáo trims list");
        assert!(scores[TaskKind::InsertTrims.index()].excluded);
    }

    #[test]
    fn no_hits_yields_none() {
        assert_eq!(best("chào buổi sáng"), None);
        assert_eq!(best(""), None);
        let scores = RuleClassifier::new().score_all("chào buổi sáng");
        assert!(scores.iter().all(|s| s.score == 0.0));
    }

    #[test]
    fn deterministic_for_identical_input() {
        let classifier = RuleClassifier::new();
        let a = classifier.best("lấy submat demand cho S24M12345");
        let b = classifier.best("lấy submat demand cho S24M12345");
        assert_eq!(a, b);
        assert_eq!(a.map(|c| c.task), Some(TaskKind::SubmatDemand));
    }

    #[test]
    fn ties_go_to_registration_order() {
        // "cutting" (cutting_forecast) and "wip" (process_wip) both score one
        // primary keyword at priority 6; process_wip is registered first.
        let scores = RuleClassifier::new().score_all("cutting wip");
        assert_eq!(
            scores[TaskKind::ProcessWip.index()].score,
            scores[TaskKind::CuttingForecast.index()].score
        );
        assert_eq!(best("cutting wip"), Some(TaskKind::ProcessWip));
    }

    #[test]
    fn confidence_saturates() {
        let scores = RuleClassifier::new().score_all("báo cáo dm technical");
        let technical = &scores[TaskKind::DmTechnical.index()];
        assert!(technical.score > CONFIDENCE_SCALE);
        assert_eq!(technical.confidence, 1.0);
        assert!(!technical.details.is_empty());
    }

    #[test]
    fn weights_follow_priority() {
        // One primary keyword ("quantity") at priority 5.
        let scores = RuleClassifier::new().score_all("quantity");
        assert_eq!(scores[TaskKind::GoQuantity.index()].score, 5.0);
    }
}
