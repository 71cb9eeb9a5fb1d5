//! Pure scoring functions, per §4.7's formulas. No I/O; takes/returns
//! only value types so the scoring law is directly property-testable.

use chrono::{DateTime, Utc};
use sentinel_core::config::RankerConfig;

/// Sum of each category's configured importance weight, falling back to
/// `Other` for unrecognised categories.
pub fn importance_score(config: &RankerConfig, categories: &[String]) -> f64 {
    categories.iter().map(|c| config.weight_for(c)).sum()
}

/// Exponential decay of age against the configured half-life:
/// `max_score * 0.5^(Δt_seconds / half_life_seconds)`.
///
/// `timestamp` is parsed as RFC3339; an unparseable timestamp falls back
/// to "now" (Δt = 0, so `score == max_score`), matching the original
/// ranker's behaviour on a bad timestamp string.
pub fn recency_score(config: &RankerConfig, timestamp: &str, now: DateTime<Utc>) -> f64 {
    let event_time = DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);

    let delta_seconds = (now - event_time).num_milliseconds() as f64 / 1000.0;
    let half_life_seconds = config.recency_decay.half_life_hours * 3600.0;
    let decay_factor = 0.5_f64.powf(delta_seconds / half_life_seconds);
    config.recency_decay.max_score * decay_factor
}

/// `w_i * importance + w_r * recency`.
pub fn final_score(config: &RankerConfig, importance: f64, recency: f64) -> f64 {
    config.ranking_parameters.importance_weight * importance
        + config.ranking_parameters.recency_weight * recency
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RankerConfig {
        RankerConfig::from_toml(
            r#"
            [ranking_parameters]
            importance_weight = 0.6
            recency_weight = 0.4

            [category_importance_scores]
            outage = 0.8
            cybersecurity = 0.9
            Other = 0.1

            [recency_decay]
            half_life_hours = 24.0
            max_score = 1.0
            "#,
        )
        .unwrap()
    }

    #[test]
    fn importance_sums_known_category_weights() {
        let config = config();
        let score = importance_score(&config, &["outage".to_string(), "cybersecurity".to_string()]);
        assert!((score - 1.7).abs() < 1e-9);
    }

    #[test]
    fn unknown_category_falls_back_to_other() {
        let config = config();
        let score = importance_score(&config, &["sports".to_string()]);
        assert!((score - 0.1).abs() < 1e-9);
    }

    #[test]
    fn recency_at_zero_delta_equals_max_score() {
        let config = config();
        let now = Utc::now();
        let score = recency_score(&config, &now.to_rfc3339(), now);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn recency_at_one_half_life_halves_the_score() {
        let config = config();
        let now = Utc::now();
        let event_time = now - chrono::Duration::hours(24);
        let score = recency_score(&config, &event_time.to_rfc3339(), now);
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn unparseable_timestamp_falls_back_to_now() {
        let config = config();
        let now = Utc::now();
        let score = recency_score(&config, "not-a-timestamp", now);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn final_score_is_the_weighted_sum() {
        let config = config();
        let score = final_score(&config, 1.7, 1.0);
        assert!((score - (0.6 * 1.7 + 0.4 * 1.0)).abs() < 1e-9);
    }
}
