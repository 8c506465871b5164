//! Reduction of raw samples into the final measurement result
//!
//! Rates reduce with a single sorted-index lookup at `floor(n × 0.95)`, not
//! an interpolated percentile. Stored results depend on this exact value.

use serde::{Deserialize, Serialize};

use crate::sample::{Sample, SourceKind};

/// Above this many samples the percentile lookup is used instead of the max
pub const PERCENTILE_MIN_SAMPLES: usize = 10;

/// Client and server RTTs observed this close together describe one probe
pub const SIMULTANEOUS_WINDOW_MS: i64 = 50;

/// Floor for a synthesized upload rate
pub const MIN_ESTIMATED_UPLOAD_MBPS: f64 = 0.1;

/// Coarse quality bucket derived from the quality score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityCategory {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityCategory {
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => Self::Excellent,
            60..=79 => Self::Good,
            40..=59 => Self::Fair,
            _ => Self::Poor,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        }
    }
}

/// Final, possibly partly estimated, summary of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub quality_score: u8,
    pub category: QualityCategory,
    pub download_sample_count: usize,
    pub upload_sample_count: usize,
    pub latency_sample_count: usize,
    pub is_upload_estimated: bool,
    pub is_latency_estimated: bool,
}

/// Samples selected for aggregation, one slice per phase
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateInputs<'a> {
    pub download: &'a [Sample],
    pub upload: &'a [Sample],
    pub latency: &'a [Sample],
}

/// Stateless reducer; every method is a pure function of its arguments
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator;

impl Aggregator {
    /// Reduce rate observations to one number.
    ///
    /// More than [`PERCENTILE_MIN_SAMPLES`] values: the value at sorted index
    /// `floor(n × 0.95)`. Otherwise the maximum. Empty input reduces to 0.
    pub fn reduce(values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        if sorted.len() > PERCENTILE_MIN_SAMPLES {
            // Integer arithmetic keeps floor(n × 0.95) exact
            let idx = sorted.len() * 95 / 100;
            sorted[idx]
        } else {
            sorted[sorted.len() - 1]
        }
    }

    /// Collapse client/server pairs describing the same probe.
    ///
    /// Samples of different sources observed within
    /// [`SIMULTANEOUS_WINDOW_MS`] of each other count once, keeping the lower
    /// RTT. Everything else passes through in observation order.
    pub fn select_rtts(samples: &[Sample]) -> Vec<f64> {
        let mut ordered: Vec<&Sample> = samples.iter().collect();
        ordered.sort_by_key(|s| s.observed_at);

        struct Slot {
            source: SourceKind,
            at: chrono::DateTime<chrono::Utc>,
            rtt: f64,
            paired: bool,
        }

        let mut slots: Vec<Slot> = Vec::with_capacity(ordered.len());
        for sample in ordered {
            if let Some(last) = slots.last_mut()
                && !last.paired
                && last.source != sample.source
                && (sample.observed_at - last.at).num_milliseconds().abs()
                    <= SIMULTANEOUS_WINDOW_MS
            {
                last.rtt = last.rtt.min(sample.value());
                last.paired = true;
                continue;
            }
            slots.push(Slot {
                source: sample.source,
                at: sample.observed_at,
                rtt: sample.value(),
                paired: false,
            });
        }

        slots.into_iter().map(|slot| slot.rtt).collect()
    }

    /// Population standard deviation; 0 with fewer than two values
    pub fn jitter(rtts: &[f64]) -> f64 {
        if rtts.len() < 2 {
            return 0.0;
        }
        let mean = rtts.iter().sum::<f64>() / rtts.len() as f64;
        let variance = rtts.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / rtts.len() as f64;
        variance.sqrt()
    }

    /// Upload rate synthesized when no upload sample exists
    pub fn estimate_upload(download_mbps: f64) -> f64 {
        (download_mbps / 10.0).max(MIN_ESTIMATED_UPLOAD_MBPS)
    }

    /// Latency guessed from the download rate band
    pub fn estimate_latency(download_mbps: f64) -> f64 {
        if download_mbps > 100.0 {
            15.0
        } else if download_mbps > 50.0 {
            30.0
        } else if download_mbps > 10.0 {
            50.0
        } else {
            100.0
        }
    }

    /// Weighted 0-100 composite of the three primary metrics
    pub fn score(download_mbps: f64, upload_mbps: f64, latency_ms: f64) -> (u8, QualityCategory) {
        let download = (download_mbps.max(0.0) / 100.0 * 40.0).min(40.0);
        let upload = (upload_mbps.max(0.0) / 50.0 * 30.0).min(30.0);
        let latency = (30.0 - latency_ms / 10.0).max(0.0);

        let score = (download + upload + latency).round().clamp(0.0, 100.0) as u8;
        (score, QualityCategory::from_score(score))
    }

    /// Build the composite result, estimating whatever was not measured
    pub fn finalize(inputs: AggregateInputs<'_>) -> AggregateResult {
        let download_values: Vec<f64> = inputs.download.iter().map(Sample::value).collect();
        let upload_values: Vec<f64> = inputs.upload.iter().map(Sample::value).collect();

        let download_mbps = Self::reduce(&download_values);

        let is_upload_estimated = upload_values.is_empty();
        let upload_mbps = if is_upload_estimated {
            Self::estimate_upload(download_mbps)
        } else {
            Self::reduce(&upload_values)
        };

        let rtts = Self::select_rtts(inputs.latency);
        let (latency_ms, jitter_ms, is_latency_estimated) =
            match rtts.iter().copied().min_by(f64::total_cmp) {
                Some(min) => (min, Self::jitter(&rtts), false),
                None => (Self::estimate_latency(download_mbps), 0.0, true),
            };

        let (quality_score, category) = Self::score(download_mbps, upload_mbps, latency_ms);

        AggregateResult {
            download_mbps,
            upload_mbps,
            latency_ms,
            jitter_ms,
            quality_score,
            category,
            download_sample_count: download_values.len(),
            upload_sample_count: upload_values.len(),
            latency_sample_count: rtts.len(),
            is_upload_estimated,
            is_latency_estimated,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::sample::Phase;

    fn rates(phase: Phase, values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .map(|v| Sample::rate(phase, SourceKind::Client, *v, "test"))
            .collect()
    }

    // ==================== reduce ====================

    #[test]
    fn reduce_ten_or_fewer_returns_max() {
        assert_eq!(Aggregator::reduce(&[3.0]), 3.0);
        assert_eq!(Aggregator::reduce(&[5.0, 1.0, 9.0, 2.0]), 9.0);
        let ten: Vec<f64> = (1..=10).map(|v| v as f64).rev().collect();
        assert_eq!(Aggregator::reduce(&ten), 10.0);
    }

    #[test]
    fn reduce_eleven_samples_uses_index_ten() {
        let samples = [5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 35.0, 40.0, 45.0, 50.0, 100.0];
        assert_eq!(Aggregator::reduce(&samples), 100.0);
    }

    #[test]
    fn reduce_sorts_before_indexing() {
        let samples = [100.0, 50.0, 45.0, 40.0, 35.0, 30.0, 25.0, 20.0, 15.0, 10.0, 5.0];
        assert_eq!(Aggregator::reduce(&samples), 100.0);
    }

    #[test]
    fn reduce_twenty_samples_skips_the_top_value() {
        // floor(20 × 0.95) = 19, the last index
        let samples: Vec<f64> = (1..=20).map(|v| v as f64).collect();
        assert_eq!(Aggregator::reduce(&samples), 20.0);

        // floor(40 × 0.95) = 38, second to last
        let samples: Vec<f64> = (1..=40).map(|v| v as f64).collect();
        assert_eq!(Aggregator::reduce(&samples), 39.0);
    }

    #[test]
    fn reduce_empty_is_zero() {
        assert_eq!(Aggregator::reduce(&[]), 0.0);
    }

    // ==================== estimates ====================

    #[test]
    fn missing_upload_is_a_tenth_of_download() {
        let download = rates(Phase::Download, &[40.0]);
        let result = Aggregator::finalize(AggregateInputs {
            download: &download,
            ..Default::default()
        });
        assert_eq!(result.upload_mbps, 4.0);
        assert!(result.is_upload_estimated);
        assert_eq!(result.upload_sample_count, 0);
    }

    #[test]
    fn missing_upload_has_a_floor() {
        assert_eq!(Aggregator::estimate_upload(0.5), MIN_ESTIMATED_UPLOAD_MBPS);
    }

    #[test]
    fn missing_latency_uses_download_bands() {
        for (download, expected) in [(120.0, 15.0), (75.0, 30.0), (20.0, 50.0), (8.0, 100.0)] {
            let samples = rates(Phase::Download, &[download]);
            let result = Aggregator::finalize(AggregateInputs {
                download: &samples,
                ..Default::default()
            });
            assert_eq!(result.latency_ms, expected, "download {download}");
            assert!(result.is_latency_estimated);
            assert_eq!(result.jitter_ms, 0.0);
        }
    }

    #[test]
    fn latency_band_boundaries_are_exclusive() {
        assert_eq!(Aggregator::estimate_latency(100.0), 30.0);
        assert_eq!(Aggregator::estimate_latency(50.0), 50.0);
        assert_eq!(Aggregator::estimate_latency(10.0), 100.0);
    }

    // ==================== latency selection ====================

    #[test]
    fn simultaneous_client_and_server_rtts_keep_the_lower() {
        let at = Utc::now();
        let samples = vec![
            Sample::rtt(SourceKind::Client, 30.0, "http").observed_at(at),
            Sample::rtt(SourceKind::Server, 22.0, "http").observed_at(at + Duration::milliseconds(5)),
        ];
        assert_eq!(Aggregator::select_rtts(&samples), vec![22.0]);
    }

    #[test]
    fn distant_rtts_are_separate_observations() {
        let at = Utc::now();
        let samples = vec![
            Sample::rtt(SourceKind::Client, 30.0, "http").observed_at(at),
            Sample::rtt(SourceKind::Server, 22.0, "http").observed_at(at + Duration::seconds(1)),
        ];
        assert_eq!(Aggregator::select_rtts(&samples), vec![30.0, 22.0]);
    }

    #[test]
    fn same_source_rtts_are_never_paired() {
        let at = Utc::now();
        let samples = vec![
            Sample::rtt(SourceKind::Client, 30.0, "tcp").observed_at(at),
            Sample::rtt(SourceKind::Client, 28.0, "tcp").observed_at(at),
        ];
        assert_eq!(Aggregator::select_rtts(&samples).len(), 2);
    }

    #[test]
    fn latency_is_minimum_selected_rtt() {
        let at = Utc::now();
        let latency = vec![
            Sample::rtt(SourceKind::Client, 40.0, "http").observed_at(at),
            Sample::rtt(SourceKind::Client, 20.0, "http").observed_at(at + Duration::seconds(1)),
            Sample::rtt(SourceKind::Client, 30.0, "http").observed_at(at + Duration::seconds(2)),
        ];
        let download = rates(Phase::Download, &[50.0]);
        let result = Aggregator::finalize(AggregateInputs {
            download: &download,
            latency: &latency,
            ..Default::default()
        });
        assert_eq!(result.latency_ms, 20.0);
        assert!(!result.is_latency_estimated);
        assert_eq!(result.latency_sample_count, 3);
        // population std of 40, 20, 30
        assert!((result.jitter_ms - 8.1649).abs() < 0.001);
    }

    #[test]
    fn jitter_of_single_value_is_zero() {
        assert_eq!(Aggregator::jitter(&[12.0]), 0.0);
        assert_eq!(Aggregator::jitter(&[]), 0.0);
    }

    // ==================== score ====================

    #[test]
    fn perfect_connection_scores_one_hundred() {
        assert_eq!(
            Aggregator::score(100.0, 50.0, 0.0),
            (100, QualityCategory::Excellent)
        );
    }

    #[test]
    fn score_components_are_capped() {
        assert_eq!(Aggregator::score(1000.0, 500.0, 0.0).0, 100);
        // latency contribution never goes negative
        assert_eq!(Aggregator::score(0.0, 0.0, 1000.0).0, 0);
    }

    #[test]
    fn score_rounds_to_integer() {
        // 10 + 6 + 25 = 41
        assert_eq!(Aggregator::score(25.0, 10.0, 50.0), (41, QualityCategory::Fair));
        // 20 + 9 + 27.5 = 56.5 → 57
        assert_eq!(Aggregator::score(50.0, 15.0, 25.0), (57, QualityCategory::Fair));
    }

    #[test]
    fn category_thresholds() {
        assert_eq!(QualityCategory::from_score(80), QualityCategory::Excellent);
        assert_eq!(QualityCategory::from_score(79), QualityCategory::Good);
        assert_eq!(QualityCategory::from_score(60), QualityCategory::Good);
        assert_eq!(QualityCategory::from_score(59), QualityCategory::Fair);
        assert_eq!(QualityCategory::from_score(40), QualityCategory::Fair);
        assert_eq!(QualityCategory::from_score(39), QualityCategory::Poor);
        assert_eq!(QualityCategory::from_score(0), QualityCategory::Poor);
    }

    #[test]
    fn finalize_does_not_touch_inputs() {
        let download = rates(Phase::Download, &[30.0, 10.0, 20.0]);
        let before = download.clone();
        let _ = Aggregator::finalize(AggregateInputs {
            download: &download,
            ..Default::default()
        });
        assert_eq!(download, before);
    }

    #[test]
    fn result_serializes_camel_case() {
        let download = rates(Phase::Download, &[40.0]);
        let result = Aggregator::finalize(AggregateInputs {
            download: &download,
            ..Default::default()
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["downloadMbps"], 40.0);
        assert_eq!(json["isUploadEstimated"], true);
        assert_eq!(json["category"], result.category.label());
    }
}
