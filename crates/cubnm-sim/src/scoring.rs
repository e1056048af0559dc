// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Goodness-of-fit scoring
//!
//! Terms are signed by name: `+` terms are maximized, `-` terms are negated
//! distances. `+gof` sums the selected terms as signed.
//!
//! | Term | Value |
//! |------|-------|
//! | `+fc_corr` | Pearson correlation of FC triangles |
//! | `-fc_diff` | negated absolute difference of FC triangle means |
//! | `-fcd_ks` | negated two-sample KS statistic of FCD triangles |
//! | `-fc_normec` | negated Euclidean FC distance over `sqrt(4 * n_pairs)` |
//! | `-fic_penalty` | negated firing-rate deviation penalty (FIC only) |

use crate::{Result, SimError};
use ndarray::{ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// FIC target firing rate (Hz)
pub const FIC_TARGET_RATE: f64 = 3.0;

/// Deviation from the target tolerated without penalty (Hz)
pub const FIC_TOLERANCE: f64 = 1.0;

/// Default scale of the FIC penalty
pub const DEFAULT_FIC_PENALTY_SCALE: f64 = 2.0;

/// A selectable goodness-of-fit term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GofTerm {
    FcCorr,
    FcDiff,
    FcdKs,
    FcNormec,
    FicPenalty,
}

impl GofTerm {
    pub const ALL: [GofTerm; 5] = [
        GofTerm::FcCorr,
        GofTerm::FcDiff,
        GofTerm::FcdKs,
        GofTerm::FcNormec,
        GofTerm::FicPenalty,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GofTerm::FcCorr => "+fc_corr",
            GofTerm::FcDiff => "-fc_diff",
            GofTerm::FcdKs => "-fcd_ks",
            GofTerm::FcNormec => "-fc_normec",
            GofTerm::FicPenalty => "-fic_penalty",
        }
    }

    /// Parse a list of term names
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<GofTerm>> {
        names.iter().map(|name| name.as_ref().parse()).collect()
    }
}

impl fmt::Display for GofTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GofTerm {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        GofTerm::ALL
            .into_iter()
            .find(|term| term.name() == s)
            .ok_or_else(|| SimError::UnknownGofTerm(s.to_string()))
    }
}

/// Pearson correlation coefficient; NaN when either input is constant
pub fn pearson(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> f64 {
    let n = x.len();
    if n == 0 || n != y.len() {
        return f64::NAN;
    }
    let mean_x = x.sum() / n as f64;
    let mean_y = y.sum() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&a, &b) in x.iter().zip(y.iter()) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return f64::NAN;
    }
    (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0)
}

/// Two-sample Kolmogorov-Smirnov statistic.
///
/// Maximum absolute difference of the empirical CDFs evaluated at every
/// pooled sample. NaN when either sample is empty.
pub fn ks_2samp(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> f64 {
    if x.is_empty() || y.is_empty() {
        return f64::NAN;
    }
    let mut a = x.to_vec();
    let mut b = y.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);
    let (na, nb) = (a.len() as f64, b.len() as f64);

    a.iter()
        .chain(b.iter())
        .map(|&value| {
            let cdf_a = a.partition_point(|&v| v <= value) as f64 / na;
            let cdf_b = b.partition_point(|&v| v <= value) as f64 / nb;
            (cdf_a - cdf_b).abs()
        })
        .fold(0.0, f64::max)
}

/// Euclidean distance normalized by its maximum `sqrt(4 * n_pairs)`
/// (every pair differing by 2)
pub fn fc_norm_euclidean(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> f64 {
    let distance = x
        .iter()
        .zip(y.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt();
    distance / (4.0 * x.len() as f64).sqrt()
}

/// FIC penalty of one simulation from its `(nodes,)` mean excitatory rates.
///
/// Regions within 1 Hz of the 3 Hz target contribute nothing; the others
/// contribute `1 - exp(-0.05 * (deviation - 1))`. The sum is scaled by
/// `scale / nodes` and negated.
pub fn fic_penalty(mean_rates: ArrayView1<'_, f64>, scale: f64) -> f64 {
    let nodes = mean_rates.len();
    let penalty: f64 = mean_rates
        .iter()
        .map(|rate| (rate - FIC_TARGET_RATE).abs())
        .filter(|&deviation| deviation > FIC_TOLERANCE)
        .map(|deviation| 1.0 - (-0.05 * (deviation - FIC_TOLERANCE)).exp())
        .sum();
    if penalty == 0.0 || nodes == 0 {
        return 0.0;
    }
    -penalty * scale / nodes as f64
}

/// Undefined scores (NaN) are written as `null` and read back as NaN
mod undefined_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Scores of one simulation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    #[serde(rename = "+fc_corr", with = "undefined_as_null")]
    pub fc_corr: f64,
    #[serde(rename = "-fc_diff", with = "undefined_as_null")]
    pub fc_diff: f64,
    #[serde(rename = "-fcd_ks", with = "undefined_as_null")]
    pub fcd_ks: f64,
    #[serde(rename = "-fc_normec", with = "undefined_as_null")]
    pub fc_normec: f64,
    #[serde(rename = "+gof", with = "undefined_as_null")]
    pub gof: f64,
    #[serde(rename = "-fic_penalty", default, skip_serializing_if = "Option::is_none")]
    pub fic_penalty: Option<f64>,
}

impl ScoreRow {
    pub fn term(&self, term: GofTerm) -> Option<f64> {
        match term {
            GofTerm::FcCorr => Some(self.fc_corr),
            GofTerm::FcDiff => Some(self.fc_diff),
            GofTerm::FcdKs => Some(self.fcd_ks),
            GofTerm::FcNormec => Some(self.fc_normec),
            GofTerm::FicPenalty => self.fic_penalty,
        }
    }
}

/// Scores of every simulation, one row each
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreTable {
    rows: Vec<ScoreRow>,
}

impl ScoreTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, sim: usize) -> Option<&ScoreRow> {
        self.rows.get(sim)
    }

    pub fn rows(&self) -> &[ScoreRow] {
        &self.rows
    }

    /// Aggregate `+gof` of every simulation
    pub fn gof(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.gof).collect()
    }

    /// One term across simulations; `None` when the term was not computed
    pub fn column(&self, term: GofTerm) -> Option<Vec<f64>> {
        self.rows.iter().map(|row| row.term(term)).collect()
    }

    pub fn has_fic_penalty(&self) -> bool {
        self.rows.first().is_some_and(|row| row.fic_penalty.is_some())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// FIC penalty inputs: `(N, nodes)` mean excitatory rates and the scale
#[derive(Debug, Clone, Copy)]
pub struct FicPenaltyInput<'a> {
    pub mean_rates: ArrayView2<'a, f64>,
    pub scale: f64,
}

/// Simulated and empirical summaries to compare
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    /// `(N, n_pairs)` simulated FC triangles
    pub sim_fc: ArrayView2<'a, f64>,
    /// `(N, n_window_pairs)` simulated FCD triangles
    pub sim_fcd: ArrayView2<'a, f64>,
    pub emp_fc: ArrayView1<'a, f64>,
    pub emp_fcd: ArrayView1<'a, f64>,
    pub fic: Option<FicPenaltyInput<'a>>,
}

/// Score every simulation; simulations are scored in parallel.
///
/// # Errors
///
/// [`SimError::EmpiricalLength`] when the empirical FC triangle does not
/// match the simulated one, and [`SimError::UnavailableGofTerm`] when
/// `-fic_penalty` is selected but no FIC input is given.
pub fn score_batch(inputs: &ScoreInputs<'_>, gof_terms: &[GofTerm], model: &str) -> Result<ScoreTable> {
    let n_pairs = inputs.sim_fc.ncols();
    if inputs.emp_fc.len() != n_pairs {
        return Err(SimError::EmpiricalLength {
            what: "FC triangle",
            expected: n_pairs,
            found: inputs.emp_fc.len(),
        });
    }
    if gof_terms.contains(&GofTerm::FicPenalty) && inputs.fic.is_none() {
        return Err(SimError::UnavailableGofTerm {
            term: GofTerm::FicPenalty.name().to_string(),
            model: model.to_string(),
        });
    }
    if let Some(fic) = &inputs.fic {
        if fic.mean_rates.nrows() != inputs.sim_fc.nrows() {
            return Err(SimError::OutputLayout {
                buffer: "r_E",
                expected: inputs.sim_fc.nrows(),
                found: fic.mean_rates.nrows(),
            });
        }
    }

    let emp_fc_mean = inputs.emp_fc.mean().unwrap_or(f64::NAN);
    let rows = (0..inputs.sim_fc.nrows())
        .into_par_iter()
        .map(|sim| {
            let fc = inputs.sim_fc.row(sim);
            let fcd = inputs.sim_fcd.row(sim);
            let mut row = ScoreRow {
                fc_corr: pearson(fc, inputs.emp_fc),
                fc_diff: -(fc.mean().unwrap_or(f64::NAN) - emp_fc_mean).abs(),
                fcd_ks: -ks_2samp(fcd, inputs.emp_fcd),
                fc_normec: -fc_norm_euclidean(fc, inputs.emp_fc),
                gof: 0.0,
                fic_penalty: inputs
                    .fic
                    .as_ref()
                    .map(|fic| fic_penalty(fic.mean_rates.index_axis(Axis(0), sim), fic.scale)),
            };
            row.gof = gof_terms.iter().filter_map(|&term| row.term(term)).sum();
            row
        })
        .collect();

    Ok(ScoreTable { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1, Array2};

    fn inputs<'a>(sim_fc: &'a Array2<f64>, sim_fcd: &'a Array2<f64>, emp_fc: &'a Array1<f64>, emp_fcd: &'a Array1<f64>) -> ScoreInputs<'a> {
        ScoreInputs {
            sim_fc: sim_fc.view(),
            sim_fcd: sim_fcd.view(),
            emp_fc: emp_fc.view(),
            emp_fcd: emp_fcd.view(),
            fic: None,
        }
    }

    #[test]
    fn test_parse_terms() {
        let terms = GofTerm::parse_list(&["+fc_corr", "-fcd_ks"]).unwrap();
        assert_eq!(terms, vec![GofTerm::FcCorr, GofTerm::FcdKs]);
        assert!(matches!("+gof".parse::<GofTerm>(), Err(SimError::UnknownGofTerm(_))));
    }

    #[test]
    fn test_pearson() {
        let x = array![1.0, 2.0, 3.0, 4.0];
        assert!((pearson(x.view(), x.view()) - 1.0).abs() < 1e-12);
        let y = array![4.0, 3.0, 2.0, 1.0];
        assert!((pearson(x.view(), y.view()) + 1.0).abs() < 1e-12);
        let flat = array![1.0, 1.0, 1.0, 1.0];
        assert!(pearson(x.view(), flat.view()).is_nan());
    }

    #[test]
    fn test_ks_statistic() {
        let x = array![1.0, 2.0, 3.0];
        assert_eq!(ks_2samp(x.view(), x.view()), 0.0);
        let y = array![10.0, 11.0];
        assert_eq!(ks_2samp(x.view(), y.view()), 1.0);
        let a = array![1.0, 2.0, 3.0, 4.0];
        let b = array![2.0, 3.0, 4.0, 5.0];
        assert!((ks_2samp(a.view(), b.view()) - 0.25).abs() < 1e-12);
        assert!(ks_2samp(Array1::<f64>::zeros(0).view(), a.view()).is_nan());
    }

    #[test]
    fn test_fc_normec_bounds() {
        let a = array![0.5, -0.2, 0.1];
        assert_eq!(fc_norm_euclidean(a.view(), a.view()), 0.0);
        let ones = array![1.0, 1.0, 1.0];
        let minus = array![-1.0, -1.0, -1.0];
        assert!((fc_norm_euclidean(ones.view(), minus.view()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_fic_penalty() {
        assert_eq!(fic_penalty(array![2.0, 3.0, 4.0].view(), 2.0), 0.0);
        let penalty = fic_penalty(array![3.0, 10.0].view(), 2.0);
        let expected = -(1.0 - (-0.05_f64 * 6.0).exp()) * 2.0 / 2.0;
        assert!((penalty - expected).abs() < 1e-12);
        assert!(fic_penalty(array![3.0, 4.5].view(), 2.0) < 0.0);
        assert_eq!(fic_penalty(array![3.0, 10.0].view(), 0.0), 0.0);
    }

    #[test]
    fn test_identical_fc_scores() {
        let fc = array![0.1, 0.4, 0.2, 0.8, 0.3, 0.5];
        let sim_fc = fc.clone().insert_axis(Axis(0));
        let fcd = array![0.2, 0.3, 0.4];
        let sim_fcd = fcd.clone().insert_axis(Axis(0));
        let terms = [GofTerm::FcCorr, GofTerm::FcDiff, GofTerm::FcdKs];
        let table = score_batch(&inputs(&sim_fc, &sim_fcd, &fc, &fcd), &terms, "rWWEx").unwrap();
        let row = table.row(0).unwrap();
        assert!((row.fc_corr - 1.0).abs() < 1e-12);
        assert_eq!(row.fc_diff, 0.0);
        assert_eq!(row.fc_normec, 0.0);
        assert_eq!(row.fcd_ks, 0.0);
        assert!((row.gof - 1.0).abs() < 1e-12);
        assert!(row.fic_penalty.is_none());
    }

    #[test]
    fn test_gof_is_signed_sum_of_selected_terms() {
        let sim_fc = array![[0.1, 0.5, 0.3], [0.9, 0.2, 0.4], [0.0, 0.1, 0.7]];
        let sim_fcd = array![[0.1, 0.2], [0.5, 0.6], [0.3, 0.9]];
        let emp_fc = array![0.2, 0.4, 0.6];
        let emp_fcd = array![0.15, 0.5];
        let subsets: Vec<Vec<GofTerm>> = vec![
            vec![],
            vec![GofTerm::FcNormec],
            vec![GofTerm::FcCorr, GofTerm::FcDiff, GofTerm::FcdKs],
            vec![GofTerm::FcDiff, GofTerm::FcNormec, GofTerm::FcCorr],
        ];
        for terms in subsets {
            let table = score_batch(&inputs(&sim_fc, &sim_fcd, &emp_fc, &emp_fcd), &terms, "rWWEx").unwrap();
            assert_eq!(table.len(), 3);
            for row in table.rows() {
                let expected: f64 = terms.iter().map(|&t| row.term(t).unwrap()).sum();
                assert!((row.gof - expected).abs() < 1e-12);
                assert!(row.fc_normec <= 0.0);
            }
        }
    }

    #[test]
    fn test_fic_penalty_column_not_in_default_gof() {
        let sim_fc = array![[0.1, 0.5, 0.3]];
        let sim_fcd = array![[0.1, 0.2]];
        let emp_fc = array![0.2, 0.4, 0.6];
        let emp_fcd = array![0.15, 0.5];
        let rates = array![[3.0, 9.0, 3.5]];
        let mut with_fic = inputs(&sim_fc, &sim_fcd, &emp_fc, &emp_fcd);
        with_fic.fic = Some(FicPenaltyInput {
            mean_rates: rates.view(),
            scale: DEFAULT_FIC_PENALTY_SCALE,
        });

        let defaults = [GofTerm::FcCorr, GofTerm::FcDiff, GofTerm::FcdKs];
        let table = score_batch(&with_fic, &defaults, "rWW").unwrap();
        let row = table.row(0).unwrap();
        let penalty = row.fic_penalty.unwrap();
        assert!(penalty < 0.0);
        assert!((row.gof - (row.fc_corr + row.fc_diff + row.fcd_ks)).abs() < 1e-12);

        let mut selected = defaults.to_vec();
        selected.push(GofTerm::FicPenalty);
        let table = score_batch(&with_fic, &selected, "rWW").unwrap();
        assert!((table.row(0).unwrap().gof - (row.gof + penalty)).abs() < 1e-12);
    }

    #[test]
    fn test_unavailable_and_length_errors() {
        let sim_fc = array![[0.1, 0.5, 0.3]];
        let sim_fcd = array![[0.1, 0.2]];
        let emp_fcd = array![0.15, 0.5];
        let short = array![0.2, 0.4];
        let err = score_batch(&inputs(&sim_fc, &sim_fcd, &short, &emp_fcd), &[], "rWW").unwrap_err();
        assert!(matches!(err, SimError::EmpiricalLength { expected: 3, found: 2, .. }));

        let emp_fc = array![0.2, 0.4, 0.6];
        let err = score_batch(&inputs(&sim_fc, &sim_fcd, &emp_fc, &emp_fcd), &[GofTerm::FicPenalty], "rWWEx")
            .unwrap_err();
        assert!(matches!(err, SimError::UnavailableGofTerm { .. }));
    }

    #[test]
    fn test_json_uses_signed_column_names() {
        let sim_fc = array![[0.1, 0.5, 0.3]];
        let sim_fcd = array![[0.1, 0.2]];
        let emp_fc = array![0.2, 0.4, 0.6];
        let emp_fcd = array![0.15, 0.5];
        let table = score_batch(&inputs(&sim_fc, &sim_fcd, &emp_fc, &emp_fcd), &[GofTerm::FcCorr], "rWWEx").unwrap();
        let json = table.to_json().unwrap();
        assert!(json.contains("\"+fc_corr\""));
        assert!(json.contains("\"+gof\""));
        assert!(!json.contains("fic_penalty"));
        let parsed: ScoreTable = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!((parsed.gof()[0] - table.gof()[0]).abs() < 1e-12);
    }

    #[test]
    fn test_undefined_correlation_survives_json() {
        let sim_fc = array![[0.5, 0.5, 0.5]];
        let sim_fcd = array![[0.1, 0.2]];
        let emp_fc = array![0.2, 0.4, 0.6];
        let emp_fcd = array![0.15, 0.5];
        let table = score_batch(&inputs(&sim_fc, &sim_fcd, &emp_fc, &emp_fcd), &[GofTerm::FcCorr], "rWWEx").unwrap();
        assert!(table.row(0).unwrap().fc_corr.is_nan());

        let json = table.to_json().unwrap();
        assert!(json.contains("\"+fc_corr\": null"));
        let parsed = ScoreTable::from_json(&json).unwrap();
        let row = parsed.row(0).unwrap();
        assert!(row.fc_corr.is_nan());
        assert!(row.gof.is_nan());
        assert!((row.fc_diff - table.row(0).unwrap().fc_diff).abs() < 1e-12);
    }
}
