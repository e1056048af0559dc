// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Config cache and reinit decision
//!
//! Backend-persistent state (buffers, uploaded connectome, noise) is only
//! re-established when the batch size or a reinit-relevant field changed
//! since the last successful run, or when the caller asks for it.
//! Output-shaping fields (extended output toggles, output directory,
//! goodness-of-fit terms, verbosity) are not part of the snapshot.

use crate::model::ModelVariant;
use cubnm_config::{BatchConfig, BwParams};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Reinit-relevant configuration of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReinitSnapshot {
    pub duration: f64,
    pub tr: f64,
    pub sc_path: PathBuf,
    pub sc_dist_path: Option<PathBuf>,
    pub delay_enabled: bool,
    pub window_size: u32,
    pub window_step: u32,
    pub rand_seed: u64,
    pub exc_interhemispheric: bool,
    pub force_cpu: bool,
    pub bw_params: BwParams,
    pub bold_remove_s: f64,
    pub fcd_drop_edges: bool,
    pub noise_segment_length: Option<f64>,
    pub do_fic: Option<bool>,
    pub max_fic_trials: Option<u32>,
}

impl ReinitSnapshot {
    pub fn capture(config: &BatchConfig, variant: &ModelVariant, delay_enabled: bool) -> Self {
        let fic = variant.fic();
        Self {
            duration: config.duration,
            tr: config.tr,
            sc_path: config.sc_path.clone(),
            sc_dist_path: config.sc_dist_path.clone(),
            delay_enabled,
            window_size: config.window_size,
            window_step: config.window_step,
            rand_seed: config.rand_seed,
            exc_interhemispheric: config.exc_interhemispheric,
            force_cpu: config.force_cpu,
            bw_params: config.bw_params,
            bold_remove_s: config.bold_remove_s,
            fcd_drop_edges: config.fcd_drop_edges,
            noise_segment_length: config.noise_segment_length,
            do_fic: fic.map(|f| f.do_fic),
            max_fic_trials: fic.map(|f| f.max_fic_trials),
        }
    }

    /// Names of the fields that differ from `other`
    pub fn changed_fields(&self, other: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        let mut check = |name: &'static str, differs: bool| {
            if differs {
                changed.push(name);
            }
        };
        check("duration", self.duration != other.duration);
        check("tr", self.tr != other.tr);
        check("sc_path", self.sc_path != other.sc_path);
        check("sc_dist_path", self.sc_dist_path != other.sc_dist_path);
        check("delay_enabled", self.delay_enabled != other.delay_enabled);
        check("window_size", self.window_size != other.window_size);
        check("window_step", self.window_step != other.window_step);
        check("rand_seed", self.rand_seed != other.rand_seed);
        check("exc_interhemispheric", self.exc_interhemispheric != other.exc_interhemispheric);
        check("force_cpu", self.force_cpu != other.force_cpu);
        check("bw_params", self.bw_params != other.bw_params);
        check("bold_remove_s", self.bold_remove_s != other.bold_remove_s);
        check("fcd_drop_edges", self.fcd_drop_edges != other.fcd_drop_edges);
        check("noise_segment_length", self.noise_segment_length != other.noise_segment_length);
        check("do_fic", self.do_fic != other.do_fic);
        check("max_fic_trials", self.max_fic_trials != other.max_fic_trials);
        changed
    }
}

/// Why the backend must reinitialize
#[derive(Debug, Clone, PartialEq)]
pub enum ReinitReason {
    Requested,
    FirstRun,
    BatchSize { previous: usize, current: usize },
    Config(Vec<&'static str>),
}

impl fmt::Display for ReinitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReinitReason::Requested => write!(f, "reinit requested"),
            ReinitReason::FirstRun => write!(f, "first run"),
            ReinitReason::BatchSize { previous, current } => {
                write!(f, "batch size changed from {previous} to {current}")
            }
            ReinitReason::Config(fields) => write!(f, "configuration changed: {}", fields.join(", ")),
        }
    }
}

/// Outcome of the reinit check
#[derive(Debug, Clone, PartialEq)]
pub enum ReinitDecision {
    Clean,
    Dirty(ReinitReason),
}

impl ReinitDecision {
    pub fn is_dirty(&self) -> bool {
        matches!(self, ReinitDecision::Dirty(_))
    }
}

/// Configuration and batch size of the last successful run
#[derive(Debug, Clone, Default)]
pub struct ConfigCache {
    last: Option<(ReinitSnapshot, usize)>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_n_sims(&self) -> Option<usize> {
        self.last.as_ref().map(|(_, n)| *n)
    }

    pub fn last_snapshot(&self) -> Option<&ReinitSnapshot> {
        self.last.as_ref().map(|(snapshot, _)| snapshot)
    }

    pub fn decide(&self, force_reinit: bool, current: &ReinitSnapshot, n_sims: usize) -> ReinitDecision {
        if force_reinit {
            return ReinitDecision::Dirty(ReinitReason::Requested);
        }
        let Some((last, last_n)) = &self.last else {
            return ReinitDecision::Dirty(ReinitReason::FirstRun);
        };
        if *last_n != n_sims {
            return ReinitDecision::Dirty(ReinitReason::BatchSize {
                previous: *last_n,
                current: n_sims,
            });
        }
        let changed = current.changed_fields(last);
        if changed.is_empty() {
            ReinitDecision::Clean
        } else {
            ReinitDecision::Dirty(ReinitReason::Config(changed))
        }
    }

    /// Record a successful run
    pub fn commit(&mut self, snapshot: ReinitSnapshot, n_sims: usize) {
        self.last = Some((snapshot, n_sims));
    }

    pub fn invalidate(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FicOptions;
    use cubnm_config::BwPreset;

    fn variant() -> ModelVariant {
        ModelVariant::Fic(FicOptions {
            do_fic: true,
            max_fic_trials: 5,
            fic_penalty: true,
        })
    }

    fn committed(config: &BatchConfig, n: usize) -> ConfigCache {
        let mut cache = ConfigCache::new();
        cache.commit(ReinitSnapshot::capture(config, &variant(), false), n);
        cache
    }

    #[test]
    fn test_first_run_is_dirty() {
        let cache = ConfigCache::new();
        let snap = ReinitSnapshot::capture(&BatchConfig::default(), &variant(), false);
        assert_eq!(cache.decide(false, &snap, 2), ReinitDecision::Dirty(ReinitReason::FirstRun));
    }

    #[test]
    fn test_same_config_and_size_is_clean() {
        let config = BatchConfig::default();
        let cache = committed(&config, 4);
        let snap = ReinitSnapshot::capture(&config, &variant(), false);
        assert_eq!(cache.decide(false, &snap, 4), ReinitDecision::Clean);
        assert!(cache.decide(true, &snap, 4).is_dirty());
    }

    #[test]
    fn test_batch_size_change_is_dirty() {
        let config = BatchConfig::default();
        let cache = committed(&config, 4);
        let snap = ReinitSnapshot::capture(&config, &variant(), false);
        assert_eq!(
            cache.decide(false, &snap, 8),
            ReinitDecision::Dirty(ReinitReason::BatchSize { previous: 4, current: 8 })
        );
    }

    #[test]
    fn test_output_shaping_fields_never_dirty() {
        let config = BatchConfig::default();
        let cache = committed(&config, 4);
        let mut changed = config.clone();
        changed.extended_output = !changed.extended_output;
        changed.extended_output_ts = !changed.extended_output_ts;
        changed.out_dir = cubnm_config::OutDir::Path("elsewhere".into());
        changed.gof_terms = vec!["-fc_normec".to_string()];
        changed.sim_verbose = true;
        changed.progress_interval = 50;
        changed.serial_nodes = true;
        let snap = ReinitSnapshot::capture(&changed, &variant(), false);
        assert_eq!(cache.decide(false, &snap, 4), ReinitDecision::Clean);
    }

    #[test]
    fn test_reinit_relevant_fields_are_dirty() {
        let config = BatchConfig::default();
        let cache = committed(&config, 4);
        let mutations: Vec<(&str, Box<dyn Fn(&mut BatchConfig)>)> = vec![
            ("duration", Box::new(|c: &mut BatchConfig| c.duration = 120.0)),
            ("tr", Box::new(|c: &mut BatchConfig| c.tr = 2.0)),
            ("sc_path", Box::new(|c: &mut BatchConfig| c.sc_path = "other_sc.txt".into())),
            ("sc_dist_path", Box::new(|c: &mut BatchConfig| c.sc_dist_path = Some("dist.txt".into()))),
            ("window_size", Box::new(|c: &mut BatchConfig| c.window_size = 12)),
            ("window_step", Box::new(|c: &mut BatchConfig| c.window_step = 3)),
            ("rand_seed", Box::new(|c: &mut BatchConfig| c.rand_seed = 1)),
            ("exc_interhemispheric", Box::new(|c: &mut BatchConfig| c.exc_interhemispheric = false)),
            ("force_cpu", Box::new(|c: &mut BatchConfig| c.force_cpu = true)),
            ("bw_params", Box::new(|c: &mut BatchConfig| c.bw_params = BwParams::Preset(BwPreset::Heinzle2016_3T))),
            ("bold_remove_s", Box::new(|c: &mut BatchConfig| c.bold_remove_s = 10.0)),
            ("fcd_drop_edges", Box::new(|c: &mut BatchConfig| c.fcd_drop_edges = false)),
            ("noise_segment_length", Box::new(|c: &mut BatchConfig| c.noise_segment_length = None)),
        ];
        for (field, mutate) in mutations {
            let mut changed = config.clone();
            mutate(&mut changed);
            let snap = ReinitSnapshot::capture(&changed, &variant(), false);
            assert_eq!(
                cache.decide(false, &snap, 4),
                ReinitDecision::Dirty(ReinitReason::Config(vec![field])),
                "{field}"
            );
        }
    }

    #[test]
    fn test_delay_toggle_is_dirty() {
        let config = BatchConfig::default();
        let cache = committed(&config, 4);
        let snap = ReinitSnapshot::capture(&config, &variant(), true);
        assert_eq!(
            cache.decide(false, &snap, 4),
            ReinitDecision::Dirty(ReinitReason::Config(vec!["delay_enabled"]))
        );
    }

    #[test]
    fn test_do_fic_and_model_switch_are_dirty() {
        let config = BatchConfig::default();
        let cache = committed(&config, 4);
        let without_fic = ModelVariant::Fic(FicOptions {
            do_fic: false,
            max_fic_trials: 5,
            fic_penalty: true,
        });
        let snap = ReinitSnapshot::capture(&config, &without_fic, false);
        assert_eq!(
            cache.decide(false, &snap, 4),
            ReinitDecision::Dirty(ReinitReason::Config(vec!["do_fic"]))
        );

        let snap = ReinitSnapshot::capture(&config, &ModelVariant::ExcitatoryOnly, false);
        assert_eq!(
            cache.decide(false, &snap, 4),
            ReinitDecision::Dirty(ReinitReason::Config(vec!["do_fic", "max_fic_trials"]))
        );
    }

    #[test]
    fn test_fic_flags_are_dirty() {
        let config = BatchConfig::default();
        let cache = committed(&config, 4);
        let relaxed = ModelVariant::Fic(FicOptions {
            do_fic: true,
            max_fic_trials: 0,
            fic_penalty: true,
        });
        let snap = ReinitSnapshot::capture(&config, &relaxed, false);
        assert_eq!(
            cache.decide(false, &snap, 4),
            ReinitDecision::Dirty(ReinitReason::Config(vec!["max_fic_trials"]))
        );
    }
}
