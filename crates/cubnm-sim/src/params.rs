// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Parameter store
//!
//! Named parameter arrays of one batch. Global parameters and velocity are
//! `(N,)`, regional parameters `(N, nodes)`. Every declared parameter must
//! be populated before the batch runs.

use crate::model::{ModelVariant, ParamKind, DEFAULT_VELOCITY, VELOCITY};
use crate::{Result, SimError};
use ahash::AHashMap;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, Ix1, Ix2};
use tracing::{debug, warn};

/// Parameter arrays of one batch, validated against the active variant
#[derive(Debug, Clone)]
pub struct ParameterStore {
    variant: ModelVariant,
    nodes: usize,
    delay_enabled: bool,
    n_sims: usize,
    vectors: AHashMap<&'static str, Array1<f64>>,
    matrices: AHashMap<&'static str, Array2<f64>>,
}

impl ParameterStore {
    /// Empty store; call [`ParameterStore::reset`] to size it
    pub fn new(variant: ModelVariant, nodes: usize, delay_enabled: bool) -> Self {
        Self {
            variant,
            nodes,
            delay_enabled,
            n_sims: 0,
            vectors: AHashMap::new(),
            matrices: AHashMap::new(),
        }
    }

    pub fn n_sims(&self) -> usize {
        self.n_sims
    }

    pub fn nodes(&self) -> usize {
        self.nodes
    }

    pub fn variant(&self) -> &ModelVariant {
        &self.variant
    }

    pub fn delay_enabled(&self) -> bool {
        self.delay_enabled
    }

    /// Drop every array and size the store for `n_sims` simulations.
    ///
    /// Velocity is zero-filled without delay, and variant placeholders
    /// (FIC inhibitory coupling) are zero-filled.
    pub fn reset(&mut self, n_sims: usize) {
        self.n_sims = n_sims;
        self.vectors.clear();
        self.matrices.clear();
        if !self.delay_enabled {
            self.vectors.insert(VELOCITY, Array1::zeros(n_sims));
        }
        for &name in self.variant.placeholders() {
            self.matrices.insert(name, Array2::zeros((n_sims, self.nodes)));
        }
        debug!(n_sims, nodes = self.nodes, "Parameter store reset");
    }

    /// Switch the active variant.
    ///
    /// A different model kind drops every array and resets the store.
    /// Within a kind, placeholders the new variant no longer declares are
    /// dropped and newly declared ones are zero-filled; other arrays stay.
    pub fn set_variant(&mut self, variant: ModelVariant) {
        if variant == self.variant {
            return;
        }
        if variant.kind() != self.variant.kind() {
            self.variant = variant;
            if self.n_sims > 0 {
                self.reset(self.n_sims);
            }
            return;
        }

        let previous = self.variant.placeholders();
        let current = variant.placeholders();
        for name in previous.iter().filter(|&&name| !current.contains(&name)) {
            self.matrices.remove(name);
        }
        if self.n_sims > 0 {
            for &name in current.iter().filter(|&&name| !previous.contains(&name)) {
                self.matrices.insert(name, Array2::zeros((self.n_sims, self.nodes)));
            }
        }
        self.variant = variant;
        debug!(model = %variant, "Parameter store variant changed");
    }

    fn resolve(&self, name: &str) -> Result<(&'static str, ParamKind)> {
        let kind = self.variant.param_kind(name).ok_or_else(|| SimError::UnknownParameter {
            name: name.to_string(),
            model: self.variant.to_string(),
            known: self.variant.param_names().iter().map(|n| n.to_string()).collect(),
        })?;
        let key = self
            .variant
            .param_names()
            .into_iter()
            .find(|&declared| declared == name)
            .unwrap_or(VELOCITY);
        Ok((key, kind))
    }

    /// Expected shape of a declared parameter for the current batch
    pub fn expected_shape(&self, name: &str) -> Result<Vec<usize>> {
        let (_, kind) = self.resolve(name)?;
        Ok(match kind {
            ParamKind::Global | ParamKind::Velocity => vec![self.n_sims],
            ParamKind::Regional => vec![self.n_sims, self.nodes],
        })
    }

    /// Replace a parameter array.
    ///
    /// # Errors
    ///
    /// [`SimError::UnknownParameter`] for undeclared names and
    /// [`SimError::ShapeMismatch`] when the shape is not `(N,)` for global
    /// parameters and velocity, or `(N, nodes)` for regional parameters.
    pub fn set_parameter(&mut self, name: &str, values: ArrayD<f64>) -> Result<()> {
        let (key, kind) = self.resolve(name)?;
        let expected = self.expected_shape(name)?;
        if values.shape() != expected.as_slice() {
            return Err(SimError::ShapeMismatch {
                name: name.to_string(),
                expected,
                found: values.shape().to_vec(),
            });
        }

        match kind {
            ParamKind::Regional => {
                let values = values.into_dimensionality::<Ix2>().map_err(|_| SimError::ShapeMismatch {
                    name: name.to_string(),
                    expected: vec![self.n_sims, self.nodes],
                    found: vec![],
                })?;
                self.matrices.insert(key, values);
            }
            ParamKind::Global | ParamKind::Velocity => {
                let mut values = values.into_dimensionality::<Ix1>().map_err(|_| SimError::ShapeMismatch {
                    name: name.to_string(),
                    expected: vec![self.n_sims],
                    found: vec![],
                })?;
                if kind == ParamKind::Velocity && !self.delay_enabled {
                    if values.iter().any(|&v| v != 0.0) {
                        warn!("Delay is disabled, ignoring non-zero velocity values");
                    }
                    values.fill(0.0);
                }
                self.vectors.insert(key, values);
            }
        }
        Ok(())
    }

    /// Set a declared parameter to one value for every simulation (and region)
    pub fn fill_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        let shape = self.expected_shape(name)?;
        self.set_parameter(name, ArrayD::from_elem(shape, value))
    }

    /// Populate every declared parameter with the variant's defaults
    pub fn apply_defaults(&mut self) -> Result<()> {
        for (name, value) in self.variant.default_values() {
            self.fill_parameter(name, value)?;
        }
        if self.delay_enabled {
            self.fill_parameter(VELOCITY, DEFAULT_VELOCITY)?;
        }
        Ok(())
    }

    /// `(N,)` array of a global parameter or velocity
    pub fn vector(&self, name: &str) -> Option<&Array1<f64>> {
        self.vectors.get(name)
    }

    /// `(N, nodes)` array of a regional parameter
    pub fn matrix(&self, name: &str) -> Option<&Array2<f64>> {
        self.matrices.get(name)
    }

    pub fn velocity(&self) -> Option<&Array1<f64>> {
        self.vectors.get(VELOCITY)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.vectors.contains_key(name) || self.matrices.contains_key(name)
    }

    /// Names of declared parameters that are still unpopulated
    pub fn missing(&self) -> Vec<&'static str> {
        self.variant
            .param_names()
            .into_iter()
            .filter(|name| !self.is_set(name))
            .collect()
    }

    /// # Errors
    ///
    /// [`SimError::EmptyBatch`] before the store is sized and
    /// [`SimError::MissingParameter`] for the first unpopulated parameter.
    pub fn validate_complete(&self) -> Result<()> {
        if self.n_sims == 0 {
            return Err(SimError::EmptyBatch);
        }
        match self.missing().first() {
            Some(name) => Err(SimError::MissingParameter {
                name: name.to_string(),
                n_sims: self.n_sims,
            }),
            None => Ok(()),
        }
    }

    /// Overwrite a regional parameter from its flattened `(N * nodes,)` row
    pub fn write_back_regional(&mut self, name: &str, row: ArrayView1<'_, f64>) -> Result<()> {
        let values = Array2::from_shape_vec((self.n_sims, self.nodes), row.to_vec()).map_err(|_| {
            SimError::ShapeMismatch {
                name: name.to_string(),
                expected: vec![self.n_sims * self.nodes],
                found: vec![row.len()],
            }
        })?;
        self.set_parameter(name, values.into_dyn())
    }

    /// Every populated array in declaration order, flattened with its shape
    pub fn snapshot(&self) -> Vec<(&'static str, Vec<usize>, Vec<f64>)> {
        self.variant
            .param_names()
            .into_iter()
            .filter_map(|name| {
                if let Some(v) = self.vectors.get(name) {
                    Some((name, vec![v.len()], v.to_vec()))
                } else {
                    self.matrices
                        .get(name)
                        .map(|m| (name, m.shape().to_vec(), m.iter().copied().collect()))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FicOptions;
    use ndarray::{array, Array};

    fn fic_store(delay: bool) -> ParameterStore {
        let variant = ModelVariant::Fic(FicOptions {
            do_fic: true,
            max_fic_trials: 5,
            fic_penalty: true,
        });
        let mut store = ParameterStore::new(variant, 3, delay);
        store.reset(2);
        store
    }

    #[test]
    fn test_reset_fills_placeholders() {
        let store = fic_store(false);
        assert_eq!(store.velocity().unwrap(), &Array1::<f64>::zeros(2));
        assert_eq!(store.matrix("wIE").unwrap().dim(), (2, 3));
        assert_eq!(store.missing(), vec!["G", "wEE", "wEI"]);
    }

    #[test]
    fn test_set_variant_swaps_placeholders() {
        let mut store = fic_store(false);
        store.set_parameter("G", Array::from_elem(2, 0.5).into_dyn()).unwrap();

        store.set_variant(ModelVariant::Fic(FicOptions {
            do_fic: false,
            max_fic_trials: 5,
            fic_penalty: true,
        }));
        assert!(!store.is_set("wIE"));
        assert!(store.is_set("G"));
        assert_eq!(store.missing(), vec!["wEE", "wEI", "wIE"]);

        store.set_variant(ModelVariant::Fic(FicOptions {
            do_fic: true,
            max_fic_trials: 0,
            fic_penalty: true,
        }));
        assert_eq!(store.matrix("wIE").unwrap(), &Array2::<f64>::zeros((2, 3)));
        assert_eq!(store.variant().fic().unwrap().max_fic_trials, 0);
    }

    #[test]
    fn test_set_variant_to_other_kind_resets() {
        let mut store = fic_store(false);
        store.set_parameter("G", Array::from_elem(2, 0.5).into_dyn()).unwrap();
        store.set_variant(ModelVariant::ExcitatoryOnly);
        assert_eq!(store.n_sims(), 2);
        assert!(!store.is_set("G"));
        assert_eq!(store.missing(), vec!["G", "w", "I0", "sigma"]);
    }

    #[test]
    fn test_reset_with_delay_leaves_velocity_free() {
        let store = fic_store(true);
        assert!(store.velocity().is_none());
        assert!(store.missing().contains(&"v"));
    }

    #[test]
    fn test_shape_mismatch_names_parameter() {
        let mut store = fic_store(false);
        let err = store.set_parameter("wEE", Array::zeros(vec![2, 4])).unwrap_err();
        match err {
            SimError::ShapeMismatch { name, expected, found } => {
                assert_eq!(name, "wEE");
                assert_eq!(expected, vec![2, 3]);
                assert_eq!(found, vec![2, 4]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.set_parameter("G", Array::zeros(vec![2, 3])).is_err());
    }

    #[test]
    fn test_unknown_parameter() {
        let mut store = fic_store(false);
        let err = store.set_parameter("sigma", Array::zeros(vec![2, 3])).unwrap_err();
        assert!(matches!(err, SimError::UnknownParameter { .. }));
    }

    #[test]
    fn test_velocity_forced_to_zero_without_delay() {
        let mut store = fic_store(false);
        store.set_parameter("v", array![1.0, 2.0].into_dyn()).unwrap();
        assert_eq!(store.velocity().unwrap(), &array![0.0, 0.0]);
    }

    #[test]
    fn test_defaults_complete_the_store() {
        let mut store = fic_store(true);
        store.apply_defaults().unwrap();
        store.validate_complete().unwrap();
        assert_eq!(store.velocity().unwrap(), &array![0.5, 0.5]);
        assert_eq!(store.matrix("wIE").unwrap(), &Array2::<f64>::zeros((2, 3)));
        assert_eq!(store.vector("G").unwrap(), &array![0.5, 0.5]);
    }

    #[test]
    fn test_validate_complete_reports_missing() {
        let store = fic_store(false);
        let err = store.validate_complete().unwrap_err();
        assert!(matches!(err, SimError::MissingParameter { ref name, n_sims: 2 } if name == "G"));

        let empty = ParameterStore::new(ModelVariant::ExcitatoryOnly, 3, false);
        assert!(matches!(empty.validate_complete(), Err(SimError::EmptyBatch)));
    }

    #[test]
    fn test_write_back_regional() {
        let mut store = fic_store(false);
        let row = array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        store.write_back_regional("wIE", row.view()).unwrap();
        assert_eq!(store.matrix("wIE").unwrap(), &array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    }
}
