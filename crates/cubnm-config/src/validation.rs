// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! This module provides validation logic to ensure configuration values are
//! consistent, within valid ranges, and don't conflict with each other.

use crate::{ConfigError, ConfigResult, CubnmConfig, ModelKind, KNOWN_GOF_TERMS};

/// Validation errors that can occur during config validation
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
    UnknownGofTerm { term: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
            Self::UnknownGofTerm { term } => {
                write!(
                    f,
                    "Unknown goodness-of-fit term {} (known: {})",
                    term,
                    KNOWN_GOF_TERMS.join(", ")
                )
            }
        }
    }
}

/// Validate the complete configuration
///
/// All problems are collected and reported together.
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` with details if validation fails
pub fn validate_config(config: &CubnmConfig) -> ConfigResult<()> {
    let errors = collect_validation_errors(config);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

/// Run every check and return the individual failures
pub fn collect_validation_errors(config: &CubnmConfig) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();
    validate_required_fields(config, &mut errors);
    validate_timing(config, &mut errors);
    validate_windows(config, &mut errors);
    validate_gof_terms(config, &mut errors);
    errors
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigValidationError {
    ConfigValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn validate_required_fields(config: &CubnmConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.batch.sc_path.as_os_str().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "batch.sc_path".to_string(),
        });
    }
}

fn validate_timing(config: &CubnmConfig, errors: &mut Vec<ConfigValidationError>) {
    let batch = &config.batch;
    if !(batch.duration > 0.0) {
        errors.push(invalid("batch.duration", format!("{} must be positive", batch.duration)));
    }
    if !(batch.tr > 0.0) {
        errors.push(invalid("batch.tr", format!("{} must be positive", batch.tr)));
    } else if batch.tr > batch.duration {
        errors.push(invalid(
            "batch.tr",
            format!("TR {} s is longer than duration {} s", batch.tr, batch.duration),
        ));
    }
    if batch.bold_remove_s < 0.0 {
        errors.push(invalid("batch.bold_remove_s", "must not be negative"));
    } else if batch.bold_remove_s >= batch.duration {
        errors.push(invalid(
            "batch.bold_remove_s",
            format!(
                "{} s leaves no BOLD of a {} s simulation",
                batch.bold_remove_s, batch.duration
            ),
        ));
    }
    if let Some(segment) = batch.noise_segment_length {
        if !(segment > 0.0) {
            errors.push(invalid("batch.noise_segment_length", "must be positive"));
        }
    }
}

fn validate_windows(config: &CubnmConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.batch.window_size == 0 {
        errors.push(invalid("batch.window_size", "must be at least 1 TR"));
    }
    if config.batch.window_step == 0 {
        errors.push(invalid("batch.window_step", "must be at least 1 TR"));
    }
}

fn validate_gof_terms(config: &CubnmConfig, errors: &mut Vec<ConfigValidationError>) {
    for term in &config.batch.gof_terms {
        if !KNOWN_GOF_TERMS.contains(&term.as_str()) {
            errors.push(ConfigValidationError::UnknownGofTerm { term: term.clone() });
        } else if term == "-fic_penalty" && config.model.variant != ModelKind::Rww {
            errors.push(invalid(
                "batch.gof_terms",
                format!("-fic_penalty is only computed for the rWW model, not {}", config.model.variant),
            ));
        }
    }
}
