// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file to saved archive, through the umbrella crate

use cubnm::backend::SyntheticBackend;
use cubnm::prelude::*;
use cubnm::sim::{load_archive, ReinitDecision};
use ndarray::Array1;
use std::fs;
use std::path::Path;

const SC: &str = "\
# 4-node test connectome
0.0 0.2 0.1 0.0
0.2 0.0 0.3 0.1
0.1 0.3 0.0 0.2
0.0 0.1 0.2 0.0
";

fn write_config(dir: &Path, model: &str, extra: &str) -> std::path::PathBuf {
    let sc_path = dir.join("ctx_sc.txt");
    fs::write(&sc_path, SC).unwrap();
    let config_path = dir.join("cubnm.toml");
    fs::write(
        &config_path,
        format!(
            r#"
[batch]
duration = 20.0
tr = 1.0
sc_path = "{}"
out_dir = "same"
window_size = 4
window_step = 2
bold_remove_s = 2.0
gof_terms = ["+fc_corr", "-fc_diff", "-fcd_ks", "-fc_normec"]
{extra}

[model]
variant = "{model}"
"#,
            sc_path.display()
        ),
    )
    .unwrap();
    config_path
}

#[test]
fn config_file_drives_a_full_batch() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(dir.path(), "rWW", "");
    let config = cubnm::config::load_config(Some(config_path.as_path()), None).unwrap();

    let mut batch = cubnm::open_batch(&config, BackendCapabilities::cpu_only(), SyntheticBackend::new()).unwrap();
    assert_eq!(batch.nodes(), 4);
    assert_eq!(batch.target(), ExecutionTarget::Cpu);

    batch.set_batch_size(3).unwrap();
    batch.apply_default_parameters().unwrap();
    batch.run(false).unwrap();
    assert_eq!(batch.reinit_decision(false), ReinitDecision::Clean);

    let emp_fc = Array1::from(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
    let emp_fcd = Array1::linspace(0.0, 1.0, 20);
    let scores = batch.score(emp_fc.view(), emp_fcd.view(), DEFAULT_FIC_PENALTY_SCALE).unwrap();
    assert_eq!(scores.len(), 3);
    assert!(scores.has_fic_penalty());
    for row in scores.rows() {
        assert!(row.fc_normec <= 0.0);
        assert!(row.fc_diff <= 0.0);
        let expected = row.fc_corr + row.fc_diff + row.fcd_ks + row.fc_normec;
        assert!((row.gof - expected).abs() < 1e-12);
    }
    let json = scores.to_json().unwrap();
    assert!(json.contains("\"-fic_penalty\""));

    let path = batch.save(SaveFormat::Archive).unwrap();
    assert_eq!(path, dir.path().join("ctx_sc").join("it1.cbnm"));
    let archive = load_archive(&path).unwrap();
    assert_eq!(archive.array("sim_fc_trils").unwrap().shape, vec![3, 6]);
    assert_eq!(archive.array("G").unwrap().data.len(), 3);
}

#[test]
fn invalid_config_is_rejected_before_loading() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(dir.path(), "rWWEx", "");
    let mut config = cubnm::config::load_config(Some(config_path.as_path()), None).unwrap();
    config.batch.gof_terms.push("-fic_penalty".to_string());

    let err = cubnm::open_batch(&config, BackendCapabilities::cpu_only(), SyntheticBackend::new()).unwrap_err();
    assert!(matches!(err, SimError::Config(_)));
}

#[test]
fn missing_connectome_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(dir.path(), "rWWEx", "");
    let mut config = cubnm::config::load_config(Some(config_path.as_path()), None).unwrap();
    config.batch.sc_path = dir.path().join("absent.txt");

    let err = cubnm::open_batch(&config, BackendCapabilities::cpu_only(), SyntheticBackend::new()).unwrap_err();
    assert!(matches!(err, SimError::Connectome(_)));
}

#[test]
fn gpu_request_falls_back_to_cpu() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(dir.path(), "rWWEx", "force_cpu = false");
    let config = cubnm::config::load_config(Some(config_path.as_path()), None).unwrap();

    let batch = cubnm::open_batch(&config, BackendCapabilities::gpu(0, false), SyntheticBackend::new()).unwrap();
    assert_eq!(batch.target(), ExecutionTarget::Cpu);

    let batch = cubnm::open_batch(&config, BackendCapabilities::gpu(2, false), SyntheticBackend::new()).unwrap();
    assert_eq!(batch.target(), ExecutionTarget::Gpu);
}
