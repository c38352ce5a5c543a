//! Configuration fingerprints for resumable runs.
//!
//! The fingerprint covers everything that changes what a given replicate
//! index produces: the model, the design, the master seed, `L`, the thinning
//! stride, the backend and the prior-variance baseline size. Replicate count,
//! worker count, timeouts and analysis settings are excluded so a run can be
//! extended or re-analyzed without invalidating stored replicates.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::design::Design;
use crate::model::ModelSpec;
use crate::run::{Backend, RunConfig};

#[derive(Serialize)]
struct Fingerprinted<'a> {
    model: &'a ModelSpec,
    design: &'a Design,
    seed: u64,
    draws: usize,
    thin: usize,
    backend: Backend,
    fit_command: &'a [String],
    prior_variance_draws: usize,
}

/// `sha256:<hex>` over the canonical JSON of the replicate-defining inputs.
pub fn fingerprint(model: &ModelSpec, design: &Design, config: &RunConfig) -> String {
    let inputs = Fingerprinted {
        model,
        design,
        seed: config.seed,
        draws: config.draws,
        thin: config.thin,
        backend: config.backend,
        fit_command: &config.fit_command,
        prior_variance_draws: config.prior_variance_draws,
    };
    // Plain data with string keys; serialization cannot fail.
    let bytes = serde_json::to_vec(&inputs).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::{get_preset, PresetName};

    #[test]
    fn stable_for_identical_inputs() {
        let preset = get_preset(PresetName::NormalNormal);
        let a = fingerprint(&preset.model, &preset.design, &preset.run);
        let b = fingerprint(&preset.model, &preset.design, &preset.run.clone());
        assert_eq!(a, b);
        assert!(a.starts_with("sha256:"));
        assert_eq!(a.len(), "sha256:".len() + 64);
    }

    #[test]
    fn ignores_run_extent_but_not_seed() {
        let preset = get_preset(PresetName::NormalNormal);
        let base = fingerprint(&preset.model, &preset.design, &preset.run);

        let mut extended = preset.run.clone();
        extended.replicates *= 2;
        extended.workers = Some(3);
        extended.analysis.bins = 4;
        assert_eq!(base, fingerprint(&preset.model, &preset.design, &extended));

        let mut reseeded = preset.run.clone();
        reseeded.seed += 1;
        assert_ne!(base, fingerprint(&preset.model, &preset.design, &reseeded));

        let mut model = preset.model.clone();
        model.name.push('x');
        assert_ne!(base, fingerprint(&model, &preset.design, &preset.run));
    }
}
