//! Flow-matching refiner: K Euler integration steps over a
//! Gaussian-sampled latent, using a precomputed `(s, t)` schedule.

use crate::error::Result;
use crate::session::SessionHandle;
use crate::tensor::Tensor;
use rand::Rng;
use std::collections::HashMap;

/// Max flow-matching step count the schedule table covers.
pub const L_MAX: usize = 10;
/// Latent width, fixed by the backbone/flow-refiner contract.
pub const LATENT_DIM: usize = 32;
/// Sampling variance for the initial Gaussian latent (`σ² = TEMP`).
pub const TEMP: f32 = 0.7;

/// One Euler step's `(s, t)` pair, each a scalar f32 tensor of shape `[1,1]`.
#[derive(Debug, Clone)]
pub struct SchedulePoint {
    pub s: Tensor,
    pub t: Tensor,
}

/// Precomputed schedule for every `L ∈ [1, L_MAX]`: `schedule[L-1]` holds
/// the `L` `(s_j, t_j)` pairs for that step count, `s_j = j/L`,
/// `t_j = s_j + 1/L`.
pub struct FlowSchedule {
    by_l: Vec<Vec<SchedulePoint>>,
}

impl FlowSchedule {
    /// Build the table once at load, for every `L` from 1 to [`L_MAX`].
    pub fn build() -> Self {
        let by_l = (1..=L_MAX)
            .map(|l| {
                (0..l)
                    .map(|j| {
                        let s = j as f32 / l as f32;
                        let t = s + 1.0 / l as f32;
                        SchedulePoint {
                            s: Tensor::f32(vec![1, 1], vec![s]),
                            t: Tensor::f32(vec![1, 1], vec![t]),
                        }
                    })
                    .collect()
            })
            .collect();
        Self { by_l }
    }

    /// The schedule for a given step count `l ∈ [1, L_MAX]`.
    pub fn for_l(&self, l: usize) -> &[SchedulePoint] {
        &self.by_l[l - 1]
    }
}

impl Default for FlowSchedule {
    fn default() -> Self {
        Self::build()
    }
}

/// Sample the initial Gaussian latent via Box–Muller, guarding against
/// `u = 0` (would make `ln(u)` diverge).
fn sample_initial_latent(rng: &mut impl Rng, temperature: f32) -> [f32; LATENT_DIM] {
    let mut x = [0.0_f32; LATENT_DIM];
    for slot in x.iter_mut() {
        let u: f32 = loop {
            let candidate = rng.gen::<f32>();
            if candidate > 0.0 {
                break candidate;
            }
        };
        let v: f32 = rng.gen::<f32>();
        *slot = (-2.0 * u.ln()).sqrt() * (2.0 * std::f32::consts::PI * v).cos() * temperature.sqrt();
    }
    x
}

/// Run `L` Euler integration steps and return the refined length-32 latent.
/// `temperature` is the sampling variance for the initial latent (`TEMP` by
/// default, but caller-configurable).
pub fn refine(
    conditioning: &Tensor,
    l: usize,
    schedule: &FlowSchedule,
    flow_refiner: &mut dyn SessionHandle,
    rng: &mut impl Rng,
    temperature: f32,
) -> Result<[f32; LATENT_DIM]> {
    let mut x = sample_initial_latent(rng, temperature);
    let step = 1.0 / l as f32;

    for point in schedule.for_l(l) {
        let mut inputs = HashMap::with_capacity(4);
        inputs.insert("c".to_owned(), conditioning.clone());
        inputs.insert("s".to_owned(), point.s.clone());
        inputs.insert("t".to_owned(), point.t.clone());
        inputs.insert("x".to_owned(), Tensor::f32(vec![1, LATENT_DIM], x.to_vec()));

        let outputs = flow_refiner.run(inputs)?;
        let velocity_name = flow_refiner
            .output_names()
            .first()
            .cloned()
            .unwrap_or_else(|| "flow_dir".to_owned());
        let velocity = outputs
            .get(&velocity_name)
            .and_then(Tensor::as_f32)
            .map(|v| v.to_vec())
            .unwrap_or_else(|| vec![0.0; LATENT_DIM]);

        for (xi, vi) in x.iter_mut().zip(velocity.iter()) {
            *xi += vi * step;
        }
    }

    Ok(x)
}
