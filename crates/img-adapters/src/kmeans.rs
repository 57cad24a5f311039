//! K-means sobre la luminosidad CIELAB.
//!
//! Cada píxel se reduce a su L (escala 0..=255, como un Lab de 8 bits), se
//! agrupa en `nclusters` centros y se repinta con el color del cluster. Los
//! centros salen ordenados de menor a mayor, así `colors[0]` pinta la zona
//! más oscura. Se ejecutan `attempts` intentos y gana el de menor
//! compacidad.
//!
//! Asignación y conversión a Lab corren en paralelo (rayon); las sumas se
//! acumulan en orden secuencial para que una misma semilla reproduzca el
//! resultado bit a bit.

use image::RgbImage;
use img_core::{ClusterOutput, ClusterRoutine, JobError, KMeansParams, Seeding};
use log::debug;
use palette::{FromColor, Lab, LinSrgb, Srgb};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Tope de iteraciones cuando el criterio es sólo `epsilon`.
const EPSILON_ONLY_ITERATION_CAP: u32 = 300;

#[derive(Debug, Clone, Copy, Default)]
pub struct LabKMeans;

impl LabKMeans {
    pub fn new() -> Self {
        Self
    }
}

struct Attempt {
    centers: Vec<f64>,
    labels: Vec<u8>,
    compactness: f64,
    iterations: u32,
}

fn lightness(p: &[u8]) -> f32 {
    let srgb: Srgb<f32> = Srgb::new(p[0] as f32 / 255.0, p[1] as f32 / 255.0, p[2] as f32 / 255.0);
    let lin: LinSrgb<f32> = srgb.into_linear();
    let lab: Lab = Lab::from_color(lin);
    lab.l * 255.0 / 100.0
}

fn sq(d: f64) -> f64 {
    d * d
}

fn nearest(centers: &[f64], x: f64) -> u8 {
    let mut best = 0usize;
    let mut best_d = f64::INFINITY;
    for (i, c) in centers.iter().enumerate() {
        let d = sq(x - c);
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best as u8
}

fn assign(data: &[f32], centers: &[f64], labels: &mut [u8]) {
    labels.par_iter_mut()
          .zip(data.par_iter())
          .for_each(|(l, &x)| *l = nearest(centers, x as f64));
}

fn recompute(data: &[f32], labels: &[u8], previous: &[f64]) -> Vec<f64> {
    let k = previous.len();
    let mut sums = vec![0f64; k];
    let mut counts = vec![0u64; k];
    for (&x, &l) in data.iter().zip(labels) {
        sums[l as usize] += x as f64;
        counts[l as usize] += 1;
    }
    // Un cluster vacío conserva su centro anterior.
    previous.iter()
            .enumerate()
            .map(|(i, &old)| if counts[i] == 0 { old } else { sums[i] / counts[i] as f64 })
            .collect()
}

fn seed_random(data: &[f32], k: usize, rng: &mut StdRng) -> Vec<f64> {
    (0..k).map(|_| data[rng.random_range(0..data.len())] as f64).collect()
}

fn seed_plus_plus(data: &[f32], k: usize, rng: &mut StdRng) -> Vec<f64> {
    let n = data.len();
    let first = data[rng.random_range(0..n)] as f64;
    let mut centers = Vec::with_capacity(k);
    centers.push(first);
    let mut dist: Vec<f64> = data.iter().map(|&x| sq(x as f64 - first)).collect();
    while centers.len() < k {
        let total: f64 = dist.iter().sum();
        let next = if total <= 0.0 {
            data[rng.random_range(0..n)] as f64
        } else {
            let mut target = rng.random::<f64>() * total;
            let mut idx = n - 1;
            for (i, d) in dist.iter().enumerate() {
                if target < *d {
                    idx = i;
                    break;
                }
                target -= d;
            }
            data[idx] as f64
        };
        centers.push(next);
        for (d, &x) in dist.iter_mut().zip(data) {
            *d = d.min(sq(x as f64 - next));
        }
    }
    centers
}

fn run_attempt(data: &[f32], params: &KMeansParams, rng: &mut StdRng) -> Attempt {
    let k = params.nclusters as usize;
    let mut centers = match params.seeding {
        Seeding::PlusPlus => seed_plus_plus(data, k, rng),
        Seeding::Random => seed_random(data, k, rng),
    };
    let mut labels = vec![0u8; data.len()];
    let max_iterations = if params.criteria.uses_iterations() {
        params.max_iterations
    } else {
        EPSILON_ONLY_ITERATION_CAP
    };
    let mut iterations = 0;
    while iterations < max_iterations {
        iterations += 1;
        assign(data, &centers, &mut labels);
        let next = recompute(data, &labels, &centers);
        let shift = centers.iter().zip(&next).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max);
        centers = next;
        if params.criteria.uses_epsilon() && shift <= params.epsilon {
            break;
        }
    }
    assign(data, &centers, &mut labels);
    let compactness = data.iter().zip(&labels).map(|(&x, &l)| sq(x as f64 - centers[l as usize])).sum();
    Attempt { centers,
              labels,
              compactness,
              iterations }
}

impl ClusterRoutine for LabKMeans {
    fn name(&self) -> &str {
        "lab-kmeans"
    }

    fn cluster(&self, image: &RgbImage, params: &KMeansParams) -> Result<ClusterOutput, JobError> {
        params.validate()?;
        let (width, height) = image.dimensions();
        let k = params.nclusters as usize;
        let data: Vec<f32> = image.as_raw().par_chunks_exact(3).map(lightness).collect();
        if data.len() < k {
            return Err(JobError::ExecutionFault(format!("image has {} pixels, fewer than the {} requested clusters",
                                                        data.len(),
                                                        k)));
        }

        let mut rng = StdRng::seed_from_u64(params.effective_seed());
        let mut best: Option<Attempt> = None;
        for attempt in 0..params.attempts {
            let candidate = run_attempt(&data, params, &mut rng);
            debug!("kmeans attempt={} iterations={} compactness={:.3}",
                   attempt, candidate.iterations, candidate.compactness);
            if best.as_ref().map_or(true, |b| candidate.compactness < b.compactness) {
                best = Some(candidate);
            }
        }
        let best = best.ok_or_else(|| JobError::ExecutionFault("kmeans ran no attempts".into()))?;

        // Orden ascendente de centros y remapeo de etiquetas.
        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by(|&a, &b| best.centers[a].total_cmp(&best.centers[b]));
        let mut rank = vec![0usize; k];
        for (new, &old) in order.iter().enumerate() {
            rank[old] = new;
        }
        let centers: Vec<f64> = order.iter().map(|&i| best.centers[i]).collect();

        let mut raw = Vec::with_capacity(best.labels.len() * 3);
        for &l in &best.labels {
            raw.extend_from_slice(&params.colors[rank[l as usize]]);
        }
        let labeled = RgbImage::from_raw(width, height, raw)
            .ok_or_else(|| JobError::ExecutionFault("labeled buffer does not match image size".into()))?;

        Ok(ClusterOutput { centers,
                           compactness: best.compactness,
                           processed_pixels: data.len() as u64,
                           labeled })
    }
}
