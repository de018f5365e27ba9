use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Array1;
use specmatch_library::{ParameterRow, SpectralLibrary};

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Continuum-normalised absorption spectrum.
fn generate_spectrum(
    wavelengths: &[f64],
    lines: &[(f64, f64, f64)],
    noise_level: f64,
    rng: &mut SimpleRng,
) -> Vec<f64> {
    wavelengths
        .iter()
        .map(|&wl| {
            let absorption: f64 = lines
                .iter()
                .map(|&(mu, sigma, depth)| gaussian(wl, mu, sigma, depth))
                .sum();
            1.0 - absorption + rng.gauss(0.0, noise_level)
        })
        .collect()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let mut rng = SimpleRng::new(42);

    // Mg b triplet region, 0.02 Å sampling
    let wav = Array1::range(5160.0, 5190.0, 0.02);
    let wavelengths = wav.to_vec();

    // (centre, width, depth at solar temperature)
    let line_list = [
        (5167.32, 0.12, 0.55),
        (5172.68, 0.14, 0.65),
        (5183.60, 0.15, 0.70),
        (5168.90, 0.05, 0.25),
        (5171.60, 0.05, 0.30),
        (5177.23, 0.04, 0.20),
    ];
    let sources = ["Mann", "Brewer", "von Braun"];

    let mut lib = SpectralLibrary::empty(wav, None);
    for star in 0..24 {
        let teff = rng.uniform(3200.0, 6500.0);
        let logg = rng.uniform(3.8, 5.0);
        let feh = rng.uniform(-0.6, 0.4);
        let vsini = rng.uniform(0.5, 6.0);

        // Cooler, more metal-rich stars get deeper lines.
        let strength = (5800.0 / teff).powf(1.5) * 10f64.powf(feh * 0.5);
        let broadening = 1.0 + vsini / 10.0;
        let lines: Vec<(f64, f64, f64)> = line_list
            .iter()
            .map(|&(mu, sigma, depth)| (mu, sigma * broadening, (depth * strength).min(0.95)))
            .collect();

        let noise = 0.01;
        let flux = generate_spectrum(&wavelengths, &lines, noise, &mut rng);
        let uncertainty = vec![noise; wavelengths.len()];

        let row = ParameterRow::new()
            .with("cps_name", format!("SYN{star:03}"))
            .with("obs", format!("rj{}.{}", 100 + star, 150 + star * 7))
            .with("lib_obs", format!("rj{}.{}", 100 + star, 150 + star * 7))
            .with("Teff", teff.round())
            .with("u_Teff", 60.0)
            .with("logg", (logg * 100.0).round() / 100.0)
            .with("u_logg", 0.1)
            .with("feh", (feh * 100.0).round() / 100.0)
            .with("u_feh", 0.08)
            .with("vsini", (vsini * 10.0).round() / 10.0)
            .with("source", sources[star % sources.len()])
            .with("source_name", "synthetic");
        lib.insert(&row, &flux, &uncertainty)
            .with_context(|| format!("inserting star {star}"))?;
    }

    let param_path = Path::new("library_params.parquet");
    let spec_path = Path::new("library_spectra.parquet");
    lib.save(param_path, spec_path).context("saving sample library")?;

    println!(
        "Wrote {} spectra ({} wavelengths each) to {} and {}",
        lib.len(),
        lib.wav().len(),
        param_path.display(),
        spec_path.display()
    );
    Ok(())
}
