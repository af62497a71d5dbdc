//! Denoise a synthetic noisy render.
//!
//! Accumulates noisy samples of a soft gradient with a bright disc, runs the
//! Bayesian collaborative denoiser and saves both images as PNG.
//!
//! Run with: cargo run --example denoise_noisy_gradient -- [settings.json]

use std::env;
use std::time::Instant;

use anyhow::{Context, Result};
use aurora_denoiser::{make_denoiser, SampleStatistics, System, SystemSettings};
use aurora_math::{pixel_index, PixelRect, UVec2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SAMPLES_PER_PIXEL: u32 = 16;

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let settings = match env::args().nth(1) {
        Some(path) => SystemSettings::from_path(&path).with_context(|| format!("reading {path}"))?,
        None => SystemSettings {
            image_width: 320,
            image_height: 240,
            ..Default::default()
        },
    };
    let system = System::new(&settings)?;
    let denoiser = make_denoiser(&settings)?;

    let resolution = system.image_resolution();
    let mut statistics = SampleStatistics::new(resolution, system.dimension(), denoiser.histogram_bins());

    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for pixel in PixelRect::from_resolution(resolution).iter() {
        let value = scene_value(pixel, resolution);
        for _ in 0..SAMPLES_PER_PIXEL {
            // Mostly dark samples with rare fireflies, like a path tracer
            let sample: Vec<f64> = (0..system.dimension())
                .map(|si| {
                    let v = value[si % 3];
                    if rng.gen::<f64>() < 0.05 {
                        v * 8.0
                    } else {
                        v * rng.gen_range(0.2..1.2)
                    }
                })
                .collect();
            statistics.add_sample(pixel, &sample);
        }
    }
    log::info!("Accumulated {} spp in {:?}", SAMPLES_PER_PIXEL, start.elapsed());

    let noisy: Vec<f64> = (0..statistics.num_of_pixels())
        .flat_map(|i| statistics.sample(i).to_vec())
        .map(|s| s / SAMPLES_PER_PIXEL as f64)
        .collect();
    save_png("noisy.png", resolution, statistics.channels(), &noisy)?;

    denoiser.denoise(&system, SAMPLES_PER_PIXEL, &mut statistics)?;

    let denoised: Vec<f64> = (0..statistics.num_of_pixels())
        .flat_map(|i| statistics.denoised(i).to_vec())
        .collect();
    save_png("denoised.png", resolution, statistics.channels(), &denoised)?;
    log::info!("Saved noisy.png and denoised.png");

    Ok(())
}

/// Noise-free radiance of the synthetic scene.
fn scene_value(pixel: UVec2, resolution: UVec2) -> [f64; 3] {
    let u = pixel.x as f64 / resolution.x as f64;
    let v = pixel.y as f64 / resolution.y as f64;
    let (dx, dy) = (u - 0.6, v - 0.4);
    let disc = if dx * dx + dy * dy < 0.02 { 1.5 } else { 0.0 };
    [0.2 + 0.5 * u + disc, 0.3 + 0.2 * v + disc, 0.5 - 0.3 * u + disc * 0.8]
}

/// Tone map the first three channels (or the first one, repeated) to sRGB-ish 8 bit.
fn save_png(path: &str, resolution: UVec2, channels: usize, values: &[f64]) -> Result<()> {
    let mut image = image::RgbImage::new(resolution.x, resolution.y);
    for (x, y, rgb) in image.enumerate_pixels_mut() {
        let index = pixel_index(UVec2::new(x, y), resolution) * channels;
        for c in 0..3 {
            let v = values[index + c.min(channels - 1)];
            rgb[c] = (255.0 * (v / (1.0 + v)).max(0.0).sqrt()).round() as u8;
        }
    }
    image.save(path).with_context(|| format!("writing {path}"))?;
    Ok(())
}
