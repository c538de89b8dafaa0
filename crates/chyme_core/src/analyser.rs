/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Byte-scaled frequency magnitudes over the most recent PCM window:
//! Blackman window, DFT, exponential smoothing across frames, then decibels
//! mapped linearly from `[MIN_DB, MAX_DB]` onto `0..=255`.

use std::f32::consts::PI;

pub const FFT_SIZE: usize = 256;
const SMOOTHING: f32 = 0.8;
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

pub struct FrequencyAnalyser {
    size: usize,
    window: Vec<f32>,
    cos: Vec<f32>,
    sin: Vec<f32>,
    ring: Vec<f32>,
    write_pos: usize,
    smoothed: Vec<f32>,
    bytes: Vec<u8>,
}

impl FrequencyAnalyser {
    pub fn new(size: usize) -> Self {
        let size = size.max(2);
        let n = size as f32;
        let window = (0..size)
            .map(|i| {
                let x = i as f32 / n;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();
        let cos = (0..size).map(|i| (2.0 * PI * i as f32 / n).cos()).collect();
        let sin = (0..size).map(|i| (2.0 * PI * i as f32 / n).sin()).collect();
        Self {
            size,
            window,
            cos,
            sin,
            ring: vec![0.0; size],
            write_pos: 0,
            smoothed: vec![0.0; size / 2],
            bytes: vec![0; size / 2],
        }
    }

    pub fn bin_count(&self) -> usize {
        self.size / 2
    }

    pub fn push_samples(&mut self, pcm: &[f32]) {
        let pcm = if pcm.len() > self.size { &pcm[pcm.len() - self.size..] } else { pcm };
        for &sample in pcm {
            self.ring[self.write_pos] = if sample.is_finite() { sample } else { 0.0 };
            self.write_pos = (self.write_pos + 1) % self.size;
        }
    }

    /// Recomputes the spectrum and returns one byte per bin.
    pub fn byte_frequency_data(&mut self) -> &[u8] {
        let n = self.size;
        let frame = (0..n)
            .map(|i| self.ring[(self.write_pos + i) % n] * self.window[i])
            .collect::<Vec<_>>();

        for k in 0..n / 2 {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (j, x) in frame.iter().enumerate() {
                let idx = (k * j) % n;
                re += x * self.cos[idx];
                im -= x * self.sin[idx];
            }
            let magnitude = (re * re + im * im).sqrt() / n as f32;
            let smoothed = SMOOTHING * self.smoothed[k] + (1.0 - SMOOTHING) * magnitude;
            self.smoothed[k] = smoothed;

            self.bytes[k] = if smoothed > 0.0 {
                let db = 20.0 * smoothed.log10();
                (255.0 * (db - MIN_DB) / (MAX_DB - MIN_DB)).clamp(0.0, 255.0) as u8
            } else {
                0
            };
        }
        &self.bytes
    }

    /// Mean of the byte spectrum, in `0.0..=255.0`.
    pub fn average_energy(&mut self) -> f32 {
        let bins = self.byte_frequency_data();
        if bins.is_empty() {
            return 0.0;
        }
        bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32
    }

    pub fn reset(&mut self) {
        self.ring.fill(0.0);
        self.smoothed.fill(0.0);
        self.bytes.fill(0);
        self.write_pos = 0;
    }
}

impl Default for FrequencyAnalyser {
    fn default() -> Self {
        Self::new(FFT_SIZE)
    }
}

#[cfg(test)]
pub(crate) fn noise(len: usize, amplitude: f32, seed: u32) -> Vec<f32> {
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state as f32 / u32::MAX as f32 * 2.0 - 1.0) * amplitude
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_has_no_energy() {
        let mut analyser = FrequencyAnalyser::default();
        analyser.push_samples(&[0.0; FFT_SIZE]);
        assert_eq!(analyser.bin_count(), 128);
        assert_eq!(analyser.average_energy(), 0.0);
    }

    #[test]
    fn loud_noise_clears_speaking_threshold() {
        let mut analyser = FrequencyAnalyser::default();
        let mut energy = 0.0;
        for seed in 1..=4 {
            analyser.push_samples(&noise(FFT_SIZE, 0.5, seed));
            energy = analyser.average_energy();
        }
        assert!(energy > 30.0, "energy {energy}");
    }

    #[test]
    fn tone_peaks_at_its_bin() {
        let mut analyser = FrequencyAnalyser::default();
        let bin = 16;
        let tone = (0..FFT_SIZE)
            .map(|i| 0.5 * (2.0 * PI * bin as f32 * i as f32 / FFT_SIZE as f32).sin())
            .collect::<Vec<_>>();
        analyser.push_samples(&tone);
        let spectrum = analyser.byte_frequency_data().to_vec();
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by_key(|(_, v)| **v)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, bin);
        assert!(spectrum[bin] > spectrum[bin + 8]);
    }

    #[test]
    fn smoothing_decays_after_sound_stops() {
        let mut analyser = FrequencyAnalyser::default();
        analyser.push_samples(&noise(FFT_SIZE, 0.5, 7));
        let loud = analyser.average_energy();
        analyser.push_samples(&[0.0; FFT_SIZE]);
        let after = analyser.average_energy();
        assert!(after < loud);
        analyser.reset();
        assert_eq!(analyser.average_energy(), 0.0);
    }
}
