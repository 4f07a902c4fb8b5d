//! Heart-rate estimate from a raw ECG trace: lowpass, then count peaks.

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type, Q_BUTTERWORTH_F64};

use crate::{Error, Result};

pub const DEFAULT_CUTOFF_HZ: f64 = 2.5;

/// Second-order Butterworth lowpass run once over the whole trace.
pub fn lowpass(samples: &[f64], cutoff_hz: f64, sample_rate_hz: f64) -> Result<Vec<f64>> {
    // the cutoff has to sit under nyquist for the coefficients to exist
    let cutoff = cutoff_hz.min(sample_rate_hz * 0.45);
    let coeffs = Coefficients::<f64>::from_params(
        Type::LowPass,
        sample_rate_hz.hz(),
        cutoff.hz(),
        Q_BUTTERWORTH_F64,
    )
    .map_err(|e| Error::Config(format!("lowpass {cutoff_hz} Hz at {sample_rate_hz} Hz: {e:?}")))?;
    let mut filter = DirectForm1::<f64>::new(coeffs);
    let Some(&first) = samples.first() else {
        return Ok(vec![]);
    };
    // settle on the first value so the start of the trace does not ring
    for _ in 0..(sample_rate_hz as usize).max(1) {
        filter.run(first);
    }
    Ok(samples.iter().map(|&x| filter.run(x)).collect())
}

/// Indices of strict local maxima at or above `min_height`. A flat top
/// counts once, at its middle.
pub fn find_peaks(samples: &[f64], min_height: f64) -> Vec<usize> {
    let mut peaks = vec![];
    let mut i = 1;
    while i + 1 < samples.len() {
        if samples[i] > samples[i - 1] && samples[i] >= min_height {
            let mut j = i;
            while j + 1 < samples.len() && samples[j + 1] == samples[i] {
                j += 1;
            }
            if j + 1 < samples.len() && samples[j + 1] < samples[i] {
                peaks.push((i + j) / 2);
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }
    peaks
}

/// Halfway between the mean and the maximum. Filter ringing near the
/// baseline stays under it.
fn beat_threshold(filtered: &[f64]) -> f64 {
    if filtered.is_empty() {
        return 0.0;
    }
    let mean = filtered.iter().sum::<f64>() / filtered.len() as f64;
    let max = filtered.iter().cloned().fold(f64::MIN, f64::max);
    mean + (max - mean) / 2.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartRate {
    pub filtered: Vec<f64>,
    pub peaks: Vec<usize>,
    pub beats_per_minute: f64,
}

pub fn estimate_heart_rate(
    ecg: &[f64],
    sample_rate_hz: f64,
    duration_secs: f64,
    cutoff_hz: f64,
) -> Result<HeartRate> {
    let filtered = lowpass(ecg, cutoff_hz, sample_rate_hz)?;
    let peaks = find_peaks(&filtered, beat_threshold(&filtered));
    let beats_per_minute = if duration_secs > 0.0 {
        peaks.len() as f64 * 60.0 / duration_secs
    } else {
        0.0
    };
    Ok(HeartRate {
        filtered,
        peaks,
        beats_per_minute,
    })
}
