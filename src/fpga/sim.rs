//! FPGA simulator.
//!
//! The simulator connects generator output 1 to both inputs. Input 1 sees the
//! output directly, and input 2 sees it through a one-pole low-pass filter
//! that plays the role of the device under test in a Bode sweep. Generator
//! output 2 and the PID controllers only store their configuration.

use super::{
    Edge, Fpga, GeneratorConfig, OscilloscopeConfig, PidConfig, TriggerMode, Waveform,
    ACQ_BUFFER_SAMPLES,
};
use crate::params::schema::{Channel, PidBlock};
use anyhow::Result;
use std::f64::consts::PI;

/// FPGA simulator.
#[derive(Debug)]
pub struct Simulator {
    oscilloscope: OscilloscopeConfig,
    generators: [GeneratorConfig; 2],
    pids: [PidConfig; 4],
    cutoff: f64,
    armed: bool,
    capture: Option<[Vec<f32>; 2]>,
}

impl Simulator {
    /// Creates a simulator whose device under test has a cutoff frequency of
    /// `cutoff` Hz.
    pub fn new(cutoff: f64) -> Simulator {
        Simulator {
            oscilloscope: OscilloscopeConfig::default(),
            generators: Default::default(),
            pids: Default::default(),
            cutoff,
            armed: false,
            capture: None,
        }
    }

    /// Returns the current oscilloscope configuration.
    pub fn oscilloscope(&self) -> &OscilloscopeConfig {
        &self.oscilloscope
    }

    /// Returns the current configuration of a generator channel.
    pub fn generator(&self, channel: Channel) -> &GeneratorConfig {
        &self.generators[channel.index()]
    }

    /// Returns the current configuration of a PID block.
    pub fn pid(&self, block: PidBlock) -> &PidConfig {
        &self.pids[block.index()]
    }

    /// Returns `true` if an acquisition is armed.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    // Generator output in V at time t in seconds.
    fn output(&self, channel: Channel, t: f64) -> f32 {
        let generator = &self.generators[channel.index()];
        if !generator.enable {
            return 0.0;
        }
        let cycles = f64::from(generator.frequency) * t;
        let wave = if generator.single && !(0.0..1.0).contains(&cycles) {
            0.0
        } else {
            let phase = cycles.rem_euclid(1.0) as f32;
            match generator.waveform {
                Waveform::Sine => (2.0 * std::f32::consts::PI * phase).sin(),
                Waveform::Square => {
                    if phase < 0.5 {
                        1.0
                    } else {
                        -1.0
                    }
                }
                Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
                Waveform::Sawtooth => 2.0 * phase - 1.0,
            }
        };
        (generator.amplitude * wave + generator.offset).clamp(-1.0, 1.0)
    }

    // Samples one buffer of warm-up, one buffer where the trigger is searched
    // and one buffer after it. Returns None if the trigger condition is never
    // met.
    fn acquire(&self) -> Option<[Vec<f32>; 2]> {
        let n = ACQ_BUFFER_SAMPLES;
        let samp_rate = self.oscilloscope.sample_rate();
        let alpha = 1.0 - (-2.0 * PI * self.cutoff / samp_rate).exp();
        let scales = Channel::ALL.map(|ch| self.oscilloscope.full_scale(ch));
        let mut inputs = [Vec::with_capacity(3 * n), Vec::with_capacity(3 * n)];
        let mut filtered = 0.0;
        for k in 0..3 * n {
            let t = (k as f64 - n as f64) / samp_rate;
            let x = f64::from(self.output(Channel::Ch1, t));
            filtered += alpha * (x - filtered);
            inputs[0].push((x as f32 / scales[0]).clamp(-1.0, 1.0));
            inputs[1].push((filtered as f32 / scales[1]).clamp(-1.0, 1.0));
        }

        let position = match self.trigger_position(&inputs, n..2 * n) {
            Some(position) => position,
            None if self.oscilloscope.trigger_mode == TriggerMode::Auto => n,
            None => return None,
        };
        let delay = (f64::from(self.oscilloscope.trigger_delay) * samp_rate * 1e-6).round();
        let start = (position as f64 + delay).clamp(0.0, (2 * n) as f64) as usize;
        Some(inputs.map(|samples| samples[start..start + n].to_vec()))
    }

    fn trigger_position(
        &self,
        inputs: &[Vec<f32>; 2],
        range: std::ops::Range<usize>,
    ) -> Option<usize> {
        let Some(channel) = self.oscilloscope.trigger_source.channel() else {
            // the external trigger input is always active
            return Some(range.start);
        };
        let samples = &inputs[channel.index()];
        let level = self.oscilloscope.trigger_level;
        range.filter(|&k| k > 0).find(|&k| {
            let (before, after) = (samples[k - 1], samples[k]);
            match self.oscilloscope.trigger_edge {
                Edge::Rising => before < level && after >= level,
                Edge::Falling => before > level && after <= level,
            }
        })
    }
}

impl Fpga for Simulator {
    fn configure_oscilloscope(&mut self, config: &OscilloscopeConfig) -> Result<()> {
        self.oscilloscope.clone_from(config);
        Ok(())
    }

    fn configure_generator(&mut self, channel: Channel, config: &GeneratorConfig) -> Result<()> {
        self.generators[channel.index()].clone_from(config);
        Ok(())
    }

    fn configure_pid(&mut self, block: PidBlock, config: &PidConfig) -> Result<()> {
        self.pids[block.index()].clone_from(config);
        Ok(())
    }

    fn start_acquisition(&mut self) -> Result<()> {
        self.armed = true;
        self.capture = self.acquire();
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<()> {
        self.armed = false;
        Ok(())
    }

    fn acquisition_done(&mut self) -> Result<bool> {
        if self.armed && self.capture.is_some() {
            self.armed = false;
            return Ok(true);
        }
        Ok(false)
    }

    fn read_samples(&mut self, channel: Channel, samples: &mut [f32]) -> Result<()> {
        let Some(capture) = &self.capture else {
            anyhow::bail!("no acquisition has completed");
        };
        let source = &capture[channel.index()];
        anyhow::ensure!(
            samples.len() <= source.len(),
            "cannot read {} samples from a buffer of {}",
            samples.len(),
            source.len()
        );
        samples.copy_from_slice(&source[..samples.len()]);
        Ok(())
    }
}
