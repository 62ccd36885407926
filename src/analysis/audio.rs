//! Audio quality analysis over sampled waveform statistics.
//!
//! Checks performed on a window of periodically sampled frames:
//! - presence (silence detection against a configurable floor)
//! - volume range (too quiet / too loud)
//! - clipping/distortion (average clipped-sample ratio)
//! - mono/stereo (inter-channel correlation; near 1.0 means the channels
//!   are effectively identical, i.e. mono)
//! - noise floor (mean of the quietest quintile of samples)
//!
//! The browser side is instrumented by injecting [`AUDIO_MONITOR_SCRIPT`]
//! before navigation: it patches `AudioContext`, routes everything headed
//! for the destination through an analyser chain, and accumulates frame
//! statistics in `window.__audioMonitor`. The engine reads them back with
//! [`MONITOR_DUMP_SCRIPT`] through the surface's `evaluate`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::surface::UiSurface;

/// JavaScript injected before navigation: patches `AudioContext` and
/// samples RMS/peak/clipping/channel statistics every 200 ms.
pub const AUDIO_MONITOR_SCRIPT: &str = r#"
(() => {
  if (window.__audioMonitorInjected) return;
  window.__audioMonitorInjected = true;
  window.__audioMonitor = { active: false, samples: [], channelCount: 0, sampleRate: 0, contextCount: 0, error: null };

  const Orig = window.AudioContext || window.webkitAudioContext;
  if (!Orig) { window.__audioMonitor.error = 'AudioContext not supported'; return; }
  const origConnect = AudioNode.prototype.connect;

  const Patched = function(...args) {
    const ctx = new Orig(...args);
    const mon = window.__audioMonitor;
    mon.sampleRate = ctx.sampleRate;
    mon.channelCount = ctx.destination.channelCount;
    mon.active = true;
    mon.contextCount += 1;

    const main = ctx.createAnalyser(); main.fftSize = 2048;
    const splitter = ctx.createChannelSplitter(2);
    const left = ctx.createAnalyser(); left.fftSize = 2048;
    const right = ctx.createAnalyser(); right.fftSize = 2048;
    const input = ctx.createGain();
    input.connect(main); input.connect(splitter);
    splitter.connect(left, 0); splitter.connect(right, 1);
    input.connect(ctx.destination);

    AudioNode.prototype.connect = function(dest, ...rest) {
      if (dest === ctx.destination) return origConnect.call(this, input, ...rest);
      return origConnect.call(this, dest, ...rest);
    };

    const len = main.frequencyBinCount;
    const dm = new Float32Array(len), dl = new Float32Array(len), dr = new Float32Array(len);
    setInterval(() => {
      if (ctx.state !== 'running') return;
      main.getFloatTimeDomainData(dm);
      left.getFloatTimeDomainData(dl);
      right.getFloatTimeDomainData(dr);
      let sq = 0, peak = 0, clip = 0, sqL = 0, sqR = 0, lr = 0;
      for (let i = 0; i < len; i++) {
        const v = dm[i]; sq += v * v;
        const av = Math.abs(v);
        if (av > peak) peak = av;
        if (av >= 0.95) clip++;
        sqL += dl[i] * dl[i]; sqR += dr[i] * dr[i]; lr += dl[i] * dr[i];
      }
      const rms = Math.sqrt(sq / len);
      const den = Math.sqrt(sqL * sqR);
      mon.samples.push({
        rms,
        rmsDb: rms > 0 ? 20 * Math.log10(rms) : -100,
        peak,
        peakDb: peak > 0 ? 20 * Math.log10(peak) : -100,
        clipRatio: clip / len,
        rmsL: Math.sqrt(sqL / len),
        rmsR: Math.sqrt(sqR / len),
        correlation: den > 0 ? lr / den : 0
      });
      if (mon.samples.length > 200) mon.samples.shift();
    }, 200);
    return ctx;
  };
  Patched.prototype = Orig.prototype;
  window.AudioContext = Patched;
  if (window.webkitAudioContext) window.webkitAudioContext = Patched;
})();
"#;

/// Script clearing accumulated samples at the start of a window.
pub const MONITOR_RESET_SCRIPT: &str =
    "window.__audioMonitor && (window.__audioMonitor.samples = [])";

/// Script dumping the monitor state as JSON.
pub const MONITOR_DUMP_SCRIPT: &str = r#"
(() => {
  const mon = window.__audioMonitor;
  if (!mon) return null;
  return {
    active: mon.active,
    sampleRate: mon.sampleRate,
    channelCount: mon.channelCount,
    contextCount: mon.contextCount,
    error: mon.error,
    samples: mon.samples
  };
})()
"#;

// ============================================================================
// Configuration
// ============================================================================

/// Volume thresholds in dBFS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    #[serde(default = "default_min_db")]
    pub min_db: f64,
    #[serde(default = "default_max_db")]
    pub max_db: f64,
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold_db: f64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            min_db: default_min_db(),
            max_db: default_max_db(),
            silence_threshold_db: default_silence_threshold(),
        }
    }
}

fn default_min_db() -> f64 {
    -40.0
}
fn default_max_db() -> f64 {
    -3.0
}
fn default_silence_threshold() -> f64 {
    -60.0
}

/// Clipping detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClippingConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Sample magnitude treated as clipped
    #[serde(default = "default_clip_threshold")]
    pub threshold: f64,
    /// Maximum tolerated average clipped-sample ratio
    #[serde(default = "default_clip_max_ratio")]
    pub max_ratio: f64,
}

impl Default for ClippingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_clip_threshold(),
            max_ratio: default_clip_max_ratio(),
        }
    }
}

fn default_enabled() -> bool {
    true
}
fn default_clip_threshold() -> f64 {
    0.95
}
fn default_clip_max_ratio() -> f64 {
    0.01
}

/// Stereo detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StereoConfig {
    #[serde(default = "default_enabled")]
    pub require_stereo: bool,
    /// Correlation at or above this is treated as effectively mono
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,
}

impl Default for StereoConfig {
    fn default() -> Self {
        Self {
            require_stereo: true,
            correlation_threshold: default_correlation_threshold(),
        }
    }
}

fn default_correlation_threshold() -> f64 {
    0.95
}

/// Full audio-check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Sampling window length in seconds
    #[serde(default = "default_duration")]
    pub duration: f64,
    /// Sampling interval in seconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval: f64,
    #[serde(default)]
    pub volume: VolumeConfig,
    #[serde(default)]
    pub clipping: ClippingConfig,
    #[serde(default)]
    pub stereo: StereoConfig,
    #[serde(default = "default_noise_floor")]
    pub noise_floor_db: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration: default_duration(),
            sample_interval: default_sample_interval(),
            volume: VolumeConfig::default(),
            clipping: ClippingConfig::default(),
            stereo: StereoConfig::default(),
            noise_floor_db: default_noise_floor(),
        }
    }
}

fn default_duration() -> f64 {
    5.0
}
fn default_sample_interval() -> f64 {
    0.2
}
fn default_noise_floor() -> f64 {
    -55.0
}

/// Deep-merge two JSON values: `over` wins, objects merge recursively.
pub fn deep_merge(base: serde_json::Value, over: serde_json::Value) -> serde_json::Value {
    match (base, over) {
        (serde_json::Value::Object(mut base), serde_json::Value::Object(over)) => {
            for (key, value) in over {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            serde_json::Value::Object(base)
        }
        (_, over) => over,
    }
}

/// Load the layered audio config for a profile folder: built-in defaults,
/// overridden by the catalog-wide `_default/audio_config.json`, overridden
/// by the profile's own `audio_config.json`.
pub fn load_audio_config(profile_dir: &Path, profiles_base_dir: Option<&Path>) -> AudioConfig {
    let mut merged = serde_json::to_value(AudioConfig::default())
        .unwrap_or(serde_json::Value::Null);

    let base_dir = profiles_base_dir
        .map(Path::to_path_buf)
        .or_else(|| profile_dir.parent().map(Path::to_path_buf));

    if let Some(base_dir) = base_dir {
        let default_path = base_dir.join("_default").join("audio_config.json");
        if let Ok(data) = fs::read_to_string(&default_path) {
            match serde_json::from_str(&data) {
                Ok(value) => merged = deep_merge(merged, value),
                Err(err) => warn!("[AudioAnalyzer] bad shared audio config: {}", err),
            }
        }
    }

    let game_path = profile_dir.join("audio_config.json");
    if let Ok(data) = fs::read_to_string(&game_path) {
        match serde_json::from_str(&data) {
            Ok(value) => {
                merged = deep_merge(merged, value);
                info!("[AudioAnalyzer] loaded profile audio config: {}", game_path.display());
            }
            Err(err) => warn!("[AudioAnalyzer] bad profile audio config: {}", err),
        }
    }

    serde_json::from_value(merged).unwrap_or_default()
}

// ============================================================================
// Probe data
// ============================================================================

/// One sampled frame of waveform statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFrame {
    /// Root-mean-square level, linear [0, 1]
    #[serde(default)]
    pub rms: f64,
    /// RMS level in dBFS (-100 = silent)
    #[serde(default = "default_floor_db")]
    pub rms_db: f64,
    /// Peak level, linear [0, 1]
    #[serde(default)]
    pub peak: f64,
    /// Peak level in dBFS
    #[serde(default = "default_floor_db")]
    pub peak_db: f64,
    /// Fraction of samples at or above the clip threshold
    #[serde(default)]
    pub clip_ratio: f64,
    /// Left-channel RMS
    #[serde(default)]
    pub rms_l: f64,
    /// Right-channel RMS
    #[serde(default)]
    pub rms_r: f64,
    /// Inter-channel correlation; 1.0 = channels identical
    #[serde(default)]
    pub correlation: f64,
}

fn default_floor_db() -> f64 {
    -100.0
}

/// The full monitor dump read back from the page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioProbe {
    /// Whether an AudioContext was ever constructed
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub sample_rate: f64,
    #[serde(default)]
    pub channel_count: u32,
    #[serde(default)]
    pub context_count: u32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, rename = "samples")]
    pub frames: Vec<AudioFrame>,
}

// ============================================================================
// Analysis
// ============================================================================

/// Result of one audio-quality analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioAnalysis {
    pub has_audio: bool,
    pub avg_volume_db: f64,
    pub peak_volume_db: f64,
    pub min_volume_db: f64,
    pub clipping_detected: bool,
    pub clipping_ratio: f64,
    pub is_stereo: bool,
    pub channel_correlation: f64,
    pub noise_floor_db: f64,
    pub sample_count: usize,
    /// Ordered issue descriptions; empty means in spec
    pub issues: Vec<String>,
}

impl Default for AudioAnalysis {
    fn default() -> Self {
        Self {
            has_audio: false,
            avg_volume_db: -100.0,
            peak_volume_db: -100.0,
            min_volume_db: -100.0,
            clipping_detected: false,
            clipping_ratio: 0.0,
            is_stereo: false,
            channel_correlation: 0.0,
            noise_floor_db: -100.0,
            sample_count: 0,
            issues: Vec::new(),
        }
    }
}

impl AudioAnalysis {
    /// In spec: audible and no issues recorded.
    pub fn passed(&self) -> bool {
        self.issues.is_empty() && self.has_audio
    }
}

/// Inject the audio monitor into the page (call before navigation).
pub fn inject_monitor(surface: &mut dyn UiSurface) -> bool {
    match surface.evaluate(AUDIO_MONITOR_SCRIPT) {
        Ok(_) => {
            info!("[AudioAnalyzer] monitor script injected");
            true
        }
        Err(err) => {
            warn!("[AudioAnalyzer] monitor injection failed: {}", err);
            false
        }
    }
}

/// Read the monitor dump back from the page.
///
/// `None` means the monitor itself is unreachable — distinct from an empty
/// or inactive probe.
pub fn collect_probe(surface: &mut dyn UiSurface) -> Option<AudioProbe> {
    match surface.evaluate(MONITOR_DUMP_SCRIPT) {
        Ok(serde_json::Value::Null) => None,
        Ok(value) => match serde_json::from_value(value) {
            Ok(probe) => Some(probe),
            Err(err) => {
                warn!("[AudioAnalyzer] malformed monitor dump: {}", err);
                None
            }
        },
        Err(err) => {
            warn!("[AudioAnalyzer] monitor dump failed: {}", err);
            None
        }
    }
}

/// Run a full analysis over the surface's accumulated sample window.
pub fn analyze(surface: &mut dyn UiSurface, config: &AudioConfig) -> AudioAnalysis {
    match collect_probe(surface) {
        Some(probe) => analyze_probe(&probe, config),
        None => {
            let mut result = AudioAnalysis::default();
            result
                .issues
                .push("audio monitor unavailable (no monitoring capability)".to_string());
            result
        }
    }
}

/// Analyze a collected probe against the configured thresholds.
pub fn analyze_probe(probe: &AudioProbe, config: &AudioConfig) -> AudioAnalysis {
    let mut result = AudioAnalysis {
        sample_count: probe.frames.len(),
        ..AudioAnalysis::default()
    };

    if !probe.active {
        result.issues.push(
            "no AudioContext detected (game may not use Web Audio)".to_string(),
        );
        return result;
    }

    if probe.frames.is_empty() {
        result
            .issues
            .push("no samples collected (audio may not be playing)".to_string());
        return result;
    }

    let frames = &probe.frames;

    // Volume over frames that registered any signal at all.
    let rms_dbs: Vec<f64> = frames
        .iter()
        .map(|f| f.rms_db)
        .filter(|db| *db > -100.0)
        .collect();

    if rms_dbs.is_empty() {
        result.has_audio = false;
        result.issues.push("no audio output at all (silent)".to_string());
    } else {
        result.has_audio = true;
        result.avg_volume_db = mean(&rms_dbs);
        result.min_volume_db = rms_dbs.iter().cloned().fold(f64::INFINITY, f64::min);
        result.peak_volume_db = frames
            .iter()
            .map(|f| f.peak_db)
            .filter(|db| *db > -100.0)
            .fold(-100.0, f64::max);

        let silence = config.volume.silence_threshold_db;
        if result.avg_volume_db < silence {
            result.has_audio = false;
            result.issues.push(format!(
                "average volume {:.1} dB below silence threshold {} dB",
                result.avg_volume_db, silence
            ));
        }

        if result.has_audio && result.avg_volume_db < config.volume.min_db {
            result.issues.push(format!(
                "volume too low: average {:.1} dB < minimum {} dB",
                result.avg_volume_db, config.volume.min_db
            ));
        }

        if result.peak_volume_db > config.volume.max_db {
            result.issues.push(format!(
                "volume too high: peak {:.1} dB > maximum {} dB",
                result.peak_volume_db, config.volume.max_db
            ));
        }
    }

    // Clipping on the average ratio across the window, not the peak: a
    // single hot frame is not distortion.
    if config.clipping.enabled {
        let ratios: Vec<f64> = frames.iter().map(|f| f.clip_ratio).collect();
        result.clipping_ratio = mean(&ratios);
        if result.clipping_ratio > config.clipping.max_ratio {
            result.clipping_detected = true;
            result.issues.push(format!(
                "clipping/distortion: ratio {:.4} > limit {}",
                result.clipping_ratio, config.clipping.max_ratio
            ));
        }
    }

    // Stereo over frames loud enough to carry channel information.
    let correlations: Vec<f64> = frames
        .iter()
        .filter(|f| f.rms > 0.001)
        .map(|f| f.correlation)
        .collect();
    if correlations.is_empty() {
        result.is_stereo = false;
    } else {
        result.channel_correlation = mean(&correlations);
        result.is_stereo = result.channel_correlation < config.stereo.correlation_threshold;
        if config.stereo.require_stereo && !result.is_stereo {
            result.issues.push(format!(
                "suspected mono: channel correlation {:.4} >= {} (1.0 = identical channels)",
                result.channel_correlation, config.stereo.correlation_threshold
            ));
        }
    }

    // Noise floor: mean of the quietest fifth of the window.
    if !rms_dbs.is_empty() {
        let mut sorted = rms_dbs.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let quintile = (sorted.len() / 5).max(1);
        result.noise_floor_db = mean(&sorted[..quintile]);
    }

    info!(
        "[AudioAnalyzer] avg={:.1}dB peak={:.1}dB clipping={} stereo={} issues={}",
        result.avg_volume_db,
        result.peak_volume_db,
        result.clipping_detected,
        result.is_stereo,
        result.issues.len()
    );
    result
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rms_db: f64, peak_db: f64, correlation: f64, clip_ratio: f64) -> AudioFrame {
        let rms = if rms_db <= -100.0 { 0.0 } else { 10f64.powf(rms_db / 20.0) };
        AudioFrame {
            rms,
            rms_db,
            peak: 10f64.powf(peak_db / 20.0),
            peak_db,
            clip_ratio,
            rms_l: rms,
            rms_r: rms,
            correlation,
        }
    }

    fn probe_with(frames: Vec<AudioFrame>) -> AudioProbe {
        AudioProbe {
            active: true,
            sample_rate: 48_000.0,
            channel_count: 2,
            context_count: 1,
            error: None,
            frames,
        }
    }

    #[test]
    fn test_healthy_stereo_audio_passes() {
        let frames = (0..25).map(|_| frame(-20.0, -6.0, 0.3, 0.0)).collect();
        let result = analyze_probe(&probe_with(frames), &AudioConfig::default());
        assert!(result.has_audio);
        assert!(result.is_stereo);
        assert!(!result.clipping_detected);
        assert!(result.passed(), "issues: {:?}", result.issues);
    }

    #[test]
    fn test_silence_detected() {
        // Every frame below the silence threshold.
        let frames = (0..25).map(|_| frame(-80.0, -75.0, 0.3, 0.0)).collect();
        let result = analyze_probe(&probe_with(frames), &AudioConfig::default());
        assert!(!result.has_audio);
        assert!(result.issues.iter().any(|i| i.contains("silence")));
    }

    #[test]
    fn test_fully_silent_frames() {
        let frames = (0..25).map(|_| frame(-100.0, -100.0, 0.0, 0.0)).collect();
        let result = analyze_probe(&probe_with(frames), &AudioConfig::default());
        assert!(!result.has_audio);
        assert!(result.issues.iter().any(|i| i.contains("silent")));
    }

    #[test]
    fn test_mono_detected_when_correlation_high() {
        let frames = (0..25).map(|_| frame(-20.0, -6.0, 0.999, 0.0)).collect();
        let result = analyze_probe(&probe_with(frames), &AudioConfig::default());
        assert!(!result.is_stereo);
        assert!(result.issues.iter().any(|i| i.contains("mono")));
    }

    #[test]
    fn test_stereo_detected_when_correlation_low() {
        let frames = (0..25).map(|_| frame(-20.0, -6.0, 0.0, 0.0)).collect();
        let result = analyze_probe(&probe_with(frames), &AudioConfig::default());
        assert!(result.is_stereo);
    }

    #[test]
    fn test_clipping_uses_average_not_peak() {
        // One hot frame out of 25: average ratio 0.008 stays under 0.01.
        let mut frames: Vec<AudioFrame> = (0..24).map(|_| frame(-20.0, -6.0, 0.3, 0.0)).collect();
        frames.push(frame(-20.0, -6.0, 0.3, 0.2));
        let result = analyze_probe(&probe_with(frames), &AudioConfig::default());
        assert!(!result.clipping_detected);

        // Sustained clipping trips the check.
        let frames: Vec<AudioFrame> = (0..25).map(|_| frame(-20.0, -6.0, 0.3, 0.05)).collect();
        let result = analyze_probe(&probe_with(frames), &AudioConfig::default());
        assert!(result.clipping_detected);
        assert!(result.issues.iter().any(|i| i.contains("clipping")));
    }

    #[test]
    fn test_issue_taxonomy_distinguishes_capability_and_silence() {
        let inactive = AudioProbe { active: false, ..AudioProbe::default() };
        let result = analyze_probe(&inactive, &AudioConfig::default());
        assert!(result.issues.iter().any(|i| i.contains("AudioContext")));

        let empty = probe_with(Vec::new());
        let result = analyze_probe(&empty, &AudioConfig::default());
        assert!(result.issues.iter().any(|i| i.contains("no samples")));
    }

    #[test]
    fn test_noise_floor_is_quietest_quintile() {
        let mut frames: Vec<AudioFrame> = (0..20).map(|_| frame(-20.0, -6.0, 0.3, 0.0)).collect();
        frames.extend((0..5).map(|_| frame(-50.0, -40.0, 0.3, 0.0)));
        let result = analyze_probe(&probe_with(frames), &AudioConfig::default());
        // 25 frames, quintile = 5, all five quiet ones at -50 dB.
        assert!((result.noise_floor_db + 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_deep_merge_overrides_nested_keys() {
        let base = serde_json::json!({"volume": {"min_db": -40.0, "max_db": -3.0}, "duration": 5.0});
        let over = serde_json::json!({"volume": {"min_db": -35.0}});
        let merged = deep_merge(base, over);
        assert_eq!(merged["volume"]["min_db"], -35.0);
        assert_eq!(merged["volume"]["max_db"], -3.0);
        assert_eq!(merged["duration"], 5.0);
    }

    #[test]
    fn test_layered_config_loading() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = dir.path();
        fs::create_dir_all(profiles.join("_default")).unwrap();
        fs::create_dir_all(profiles.join("JJBX")).unwrap();
        fs::write(
            profiles.join("_default/audio_config.json"),
            r#"{"volume": {"min_db": -45.0}}"#,
        )
        .unwrap();
        fs::write(
            profiles.join("JJBX/audio_config.json"),
            r#"{"volume": {"max_db": -6.0}, "stereo": {"require_stereo": false}}"#,
        )
        .unwrap();

        let config = load_audio_config(&profiles.join("JJBX"), Some(profiles));
        assert_eq!(config.volume.min_db, -45.0);
        assert_eq!(config.volume.max_db, -6.0);
        assert!(!config.stereo.require_stereo);
        // Untouched keys keep their defaults.
        assert_eq!(config.volume.silence_threshold_db, -60.0);
    }
}
