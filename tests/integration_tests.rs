//! Integration tests for the streaming tracker

use std::path::Path;
use std::sync::Arc;

use stratum_beat::features::FeatureExtractor;
use stratum_beat::{
    track_audio, Activation, EmissionParams, EmissionShape, EventKind, Tracker, TrackerConfig, TrackerError,
};

const SAMPLE_RATE: u32 = 22050;

/// Samples between clicks at 120 BPM (exactly 25 hops)
const CLICK_PERIOD: usize = 11025;

/// Unit impulses every `period` samples, starting at sample 0
fn click_track(seconds: usize, period: usize) -> Vec<f32> {
    let mut samples = vec![0.0f32; SAMPLE_RATE as usize * seconds];
    for s in (0..samples.len()).step_by(period) {
        samples[s] = 1.0;
    }
    samples
}

/// Write a mono float WAV file
fn write_wav(path: &Path, samples: &[f32]) -> Result<(), Box<dyn std::error::Error>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Load a WAV file and return (mono samples, sample_rate)
fn load_wav(path: &Path) -> Result<(Vec<f32>, u32), Box<dyn std::error::Error>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_value))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let mono = if spec.channels == 2 {
        samples.chunks(2).map(|c| (c[0] + c[1]) / 2.0).collect()
    } else {
        samples
    };
    Ok((mono, spec.sample_rate))
}

/// Hand-built emission parameters that act as a click detector
///
/// Conv channel 0 averages ten neighbouring features; after pooling, the
/// projection averages the windows lying entirely in the log band half of
/// the feature vector, i.e. the mean log magnitude of the frame. Unit 0 of
/// each LSTM layer passes that value through (input and output gates open,
/// forget gate closed, no recurrence) and the output layer turns it into a
/// sharp beat probability. Downbeats are never predicted.
fn click_detector_params() -> EmissionParams {
    let shape = EmissionShape::default();
    let mut p = EmissionParams::zeros(shape);
    let h = shape.hidden_size;

    for k in 0..shape.kernel_size {
        p.conv_weight[k] = 0.1;
    }

    // Channel 0 pooled windows 0..=62 cover conv outputs 0..=125, all inside
    // the first 136 features
    for j in 0..63 {
        p.proj_weight[j] = 1.0 / 63.0;
    }

    for (l, layer) in p.layers.iter_mut().enumerate() {
        let input_dim = shape.layer_input_dim(l);
        layer.bias_ih[0] = 20.0;
        layer.bias_ih[h] = -20.0;
        layer.bias_ih[3 * h] = 20.0;
        layer.weight_ih[2 * h * input_dim] = 1.0;
    }

    p.out_weight[0] = 40.0;
    p.out_bias.copy_from_slice(&[-7.6, -10.0, 0.0]);
    p
}

fn click_tracker(config: TrackerConfig) -> Tracker {
    Tracker::new(config, Arc::new(click_detector_params())).expect("valid tracker")
}

fn small_config() -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.filter.particle_size = 800;
    config.filter.down_particle_size = 150;
    config
}

#[test]
fn test_click_detector_activations() {
    let mut tracker = click_tracker(small_config());
    let samples = click_track(2, CLICK_PERIOD);

    let mut extractor = FeatureExtractor::new(&TrackerConfig::default().features).unwrap();
    let features = extractor.push(&samples);
    let mut model = stratum_beat::EmissionModel::new(Arc::new(click_detector_params()));
    let mut state = model.initial_state();
    let activations: Vec<Activation> = features
        .iter()
        .map(|f| model.infer_in_place(f, &mut state))
        .collect();

    // Click at frame 25 (1.0 s), its neighbours only see the window tails
    assert!(activations[25].beat > 0.9, "{:?}", activations[25]);
    assert!(activations[24].beat < 0.1 && activations[26].beat < 0.1);
    assert!(activations[12].beat < 0.01);
    for a in &activations {
        let sum = a.beat + a.downbeat + a.none;
        assert!((sum - 1.0).abs() < 1e-5);
    }

    // Driving the session from the feature entry point gives the same events
    for f in &features {
        tracker.process_features(f).unwrap();
    }
    let mut reference = click_tracker(small_config());
    reference.step(&samples);
    assert_eq!(tracker.events(), reference.events());
    assert_eq!(tracker.bpm(), reference.bpm());
}

#[test]
fn test_click_track_end_to_end_from_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("click_120bpm.wav");
    write_wav(&path, &click_track(12, CLICK_PERIOD)).unwrap();

    let (samples, sample_rate) = load_wav(&path).unwrap();
    assert_eq!(sample_rate, SAMPLE_RATE);

    let result = track_audio(&samples, Arc::new(click_detector_params()), TrackerConfig::default())
        .expect("tracking should succeed");

    assert!(
        (result.bpm - 120.0).abs() <= 120.0 * 0.03,
        "BPM should be close to 120, got {:.2}",
        result.bpm
    );
    assert_eq!(result.autocorr_bpm, 120.0);
    assert_eq!(result.metadata.sample_rate, SAMPLE_RATE);
    assert_eq!(result.metadata.frame_count, 599);
    assert!(result.metadata.duration_seconds > 11.9 && result.metadata.duration_seconds < 12.0);

    // Beats in the second half sit within one hop of a click
    let hop = 441.0 / SAMPLE_RATE as f64;
    let late: Vec<f64> = result.beat_grid.beats.iter().copied().filter(|&t| t >= 6.0).collect();
    assert!(late.len() >= 10, "only {} late beats", late.len());
    for t in &late {
        let nearest_click = (t / 0.5).round() * 0.5;
        assert!(
            (t - nearest_click).abs() <= hop + 1e-9,
            "beat at {:.3}s is {:.3}s from the nearest click",
            t,
            (t - nearest_click).abs()
        );
    }
    for pair in late.windows(2) {
        assert!((pair[1] - pair[0] - 0.5).abs() <= 2.0 * hop + 1e-9, "{:?}", pair);
    }
}

#[test]
fn test_output_does_not_depend_on_chunking() {
    let samples = click_track(4, CLICK_PERIOD);

    let mut whole = click_tracker(small_config());
    let whole_events = whole.step(&samples);
    let whole_result = whole.finish();
    assert!(!whole_events.is_empty());

    let mut chunked = click_tracker(small_config());
    let sizes = [1usize, 7, 441, 1000, 3, 2048, 440, 13];
    let mut chunked_events = Vec::new();
    let mut offset = 0;
    let mut i = 0;
    while offset < samples.len() {
        let end = (offset + sizes[i % sizes.len()]).min(samples.len());
        chunked_events.extend(chunked.step(&samples[offset..end]));
        offset = end;
        i += 1;
    }
    let chunked_result = chunked.finish();

    assert_eq!(chunked_events, whole_events);
    assert_eq!(chunked_result.events, whole_result.events);
    assert_eq!(chunked_result.bpm, whole_result.bpm);
    assert_eq!(chunked_result.metadata.frame_count, whole_result.metadata.frame_count);
}

#[test]
fn test_synthetic_activations_track_tempo_and_bars() {
    let mut tracker = Tracker::new(
        TrackerConfig::default(),
        Arc::new(EmissionParams::zeros(EmissionShape::default())),
    )
    .unwrap();

    for t in 0..750u64 {
        let activation = if t % 25 == 0 {
            let (beat, downbeat) = if (t / 25) % 4 == 0 { (0.15, 0.85) } else { (0.7, 0.3) };
            Activation {
                beat,
                downbeat,
                none: 0.0,
            }
        } else {
            Activation {
                beat: 0.1,
                downbeat: 0.1,
                none: 0.8,
            }
        };
        tracker.process_activation(activation);
    }

    let result = tracker.finish();
    assert!((result.bpm - 120.0).abs() <= 2.0, "bpm {}", result.bpm);
    assert_eq!(result.beats_per_bar, 4);

    let downbeats: Vec<u64> = result
        .events
        .iter()
        .filter(|e| e.kind == EventKind::Downbeat && e.frame_index >= 250)
        .map(|e| e.frame_index)
        .collect();
    assert!(downbeats.len() >= 4, "{:?}", downbeats);
    for pair in downbeats.windows(2) {
        let beats_apart = ((pair[1] - pair[0]) as f32 / 25.0).round() as i64;
        assert!((beats_apart - 4).abs() <= 1, "{:?}", downbeats);
    }
}

#[test]
fn test_same_seed_same_events() {
    let samples = click_track(4, CLICK_PERIOD);
    let mut config = small_config();
    config.filter.seed = 42;

    let mut a = click_tracker(config.clone());
    let mut b = click_tracker(config);
    a.step(&samples);
    b.step(&samples);
    assert_eq!(a.events(), b.events());
    assert_eq!(a.bpm(), b.bpm());

    // A restarted session replays the same stream
    let first = a.events().to_vec();
    a.start();
    a.step(&samples);
    assert_eq!(a.events(), &first[..]);
}

#[test]
fn test_config_json_round_trip() {
    let mut config = TrackerConfig::default();
    config.filter.seed = 7;
    config.filter.initial_bpm = Some(128.0);
    config.filter.observation_lambda_b = "gaussian:0.5".to_string();

    let json = serde_json::to_string_pretty(&config).unwrap();
    let back: TrackerConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
    assert!(back.validate().is_ok());

    // Missing fields fall back to the defaults
    let partial: TrackerConfig = serde_json::from_str(r#"{"filter": {"particle_size": 1000}}"#).unwrap();
    assert_eq!(partial.filter.particle_size, 1000);
    assert_eq!(partial.filter.down_particle_size, 400);
    assert_eq!(partial.features, TrackerConfig::default().features);
}

#[test]
fn test_invalid_inputs() {
    let params = Arc::new(click_detector_params());

    assert!(matches!(
        track_audio(&[], params.clone(), TrackerConfig::default()),
        Err(TrackerError::InvalidInput(_))
    ));

    let mut config = TrackerConfig::default();
    config.filter.observation_lambda_d = "B99".to_string();
    assert!(matches!(
        Tracker::new(config, params.clone()),
        Err(TrackerError::InvalidConfig(_))
    ));

    let mut config = TrackerConfig::default();
    config.features.hop_size = 2048;
    assert!(matches!(Tracker::new(config, params), Err(TrackerError::InvalidConfig(_))));
}

#[test]
fn test_shorter_than_one_window_yields_nothing() {
    let mut tracker = click_tracker(small_config());
    assert!(tracker.step(&click_track(0, CLICK_PERIOD)).is_empty());
    assert!(tracker.step(&[1.0; 700]).is_empty());
    assert_eq!(tracker.frame_count(), 0);
    assert_eq!(tracker.bpm(), 0.0);
}

/// Requires a trained bundle; set `BEAT_TRACKER_MODEL` to its path
#[test]
fn test_trained_model_click_track() {
    let path = match std::env::var("BEAT_TRACKER_MODEL") {
        Ok(p) => p,
        Err(_) => {
            eprintln!("BEAT_TRACKER_MODEL not set, skipping trained model test");
            return;
        }
    };

    let params = EmissionParams::from_safetensors(&path, EmissionShape::default()).expect("loadable model bundle");
    let result = track_audio(&click_track(30, CLICK_PERIOD), Arc::new(params), TrackerConfig::default())
        .expect("tracking should succeed");

    assert!(
        (result.bpm - 120.0).abs() <= 120.0 * 0.03,
        "BPM should be close to 120, got {:.2}",
        result.bpm
    );
    let hop = 441.0 / SAMPLE_RATE as f64;
    for t in result.beat_grid.beats.iter().filter(|&&t| t >= 15.0) {
        let nearest_click = (t / 0.5).round() * 0.5;
        assert!((t - nearest_click).abs() <= hop + 1e-9, "beat at {:.3}s", t);
    }
}
