/// Integration tests for the cry detector
///
/// Tests end-to-end cry detection with synthetic audio.

use cry_detector::{
    Classification, ClassifierError, ClassifierKind, CryClassifier, CryDetectionService, CryDetector, CryEvent,
    DetectorConfig, DetectorError, LogisticModel, MfccConfig, ModelClassifier, WindowConfig, SAMPLE_RATE,
};
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Generate synthetic audio tone
fn generate_tone(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<i16> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;

    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let sample = amplitude * (2.0 * PI * frequency * t).sin();
            (sample * i16::MAX as f32) as i16
        })
        .collect()
}

/// Generate deterministic broadband noise, a rough stand-in for crying
fn generate_noise(duration_secs: f32, amplitude: f32) -> Vec<i16> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    let mut state: u32 = 0x1234_5678;

    (0..num_samples)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let uniform = (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0;
            (uniform * amplitude * i16::MAX as f32) as i16
        })
        .collect()
}

fn silence(duration_secs: f32) -> Vec<i16> {
    vec![0; (SAMPLE_RATE as f32 * duration_secs) as usize]
}

/// Logistic model that fires on the DC cepstral term of loud audio
///
/// Digital silence sits near -113 on that coefficient, noise well above -60.
fn energy_model() -> LogisticModel {
    let mut weights = vec![0.0; 13];
    weights[0] = 0.1;
    LogisticModel::new(weights, 6.0).expect("valid model")
}

fn kinds(events: &[CryEvent]) -> Vec<bool> {
    events.iter().map(CryEvent::is_started).collect()
}

/// Fake classifier that takes a fixed time per window
struct SlowClassifier {
    delay: Duration,
}

impl CryClassifier for SlowClassifier {
    fn classify(&self, window: &[i16]) -> Result<Classification, ClassifierError> {
        std::thread::sleep(self.delay);
        Ok(Classification::new(window.iter().any(|&s| s != 0), 0.9))
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

#[test]
fn test_reference_scenario_amplitude() {
    let config = DetectorConfig::default();
    assert_eq!(config.window.window_samples, 24_000);
    assert_eq!(config.window.hop_samples, 8_000);
    assert_eq!(config.classifier, ClassifierKind::Amplitude { threshold: 10_000 });

    let mut detector = CryDetector::new(&config).expect("Failed to create detector");

    let mut events = detector.process_audio(&vec![0; 24_000]);
    assert!(events.is_empty());

    // Overlapping windows reaching into the loud chunk turn positive
    events.extend(detector.process_audio(&vec![15_000; 24_000]));
    assert_eq!(events.len(), 1);
    match events[0] {
        CryEvent::Started { confidence, .. } => assert!((confidence - 0.8).abs() < 1e-6),
        _ => panic!("Expected Started event"),
    }

    events.extend(detector.process_audio(&vec![0; 24_000]));
    // Only one fully silent window so far: counter 5 -> 4, still crying
    assert_eq!(events.len(), 1);
    assert!(detector.is_cry_detected());

    // End of stream drains the silent overlap: counter 4 -> 3 -> 2
    events.extend(detector.finish());
    assert_eq!(kinds(&events), vec![true, false]);
    assert_eq!(detector.stats().windows_processed, 9);
    assert!(!detector.is_cry_detected());
    assert!((detector.last_confidence() - 0.2).abs() < 1e-6);
}

#[tokio::test]
async fn test_reference_scenario_through_service() {
    let service = CryDetectionService::start(DetectorConfig::default())
        .await
        .expect("Failed to start service");
    let mut events = service.subscribe();

    for amplitude in [0i16, 15_000, 0] {
        service.on_audio_chunk(vec![amplitude; 24_000]).await.unwrap();
    }
    service.finish().await.unwrap();
    service.shutdown().await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.recv().await {
        received.push(event);
    }

    assert_eq!(kinds(&received), vec![true, false]);
    if let CryEvent::Stopped { duration_ms, .. } = received[1] {
        assert!(duration_ms < 60_000);
    }
}

#[tokio::test]
async fn test_no_false_positives_on_silence() {
    let service = CryDetectionService::start(DetectorConfig::default()).await.unwrap();
    let mut events = service.subscribe();

    for chunk in silence(5.0).chunks(512) {
        service.on_audio_chunk(chunk.to_vec()).await.unwrap();
    }
    service.finish().await.unwrap();

    let status = service.status();
    assert!(!status.is_cry_detected);
    assert_eq!(status.stats.positive_windows, 0);
    assert!(status.stats.windows_processed > 0);
    assert!(events.try_recv().is_err());

    service.shutdown().await.unwrap();
}

#[test]
fn test_quiet_speech_below_threshold() {
    let mut detector = CryDetector::new(&DetectorConfig::default()).unwrap();

    // Peak 0.25 * 32767 ~ 8191, under the 10000 threshold
    let mut audio = generate_tone(300.0, 2.0, 0.25);
    audio.extend(generate_tone(500.0, 2.0, 0.2));

    let mut events = Vec::new();
    for chunk in audio.chunks(1600) {
        events.extend(detector.process_audio(chunk));
    }

    assert!(events.is_empty());
    assert_eq!(detector.stats().positive_windows, 0);
}

#[test]
fn test_model_pipeline_detects_noise_burst() {
    let dir = TempDir::new().unwrap();
    let model_path = dir.path().join("cry_model.json");
    energy_model().save(&model_path).unwrap();

    let config = DetectorConfig {
        classifier: ClassifierKind::Model { model_path },
        ..Default::default()
    };
    let mut detector = CryDetector::new(&config).expect("Failed to create detector");

    let mut audio = silence(3.0);
    audio.extend(generate_noise(3.0, 0.3));
    audio.extend(silence(3.0));

    let mut events = Vec::new();
    for chunk in audio.chunks(1000) {
        events.extend(detector.process_audio(chunk));
    }
    events.extend(detector.finish());

    assert_eq!(kinds(&events), vec![true, false]);
    match events[0] {
        CryEvent::Started { confidence, .. } => assert!(confidence > 0.5),
        _ => panic!("Expected Started event"),
    }
    assert_eq!(detector.stats().classification_failures, 0);
}

#[tokio::test]
async fn test_missing_model_fails_service_start() {
    let dir = TempDir::new().unwrap();
    let config = DetectorConfig {
        classifier: ClassifierKind::Model {
            model_path: dir.path().join("absent.json"),
        },
        ..Default::default()
    };

    let result = CryDetectionService::start(config).await;
    assert!(matches!(
        result,
        Err(DetectorError::Classifier(ClassifierError::ModelNotFound(_)))
    ));
}

#[tokio::test]
async fn test_sessions_share_model() {
    let model = Arc::new(energy_model());
    let config = DetectorConfig::default();

    let mut audio = silence(1.0);
    audio.extend(generate_noise(3.0, 0.3));
    audio.extend(silence(3.0));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let classifier = ModelClassifier::with_model(Arc::clone(&model), MfccConfig::default()).unwrap();
        let service = CryDetectionService::with_classifier(config.clone(), Arc::new(classifier))
            .await
            .unwrap();
        let audio = audio.clone();

        handles.push(tokio::spawn(async move {
            let mut events = service.subscribe();
            for chunk in audio.chunks(2048) {
                service.on_audio_chunk(chunk.to_vec()).await.unwrap();
            }
            service.finish().await.unwrap();
            service.shutdown().await.unwrap();

            let mut received = Vec::new();
            while let Ok(event) = events.recv().await {
                received.push(event.is_started());
            }
            received
        }));
    }

    let first = handles.remove(0).await.unwrap();
    let second = handles.remove(0).await.unwrap();
    assert_eq!(first, vec![true, false]);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_reset_matches_fresh_service() {
    let mut audio = generate_tone(440.0, 1.0, 0.1);
    audio.extend(generate_tone(440.0, 3.0, 0.6));
    audio.extend(silence(3.0));

    let used = CryDetectionService::start(DetectorConfig::default()).await.unwrap();
    used.on_audio_chunk(generate_tone(600.0, 2.5, 0.7)).await.unwrap();
    used.reset().await.unwrap();

    let fresh = CryDetectionService::start(DetectorConfig::default()).await.unwrap();

    let mut outcomes = Vec::new();
    for service in [used, fresh] {
        let mut events = service.subscribe();
        for chunk in audio.chunks(4000) {
            service.on_audio_chunk(chunk.to_vec()).await.unwrap();
        }
        service.finish().await.unwrap();
        let status = service.status();
        service.shutdown().await.unwrap();

        let mut received = Vec::new();
        while let Ok(event) = events.recv().await {
            received.push(event.is_started());
        }
        outcomes.push((received, status.stats.windows_processed, status.is_cry_detected));
    }

    assert_eq!(outcomes[0], outcomes[1]);
    assert_eq!(outcomes[0].0, vec![true, false]);
}

#[tokio::test]
async fn test_cancelled_ingest_applies_nothing() {
    let config = DetectorConfig {
        window: WindowConfig {
            window_samples: 100,
            hop_samples: 100,
        },
        queue_capacity: 1,
        ..Default::default()
    };
    let classifier = Arc::new(SlowClassifier {
        delay: Duration::from_millis(200),
    });
    let service = CryDetectionService::with_classifier(config, classifier).await.unwrap();

    // First chunk keeps the worker busy, second fills the queue
    service.on_audio_chunk(vec![1; 100]).await.unwrap();
    service.on_audio_chunk(vec![1; 100]).await.unwrap();

    let cancelled = tokio::time::timeout(Duration::from_millis(20), service.on_audio_chunk(vec![1; 100])).await;
    assert!(cancelled.is_err());
    assert!(matches!(
        service.try_on_audio_chunk(vec![1; 100]),
        Err(DetectorError::QueueFull)
    ));

    service.drain().await.unwrap();
    assert_eq!(service.status().stats.windows_processed, 2);

    service.shutdown().await.unwrap();
}

#[test]
fn test_wav_file_pipeline() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nursery.wav");

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let mut audio = silence(1.0);
    audio.extend(generate_tone(450.0, 3.0, 0.6));
    audio.extend(silence(3.0));
    for sample in &audio {
        writer.write_sample(*sample).unwrap();
    }
    writer.finalize().unwrap();

    let samples = cry_detector::read_wav_mono(&path, SAMPLE_RATE as u32).unwrap();
    assert_eq!(samples, audio);

    let mut detector = CryDetector::new(&DetectorConfig::default()).unwrap();
    let mut events = Vec::new();
    for chunk in samples.chunks(1024) {
        events.extend(detector.process_audio(chunk));
    }
    events.extend(detector.finish());

    assert_eq!(kinds(&events), vec![true, false]);
}

#[tokio::test]
async fn test_processing_keeps_up_with_realtime() {
    let dir = TempDir::new().unwrap();
    let model_path = dir.path().join("cry_model.json");
    energy_model().save(&model_path).unwrap();

    let config = DetectorConfig {
        classifier: ClassifierKind::Model { model_path },
        ..Default::default()
    };
    let service = CryDetectionService::start(config).await.unwrap();

    let audio = generate_noise(10.0, 0.2);
    let start = Instant::now();

    for chunk in audio.chunks(512) {
        service.on_audio_chunk(chunk.to_vec()).await.unwrap();
    }
    service.drain().await.unwrap();

    let elapsed = start.elapsed();
    let status = service.status();

    println!("Latency test:");
    println!("  Total time: {:?}", elapsed);
    println!("  Windows processed: {}", status.stats.windows_processed);

    // 10 seconds of audio should be processed well within real time
    assert!(elapsed < Duration::from_secs(10), "Processing too slow: {:?}", elapsed);
    assert!(status.stats.windows_processed >= 18);

    service.shutdown().await.unwrap();
}
