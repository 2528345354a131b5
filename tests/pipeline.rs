//! Offline integration tests: the whole enhance → extract → query flow with
//! a scripted transport and a recording sleeper. No network, no real waits.

use async_trait::async_trait;
use image::{GrayImage, Luma, RgbImage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rxparse::pipeline::client::GenerateRequest;
use rxparse::{
    enhance_folder, extract_folder, load_table, BatchProgressCallback, EnhanceConfig,
    ExtractionClient, ExtractionConfig, ImageError, NoopProgressCallback, SearchField, Sleeper,
    Transport, TransportError,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Replies in order and counts requests.
struct Scripted {
    replies: Mutex<VecDeque<Result<String, TransportError>>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(replies: Vec<Result<String, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn generate(&self, _request: &GenerateRequest) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(TransportError::Network("script exhausted".into())))
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<Duration>>);

#[async_trait]
impl Sleeper for Recorder {
    async fn sleep(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

#[derive(Default)]
struct Events {
    started: AtomicUsize,
    ok: AtomicUsize,
    failed: AtomicUsize,
    pauses: AtomicUsize,
}

impl BatchProgressCallback for Events {
    fn on_image_start(&self, _i: usize, _t: usize, _f: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_image_complete(&self, _i: usize, _t: usize, _f: &str) {
        self.ok.fetch_add(1, Ordering::SeqCst);
    }
    fn on_image_error(&self, _i: usize, _t: usize, _f: &str, _e: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_pause(&self, _s: f64) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn write_scan(path: &Path, w: u32, h: u32) {
    let img = RgbImage::from_fn(w, h, |x, y| {
        let v = if (x / 6 + y / 6) % 2 == 0 { 40 } else { 210 };
        image::Rgb([v, v.saturating_add(10), v])
    });
    img.save(path).unwrap();
}

fn fast_enhance() -> EnhanceConfig {
    EnhanceConfig {
        denoise_patch: 3,
        denoise_search: 5,
        ..EnhanceConfig::default()
    }
}

fn extraction_config(out: &Path) -> ExtractionConfig {
    ExtractionConfig::builder()
        .output_dir(out)
        .initial_backoff(Duration::from_secs(5))
        .pacing(Duration::from_secs(20), Duration::from_secs(40))
        .build()
        .unwrap()
}

const JANE: &str = r#"Sure, here is the data:
```json
{
  "Patient Name": "Jane Doe",
  "Doctor Name": "Dr. Mehta",
  "Date": "2024-02-11",
  "Medications": [
    {"Name": "Amoxicillin", "Dosage": "500mg", "Frequency": "BD", "Duration": "5 days"}
  ],
  "Special Instructions": null
}
```"#;

const NULL_PATIENT: &str = r#"{"Patient Name": null, "Doctor Name": "Dr. Jane Smith", "Date": null, "Medications": null, "Special Instructions": "after food"}"#;

// ── Enhancement ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn enhance_folder_resizes_and_keeps_names() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("scans");
    let output = root.path().join("clean");
    std::fs::create_dir(&input).unwrap();
    write_scan(&input.join("wide.png"), 120, 60);
    write_scan(&input.join("tall.png"), 60, 90);
    std::fs::write(input.join("broken.png"), b"not an image").unwrap();
    std::fs::write(input.join("readme.txt"), b"skip me").unwrap();

    let config = EnhanceConfig {
        target_width: 40,
        ..fast_enhance()
    };
    let events = Events::default();
    let summary = enhance_folder(&input, &output, &config, None, &events)
        .await
        .unwrap();

    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.failed(), 1);
    assert!(matches!(summary.failures[0], ImageError::DecodeFailed { .. }));
    assert!(!output.join("broken.png").exists());
    assert_eq!(events.started.load(Ordering::SeqCst), 3);

    let wide = image::open(output.join("wide.png")).unwrap();
    assert_eq!((wide.width(), wide.height()), (40, 20));
    let tall = image::open(output.join("tall.png")).unwrap();
    assert_eq!((tall.width(), tall.height()), (40, 60));
    assert!(summary.report.is_empty());
}

#[tokio::test]
async fn enhance_folder_missing_input_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let err = enhance_folder(
        &root.path().join("nope"),
        &root.path().join("out"),
        &fast_enhance(),
        None,
        &NoopProgressCallback,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("nope"));
}

#[tokio::test]
async fn enhanced_output_is_single_channel() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("in");
    std::fs::create_dir(&input).unwrap();
    write_scan(&input.join("rx.png"), 32, 32);

    let config = EnhanceConfig {
        target_width: 32,
        ..fast_enhance()
    };
    enhance_folder(&input, &root.path().join("out"), &config, None, &NoopProgressCallback)
        .await
        .unwrap();

    let out = image::open(root.path().join("out/rx.png")).unwrap();
    assert!(matches!(out, image::DynamicImage::ImageLuma8(_)));
}

// ── Extraction ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn extract_folder_counts_each_failure_kind() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("in");
    let out = root.path().join("records");
    std::fs::create_dir(&input).unwrap();
    for name in ["a.jpg", "b.jpg", "c.jpg", "d.jpg"] {
        let g = GrayImage::from_pixel(4, 4, Luma([128]));
        g.save(input.join(name)).unwrap();
    }

    // a: prose-wrapped JSON, b: no JSON, c: malformed, d: five failures.
    let transport = Scripted::new(vec![
        Ok(JANE.into()),
        Ok("I'm unable to read this prescription.".into()),
        Ok("{\"Patient Name\": \"Bob\", }".into()),
        Err(TransportError::RateLimited),
        Err(TransportError::RateLimited),
        Err(TransportError::Status {
            status: 500,
            body: "oops".into(),
        }),
        Err(TransportError::Network("reset".into())),
        Err(TransportError::RateLimited),
    ]);
    let sleeper = Arc::new(Recorder::default());
    let client = ExtractionClient::new(transport.clone(), sleeper.clone(), extraction_config(&out));
    let events = Events::default();
    let mut rng = StdRng::seed_from_u64(42);

    let tally = extract_folder(&input, &client, &mut rng, &events)
        .await
        .unwrap();

    assert_eq!(tally.succeeded, 1);
    assert_eq!(tally.no_json, 1);
    assert_eq!(tally.malformed_json, 1);
    assert_eq!(tally.retries_exhausted, 1);
    assert_eq!(tally.failed(), 3);
    assert_eq!(tally.summary_line(), "Finished. Successful: 1, Failed: 3");
    assert_eq!(transport.calls.load(Ordering::SeqCst), 8);

    assert!(out.join("a.json").exists());
    for stem in ["b", "c", "d"] {
        assert!(!out.join(format!("{stem}.json")).exists(), "{stem}");
    }

    // Pauses after a, b and c, then d's 5/10/20/40 s backoff, then d's pause.
    let sleeps = sleeper.0.lock().unwrap().clone();
    assert_eq!(sleeps.len(), 8);
    let backoff: Vec<u64> = sleeps[3..7].iter().map(|d| d.as_secs()).collect();
    assert_eq!(backoff, vec![5, 10, 20, 40]);
    for pause in sleeps[..3].iter().chain(&sleeps[7..]) {
        assert!(*pause >= Duration::from_secs(20) && *pause <= Duration::from_secs(40));
    }
    assert_eq!(events.pauses.load(Ordering::SeqCst), 4);
    assert_eq!(events.ok.load(Ordering::SeqCst), 1);
    assert_eq!(events.failed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rate_limit_then_success_doubles_backoff() {
    let root = tempfile::tempdir().unwrap();
    let out = root.path().join("records");
    let transport = Scripted::new(vec![
        Err(TransportError::RateLimited),
        Err(TransportError::RateLimited),
        Err(TransportError::RateLimited),
        Ok(NULL_PATIENT.into()),
    ]);
    let sleeper = Arc::new(Recorder::default());
    let client = ExtractionClient::new(transport.clone(), sleeper.clone(), extraction_config(&out));

    let answer = client.request_extraction("rx.jpg", b"img").await.unwrap();
    assert_eq!(answer, NULL_PATIENT);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        *sleeper.0.lock().unwrap(),
        vec![
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(20)
        ]
    );
}

// ── Query ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn extracted_records_are_searchable() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("in");
    let out = root.path().join("records");
    std::fs::create_dir(&input).unwrap();
    for name in ["rx_01.jpg", "rx_02.jpg"] {
        std::fs::write(input.join(name), b"jpeg bytes").unwrap();
    }

    let transport = Scripted::new(vec![Ok(JANE.into()), Ok(NULL_PATIENT.into())]);
    let sleeper = Arc::new(Recorder::default());
    let client = ExtractionClient::new(transport, sleeper, extraction_config(&out));
    let mut rng = StdRng::seed_from_u64(1);
    let tally = extract_folder(&input, &client, &mut rng, &NoopProgressCallback)
        .await
        .unwrap();
    assert_eq!(tally.succeeded, 2);

    // Saved with a 4-space indent and explicit nulls.
    let saved = std::fs::read_to_string(out.join("rx_01.json")).unwrap();
    assert!(saved.contains("\n    \"Patient Name\": \"Jane Doe\""));
    assert!(saved.contains("\"Special Instructions\": null"));

    let table = load_table(&out).unwrap();
    assert_eq!(table.len(), 2);

    let hits = table.search(SearchField::PatientName, "jane");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file, "rx_01.json");

    // "jane" also appears in rx_02, but only under Doctor Name.
    let hits = table.search(SearchField::DoctorName, "JANE");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file, "rx_02.json");

    let hits = table.search(SearchField::Medications, "amoxicillin");
    assert_eq!(hits.len(), 1);

    let err = table.search_by_name("patient name", "jane").unwrap_err();
    assert!(err.to_string().contains("Patient Name, Doctor Name, Date"));
}
