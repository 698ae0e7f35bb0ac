//! Integration tests for the hardware queue and capture retry policy,
//! driven by a scripted stand-in for gphoto2.

use pilink_camera::{
    Camera, CameraError, CameraUtility, CaptureConfig, DeviceRequest, HardwareQueue, SettingsMap,
    UtilityOutput,
};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};
use tempfile::tempdir;

const BUSY: &str = "*** Error: Could not claim the USB device ***";

#[derive(Clone, Default)]
struct FakeGphoto {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    captures: Arc<Mutex<VecDeque<UtilityOutput>>>,
    in_flight: Arc<AtomicBool>,
    overlapped: Arc<AtomicBool>,
    hold: Arc<Mutex<Option<crossbeam_channel::Receiver<()>>>>,
}

impl FakeGphoto {
    fn script_captures(&self, outcomes: Vec<UtilityOutput>) {
        self.captures.lock().unwrap().extend(outcomes);
    }

    /// The next capture blocks until the returned sender is dropped.
    fn hold_next_capture(&self) -> crossbeam_channel::Sender<()> {
        let (release, hold) = crossbeam_channel::bounded(0);
        *self.hold.lock().unwrap() = Some(hold);
        release
    }

    fn wait_for_call(&self, prefix: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !self.invocations().iter().any(|c| c.starts_with(prefix)) {
            assert!(Instant::now() < deadline, "no {prefix} call");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    fn invocations(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.join(" ")).collect()
    }
}

fn ok(stdout: &str) -> UtilityOutput {
    UtilityOutput { success: true, stdout: stdout.into(), stderr: String::new() }
}

fn failed(stderr: &str) -> UtilityOutput {
    UtilityOutput { success: false, stdout: String::new(), stderr: stderr.into() }
}

impl CameraUtility for FakeGphoto {
    fn run(&self, args: &[&str], _timeout: Option<Duration>) -> pilink_camera::Result<UtilityOutput> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        std::thread::sleep(Duration::from_millis(2));
        self.calls.lock().unwrap().push(args.iter().map(|a| a.to_string()).collect());

        let out = match args[0] {
            "--auto-detect" => ok("Model                  Port\nCanon EOS 600D         usb:001,004\n"),
            "--get-config" => ok("Current: 100\nChoice: 0 100\nChoice: 1 200\n"),
            "--list-files" => ok("#1 IMG_0001.JPG\n#2 IMG_0002.CR2\n"),
            "--capture-image-and-download" => {
                let hold = self.hold.lock().unwrap().take();
                if let Some(hold) = hold {
                    let _ = hold.recv();
                }
                let scripted = self.captures.lock().unwrap().pop_front();
                scripted.unwrap_or_else(|| {
                    let target = args[2];
                    ok(&format!(
                        "Saving file as {}\nSaving file as {}\n",
                        target.replace("%C", "cr2"),
                        target.replace("%C", "jpg")
                    ))
                })
            }
            _ => ok(""),
        };

        self.in_flight.store(false, Ordering::SeqCst);
        Ok(out)
    }
}

/// Process-wide logger keeping every message for inspection.
struct Recorder(Mutex<Vec<String>>);

static RECORDER: Recorder = Recorder(Mutex::new(Vec::new()));

impl log::Log for Recorder {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        self.0.lock().unwrap().push(format!("{} {}", record.level(), record.args()));
    }

    fn flush(&self) {}
}

fn logged() -> Vec<String> {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        log::set_logger(&RECORDER).unwrap();
        log::set_max_level(log::LevelFilter::Debug);
    });
    RECORDER.0.lock().unwrap().clone()
}

fn settings_request(folder: PathBuf, iso: &str) -> DeviceRequest {
    let mut settings = BTreeMap::new();
    settings.insert("ISO".to_string(), iso.to_string());
    DeviceRequest { folder, settings }
}

#[test]
fn queued_requests_run_in_fifo_order_without_overlap() {
    let dir = tempdir().unwrap();
    let fake = FakeGphoto::default();
    let camera = Camera::new(fake.clone(), CaptureConfig::immediate());
    let queue = HardwareQueue::spawn(camera, SettingsMap::default()).unwrap();

    let handle = queue.handle();
    for iso in ["100", "200", "400", "800"] {
        handle.enqueue(settings_request(dir.path().to_path_buf(), iso)).unwrap();
    }
    queue.shutdown();

    let sets: Vec<String> = fake
        .invocations()
        .into_iter()
        .filter(|c| c.starts_with("--set-config"))
        .collect();
    assert_eq!(
        sets,
        vec![
            "--set-config /main/imgsettings/iso=100",
            "--set-config /main/imgsettings/iso=200",
            "--set-config /main/imgsettings/iso=400",
            "--set-config /main/imgsettings/iso=800",
        ]
    );
    assert!(!fake.overlapped.load(Ordering::SeqCst));
}

#[test]
fn concurrent_producers_never_overlap_on_the_device() {
    let dir = tempdir().unwrap();
    let fake = FakeGphoto::default();
    let camera = Camera::new(fake.clone(), CaptureConfig::immediate());
    let queue = HardwareQueue::spawn(camera, SettingsMap::default()).unwrap();

    let producers: Vec<_> = (0..4)
        .map(|n| {
            let handle = queue.handle();
            let folder = dir.path().to_path_buf();
            std::thread::spawn(move || {
                for i in 0..3 {
                    handle.enqueue(settings_request(folder.clone(), &format!("{n}{i}"))).unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    queue.shutdown();

    let calls = fake.invocations();
    assert!(!fake.overlapped.load(Ordering::SeqCst));
    assert_eq!(calls.iter().filter(|c| c.starts_with("--set-config")).count(), 12);
    // every request is applied and captured back to back
    for (i, call) in calls.iter().enumerate() {
        if call.starts_with("--set-config") {
            assert!(calls[i + 1].starts_with("--capture-image-and-download"));
        }
    }
}

#[tokio::test]
async fn busy_device_is_retried_until_capture_succeeds() {
    let dir = tempdir().unwrap();
    let fake = FakeGphoto::default();
    fake.script_captures(vec![failed(BUSY), failed("libusb: resource busy")]);
    let queue = HardwareQueue::spawn(
        Camera::new(fake.clone(), CaptureConfig::immediate()),
        SettingsMap::default(),
    )
    .unwrap();

    let files = queue
        .handle()
        .capture(dir.path().join("default"), Some("42".into()))
        .await
        .unwrap();

    assert_eq!(files.len(), 2);
    assert!(files[0].starts_with(dir.path().join("default")));
    assert!(files[0].to_string_lossy().contains("photo_42_"));
    assert!(files[0].extension().is_some_and(|e| e == "cr2"));

    let calls = fake.invocations();
    let captures = calls.iter().filter(|c| c.starts_with("--capture")).count();
    assert_eq!(captures, 3);
    assert_eq!(calls.last().map(String::as_str), Some("--reset"));
    queue.shutdown();
}

#[tokio::test]
async fn persistent_busy_exhausts_the_retry_budget() {
    let dir = tempdir().unwrap();
    let fake = FakeGphoto::default();
    fake.script_captures(vec![failed(BUSY), failed(BUSY), failed(BUSY), ok("unused")]);
    let queue = HardwareQueue::spawn(
        Camera::new(fake.clone(), CaptureConfig::immediate()),
        SettingsMap::default(),
    )
    .unwrap();

    let err = queue.handle().capture(dir.path().to_path_buf(), None).await.unwrap_err();
    assert!(matches!(err, CameraError::RetriesExhausted(3)));

    // the worker survives and serves the next job
    let files = queue.handle().capture(dir.path().to_path_buf(), None).await;
    tokio_test::assert_ok!(files);
    queue.shutdown();
}

#[tokio::test]
async fn other_failures_are_not_retried() {
    let dir = tempdir().unwrap();
    let fake = FakeGphoto::default();
    fake.script_captures(vec![failed("*** Error: No camera found. ***")]);
    let queue = HardwareQueue::spawn(
        Camera::new(fake.clone(), CaptureConfig::immediate()),
        SettingsMap::default(),
    )
    .unwrap();

    let err = queue.handle().capture(dir.path().to_path_buf(), None).await.unwrap_err();
    assert!(matches!(err, CameraError::CaptureFailed(ref msg) if msg.contains("No camera found")));
    assert_eq!(fake.invocations().len(), 1);
    queue.shutdown();
}

#[tokio::test]
async fn choices_settings_and_probe_go_through_the_worker() {
    let fake = FakeGphoto::default();
    let queue = HardwareQueue::spawn(
        Camera::new(fake.clone(), CaptureConfig::immediate()),
        SettingsMap::default(),
    )
    .unwrap();
    let handle = queue.handle();

    let choices = handle.setting_choices().await.unwrap();
    assert_eq!(choices.keys().collect::<Vec<_>>(), vec!["iso", "shutterSpeed"]);
    assert_eq!(choices["iso"], vec!["100", "200"]);

    handle.apply_setting("shutterSpeed", "1/100").await.unwrap();
    let err = handle.apply_setting("whiteBalance", "auto").await.unwrap_err();
    assert!(matches!(err, CameraError::UnknownSetting(_)));

    assert_eq!(handle.probe().await.unwrap().latest_file, 2);

    queue.shutdown();
    assert!(fake
        .invocations()
        .contains(&"--set-config /main/capturesettings/shutterspeed=1/100".to_string()));
    assert!(matches!(handle.probe().await, Err(CameraError::WorkerGone)));
}

#[tokio::test]
async fn outcome_is_logged_when_the_caller_is_gone() {
    logged();
    let dir = tempdir().unwrap();
    let fake = FakeGphoto::default();
    fake.script_captures(vec![failed("*** Error: Lens cap detected ***")]);
    let release = fake.hold_next_capture();
    let queue = HardwareQueue::spawn(
        Camera::new(fake.clone(), CaptureConfig::immediate()),
        SettingsMap::default(),
    )
    .unwrap();

    let handle = queue.handle();
    let folder = dir.path().to_path_buf();
    let caller = tokio::spawn(async move { handle.capture(folder, None).await });
    let waiting = fake.clone();
    tokio::task::spawn_blocking(move || waiting.wait_for_call("--capture"))
        .await
        .unwrap();

    caller.abort();
    assert!(caller.await.unwrap_err().is_cancelled());
    drop(release);
    queue.shutdown();

    let lines = logged();
    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("ERROR") && l.contains("after the caller left") && l.contains("Lens cap")),
        "{lines:#?}"
    );
}

#[test]
fn stop_abandons_queued_jobs_and_is_bounded() {
    let dir = tempdir().unwrap();
    let fake = FakeGphoto::default();
    let release = fake.hold_next_capture();
    let queue = HardwareQueue::spawn(
        Camera::new(fake.clone(), CaptureConfig::immediate()),
        SettingsMap::default(),
    )
    .unwrap();

    let handle = queue.handle();
    handle.enqueue(settings_request(dir.path().to_path_buf(), "100")).unwrap();
    fake.wait_for_call("--capture");
    handle.enqueue(settings_request(dir.path().to_path_buf(), "200")).unwrap();
    handle.enqueue(settings_request(dir.path().to_path_buf(), "400")).unwrap();

    let started = Instant::now();
    assert!(!queue.stop(Duration::from_millis(100)));
    assert!(started.elapsed() < Duration::from_secs(2));

    // the capture in flight completes, nothing queued behind it runs
    drop(release);
    std::thread::sleep(Duration::from_millis(200));
    let sets: Vec<String> = fake
        .invocations()
        .into_iter()
        .filter(|c| c.starts_with("--set-config"))
        .collect();
    assert_eq!(sets, vec!["--set-config /main/imgsettings/iso=100"]);
    assert!(handle.enqueue(settings_request(dir.path().to_path_buf(), "800")).is_err());
}

#[test]
fn idle_worker_stops_immediately() {
    let fake = FakeGphoto::default();
    let queue = HardwareQueue::spawn(
        Camera::new(fake.clone(), CaptureConfig::immediate()),
        SettingsMap::default(),
    )
    .unwrap();
    assert!(queue.stop(Duration::from_secs(1)));
    assert!(fake.invocations().is_empty());
}
