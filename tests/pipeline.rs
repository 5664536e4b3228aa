//! Integration tests for batch runs.
//!
//! Every collaborator is a stub, so these run offline and deterministically.
//! Fixture images are generated with the `image` crate at test time.

use async_trait::async_trait;
use edgequake_llm::ImageData;
use fieldscan::progress::{channel, BatchEvent};
use fieldscan::{
    project, Batch, BatchConfig, BatchId, DetectedRegion, Extractor, ExtractedData,
    FieldRegistry, FieldScanError, FileStatus, PercentRect, Persister, Preview, Region,
    RegionDetector, ScannedFile, SpreadsheetSink, SpreadsheetSync, SpreadsheetTarget, StageError,
    SyncStatus,
};
use futures::StreamExt;
use image::{DynamicImage, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn png_preview() -> Preview {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 48, Rgba([250, 250, 250, 255])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .expect("encode fixture");
    Preview::from_bytes(buf).expect("fixture sniffs as PNG")
}

fn file(name: &str) -> ScannedFile {
    ScannedFile::new(name, png_preview())
}

fn rect(x: f64, y: f64) -> PercentRect {
    PercentRect {
        x,
        y,
        width: 20.0,
        height: 4.0,
    }
}

fn invoice_registry() -> FieldRegistry {
    let mut r = FieldRegistry::new();
    r.add("Invoice Number", rect(70.0, 5.0)).unwrap();
    r.add("Total", rect(70.0, 80.0)).unwrap();
    r
}

fn data(pairs: &[(&str, &str)]) -> ExtractedData {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn invoice_data() -> ExtractedData {
    data(&[("Invoice Number", "INV-001"), ("Total", "42.00")])
}

// ── Stub collaborators ───────────────────────────────────────────────────────

/// Returns `reply` for every call except the 0-based call numbers in `fail_on`.
struct StubExtractor {
    reply: ExtractedData,
    fail_on: Vec<usize>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(Vec<String>, Option<String>)>>,
}

impl StubExtractor {
    fn new(reply: ExtractedData) -> Arc<Self> {
        Self::failing(reply, vec![])
    }

    fn failing(reply: ExtractedData, fail_on: Vec<usize>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            fail_on,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for StubExtractor {
    async fn extract(
        &self,
        image: &ImageData,
        regions: &[Region],
        hints: Option<&str>,
    ) -> Result<ExtractedData, StageError> {
        assert_eq!(image.mime_type, "image/png");
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((
            regions.iter().map(|r| r.name().to_string()).collect(),
            hints.map(str::to_string),
        ));
        if self.fail_on.contains(&n) {
            Err(StageError::Extraction {
                detail: "model unavailable".into(),
            })
        } else {
            Ok(self.reply.clone())
        }
    }
}

struct StubPersister {
    reply: Result<bool, StageError>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(BatchId, String, ExtractedData, usize)>>,
}

impl StubPersister {
    fn new(reply: Result<bool, StageError>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Persister for StubPersister {
    async fn persist(
        &self,
        batch_id: &BatchId,
        file_name: &str,
        data: &ExtractedData,
        regions: &[Region],
    ) -> Result<bool, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((
            *batch_id,
            file_name.to_string(),
            data.clone(),
            regions.len(),
        ));
        self.reply.clone()
    }
}

struct StubSheet {
    reply: Result<bool, StageError>,
    rows: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl SpreadsheetSink for StubSheet {
    async fn append_row(
        &self,
        target: &SpreadsheetTarget,
        credential: &str,
        row: &[String],
    ) -> Result<bool, StageError> {
        assert_eq!(target.spreadsheet_id, "sheet-1");
        assert_eq!(credential, "token");
        self.rows.lock().unwrap().push(row.to_vec());
        self.reply.clone()
    }
}

fn sheet(reply: Result<bool, StageError>) -> (Arc<StubSheet>, SpreadsheetSync) {
    let sink = Arc::new(StubSheet {
        reply,
        rows: Mutex::new(Vec::new()),
    });
    let sync = SpreadsheetSync::new(
        sink.clone(),
        SpreadsheetTarget::new("sheet-1", "Sheet1!A1"),
        "token",
    );
    (sink, sync)
}

struct StubDetector(Vec<DetectedRegion>);

#[async_trait]
impl RegionDetector for StubDetector {
    async fn detect(
        &self,
        _image: &ImageData,
        _hints: Option<&str>,
    ) -> Result<Vec<DetectedRegion>, StageError> {
        Ok(self.0.clone())
    }
}

// ── Core scenarios ───────────────────────────────────────────────────────────

#[tokio::test]
async fn invoice_example() {
    let extractor = StubExtractor::new(invoice_data());
    let config = BatchConfig::builder()
        .extractor(extractor.clone())
        .build()
        .unwrap();

    let mut batch = Batch::with_registry(invoice_registry());
    let ids = batch.enqueue([file("invoice-01.png")]);
    let summary = batch.process(&config).await.unwrap();

    let f = batch.queue().get(ids[0]).unwrap();
    assert_eq!(
        f.status(),
        &FileStatus::Completed {
            data: invoice_data()
        }
    );
    assert_eq!(f.extracted_data(), Some(&invoice_data()));
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(extractor.calls(), 1);
}

#[tokio::test]
async fn partial_failure_is_isolated() {
    let extractor = StubExtractor::failing(invoice_data(), vec![1]);
    let config = BatchConfig::builder()
        .extractor(extractor.clone())
        .build()
        .unwrap();

    let mut batch = Batch::with_registry(invoice_registry());
    batch.enqueue([file("A.png"), file("B.png"), file("C.png")]);
    let summary = batch.process(&config).await.unwrap();

    let statuses: Vec<_> = batch.queue().iter().map(|f| f.status().label()).collect();
    assert_eq!(statuses, vec!["completed", "error", "completed"]);
    assert_eq!(extractor.calls(), 3, "C is attempted after B fails");

    let b = &batch.queue().files()[1];
    assert!(b.extracted_data().is_none());
    assert!(b.error().unwrap().starts_with("Extraction failed"));
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn empty_registry_is_a_configuration_error() {
    let extractor = StubExtractor::new(invoice_data());
    let config = BatchConfig::builder()
        .extractor(extractor.clone())
        .build()
        .unwrap();

    let mut batch = Batch::new();
    batch.enqueue([file("a.png"), file("b.png")]);
    let err = batch.process(&config).await.unwrap_err();

    assert!(matches!(err, FieldScanError::NoRegions));
    assert!(batch
        .queue()
        .iter()
        .all(|f| f.status() == &FileStatus::Pending));
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn completed_files_cover_every_region() {
    // The model forgot one field and invented another.
    let extractor = StubExtractor::new(data(&[("Total", "42.00"), ("Notes", "paid")]));
    let config = BatchConfig::builder().extractor(extractor).build().unwrap();

    let mut batch = Batch::with_registry(invoice_registry());
    batch.enqueue([file("a.png")]);
    batch.process(&config).await.unwrap();

    let got = batch.queue().files()[0].extracted_data().unwrap().clone();
    assert_eq!(got, data(&[("Invoice Number", ""), ("Total", "42.00")]));
}

#[tokio::test]
async fn extractor_sees_registry_order_and_hints() {
    let extractor = StubExtractor::new(invoice_data());
    let config = BatchConfig::builder()
        .extractor(extractor.clone())
        .build()
        .unwrap();

    let mut batch = Batch::with_registry(invoice_registry());
    batch.set_ai_hints("Totals include VAT");
    batch.enqueue([file("a.png")]);
    batch.process(&config).await.unwrap();

    let seen = extractor.seen.lock().unwrap();
    assert_eq!(seen[0].0, vec!["Invoice Number", "Total"]);
    assert_eq!(seen[0].1.as_deref(), Some("Totals include VAT"));
}

// ── Skip rule and sync ───────────────────────────────────────────────────────

#[tokio::test]
async fn skip_rule_is_idempotent() {
    let extractor = StubExtractor::new(invoice_data());
    let persister = StubPersister::new(Ok(true));
    let config = BatchConfig::builder()
        .extractor(extractor.clone())
        .persister(persister.clone())
        .build()
        .unwrap();

    let mut batch = Batch::with_registry(invoice_registry());
    batch.enqueue([file("a.png"), file("b.png")]);
    batch.process(&config).await.unwrap();
    assert_eq!(extractor.calls(), 2);
    assert_eq!(persister.calls.load(Ordering::SeqCst), 2);

    let before = serde_json::to_value(batch.queue()).unwrap();
    let summary = batch.process(&config).await.unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(extractor.calls(), 2, "no extraction on the second run");
    assert_eq!(persister.calls.load(Ordering::SeqCst), 2, "no persistence");
    assert_eq!(serde_json::to_value(batch.queue()).unwrap(), before);
}

#[tokio::test]
async fn persister_receives_batch_and_file() {
    let persister = StubPersister::new(Ok(true));
    let config = BatchConfig::builder()
        .extractor(StubExtractor::new(invoice_data()))
        .persister(persister.clone())
        .build()
        .unwrap();

    let mut batch = Batch::with_registry(invoice_registry());
    batch.enqueue([file("invoice-01.png")]);
    let summary = batch.process(&config).await.unwrap();

    let seen = persister.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, batch.id());
    assert_eq!(seen[0].1, "invoice-01.png");
    assert_eq!(seen[0].2, invoice_data());
    assert_eq!(seen[0].3, 2);
    assert_eq!(batch.queue().files()[0].sync_status(), &SyncStatus::Synced);
    assert_eq!(summary.synced, 1);
}

#[tokio::test]
async fn declined_or_failed_persistence_marks_sync_failed() {
    for reply in [
        Ok(false),
        Err(StageError::Persistence {
            detail: "HTTP 503".into(),
        }),
    ] {
        let config = BatchConfig::builder()
            .extractor(StubExtractor::new(invoice_data()))
            .persister(StubPersister::new(reply))
            .build()
            .unwrap();

        let mut batch = Batch::with_registry(invoice_registry());
        batch.enqueue([file("a.png")]);
        let summary = batch.process(&config).await.unwrap();

        let f = &batch.queue().files()[0];
        assert!(f.is_completed(), "data is kept when the store says no");
        assert_eq!(f.sync_status().label(), "failed");
        assert_eq!(summary.sync_failed, 1);
    }
}

#[tokio::test]
async fn extraction_failure_fails_configured_sync_axes() {
    let (_sink, sync) = sheet(Ok(true));
    let persister = StubPersister::new(Ok(true));
    let config = BatchConfig::builder()
        .extractor(StubExtractor::failing(invoice_data(), vec![0]))
        .persister(persister.clone())
        .spreadsheet(sync)
        .build()
        .unwrap();

    let mut batch = Batch::with_registry(invoice_registry());
    batch.enqueue([file("a.png")]);
    batch.process(&config).await.unwrap();

    let f = &batch.queue().files()[0];
    assert_eq!(f.status().label(), "error");
    assert!(matches!(f.sync_status(), SyncStatus::Failed { .. }));
    assert!(matches!(f.sheet_status(), SyncStatus::Failed { .. }));
    assert_eq!(persister.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unsynced_completed_file_is_re_extracted() {
    let extractor = StubExtractor::new(invoice_data());
    let config = BatchConfig::builder()
        .extractor(extractor.clone())
        .persister(StubPersister::new(Ok(false)))
        .build()
        .unwrap();

    let mut batch = Batch::with_registry(invoice_registry());
    batch.enqueue([file("a.png")]);
    batch.process(&config).await.unwrap();
    let summary = batch.process(&config).await.unwrap();

    assert_eq!(summary.skipped, 0);
    assert_eq!(extractor.calls(), 2, "extraction runs again in full");
}

#[tokio::test]
async fn failed_files_are_retried_on_the_next_run() {
    let extractor = StubExtractor::failing(invoice_data(), vec![0]);
    let config = BatchConfig::builder()
        .extractor(extractor.clone())
        .build()
        .unwrap();

    let mut batch = Batch::with_registry(invoice_registry());
    batch.enqueue([file("a.png")]);
    batch.process(&config).await.unwrap();
    assert_eq!(batch.queue().files()[0].status().label(), "error");

    batch.process(&config).await.unwrap();
    assert!(batch.queue().files()[0].is_completed());
    assert!(batch.queue().files()[0].error().is_none());
}

// ── Spreadsheet ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn sheet_rows_follow_registry_order() {
    let (sink, sync) = sheet(Ok(true));
    let config = BatchConfig::builder()
        .extractor(StubExtractor::new(data(&[
            ("Total", "42.00"),
            ("Invoice Number", "INV-001"),
        ])))
        .spreadsheet(sync)
        .build()
        .unwrap();

    let mut batch = Batch::with_registry(invoice_registry());
    batch.enqueue([file("a.png")]);
    let summary = batch.process(&config).await.unwrap();

    assert_eq!(
        *sink.rows.lock().unwrap(),
        vec![vec!["INV-001".to_string(), "42.00".to_string()]]
    );
    assert_eq!(batch.queue().files()[0].sheet_status(), &SyncStatus::Synced);
    assert_eq!(summary.sheet_appended, 1);

    let table = project(batch.queue(), batch.registry());
    assert_eq!(table.rows[0].cells, sink.rows.lock().unwrap()[0]);
}

#[tokio::test]
async fn sheet_failure_stays_on_its_own_axis() {
    let (_sink, sync) = sheet(Err(StageError::Spreadsheet {
        detail: "quota".into(),
    }));
    let config = BatchConfig::builder()
        .extractor(StubExtractor::new(invoice_data()))
        .persister(StubPersister::new(Ok(true)))
        .spreadsheet(sync)
        .build()
        .unwrap();

    let mut batch = Batch::with_registry(invoice_registry());
    batch.enqueue([file("a.png")]);
    batch.process(&config).await.unwrap();

    let f = &batch.queue().files()[0];
    assert!(f.is_completed());
    assert_eq!(f.sync_status(), &SyncStatus::Synced);
    match f.sheet_status() {
        SyncStatus::Failed { reason } => assert!(reason.contains("quota")),
        other => panic!("unexpected sheet status {other:?}"),
    }
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_transition_is_reported_in_order() {
    let (cb, events) = channel();
    let config = BatchConfig::builder()
        .extractor(StubExtractor::new(invoice_data()))
        .persister(StubPersister::new(Ok(true)))
        .progress_callback(cb)
        .build()
        .unwrap();

    let mut batch = Batch::with_registry(invoice_registry());
    batch.enqueue([file("a.png")]);
    batch.process(&config).await.unwrap();
    drop(config);

    let events: Vec<BatchEvent> = events.collect().await;
    assert!(matches!(events.first(), Some(BatchEvent::Started { total: 1 })));
    assert!(matches!(events.last(), Some(BatchEvent::Finished(s)) if s.completed == 1));

    let trail: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::FileUpdated { file, .. } => Some(format!(
                "{}/{}",
                file.status().label(),
                file.sync_status().label()
            )),
            _ => None,
        })
        .collect();
    assert_eq!(
        trail,
        vec![
            "processing/unsynced",
            "completed/unsynced",
            "completed/syncing",
            "completed/synced",
        ]
    );
}

// ── Seeding ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn seed_regions_clamps_and_dedupes() {
    let detector = StubDetector(vec![
        DetectedRegion {
            name: "Total".into(),
            rect: PercentRect {
                x: 90.0,
                y: -5.0,
                width: 30.0,
                height: 10.0,
            },
        },
        DetectedRegion {
            name: "Total".into(),
            rect: rect(10.0, 10.0),
        },
        DetectedRegion {
            name: "Ghost".into(),
            rect: PercentRect {
                x: 120.0,
                y: 10.0,
                width: 5.0,
                height: 5.0,
            },
        },
    ]);

    let mut batch = Batch::new();
    batch.enqueue([file("sample.png")]);
    let added = batch.seed_regions(&detector, 2000).await.unwrap();

    assert_eq!(added, 2);
    assert_eq!(batch.registry().names(), vec!["Total", "Total (2)"]);
    let first = &batch.registry().regions()[0];
    assert_eq!(first.rect().x, 90.0);
    assert_eq!(first.rect().y, 0.0);
    assert_eq!(first.rect().width, 10.0);
    assert_eq!(first.rect().height, 5.0, "cropped, not shifted down");
    assert_eq!(batch.registry().active(), Some(first.id()));
}

#[tokio::test]
async fn seed_regions_leaves_an_existing_schema_alone() {
    let detector = StubDetector(vec![DetectedRegion {
        name: "Date".into(),
        rect: rect(5.0, 5.0),
    }]);

    let mut batch = Batch::with_registry(invoice_registry());
    batch.enqueue([file("sample.png")]);
    assert_eq!(batch.seed_regions(&detector, 2000).await.unwrap(), 0);
    assert_eq!(batch.registry().len(), 2);

    let mut empty = Batch::new();
    assert_eq!(empty.seed_regions(&detector, 2000).await.unwrap(), 0);
    assert!(empty.registry().is_empty());
}
