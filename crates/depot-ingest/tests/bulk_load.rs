//! Bulk-load end-to-end tests
//!
//! Drives whole bulk loads through the real flight runner over the
//! in-memory backends, covering the idempotency, conflict, threshold,
//! orphan-recovery, and concurrency-bound guarantees.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use depot_catalog::{Catalog, FsItem, MemoryMetadataStore};
use depot_flight::{FlightRunner, FlightStatus, MemoryFlightLog};
use depot_ingest::storage::memory::InjectedFault;
use depot_ingest::{
    file_load_flight, BulkLoadInput, BulkLoadMode, BulkLoadOutcome, BulkLoadService,
    BulkLoadSource, FileLoadInput, FileLoadState, IdAllocation, IngestConfig, IngestContext,
    LoadFileSpec, LoadFileState, LoadStore, MemoryLoadStore, MemoryObjectStore,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(30);

struct Harness {
    service: BulkLoadService,
    object_store: Arc<MemoryObjectStore>,
    load_store: Arc<MemoryLoadStore>,
    meta_store: Arc<MemoryMetadataStore>,
    catalog: Catalog,
    collection: Uuid,
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn harness_with(tune: impl FnOnce(&mut IngestConfig)) -> Harness {
    let mut config = IngestConfig {
        load_driver_wait_seconds: 0,
        copy_retry_wait_seconds: 0,
        copy_retry_attempts: 2,
        max_concurrent_flights: 32,
        ..IngestConfig::default()
    };
    tune(&mut config);

    let object_store = Arc::new(MemoryObjectStore::new());
    let load_store = Arc::new(MemoryLoadStore::new());
    let meta_store = Arc::new(MemoryMetadataStore::new());
    let catalog = Catalog::new(meta_store.clone());
    let runner = FlightRunner::new(
        Arc::new(MemoryFlightLog::new()),
        config.max_concurrent_flights,
    );

    let service = BulkLoadService::new(IngestContext {
        load_store: load_store.clone(),
        object_store: object_store.clone(),
        catalog: catalog.clone(),
        runner,
        config,
    });

    Harness {
        service,
        object_store,
        load_store,
        meta_store,
        catalog,
        collection: Uuid::new_v4(),
    }
}

fn spec(n: usize) -> LoadFileSpec {
    LoadFileSpec {
        source_path: format!("s3://external/file-{n}"),
        target_path: format!("/loaded/file-{n}.dat"),
        mime_type: Some("application/octet-stream".to_string()),
        description: None,
    }
}

async fn seed_sources(harness: &Harness, count: usize) -> Vec<LoadFileSpec> {
    let mut specs = Vec::new();
    for n in 0..count {
        let item = spec(n);
        harness
            .object_store
            .put_source(&item.source_path, format!("payload {n}").into_bytes())
            .await;
        specs.push(item);
    }
    specs
}

fn input(harness: &Harness, tag: &str, files: Vec<LoadFileSpec>, mode: BulkLoadMode) -> BulkLoadInput {
    BulkLoadInput {
        collection_id: harness.collection,
        load_tag: tag.to_string(),
        source: BulkLoadSource::Array { files },
        mode,
        id_allocation: IdAllocation::Random,
        self_hosted: false,
        max_failed_file_loads: 0,
    }
}

async fn run(harness: &Harness, input: BulkLoadInput) -> BulkLoadOutcome {
    tokio::time::timeout(TEST_TIMEOUT, harness.service.run(input))
        .await
        .expect("bulk load timed out")
        .expect("bulk load flight errored")
}

fn ids_by_target(outcome: &BulkLoadOutcome) -> HashMap<String, Uuid> {
    outcome
        .file_results
        .iter()
        .filter_map(|r| r.file_id.map(|id| (r.target_path.clone(), id)))
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn driver_mode_loads_every_file() {
    let harness = harness();
    let specs = seed_sources(&harness, 5).await;

    let outcome = run(&harness, input(&harness, "load-1", specs.clone(), BulkLoadMode::Driver)).await;
    assert!(outcome.succeeded(), "outcome: {outcome:?}");

    let result = outcome.result.expect("missing result");
    assert_eq!(result.total_files, 5);
    assert_eq!(result.succeeded_files, 5);
    assert_eq!(result.failed_files, 0);
    assert_eq!(result.not_tried_files, 0);
    assert_eq!(result.load_tag, "load-1");

    // Every file is visible with matching facts by path and by id.
    for item in &specs {
        let by_path = harness
            .catalog
            .lookup_path(harness.collection, &item.target_path, 0)
            .await
            .unwrap()
            .expect("file not visible");
        let FsItem::File(file) = &by_path else {
            panic!("expected file at {}", item.target_path)
        };
        let by_id = harness
            .catalog
            .lookup_file_id(harness.collection, file.file_id, 0)
            .await
            .unwrap()
            .expect("file not visible by id");
        let by_id = by_id.as_file().unwrap();
        assert_eq!(by_id.size, file.size);
        assert_eq!(by_id.checksum_md5, file.checksum_md5);
        assert_eq!(by_id.cloud_path, file.cloud_path);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn resubmitting_a_finished_load_is_idempotent() {
    let harness = harness();
    let specs = seed_sources(&harness, 3).await;

    let first = run(&harness, input(&harness, "load-1", specs.clone(), BulkLoadMode::Driver)).await;
    assert!(first.succeeded());
    let first_ids = ids_by_target(&first);
    let files_before = harness.meta_store.file_count(harness.collection).await;
    let entries_before = harness.meta_store.entry_count(harness.collection).await;

    let second = run(&harness, input(&harness, "load-1", specs, BulkLoadMode::Driver)).await;
    assert!(second.succeeded());

    // Identical target -> fileId mappings, no duplicate records.
    assert_eq!(ids_by_target(&second), first_ids);
    assert_eq!(
        harness.meta_store.file_count(harness.collection).await,
        files_before
    );
    assert_eq!(
        harness.meta_store.entry_count(harness.collection).await,
        entries_before
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn different_load_tag_on_same_path_is_rejected() {
    let harness = harness();
    let specs = seed_sources(&harness, 1).await;

    let first = run(&harness, input(&harness, "load-1", specs.clone(), BulkLoadMode::Driver)).await;
    assert!(first.succeeded());
    let original_id = ids_by_target(&first)["/loaded/file-0.dat"];

    let second = run(&harness, input(&harness, "load-2", specs, BulkLoadMode::Driver)).await;
    assert!(!second.succeeded());
    let failed = &second.file_results[0];
    assert_eq!(failed.state, LoadFileState::Failed);
    assert!(
        failed.error.as_deref().unwrap_or_default().contains("already exists"),
        "error: {:?}",
        failed.error
    );

    // No partial state for the path: the original claim is untouched.
    let item = harness
        .catalog
        .lookup_path(harness.collection, "/loaded/file-0.dat", 0)
        .await
        .unwrap()
        .expect("original file vanished");
    assert_eq!(item.file_id(), original_id);
    assert_eq!(harness.meta_store.file_count(harness.collection).await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn threshold_breaker_fails_job_but_keeps_partial_success() {
    let harness = harness();
    let specs = seed_sources(&harness, 3).await;
    harness
        .object_store
        .inject_fault("s3://external/file-1", InjectedFault::Permanent)
        .await;

    let first = run(&harness, input(&harness, "load-1", specs.clone(), BulkLoadMode::Driver)).await;
    assert!(!first.succeeded());
    assert_eq!(first.status, FlightStatus::Error);

    let result = first.result.as_ref().expect("failed job still reports counts");
    assert_eq!(result.total_files, 3);
    assert_eq!(result.succeeded_files, 2);
    assert_eq!(result.failed_files, 1);

    let failure = first.failure.as_ref().expect("missing failure summary");
    assert!(failure.message.contains("failed to ingest"));
    assert_eq!(failure.errors.len(), 1);
    assert!(failure.errors[0].contains("s3://external/file-1"));

    let first_ids = ids_by_target(&first);
    assert_eq!(first_ids.len(), 2);

    // Correct the bad item and resubmit under the same tag: only the
    // failed subset is really re-done, survivors keep their ids.
    harness.object_store.clear_fault("s3://external/file-1").await;

    let second = run(&harness, input(&harness, "load-1", specs, BulkLoadMode::Driver)).await;
    assert!(second.succeeded(), "outcome: {second:?}");
    let result = second.result.as_ref().expect("missing result");
    assert_eq!(result.total_files, 3);
    assert_eq!(result.succeeded_files, 3);
    assert_eq!(result.failed_files, 0);

    let second_ids = ids_by_target(&second);
    assert_eq!(second_ids["/loaded/file-0.dat"], first_ids["/loaded/file-0.dat"]);
    assert_eq!(second_ids["/loaded/file-2.dat"], first_ids["/loaded/file-2.dat"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn orphaned_running_row_is_recovered_and_retried() {
    let harness = harness();
    let specs = seed_sources(&harness, 1).await;

    // Simulate the crash window: a row claimed as running under a flight
    // id the runner has never seen.
    let load = harness.load_store.lock_load("load-1", "setup").await.unwrap();
    harness
        .load_store
        .populate_files(load.load_id, &specs)
        .await
        .unwrap();
    harness
        .load_store
        .set_running(load.load_id, &specs[0].target_path, "ghost-flight")
        .await
        .unwrap();
    harness.load_store.unlock_load("load-1", "setup").await.unwrap();

    let outcome = run(&harness, input(&harness, "load-1", specs, BulkLoadMode::Driver)).await;
    assert!(outcome.succeeded(), "outcome: {outcome:?}");
    let result = outcome.result.expect("missing result");
    assert_eq!(result.succeeded_files, 1);
    assert_eq!(outcome.file_results[0].state, LoadFileState::Succeeded);
}

#[tokio::test(flavor = "multi_thread")]
async fn driver_respects_the_concurrency_bound() {
    let harness = harness_with(|config| {
        config.load_concurrent_files = 6;
        // Slow the poll down so the paused state is observable.
        config.load_driver_wait_seconds = 1;
    });
    let specs = seed_sources(&harness, 10).await;

    harness.object_store.pause_copies();
    let job_id = harness
        .service
        .submit(input(&harness, "load-1", specs, BulkLoadMode::Driver))
        .await
        .unwrap();

    // Wait until the driver has filled every slot.
    let load_id = tokio::time::timeout(TEST_TIMEOUT, async {
        loop {
            if let Some(load_id) = harness.load_store.load_id_for_tag("load-1").await {
                if harness.load_store.find_running(load_id).await.unwrap().len() == 6 {
                    return load_id;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("driver never reached the concurrency bound");

    // Exactly the limit is running; the rest are still untried.
    let candidates = harness.load_store.find_candidates(load_id, 100).await.unwrap();
    assert_eq!(candidates.running_loads.len(), 6);
    assert_eq!(candidates.candidate_files.len(), 4);

    harness.object_store.resume_copies();
    let state = tokio::time::timeout(
        TEST_TIMEOUT,
        harness
            .service
            .context()
            .runner
            .wait(&job_id, Duration::from_millis(20)),
    )
    .await
    .expect("job timed out")
    .unwrap();
    assert_eq!(state.status, FlightStatus::Success);

    let outcome = harness.service.wait(&job_id).await.unwrap();
    let result = outcome.result.expect("missing result");
    assert_eq!(result.total_files, 10);
    assert_eq!(result.succeeded_files, 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn fatal_file_flight_undoes_its_directory_entry() {
    let harness = harness();
    harness
        .object_store
        .inject_fault("s3://external/doomed", InjectedFault::Permanent)
        .await;
    harness
        .object_store
        .put_source("s3://external/doomed", b"never arrives".to_vec())
        .await;

    let runner = harness.service.context().runner.clone();
    let flight_id = runner.create_flight_id();
    runner
        .submit(
            &flight_id,
            file_load_flight(harness.service.context(), IdAllocation::Random),
            FileLoadInput {
                collection_id: harness.collection,
                load_tag: "load-1".to_string(),
                source_path: "s3://external/doomed".to_string(),
                target_path: "/doomed/deep/file.dat".to_string(),
                mime_type: None,
                description: None,
                id_allocation: IdAllocation::Random,
                self_hosted: false,
            },
            FileLoadState::default(),
        )
        .await
        .unwrap();

    let state = tokio::time::timeout(
        TEST_TIMEOUT,
        runner.wait(&flight_id, Duration::from_millis(10)),
    )
    .await
    .expect("flight timed out")
    .unwrap();
    assert_eq!(state.status, FlightStatus::Error);

    // The claim made before the copy failed was fully undone, ancestor
    // directories included.
    assert_eq!(harness.meta_store.entry_count(harness.collection).await, 0);
    assert_eq!(harness.meta_store.file_count(harness.collection).await, 0);
    assert!(harness
        .catalog
        .lookup_path(harness.collection, "/doomed/deep/file.dat", 0)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn batched_mode_loads_and_reports_like_the_driver() {
    let harness = harness();
    let specs = seed_sources(&harness, 4).await;

    let outcome = run(&harness, input(&harness, "load-1", specs, BulkLoadMode::Batched)).await;
    assert!(outcome.succeeded(), "outcome: {outcome:?}");
    let result = outcome.result.expect("missing result");
    assert_eq!(result.total_files, 4);
    assert_eq!(result.succeeded_files, 4);
    assert_eq!(harness.meta_store.file_count(harness.collection).await, 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn batched_mode_threshold_keeps_partial_success() {
    let harness = harness();
    let specs = seed_sources(&harness, 3).await;
    harness
        .object_store
        .inject_fault("s3://external/file-2", InjectedFault::Permanent)
        .await;

    let outcome = run(&harness, input(&harness, "load-1", specs, BulkLoadMode::Batched)).await;
    assert!(!outcome.succeeded());
    let result = outcome.result.expect("failed job still reports counts");
    assert_eq!(result.succeeded_files, 2);
    assert_eq!(result.failed_files, 1);
    // Succeeded items are not undone by the threshold.
    assert_eq!(harness.meta_store.file_count(harness.collection).await, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_copy_failures_are_retried_per_item() {
    let harness = harness();
    let specs = seed_sources(&harness, 1).await;
    harness
        .object_store
        .inject_fault("s3://external/file-0", InjectedFault::Transient(1))
        .await;

    let outcome = run(&harness, input(&harness, "load-1", specs, BulkLoadMode::Batched)).await;
    assert!(outcome.succeeded(), "outcome: {outcome:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn control_file_source_is_parsed_and_loaded() {
    let harness = harness();
    let specs = seed_sources(&harness, 2).await;
    let control: String = specs
        .iter()
        .map(|s| serde_json::to_string(s).unwrap() + "\n")
        .collect();
    harness
        .object_store
        .put_source("s3://control/load.json", control.into_bytes())
        .await;

    let mut request = input(&harness, "load-1", Vec::new(), BulkLoadMode::Driver);
    request.source = BulkLoadSource::ControlFile {
        path: "s3://control/load.json".to_string(),
    };

    let outcome = run(&harness, request).await;
    assert!(outcome.succeeded(), "outcome: {outcome:?}");
    assert_eq!(outcome.result.unwrap().succeeded_files, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_control_file_lines_fail_the_load_with_a_report() {
    let harness = harness();
    harness
        .object_store
        .put_source(
            "s3://control/broken.json",
            b"this is not json\n{\"source_path\": \"s3://x\", \"target_path\": \"/x\"}\n".to_vec(),
        )
        .await;

    let mut request = input(&harness, "load-1", Vec::new(), BulkLoadMode::Driver);
    request.source = BulkLoadSource::ControlFile {
        path: "s3://control/broken.json".to_string(),
    };

    let outcome = run(&harness, request).await;
    assert_eq!(outcome.status, FlightStatus::Error);
    assert!(
        outcome.error.as_deref().unwrap_or_default().contains("bad line"),
        "error: {:?}",
        outcome.error
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn self_hosted_sources_take_the_link_path() {
    let harness = harness();
    let specs = seed_sources(&harness, 2).await;

    let mut request = input(&harness, "load-1", specs, BulkLoadMode::Driver);
    request.self_hosted = true;

    let outcome = run(&harness, request).await;
    assert!(outcome.succeeded(), "outcome: {outcome:?}");
    // Both linked objects are resident with a recorded usage.
    for result in &outcome.file_results {
        let item = harness
            .catalog
            .lookup_path(harness.collection, &result.target_path, 0)
            .await
            .unwrap()
            .expect("linked file not visible");
        let file = item.as_file().unwrap();
        assert_eq!(
            harness.object_store.link_count(&file.cloud_path).await,
            Some(1),
            "missing link for {}",
            result.target_path
        );
    }
}
