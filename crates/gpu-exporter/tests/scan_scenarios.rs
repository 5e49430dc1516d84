use std::sync::Arc;

use gpu_exporter::error::DeviceError;
use gpu_exporter::library::mock::MockDevice;
use gpu_exporter::library::mock::MockLoader;
use gpu_exporter::library::DeviceQuery;
use gpu_exporter::schema::DEVICE_LABELS;
use gpu_exporter::schema::PROCESS_LABELS;
use gpu_exporter::MetricSchema;
use gpu_exporter::Sample;
use gpu_exporter::ScanError;
use gpu_exporter::ScanOrchestrator;
use similar_asserts::assert_eq;
use test_log::test;
use tokio_util::sync::CancellationToken;

/// Every sample of an identified, idle device, in emission order.
const FULL_DEVICE_SET: [&str; 8] = [
    "nvidia_driver_info",
    "nvidia_memory_used",
    "nvidia_memory_total",
    "nvidia_power_usage",
    "nvidia_temperature",
    "nvidia_utilization_gpu",
    "nvidia_utilization_memory",
    "nvidia_utilization_gpu_average",
];

fn collector(loader: &MockLoader) -> ScanOrchestrator<MockLoader> {
    ScanOrchestrator::new(loader.clone(), Arc::new(MetricSchema::default()))
}

fn scan(loader: &MockLoader) -> (Vec<Sample>, gpu_exporter::ScanReport) {
    let mut samples = Vec::new();
    let report = collector(loader)
        .scan(&mut samples, &CancellationToken::new())
        .expect("scan completes");
    (samples, report)
}

fn for_minor<'a>(samples: &'a [Sample], minor: &str) -> Vec<&'a str> {
    samples
        .iter()
        .filter(|s| s.label("minor_number") == Some(minor))
        .map(Sample::name)
        .collect()
}

#[test]
fn failing_memory_query_only_drops_memory_samples() {
    let loader = MockLoader::new(vec![
        MockDevice::healthy(0),
        MockDevice::healthy(1).failing(DeviceQuery::MemoryInfo),
    ]);

    let (samples, report) = scan(&loader);

    assert_eq!(samples[0].name(), "nvidia_device_count");
    assert_eq!(samples[0].value, 2.0);

    assert_eq!(for_minor(&samples, "0"), FULL_DEVICE_SET.to_vec());

    let degraded: Vec<_> = FULL_DEVICE_SET
        .iter()
        .copied()
        .filter(|name| !name.starts_with("nvidia_memory_"))
        .collect();
    assert_eq!(for_minor(&samples, "1"), degraded);

    assert_eq!(report.sampled_devices, 2);
    assert_eq!(report.field_errors.len(), 1);
    assert_eq!(report.field_errors[0].query, DeviceQuery::MemoryInfo);
    assert_eq!(report.field_errors[0].minor_number, 1);
}

#[test]
fn identity_failure_skips_only_that_device() {
    let loader = MockLoader::new(vec![
        MockDevice::healthy(0).failing(DeviceQuery::Uuid),
        MockDevice::healthy(1),
    ]);

    let (samples, report) = scan(&loader);

    assert_eq!(samples[0].name(), "nvidia_device_count");
    assert_eq!(samples[0].value, 2.0);
    assert!(for_minor(&samples, "0").is_empty());
    assert!(samples
        .iter()
        .all(|s| s.label("uuid") != Some("GPU-00000000-mock")));
    assert_eq!(for_minor(&samples, "1"), FULL_DEVICE_SET.to_vec());

    assert_eq!(report.sampled_devices, 1);
    assert_eq!(report.device_errors.len(), 1);
    assert!(matches!(
        report.device_errors[0],
        DeviceError::Identity {
            index: 0,
            query: DeviceQuery::Uuid,
            ..
        }
    ));
    assert_eq!(samples.len(), 1 + FULL_DEVICE_SET.len());
}

#[test]
fn failed_open_emits_nothing_and_queries_nothing() {
    let loader = MockLoader::new(vec![MockDevice::healthy(0)]).failing_init("driver missing");

    let mut samples: Vec<Sample> = Vec::new();
    let error = collector(&loader)
        .scan(&mut samples, &CancellationToken::new())
        .expect_err("session cannot open");

    assert_eq!(error.current_context(), &ScanError::SessionUnavailable);
    assert!(samples.is_empty());
    assert_eq!(loader.calls().count_queries(), 0);
    assert_eq!(loader.calls().closed(), 0);
}

#[test]
fn unavailable_handle_still_reports_attempted_count() {
    let loader = MockLoader::new(vec![MockDevice::healthy(0).unavailable()]);

    let (samples, report) = scan(&loader);

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].name(), "nvidia_device_count");
    assert_eq!(samples[0].value, 1.0);
    assert_eq!(report.device_errors.len(), 1);
    assert!(matches!(
        report.device_errors[0],
        DeviceError::Unavailable { index: 0, .. }
    ));
    assert_eq!(loader.calls().closed(), 1);
}

#[test]
fn labels_follow_descriptor_order() {
    let loader = MockLoader::new(vec![
        MockDevice::healthy(0).with_process(100, "trainer", 1 << 30),
        MockDevice::healthy(3),
    ]);

    let (samples, _) = scan(&loader);

    for sample in &samples {
        assert_eq!(
            sample.label_values.len(),
            sample.descriptor.label_names.len(),
            "arity of {}",
            sample.name()
        );
        let names: Vec<_> = sample.labels().map(|(name, _)| name).collect();
        match sample.name() {
            "nvidia_device_count" => assert!(names.is_empty()),
            "nvidia_driver_info" => {
                assert_eq!(names, vec!["minor_number", "uuid", "name", "version"])
            }
            "nvidia_process_info" => assert_eq!(names, PROCESS_LABELS.to_vec()),
            _ => assert_eq!(names, DEVICE_LABELS.to_vec()),
        }
    }

    let third = samples
        .iter()
        .find(|s| s.name() == "nvidia_temperature" && s.label("minor_number") == Some("3"))
        .expect("temperature for minor 3");
    assert_eq!(third.label("uuid"), Some("GPU-00000003-mock"));
    assert_eq!(third.value, 43.0);
}

#[test]
fn session_is_closed_exactly_once_per_scan() {
    let loader = MockLoader::new(vec![
        MockDevice::healthy(0),
        MockDevice::healthy(1).failing(DeviceQuery::Name),
        MockDevice::healthy(2).unavailable(),
    ]);
    let collector = collector(&loader);

    for _ in 0..3 {
        let mut samples: Vec<Sample> = Vec::new();
        collector
            .scan(&mut samples, &CancellationToken::new())
            .expect("scan completes");
    }

    assert_eq!(loader.calls().opened(), 3);
    assert_eq!(loader.calls().closed(), 3);
}

#[test]
fn idle_device_has_no_process_samples() {
    let loader = MockLoader::new(vec![MockDevice::healthy(0)]);

    let (samples, report) = scan(&loader);

    assert!(samples.iter().all(|s| s.name() != "nvidia_process_info"));
    assert!(report.field_errors.is_empty());
    // count, driver info, memory x2, power, temperature, utilization x2, average
    assert_eq!(samples.len(), 9);
}

#[test]
fn each_process_gets_its_own_sample() {
    let loader = MockLoader::new(vec![MockDevice::healthy(1)
        .with_process(10, "python", 512)
        .with_process(11, "vllm", 1024)]);

    let (samples, _) = scan(&loader);

    let processes: Vec<_> = samples
        .iter()
        .filter(|s| s.name() == "nvidia_process_info")
        .map(|s| (s.label_values.clone(), s.value))
        .collect();
    assert_eq!(
        processes,
        vec![
            (
                vec!["1".to_string(), "10".to_string(), "python".to_string()],
                512.0
            ),
            (
                vec!["1".to_string(), "11".to_string(), "vllm".to_string()],
                1024.0
            ),
        ]
    );
}

#[test]
fn scan_after_failed_open_succeeds() {
    let loader = MockLoader::new(vec![MockDevice::healthy(0)]).failing_init_times(1);
    let collector = collector(&loader);

    let mut samples: Vec<Sample> = Vec::new();
    collector
        .scan(&mut samples, &CancellationToken::new())
        .expect_err("first open fails");
    assert!(samples.is_empty());

    let report = collector
        .scan(&mut samples, &CancellationToken::new())
        .expect("retry succeeds");
    assert_eq!(report.sampled_devices, 1);
    assert_eq!(samples.len(), report.samples_emitted);
    assert_eq!(loader.calls().opened(), 1);
    assert_eq!(loader.calls().closed(), 1);
}
