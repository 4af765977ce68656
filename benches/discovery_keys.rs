//! Benchmark for the per-document discovery hot path
//!
//! Every fetched document is link-extracted, namespaced and keyed once.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use resource_aggregator::discovery::{extract_links, form_key, namespace_paths};
use resource_aggregator::telemetry::{apply_wildcards, union_members};
use serde_json::{json, Value};

const DEVICE_UUID: &str = "6d4a0a66-7efa-578e-83cf-44dc68d2874e";

fn system_document() -> Value {
    json!({
        "@odata.id": "/redfish/v1/Systems/1",
        "Id": "1",
        "Storage": {"@odata.id": "/redfish/v1/Systems/1/Storage"},
        "Processors": {"@odata.id": "/redfish/v1/Systems/1/Processors"},
        "Memory": {"@odata.id": "/redfish/v1/Systems/1/Memory"},
        "EthernetInterfaces": {"@odata.id": "/redfish/v1/Systems/1/EthernetInterfaces"},
        "Links": {
            "Chassis": [{"@odata.id": "/redfish/v1/Chassis/1"}],
            "ManagedBy": [{"@odata.id": "/redfish/v1/Managers/1"}]
        },
        "Oem": {
            "Vendor": {
                "Links": {"PCIDevices": [
                    {"@odata.id": "/redfish/v1/Systems/1/PCIDevices/1"},
                    {"@odata.id": "/redfish/v1/Systems/1/PCIDevices/2"}
                ]}
            }
        }
    })
}

fn bench_form_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("keys");
    group.throughput(Throughput::Elements(1));

    group.bench_function("form_key", |b| {
        b.iter(|| {
            form_key(
                black_box("/redfish/v1/Systems/1/Storage/RAID.Integrated.1-1/Drives/Disk.Bay.0"),
                black_box("1"),
                black_box(DEVICE_UUID),
            )
        });
    });

    group.bench_function("form_key_licenses", |b| {
        b.iter(|| {
            form_key(
                black_box("/redfish/v1/LicenseService/Licenses/FD00000011"),
                black_box("1"),
                black_box(DEVICE_UUID),
            )
        });
    });

    group.finish();
}

fn bench_document_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("documents");
    group.throughput(Throughput::Elements(1));

    let document = system_document();
    let body = document.to_string();

    group.bench_function("namespace_paths", |b| {
        b.iter(|| namespace_paths(black_box(&body), black_box(DEVICE_UUID)));
    });

    group.bench_function("extract_links", |b| {
        b.iter(|| extract_links(black_box(&document), false));
    });

    group.finish();
}

fn bench_telemetry_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("telemetry");
    group.throughput(Throughput::Elements(100));

    let prior = json!({
        "Members": (0..100)
            .map(|i| json!({"@odata.id": format!("/redfish/v1/TelemetryService/MetricDefinitions/M{}", i)}))
            .collect::<Vec<_>>(),
        "Members@odata.count": 100
    });
    let fresh = json!({
        "Members": (50..150)
            .map(|i| json!({"@odata.id": format!("/redfish/v1/TelemetryService/MetricDefinitions/M{}", i)}))
            .collect::<Vec<_>>(),
        "Members@odata.count": 100
    });

    group.bench_function("union_members_100", |b| {
        b.iter(|| union_members(black_box(&prior), black_box(&fresh)));
    });

    let definition = json!({
        "@odata.id": "/redfish/v1/TelemetryService/MetricReportDefinitions/PowerMetrics",
        "MetricProperties": (0..100)
            .map(|i| format!("/redfish/v1/Chassis/{}.{}/Power#/PowerControl/0/PowerConsumedWatts", DEVICE_UUID, i))
            .collect::<Vec<_>>()
    });

    group.bench_function("apply_wildcards_100", |b| {
        b.iter(|| {
            let mut document = definition.clone();
            apply_wildcards(black_box(&mut document), None)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_form_key,
    bench_document_rewrite,
    bench_telemetry_merge,
);
criterion_main!(benches);
