//! Benchmarks for FleetWatch mapping and projection

use std::collections::HashSet;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use fleetwatch::{DefaultFieldMapper, DeviceCache, FieldMapper, ProjectionEngine};
use serde_json::{json, Value};

fn generate_devices(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "deviceId": format!("device-{}", i),
                "serialNumber": format!("SN{:06}", i),
                "model": "HP Chromebook 14 G7",
                "orgUnitPath": "/MOTF",
                "status": "ACTIVE",
                "macAddress": "a1b2c3d4e5f6",
                "osVersion": "120.0.6099.235",
                "platformVersion": "15662.76.0 (Official Build) stable-channel",
                "lastEnrollmentTime": "2023-01-12T09:30:00.000Z",
                "autoUpdateExpiration": "1780272000000",
                "lastSync": "2024-02-05T14:07:09.123Z",
                "systemRamTotal": "8589934592",
                "systemRamFreeReports": [
                    {"reportTime": "2024-02-05T14:00:00.000Z", "systemRamFreeInfo": ["4294967296"]},
                    {"reportTime": "2024-02-05T14:05:00.000Z", "systemRamFreeInfo": ["3221225472"]}
                ],
                "cpuStatusReports": [
                    {"cpuUtilizationPercentageInfo": [12], "cpuTemperatureInfo": [
                        {"temperature": 41, "label": "Core 0\n"}, {"temperature": 43, "label": "Core 1\n"}]},
                    {"cpuUtilizationPercentageInfo": [25], "cpuTemperatureInfo": [
                        {"temperature": 47, "label": "Core 0\n"}, {"temperature": 49, "label": "Core 1\n"}]},
                    {"cpuUtilizationPercentageInfo": [8], "cpuTemperatureInfo": [
                        {"temperature": 44, "label": "Core 0\n"}, {"temperature": 45, "label": "Core 1\n"}]}
                ],
                "activeTimeRanges": [{"activeTime": 3_600_000, "date": "2024-02-05"}],
                "recentUsers": [{"email": "room-a@example.com"}],
                "lastKnownNetwork": [{"ipAddress": "10.0.0.12", "wanIpAddress": "203.0.113.7"}],
                "audioStatusReport": "35"
            })
        })
        .collect()
}

fn bench_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection");

    let raw = generate_devices(500);
    let mapper = DefaultFieldMapper::default();
    let engine = ProjectionEngine::new(["Core1(C)".to_string()].into_iter().collect::<HashSet<_>>());
    let mapped: Vec<_> = raw.iter().filter_map(|d| mapper.map(d)).collect();

    group.throughput(Throughput::Elements(raw.len() as u64));

    group.bench_function("map_500_devices", |b| {
        b.iter(|| {
            for device in &raw {
                black_box(mapper.map(device));
            }
        })
    });

    group.bench_function("project_500_devices", |b| {
        b.iter(|| {
            for device in &mapped {
                black_box(engine.project(&device.raw));
            }
        })
    });

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    let mapper = DefaultFieldMapper::default();
    let engine = ProjectionEngine::default();
    let devices: Vec<_> = generate_devices(500)
        .iter()
        .filter_map(|d| mapper.map(d))
        .map(|d| engine.projected(&d))
        .collect();

    group.throughput(Throughput::Elements(devices.len() as u64));

    group.bench_function("upsert_500_devices", |b| {
        let cache = DeviceCache::new();
        b.iter(|| black_box(cache.upsert_all(devices.clone())))
    });

    group.bench_function("snapshot_500_devices", |b| {
        let cache = DeviceCache::new();
        cache.upsert_all(devices.clone());
        b.iter(|| black_box(cache.snapshot()))
    });

    group.finish();
}

criterion_group!(benches, bench_projection, bench_cache);
criterion_main!(benches);
