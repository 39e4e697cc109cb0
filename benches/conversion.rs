//! Benchmark for revision conversion
//!
//! Covers the typed hub round trip and the JSON path the conversion webhook
//! takes for a batched ConversionReview.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use virtualization_operator::conversion::{self, ApiRevision, ConversionRegistry, ConversionReview, ResourceKind};
use virtualization_operator::crd::v1alpha1 as alpha;

fn alpha_vm(index: usize) -> alpha::VirtualMachine {
    let mut vm = alpha::VirtualMachine::new(
        &format!("vm-{:04}", index),
        alpha::VirtualMachineSpec {
            cpu: "4".to_string(),
            memory: "8Gi".to_string(),
            numa_policy: "strict".to_string(),
            hugepages: "1Gi".to_string(),
            disks: (0..4)
                .map(|d| alpha::VirtualMachineDisk {
                    r#type: if d == 0 { "system" } else { "data" }.to_string(),
                    bus: "virtio".to_string(),
                    boot_order: (d == 0).then_some(1),
                    disk_ref: alpha::LocalObjectReference {
                        name: format!("disk-{}", d),
                    },
                    ..Default::default()
                })
                .collect(),
            nets: vec![alpha::VirtualMachineNetwork {
                r#type: "bridge".to_string(),
                nad_ref: Some(alpha::NamespacedName {
                    namespace: "default".to_string(),
                    name: "br-net".to_string(),
                }),
                ..Default::default()
            }],
            power_state: "Running".to_string(),
            ..Default::default()
        },
    );
    vm.metadata.namespace = Some("default".to_string());
    vm
}

fn bench_typed_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("conversion");
    group.throughput(Throughput::Elements(1));

    let vm = alpha_vm(0);
    group.bench_function("vm_typed_round_trip", |b| {
        b.iter(|| {
            let hub = conversion::virtual_machine::to_hub(black_box(&vm));
            black_box(conversion::virtual_machine::from_hub(&hub))
        });
    });

    group.finish();
}

fn bench_json_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("conversion");
    group.throughput(Throughput::Elements(1));

    let registry = ConversionRegistry::new();
    let value = serde_json::to_value(alpha_vm(0)).unwrap_or_default();

    group.bench_function("vm_json_to_hub", |b| {
        b.iter(|| {
            let _ = registry.convert_value(
                black_box(value.clone()),
                ApiRevision::V1alpha1,
                ApiRevision::V1beta1,
                ResourceKind::VirtualMachine,
            );
        });
    });

    group.finish();
}

fn bench_review_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("conversion_review");
    group.throughput(Throughput::Elements(100));

    let registry = ConversionRegistry::new();
    let objects: Vec<_> = (0..100)
        .map(|i| serde_json::to_value(alpha_vm(i)).unwrap_or_default())
        .collect();
    let body = json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "ConversionReview",
        "request": {
            "uid": "bench",
            "desiredAPIVersion": "virtualization.kubesphere.io/v1beta1",
            "objects": objects
        }
    });

    group.bench_function("review_100_vms", |b| {
        b.iter(|| {
            if let Ok(review) = serde_json::from_value::<ConversionReview>(black_box(body.clone())) {
                black_box(registry.review(review));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_typed_round_trip, bench_json_conversion, bench_review_batch);
criterion_main!(benches);
