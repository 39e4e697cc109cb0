//! VirtualMachine conversion between `v1alpha1` and the hub

use crate::crd::{v1alpha1 as alpha, v1beta1 as hub};

use super::{local_ref_from_hub, local_ref_to_hub, name_from_hub, name_to_hub};

/// Convert a `v1alpha1` VirtualMachine to the hub revision
///
/// The hub-only `lastPowerSyncTime` is left unset.
pub fn to_hub(src: &alpha::VirtualMachine) -> hub::VirtualMachine {
    let s = &src.spec;
    hub::VirtualMachine {
        metadata: src.metadata.clone(),
        spec: hub::VirtualMachineSpec {
            cpu: s.cpu.clone(),
            memory: s.memory.clone(),
            cpu_model: s.cpu_model.clone(),
            dedicated_cpu_placement: s.dedicated_cpu_placement,
            numa_policy: s.numa_policy.clone(),
            numa: s.numa.as_ref().map(|n| hub::NumaSpec {
                cells: n
                    .cells
                    .iter()
                    .map(|c| hub::NumaCell {
                        id: c.id,
                        cpus: c.cpus.clone(),
                        memory: c.memory.clone(),
                        threads_per_core: c.threads_per_core,
                    })
                    .collect(),
            }),
            hugepages: s.hugepages.clone(),
            gpus: s.gpus.as_ref().map(|gpus| {
                gpus.iter()
                    .map(|g| hub::GpuDevice {
                        name: g.name.clone(),
                        device_type: g.device_type.clone(),
                        resource_name: g.resource_name.clone(),
                    })
                    .collect()
            }),
            disks: s.disks.iter().map(disk_to_hub).collect(),
            nets: s.nets.iter().map(net_to_hub).collect(),
            cloud_init: s.cloud_init.as_ref().map(|c| hub::CloudInitSpec {
                user_data: c.user_data.clone(),
                network_data: c.network_data.clone(),
                ssh_authorized_keys: c.ssh_authorized_keys.clone(),
                user_data_secret_ref: c.user_data_secret_ref.as_ref().map(name_to_hub),
                network_data_secret_ref: c.network_data_secret_ref.as_ref().map(name_to_hub),
            }),
            console: s.console.as_ref().map(|c| hub::ConsoleDevices {
                vnc: c.vnc,
                serial: c.serial,
                r#type: c.r#type.clone(),
            }),
            live_migration: s.live_migration.as_ref().map(|m| hub::LiveMigrationSpec {
                enabled: m.enabled,
                bandwidth: m.bandwidth.clone(),
                completion_timeout_seconds: m.completion_timeout_seconds,
                allow_post_copy: m.allow_post_copy,
                auto_converge: m.auto_converge,
            }),
            liveness_probe: s.liveness_probe.as_ref().map(probe_to_hub),
            readiness_probe: s.readiness_probe.as_ref().map(probe_to_hub),
            power_state: s.power_state.clone(),
            kube_virt: s.kube_virt.clone(),
        },
        status: src.status.as_ref().map(|st| hub::VirtualMachineStatus {
            conditions: st.conditions.clone(),
            power_state: st.power_state.clone(),
            phase: st.phase.clone(),
            migration_state: st.migration_state.clone(),
            last_power_sync_time: None,
        }),
    }
}

/// Convert a hub VirtualMachine to `v1alpha1`
///
/// `lastPowerSyncTime` has no `v1alpha1` counterpart and is dropped.
pub fn from_hub(src: &hub::VirtualMachine) -> alpha::VirtualMachine {
    let s = &src.spec;
    alpha::VirtualMachine {
        metadata: src.metadata.clone(),
        spec: alpha::VirtualMachineSpec {
            cpu: s.cpu.clone(),
            memory: s.memory.clone(),
            cpu_model: s.cpu_model.clone(),
            dedicated_cpu_placement: s.dedicated_cpu_placement,
            numa_policy: s.numa_policy.clone(),
            numa: s.numa.as_ref().map(|n| alpha::NumaSpec {
                cells: n
                    .cells
                    .iter()
                    .map(|c| alpha::NumaCell {
                        id: c.id,
                        cpus: c.cpus.clone(),
                        memory: c.memory.clone(),
                        threads_per_core: c.threads_per_core,
                    })
                    .collect(),
            }),
            hugepages: s.hugepages.clone(),
            gpus: s.gpus.as_ref().map(|gpus| {
                gpus.iter()
                    .map(|g| alpha::GpuDevice {
                        name: g.name.clone(),
                        device_type: g.device_type.clone(),
                        resource_name: g.resource_name.clone(),
                    })
                    .collect()
            }),
            disks: s.disks.iter().map(disk_from_hub).collect(),
            nets: s.nets.iter().map(net_from_hub).collect(),
            cloud_init: s.cloud_init.as_ref().map(|c| alpha::CloudInitSpec {
                user_data: c.user_data.clone(),
                network_data: c.network_data.clone(),
                ssh_authorized_keys: c.ssh_authorized_keys.clone(),
                user_data_secret_ref: c.user_data_secret_ref.as_ref().map(name_from_hub),
                network_data_secret_ref: c.network_data_secret_ref.as_ref().map(name_from_hub),
            }),
            console: s.console.as_ref().map(|c| alpha::ConsoleDevices {
                vnc: c.vnc,
                serial: c.serial,
                r#type: c.r#type.clone(),
            }),
            live_migration: s.live_migration.as_ref().map(|m| alpha::LiveMigrationSpec {
                enabled: m.enabled,
                bandwidth: m.bandwidth.clone(),
                completion_timeout_seconds: m.completion_timeout_seconds,
                allow_post_copy: m.allow_post_copy,
                auto_converge: m.auto_converge,
            }),
            liveness_probe: s.liveness_probe.as_ref().map(probe_from_hub),
            readiness_probe: s.readiness_probe.as_ref().map(probe_from_hub),
            power_state: s.power_state.clone(),
            kube_virt: s.kube_virt.clone(),
        },
        status: src.status.as_ref().map(|st| alpha::VirtualMachineStatus {
            conditions: st.conditions.clone(),
            power_state: st.power_state.clone(),
            phase: st.phase.clone(),
            migration_state: st.migration_state.clone(),
        }),
    }
}

fn disk_to_hub(d: &alpha::VirtualMachineDisk) -> hub::VirtualMachineDisk {
    hub::VirtualMachineDisk {
        r#type: d.r#type.clone(),
        bus: d.bus.clone(),
        cache: d.cache.clone(),
        io_thread: d.io_thread,
        boot_order: d.boot_order,
        hotplug: d.hotplug,
        disk_ref: local_ref_to_hub(&d.disk_ref),
    }
}

fn disk_from_hub(d: &hub::VirtualMachineDisk) -> alpha::VirtualMachineDisk {
    alpha::VirtualMachineDisk {
        r#type: d.r#type.clone(),
        bus: d.bus.clone(),
        cache: d.cache.clone(),
        io_thread: d.io_thread,
        boot_order: d.boot_order,
        hotplug: d.hotplug,
        disk_ref: local_ref_from_hub(&d.disk_ref),
    }
}

fn net_to_hub(n: &alpha::VirtualMachineNetwork) -> hub::VirtualMachineNetwork {
    hub::VirtualMachineNetwork {
        r#type: n.r#type.clone(),
        nad_ref: n.nad_ref.as_ref().map(name_to_hub),
        model: n.model.clone(),
        bandwidth: n.bandwidth.clone(),
        sriov_resource: n.sriov_resource.clone(),
        multiqueue: n.multiqueue,
    }
}

fn net_from_hub(n: &hub::VirtualMachineNetwork) -> alpha::VirtualMachineNetwork {
    alpha::VirtualMachineNetwork {
        r#type: n.r#type.clone(),
        nad_ref: n.nad_ref.as_ref().map(name_from_hub),
        model: n.model.clone(),
        bandwidth: n.bandwidth.clone(),
        sriov_resource: n.sriov_resource.clone(),
        multiqueue: n.multiqueue,
    }
}

fn probe_to_hub(p: &alpha::Probe) -> hub::Probe {
    hub::Probe {
        period_seconds: p.period_seconds,
        timeout_seconds: p.timeout_seconds,
        failure_threshold: p.failure_threshold,
    }
}

fn probe_from_hub(p: &hub::Probe) -> alpha::Probe {
    alpha::Probe {
        period_seconds: p.period_seconds,
        timeout_seconds: p.timeout_seconds,
        failure_threshold: p.failure_threshold,
    }
}
