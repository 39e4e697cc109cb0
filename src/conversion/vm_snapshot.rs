//! VMSnapshot conversion between `v1alpha1` and the hub

use crate::crd::{v1alpha1 as alpha, v1beta1 as hub};

use super::{name_from_hub, name_to_hub};

pub fn to_hub(src: &alpha::VMSnapshot) -> hub::VMSnapshot {
    let s = &src.spec;
    hub::VMSnapshot {
        metadata: src.metadata.clone(),
        spec: hub::VMSnapshotSpec {
            source_ref: name_to_hub(&s.source_ref),
            included_disks: s.included_disks.clone(),
            retain_policy: s.retain_policy.clone(),
        },
        status: src.status.as_ref().map(|st| hub::VMSnapshotStatus {
            conditions: st.conditions.clone(),
            ready_to_use: st.ready_to_use,
        }),
    }
}

pub fn from_hub(src: &hub::VMSnapshot) -> alpha::VMSnapshot {
    let s = &src.spec;
    alpha::VMSnapshot {
        metadata: src.metadata.clone(),
        spec: alpha::VMSnapshotSpec {
            source_ref: name_from_hub(&s.source_ref),
            included_disks: s.included_disks.clone(),
            retain_policy: s.retain_policy.clone(),
        },
        status: src.status.as_ref().map(|st| alpha::VMSnapshotStatus {
            conditions: st.conditions.clone(),
            ready_to_use: st.ready_to_use,
        }),
    }
}
