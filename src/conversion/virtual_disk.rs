//! VirtualDisk conversion between `v1alpha1` and the hub

use crate::crd::{v1alpha1 as alpha, v1beta1 as hub};

pub fn to_hub(src: &alpha::VirtualDisk) -> hub::VirtualDisk {
    let s = &src.spec;
    hub::VirtualDisk {
        metadata: src.metadata.clone(),
        spec: hub::VirtualDiskSpec {
            backing: s.backing.clone(),
            size: s.size.clone(),
            access_mode: s.access_mode.clone(),
            volume_mode: s.volume_mode.clone(),
            storage_class: s.storage_class.clone(),
        },
        status: src.status.as_ref().map(|st| hub::VirtualDiskStatus {
            conditions: st.conditions.clone(),
        }),
    }
}

pub fn from_hub(src: &hub::VirtualDisk) -> alpha::VirtualDisk {
    let s = &src.spec;
    alpha::VirtualDisk {
        metadata: src.metadata.clone(),
        spec: alpha::VirtualDiskSpec {
            backing: s.backing.clone(),
            size: s.size.clone(),
            access_mode: s.access_mode.clone(),
            volume_mode: s.volume_mode.clone(),
            storage_class: s.storage_class.clone(),
        },
        status: src.status.as_ref().map(|st| alpha::VirtualDiskStatus {
            conditions: st.conditions.clone(),
        }),
    }
}
