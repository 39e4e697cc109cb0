//! VirtualNet conversion between `v1alpha1` and the hub

use crate::crd::{v1alpha1 as alpha, v1beta1 as hub};

pub fn to_hub(src: &alpha::VirtualNet) -> hub::VirtualNet {
    let s = &src.spec;
    hub::VirtualNet {
        metadata: src.metadata.clone(),
        spec: hub::VirtualNetSpec {
            nad_template: s.nad_template.clone(),
            bandwidth_limit: s.bandwidth_limit,
            vlan: s.vlan,
            sriov_resource: s.sriov_resource.clone(),
        },
        status: src.status.as_ref().map(|st| hub::VirtualNetStatus {
            conditions: st.conditions.clone(),
        }),
    }
}

pub fn from_hub(src: &hub::VirtualNet) -> alpha::VirtualNet {
    let s = &src.spec;
    alpha::VirtualNet {
        metadata: src.metadata.clone(),
        spec: alpha::VirtualNetSpec {
            nad_template: s.nad_template.clone(),
            bandwidth_limit: s.bandwidth_limit,
            vlan: s.vlan,
            sriov_resource: s.sriov_resource.clone(),
        },
        status: src.status.as_ref().map(|st| alpha::VirtualNetStatus {
            conditions: st.conditions.clone(),
        }),
    }
}
