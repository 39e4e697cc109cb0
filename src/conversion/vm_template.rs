//! VMTemplate conversion between `v1alpha1` and the hub

use crate::crd::{v1alpha1 as alpha, v1beta1 as hub};

pub fn to_hub(src: &alpha::VMTemplate) -> hub::VMTemplate {
    let s = &src.spec;
    hub::VMTemplate {
        metadata: src.metadata.clone(),
        spec: hub::VMTemplateSpec {
            parameters: hub::TemplateParameters {
                cpu: s.parameters.cpu.clone(),
                memory: s.parameters.memory.clone(),
                os: s.parameters.os.clone(),
                image: s.parameters.image.clone(),
                networks: s.parameters.networks.clone(),
                disks: s
                    .parameters
                    .disks
                    .iter()
                    .map(|d| hub::TemplateDisk {
                        name: d.name.clone(),
                        size: d.size.clone(),
                        r#type: d.r#type.clone(),
                    })
                    .collect(),
            },
            constraints: hub::TemplateConstraints {
                min_cpu: s.constraints.min_cpu.clone(),
                max_cpu: s.constraints.max_cpu.clone(),
                min_memory: s.constraints.min_memory.clone(),
                max_memory: s.constraints.max_memory.clone(),
            },
            ui_hints: s.ui_hints.clone(),
        },
        status: src.status.as_ref().map(|st| hub::VMTemplateStatus {
            conditions: st.conditions.clone(),
        }),
    }
}

pub fn from_hub(src: &hub::VMTemplate) -> alpha::VMTemplate {
    let s = &src.spec;
    alpha::VMTemplate {
        metadata: src.metadata.clone(),
        spec: alpha::VMTemplateSpec {
            parameters: alpha::TemplateParameters {
                cpu: s.parameters.cpu.clone(),
                memory: s.parameters.memory.clone(),
                os: s.parameters.os.clone(),
                image: s.parameters.image.clone(),
                networks: s.parameters.networks.clone(),
                disks: s
                    .parameters
                    .disks
                    .iter()
                    .map(|d| alpha::TemplateDisk {
                        name: d.name.clone(),
                        size: d.size.clone(),
                        r#type: d.r#type.clone(),
                    })
                    .collect(),
            },
            constraints: alpha::TemplateConstraints {
                min_cpu: s.constraints.min_cpu.clone(),
                max_cpu: s.constraints.max_cpu.clone(),
                min_memory: s.constraints.min_memory.clone(),
                max_memory: s.constraints.max_memory.clone(),
            },
            ui_hints: s.ui_hints.clone(),
        },
        status: src.status.as_ref().map(|st| alpha::VMTemplateStatus {
            conditions: st.conditions.clone(),
        }),
    }
}
