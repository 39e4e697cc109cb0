//! VMTemplate admission: required shape and CPU bounds

use super::{denied, AdmissionHook};
use crate::crd::quantity_millis;
use crate::crd::v1beta1::VMTemplate;
use crate::error::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct VMTemplateAdmission;

#[async_trait]
impl AdmissionHook for VMTemplateAdmission {
    type Object = VMTemplate;

    fn kind(&self) -> &'static str {
        "VMTemplate"
    }

    fn apply_defaults(&self, _template: &mut VMTemplate, _namespace: &str) {}

    async fn validate(&self, template: &VMTemplate, _namespace: &str) -> Result<()> {
        let params = &template.spec.parameters;
        if params.cpu.is_empty() || params.memory.is_empty() {
            return Err(denied("parameters.cpu and parameters.memory must be specified"));
        }

        let constraints = &template.spec.constraints;
        if constraints.min_cpu.is_empty() || constraints.max_cpu.is_empty() {
            return Ok(());
        }

        let min = quantity_millis(&constraints.min_cpu).map_err(|e| denied(format!("constraints.minCPU: {}", e)))?;
        let max = quantity_millis(&constraints.max_cpu).map_err(|e| denied(format!("constraints.maxCPU: {}", e)))?;
        if max < min {
            return Err(denied("constraints.maxCPU must be >= minCPU"));
        }
        Ok(())
    }
}
