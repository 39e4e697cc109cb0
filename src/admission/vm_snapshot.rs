//! VMSnapshot admission: source namespace defaulting and disk selection

use super::{denied, AdmissionHook};
use crate::crd::v1beta1::VMSnapshot;
use crate::crd::RetainPolicy;
use crate::error::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct VMSnapshotAdmission;

#[async_trait]
impl AdmissionHook for VMSnapshotAdmission {
    type Object = VMSnapshot;

    fn kind(&self) -> &'static str {
        "VMSnapshot"
    }

    fn apply_defaults(&self, snapshot: &mut VMSnapshot, namespace: &str) {
        let source = &mut snapshot.spec.source_ref;
        if source.namespace.is_empty() {
            source.namespace = namespace.to_string();
        }
        if snapshot.spec.retain_policy.is_empty() {
            snapshot.spec.retain_policy = RetainPolicy::DEFAULT.to_string();
        }
    }

    async fn validate(&self, snapshot: &VMSnapshot, namespace: &str) -> Result<()> {
        if snapshot.spec.source_ref.namespace != namespace {
            return Err(denied("sourceRef namespace must match snapshot namespace"));
        }
        if snapshot.spec.included_disks.is_empty() {
            return Err(denied("includedDisks must not be empty to ensure deterministic backups"));
        }
        if !snapshot.spec.retain_policy.is_empty() {
            snapshot
                .spec
                .retain_policy
                .parse::<RetainPolicy>()
                .map_err(|e| denied(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::v1beta1::{NamespacedName, VMSnapshotSpec};
    use crate::error::Error;
    use assert_matches::assert_matches;

    fn snapshot(source_ns: &str, disks: &[&str]) -> VMSnapshot {
        VMSnapshot::new(
            "snap",
            VMSnapshotSpec {
                source_ref: NamespacedName {
                    namespace: source_ns.into(),
                    name: "vm-1".into(),
                },
                included_disks: disks.iter().map(|d| d.to_string()).collect(),
                ..Default::default()
            },
        )
    }

    async fn run(mut snap: VMSnapshot) -> Result<VMSnapshot> {
        VMSnapshotAdmission.apply_defaults(&mut snap, "team-a");
        VMSnapshotAdmission.validate(&snap, "team-a").await.map(|_| snap)
    }

    #[tokio::test]
    async fn test_unset_namespace_is_defaulted() {
        let snap = run(snapshot("", &["root"])).await.unwrap();
        assert_eq!(snap.spec.source_ref.namespace, "team-a");
        assert_eq!(snap.spec.retain_policy, "Retain");
    }

    #[tokio::test]
    async fn test_retain_policy_symbols() {
        let mut delete = snapshot("team-a", &["root"]);
        delete.spec.retain_policy = "Delete".into();
        assert_eq!(run(delete).await.unwrap().spec.retain_policy, "Delete");

        let mut archive = snapshot("team-a", &["root"]);
        archive.spec.retain_policy = "Archive".into();
        assert_matches!(
            run(archive).await,
            Err(Error::AdmissionDenied(msg)) if msg == "unsupported retainPolicy Archive"
        );
    }

    #[tokio::test]
    async fn test_conflicting_namespace_is_denied() {
        assert_matches!(
            run(snapshot("team-b", &["root"])).await,
            Err(Error::AdmissionDenied(msg)) if msg.contains("sourceRef namespace")
        );
    }

    #[tokio::test]
    async fn test_empty_included_disks_is_denied() {
        assert_matches!(
            run(snapshot("team-a", &[])).await,
            Err(Error::AdmissionDenied(msg)) if msg.contains("includedDisks")
        );
    }
}
