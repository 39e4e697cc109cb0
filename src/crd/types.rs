//! Enumerations shared by both API revisions
//!
//! Enum-valued fields travel as plain strings on the wire so that both
//! revisions keep identical symbol sets and an unknown symbol reaches the
//! reconciler as a configuration error instead of a decode failure.
//! These types are the parsed form the engine acts on.

use crate::error::{Error, Result};
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde_json::Value;
use std::str::FromStr;

// =============================================================================
// Power State
// =============================================================================

/// Desired or observed VM power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerState {
    Running,
    Stopped,
}

impl PowerState {
    pub const SYMBOLS: &'static [&'static str] = &["Running", "Stopped"];

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::Running => "Running",
            PowerState::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Running" => Ok(PowerState::Running),
            "Stopped" => Ok(PowerState::Stopped),
            other => Err(Error::UnknownPowerState(other.to_string())),
        }
    }
}

// =============================================================================
// Disk Type
// =============================================================================

/// Role of a disk attached to a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskType {
    System,
    Data,
    Ephemeral,
}

impl DiskType {
    pub const SYMBOLS: &'static [&'static str] = &["system", "data", "ephemeral"];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiskType::System => "system",
            DiskType::Data => "data",
            DiskType::Ephemeral => "ephemeral",
        }
    }

    /// Whether the disk must be satisfied by a provisioned backing volume
    pub fn needs_backing_volume(&self) -> bool {
        !matches!(self, DiskType::Ephemeral)
    }
}

impl std::fmt::Display for DiskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(DiskType::System),
            "data" => Ok(DiskType::Data),
            "ephemeral" => Ok(DiskType::Ephemeral),
            other => Err(Error::UnsupportedDiskType(other.to_string())),
        }
    }
}

// =============================================================================
// Network Type
// =============================================================================

/// Attachment type of a VM network interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkType {
    Bridge,
    Masquerade,
    Sriov,
}

impl NetworkType {
    pub const SYMBOLS: &'static [&'static str] = &["bridge", "masquerade", "sriov"];

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Bridge => "bridge",
            NetworkType::Masquerade => "masquerade",
            NetworkType::Sriov => "sriov",
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bridge" => Ok(NetworkType::Bridge),
            "masquerade" => Ok(NetworkType::Masquerade),
            "sriov" => Ok(NetworkType::Sriov),
            other => Err(Error::UnsupportedNetworkType(other.to_string())),
        }
    }
}

// =============================================================================
// Spec Symbol Sets
// =============================================================================

macro_rules! symbol_set {
    ($(#[$meta:meta])* $name:ident, $field:literal, { $($variant:ident => $symbol:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every accepted wire symbol
            pub const SYMBOLS: &'static [&'static str] = &[$($symbol),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $symbol),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($symbol => Ok($name::$variant),)+
                    other => Err(Error::UnsupportedValue {
                        field: $field.to_string(),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

symbol_set!(
    /// NUMA placement policy
    NumaPolicy, "numaPolicy", {
        None => "none",
        Strict => "strict",
        BestEffort => "best-effort",
    }
);

symbol_set!(
    /// Hugepage size backing guest memory; an empty string means no hugepages
    HugepageSize, "hugepages", {
        OneGi => "1Gi",
        TwoMi => "2Mi",
    }
);

symbol_set!(
    /// Disk bus presented to the guest
    DiskBus, "bus", {
        Virtio => "virtio",
        Sata => "sata",
        Scsi => "scsi",
    }
);

symbol_set!(
    /// Host page cache mode of a disk
    DiskCache, "cache", {
        None => "none",
        Writeback => "writeback",
        Writethrough => "writethrough",
        Directsync => "directsync",
    }
);

symbol_set!(
    GpuDeviceType, "deviceType", {
        Vgpu => "vgpu",
        Passthrough => "passthrough",
    }
);

symbol_set!(
    /// What happens to snapshot content once the VMSnapshot is deleted
    RetainPolicy, "retainPolicy", {
        Retain => "Retain",
        Delete => "Delete",
    }
);

impl NumaPolicy {
    pub const DEFAULT: NumaPolicy = NumaPolicy::None;
}

impl HugepageSize {
    /// Node allocatable resource advertising pages of this size
    pub fn resource_name(&self) -> String {
        format!("hugepages-{}", self.as_str())
    }
}

impl RetainPolicy {
    pub const DEFAULT: RetainPolicy = RetainPolicy::Retain;
}

// =============================================================================
// Schemas
// =============================================================================

/// String schema restricted to `symbols`, with an optional server-side default
pub(crate) fn symbol_schema(symbols: &[&str], default: Option<&str>) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        enum_values: Some(symbols.iter().map(|s| Value::String(s.to_string())).collect()),
        ..Default::default()
    };
    if let Some(default) = default {
        schema.metadata().default = Some(Value::String(default.to_string()));
    }
    Schema::Object(schema)
}

pub(crate) fn power_state_schema(_: &mut SchemaGenerator) -> Schema {
    symbol_schema(PowerState::SYMBOLS, Some(PowerState::Running.as_str()))
}

pub(crate) fn disk_type_schema(_: &mut SchemaGenerator) -> Schema {
    symbol_schema(DiskType::SYMBOLS, None)
}

pub(crate) fn network_type_schema(_: &mut SchemaGenerator) -> Schema {
    symbol_schema(NetworkType::SYMBOLS, None)
}

pub(crate) fn numa_policy_schema(_: &mut SchemaGenerator) -> Schema {
    symbol_schema(NumaPolicy::SYMBOLS, Some(NumaPolicy::DEFAULT.as_str()))
}

pub(crate) fn hugepages_schema(_: &mut SchemaGenerator) -> Schema {
    let symbols: Vec<&str> = std::iter::once("").chain(HugepageSize::SYMBOLS.iter().copied()).collect();
    symbol_schema(&symbols, None)
}

pub(crate) fn disk_bus_schema(_: &mut SchemaGenerator) -> Schema {
    symbol_schema(DiskBus::SYMBOLS, Some(DiskBus::Virtio.as_str()))
}

pub(crate) fn disk_cache_schema(_: &mut SchemaGenerator) -> Schema {
    symbol_schema(DiskCache::SYMBOLS, Some(DiskCache::None.as_str()))
}

pub(crate) fn gpu_device_type_schema(_: &mut SchemaGenerator) -> Schema {
    symbol_schema(GpuDeviceType::SYMBOLS, None)
}

pub(crate) fn retain_policy_schema(_: &mut SchemaGenerator) -> Schema {
    symbol_schema(RetainPolicy::SYMBOLS, Some(RetainPolicy::DEFAULT.as_str()))
}

// =============================================================================
// VM Phase
// =============================================================================

/// Coarse lifecycle phase reported in `status.phase`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmPhase {
    Running,
    Stopped,
    Terminating,
}

impl std::fmt::Display for VmPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmPhase::Running => write!(f, "Running"),
            VmPhase::Stopped => write!(f, "Stopped"),
            VmPhase::Terminating => write!(f, "Terminating"),
        }
    }
}

impl From<PowerState> for VmPhase {
    fn from(state: PowerState) -> Self {
        match state {
            PowerState::Running => VmPhase::Running,
            PowerState::Stopped => VmPhase::Stopped,
        }
    }
}

// =============================================================================
// Quantities
// =============================================================================

/// Parse a resource quantity (`"2"`, `"1.5"`, `"500m"`, `"8Gi"`) into
/// thousandths of its unit
///
/// Decimal and binary suffixes are accepted. Fractions below one
/// thousandth round up, as the API server does for CPU.
pub fn quantity_millis(value: &str) -> Result<u64> {
    let invalid = |reason: &str| Error::InvalidQuantity {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let split = value
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);

    let scale: u128 = match suffix {
        "m" => 1,
        "" => 1_000,
        "k" => 1_000_000,
        "M" => 1_000_000_000,
        "G" => 1_000_000_000_000,
        "T" => 1_000_000_000_000_000,
        "P" => 1_000_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000_000,
        "Ki" => 1_000 << 10,
        "Mi" => 1_000 << 20,
        "Gi" => 1_000 << 30,
        "Ti" => 1_000 << 40,
        "Pi" => 1_000 << 50,
        "Ei" => 1_000 << 60,
        _ => return Err(invalid("expected a decimal number with an optional unit suffix")),
    };

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid("expected a decimal number"));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("expected a decimal number"));
    }
    if fraction.len() > 18 {
        return Err(invalid("too many decimal places"));
    }

    let digits = |part: &str| -> Result<u128> {
        if part.is_empty() {
            Ok(0)
        } else {
            part.parse::<u128>().map_err(|e| invalid(&e.to_string()))
        }
    };
    let whole = digits(whole)?;
    let numerator = digits(fraction)?;
    let denominator = 10u128.pow(fraction.len() as u32);

    let millis = whole
        .checked_mul(scale)
        .zip(numerator.checked_mul(scale))
        .and_then(|(whole, part)| whole.checked_add((part + denominator - 1) / denominator))
        .ok_or_else(|| invalid("quantity overflows"))?;

    u64::try_from(millis).map_err(|_| invalid("quantity overflows"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_power_state_parse() {
        assert_eq!("Running".parse::<PowerState>().unwrap(), PowerState::Running);
        assert_eq!("Stopped".parse::<PowerState>().unwrap(), PowerState::Stopped);
        assert_matches!(
            "running".parse::<PowerState>(),
            Err(Error::UnknownPowerState(s)) if s == "running"
        );
    }

    #[test]
    fn test_disk_type_parse() {
        assert!(DiskType::System.needs_backing_volume());
        assert!(!DiskType::Ephemeral.needs_backing_volume());
        assert_matches!("cdrom".parse::<DiskType>(), Err(Error::UnsupportedDiskType(_)));
    }

    #[test]
    fn test_network_type_roundtrip_symbols() {
        for t in [NetworkType::Bridge, NetworkType::Masquerade, NetworkType::Sriov] {
            assert_eq!(t.as_str().parse::<NetworkType>().unwrap(), t);
        }
    }

    #[test]
    fn test_vm_phase_follows_power_state() {
        assert_eq!(VmPhase::from(PowerState::Running).to_string(), "Running");
        assert_eq!(VmPhase::from(PowerState::Stopped).to_string(), "Stopped");
        assert_eq!(VmPhase::Terminating.to_string(), "Terminating");
    }

    #[test]
    fn test_spec_symbols() {
        assert_eq!("best-effort".parse::<NumaPolicy>().unwrap(), NumaPolicy::BestEffort);
        assert_eq!(NumaPolicy::DEFAULT.as_str(), "none");
        assert_eq!("2Mi".parse::<HugepageSize>().unwrap().resource_name(), "hugepages-2Mi");
        assert_eq!(RetainPolicy::DEFAULT, RetainPolicy::Retain);
        for bus in DiskBus::SYMBOLS {
            assert_eq!(bus.parse::<DiskBus>().unwrap().as_str(), *bus);
        }
        assert_matches!(
            "preferred".parse::<NumaPolicy>(),
            Err(Error::UnsupportedValue { field, value }) if field == "numaPolicy" && value == "preferred"
        );
        assert!("Snapshot".parse::<RetainPolicy>().is_err());
        assert!("ide".parse::<DiskBus>().is_err());
    }

    #[test]
    fn test_symbol_schema_lists_values() {
        let schema = serde_json::to_value(retain_policy_schema(&mut SchemaGenerator::default())).unwrap();
        assert_eq!(schema["type"], "string");
        assert_eq!(schema["enum"], serde_json::json!(["Retain", "Delete"]));
        assert_eq!(schema["default"], "Retain");

        let schema = serde_json::to_value(hugepages_schema(&mut SchemaGenerator::default())).unwrap();
        assert_eq!(schema["enum"], serde_json::json!(["", "1Gi", "2Mi"]));
        assert!(schema.get("default").is_none());
    }

    #[test]
    fn test_quantity_millis() {
        assert_eq!(quantity_millis("2").unwrap(), 2000);
        assert_eq!(quantity_millis("500m").unwrap(), 500);
        assert_eq!(quantity_millis("0.5").unwrap(), 500);
        assert_eq!(quantity_millis("1.5").unwrap(), 1500);
        assert_eq!(quantity_millis(".25").unwrap(), 250);
        assert_eq!(quantity_millis("0.5m").unwrap(), 1);
        assert_eq!(quantity_millis("2Ki").unwrap(), 2_048_000);
        assert_eq!(quantity_millis("1k").unwrap(), 1_000_000);
        assert_eq!(quantity_millis("8Gi").unwrap(), 8 * 1_000 * (1u64 << 30));
        assert_eq!(quantity_millis("0").unwrap(), 0);
    }

    #[test]
    fn test_quantity_millis_rejects_garbage() {
        for bad in ["", "m", ".", "1.5.2", "-1", "two", "1e3", "4 Gi", "100Ei"] {
            assert_matches!(quantity_millis(bad), Err(Error::InvalidQuantity { .. }), "{}", bad);
        }
    }
}
