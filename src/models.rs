// nllb-sidecar: model catalog, compute types, stepdown chain

use serde::{Deserialize, Serialize};

/// A compute type (quantization/precision) a model can be loaded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeType {
    Float32,
    Float16,
    Bfloat16,
    Int8,
    Int8Float16,
    Int8Bfloat16,
}

impl ComputeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeType::Float32 => "float32",
            ComputeType::Float16 => "float16",
            ComputeType::Bfloat16 => "bfloat16",
            ComputeType::Int8 => "int8",
            ComputeType::Int8Float16 => "int8_float16",
            ComputeType::Int8Bfloat16 => "int8_bfloat16",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "float32" => Some(ComputeType::Float32),
            "float16" => Some(ComputeType::Float16),
            "bfloat16" => Some(ComputeType::Bfloat16),
            "int8" => Some(ComputeType::Int8),
            "int8_float16" => Some(ComputeType::Int8Float16),
            "int8_bfloat16" => Some(ComputeType::Int8Bfloat16),
            _ => None,
        }
    }

    /// Bytes per parameter for this compute type.
    pub fn bytes_per_param(&self) -> f64 {
        match self {
            ComputeType::Float32 => 4.0,
            ComputeType::Float16 | ComputeType::Bfloat16 => 2.0,
            ComputeType::Int8 | ComputeType::Int8Float16 | ComputeType::Int8Bfloat16 => 1.0,
        }
    }

    /// Ordered device preference list: most-preferred first.
    pub fn preference_order(device: Device) -> &'static [ComputeType] {
        match device {
            Device::Gpu => &[
                ComputeType::Int8Float16,
                ComputeType::Float16,
                ComputeType::Int8,
                ComputeType::Float32,
            ],
            Device::Cpu => &[ComputeType::Int8, ComputeType::Float32],
        }
    }
}

pub const ALL_COMPUTE_TYPES: &[ComputeType] = &[
    ComputeType::Float32,
    ComputeType::Float16,
    ComputeType::Bfloat16,
    ComputeType::Int8,
    ComputeType::Int8Float16,
    ComputeType::Int8Bfloat16,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Cpu,
    Gpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Gpu => "gpu",
        }
    }
}

/// Fixed memory overhead (runtime, activations, buffers) added on top of
/// the raw parameter footprint when estimating total memory use.
pub const OVERHEAD_MB: f64 = 300.0;

/// Static catalog entry for one model in the NLLB-200 family.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub model_id: &'static str,
    pub params_m: f64,
    pub label: &'static str,
    pub cpu_practical: bool,
}

pub const NLLB_SPECS: &[ModelSpec] = &[
    ModelSpec {
        model_id: "facebook/nllb-200-3.3B",
        params_m: 3300.0,
        label: "3.3B",
        cpu_practical: false,
    },
    ModelSpec {
        model_id: "facebook/nllb-200-distilled-1.3B",
        params_m: 1300.0,
        label: "1.3B-distilled",
        cpu_practical: true,
    },
    ModelSpec {
        model_id: "facebook/nllb-200-distilled-600M",
        params_m: 600.0,
        label: "600M-distilled",
        cpu_practical: true,
    },
];

/// `NLLB_PARAMS` alias resolution: "600m" / "1.3b" / "3.3b" -> model id.
pub fn resolve_params_alias(alias: &str) -> Option<&'static str> {
    match alias.to_lowercase().as_str() {
        "600m" => Some("facebook/nllb-200-distilled-600M"),
        "1.3b" => Some("facebook/nllb-200-distilled-1.3B"),
        "3.3b" => Some("facebook/nllb-200-3.3B"),
        _ => None,
    }
}

/// Estimated total memory footprint in MB for a model at a given
/// compute type: raw parameter bytes plus fixed overhead.
pub fn estimate_mb(params_m: f64, compute_type: ComputeType) -> f64 {
    params_m * 1_000_000.0 * compute_type.bytes_per_param() / (1024.0 * 1024.0) + OVERHEAD_MB
}

/// The fixed stepdown chain: each model steps down to the next smaller
/// one, terminating at `None` (no further fallback) for the smallest.
pub fn stepdown_target(model_id: &str) -> Option<&'static str> {
    match model_id {
        "facebook/nllb-200-3.3B" => Some("facebook/nllb-200-distilled-1.3B"),
        "facebook/nllb-200-distilled-1.3B" => Some("facebook/nllb-200-distilled-600M"),
        "facebook/nllb-200-distilled-600M" => None,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stepdown_chain_terminates() {
        let mut cur = "facebook/nllb-200-3.3B";
        let mut hops = 0;
        while let Some(next) = stepdown_target(cur) {
            cur = next;
            hops += 1;
            assert!(hops < 10, "chain should terminate quickly");
        }
        assert_eq!(cur, "facebook/nllb-200-distilled-600M");
    }

    #[test]
    fn estimate_scales_with_precision() {
        let fp32 = estimate_mb(600.0, ComputeType::Float32);
        let int8 = estimate_mb(600.0, ComputeType::Int8);
        assert!(int8 < fp32);
    }

    #[test]
    fn params_alias_resolves() {
        assert_eq!(
            resolve_params_alias("1.3b"),
            Some("facebook/nllb-200-distilled-1.3B")
        );
        assert_eq!(resolve_params_alias("bogus"), None);
    }
}
