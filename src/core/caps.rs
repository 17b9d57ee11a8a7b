//! Device capabilities consumed by the backend as hard limits.
//!
//! The capability record is produced by the device layer and is immutable for
//! the duration of a compilation. Presets cover the supported chip classes;
//! the builder-style overrides exist for drivers that split the register file
//! differently and for tests.

use std::fmt;

use crate::ir::ShaderStage;

/// Architecture generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChipClass {
    R600,
    R700,
    Evergreen,
    Cayman,
}

impl ChipClass {
    pub fn name(self) -> &'static str {
        match self {
            ChipClass::R600 => "r600",
            ChipClass::R700 => "r700",
            ChipClass::Evergreen => "evergreen",
            ChipClass::Cayman => "cayman",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "r600" => Some(ChipClass::R600),
            "r700" => Some(ChipClass::R700),
            "evergreen" | "eg" => Some(ChipClass::Evergreen),
            "cayman" | "cm" => Some(ChipClass::Cayman),
            _ => None,
        }
    }

    /// RAT (random access target) writes, GDS atomics and storage buffers.
    pub fn has_rat(self) -> bool {
        self >= ChipClass::Evergreen
    }
}

impl fmt::Display for ChipClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-stage hardware budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBudget {
    /// General purpose registers available to one thread of the stage.
    pub gprs: u32,
    /// Parameter (varying) export slots.
    pub param_exports: u32,
}

/// Capability constants of the target device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCaps {
    pub chip: ChipClass,
    /// Size of the GPR file shared by all stages.
    pub gpr_file_size: u32,
    /// Number of SIMD engines.
    pub num_simds: u32,
    /// Local data share size in bytes.
    pub lds_size: u32,
    pub vertex: StageBudget,
    pub fragment: StageBudget,
    pub compute: StageBudget,
    pub geometry: StageBudget,
    /// Distinct constant cache lines one ALU instruction may read.
    pub const_read_limit: u32,
    /// Sampler view slots per stage.
    pub max_textures: u32,
    /// Image slots; storage buffers use the RAT ids after them.
    pub max_images: u32,
    /// RAT ids available for images and storage buffers together.
    pub max_rats: u32,
    /// Position exports (position, misc vector, clip distances).
    pub max_pos_exports: u32,
    /// Pixel (color target) exports.
    pub max_pixel_exports: u32,
}

impl DeviceCaps {
    /// Preset for a chip class.
    pub fn for_chip(chip: ChipClass) -> Self {
        let (gprs, simds, lds, const_limit) = match chip {
            ChipClass::R600 => (124, 4, 0, 2),
            ChipClass::R700 => (124, 10, 16 * 1024, 2),
            ChipClass::Evergreen => (124, 20, 32 * 1024, 4),
            ChipClass::Cayman => (124, 24, 32 * 1024, 4),
        };
        let budget = StageBudget {
            gprs,
            param_exports: 32,
        };
        Self {
            chip,
            gpr_file_size: 256,
            num_simds: simds,
            lds_size: lds,
            vertex: budget,
            fragment: budget,
            compute: budget,
            geometry: budget,
            const_read_limit: const_limit,
            max_textures: 18,
            max_images: if chip.has_rat() { 8 } else { 0 },
            max_rats: if chip.has_rat() { 12 } else { 0 },
            max_pos_exports: 4,
            max_pixel_exports: 8,
        }
    }

    pub fn budget(&self, stage: ShaderStage) -> StageBudget {
        match stage {
            ShaderStage::Vertex => self.vertex,
            ShaderStage::Fragment => self.fragment,
            ShaderStage::Compute => self.compute,
            ShaderStage::Geometry => self.geometry,
        }
    }

    /// Override the GPR budget of every stage.
    pub fn with_gpr_budget(mut self, gprs: u32) -> Self {
        for budget in [
            &mut self.vertex,
            &mut self.fragment,
            &mut self.compute,
            &mut self.geometry,
        ] {
            budget.gprs = gprs;
        }
        self
    }

    pub fn with_stage_budget(mut self, stage: ShaderStage, budget: StageBudget) -> Self {
        match stage {
            ShaderStage::Vertex => self.vertex = budget,
            ShaderStage::Fragment => self.fragment = budget,
            ShaderStage::Compute => self.compute = budget,
            ShaderStage::Geometry => self.geometry = budget,
        }
        self
    }

    pub fn with_const_read_limit(mut self, limit: u32) -> Self {
        self.const_read_limit = limit.max(1);
        self
    }
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self::for_chip(ChipClass::Evergreen)
    }
}
