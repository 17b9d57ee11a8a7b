//! Resource report of a compiled shader.
//!
//! The report is what the scheduling and encoding stages need besides the
//! instruction list itself: how many GPRs the shader uses, which registers the
//! hardware preloads, where outputs are exported and which constant banks,
//! texture slots, RATs and atomic counters it touches.

use std::fmt;

use crate::core::{ChipClass, RegId, ShaderStats};
use crate::ir::{Semantic, ShaderStage};
use crate::target::ExportKind;

/// One export emitted during finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    pub kind: ExportKind,
    pub base: u32,
    pub semantic: Semantic,
    pub spi_sid: u32,
}

#[derive(Debug, Clone)]
pub struct ShaderReport {
    pub stage: ShaderStage,
    pub chip: ChipClass,
    pub gpr_count: u32,
    pub reserved_gprs: Vec<RegId>,
    pub exports: Vec<ExportRecord>,
    pub kcache_banks: Vec<u8>,
    pub textures: Vec<u32>,
    pub ubos: Vec<u32>,
    pub ssbos: Vec<u32>,
    pub images: Vec<u32>,
    pub rat_ids: Vec<u32>,
    /// Hardware location per (binding, byte offset) of each atomic counter.
    pub atomic_locations: Vec<((u32, u32), u32)>,
    pub scratch_slots: u32,
    /// Bytes per vertex written to the GSVS ring (geometry shaders).
    pub ring_item_size: Option<u32>,
    pub uses_kill: bool,
    pub stats: ShaderStats,
}

impl ShaderReport {
    pub fn export_count(&self, kind: ExportKind) -> usize {
        self.exports.iter().filter(|e| e.kind == kind).count()
    }
}

fn list<T: fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "-".to_string();
    }
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",")
}

impl fmt::Display for ShaderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "stage: {} ({})", self.stage, self.chip)?;
        writeln!(f, "gprs: {}", self.gpr_count)?;
        let reserved: Vec<String> = self.reserved_gprs.iter().map(|r| format!("R{}", r)).collect();
        writeln!(f, "reserved: {}", list(&reserved))?;
        for export in &self.exports {
            write!(f, "export: {} {}", export.kind.name(), export.base)?;
            if export.kind == ExportKind::Param {
                write!(f, " sid:{}", export.spi_sid)?;
            }
            writeln!(f)?;
        }
        writeln!(f, "kcache: {}", list(&self.kcache_banks))?;
        writeln!(f, "textures: {}", list(&self.textures))?;
        writeln!(f, "ubos: {}", list(&self.ubos))?;
        writeln!(f, "ssbos: {}", list(&self.ssbos))?;
        writeln!(f, "images: {}", list(&self.images))?;
        writeln!(f, "rats: {}", list(&self.rat_ids))?;
        let atomics: Vec<String> = self
            .atomic_locations
            .iter()
            .map(|((binding, offset), loc)| format!("{}+{}@{}", binding, offset, loc))
            .collect();
        writeln!(f, "atomics: {}", list(&atomics))?;
        writeln!(f, "scratch: {}", self.scratch_slots)?;
        if let Some(size) = self.ring_item_size {
            writeln!(f, "ring item: {}", size)?;
        }
        if self.uses_kill {
            writeln!(f, "uses kill")?;
        }
        write!(f, "{}", self.stats)
    }
}
