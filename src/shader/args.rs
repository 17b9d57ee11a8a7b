//! Command-line compile flags shared by `sfn-compile` and the `.sir` RUN lines.

use clap::Args;

use crate::core::{BindingSpace, BindingTable, ChipClass, DeviceCaps};

use super::CompileOptions;

fn parse_chip(name: &str) -> Result<ChipClass, String> {
    ChipClass::from_name(name).ok_or_else(|| format!("unknown chip '{}'", name))
}

/// Device, binding and output flags of one compilation.
#[derive(Args, Debug, Clone)]
pub struct CompileArgs {
    /// Target chip class (r600, r700, evergreen, cayman)
    #[arg(long, default_value = "evergreen", value_parser = parse_chip)]
    pub chip: ChipClass,
    /// Override the GPR budget of every stage
    #[arg(long)]
    pub gpr_budget: Option<u32>,
    /// Maximum constant-cache lines one ALU instruction may read
    #[arg(long)]
    pub const_limit: Option<u32>,
    /// Bind texture slots 0..N
    #[arg(long, default_value_t = 0)]
    pub textures: u32,
    /// Bind uniform buffers 0..N
    #[arg(long, default_value_t = 0)]
    pub ubos: u32,
    /// Bind storage buffers 0..N
    #[arg(long, default_value_t = 0)]
    pub ssbos: u32,
    /// Bind images 0..N
    #[arg(long, default_value_t = 0)]
    pub images: u32,
    /// Bind atomic counter buffers 0..N
    #[arg(long, default_value_t = 0)]
    pub atomics: u32,
    /// Do not add constant exports for missing outputs
    #[arg(long)]
    pub no_dummy_exports: bool,
    /// Print the parsed program before the listing
    #[arg(long)]
    pub print_ir: bool,
    /// Print the resource and statistics report after the listing
    #[arg(long, visible_alias = "print-report")]
    pub report: bool,
}

impl CompileArgs {
    pub fn device_caps(&self) -> DeviceCaps {
        let mut caps = DeviceCaps::for_chip(self.chip);
        if let Some(gprs) = self.gpr_budget {
            caps = caps.with_gpr_budget(gprs);
        }
        if let Some(limit) = self.const_limit {
            caps = caps.with_const_read_limit(limit);
        }
        caps
    }

    pub fn bindings(&self) -> BindingTable {
        let mut bindings = BindingTable::new();
        bindings
            .bind_range(BindingSpace::Texture, self.textures)
            .bind_range(BindingSpace::UniformBuffer, self.ubos)
            .bind_range(BindingSpace::StorageBuffer, self.ssbos)
            .bind_range(BindingSpace::Image, self.images)
            .bind_range(BindingSpace::AtomicCounter, self.atomics);
        bindings
    }

    pub fn options(&self) -> CompileOptions {
        CompileOptions {
            dummy_exports: !self.no_dummy_exports,
        }
    }
}
