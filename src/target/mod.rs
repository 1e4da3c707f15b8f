use std::fmt;
use std::str::FromStr;

use crate::utils::join;

const X64_REGISTERS: &[&str] = &[
    "rax", "rbx", "rdx", "rcx", "rdi", "r8", "r9", "r11", "r14", "r12",
];

const X64_DOUBLE_REGISTERS: &[&str] = &[
    "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9", "xmm10", "xmm11",
    "xmm12", "xmm13", "xmm14", "xmm15",
];

const IA32_REGISTERS: &[&str] = &["eax", "ecx", "edx", "ebx", "edi"];

const IA32_DOUBLE_REGISTERS: &[&str] = &["xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7"];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Target {
    X64,
    Ia32,
}

impl Target {
    pub fn available() -> Vec<Target> {
        vec![Target::X64, Target::Ia32]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::X64 => "x64",
            Target::Ia32 => "ia32",
        }
    }

    fn registers(&self) -> &'static [&'static str] {
        match self {
            Target::X64 => X64_REGISTERS,
            Target::Ia32 => IA32_REGISTERS,
        }
    }

    fn double_registers(&self) -> &'static [&'static str] {
        match self {
            Target::X64 => X64_DOUBLE_REGISTERS,
            Target::Ia32 => IA32_DOUBLE_REGISTERS,
        }
    }

    /// Number of general purpose registers the allocator may hand out.
    pub fn num_allocatable_registers(&self) -> usize {
        self.registers().len()
    }

    pub fn num_allocatable_double_registers(&self) -> usize {
        self.double_registers().len()
    }

    pub fn pointer_size(&self) -> usize {
        match self {
            Target::X64 => 8,
            Target::Ia32 => 4,
        }
    }

    /// Allocation index of the register holding call results.
    pub fn return_register(&self) -> u8 {
        0
    }

    /// Allocation indices of the fixed inputs of a generic binary stub.
    pub fn binary_stub_registers(&self) -> (u8, u8) {
        // (left, right) = (rdx/edx, rax/eax)
        match self {
            Target::X64 => (2, 0),
            Target::Ia32 => (2, 0),
        }
    }

    /// Register reserved for breaking move cycles. Its index sits right past
    /// the allocatable ones.
    pub fn scratch_register(&self) -> u8 {
        self.num_allocatable_registers() as u8
    }

    pub fn double_scratch_register(&self) -> u8 {
        self.num_allocatable_double_registers() as u8
    }

    pub fn register_name(&self, index: u8) -> &'static str {
        if index == self.scratch_register() {
            return match self {
                Target::X64 => "r10",
                Target::Ia32 => "esi",
            };
        }
        self.registers()
            .get(index as usize)
            .copied()
            .unwrap_or("<invalid>")
    }

    pub fn double_register_name(&self, index: u8) -> &'static str {
        if index == self.double_scratch_register() {
            return "xmm0";
        }
        self.double_registers()
            .get(index as usize)
            .copied()
            .unwrap_or("<invalid>")
    }

    pub fn frame_pointer(&self) -> &'static str {
        match self {
            Target::X64 => "rbp",
            Target::Ia32 => "ebp",
        }
    }

    pub fn stack_pointer(&self) -> &'static str {
        match self {
            Target::X64 => "rsp",
            Target::Ia32 => "esp",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Target, Self::Err> {
        match s {
            "x64" | "x86_64" | "amd64" => Ok(Target::X64),
            "ia32" | "x86" | "i386" => Ok(Target::Ia32),
            _ => Err(format!(
                "{} is not a valid target, expected one of: {}",
                s,
                join(Target::available(), ", ")
            )),
        }
    }
}

impl Default for Target {
    fn default() -> Target {
        Target::X64
    }
}
