//! Flat-memory target shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;

use ferrule_core::error::{FerruleError, FerruleResult};
use ferrule_core::target::Target;
use ferrule_core::types::{Address, RegisterId};

#[derive(Debug)]
pub struct MemoryTarget
{
    memory: HashMap<u64, u8>,
    registers: HashMap<RegisterId, u64>,
}

impl MemoryTarget
{
    pub fn new() -> Self
    {
        let mut registers = HashMap::new();
        registers.insert(RegisterId::Sp, 0x8000);
        Self {
            memory: HashMap::new(),
            registers,
        }
    }

    pub fn poke(&mut self, addr: u64, bytes: &[u8])
    {
        for (i, byte) in bytes.iter().enumerate() {
            self.memory.insert(addr + i as u64, *byte);
        }
    }

    pub fn poke_u32(&mut self, addr: u64, value: u32)
    {
        self.poke(addr, &value.to_le_bytes());
    }

    pub fn poke_u64(&mut self, addr: u64, value: u64)
    {
        self.poke(addr, &value.to_le_bytes());
    }

    pub fn stack_pointer(&self) -> u64
    {
        self.registers.get(&RegisterId::Sp).copied().unwrap_or_default()
    }
}

impl Target for MemoryTarget
{
    fn is_active(&self) -> bool
    {
        true
    }

    fn read_memory(&self, addr: Address, len: usize) -> FerruleResult<Vec<u8>>
    {
        (0..len as u64)
            .map(|i| {
                self.memory
                    .get(&(addr.value() + i))
                    .copied()
                    .ok_or_else(|| FerruleError::memory(addr.value() + i, "unmapped"))
            })
            .collect()
    }

    fn write_memory(&mut self, addr: Address, data: &[u8]) -> FerruleResult<usize>
    {
        self.poke(addr.value(), data);
        Ok(data.len())
    }

    fn read_register(&self, reg: RegisterId) -> FerruleResult<u64>
    {
        self.registers
            .get(&reg)
            .copied()
            .ok_or_else(|| FerruleError::Register(format!("{reg:?}")))
    }

    fn write_register(&mut self, reg: RegisterId, value: u64) -> FerruleResult<()>
    {
        self.registers.insert(reg, value);
        Ok(())
    }
}
