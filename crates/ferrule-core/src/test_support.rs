//! Sparse-memory target shared by unit tests.

use std::collections::HashMap;

use crate::error::{FerruleError, FerruleResult};
use crate::types::{Address, RegisterId, SymbolLocation};
use crate::value::Value;
use crate::target::Target;

#[derive(Debug, Default)]
pub struct SparseTarget
{
    pub memory: HashMap<u64, u8>,
    pub registers: HashMap<RegisterId, u64>,
    pub symbols: Vec<(String, u64, u64)>,
    pub variables: HashMap<String, Value>,
    pub calls: Vec<(u64, Vec<u64>)>,
    pub call_result: u64,
}

impl SparseTarget
{
    pub fn new() -> Self
    {
        let mut target = Self::default();
        target.registers.insert(RegisterId::Sp, 0x8000);
        target
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

    pub fn peek_u32(&self, addr: u64) -> u32
    {
        let bytes: Vec<u8> = (0..4).map(|i| self.memory.get(&(addr + i)).copied().unwrap_or(0)).collect();
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Symbol `name` covering `[start, start + len)`
    pub fn symbol(&mut self, name: &str, start: u64, len: u64)
    {
        self.symbols.push((name.to_string(), start, len));
    }
}

impl Target for SparseTarget
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

    fn lookup_address(&self, addr: Address) -> Option<SymbolLocation>
    {
        self.symbols
            .iter()
            .find(|(_, start, len)| addr.value() >= *start && addr.value() < start + len)
            .map(|(name, start, _)| SymbolLocation::new(name.clone(), addr.value() - start))
    }

    fn lookup_function(&self, name: &str) -> Option<Address>
    {
        self.symbols
            .iter()
            .find(|(candidate, _, _)| candidate == name)
            .map(|(_, start, _)| Address::new(*start))
    }

    fn lookup_symbol(&self, name: &str, case_blind: bool) -> Option<Address>
    {
        self.symbols
            .iter()
            .find(|(candidate, _, _)| {
                if case_blind {
                    candidate.eq_ignore_ascii_case(name)
                } else {
                    candidate == name
                }
            })
            .map(|(_, start, _)| Address::new(*start))
    }

    fn call_function(&mut self, function: Address, args: &[u64]) -> FerruleResult<u64>
    {
        self.calls.push((function.value(), args.to_vec()));
        Ok(self.call_result)
    }

    fn debugger_variable(&self, name: &str) -> Option<Value>
    {
        self.variables.get(name).cloned()
    }

    fn set_debugger_variable(&mut self, name: &str, value: Value) -> FerruleResult<()>
    {
        self.variables.insert(name.to_string(), value);
        Ok(())
    }
}
