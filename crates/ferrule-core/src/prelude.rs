//! Common module for library exports

pub use crate::context::{EvalContext, PrintOptions};
pub use crate::dwarf::{CompUnit, Die, DieId, GimliUnitSource, UnitBuilder};
pub use crate::error::{FerruleError, FerruleResult};
pub use crate::expr::{Evaluated, Expression, Node};
pub use crate::format::Format;
pub use crate::target::Target;
pub use crate::types::{Address, Architecture, RegisterId, SourceLanguage, SymbolLocation};
pub use crate::value::Value;
pub use crate::variant::{Capabilities, Place, Type, TypeKind};
