//! Symbol demangling utilities.
//!
//! Names returned by [`crate::target::Target::lookup_address`] come straight
//! from the symbol table and are usually mangled. This module turns them back
//! into source names:
//!
//! - **Rust**: legacy (`_ZN...E`) and v0 (`_R...`) manglings via `rustc-demangle`
//! - **C++**: Itanium ABI (`_Z...`) via `cpp_demangle`
//! - **C**: unmangled, returned unchanged by callers

use cpp_demangle::{DemangleOptions, Symbol};
use rustc_demangle::try_demangle;

/// Demangle a raw symbol name, or `None` if it is not mangled
///
/// Legacy Rust names are also valid Itanium names; they are recognised by the
/// trailing `17h<hash>E` path segment.
#[must_use]
pub fn demangle(raw: &str) -> Option<String>
{
    let rust_like = raw.starts_with("_R") || (raw.starts_with("_ZN") && raw.contains("17h"));
    if rust_like {
        if let Ok(rust) = try_demangle(raw) {
            return Some(format!("{rust:#}"));
        }
    }
    if !raw.starts_with("_Z") {
        return None;
    }
    let symbol = Symbol::new(raw).ok()?;
    symbol.demangle(&DemangleOptions::default()).ok()
}

/// Class name described by a vtable symbol
///
/// `_ZTV7Derived` demangles to `vtable for Derived`; the class is the text after
/// the last space. Returns `None` for symbols that are not vtables.
#[must_use]
pub fn vtable_class(raw: &str) -> Option<String>
{
    let name = demangle(raw).unwrap_or_else(|| raw.to_string());
    let class = name.strip_prefix("vtable for ")?;
    Some(class.rsplit(' ').next().unwrap_or(class).to_string())
}
