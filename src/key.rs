//! Service identity

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifies a requested capability.
///
/// Any `'static` type can be a key, including trait objects: registering
/// under `dyn Greeter` and resolving `dyn Greeter` meet at the same key.
/// Equality only looks at the `TypeId`; the name is kept for diagnostics.
#[derive(Clone, Copy)]
pub struct ServiceKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl ServiceKey {
    /// Key for the service type `S`.
    #[inline]
    pub fn of<S: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            type_name: std::any::type_name::<S>(),
        }
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Fully qualified type name.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type name without the leading module path.
    #[inline]
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.type_name)
    }
}

impl PartialEq for ServiceKey {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceKey").field(&self.type_name).finish()
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Strip the module path of the outermost type, keeping generic arguments.
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter {}
    struct English;

    #[test]
    fn test_key_equality_ignores_name() {
        assert_eq!(ServiceKey::of::<English>(), ServiceKey::of::<English>());
        assert_ne!(ServiceKey::of::<English>(), ServiceKey::of::<dyn Greeter>());
    }

    #[test]
    fn test_short_name() {
        assert_eq!(ServiceKey::of::<English>().short_name(), "English");
        assert_eq!(short_type_name("a::b::Wrapper<c::D>"), "Wrapper<c::D>");
        assert_eq!(short_type_name("u32"), "u32");
    }
}
