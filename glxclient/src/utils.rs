use std::fmt;
use std::ops::Deref;

/// Debug prints the type of the value instead of the value itself.
#[derive(Clone)]
pub(crate) struct NoPrint<T>(pub(crate) T);

impl<T> fmt::Debug for NoPrint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NoPrint({})", std::any::type_name::<T>())
    }
}

impl<T> Deref for NoPrint<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
