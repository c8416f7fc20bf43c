use {
    crate::{error::Result, frozen::check_if_frozen, heap::Value},
    std::{mem::replace, sync::Mutex},
};

/// Mutable slot that can be shared between contexts.
///
/// The slot can be read and written from any context,
/// so anything stored in it must be frozen.
/// References are compared by identity.
#[derive(Debug, Default)]
pub struct AtomicReference
{
    value: Mutex<Value>,
}

impl AtomicReference
{
    /// Create a slot with the given value.
    ///
    /// Fails with [`Error::NotFrozen`][`crate::Error::NotFrozen`]
    /// if the value references an unfrozen object.
    pub fn new(value: Value) -> Result<Self>
    {
        check_if_frozen(&value)?;
        Ok(Self{value: Mutex::new(value)})
    }

    /// The current value.
    pub fn get(&self) -> Value
    {
        self.value.lock().unwrap().clone()
    }

    /// Replace the value.
    pub fn set(&self, value: Value) -> Result<()>
    {
        self.swap(value)?;
        Ok(())
    }

    /// Replace the value, returning the old one.
    pub fn swap(&self, value: Value) -> Result<Value>
    {
        check_if_frozen(&value)?;
        Ok(replace(&mut *self.value.lock().unwrap(), value))
    }

    /// Replace the value only if it is the expected one.
    ///
    /// Returns whether the value was replaced.
    pub fn compare_and_set(&self, expected: &Value, value: Value) -> Result<bool>
    {
        check_if_frozen(&value)?;
        let mut current = self.value.lock().unwrap();
        if *current != *expected {
            return Ok(false);
        }
        *current = value;
        Ok(true)
    }
}
