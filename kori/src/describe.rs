use std::fmt;

/// Human-readable identification of an object, for diagnostics.
///
/// Descriptions are detached from the object they describe,
/// so they can travel inside errors to any thread
/// without keeping the object alive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Description
{
    /// Name of the runtime type of the object.
    pub type_name: &'static str,

    /// Identity hash of the object.
    pub identity_hash: u32,
}

impl Description
{
    /// Describe the object with the given type name and object id.
    pub fn new(type_name: &'static str, object_id: u64) -> Self
    {
        Self{type_name, identity_hash: identity_hash(object_id)}
    }
}

impl fmt::Display for Description
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}@{:x}", self.type_name, self.identity_hash)
    }
}

/// Scramble an object id into a well-distributed 32-bit hash.
///
/// Consecutive ids produce unrelated hashes,
/// which makes descriptions easier to tell apart in logs.
fn identity_hash(object_id: u64) -> u32
{
    // Finalizer of MurmurHash3.
    let mut h = object_id;
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h as u32
}
