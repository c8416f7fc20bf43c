use {
    super::{Heap, WorkerBoundRef, borrow_cell::{BorrowCell, Ref, RefMut}},
    crate::{
        context::{ContextId, allocate_id},
        describe::Description,
        error::{Error, Result},
        frozen,
    },
    bitflags::bitflags,
    smallvec::SmallVec,
    std::{
        fmt,
        hash::{Hash, Hasher},
        ops::Deref,
        sync::{
            Arc,
            Weak,
            atomic::{AtomicU8, AtomicU64, Ordering::{Acquire, Release, SeqCst}},
        },
    },
};

/* -------------------------------------------------------------------------- */
/*                                    Tags                                    */
/* -------------------------------------------------------------------------- */

/// Tag word of an object that is in flight between heaps.
const DETACHED: u64 = u64::MAX - 1;

/// Tag word of a frozen object.
const FROZEN: u64 = u64::MAX;

/// Mutability tag of an object.
///
/// Packed into a single atomic word in the object,
/// so that it can be queried from any thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tag
{
    /// Only the owning context may access the object.
    Exclusive(ContextId),

    /// The object is part of a detached graph; nobody may access it.
    Detached,

    /// Anyone may read the object; nobody may mutate it.
    Frozen,
}

impl Tag
{
    fn pack(self) -> u64
    {
        match self {
            Self::Exclusive(owner) => owner.0,
            Self::Detached         => DETACHED,
            Self::Frozen           => FROZEN,
        }
    }

    fn unpack(word: u64) -> Self
    {
        match word {
            DETACHED => Self::Detached,
            FROZEN   => Self::Frozen,
            owner    => Self::Exclusive(ContextId(owner)),
        }
    }
}

bitflags!
{
    /// Rarely set properties of objects.
    pub struct Flags: u8
    {
        /// Freezing any graph that reaches this object must fail.
        const NEVER_FROZEN = 0b0000_0001;
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Objects                                  */
/* -------------------------------------------------------------------------- */

/// Uniquely identifies an object within the process.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectId(pub u64);

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

pub (crate) struct Object
{
    id: ObjectId,
    type_name: &'static str,

    /// Packed [`Tag`].
    tag: AtomicU64,

    /// Bits of [`Flags`].
    flags: AtomicU8,

    fields: BorrowCell<SmallVec<[Value; 4]>>,
}

/// Handle to an object on some heap.
///
/// Handles can be cloned and sent anywhere,
/// but the object behind them can only be accessed
/// according to its mutability tag:
/// exclusive objects only from their owning context,
/// frozen objects from anywhere but only for reading.
/// Two handles are equal if they refer to the same object.
#[derive(Clone)]
pub struct ObjectRef
{
    inner: Arc<Object>,
}

/// Value stored in an object field.
#[derive(Clone, Debug, PartialEq)]
pub enum Value
{
    /// No value.
    Undef,

    /// Boolean.
    Bool(bool),

    /// Integer.
    Int(i64),

    /// Immutable string; not a heap object.
    Str(Arc<str>),

    /// Reference to another object.
    Ref(ObjectRef),

    /// Reference that only resolves on the context that made it.
    Bound(WorkerBoundRef),
}

impl ObjectRef
{
    /// Allocate an object on the heap of the calling context.
    ///
    /// References among the fields must be accessible
    /// from the calling context, i.e. owned by it or frozen.
    pub fn new<I>(type_name: &'static str, fields: I) -> Result<Self>
        where I: IntoIterator<Item=Value>
    {
        let fields: SmallVec<[Value; 4]> = fields.into_iter().collect();
        for field in &fields {
            frozen::check_value_access(field)?;
        }

        let id = ObjectId(allocate_id(&NEXT_OBJECT_ID, "object"));
        let owner = ContextId::current();
        let object = Object{
            id,
            type_name,
            tag: AtomicU64::new(Tag::Exclusive(owner).pack()),
            flags: AtomicU8::new(Flags::empty().bits()),
            fields: BorrowCell::new(fields),
        };

        let this = Self{inner: Arc::new(object)};
        Heap::with_current(|heap| heap.register(&this));
        Ok(this)
    }

    /// Process-wide identity of the object.
    pub fn id(&self) -> ObjectId
    {
        self.inner.id
    }

    /// Name of the type given at allocation.
    pub fn type_name(&self) -> &'static str
    {
        self.inner.type_name
    }

    /// Describe the object for diagnostics.
    ///
    /// Always allowed, regardless of ownership.
    pub fn describe(&self) -> Description
    {
        Description::new(self.inner.type_name, self.inner.id.0)
    }

    fn out_of_bounds(&self, index: usize, len: usize) -> Error
    {
        Error::FieldOutOfBounds{object: self.describe(), index, len}
    }

    /// Whether the object is frozen.
    ///
    /// Always allowed, regardless of ownership.
    pub fn is_frozen(&self) -> bool
    {
        self.tag() == Tag::Frozen
    }

    /// The context that exclusively owns the object.
    ///
    /// Frozen and detached objects have no owner.
    pub fn owner(&self) -> Option<ContextId>
    {
        match self.tag() {
            Tag::Exclusive(owner) => Some(owner),
            Tag::Detached | Tag::Frozen => None,
        }
    }

    /// Freeze the object and everything reachable from it.
    ///
    /// See [`frozen::freeze`].
    pub fn freeze(&self) -> Result<()>
    {
        frozen::freeze(self)
    }

    /// Make every future attempt to freeze this object fail.
    ///
    /// See [`frozen::ensure_never_frozen`].
    pub fn ensure_never_frozen(&self) -> Result<()>
    {
        frozen::ensure_never_frozen(self)
    }

    /// Borrow the fields for reading.
    pub fn fields(&self) -> Result<Fields>
    {
        frozen::check_same_worker_access(self)?;
        self.try_fields()
    }

    /// Number of fields.
    pub fn len(&self) -> Result<usize>
    {
        Ok(self.fields()?.len())
    }

    /// Whether the object has no fields.
    pub fn is_empty(&self) -> Result<bool>
    {
        Ok(self.fields()?.is_empty())
    }

    /// Read a field.
    ///
    /// Fails with [`Error::FieldOutOfBounds`] if there is no such field.
    pub fn get(&self, index: usize) -> Result<Value>
    {
        let fields = self.fields()?;
        fields.get(index).cloned()
            .ok_or_else(|| self.out_of_bounds(index, fields.len()))
    }

    /// Overwrite a field.
    ///
    /// Fails with [`Error::FieldOutOfBounds`] if there is no such field.
    pub fn set(&self, index: usize, value: Value) -> Result<()>
    {
        self.borrow_mut()?.set(index, value)
    }

    /// Borrow the fields for mutation.
    ///
    /// While the guard is alive, the object cannot be frozen
    /// or transferred, and it is named as blocker when that is tried.
    pub fn borrow_mut(&self) -> Result<MutationGuard>
    {
        frozen::check_mutation_allowed(self)?;
        frozen::check_same_worker_access(self)?;
        let fields = self.inner.fields.try_borrow_mut()
            .ok_or_else(|| Error::BorrowConflict(self.describe()))?;
        Ok(MutationGuard{object: self, fields})
    }

    /* ------------------------------------------------------------------ */
    /*                      Crate-internal bookkeeping                     */
    /* ------------------------------------------------------------------ */

    pub (crate) fn tag(&self) -> Tag
    {
        Tag::unpack(self.inner.tag.load(Acquire))
    }

    pub (crate) fn set_tag(&self, tag: Tag)
    {
        self.inner.tag.store(tag.pack(), Release);
    }

    pub (crate) fn flags(&self) -> Flags
    {
        Flags::from_bits_truncate(self.inner.flags.load(Acquire))
    }

    pub (crate) fn insert_flags(&self, flags: Flags)
    {
        self.inner.flags.fetch_or(flags.bits(), SeqCst);
    }

    /// Whether a [`MutationGuard`] for the object is alive.
    pub (crate) fn is_mutably_borrowed(&self) -> bool
    {
        self.inner.fields.is_mutably_borrowed()
    }

    /// Borrow the fields without checking the mutability tag.
    pub (crate) fn try_fields(&self) -> Result<Fields>
    {
        let inner = self.inner.fields.try_borrow()
            .ok_or_else(|| Error::BorrowConflict(self.describe()))?;
        Ok(Fields{inner})
    }

    /// Number of strong handles to the object, including this one.
    pub (crate) fn handle_count(&self) -> usize
    {
        Arc::strong_count(&self.inner)
    }

    pub (crate) fn downgrade(&self) -> Weak<Object>
    {
        Arc::downgrade(&self.inner)
    }

    pub (crate) fn upgrade(weak: &Weak<Object>) -> Option<Self>
    {
        weak.upgrade().map(|inner| Self{inner})
    }
}

impl PartialEq for ObjectRef
{
    fn eq(&self, other: &Self) -> bool
    {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ObjectRef
{
}

impl Hash for ObjectRef
{
    fn hash<H>(&self, state: &mut H)
        where H: Hasher
    {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ObjectRef
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        // Printing fields would need an access check, so don't.
        write!(f, "ObjectRef({})", self.describe())
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Borrows                                  */
/* -------------------------------------------------------------------------- */

/// Shared borrow of the fields of an object.
pub struct Fields<'a>
{
    inner: Ref<'a, SmallVec<[Value; 4]>>,
}

impl<'a> Deref for Fields<'a>
{
    type Target = [Value];

    fn deref(&self) -> &Self::Target
    {
        &self.inner
    }
}

/// Exclusive borrow of the fields of an object.
///
/// Obtained from [`ObjectRef::borrow_mut`].
pub struct MutationGuard<'a>
{
    object: &'a ObjectRef,
    fields: RefMut<'a, SmallVec<[Value; 4]>>,
}

impl<'a> MutationGuard<'a>
{
    /// The object being mutated.
    pub fn object(&self) -> &ObjectRef
    {
        self.object
    }

    /// Overwrite a field.
    ///
    /// Fails with [`Error::FieldOutOfBounds`] if there is no such field.
    pub fn set(&mut self, index: usize, value: Value) -> Result<()>
    {
        frozen::check_value_access(&value)?;
        let len = self.fields.len();
        let field = self.fields.get_mut(index)
            .ok_or_else(|| self.object.out_of_bounds(index, len))?;
        *field = value;
        Ok(())
    }

    /// Append a field.
    pub fn push(&mut self, value: Value) -> Result<()>
    {
        frozen::check_value_access(&value)?;
        self.fields.push(value);
        Ok(())
    }

    /// Remove and return the last field.
    pub fn pop(&mut self) -> Option<Value>
    {
        self.fields.pop()
    }
}

impl<'a> Deref for MutationGuard<'a>
{
    type Target = [Value];

    fn deref(&self) -> &Self::Target
    {
        &self.fields
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Values                                   */
/* -------------------------------------------------------------------------- */

impl Value
{
    /// The referenced object, if this is a [`Ref`][`Self::Ref`].
    pub fn as_object(&self) -> Option<&ObjectRef>
    {
        match self {
            Self::Ref(object) => Some(object),
            _ => None,
        }
    }

    /// The integer, if this is an [`Int`][`Self::Int`].
    pub fn as_int(&self) -> Option<i64>
    {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// The Boolean, if this is a [`Bool`][`Self::Bool`].
    pub fn as_bool(&self) -> Option<bool>
    {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// The string, if this is a [`Str`][`Self::Str`].
    pub fn as_str(&self) -> Option<&str>
    {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Whether the value can be read from any context.
    ///
    /// Only references to unfrozen objects cannot.
    pub fn is_frozen(&self) -> bool
    {
        match self {
            Self::Ref(object) => object.is_frozen(),
            _ => true,
        }
    }
}

impl Default for Value
{
    fn default() -> Self
    {
        Self::Undef
    }
}

impl From<bool> for Value
{
    fn from(value: bool) -> Self
    {
        Self::Bool(value)
    }
}

impl From<i64> for Value
{
    fn from(value: i64) -> Self
    {
        Self::Int(value)
    }
}

impl From<&str> for Value
{
    fn from(value: &str) -> Self
    {
        Self::Str(value.into())
    }
}

impl From<ObjectRef> for Value
{
    fn from(value: ObjectRef) -> Self
    {
        Self::Ref(value)
    }
}

impl From<WorkerBoundRef> for Value
{
    fn from(value: WorkerBoundRef) -> Self
    {
        Self::Bound(value)
    }
}
