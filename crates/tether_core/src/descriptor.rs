//! Struct descriptors
//!
//! Host structs describe their exported fields and methods once through a
//! [`StructBuilder`]. Descriptors are built lazily and cached per Rust type in
//! a process-wide registry, so recursive types can refer to each other through
//! [`TypeRef`] before either is built.

use crate::errors::BridgeError;
use crate::function::{HostFunction, IntoHostFunction};
use crate::naming;
use crate::value::{HostType, HostValue, Reflect, Shared};
use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::{Arc, PoisonError, RwLock};

/// A Rust struct exposed to script.
///
/// # Example
/// ```ignore
/// #[derive(Clone, Default)]
/// struct Counter { value: i64 }
///
/// impl HostStruct for Counter {
///     const NAME: &'static str = "Counter";
///
///     fn describe(builder: StructBuilder<Self>) -> StructBuilder<Self> {
///         builder
///             .field("Value", |c| c.value, |c, v| c.value = v)
///             .method("Add", |this| move |n: i64| this.borrow_mut().value += n)
///     }
/// }
///
/// reflect_struct!(Counter);
/// ```
pub trait HostStruct: Clone + Default + 'static {
    /// Host type name, used as the constructor name.
    const NAME: &'static str;

    fn describe(builder: StructBuilder<Self>) -> StructBuilder<Self>;
}

/// Implements [`Reflect`] for one or more [`HostStruct`] types.
#[macro_export]
macro_rules! reflect_struct {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::Reflect for $ty {
            fn host_type() -> $crate::HostType {
                $crate::HostType::Struct($crate::TypeRef::of::<$ty>())
            }

            fn into_host(self) -> $crate::HostValue {
                $crate::HostValue::Struct($crate::StructRef::new(::std::rc::Rc::new(
                    ::std::cell::RefCell::new(self),
                )))
            }

            fn from_host(
                value: $crate::HostValue,
            ) -> ::std::result::Result<Self, $crate::BridgeError> {
                $crate::descriptor::struct_from_host::<$ty>(value)
            }
        }
    )+};
}

// ============================================================================
// Registry
// ============================================================================

static STRUCT_TYPES: Lazy<RwLock<HashMap<TypeId, Arc<StructType>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Descriptor of `T`, built on first use.
pub fn struct_type<T: HostStruct>() -> Arc<StructType> {
    let id = TypeId::of::<T>();
    if let Some(ty) = STRUCT_TYPES
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id)
    {
        return ty.clone();
    }

    // Built outside the lock; a concurrent first use keeps whichever landed first.
    let built = Arc::new(T::describe(StructBuilder::new()).build());
    tracing::debug!(
        name = T::NAME,
        fields = built.fields.len(),
        methods = built.methods.len(),
        "struct type registered"
    );
    STRUCT_TYPES
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(id)
        .or_insert(built)
        .clone()
}

/// [`Reflect::from_host`] for host structs: accepts the struct by value or
/// through a pointer and yields a copy.
pub fn struct_from_host<T: HostStruct>(value: HostValue) -> Result<T, BridgeError> {
    match value {
        HostValue::Struct(s) | HostValue::Pointer(s) => {
            let cell = s
                .downcast::<T>()
                .ok_or_else(|| BridgeError::conversion(s.ty().name(), T::NAME, "type mismatch"))?;
            let copy = cell
                .try_borrow()
                .map_err(|_| BridgeError::Borrowed {
                    type_name: T::NAME.to_string(),
                })?
                .clone();
            Ok(copy)
        }
        HostValue::Nil => Ok(T::default()),
        other => Err(BridgeError::conversion(other.kind_name(), T::NAME, "not a struct")),
    }
}

/// Lazy reference to a struct descriptor.
#[derive(Clone, Copy)]
pub struct TypeRef {
    id: TypeId,
    name: &'static str,
    resolve: fn() -> Arc<StructType>,
}

impl TypeRef {
    pub fn of<T: HostStruct>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: T::NAME,
            resolve: struct_type::<T>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn resolve(&self) -> Arc<StructType> {
        (self.resolve)()
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef({})", self.name)
    }
}

// ============================================================================
// Descriptors
// ============================================================================

type Getter = Arc<dyn Fn(&dyn Any) -> Result<HostValue, BridgeError> + Send + Sync>;
type Setter = Arc<dyn Fn(&dyn Any, HostValue) -> Result<(), BridgeError> + Send + Sync>;
type Binder = Arc<dyn Fn(&StructRef) -> Result<HostFunction, BridgeError> + Send + Sync>;

/// Which method set a method belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Receiver {
    /// Callable on values and pointers.
    Value,
    /// Callable on pointers only.
    Pointer,
}

pub struct FieldDef {
    name: String,
    tag: Option<String>,
    ty: HostType,
    get: Getter,
    set: Option<Setter>,
}

impl FieldDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn ty(&self) -> &HostType {
        &self.ty
    }

    pub fn is_exported(&self) -> bool {
        naming::is_exported(&self.name)
    }

    pub fn is_writable(&self) -> bool {
        self.set.is_some()
    }
}

pub struct MethodDef {
    name: String,
    receiver: Receiver,
    bind: Binder,
}

impl MethodDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn receiver(&self) -> Receiver {
        self.receiver
    }

    /// Binds the method to a receiver.
    pub fn bind(&self, this: &StructRef) -> Result<HostFunction, BridgeError> {
        (self.bind)(this)
    }
}

/// Reflection data of a host struct.
pub struct StructType {
    name: &'static str,
    type_id: TypeId,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
    zero: fn() -> Rc<dyn Any>,
    copy: fn(&dyn Any) -> Option<Rc<dyn Any>>,
}

impl StructType {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn methods(&self) -> &[MethodDef] {
        &self.methods
    }

    /// Fresh zero-valued instance.
    pub fn instantiate(self: &Arc<Self>) -> StructRef {
        StructRef {
            ty: self.clone(),
            cell: (self.zero)(),
        }
    }

    /// True once any field carries an explicit name tag.
    pub fn has_tags(&self) -> bool {
        self.fields.iter().any(|field| field.tag.is_some())
    }

    /// Exported fields with their indices.
    pub fn visible_fields(&self) -> impl Iterator<Item = (usize, &FieldDef)> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.is_exported())
    }

    /// Resolves a script key to a field index.
    ///
    /// Without tags the key is translated to its host candidates. Once any
    /// field is tagged, keys must match a tag exactly, or the exact host name
    /// of an untagged field.
    pub fn field_index(&self, key: &str) -> Option<usize> {
        if self.has_tags() {
            return self.visible_fields().find_map(|(index, field)| {
                let matched = match &field.tag {
                    Some(tag) => {
                        let tagged = naming::parse_json_tag(tag);
                        if tagged.is_empty() {
                            field.name == key
                        } else {
                            tagged == key
                        }
                    }
                    None => field.name == key,
                };
                matched.then_some(index)
            });
        }

        naming::to_host(key).iter().find_map(|candidate| {
            self.visible_fields()
                .find(|(_, field)| field.name == *candidate)
                .map(|(index, _)| index)
        })
    }

    /// Script-facing name of a field; the inverse of [`StructType::field_index`].
    pub fn field_key(&self, index: usize) -> String {
        let field = &self.fields[index];
        if !self.has_tags() {
            return naming::to_script(&field.name);
        }
        match field.tag.as_deref().map(naming::parse_json_tag) {
            Some(tagged) if !tagged.is_empty() => tagged.to_string(),
            _ => field.name.clone(),
        }
    }

    /// Resolves a script key to a method; value targets only see value receivers.
    pub fn method(&self, key: &str, through_pointer: bool) -> Option<&MethodDef> {
        naming::to_host(key).iter().find_map(|candidate| {
            self.methods.iter().find(|method| {
                method.name == *candidate
                    && (through_pointer || method.receiver == Receiver::Value)
            })
        })
    }

    /// Exported methods visible through a value or a pointer.
    pub fn method_set(&self, through_pointer: bool) -> impl Iterator<Item = &MethodDef> {
        self.methods.iter().filter(move |method| {
            naming::is_exported(&method.name)
                && (through_pointer || method.receiver == Receiver::Value)
        })
    }
}

impl fmt::Debug for StructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructType")
            .field("name", &self.name)
            .field("fields", &self.fields.iter().map(|f| &f.name).collect::<Vec<_>>())
            .field("methods", &self.methods.iter().map(|m| &m.name).collect::<Vec<_>>())
            .finish()
    }
}

fn zero_of<T: HostStruct>() -> Rc<dyn Any> {
    Rc::new(RefCell::new(T::default()))
}

fn copy_of<T: HostStruct>(cell: &dyn Any) -> Option<Rc<dyn Any>> {
    let cell = cell.downcast_ref::<RefCell<T>>()?;
    let copy = cell.try_borrow().ok()?.clone();
    Some(Rc::new(RefCell::new(copy)))
}

fn cell_of<'a, T: 'static>(cell: &'a dyn Any, name: &str) -> Result<&'a RefCell<T>, BridgeError> {
    cell.downcast_ref::<RefCell<T>>()
        .ok_or_else(|| BridgeError::conversion("struct", name, "type mismatch"))
}

// ============================================================================
// Instances
// ============================================================================

/// A host struct instance together with its descriptor.
#[derive(Clone)]
pub struct StructRef {
    ty: Arc<StructType>,
    cell: Rc<dyn Any>,
}

impl StructRef {
    pub fn new<T: HostStruct>(cell: Rc<RefCell<T>>) -> Self {
        Self {
            ty: struct_type::<T>(),
            cell,
        }
    }

    pub fn ty(&self) -> &Arc<StructType> {
        &self.ty
    }

    pub fn ptr_eq(&self, other: &StructRef) -> bool {
        Rc::as_ptr(&self.cell) as *const () == Rc::as_ptr(&other.cell) as *const ()
    }

    pub fn downcast<T: 'static>(&self) -> Option<Rc<RefCell<T>>> {
        self.cell.clone().downcast::<RefCell<T>>().ok()
    }

    /// Reads field `index`.
    pub fn field(&self, index: usize) -> Result<HostValue, BridgeError> {
        let field = &self.ty.fields[index];
        (field.get)(&*self.cell)
    }

    /// Writes field `index`; the value must already have the field's type.
    pub fn set_field(&self, index: usize, value: HostValue) -> Result<(), BridgeError> {
        let field = &self.ty.fields[index];
        match &field.set {
            Some(set) => set(&*self.cell, value),
            None => Err(BridgeError::conversion(
                value.kind_name(),
                &field.name,
                "field is read-only",
            )),
        }
    }

    /// Independent copy of the instance.
    pub fn duplicate(&self) -> Result<StructRef, BridgeError> {
        let cell = (self.ty.copy)(&*self.cell).ok_or_else(|| BridgeError::Borrowed {
            type_name: self.ty.name.to_string(),
        })?;
        Ok(StructRef {
            ty: self.ty.clone(),
            cell,
        })
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Collects the fields and methods of `T`.
pub struct StructBuilder<T> {
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: HostStruct> StructBuilder<T> {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            methods: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Read/write field.
    pub fn field<V, G, S>(mut self, name: &str, get: G, set: S) -> Self
    where
        V: Reflect,
        G: Fn(&T) -> V + Send + Sync + 'static,
        S: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let field = self.readonly(name, get);
        let field_name = name.to_string();
        let set: Setter = Arc::new(move |cell: &dyn Any, value: HostValue| {
            let cell = cell_of::<T>(cell, T::NAME)?;
            let value = V::from_host(value)?;
            let mut this = cell.try_borrow_mut().map_err(|_| BridgeError::Borrowed {
                type_name: format!("{}.{}", T::NAME, field_name),
            })?;
            set(&mut this, value);
            Ok(())
        });
        self.fields.push(FieldDef {
            set: Some(set),
            ..field
        });
        self
    }

    /// Field scripts can read but never write.
    pub fn readonly_field<V, G>(mut self, name: &str, get: G) -> Self
    where
        V: Reflect,
        G: Fn(&T) -> V + Send + Sync + 'static,
    {
        let field = self.readonly(name, get);
        self.fields.push(field);
        self
    }

    fn readonly<V, G>(&self, name: &str, get: G) -> FieldDef
    where
        V: Reflect,
        G: Fn(&T) -> V + Send + Sync + 'static,
    {
        FieldDef {
            name: name.to_string(),
            tag: None,
            ty: V::host_type(),
            get: Arc::new(move |cell: &dyn Any| {
                let cell = cell_of::<T>(cell, T::NAME)?;
                let this = cell.try_borrow().map_err(|_| BridgeError::Borrowed {
                    type_name: T::NAME.to_string(),
                })?;
                Ok(get(&this).into_host())
            }),
            set: None,
        }
    }

    /// Attaches a serialization tag to the last declared field.
    pub fn tag(mut self, tag: &str) -> Self {
        if let Some(field) = self.fields.last_mut() {
            field.tag = Some(tag.to_string());
        }
        self
    }

    /// Method with a pointer receiver: `make` gets the shared instance and
    /// returns the callable.
    pub fn method<F, H, Args>(mut self, name: &str, make: F) -> Self
    where
        F: Fn(Shared<T>) -> H + Send + Sync + 'static,
        H: IntoHostFunction<Args>,
    {
        let bind: Binder = Arc::new(move |this: &StructRef| {
            let cell = this
                .downcast::<T>()
                .ok_or_else(|| BridgeError::conversion(this.ty().name(), T::NAME, "type mismatch"))?;
            Ok(make(Shared::from_rc(cell)).into_host_function())
        });
        self.methods.push(MethodDef {
            name: name.to_string(),
            receiver: Receiver::Pointer,
            bind,
        });
        self
    }

    /// Method with a value receiver: `make` gets a copy of the instance.
    pub fn value_method<F, H, Args>(mut self, name: &str, make: F) -> Self
    where
        F: Fn(T) -> H + Send + Sync + 'static,
        H: IntoHostFunction<Args>,
    {
        let bind: Binder = Arc::new(move |this: &StructRef| {
            let copy = struct_from_host::<T>(HostValue::Pointer(this.clone()))?;
            Ok(make(copy).into_host_function())
        });
        self.methods.push(MethodDef {
            name: name.to_string(),
            receiver: Receiver::Value,
            bind,
        });
        self
    }

    fn build(self) -> StructType {
        StructType {
            name: T::NAME,
            type_id: TypeId::of::<T>(),
            fields: self.fields,
            methods: self.methods,
            zero: zero_of::<T>,
            copy: copy_of::<T>,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{MyStruct, NoTags, Tagged};

    #[test]
    fn test_tagged_resolution_is_exact() {
        let ty = struct_type::<Tagged>();
        assert!(ty.has_tags());
        assert_eq!(ty.field_index("fielda").map(|i| ty.fields()[i].name()), Some("FieldA"));
        assert_eq!(ty.field_index("fieldA"), None);
        assert_eq!(ty.field_index("fieldB"), None);
        assert_eq!(ty.field_index("FieldB").map(|i| ty.fields()[i].name()), Some("FieldB"));
    }

    #[test]
    fn test_untagged_resolution_is_fuzzy() {
        let ty = struct_type::<NoTags>();
        assert!(!ty.has_tags());
        assert_eq!(ty.field_index("fieldA").map(|i| ty.fields()[i].name()), Some("FieldA"));
        assert_eq!(ty.field_index("fieldB").map(|i| ty.fields()[i].name()), Some("FIELDB"));
        assert_eq!(ty.field_index("FieldA"), None);
    }

    #[test]
    fn test_field_keys_resolve_back() {
        for ty in [struct_type::<MyStruct>(), struct_type::<Tagged>(), struct_type::<NoTags>()] {
            for (index, _) in ty.visible_fields() {
                let key = ty.field_key(index);
                assert_eq!(ty.field_index(&key), Some(index), "{} key {key}", ty.name());
            }
        }
    }

    #[test]
    fn test_method_sets() {
        let ty = struct_type::<MyStruct>();
        assert!(ty.method("multiply", true).is_some());
        assert!(ty.method("multiply", false).is_none());
        assert!(ty.method("describe", false).is_some());
        assert_eq!(ty.method_set(false).count(), 1);
    }

    #[test]
    fn test_fields_read_and_write_through_the_cell() {
        let shared = Shared::new(MyStruct {
            int: 42,
            ..MyStruct::default()
        });
        let instance = StructRef::new(shared.rc().clone());
        let ty = instance.ty().clone();
        let int = ty.field_index("int").unwrap();

        assert_eq!(instance.field(int).unwrap(), HostValue::I64(42));
        instance.set_field(int, HostValue::I64(7)).unwrap();
        assert_eq!(shared.borrow().int, 7);

        let copy = instance.duplicate().unwrap();
        copy.set_field(int, HostValue::I64(1)).unwrap();
        assert_eq!(shared.borrow().int, 7);
    }

    #[test]
    fn test_busy_instance_reports_borrow() {
        let shared = Shared::new(MyStruct::default());
        let instance = StructRef::new(shared.rc().clone());
        let int = instance.ty().field_index("int").unwrap();

        let _guard = shared.borrow_mut();
        assert!(matches!(instance.field(int), Err(BridgeError::Borrowed { .. })));
    }

    #[test]
    fn test_struct_from_host_copies() {
        let shared = Shared::new(MyStruct {
            string: "foo".into(),
            ..MyStruct::default()
        });
        let copy: MyStruct =
            struct_from_host(HostValue::Pointer(StructRef::new(shared.rc().clone()))).unwrap();
        assert_eq!(copy.string, "foo");
        assert_eq!(struct_from_host::<MyStruct>(HostValue::Nil).unwrap().int, 0);
        assert!(struct_from_host::<MyStruct>(HostValue::I8(1)).is_err());
    }
}
