//! The relationship between a declared type and the types stored under it.
//!
//! A [`Value<T>`](crate::Value) or [`Handle<T>`](crate::Handle) can refer to
//! an object of any type `U` for which `T: Base<U>` holds. Usually `T` is a
//! trait object and `U` a concrete type implementing the trait, but the
//! relation is also reflexive (every type is its own base) and can be
//! declared between trait objects with [`impl_upcast!`](crate::impl_upcast).
//!
//! `dyn Any` (optionally `+ Send` and `+ Send + Sync`) is a base of every
//! `'static` type out of the box.

use core::{any::Any, ptr::NonNull};

/// Declares that `Self` is a base of `U`, so a view of a `U` can be widened
/// into a view of `Self`.
///
/// Implement this through [`impl_base!`](crate::impl_base) and
/// [`impl_upcast!`](crate::impl_upcast) rather than by hand.
///
/// # Safety
///
/// [`Base::upcast`] must return a pointer to the same address it was given,
/// with pointer metadata that is valid for the object behind it. In practice
/// this means the implementation must be a plain unsizing or upcasting
/// coercion.
pub unsafe trait Base<U: ?Sized + 'static>: 'static {
    /// Widens a view of a `U` into a view of `Self`.
    fn upcast(derived: NonNull<U>) -> NonNull<Self>;
}

// SAFETY: The identity keeps both the address and the metadata.
unsafe impl<T: ?Sized + 'static> Base<T> for T {
    #[inline(always)]
    fn upcast(derived: NonNull<T>) -> NonNull<T> {
        derived
    }
}

/// Makes a trait object the base of every sized type implementing the trait.
///
/// Auto traits and other marker bounds can be added; the trait object then
/// only accepts types with those bounds. Each combination needs its own
/// invocation.
///
/// # Examples
///
/// ```
/// use polyval::{Value, impl_base};
///
/// trait Animal {
///     fn name(&self) -> &str;
/// }
///
/// #[derive(Clone)]
/// struct Dog;
///
/// impl Animal for Dog {
///     fn name(&self) -> &str {
///         "dog"
///     }
/// }
///
/// impl_base!(dyn Animal);
/// impl_base!(dyn Animal + Send + Sync);
///
/// let pet: Value<dyn Animal + Send + Sync> = Value::new(Dog);
/// assert_eq!(pet.name(), "dog");
/// ```
#[macro_export]
macro_rules! impl_base {
    (dyn $($bounds:tt)+) => {
        // SAFETY: The unsizing coercion keeps the address and attaches the
        // vtable of the concrete type.
        unsafe impl<__Derived> $crate::Base<__Derived> for dyn $($bounds)+
        where
            __Derived: $($bounds)+ + 'static,
        {
            #[inline(always)]
            fn upcast(
                derived: ::core::ptr::NonNull<__Derived>,
            ) -> ::core::ptr::NonNull<Self> {
                derived
            }
        }
    };
}

/// Makes one trait object the base of another, when the trait of the first is
/// a supertrait of the second.
///
/// Narrowing always targets a concrete type; to reach a subtrait view from a
/// supertrait view, narrow to the concrete type and widen again.
///
/// # Examples
///
/// ```
/// use polyval::{Handle, Value, impl_base, impl_upcast};
///
/// trait Shape {
///     fn area(&self) -> f64;
/// }
///
/// trait Polygon: Shape {
///     fn corners(&self) -> usize;
/// }
///
/// #[derive(Clone)]
/// struct Square(f64);
///
/// impl Shape for Square {
///     fn area(&self) -> f64 {
///         self.0 * self.0
///     }
/// }
///
/// impl Polygon for Square {
///     fn corners(&self) -> usize {
///         4
///     }
/// }
///
/// impl_base!(dyn Shape);
/// impl_base!(dyn Polygon);
/// impl_upcast!(dyn Polygon => dyn Shape);
///
/// let polygon: Value<dyn Polygon> = Value::new(Square(2.0));
/// let shape: Handle<dyn Shape> = polygon.handle_as::<dyn Shape>();
/// assert_eq!(shape.get().area(), 4.0);
/// drop(shape);
/// ```
#[macro_export]
macro_rules! impl_upcast {
    ($derived:ty => $base:ty) => {
        // SAFETY: Trait upcasting keeps the address and selects the vtable of
        // the supertrait for the same concrete type.
        unsafe impl $crate::Base<$derived> for $base {
            #[inline(always)]
            fn upcast(derived: ::core::ptr::NonNull<$derived>) -> ::core::ptr::NonNull<Self> {
                derived
            }
        }
    };
}

impl_base!(dyn Any);
impl_base!(dyn Any + Send);
impl_base!(dyn Any + Send + Sync);
impl_upcast!(dyn Any + Send => dyn Any);
impl_upcast!(dyn Any + Send + Sync => dyn Any);
impl_upcast!(dyn Any + Send + Sync => dyn Any + Send);
