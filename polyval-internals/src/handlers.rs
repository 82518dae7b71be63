//! Handlers that decide how stored values are cloned.
//!
//! A [`Dispatcher`](crate::Dispatcher) is always created for a pair of a
//! concrete value type `U` and a handler type `H: ValueHandler<U>`. The
//! handler is consulted whenever a copy of the value is requested, which is
//! what allows types that cannot be cloned to be stored at all: they are
//! rejected at the attempt to clone, never at construction.

/// Trait deciding whether and how a stored value of type `U` is cloned.
///
/// Handlers are never instantiated; they are zero-sized marker types whose
/// associated functions are baked into the dispatch table of every value
/// created with them.
///
/// # Examples
///
/// ```
/// use polyval_internals::handlers::ValueHandler;
///
/// struct Connection {
///     id: u32,
/// }
///
/// // Clones connections by opening a "new" one with the next id.
/// struct Reconnect;
///
/// impl ValueHandler<Connection> for Reconnect {
///     fn try_clone(value: &Connection) -> Option<Connection> {
///         Some(Connection { id: value.id + 1 })
///     }
/// }
///
/// let copy = Reconnect::try_clone(&Connection { id: 1 }).unwrap();
/// assert_eq!(copy.id, 2);
/// ```
pub trait ValueHandler<U>: 'static {
    /// Produces an independent copy of `value`, or `None` if values of this
    /// type cannot be copied.
    fn try_clone(value: &U) -> Option<U>;
}
