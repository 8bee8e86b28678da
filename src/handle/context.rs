use std::any::Any;

/// Function releasing an externally owned backend context.
pub type ContextFree = Box<dyn FnOnce(Box<dyn Any + Send>) + Send>;

enum ContextRepr {
    Inline(Box<dyn Any + Send>),
    External { handle: Box<dyn Any + Send>, free: ContextFree },
    Released,
}

/// Backend private storage bound to a message digest handle.
///
/// The storage is either owned by the handle (inline) or supplied externally together with a
/// function to release it. Backends reach it the same way in both cases.
pub struct Context {
    repr: ContextRepr,
}

impl Context {
    pub(crate) fn inline(value: Box<dyn Any + Send>) -> Context {
        Context { repr: ContextRepr::Inline(value) }
    }

    pub(crate) fn external(handle: Box<dyn Any + Send>, free: ContextFree) -> Context {
        Context { repr: ContextRepr::External { handle, free } }
    }

    /// Returns whether this context is owned by someone else than the handle.
    pub fn is_external(&self) -> bool {
        matches!(self.repr, ContextRepr::External { .. })
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        match &self.repr {
            ContextRepr::Inline(value) => value.downcast_ref(),
            ContextRepr::External { handle, .. } => handle.downcast_ref(),
            ContextRepr::Released => None,
        }
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        match &mut self.repr {
            ContextRepr::Inline(value) => value.downcast_mut(),
            ContextRepr::External { handle, .. } => handle.downcast_mut(),
            ContextRepr::Released => None,
        }
    }

    /// Replaces inline value. External contexts are left untouched.
    pub fn set<T: Any + Send>(&mut self, value: T) -> bool {
        match &mut self.repr {
            ContextRepr::Inline(inline) => {
                *inline = Box::new(value);
                true
            },
            _ => false,
        }
    }

    pub(crate) fn release(&mut self) {
        match std::mem::replace(&mut self.repr, ContextRepr::Released) {
            ContextRepr::External { handle, free } => free(handle),
            ContextRepr::Inline(_) | ContextRepr::Released => {},
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.release();
    }
}
