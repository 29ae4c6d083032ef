//! Conversion of borrowed AT Protocol value types into owned, `'static` ones.
//!
//! Most types in this crate borrow from the buffer they were deserialized
//! out of, to avoid copying string/byte data during request parsing. Once a
//! value needs to outlive that buffer (held across an `.await`, stored in app
//! state, returned from a handler) it must be converted to an owned form.
//! `IntoStatic` is that conversion.

/// Converts a possibly-borrowed value into its owned, `'static` counterpart.
pub trait IntoStatic {
    /// The `'static` form of `Self`.
    type Output: 'static;

    /// Consumes `self`, returning the owned form.
    fn into_static(self) -> Self::Output;
}

macro_rules! impl_into_static_identity {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoStatic for $ty {
                type Output = $ty;

                #[inline]
                fn into_static(self) -> Self::Output {
                    self
                }
            }
        )*
    };
}

impl_into_static_identity!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    smol_str::SmolStr,
    bytes::Bytes,
    serde_json::Value,
    std::time::Duration,
);

impl IntoStatic for &'static str {
    type Output = &'static str;

    #[inline]
    fn into_static(self) -> Self::Output {
        self
    }
}

impl<T: IntoStatic> IntoStatic for Option<T> {
    type Output = Option<T::Output>;

    #[inline]
    fn into_static(self) -> Self::Output {
        self.map(IntoStatic::into_static)
    }
}

impl<T: IntoStatic> IntoStatic for Vec<T> {
    type Output = Vec<T::Output>;

    #[inline]
    fn into_static(self) -> Self::Output {
        self.into_iter().map(IntoStatic::into_static).collect()
    }
}

impl<T: IntoStatic> IntoStatic for Box<T> {
    type Output = Box<T::Output>;

    #[inline]
    fn into_static(self) -> Self::Output {
        Box::new((*self).into_static())
    }
}

impl<T: IntoStatic, E: IntoStatic> IntoStatic for Result<T, E> {
    type Output = Result<T::Output, E::Output>;

    #[inline]
    fn into_static(self) -> Self::Output {
        match self {
            Ok(v) => Ok(v.into_static()),
            Err(e) => Err(e.into_static()),
        }
    }
}

impl<K, V> IntoStatic for std::collections::BTreeMap<K, V>
where
    K: Ord + 'static,
    V: IntoStatic,
{
    type Output = std::collections::BTreeMap<K, V::Output>;

    #[inline]
    fn into_static(self) -> Self::Output {
        self.into_iter()
            .map(|(k, v)| (k, v.into_static()))
            .collect()
    }
}

impl<K, V> IntoStatic for std::collections::HashMap<K, V>
where
    K: std::hash::Hash + Eq + 'static,
    V: IntoStatic,
{
    type Output = std::collections::HashMap<K, V::Output>;

    #[inline]
    fn into_static(self) -> Self::Output {
        self.into_iter()
            .map(|(k, v)| (k, v.into_static()))
            .collect()
    }
}

impl<A: IntoStatic, B: IntoStatic> IntoStatic for (A, B) {
    type Output = (A::Output, B::Output);

    #[inline]
    fn into_static(self) -> Self::Output {
        (self.0.into_static(), self.1.into_static())
    }
}
