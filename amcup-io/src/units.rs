#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Bytes<T>(pub T);

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Words32<T>(pub T);

impl<T> From<Bytes<T>> for Words32<T>
where
    T: std::ops::Shr<u32, Output = T>,
{
    fn from(value: Bytes<T>) -> Self {
        Self(value.0 >> 2)
    }
}

impl<T> From<Words32<T>> for Bytes<T>
where
    T: std::ops::Shl<u32, Output = T>,
{
    fn from(value: Words32<T>) -> Self {
        Self(value.0 << 2)
    }
}
