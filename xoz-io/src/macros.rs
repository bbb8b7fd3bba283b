/// Generates `write_<ty>`/`read_<ty>` helpers on `ByteIOExt` for the given
/// little-endian primitive integer types.
#[macro_export]
macro_rules! byteio_impl_primitive_rw {
    ($($ty:ty),+ $(,)?) => {
        $(
            paste::paste! {
                #[inline(always)]
                fn [<write_ $ty>](&mut self, value: $ty) -> IoResult {
                    self.write_exact(&value.to_le_bytes())
                }

                #[inline(always)]
                fn [<read_ $ty>](&mut self) -> IoResult<$ty> {
                    let mut buf = [0u8; core::mem::size_of::<$ty>()];
                    self.read_exact(&mut buf)?;
                    Ok(<$ty>::from_le_bytes(buf))
                }
            }
        )+
    };
}
