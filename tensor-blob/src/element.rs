use bytemuck::Pod;
use half::f16;
use std::fmt::Debug;

mod private {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for u16 {}
    impl Sealed for u8 {}
}

/// 张量在主存中的存储类型：`f32`、半精度位模式 `u16` 或 `u8`
pub trait Element: Pod + Debug + Send + Sync + private::Sealed {
    const NAME: &'static str;
    /// 存储的是否为半精度位模式
    const IS_HALF: bool;

    fn from_f32(val: f32) -> Self;
    fn from_f16_bits(bits: u16) -> Self;
    fn to_f32(self) -> f32;
}

impl Element for f32 {
    const NAME: &'static str = "f32";
    const IS_HALF: bool = false;

    #[inline]
    fn from_f32(val: f32) -> Self {
        val
    }
    #[inline]
    fn from_f16_bits(bits: u16) -> Self {
        f16::from_bits(bits).to_f32()
    }
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
}

impl Element for u16 {
    const NAME: &'static str = "f16";
    const IS_HALF: bool = true;

    #[inline]
    fn from_f32(val: f32) -> Self {
        f16::from_f32(val).to_bits()
    }
    #[inline]
    fn from_f16_bits(bits: u16) -> Self {
        bits
    }
    #[inline]
    fn to_f32(self) -> f32 {
        f16::from_bits(self).to_f32()
    }
}

impl Element for u8 {
    const NAME: &'static str = "u8";
    const IS_HALF: bool = false;

    #[inline]
    fn from_f32(val: f32) -> Self {
        val as _
    }
    #[inline]
    fn from_f16_bits(bits: u16) -> Self {
        f16::from_bits(bits).to_f32() as _
    }
    #[inline]
    fn to_f32(self) -> f32 {
        self as _
    }
}
