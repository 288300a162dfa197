use std::fmt;

/// 4 维张量形状，`[n, c, h, w]`
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug)]
pub struct Shape {
    pub num: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl Shape {
    #[inline]
    pub const fn new(num: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            num,
            channels,
            height,
            width,
        }
    }

    /// 单个通道的空间尺寸 h * w
    #[inline]
    pub const fn spatial(&self) -> usize {
        self.height.saturating_mul(self.width)
    }

    /// 元素个数，溢出时饱和到 `usize::MAX`
    #[inline]
    pub const fn data_size(&self) -> usize {
        self.num
            .saturating_mul(self.channels)
            .saturating_mul(self.spatial())
    }

    /// 元素个数，乘积超出 `usize` 时为 `None`
    pub fn checked_data_size(&self) -> Option<usize> {
        let Self {
            num,
            channels,
            height,
            width,
        } = *self;
        if num == 0 || channels == 0 || height == 0 || width == 0 {
            return Some(0);
        }
        num.checked_mul(channels)?
            .checked_mul(height)?
            .checked_mul(width)
    }

    /// 通道数向上对齐到 `align` 的倍数
    #[inline]
    pub const fn padded_channels(&self, align: usize) -> usize {
        self.channels.div_ceil(align).saturating_mul(align)
    }

    #[inline]
    pub const fn data_size_padded_channels(&self, align: usize) -> usize {
        self.num
            .saturating_mul(self.padded_channels(align))
            .saturating_mul(self.spatial())
    }
}

impl From<[usize; 4]> for Shape {
    fn from([num, channels, height, width]: [usize; 4]) -> Self {
        Self::new(num, channels, height, width)
    }
}

impl From<Shape> for [usize; 4] {
    fn from(shape: Shape) -> Self {
        [shape.num, shape.channels, shape.height, shape.width]
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            num,
            channels,
            height,
            width,
        } = self;
        write!(f, "({num}, {channels}, {height}, {width})")
    }
}

#[cfg(test)]
mod test {
    use super::Shape;

    #[test]
    fn test_padded() {
        let shape = Shape::new(2, 3, 4, 5);
        assert_eq!(shape.data_size(), 120);
        assert_eq!(shape.padded_channels(4), 4);
        assert_eq!(shape.data_size_padded_channels(4), 160);
        assert_eq!(shape.padded_channels(1), 3);

        let shape = Shape::new(1, 8, 2, 2);
        assert_eq!(shape.padded_channels(4), 8);
        assert_eq!(shape.data_size_padded_channels(8), 32);
    }

    #[test]
    fn test_overflow() {
        let shape = Shape::new(1 << 62, 4, 1, 1);
        assert_eq!(shape.checked_data_size(), None);
        assert_eq!(shape.data_size(), usize::MAX);
        assert_eq!(shape.data_size_padded_channels(4), usize::MAX);

        let shape = Shape::new(1 << 62, 1 << 62, 1, 0);
        assert_eq!(shape.checked_data_size(), Some(0));
        assert_eq!(shape.data_size(), 0);

        assert_eq!(Shape::new(2, 3, 4, 5).checked_data_size(), Some(120));
        assert_eq!(Shape::new(1, usize::MAX, 1, 1).padded_channels(4), usize::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::from([1, 2, 3, 4]).to_string(), "(1, 2, 3, 4)")
    }
}
