//! Rank-4 tensor in NHWC layout

/// Batch, height, width, channel tensor stored row-major
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor4 {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl Tensor4 {
    /// Returns `None` when `data` does not fill `shape` exactly
    pub fn new(shape: [usize; 4], data: Vec<f32>) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(Self { shape, data })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Element at (n, h, w, c)
    pub fn get(&self, n: usize, h: usize, w: usize, c: usize) -> Option<f32> {
        let [bn, bh, bw, bc] = self.shape;
        if n >= bn || h >= bh || w >= bw || c >= bc {
            return None;
        }
        self.data.get(((n * bh + h) * bw + w) * bc + c).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_must_match_data() {
        assert!(Tensor4::new([1, 2, 2, 1], vec![0.0; 4]).is_some());
        assert!(Tensor4::new([1, 2, 2, 1], vec![0.0; 3]).is_none());
    }

    #[test]
    fn test_get_nhwc_index() {
        let t = Tensor4::new([1, 2, 3, 1], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(t.get(0, 1, 0, 0), Some(3.0));
        assert_eq!(t.get(0, 0, 2, 0), Some(2.0));
        assert_eq!(t.get(0, 2, 0, 0), None);
    }
}
