use tch::{
    Kind, Tensor,
    nn::{self, Module},
};

/// Samples a normal with the given stddev, redrawing anything past two
/// standard deviations, and registers it as a trainable variable.
pub(crate) fn truncated_normal(path: &nn::Path, name: &str, dims: &[i64], stddev: f64) -> Tensor {
    let init = tch::no_grad(|| {
        let opts = (Kind::Float, path.device());
        let bound = 2.0 * stddev;

        let mut values = Tensor::randn(dims, opts) * stddev;
        loop {
            let outside = values.abs().gt(bound);
            if outside.sum(Kind::Int64).int64_value(&[]) == 0 {
                break values;
            }
            let redraw = Tensor::randn(dims, opts) * stddev;
            values = redraw.where_self(&outside, &values);
        }
    });

    path.var_copy(name, &init)
}

/// `xs · w + b`
#[derive(Debug)]
pub(crate) struct Dense {
    ws: Tensor,
    bs: Tensor,
}

impl Dense {
    pub fn new(path: nn::Path, in_dim: i64, out_dim: i64, stddev: f64) -> Self {
        Self {
            ws: truncated_normal(&path, "weight", &[in_dim, out_dim], stddev),
            bs: truncated_normal(&path, "bias", &[out_dim], stddev),
        }
    }
}

impl Module for Dense {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.matmul(&self.ws) + &self.bs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    #[test]
    fn truncated_normal_stays_in_bounds() {
        let vs = nn::VarStore::new(Device::Cpu);
        let t = truncated_normal(&vs.root(), "w", &[64, 64], 0.5);

        assert_eq!(t.size(), [64, 64]);
        assert!(t.abs().max().double_value(&[]) <= 1.0);
        assert!(t.requires_grad());
        assert_eq!(vs.trainable_variables().len(), 1);
    }

    #[test]
    fn dense_maps_shapes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layer = Dense::new(vs.root() / "out", 4, 3, 0.5);
        let ys = Tensor::ones([2, 4], (Kind::Float, Device::Cpu)).apply(&layer);

        assert_eq!(ys.size(), [2, 3]);
        assert!(vs.variables().contains_key("out.weight"));
        assert!(vs.variables().contains_key("out.bias"));
    }
}
