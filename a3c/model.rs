use tch::{
    nn::{self, ConvConfig, LinearConfig},
    Device, Kind, Tensor,
};

use crate::error::{Error, Result};

/// Name under which every approximator registers its variables.
///
/// Local and global copies are separate `VarStore`s, so the same scope is
/// used everywhere and variable names line up one to one.
pub const SCOPE: &str = "net";

/// A network with a shared trunk feeding a policy head and a value head.
pub trait ActorCritic {
    /// Returns `(policy, value)` with shapes `(B, num_actions)` and `(B,)`.
    ///
    /// `xs` holds `(B, height, width, history_len)` observations with 8-bit
    /// pixel values.
    fn forward(&self, xs: &Tensor) -> (Tensor, Tensor);

    /// Trainable variables belonging to this model's scope, sorted by name.
    fn variables(&self) -> Vec<(String, Tensor)>;

    fn num_actions(&self) -> usize;

    fn device(&self) -> Device;
}

pub(crate) fn scoped_variables(vs: &nn::VarStore, scope: &str) -> Vec<(String, Tensor)> {
    let prefix = format!("{scope}.");

    let mut variables: Vec<_> = vs
        .variables()
        .into_iter()
        .filter(|(name, var)| name.starts_with(&prefix) && var.requires_grad())
        .collect();

    variables.sort_by(|(a, _), (b, _)| a.cmp(b));
    variables
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObservationShape {
    pub height: usize,
    pub width: usize,
    pub history_len: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Architecture {
    /// Three convolutions and a 512 unit hidden layer.
    Nature,
    /// Two convolutions and a 256 unit hidden layer.
    #[default]
    Nips,
}

struct ConvLayer {
    out_channels: i64,
    kernel: i64,
    stride: i64,
}

const NATURE_LAYERS: [ConvLayer; 3] = [
    ConvLayer {
        out_channels: 32,
        kernel: 8,
        stride: 4,
    },
    ConvLayer {
        out_channels: 64,
        kernel: 4,
        stride: 2,
    },
    ConvLayer {
        out_channels: 64,
        kernel: 3,
        stride: 1,
    },
];

const NIPS_LAYERS: [ConvLayer; 2] = [
    ConvLayer {
        out_channels: 16,
        kernel: 8,
        stride: 4,
    },
    ConvLayer {
        out_channels: 32,
        kernel: 4,
        stride: 2,
    },
];

impl Architecture {
    fn conv_layers(self) -> &'static [ConvLayer] {
        match self {
            Architecture::Nature => &NATURE_LAYERS,
            Architecture::Nips => &NIPS_LAYERS,
        }
    }

    fn hidden_units(self) -> i64 {
        match self {
            Architecture::Nature => 512,
            Architecture::Nips => 256,
        }
    }
}

fn build_trunk(
    vs_path: &nn::Path,
    architecture: Architecture,
    shape: ObservationShape,
) -> Result<nn::Sequential> {
    let too_small = || Error::InputTooSmall {
        architecture,
        height: shape.height,
        width: shape.width,
    };

    let mut height = shape.height as i64;
    let mut width = shape.width as i64;
    let mut channels = shape.history_len as i64;

    let mut seq = nn::seq();

    for (i, layer) in architecture.conv_layers().iter().enumerate() {
        if height < layer.kernel || width < layer.kernel {
            return Err(too_small());
        }

        let config = ConvConfig {
            stride: layer.stride,
            ..ConvConfig::default()
        };

        seq = seq
            .add(nn::conv2d(
                vs_path / format!("conv{}", i + 1),
                channels,
                layer.out_channels,
                layer.kernel,
                config,
            ))
            .add_fn(Tensor::relu);

        height = (height - layer.kernel) / layer.stride + 1;
        width = (width - layer.kernel) / layer.stride + 1;
        channels = layer.out_channels;
    }

    let conv_out_size = channels * height * width;
    if conv_out_size == 0 {
        return Err(too_small());
    }

    Ok(seq
        .add_fn(Tensor::flat_view)
        .add(nn::linear(
            vs_path / "fc1",
            conv_out_size,
            architecture.hidden_units(),
            LinearConfig::default(),
        ))
        .add_fn(Tensor::relu))
}

/// Converts `(B, H, W, C)` 8-bit observations into `(B, C, H, W)` floats in `[0, 1]`.
fn normalize(xs: &Tensor) -> Tensor {
    xs.to_kind(Kind::Float).permute([0, 3, 1, 2]) / 255.0
}

#[must_use]
#[derive(Debug)]
pub struct ConvActorCritic {
    vs: nn::VarStore,
    trunk: nn::Sequential,
    policy: nn::Linear,
    value: nn::Linear,
    num_actions: usize,
}

impl ConvActorCritic {
    pub fn new(
        device: Device,
        architecture: Architecture,
        shape: ObservationShape,
        num_actions: usize,
    ) -> Result<Self> {
        let vs = nn::VarStore::new(device);
        let root = vs.root() / SCOPE;

        let trunk = build_trunk(&root, architecture, shape)?;
        let hidden = architecture.hidden_units();

        let policy = nn::linear(
            &root / "policy",
            hidden,
            num_actions as i64,
            LinearConfig::default(),
        );
        let value = nn::linear(&root / "value", hidden, 1, LinearConfig::default());

        Ok(Self {
            vs,
            trunk,
            policy,
            value,
            num_actions,
        })
    }
}

impl ActorCritic for ConvActorCritic {
    fn forward(&self, xs: &Tensor) -> (Tensor, Tensor) {
        let hidden = normalize(xs).apply(&self.trunk);
        let policy = hidden.apply(&self.policy).softmax(-1, Kind::Float);
        let value = hidden.apply(&self.value).view([-1]);
        (policy, value)
    }

    fn variables(&self) -> Vec<(String, Tensor)> {
        scoped_variables(&self.vs, SCOPE)
    }

    fn num_actions(&self) -> usize {
        self.num_actions
    }

    fn device(&self) -> Device {
        self.vs.device()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn observations(batch: i64, shape: ObservationShape) -> Tensor {
        Tensor::randint(
            256,
            [
                batch,
                shape.height as i64,
                shape.width as i64,
                shape.history_len as i64,
            ],
            (Kind::Uint8, Device::Cpu),
        )
    }

    fn assert_valid_policy(policy: &Tensor, batch: i64, num_actions: i64) {
        assert_eq!(policy.size(), vec![batch, num_actions]);

        let rows = Vec::<f32>::try_from(&policy.sum_dim_intlist(1, false, Kind::Float)).unwrap();
        for sum in rows {
            assert!((sum - 1.0).abs() < 1e-5, "row sums to {sum}");
        }

        let entries = Vec::<f32>::try_from(&policy.flatten(0, -1)).unwrap();
        assert!(entries.iter().all(|p| p.is_finite() && (0.0..=1.0).contains(p)));
    }

    #[test]
    fn nips_heads_have_expected_shapes() {
        let shape = ObservationShape {
            height: 20,
            width: 20,
            history_len: 4,
        };
        let model = ConvActorCritic::new(Device::Cpu, Architecture::Nips, shape, 6).unwrap();

        let (policy, value) = model.forward(&observations(3, shape));

        assert_valid_policy(&policy, 3, 6);
        assert_eq!(value.size(), vec![3]);
    }

    #[test]
    fn nature_heads_have_expected_shapes() {
        let shape = ObservationShape {
            height: 36,
            width: 40,
            history_len: 2,
        };
        let model = ConvActorCritic::new(Device::Cpu, Architecture::Nature, shape, 4).unwrap();

        let (policy, value) = model.forward(&observations(2, shape));

        assert_valid_policy(&policy, 2, 4);
        assert_eq!(value.size(), vec![2]);
    }

    #[test]
    fn rejects_observations_smaller_than_the_trunk() {
        let shape = ObservationShape {
            height: 30,
            width: 30,
            history_len: 4,
        };

        let err = ConvActorCritic::new(Device::Cpu, Architecture::Nature, shape, 4).unwrap_err();
        assert!(matches!(
            err,
            Error::InputTooSmall {
                architecture: Architecture::Nature,
                ..
            }
        ));
    }

    #[test]
    fn variables_are_scoped_and_sorted() {
        let shape = ObservationShape {
            height: 20,
            width: 20,
            history_len: 4,
        };
        let model = ConvActorCritic::new(Device::Cpu, Architecture::Nips, shape, 3).unwrap();

        let names: Vec<_> = model.variables().into_iter().map(|(name, _)| name).collect();

        assert_eq!(
            names,
            [
                "net.conv1.bias",
                "net.conv1.weight",
                "net.conv2.bias",
                "net.conv2.weight",
                "net.fc1.bias",
                "net.fc1.weight",
                "net.policy.bias",
                "net.policy.weight",
                "net.value.bias",
                "net.value.weight",
            ]
        );
    }

    #[test]
    fn extreme_logits_stay_finite() {
        let shape = ObservationShape {
            height: 20,
            width: 20,
            history_len: 1,
        };
        let model = ConvActorCritic::new(Device::Cpu, Architecture::Nips, shape, 4).unwrap();

        for (name, mut var) in model.variables() {
            tch::no_grad(|| match name.as_str() {
                "net.policy.weight" => {
                    let _ = var.zero_();
                }
                "net.policy.bias" => var.copy_(&Tensor::from_slice(&[1e4_f32, -1e4, 0.0, 0.0])),
                _ => {}
            });
        }

        let (policy, value) = model.forward(&observations(2, shape));

        assert_valid_policy(&policy, 2, 4);
        let first = Vec::<f32>::try_from(&policy.get(0)).unwrap();
        assert!((first[0] - 1.0).abs() < 1e-6);
        assert!(Vec::<f32>::try_from(&value).unwrap().iter().all(|v| v.is_finite()));
    }
}
